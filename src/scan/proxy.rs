use crate::probe::Probe;
use crate::target::Target;
use crate::types::{Classification, NO_RESPONSE, ProbeMode, ProbeOutcome};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const TUNNEL_HOST: &str = "google.com";
const TUNNEL_PORT: u16 = 443;
const RESPONSE_CHUNK_SIZE: usize = 1024;

static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^HTTP/\d(?:\.\d)?\s+(\d{3})").expect("status line pattern is valid")
});

/// Checks whether a target tunnels `CONNECT google.com:443`.
#[derive(Debug, Clone, Default)]
pub struct ProxyProbe;

impl ProxyProbe {
    pub fn new() -> Self {
        log::debug!("[scan::proxy] new: tunnel={}:{}", TUNNEL_HOST, TUNNEL_PORT);
        Self
    }

    async fn exchange(&self, target: &Target, port: u16, limit: Duration) -> Result<String> {
        let addr = target.authority(port);

        let mut stream = timeout(limit, TcpStream::connect(&addr))
            .await
            .wrap_err_with(|| format!("connect to {} timed out", addr))?
            .wrap_err_with(|| format!("connect to {} failed", addr))?;

        let request = format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
            host = TUNNEL_HOST,
            port = TUNNEL_PORT,
        );
        stream.write_all(request.as_bytes()).await.wrap_err("write CONNECT request")?;

        let mut buffer = [0u8; RESPONSE_CHUNK_SIZE];
        let n = timeout(limit, stream.read(&mut buffer))
            .await
            .wrap_err("proxy reply timed out")?
            .wrap_err("read proxy reply")?;

        Ok(String::from_utf8_lossy(&buffer[..n]).into_owned())
    }
}

/// Status code of an HTTP reply's first line, if it has one.
pub fn parse_status(response: &str) -> Option<u16> {
    STATUS_LINE
        .captures(response.trim_start())
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse().ok())
}

pub fn is_tunnel_established(response: &str) -> bool {
    response.contains("200 Connection established") || parse_status(response) == Some(200)
}

#[async_trait]
impl Probe for ProxyProbe {
    fn mode(&self) -> ProbeMode {
        ProbeMode::Proxy
    }

    async fn probe(&self, target: &Target, port: u16, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();
        let response = match self.exchange(target, port, timeout).await {
            Ok(response) => response,
            Err(e) => {
                log::trace!("[scan::proxy] exchange_failed: target={} port={} duration={}ms error={:#}",
                    target, port, start.elapsed().as_millis(), e);
                return ProbeOutcome::negative(target.clone(), format!("{:#}", e));
            }
        };

        if response.is_empty() {
            return ProbeOutcome::negative(target.clone(), "connection closed without reply");
        }

        let status = parse_status(&response).unwrap_or(NO_RESPONSE);
        let status_line = response.lines().next().unwrap_or_default().trim().to_string();
        log::trace!("[scan::proxy] reply: target={} port={} status={} duration={}ms",
            target, port, status, start.elapsed().as_millis());

        if is_tunnel_established(&response) {
            ProbeOutcome::new(target.clone(), status, Classification::Positive)
                .with_banner(status_line)
                .with_extra("proxy ok")
        } else {
            ProbeOutcome::new(target.clone(), status, Classification::Negative)
                .with_banner(status_line)
                .with_extra("proxy connection failed")
        }
    }
}
