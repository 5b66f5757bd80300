use crate::probe::Probe;
use crate::scan::{cdn, describe_error};
use crate::target::Target;
use crate::types::{Classification, ProbeMode, ProbeOutcome};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use reqwest::Client;
use reqwest::header::{HeaderMap, SERVER};
use std::time::{Duration, Instant};
use url::Url;

const USER_AGENT: &str = concat!("bulkprobe/", env!("CARGO_PKG_VERSION"));
const CF_RAY_HEADER: &str = "cf-ray";
const UNKNOWN_SERVER: &str = "unknown";

/// Redirects that carry no signal for a sweep; never persisted.
const IGNORED_STATUSES: &[u16] = &[302, 307];

/// Statuses worth keeping: they prove something is serving on the address.
const INFORMATIVE_STATUSES: &[u16] = &[
    200, 201, 202, 204, 206,
    300, 301, 303, 304,
    400, 401, 403, 404, 405, 408, 429,
    500, 502, 503, 504,
];

pub fn classify_status(status: u16) -> Classification {
    if IGNORED_STATUSES.contains(&status) {
        Classification::Ignored
    } else if INFORMATIVE_STATUSES.contains(&status) {
        Classification::Positive
    } else {
        Classification::Negative
    }
}

/// GET probe for the `http`, `https` and `cdn` modes.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    mode: ProbeMode,
}

impl HttpProbe {
    pub fn new(mode: ProbeMode) -> Result<Self> {
        if !matches!(mode, ProbeMode::Http | ProbeMode::Https | ProbeMode::Cdn) {
            eyre::bail!("{} is not an HTTP probe mode", mode);
        }

        log::debug!("[scan::http] new: mode={}", mode);

        // Every target is a different host, so idle connections are never reused.
        let client = Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(0)
            .build()
            .wrap_err("Failed to create HTTP client")?;

        Ok(Self { client, mode })
    }

    fn url_for(&self, target: &Target, port: u16) -> String {
        match self.mode {
            ProbeMode::Https => format!("https://{}", target.authority(port)),
            ProbeMode::Cdn if port == 443 => format!("https://{}", target.url_host()),
            _ => format!("http://{}", target.authority(port)),
        }
    }

    fn outcome_from_headers(&self, target: &Target, status: u16, headers: &HeaderMap) -> ProbeOutcome {
        let server = header_value(headers, SERVER.as_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|| UNKNOWN_SERVER.to_string());

        let mut outcome = ProbeOutcome::new(target.clone(), status, classify_status(status))
            .with_cdn(cdn::is_cdn(&server))
            .with_banner(server);

        if self.mode == ProbeMode::Cdn {
            let cf_ray = header_value(headers, CF_RAY_HEADER).unwrap_or_else(|| "-".to_string());
            outcome = outcome.with_extra(format!("CF-RAY: {}", cf_ray));
        }

        outcome
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl Probe for HttpProbe {
    fn mode(&self) -> ProbeMode {
        self.mode
    }

    async fn probe(&self, target: &Target, port: u16, timeout: Duration) -> ProbeOutcome {
        let url = self.url_for(target, port);
        let url = match Url::parse(&url) {
            Ok(url) => url,
            Err(e) => {
                log::debug!("[scan::http] invalid_url: url={} error={}", url, e);
                return ProbeOutcome::error(target.clone(), format!("invalid url {}: {}", url, e));
            }
        };

        let request_start = Instant::now();
        match self.client.get(url.clone()).timeout(timeout).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                log::trace!("[scan::http] response: url={} status={} duration={}ms",
                    url, status, request_start.elapsed().as_millis());
                self.outcome_from_headers(target, status, response.headers())
            }
            Err(e) if e.is_builder() => {
                log::debug!("[scan::http] request_build_failed: url={} error={}", url, e);
                ProbeOutcome::error(target.clone(), describe_error(&e))
            }
            Err(e) => {
                log::trace!("[scan::http] request_failed: url={} duration={}ms error={}",
                    url, request_start.elapsed().as_millis(), e);
                ProbeOutcome::negative(target.clone(), describe_error(&e))
            }
        }
    }
}
