use crate::probe::Probe;
use crate::target::Target;
use crate::types::{Classification, ProbeMode, ProbeOutcome, RESPONDED};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::net::lookup_host;

/// Fully qualified so no search domain is ever appended.
const DEFAULT_QUERY_HOST: &str = "google.com.";
const RESOLVER_ATTEMPTS: usize = 1;

/// Treats the target as a candidate open resolver and asks it for a
/// well-known A record.
#[derive(Debug, Clone)]
pub struct DnsProbe {
    query_host: String,
}

impl Default for DnsProbe {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_HOST)
    }
}

impl DnsProbe {
    pub fn new(query_host: impl Into<String>) -> Self {
        let query_host = query_host.into();
        log::debug!("[scan::dns] new: query_host={} attempts={}", query_host, RESOLVER_ATTEMPTS);
        Self { query_host }
    }

    /// Host targets are looked up through the system resolver first; their
    /// addresses become the nameserver set.
    async fn nameservers(&self, target: &Target, port: u16, limit: Duration) -> Result<Vec<IpAddr>, String> {
        let host = match target {
            Target::Ip(ip) => return Ok(vec![*ip]),
            Target::Host(host) => host,
        };

        match tokio::time::timeout(limit, lookup_host((host.as_str(), port))).await {
            Ok(Ok(addrs)) => {
                let ips: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
                if ips.is_empty() {
                    Err(format!("nameserver {} has no addresses", host))
                } else {
                    Ok(ips)
                }
            }
            Ok(Err(e)) => Err(format!("nameserver {} did not resolve: {}", host, e)),
            Err(_) => Err(format!("nameserver {} lookup timed out", host)),
        }
    }

    fn resolver(&self, nameservers: &[IpAddr], port: u16, limit: Duration) -> TokioAsyncResolver {
        let group = NameServerConfigGroup::from_ips_clear(nameservers, port, true);
        let config = ResolverConfig::from_parts(None, Vec::new(), group);

        let mut opts = ResolverOpts::default();
        opts.timeout = limit;
        opts.attempts = RESOLVER_ATTEMPTS;
        opts.cache_size = 0;
        opts.use_hosts_file = false;

        TokioAsyncResolver::tokio(config, opts)
    }
}

#[async_trait]
impl Probe for DnsProbe {
    fn mode(&self) -> ProbeMode {
        ProbeMode::Dns
    }

    async fn probe(&self, target: &Target, port: u16, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();

        let nameservers = match self.nameservers(target, port, timeout).await {
            Ok(nameservers) => nameservers,
            Err(reason) => {
                log::trace!("[scan::dns] nameserver_unusable: target={} reason={}", target, reason);
                return ProbeOutcome::negative(target.clone(), reason);
            }
        };

        let resolver = self.resolver(&nameservers, port, timeout);

        // The resolver enforces `timeout` per attempt; the outer bound caps
        // the whole exchange including any TCP fallback.
        match tokio::time::timeout(timeout * 2, resolver.ipv4_lookup(self.query_host.as_str())).await {
            Ok(Ok(lookup)) => {
                let addrs: Vec<String> = lookup.iter().map(|record| record.0.to_string()).collect();
                log::trace!("[scan::dns] resolved: target={} port={} records={} duration={}ms",
                    target, port, addrs.len(), start.elapsed().as_millis());

                if addrs.is_empty() {
                    return ProbeOutcome::negative(target.clone(), "empty answer");
                }

                ProbeOutcome::new(target.clone(), RESPONDED, Classification::Positive)
                    .with_banner("resolver")
                    .with_extra(addrs.join(","))
            }
            Ok(Err(e)) => {
                log::trace!("[scan::dns] lookup_failed: target={} port={} duration={}ms error={}",
                    target, port, start.elapsed().as_millis(), e);
                ProbeOutcome::negative(target.clone(), e.to_string())
            }
            Err(_) => {
                log::trace!("[scan::dns] lookup_timeout: target={} port={} duration={}ms",
                    target, port, start.elapsed().as_millis());
                ProbeOutcome::negative(target.clone(), format!("query timed out after {}ms", timeout.as_millis()))
            }
        }
    }
}
