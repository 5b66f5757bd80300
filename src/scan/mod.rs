pub mod cdn;
pub mod dns;
pub mod http;
pub mod proxy;
pub mod tls;

pub use dns::DnsProbe;
pub use http::HttpProbe;
pub use proxy::ProxyProbe;
pub use tls::{SniProbe, SslProbe};

use crate::probe::Probe;
use crate::types::ProbeMode;
use eyre::Result;
use std::sync::Arc;

/// Builds the probe for `mode`. Called once per run, before any dispatch.
pub fn create_probe(mode: ProbeMode) -> Result<Arc<dyn Probe>> {
    log::debug!("[scan] create_probe: mode={}", mode);

    let probe: Arc<dyn Probe> = match mode {
        ProbeMode::Sni => Arc::new(SniProbe::new()?),
        ProbeMode::Ssl => Arc::new(SslProbe::new()?),
        ProbeMode::Proxy => Arc::new(ProxyProbe::new()),
        ProbeMode::Http | ProbeMode::Https | ProbeMode::Cdn => Arc::new(HttpProbe::new(mode)?),
        ProbeMode::Dns => Arc::new(DnsProbe::default()),
    };

    Ok(probe)
}

/// Innermost cause of an error chain, which is what a reader of a results
/// line cares about ("connection refused", "operation timed out").
pub(crate) fn describe_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut current = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}
