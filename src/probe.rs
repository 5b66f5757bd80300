use async_trait::async_trait;
use std::time::Duration;

use crate::target::Target;
use crate::types::{ProbeMode, ProbeOutcome};

/// One protocol check, selected once per run and shared by every worker.
///
/// Implementations never fail: connection, handshake and protocol errors are
/// folded into the returned outcome.
#[async_trait]
pub trait Probe: Send + Sync {
    fn mode(&self) -> ProbeMode;

    async fn probe(&self, target: &Target, port: u16, timeout: Duration) -> ProbeOutcome;
}
