use crate::config::RunConfig;
use crate::pretty;
use crate::probe::Probe;
use crate::scan;
use crate::scheduler::Scheduler;
use crate::sink::ResultSink;
use crate::target::{Target, TargetSource};
use crate::types::{ProbeOutcome, RunState, RunSummary};
use eyre::Result;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drives one run: count, open the sink, dispatch, summarize.
pub struct RunController {
    config: RunConfig,
    cancel: CancellationToken,
}

impl RunController {
    pub fn new(config: RunConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub async fn execute(&self) -> Result<RunSummary> {
        let probe = scan::create_probe(self.config.mode)?;
        self.execute_with(probe).await
    }

    /// Runs with an already constructed probe. Startup problems (invalid
    /// configuration, unwritable output) fail here before any target is
    /// dispatched.
    pub async fn execute_with(&self, probe: Arc<dyn Probe>) -> Result<RunSummary> {
        self.config.validate()?;

        let source = TargetSource::new(self.config.spec.clone());
        let census = source.census();
        log::info!("[runner] census: spec={} targets={} entries={} invalid={}",
            self.config.spec.describe(), census.targets, census.entries, census.invalid);

        let state = Arc::new(RunState::new(census.targets));
        let sink = Arc::new(ResultSink::create(
            self.config.output.as_deref(),
            Arc::clone(&state),
            self.config.display,
        )?);
        let scheduler = Scheduler::new(self.config.concurrency, self.cancel.clone())?;

        log::info!("[runner] execute: mode={} port={} concurrency={} timeout={}ms output={:?}",
            probe.mode(), self.config.port, self.config.concurrency,
            self.config.timeout.as_millis(), self.config.output);
        pretty::print_header(&self.config, census.targets);

        let port = self.config.port;
        let timeout = self.config.timeout;
        let work_sink = Arc::clone(&sink);
        let report = scheduler
            .run(&source, census.targets, move |target| {
                let probe = Arc::clone(&probe);
                let sink = Arc::clone(&work_sink);
                async move {
                    let outcome = probe_once(probe.as_ref(), target, port, timeout).await;
                    sink.record(&outcome).await;
                }
            })
            .await?;
        sink.finish().await?;

        let summary = state.summary(report.cancelled);
        log::info!("[runner] finished: total={} progress={} positive={} ignored={} negative={} errors={} persisted={} write_failures={} cancelled={} duration={:.3}s",
            summary.total, summary.progress, summary.positive, summary.ignored, summary.negative,
            summary.errors, sink.persisted(), summary.write_failures, summary.cancelled, summary.duration_secs);

        pretty::print_summary(&summary);
        Ok(summary)
    }
}

/// A panicking probe becomes an ERROR outcome so its target is still
/// counted exactly once.
async fn probe_once(probe: &dyn Probe, target: Target, port: u16, timeout: Duration) -> ProbeOutcome {
    let result = AssertUnwindSafe(probe.probe(&target, port, timeout))
        .catch_unwind()
        .await;

    match result {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            log::error!("[runner] probe_panicked: target={} port={} reason={}", target, port, reason);
            ProbeOutcome::error(target, format!("probe panicked: {}", reason))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
