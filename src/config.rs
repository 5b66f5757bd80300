use crate::cli::Cli;
use crate::pretty::DisplayOptions;
use crate::scheduler::MAX_CONCURRENCY;
use crate::target::TargetSpec;
use crate::types::ProbeMode;
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use std::time::Duration;

/// Everything one run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub spec: TargetSpec,
    pub mode: ProbeMode,
    pub port: u16,
    pub concurrency: usize,
    pub timeout: Duration,
    pub output: Option<PathBuf>,
    pub display: DisplayOptions,
}

impl RunConfig {
    /// Mode defaults for port, concurrency and timeout.
    pub fn new(spec: TargetSpec, mode: ProbeMode) -> Self {
        Self {
            spec,
            mode,
            port: mode.default_port(),
            concurrency: mode.default_concurrency(),
            timeout: mode.default_timeout(),
            output: None,
            display: DisplayOptions::default(),
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = Self::new(TargetSpec::from_args(&cli.targets), cli.mode);

        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(concurrency) = cli.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(secs) = cli.timeout {
            if secs.is_nan() || secs <= 0.0 {
                eyre::bail!("Timeout must be positive, got {}", secs);
            }
            config.timeout = Duration::try_from_secs_f64(secs)
                .wrap_err_with(|| format!("Invalid timeout {}", secs))?;
        }
        config.output = cli.output.clone();
        config.display = DisplayOptions {
            hide_negative: cli.hide_negative,
        };

        config.validate()?;

        log::debug!("[config] from_cli: spec={} mode={} port={} concurrency={} timeout={}ms output={:?}",
            config.spec.describe(), config.mode, config.port, config.concurrency,
            config.timeout.as_millis(), config.output);

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            eyre::bail!("Concurrency must be at least 1");
        }
        if self.concurrency > MAX_CONCURRENCY {
            eyre::bail!("Concurrency {} exceeds the maximum of {}", self.concurrency, MAX_CONCURRENCY);
        }
        if self.timeout.is_zero() {
            eyre::bail!("Timeout must be positive");
        }
        if self.port == 0 {
            eyre::bail!("Port must be between 1 and 65535");
        }
        Ok(())
    }
}
