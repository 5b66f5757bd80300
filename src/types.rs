use crate::target::Target;
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Status recorded when a target never answered.
pub const NO_RESPONSE: u16 = 0;
/// Status recorded by non-HTTP probes whose handshake or query completed.
pub const RESPONDED: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ProbeMode {
    /// TLS handshake naming the target as server name, certificate verified
    Sni,
    /// TLS handshake without certificate verification
    Ssl,
    /// HTTP CONNECT tunnel check
    Proxy,
    /// Plain HTTP GET
    Http,
    /// HTTPS GET
    Https,
    /// CDN edge sweep: HTTPS on 443, HTTP elsewhere, CF-RAY recorded
    Cdn,
    /// Open resolver check
    Dns,
}

impl ProbeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMode::Sni => "sni",
            ProbeMode::Ssl => "ssl",
            ProbeMode::Proxy => "proxy",
            ProbeMode::Http => "http",
            ProbeMode::Https => "https",
            ProbeMode::Cdn => "cdn",
            ProbeMode::Dns => "dns",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ProbeMode::Sni | ProbeMode::Ssl | ProbeMode::Https | ProbeMode::Cdn => 443,
            ProbeMode::Http => 80,
            ProbeMode::Proxy => 8080,
            ProbeMode::Dns => 53,
        }
    }

    pub fn default_concurrency(&self) -> usize {
        match self {
            ProbeMode::Dns => 50,
            _ => 100,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            ProbeMode::Cdn => Duration::from_millis(1500),
            _ => Duration::from_secs(3),
        }
    }
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Positive,
    Ignored,
    Negative,
    Error,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Positive => "positive",
            Classification::Ignored => "ignored",
            Classification::Negative => "negative",
            Classification::Error => "error",
        }
    }
}

/// Result of probing one target. Lives for a single worker iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub target: Target,
    pub status: u16,
    pub banner: String,
    pub extra: String,
    pub classification: Classification,
    /// Display hint only; never changes what gets persisted.
    pub cdn: bool,
}

impl ProbeOutcome {
    pub fn new(target: Target, status: u16, classification: Classification) -> Self {
        Self {
            target,
            status,
            banner: "-".to_string(),
            extra: "-".to_string(),
            classification,
            cdn: false,
        }
    }

    pub fn negative(target: Target, reason: impl fmt::Display) -> Self {
        Self::new(target, NO_RESPONSE, Classification::Negative)
            .with_banner("no-response")
            .with_extra(reason.to_string())
    }

    pub fn error(target: Target, reason: impl fmt::Display) -> Self {
        Self::new(target, NO_RESPONSE, Classification::Error)
            .with_banner("error")
            .with_extra(reason.to_string())
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    pub fn with_cdn(mut self, cdn: bool) -> Self {
        self.cdn = cdn;
        self
    }

    pub fn is_persistable(&self) -> bool {
        self.classification == Classification::Positive
    }

    /// `<target>\t<status>\t<banner>\t<extra>\n`, with embedded control
    /// characters flattened so one outcome is always one line.
    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\n",
            sanitize_field(&self.target.to_string()),
            self.status,
            sanitize_field(&self.banner),
            sanitize_field(&self.extra),
        )
    }
}

fn sanitize_field(value: &str) -> String {
    let value: String = value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let value = value.trim();
    if value.is_empty() { "-".to_string() } else { value.to_string() }
}

/// Counters shared by every worker of one run.
#[derive(Debug)]
pub struct RunState {
    total: u64,
    progress: AtomicU64,
    positive: AtomicU64,
    ignored: AtomicU64,
    negative: AtomicU64,
    errors: AtomicU64,
    write_failures: AtomicU64,
    started: Instant,
}

impl RunState {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            progress: AtomicU64::new(0),
            positive: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            negative: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Counts one finished probe and returns the progress value it produced.
    pub fn complete(&self, classification: Classification) -> u64 {
        let bucket = match classification {
            Classification::Positive => &self.positive,
            Classification::Ignored => &self.ignored,
            Classification::Negative => &self.negative,
            Classification::Error => &self.errors,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        self.progress.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self, cancelled: bool) -> RunSummary {
        let duration = self.elapsed();
        RunSummary {
            total: self.total,
            progress: self.progress(),
            positive: self.positive.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            negative: self.negative.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            duration_secs: duration.as_secs_f64(),
            cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: u64,
    pub progress: u64,
    pub positive: u64,
    pub ignored: u64,
    pub negative: u64,
    pub errors: u64,
    pub write_failures: u64,
    pub duration_secs: f64,
    pub cancelled: bool,
}
