use crate::config::RunConfig;
use crate::types::{Classification, NO_RESPONSE, ProbeOutcome, RunSummary};
use colored::{Color, Colorize};

const SEPARATOR_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Suppress NEGATIVE and ERROR lines; they are still counted.
    pub hide_negative: bool,
}

impl DisplayOptions {
    pub fn shows(&self, outcome: &ProbeOutcome) -> bool {
        !(self.hide_negative
            && matches!(outcome.classification, Classification::Negative | Classification::Error))
    }
}

/// `[progress/total] target | status | banner | extra`, uncolored.
pub fn format_outcome_line(progress: u64, total: u64, outcome: &ProbeOutcome) -> String {
    let mut line = format!(
        "[{}/{}] {} | {} | {} | {}",
        progress, total, outcome.target, outcome.status, outcome.banner, outcome.extra
    );
    if outcome.classification == Classification::Ignored {
        line.push_str(" [IGNORED]");
    }
    line
}

pub fn outcome_color(outcome: &ProbeOutcome) -> Color {
    match outcome.classification {
        Classification::Ignored => Color::Yellow,
        Classification::Error => Color::Magenta,
        _ if outcome.cdn => Color::Green,
        _ if outcome.status != NO_RESPONSE => Color::Cyan,
        _ => Color::Red,
    }
}

pub fn print_outcome(progress: u64, total: u64, outcome: &ProbeOutcome, options: &DisplayOptions) {
    if !options.shows(outcome) {
        return;
    }
    let line = format_outcome_line(progress, total, outcome);
    println!("{}", line.color(outcome_color(outcome)));
}

pub fn print_separator() {
    println!("{}", "─".repeat(SEPARATOR_WIDTH));
}

pub fn print_header(config: &RunConfig, total: u64) {
    println!("{} {}", "🎯 Probing:".bold(), config.spec.describe());
    println!(
        "   mode={} port={} concurrency={} timeout={:.1}s targets={}",
        config.mode,
        config.port,
        config.concurrency,
        config.timeout.as_secs_f64(),
        total
    );
    match &config.output {
        Some(path) => println!("   output={}", path.display()),
        None => println!("   output=(display only)"),
    }
    print_separator();
}

pub fn format_summary(summary: &RunSummary) -> String {
    if summary.cancelled {
        format!(
            "[!] Scan cancelled after {:.2}s. Completed {}/{} targets",
            summary.duration_secs, summary.progress, summary.total
        )
    } else {
        format!(
            "[✓] Scan finished in {:.2}s. Total targets: {}",
            summary.duration_secs, summary.total
        )
    }
}

pub fn format_counts(summary: &RunSummary) -> String {
    let mut counts = format!(
        "    positive={} ignored={} negative={} errors={}",
        summary.positive, summary.ignored, summary.negative, summary.errors
    );
    if summary.write_failures > 0 {
        counts.push_str(&format!(" write_failures={}", summary.write_failures));
    }
    counts
}

pub fn print_summary(summary: &RunSummary) {
    print_separator();
    let line = format_summary(summary);
    if summary.cancelled {
        println!("{}", line.yellow().bold());
    } else {
        println!("{}", line.green().bold());
    }
    println!("{}", format_counts(summary));
}
