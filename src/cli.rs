use crate::types::ProbeMode;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bulkprobe")]
#[command(about = "Bulk network reachability prober for hosts, CIDR ranges and target files")]
pub struct Cli {
    /// Targets: IP, CIDR block, hostname, comma/newline separated list, or a file of entries
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Probe to run against every target
    #[arg(short, long, value_enum, default_value_t = ProbeMode::Cdn)]
    pub mode: ProbeMode,

    /// Destination port (defaults per mode)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of concurrent workers (defaults per mode)
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Per-probe timeout in seconds (defaults per mode)
    #[arg(short, long)]
    pub timeout: Option<f64>,

    /// Write positive results to this file, truncating it first
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not print negative and error lines
    #[arg(long)]
    pub hide_negative: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Print the run summary as JSON when finished
    #[arg(long)]
    pub json: bool,

    /// Log file path (defaults to the platform log directory)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

pub fn parse() -> Cli {
    Cli::parse()
}
