pub mod cli;
pub mod config;
pub mod logging;
pub mod pretty;
pub mod probe;
pub mod runner;
pub mod scan;
pub mod scheduler;
pub mod sink;
pub mod target;
pub mod types;

// Re-export key types and functions at the crate root
pub use config::RunConfig;
pub use logging::{get_log_file_path, init_logging};
pub use probe::Probe;
pub use runner::RunController;
pub use scan::create_probe;
pub use scheduler::{Scheduler, SchedulerReport};
pub use sink::ResultSink;
pub use target::{Target, TargetSource, TargetSpec};
pub use types::{Classification, ProbeMode, ProbeOutcome, RunState, RunSummary};
