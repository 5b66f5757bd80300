use eyre::{Result, WrapErr, eyre};
use log::LevelFilter;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "bulkprobe";
const LOG_FILE_NAME: &str = "bulkprobe.log";

/// Initialize logging to `log_file`, or the platform log file when unset.
///
/// The terminal carries the live result stream, so log records only ever go
/// to the file.
pub fn init_logging(log_file: Option<&Path>) -> Result<PathBuf> {
    let log_path = match log_file {
        Some(path) => path.to_path_buf(),
        None => get_log_file_path()?,
    };

    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .wrap_err_with(|| format!("Failed to open log file {}", log_path.display()))?;

    env_logger::Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .wrap_err("Logger already initialized")?;

    log::info!("Logging initialized to: {}", log_path.display());
    log::info!("Log level: {}", log_level);

    Ok(log_path)
}

/// Get the system-specific log file path
pub fn get_log_file_path() -> Result<PathBuf> {
    let log_dir = if cfg!(target_os = "macos") {
        // ~/Library/Logs/bulkprobe/
        dirs::home_dir()
            .ok_or_else(|| eyre!("Could not find home directory"))?
            .join("Library")
            .join("Logs")
            .join(APP_NAME)
    } else if cfg!(target_os = "linux") && nix::unistd::getuid().is_root() {
        PathBuf::from("/var/log").join(APP_NAME)
    } else {
        dirs::data_local_dir()
            .ok_or_else(|| eyre!("Could not find local data directory"))?
            .join(APP_NAME)
            .join("logs")
    };

    Ok(log_dir.join(LOG_FILE_NAME))
}
