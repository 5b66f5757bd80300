use eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;

use bulkprobe::{RunConfig, RunController, cli};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse();

    if let Err(e) = bulkprobe::init_logging(args.log_file.as_deref()) {
        eprintln!("Warning: Failed to initialize logging: {:#}", e);
    }

    // Divider to separate runs in the shared log file
    log::info!("================================================================================");
    log::info!("NEW PROBE SESSION STARTING");
    log::info!("================================================================================");

    if args.no_color {
        colored::control::set_override(false);
    }

    let config = RunConfig::from_cli(&args)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[main] interrupt_received: draining in-flight probes");
            eprintln!("\nInterrupted, waiting for in-flight probes to finish...");
            interrupt.cancel();
        }
    });

    let summary = RunController::new(config, cancel).execute().await?;

    if args.json {
        let json = serde_json::to_string(&summary).wrap_err("Failed to serialize run summary")?;
        println!("{}", json);
    }

    Ok(())
}
