use std::process::{ExitCode, ExitStatus};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use ws90_exporter::config::{Args, ExporterConfig};
use ws90_exporter::{logging, Daemon};

/// Exit code for configuration and startup errors.
const CONFIG_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging is not up yet, so configuration problems go straight to stderr.
    let config = match ExporterConfig::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ws90-exporter: {}", e);
            return ExitCode::from(CONFIG_ERROR);
        }
    };

    if let Err(e) = logging::init(config.log_target, config.log_level) {
        eprintln!("ws90-exporter: {}", e);
        return ExitCode::from(CONFIG_ERROR);
    }

    info!("ws90-exporter v{}", env!("CARGO_PKG_VERSION"));

    match run(&config).await {
        Ok(status) if status.success() => {
            info!(%status, "rtl_433 exited");
            ExitCode::SUCCESS
        }
        Ok(status) => {
            error!(%status, "rtl_433 exited with an error");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &ExporterConfig) -> Result<ExitStatus> {
    let daemon = Daemon::build(config).await?;
    info!(addr = %daemon.local_addr()?, "Exporter started");
    daemon.run().await
}
