//! Server binary: parse flags, load configuration, run the engine
//! until interrupted.
//!
//! Exit codes: 0 clean shutdown, 1 fatal startup failure,
//! 2 configuration error.

use anyhow::Result;
use clap::Parser;
use palisade::app::App;
use palisade::config::Config;
use palisade::error::SiemError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "palisade")]
#[command(about = "Self-contained SIEM event-processing engine", version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "palisade.yaml")]
    config: PathBuf,

    /// Override the storage base directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    palisade::init_tracing();
    let cli = Cli::parse();

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(2);
        }
    };
    if let Some(data_dir) = cli.data_dir {
        config.storage.base_dir = data_dir;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.downcast_ref::<SiemError>()
                .map(|e| matches!(e, SiemError::Config(_)))
                .unwrap_or(false)
            {
                error!(error = %e, "configuration error");
                ExitCode::from(2)
            } else {
                error!(error = %e, "fatal startup failure");
                ExitCode::from(1)
            }
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let app = App::start(config).await?;
    info!("ready; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    app.shutdown().await;
    Ok(())
}
