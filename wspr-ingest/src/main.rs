use anyhow::Result;
use clap::Parser;

use wspr_ingest::app::{self, LOG_DIR, LOG_PREFIX};
use wspr_ingest::cli::{Cli, Commands};
use wspr_ingest::config::{FleetConfig, LoggingConfig};
use wspr_ingest::logging::init_logging;
use wspr_ingest::module::recorder::CommandRecorder;

fn log_failure<T>(result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Record(args) => {
            let logging = LoggingConfig {
                quiet: args.quiet,
                ..LoggingConfig::default()
            };
            let _logging_guard = init_logging(LOG_DIR, LOG_PREFIX, &logging)?;

            let recorder = CommandRecorder::new(&args.recorder);
            log_failure(app::run_record(&args, &recorder).await)?;
        }
        Commands::Decode(args) => {
            let config = FleetConfig::load(&args.config)?;
            let _logging_guard = init_logging(LOG_DIR, LOG_PREFIX, &config.logging)?;

            tracing::info!("wspr-ingest {} starting", env!("CARGO_PKG_VERSION"));
            tracing::info!("Configuration: {}", args.config.display());
            log_failure(app::run_decode(&args, config).await)?;
        }
    }

    Ok(())
}
