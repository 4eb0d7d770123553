use clap::Parser;
use elevfill::Args;
use elevfill_dem::ElevationResolver;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the records.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    elevfill_metrics::describe_metrics();

    let args = Args::parse();

    let resolver = match args
        .load_config()
        .and_then(|config| ElevationResolver::from_config(&config).map_err(Into::into))
    {
        Ok(resolver) => resolver,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = resolver.cancel_token().clone();
    if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    match elevfill::run(&args, &resolver) {
        Ok(summary) => {
            let stats = resolver.cache().stats();
            info!(
                lines = summary.lines,
                filled = summary.report.filled,
                missing = summary.report.missing,
                failed = summary.report.failed,
                malformed = summary.malformed,
                tiles = stats.acquisitions,
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(e) if e.is_broken_pipe() => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
