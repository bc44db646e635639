//! infrasync - lock-guarded infrastructure plan/apply and repository mirroring

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, fmt};

use infrasync_cli::cli::Cli;
use infrasync_cli::domain::error::classify;
use infrasync_cli::output::json::format_error;

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!("infrasync_cli={level},infrasync_common={level}"))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let json = cli.json;

    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            let (code, kind) = classify(&e);
            tracing::debug!(error = ?e, kind, "command failed");
            if json {
                match format_error(&format!("{e:#}"), kind) {
                    Ok(body) => println!("{body}"),
                    Err(_) => eprintln!("Error: {e:#}"),
                }
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(code)
        }
    }
}
