mod cli;
mod commands;
mod error;

use crate::cli::Cli;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    commands::run(cli).await.map_err(|err| {
        tracing::debug!(error = ?err, "command failed");
        miette::Report::new((*err).clone())
    })
}

/// Logs go to stderr so page listings on stdout stay pipeable.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
