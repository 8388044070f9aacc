//! ZCM CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use zcm::cli::{Cli, LogLevel};

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing; --debug overrides --log-level
    let directive = if cli.debug {
        LogLevel::Debug.directive()
    } else {
        cli.log_level.directive()
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    // Execute command
    cli.execute()
}
