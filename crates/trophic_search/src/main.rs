use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use trophic_search::app::{block_on_search, run_search};
use trophic_search::cli::Cli;
use trophic_search::config::ConfigLoader;
use trophic_search::logging::init_logging;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    ConfigLoader::validate(&config).context("invalid configuration")?;
    init_logging(&config.logging)?;

    block_on_search(config.worker_count(), !config.drain_on_shutdown, run_search(&config))?;
    Ok(())
}
