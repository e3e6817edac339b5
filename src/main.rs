//! Entry point for the secbootimg packager.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap` (usage errors exit with status 2).
//! 2. Initialize logging with `tracing-subscriber`.
//! 3. Pack the image, optionally verifying it afterwards.
//!
//! Runtime errors are reported as `ERROR: <detail>` with exit status 1.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use secbootimg::config::Config;
use secbootimg::image;
use secbootimg::packager::Packager;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(config: &Config) -> Result<()> {
    let report = Packager::new(config.pack_options()).run()?;

    if config.verify {
        image::verify(&report)?;
        tracing::info!("verified {}", report.output.display());
    }

    println!("Packed {}", report.output.display());
    for (key, p) in report.table.entries() {
        println!("  {key}: sector {} (+{} sectors)", p.start_sector, p.length_in_sectors);
    }
    Ok(())
}

fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing(&config.log_level);

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}
