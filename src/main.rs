//! REPL harness CLI
//!
//! Builds a REPL-style database prototype, drives it over stdin/stdout and
//! reports whether it starts, accepts input and shuts down correctly.

use std::path::PathBuf;

use clap::Parser;
use repl_harness::common::{config::Config, logging};
use repl_harness::{cli, commands::Commands};

#[derive(Parser)]
#[command(name = "repl-harness", about = "Integration-test harness for REPL database prototypes")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: ./harness.toml, then the user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level harness logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    let result = match config {
        Ok(config) => cli::dispatch(cli.command, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}
