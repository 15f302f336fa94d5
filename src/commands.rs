//! CLI command definitions
//!
//! Defines the clap commands for the harness CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Build the executable, then run the startup/insert/exit checks
    Check {
        /// Use the existing executable instead of building it
        #[arg(long)]
        skip_build: bool,

        /// Executable to launch (overrides the config file)
        #[arg(long)]
        executable: Option<PathBuf>,

        /// Working directory of the child (overrides the config file)
        #[arg(long)]
        working_dir: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Only run the build step
    Build {
        /// Source file to compile (overrides the config file)
        #[arg(long)]
        source: Option<PathBuf>,

        /// Output path of the executable (overrides the config file)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Execute a test scenario defined in a YAML file
    Test {
        /// Path to the YAML test scenario file
        path: PathBuf,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },
}
