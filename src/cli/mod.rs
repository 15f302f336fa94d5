//! CLI command handling
//!
//! Applies command-line overrides to the configuration, runs the requested
//! command and prints its report.

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::Result;
use crate::testing::{self, print_result};

/// Dispatch a CLI command; returns whether every test passed
pub async fn dispatch(command: Commands, mut config: Config) -> Result<bool> {
    match command {
        Commands::Check {
            skip_build,
            executable,
            working_dir,
            json,
        } => {
            if skip_build {
                config.build.skip = true;
            }
            if let Some(executable) = executable {
                config.session.executable = executable;
            }
            if let Some(dir) = working_dir {
                config.session.working_dir = Some(dir);
            }

            let report = testing::run_suite(&config).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\n{}", "Checks:".cyan());
                for result in &report.results {
                    print_result(result);
                }
                if report.passed() {
                    println!("\n{}", "All checks passed".green().bold());
                } else {
                    println!(
                        "\n{}",
                        format!("{} of {} checks failed", report.failed_count(), report.results.len())
                            .red()
                            .bold()
                    );
                }
            }

            Ok(report.passed())
        }

        Commands::Build { source, output } => {
            if let Some(source) = source {
                config.build.source = source;
            }
            if let Some(output) = output {
                config.build.output = output;
            }
            config.build.skip = false;

            let working_dir = match &config.session.working_dir {
                Some(dir) => dir.clone(),
                None => std::env::current_dir()?,
            };
            if let Some(artifact) = testing::build_if_needed(&config, &working_dir).await? {
                println!("Built {}", artifact.display());
            }
            Ok(true)
        }

        Commands::Test { path, verbose } => {
            let result = testing::run_scenario(&path, &config, verbose).await?;
            if !result.passed {
                println!(
                    "\n{} {}\n",
                    "✗".red().bold(),
                    "Test Failed".red().bold()
                );
            }
            Ok(result.passed)
        }
    }
}
