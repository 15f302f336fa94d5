//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios.

use serde::Deserialize;
use std::path::PathBuf;

use crate::common::{Error, Result};

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Optional shell steps to run before the test
    pub setup: Option<Vec<SetupStep>>,
    /// Run the configured build step before starting the session
    #[serde(default)]
    pub build: bool,
    /// Overrides for how the child is launched
    #[serde(default)]
    pub target: TargetConfig,
    /// The sequence of test steps to execute
    pub steps: Vec<TestStep>,
}

/// A setup step that runs before the test
#[derive(Deserialize, Debug)]
pub struct SetupStep {
    /// Shell command to execute
    pub shell: String,
}

/// Launch overrides; unset fields fall back to the harness configuration
#[derive(Deserialize, Debug, Default)]
pub struct TargetConfig {
    /// Executable to launch, relative to the scenario file
    pub executable: Option<PathBuf>,
    /// Arguments to pass to the executable
    pub args: Option<Vec<String>>,
    /// Working directory, relative to the scenario file
    pub working_dir: Option<PathBuf>,
}

/// A single test step in the execution flow
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Check the startup banner
    ExpectBanner {
        /// Expected exact banner
        equals: String,
    },
    /// Send one command line
    Send {
        /// The command to send (e.g., "insert 1 abc abc@example.com")
        command: String,
    },
    /// Capture the next response and check it
    Expect {
        /// Expected substring
        contains: Option<String>,
        /// Expected exact response, ignoring trailing line breaks
        equals: Option<String>,
        /// Substring that must not appear
        not_contains: Option<String>,
    },
    /// Wait for the child to exit
    ExpectExit {
        /// Timeout in milliseconds (default: configured exit timeout)
        timeout_ms: Option<u64>,
        /// Expected exit code
        code: Option<i32>,
    },
    /// Read all remaining output until the child exits; must be last
    Drain {
        /// Expected substring in the remaining output
        contains: Option<String>,
    },
}

impl TestStep {
    /// Short label for progress output
    pub fn label(&self) -> String {
        match self {
            TestStep::ExpectBanner { .. } => "expect banner".to_string(),
            TestStep::Send { command } => format!("send '{command}'"),
            TestStep::Expect { .. } => "expect response".to_string(),
            TestStep::ExpectExit { .. } => "expect exit".to_string(),
            TestStep::Drain { .. } => "drain to exit".to_string(),
        }
    }
}

impl TestScenario {
    /// Parse and validate a scenario from YAML text
    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::Scenario(format!("Failed to parse test scenario: {e}")))?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Scenario(format!("'{}' has no steps", self.name)));
        }

        for (i, step) in self.steps.iter().enumerate() {
            let is_last = i + 1 == self.steps.len();
            match step {
                TestStep::Drain { .. } if !is_last => {
                    return Err(Error::Scenario(format!(
                        "Step {}: drain reads until the child exits and must be the last step",
                        i + 1
                    )));
                }
                TestStep::Expect {
                    contains: None,
                    equals: None,
                    not_contains: None,
                } => {
                    return Err(Error::Scenario(format!(
                        "Step {}: expect needs contains, equals or not_contains",
                        i + 1
                    )));
                }
                TestStep::Send { command } if command.contains(['\r', '\n']) => {
                    return Err(Error::Scenario(format!(
                        "Step {}: command must be a single line",
                        i + 1
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
