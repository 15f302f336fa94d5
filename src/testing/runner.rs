//! Test runner implementation
//!
//! Runs either the built-in startup/shutdown suite or a YAML scenario. Every
//! test owns a fresh [`Session`]; a failed check ends that test only, while
//! build and spawn errors abort the whole run.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use colored::Colorize;
use serde::Serialize;
use tokio::process::Command as TokioCommand;

use crate::assertions::{self, Outcome};
use crate::build::BuildStep;
use crate::common::config::Config;
use crate::common::paths::resolve;
use crate::common::{truncate_for_display, Error, Result};
use crate::session::{Command, Session, SessionOptions, SessionState};

use super::config::{TestScenario, TestStep};

/// Row inserted by the built-in insert check
const SAMPLE_ROW: (i64, &str, &str) = (1, "abc", "abc@example.com");

/// Result of a test run
#[derive(Debug, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
    /// State of the child when the test finished
    pub final_state: SessionState,
    pub exit_code: Option<i32>,
    /// Child stderr, kept only for failed tests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl TestResult {
    fn not_started(name: &str, steps_total: usize, error: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            steps_run: 0,
            steps_total,
            error: Some(error),
            final_state: SessionState::NotStarted,
            exit_code: None,
            stderr: None,
        }
    }
}

/// Results of the built-in suite
#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub results: Vec<TestResult>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }
}

/// Built-in checks, each run against its own session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCheck {
    Welcome,
    Insert,
    Exit,
}

impl BuiltinCheck {
    pub const ALL: [BuiltinCheck; 3] = [BuiltinCheck::Welcome, BuiltinCheck::Insert, BuiltinCheck::Exit];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinCheck::Welcome => "welcome",
            BuiltinCheck::Insert => "insert",
            BuiltinCheck::Exit => "exit",
        }
    }

    async fn run(self, session: &mut Session) -> Result<Outcome> {
        match self {
            BuiltinCheck::Welcome => Ok(assertions::welcome(session)),
            BuiltinCheck::Insert => {
                let (id, username, email) = SAMPLE_ROW;
                assertions::insert_accepted(session, id, username, email).await
            }
            BuiltinCheck::Exit => assertions::exit(session).await,
        }
    }
}

/// Build the executable under test unless the configuration skips it
pub async fn build_if_needed(config: &Config, working_dir: &Path) -> Result<Option<PathBuf>> {
    if config.build.skip {
        tracing::debug!("Build skipped by configuration");
        return Ok(None);
    }
    let step = BuildStep::from_config(&config.build, working_dir)?;
    step.run().await.map(Some)
}

/// Build, then run every built-in check in isolation
pub async fn run_suite(config: &Config) -> Result<SuiteReport> {
    let options = SessionOptions::from_config(config);
    let working_dir = match &options.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    build_if_needed(config, &working_dir).await?;

    let mut results = Vec::with_capacity(BuiltinCheck::ALL.len());
    for check in BuiltinCheck::ALL {
        results.push(run_check(check, options.clone()).await?);
    }
    Ok(SuiteReport { results })
}

/// Run one built-in check in a fresh session
///
/// Returns `Err` only for errors that must abort the run.
pub async fn run_check(check: BuiltinCheck, options: SessionOptions) -> Result<TestResult> {
    let name = check.name();
    tracing::info!(check = name, "Running check");

    let mut session = match Session::start(options).await {
        Ok(session) => session,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => return Ok(TestResult::not_started(name, 1, e.to_string())),
    };

    let result = check.run(&mut session).await;
    let (passed, error) = match result {
        Ok(outcome) if outcome.passed() => (true, None),
        Ok(outcome) => (false, Some(outcome.to_string())),
        Err(e) => (false, Some(e.to_string())),
    };

    Ok(finish(&mut session, name, passed, 1, 1, error).await)
}

/// Terminate the session and record how the test ended
async fn finish(
    session: &mut Session,
    name: &str,
    passed: bool,
    steps_run: usize,
    steps_total: usize,
    error: Option<String>,
) -> TestResult {
    if let Err(e) = session.terminate().await {
        tracing::warn!(error = %e, "Failed to terminate child");
    }
    let stderr = session.stderr_output();

    TestResult {
        name: name.to_string(),
        passed,
        steps_run,
        steps_total,
        error,
        final_state: session.state(),
        exit_code: session.exit_status().and_then(|s| s.code()),
        stderr: (!passed && !stderr.trim().is_empty()).then_some(stderr),
    }
}

/// Print one suite result line, with diagnostics for failures
pub fn print_result(result: &TestResult) {
    if result.passed {
        println!("  {} {}", "✓".green(), result.name);
        return;
    }

    println!("  {} {}", "✗".red(), result.name.bold());
    if let Some(error) = &result.error {
        println!("    {}", error);
    }
    if let Some(stderr) = &result.stderr {
        println!("    {} {}", "stderr:".dimmed(), truncate_for_display(stderr.trim(), 500).dimmed());
    }
}

/// Run a test scenario from a YAML file
pub async fn run_scenario(path: &Path, config: &Config, verbose: bool) -> Result<TestResult> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    let scenario = TestScenario::parse(&content)?;
    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let scenario_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .canonicalize()?;
    let scenario_dir = scenario_dir.as_path();
    let mut options = SessionOptions::from_config(config);
    if let Some(executable) = &scenario.target.executable {
        options.executable = resolve(scenario_dir, executable);
    }
    if let Some(args) = &scenario.target.args {
        options.args = args.clone();
    }
    if let Some(dir) = &scenario.target.working_dir {
        options.working_dir = Some(resolve(scenario_dir, dir));
    }
    let working_dir = options
        .working_dir
        .clone()
        .unwrap_or_else(|| scenario_dir.to_path_buf());
    options.working_dir = Some(working_dir.clone());

    // Setup steps
    if let Some(setup_steps) = &scenario.setup {
        println!("\n{}", "Setup:".cyan());
        for step in setup_steps {
            if verbose {
                println!("  $ {}", step.shell.dimmed());
            }

            let status = TokioCommand::new("sh")
                .arg("-c")
                .arg(&step.shell)
                .current_dir(&working_dir)
                .stdin(Stdio::null())
                .stdout(if verbose { Stdio::inherit() } else { Stdio::null() })
                .stderr(if verbose { Stdio::inherit() } else { Stdio::null() })
                .status()
                .await
                .map_err(|e| Error::Config(format!("Setup command failed to execute: {e}")))?;

            if !status.success() {
                return Ok(TestResult::not_started(
                    &scenario.name,
                    steps_total,
                    format!(
                        "Setup command '{}' failed with exit code {:?}",
                        step.shell,
                        status.code()
                    ),
                ));
            }
            println!("  {} {}", "✓".green(), step.shell.dimmed());
        }
    }

    if scenario.build {
        let step = BuildStep::from_config(&config.build, &working_dir)?;
        let artifact = step.run().await?;
        println!("  {} built {}", "✓".green(), artifact.display().to_string().dimmed());
    }

    println!("\n{}", "Starting session...".cyan());
    let mut session = Session::start(options).await?;
    if verbose {
        println!(
            "  Executable: {}",
            session.executable().display().to_string().dimmed()
        );
    }
    println!("  {} Session started (pid {:?})", "✓".green(), session.pid());

    println!("\n{}", "Steps:".cyan());
    for (i, step) in scenario.steps.into_iter().enumerate() {
        let step_num = i + 1;
        let label = step.label();

        if let TestStep::Drain { contains } = step {
            // Validation guarantees this is the last step
            return drain_step(session, &scenario.name, contains, step_num, steps_total).await;
        }

        let failure = match execute_step(&mut session, &step, verbose).await {
            Ok(None) => None,
            Ok(Some(outcome)) if outcome.passed() => None,
            Ok(Some(outcome)) => Some(outcome.to_string()),
            Err(e) => Some(e.to_string()),
        };

        if let Some(message) = failure {
            println!("  {} Step {}: {}", "✗".red(), step_num, message);
            let result = finish(
                &mut session,
                &scenario.name,
                false,
                step_num,
                steps_total,
                Some(message),
            )
            .await;
            if let Some(stderr) = &result.stderr {
                println!("    {} {}", "stderr:".dimmed(), stderr.trim().dimmed());
            }
            return Ok(result);
        }

        println!("  {} Step {}: {}", "✓".green(), step_num, label.dimmed());
    }

    let result = finish(&mut session, &scenario.name, true, steps_total, steps_total, None).await;
    println!("\n{} {}\n", "✓".green().bold(), "Test Passed".green().bold());
    Ok(result)
}

/// Execute a single non-final step; `None` means nothing was checked
async fn execute_step(
    session: &mut Session,
    step: &TestStep,
    verbose: bool,
) -> Result<Option<Outcome>> {
    match step {
        TestStep::ExpectBanner { equals } => {
            Ok(Some(assertions::equals("banner", session.banner().text(), equals)))
        }
        TestStep::Send { command } => {
            session.send(&Command::new(command.as_str())?).await?;
            Ok(None)
        }
        TestStep::Expect {
            contains,
            equals,
            not_contains,
        } => {
            let response = session.capture().await?;
            if verbose {
                println!("    {}", response.text().trim_end().dimmed());
            }
            let text = response.text();
            let mut checked = Vec::new();
            if let Some(expected) = contains {
                checked.push(assertions::contains("expect", text, expected));
            }
            if let Some(expected) = equals {
                let trimmed = text.trim_end_matches(['\r', '\n']);
                checked.push(assertions::equals("expect", trimmed, expected));
            }
            if let Some(unexpected) = not_contains {
                checked.push(assertions::not_contains("expect", text, unexpected));
            }
            // First failure wins; otherwise report the last passing check
            let failed = checked.iter().position(|o| !o.passed());
            Ok(match failed {
                Some(index) => Some(checked.swap_remove(index)),
                None => checked.pop(),
            })
        }
        TestStep::ExpectExit { timeout_ms, code } => {
            let limit = timeout_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| session.timeouts().exit());
            let status = session.wait_exit(limit).await?;
            match code {
                Some(expected) => {
                    let actual = status
                        .code()
                        .map_or_else(|| status.to_string(), |c| c.to_string());
                    Ok(Some(assertions::equals("exit code", &actual, &expected.to_string())))
                }
                None => Ok(None),
            }
        }
        TestStep::Drain { .. } => Err(Error::Scenario(
            "drain must be the last step".to_string(),
        )),
    }
}

async fn drain_step(
    session: Session,
    name: &str,
    contains: Option<String>,
    step_num: usize,
    steps_total: usize,
) -> Result<TestResult> {
    let transcript = match session.drain().await {
        Ok(transcript) => transcript,
        Err(e) => {
            println!("  {} Step {}: {}", "✗".red(), step_num, e);
            return Ok(TestResult {
                name: name.to_string(),
                passed: false,
                steps_run: step_num,
                steps_total,
                error: Some(e.to_string()),
                final_state: SessionState::Terminated,
                exit_code: None,
                stderr: None,
            });
        }
    };

    let outcome = contains
        .as_deref()
        .map(|expected| assertions::contains("drain", &transcript.stdout, expected));
    let passed = outcome.as_ref().map_or(true, Outcome::passed);

    if passed {
        println!("  {} Step {}: drain to exit", "✓".green(), step_num);
        println!("\n{} {}\n", "✓".green().bold(), "Test Passed".green().bold());
    } else if let Some(outcome) = &outcome {
        println!("  {} Step {}: {}", "✗".red(), step_num, outcome);
    }

    Ok(TestResult {
        name: name.to_string(),
        passed,
        steps_run: step_num,
        steps_total,
        error: outcome.filter(|o| !o.passed()).map(|o| o.to_string()),
        final_state: SessionState::Terminated,
        exit_code: transcript.exit_code(),
        stderr: (!passed && !transcript.stderr.trim().is_empty()).then_some(transcript.stderr),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_checks_in_protocol_order() {
        let names: Vec<_> = BuiltinCheck::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["welcome", "insert", "exit"]);
    }

    #[test]
    fn test_suite_report_counts_failures() {
        let report = SuiteReport {
            results: vec![
                TestResult::not_started("welcome", 1, "boom".to_string()),
                TestResult {
                    name: "exit".to_string(),
                    passed: true,
                    steps_run: 1,
                    steps_total: 1,
                    error: None,
                    final_state: SessionState::Terminated,
                    exit_code: Some(0),
                    stderr: None,
                },
            ],
        };
        assert!(!report.passed());
        assert_eq!(report.failed_count(), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["final_state"], "not_started");
        assert_eq!(json["results"][1]["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_skipped_build_returns_none() {
        let mut config = Config::default();
        config.build.skip = true;
        let dir = std::env::temp_dir();
        assert!(build_if_needed(&config, &dir).await.unwrap().is_none());
    }
}
