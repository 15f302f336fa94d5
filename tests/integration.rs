//! End-to-end integration tests for the REPL harness
//!
//! These tests drive the `mock_repl` binary, which speaks the same protocol
//! as the database prototype, through real pipes:
//! 1. Starting a session and checking the banner handshake
//! 2. Sending commands and capturing bounded responses
//! 3. Shutting down via `.exit`, drain, or forced termination

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use repl_harness::assertions;
use repl_harness::common::config::{Config, Timeouts};
use repl_harness::session::{CaptureEnd, Command, Session, SessionOptions, SessionState};
use repl_harness::testing::{self, BuiltinCheck};
use repl_harness::Error;

/// Path to the mock REPL built alongside the tests
fn mock_repl() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mock_repl"))
}

/// Short timeouts so failure paths finish quickly
fn fast_timeouts() -> Timeouts {
    Timeouts {
        readiness_ms: 5_000,
        response_ms: 500,
        exit_ms: 2_000,
    }
}

fn mock_options(args: &[&str]) -> SessionOptions {
    SessionOptions::new(mock_repl())
        .args(args.iter().copied())
        .timeouts(fast_timeouts())
}

async fn start_mock(args: &[&str]) -> Session {
    Session::start(mock_options(args))
        .await
        .expect("Failed to start mock_repl")
}

fn mock_config(args: &[&str]) -> Config {
    let mut config = Config::default();
    config.build.skip = true;
    config.session.executable = mock_repl();
    config.session.args = args.iter().map(|a| a.to_string()).collect();
    config.timeouts = fast_timeouts();
    config
}

// ============== Session lifecycle ==============

#[tokio::test]
async fn test_startup_then_exit_scenario() {
    repl_harness::common::logging::init_test();
    let mut session = start_mock(&[]).await;
    assert_eq!(session.state(), SessionState::Running);
    assert!(session.pid().is_some());

    // First response is exactly the banner
    assert_eq!(session.banner().text(), "Welcome to sqlite");
    assert!(assertions::welcome(&session).passed());

    session.send(&Command::new(".exit").unwrap()).await.unwrap();
    let response = session.capture().await.unwrap();
    assert!(response.contains("byeee"), "got {:?}", response.text());
    assert!(response.reached_eof());

    let status = session.wait_exit(Duration::from_secs(2)).await.unwrap();
    assert!(status.success());
    assert_eq!(session.state(), SessionState::Terminated);
}

#[tokio::test]
async fn test_exit_assertion_reaches_terminated() {
    let mut session = start_mock(&[]).await;
    let started = Instant::now();

    let outcome = assertions::exit(&mut session).await.unwrap();

    assert!(outcome.passed(), "{outcome}");
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(session.exit_status().and_then(|s| s.code()), Some(0));
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let mut session = start_mock(&[]).await;

    let first = session.terminate().await.unwrap();
    assert_eq!(session.state(), SessionState::Terminated);

    let second = session.terminate().await.unwrap();
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(first, second);
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminate_escalates_when_child_ignores_eof() {
    let mut session = start_mock(&["--ignore-eof"]).await;

    let started = Instant::now();
    let status = session.terminate().await.unwrap();

    assert!(!status.success());
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_send_after_exit_is_rejected() {
    let mut session = start_mock(&[]).await;
    assert!(assertions::exit(&mut session).await.unwrap().passed());

    let err = session
        .send(&Command::new("select").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionTerminated(_)), "got {err}");

    // Output already reached end-of-stream, so another capture is an error too
    assert!(matches!(
        session.capture().await,
        Err(Error::SessionTerminated(_))
    ));
}

// ============== Readiness and timeouts ==============

#[tokio::test]
async fn test_missing_executable_is_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let options = SessionOptions::new("./does-not-exist").working_dir(dir.path());

    let err = Session::start(options).await.unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }), "got {err}");
    assert!(err.is_fatal());
}

#[cfg(unix)]
#[tokio::test]
async fn test_exit_before_banner_is_startup_error() {
    let err = Session::start(SessionOptions::new("true").timeouts(fast_timeouts()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExitedDuringStartup { .. }), "got {err}");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_missing_banner_times_out() {
    let timeouts = Timeouts {
        readiness_ms: 300,
        ..fast_timeouts()
    };
    let options = mock_options(&["--no-banner"]).timeouts(timeouts);

    let err = Session::start(options).await.unwrap_err();
    assert!(matches!(err, Error::ReadinessTimeout(300)), "got {err}");
}

#[tokio::test]
async fn test_unanswered_command_times_out() {
    let mut session = start_mock(&["--stall-after-banner"]).await;

    session.send(&Command::new("select").unwrap()).await.unwrap();
    let err = session.capture().await.unwrap_err();

    assert!(matches!(err, Error::ResponseTimeout(500)), "got {err}");
    assert_eq!(session.state(), SessionState::Running);
    session.terminate().await.unwrap();
}

#[tokio::test]
async fn test_late_output_is_not_attributed_to_next_command() {
    // Answers arrive after 1s, twice the response timeout
    let mut session = start_mock(&["--delay-ms", "1000"]).await;

    let err = session
        .exchange(&Command::new("select").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ResponseTimeout(500)), "got {err}");
    assert!(session.out_of_sync().is_some());

    // Give the late answer time to arrive before trying again
    tokio::time::sleep(Duration::from_millis(800)).await;

    let err = session
        .send(&Command::new("bogus").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OutOfSync(_)), "got {err}");
    assert!(matches!(session.capture().await, Err(Error::OutOfSync(_))));
    assert!(!err.is_fatal());

    session.terminate().await.unwrap();
    assert_eq!(session.state(), SessionState::Terminated);
}

#[tokio::test]
async fn test_banner_without_prompt_starts_out_of_sync() {
    let timeouts = Timeouts {
        readiness_ms: 300,
        ..fast_timeouts()
    };
    let mut session = Session::start(mock_options(&["--no-prompt"]).timeouts(timeouts))
        .await
        .unwrap();

    assert!(assertions::welcome(&session).passed());
    assert!(session.out_of_sync().unwrap().contains("no prompt"));

    let err = assertions::exit(&mut session).await.unwrap_err();
    assert!(matches!(err, Error::OutOfSync(_)), "got {err}");
    session.terminate().await.unwrap();
}

#[tokio::test]
async fn test_missing_prompt_fails_later_checks_only() {
    let mut config = mock_config(&["--no-prompt"]);
    config.timeouts.readiness_ms = 300;

    let report = testing::run_suite(&config).await.unwrap();
    let passed: Vec<_> = report.results.iter().map(|r| (r.name.as_str(), r.passed)).collect();
    assert_eq!(passed, [("welcome", true), ("insert", false), ("exit", false)]);
}

// ============== Protocol round-trips ==============

#[tokio::test]
async fn test_insert_then_select_round_trip() {
    let mut session = start_mock(&[]).await;

    let outcome = assertions::insert_accepted(&mut session, 1, "abc", "abc@example.com")
        .await
        .unwrap();
    assert!(outcome.passed(), "{outcome}");

    // The probe inside insert_accepted already ran one select; this one must
    // only contain its own output.
    let response = session
        .exchange(&Command::new("select").unwrap())
        .await
        .unwrap();
    assert_eq!(response.end(), CaptureEnd::Delimiter);
    assert_eq!(response.text(), "(1, abc, abc@example.com)\n1 rows returned\n");
}

#[tokio::test]
async fn test_each_response_belongs_to_its_command() {
    let mut session = start_mock(&[]).await;

    let first = session
        .exchange(&Command::new("bogus").unwrap())
        .await
        .unwrap();
    assert_eq!(first.text(), "Unrecognized keyword at the beginning\n");

    let second = session
        .exchange(&Command::new(".help").unwrap())
        .await
        .unwrap();
    assert_eq!(second.text(), "Unrecognized command\n");
    assert!(!second.contains("keyword"));
}

#[tokio::test]
async fn test_crash_on_insert_is_failed_outcome() {
    let mut session = start_mock(&["--crash-on-insert"]).await;

    let outcome = assertions::insert_accepted(&mut session, 1, "abc", "abc@example.com")
        .await
        .unwrap();

    assert!(!outcome.passed());
    assert!(outcome.to_string().contains("closed its output"));
    session.terminate().await.unwrap();
    assert_eq!(session.exit_status().and_then(|s| s.code()), Some(139));
}

#[tokio::test]
async fn test_wrong_banner_fails_welcome() {
    let session = start_mock(&["--banner", "welcome to goSQLite"]).await;

    let outcome = assertions::welcome(&session);
    assert!(!outcome.passed());
    assert_eq!(outcome.expected, "Welcome to sqlite");
    assert_eq!(outcome.actual, "welcome to goSQLite");
}

#[tokio::test]
async fn test_output_after_banner_fails_welcome() {
    let session = start_mock(&["--banner", "Welcome to sqlite\nextra"]).await;

    assert_eq!(session.banner().text(), "Welcome to sqlite");
    assert_eq!(session.startup_output(), "extra\n");

    let outcome = assertions::welcome(&session);
    assert!(!outcome.passed());
    assert_eq!(outcome.actual, "Welcome to sqlite\nextra\n");
    assert!(outcome.to_string().contains("unexpected output after the banner"));
}

#[tokio::test]
async fn test_lingering_child_fails_exit_check() {
    let mut session = start_mock(&["--linger-after-exit"]).await;

    let outcome = assertions::exit(&mut session).await.unwrap();

    assert!(!outcome.passed());
    assert!(outcome.to_string().contains("still running"));
    session.terminate().await.unwrap();
    assert_eq!(session.state(), SessionState::Terminated);
}

#[tokio::test]
async fn test_clean_exit_can_be_required() {
    let mut protocol = Config::default().protocol;
    protocol.require_clean_exit = true;
    let options = mock_options(&["--exit-code", "3"]).protocol(protocol);
    let mut session = Session::start(options).await.unwrap();

    let outcome = assertions::exit(&mut session).await.unwrap();

    assert!(!outcome.passed());
    assert!(outcome.to_string().contains("exited with"));
}

// ============== Drain-to-exit ==============

#[tokio::test]
async fn test_drain_collects_remaining_output_and_stderr() {
    let mut session = start_mock(&["--stderr-noise"]).await;
    session.send(&Command::new("select").unwrap()).await.unwrap();

    let transcript = session.drain().await.unwrap();

    assert!(transcript.stdout.starts_with("0 rows returned\n"));
    assert!(transcript.stderr.contains("mock_repl: got \"select\""));
    assert_eq!(transcript.exit_code(), Some(0));
}

#[tokio::test]
async fn test_drain_after_exit_command() {
    let mut session = start_mock(&[]).await;
    session.send(&Command::new(".exit").unwrap()).await.unwrap();

    let transcript = session.drain().await.unwrap();
    assert_eq!(transcript.stdout, "byeee\n");
    assert!(transcript.status.success());
}

// ============== Runners ==============

#[tokio::test]
async fn test_builtin_suite_passes_against_mock() {
    let report = testing::run_suite(&mock_config(&[])).await.unwrap();

    assert!(report.passed(), "{report:?}");
    assert_eq!(report.results.len(), 3);
    for result in &report.results {
        assert_eq!(result.final_state, SessionState::Terminated);
    }
}

#[tokio::test]
async fn test_suite_checks_are_isolated() {
    let report = testing::run_suite(&mock_config(&["--crash-on-insert", "--stderr-noise"]))
        .await
        .unwrap();

    let by_name = |name: &str| report.results.iter().find(|r| r.name == name).unwrap();
    assert!(by_name("welcome").passed);
    assert!(!by_name("insert").passed);
    assert!(by_name("exit").passed);
    assert_eq!(report.failed_count(), 1);

    let insert = by_name("insert");
    assert!(insert.stderr.as_deref().unwrap_or("").contains("simulated crash"));
}

#[tokio::test]
async fn test_missing_executable_aborts_suite() {
    let mut config = mock_config(&[]);
    config.session.executable = PathBuf::from("/nonexistent/sqlite");

    let err = testing::run_suite(&config).await.unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }));
}

#[tokio::test]
async fn test_single_check_reports_final_state() {
    let options = mock_options(&[]);
    let result = testing::run_check(BuiltinCheck::Welcome, options).await.unwrap();

    assert!(result.passed);
    assert_eq!(result.final_state, SessionState::Terminated);
    assert!(result.stderr.is_none());
}

#[tokio::test]
async fn test_yaml_scenario_against_mock() {
    let dir = tempfile::tempdir().unwrap();
    let scenario_path = dir.path().join("startup.yaml");
    let scenario = format!(
        r#"
name: startup and shutdown
target:
  executable: {exe}
steps:
  - action: expect_banner
    equals: Welcome to sqlite
  - action: send
    command: insert 1 abc abc@example.com
  - action: expect
    equals: ""
  - action: send
    command: select
  - action: expect
    contains: "(1, abc, abc@example.com)"
    not_contains: Unrecognized
  - action: send
    command: .exit
  - action: expect
    contains: byeee
  - action: expect_exit
    timeout_ms: 2000
    code: 0
"#,
        exe = mock_repl().display()
    );
    fs::write(&scenario_path, scenario).unwrap();

    let result = testing::run_scenario(&scenario_path, &mock_config(&[]), false)
        .await
        .unwrap();

    assert!(result.passed, "{result:?}");
    assert_eq!(result.steps_run, 8);
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
async fn test_yaml_scenario_failure_stops_at_step() {
    let dir = tempfile::tempdir().unwrap();
    let scenario_path = dir.path().join("bad.yaml");
    let scenario = format!(
        r#"
name: wrong farewell
target:
  executable: {exe}
steps:
  - action: send
    command: .exit
  - action: drain
    contains: goodbye
"#,
        exe = mock_repl().display()
    );
    fs::write(&scenario_path, scenario).unwrap();

    let result = testing::run_scenario(&scenario_path, &mock_config(&[]), false)
        .await
        .unwrap();

    assert!(!result.passed);
    assert_eq!(result.steps_run, 2);
    assert!(result.error.unwrap().contains("expected 'goodbye'"));
}

// ============== Real toolchain ==============

#[tokio::test]
#[ignore = "requires a C++ compiler"]
async fn test_build_and_check_cpp_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("sqlite.cpp");
    fs::copy(&fixture, dir.path().join("sqlite.cpp")).unwrap();

    let mut config = Config::default();
    config.session.working_dir = Some(dir.path().to_path_buf());

    let report = testing::run_suite(&config).await.unwrap();
    assert!(report.passed(), "{report:?}");
    assert!(dir.path().join("sqlite").exists());
}
