//! Assertions over the child's protocol
//!
//! Each check drives the session only through `send`/`capture` and reports
//! an [`Outcome`]. A child that answers with the wrong text produces a failed
//! outcome; only transport problems (timeouts, closed pipes) are errors.

use std::fmt;

use serde::Serialize;

use crate::common::{truncate_for_display, Error, Result};
use crate::session::{CaptureEnd, Command, Session};

/// Verdict of one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub check: String,
    pub passed: bool,
    pub expected: String,
    pub actual: String,
    /// Why the check failed when the text alone does not say
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Outcome {
    fn new(check: &str, passed: bool, expected: &str, actual: &str) -> Self {
        Self {
            check: check.to_string(),
            passed,
            expected: expected.to_string(),
            actual: actual.to_string(),
            note: None,
        }
    }

    fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn passed(&self) -> bool {
        self.passed
    }
}

impl From<Outcome> for bool {
    fn from(outcome: Outcome) -> bool {
        outcome.passed
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed {
            return write!(f, "{}: ok", self.check);
        }
        write!(
            f,
            "{}: expected '{}', got '{}'",
            self.check,
            self.expected,
            truncate_for_display(&self.actual, 200)
        )?;
        if let Some(note) = &self.note {
            write!(f, " ({note})")?;
        }
        Ok(())
    }
}

/// Exact match
pub fn equals(check: &str, actual: &str, expected: &str) -> Outcome {
    Outcome::new(check, actual == expected, expected, actual)
}

/// Substring containment
pub fn contains(check: &str, actual: &str, expected: &str) -> Outcome {
    Outcome::new(check, actual.contains(expected), expected, actual)
}

/// Substring absence
pub fn not_contains(check: &str, actual: &str, unexpected: &str) -> Outcome {
    Outcome::new(check, !actual.contains(unexpected), &format!("no '{unexpected}'"), actual)
}

/// The startup banner equals the configured banner exactly
///
/// Any text after the banner line and before the first prompt fails the
/// check, so the first response must be the banner and nothing else.
pub fn welcome(session: &Session) -> Outcome {
    let expected = &session.protocol().banner;
    let mut outcome = equals("welcome", session.banner().text(), expected);
    let extra = session.startup_output();
    if outcome.passed && !extra.is_empty() {
        outcome = Outcome::new("welcome", false, expected, &format!("{expected}\n{extra}"))
            .with_note("unexpected output after the banner");
    }
    log_outcome(&outcome);
    outcome
}

/// The exit command is acknowledged and the child terminates in time
pub async fn exit(session: &mut Session) -> Result<Outcome> {
    let protocol = session.protocol().clone();
    let command = Command::new(protocol.exit_command.as_str())?;

    session.send(&command).await?;
    let response = match session.capture().await {
        Ok(response) => response,
        Err(Error::ResponseTimeout(ms)) => {
            // Neither a prompt nor end-of-stream: the child is still alive
            let partial = session.take_partial_output();
            let mut outcome = contains("exit", &partial, &protocol.farewell);
            let note = if outcome.passed {
                format!("child still running {ms} ms after farewell")
            } else {
                format!("no response within {ms} ms")
            };
            outcome.passed = false;
            outcome = outcome.with_note(note);
            log_outcome(&outcome);
            return Ok(outcome);
        }
        Err(e) => return Err(e),
    };

    let mut outcome = contains("exit", response.text(), &protocol.farewell);
    if !outcome.passed {
        log_outcome(&outcome);
        return Ok(outcome);
    }

    let limit = session.timeouts().exit();
    match session.wait_exit(limit).await {
        Ok(status) if protocol.require_clean_exit && !status.success() => {
            outcome.passed = false;
            outcome = outcome.with_note(format!("child exited with {status}"));
        }
        Ok(_) => {}
        Err(Error::ExitTimeout(ms)) => {
            outcome.passed = false;
            outcome = outcome.with_note(format!("child still running {ms} ms after farewell"));
        }
        Err(e) => return Err(e),
    }

    log_outcome(&outcome);
    Ok(outcome)
}

/// An insert does not crash the child: a follow-up command still gets a
/// prompt-terminated response
pub async fn insert_accepted(
    session: &mut Session,
    id: i64,
    username: &str,
    email: &str,
) -> Result<Outcome> {
    let insert = Command::insert(id, username, email)?;
    let probe = Command::new(session.protocol().probe_command.as_str())?;

    let after_insert = session.exchange(&insert).await?;
    if after_insert.end() != CaptureEnd::Delimiter {
        let outcome = Outcome::new("insert", false, "prompt after insert", after_insert.text())
            .with_note("child closed its output after the insert");
        log_outcome(&outcome);
        return Ok(outcome);
    }

    let after_probe = session.exchange(&probe).await?;
    let passed = after_probe.end() == CaptureEnd::Delimiter;
    let mut outcome = Outcome::new(
        "insert",
        passed,
        &format!("prompt after '{probe}'"),
        after_probe.text(),
    );
    if !passed {
        outcome = outcome.with_note("child stopped answering after the insert");
    }

    log_outcome(&outcome);
    Ok(outcome)
}

fn log_outcome(outcome: &Outcome) {
    if outcome.passed {
        tracing::debug!(check = %outcome.check, "Check passed");
    } else {
        tracing::warn!(
            check = %outcome.check,
            expected = %outcome.expected,
            actual = %outcome.actual,
            note = ?outcome.note,
            "Check failed"
        );
    }
}
