//! Value types exchanged with the child process

use std::fmt;
use std::process::ExitStatus;

use serde::Serialize;

use crate::common::{Error, Result};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Running,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::NotStarted => write!(f, "not started"),
            SessionState::Running => write!(f, "running"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// One line of the child's protocol, without its terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    /// Build a command; it must not contain a line break
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.contains(['\r', '\n']) {
            return Err(Error::InvalidCommand(text));
        }
        Ok(Self(text))
    }

    /// `insert <id> <username> <email>`
    pub fn insert(id: i64, username: &str, email: &str) -> Result<Self> {
        Self::new(format!("insert {id} {username} {email}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a capture stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEnd {
    /// The prompt was seen
    Delimiter,
    /// A full line was read
    LineEnd,
    /// The child closed its stdout
    EndOfStream,
}

/// Text captured from the child's stdout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    text: String,
    end: CaptureEnd,
}

impl Response {
    pub fn new(text: String, end: CaptureEnd) -> Self {
        Self { text, end }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn end(&self) -> CaptureEnd {
        self.end
    }

    pub fn reached_eof(&self) -> bool {
        self.end == CaptureEnd::EndOfStream
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Everything a child produced, collected by a drain-to-exit capture
#[derive(Debug, Clone)]
pub struct Transcript {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

impl Transcript {
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }
}
