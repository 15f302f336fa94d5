//! Error types for the REPL harness
//!
//! Build and spawn failures are fatal to a run. Protocol mismatches are not
//! errors at all: they surface as failed [`crate::assertions::Outcome`]s.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Build Errors ===
    #[error("No C++ compiler found. Searched: {searched}")]
    CompilerNotFound { searched: String },

    #[error("Build of '{source_path}' failed with exit code {code:?}:\n{stderr}")]
    Build {
        source_path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    // === Session Errors ===
    #[error("Failed to spawn '{path}': {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Child exited during startup before printing its banner{}", stderr_hint(.stderr))]
    ExitedDuringStartup { stderr: String },

    #[error("Session already terminated; cannot {0}")]
    SessionTerminated(&'static str),

    #[error("Session out of sync ({0}); responses can no longer be attributed to commands")]
    OutOfSync(String),

    #[error("Command must be a single line: {0:?}")]
    InvalidCommand(String),

    // === Timeout Errors ===
    #[error("Child did not print its banner within {0} ms")]
    ReadinessTimeout(u64),

    #[error("No response from child within {0} ms")]
    ResponseTimeout(u64),

    #[error("Child did not exit within {0} ms")]
    ExitTimeout(u64),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid test scenario: {0}")]
    Scenario(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn stderr_hint(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(". stderr:\n{trimmed}")
    }
}

impl Error {
    /// Create a compiler not found error listing the candidates tried
    pub fn compiler_not_found<S: AsRef<str>>(candidates: &[S]) -> Self {
        Self::CompilerNotFound {
            searched: candidates
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Whether this error must abort the whole run rather than a single test
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CompilerNotFound { .. }
                | Error::Build { .. }
                | Error::Spawn { .. }
                | Error::ExitedDuringStartup { .. }
                | Error::ReadinessTimeout(_)
                | Error::Config(_)
                | Error::ConfigParse(_)
        )
    }
}
