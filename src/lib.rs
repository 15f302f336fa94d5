//! REPL harness - black-box integration tests for line-oriented REPLs
//!
//! This library builds a REPL-style database prototype, drives it over its
//! standard streams and checks its startup and shutdown behaviour.

pub mod assertions;
pub mod build;
pub mod cli;
pub mod commands;
pub mod common;
pub mod session;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use session::{Command, Response, Session, SessionOptions, SessionState};
