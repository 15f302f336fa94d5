//! Session management for the executable under test
//!
//! This module owns the child process and implements the command channel
//! and the two response capture strategies on top of its standard streams.

pub mod codec;
mod process;
mod types;

pub use process::{Session, SessionOptions};
pub use types::{CaptureEnd, Command, Response, SessionState, Transcript};
