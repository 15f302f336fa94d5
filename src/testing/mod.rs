//! Test runners
//!
//! The built-in suite checks startup, insert and shutdown behaviour with
//! one isolated session per check. YAML scenarios script arbitrary
//! command/response exchanges against the same session primitives.

mod config;
mod runner;

pub use config::*;
pub use runner::{
    build_if_needed, print_result, run_check, run_scenario, run_suite, BuiltinCheck, SuiteReport,
    TestResult,
};
