//! Build step: compile the executable under test
//!
//! A failed build aborts the run before any session is created, so tests
//! never run against a stale or missing executable.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command as TokioCommand;

use crate::common::config::BuildConfig;
use crate::common::paths::resolve;
use crate::common::{Error, Result};

/// Compilers tried, in order, when none is configured
const COMPILER_CANDIDATES: &[&str] = &["g++", "clang++", "c++"];

/// One compiler invocation
#[derive(Debug, Clone)]
pub struct BuildStep {
    compiler: PathBuf,
    source: PathBuf,
    output: PathBuf,
    flags: Vec<String>,
    working_dir: PathBuf,
}

impl BuildStep {
    pub fn new(
        compiler: impl Into<PathBuf>,
        source: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            compiler: compiler.into(),
            source: source.into(),
            output: output.into(),
            flags: Vec::new(),
            working_dir: PathBuf::from("."),
        }
    }

    /// Build from configuration, discovering a compiler on PATH if needed
    pub fn from_config(config: &BuildConfig, working_dir: &Path) -> Result<Self> {
        let compiler = match &config.compiler {
            Some(compiler) => compiler.clone(),
            None => find_compiler()?,
        };
        Ok(Self {
            compiler,
            source: config.source.clone(),
            output: config.output.clone(),
            flags: config.flags.clone(),
            working_dir: working_dir.to_path_buf(),
        })
    }

    pub fn flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Where the executable will be written
    pub fn output_path(&self) -> PathBuf {
        resolve(&self.working_dir, &self.output)
    }

    /// Run the compiler and wait for it; returns the executable's path
    pub async fn run(&self) -> Result<PathBuf> {
        tracing::info!(
            compiler = %self.compiler.display(),
            source = %self.source.display(),
            output = %self.output.display(),
            "Building executable under test"
        );

        let output = TokioCommand::new(&self.compiler)
            .args(&self.flags)
            .arg(&self.source)
            .arg("-o")
            .arg(&self.output)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Spawn {
                path: self.compiler.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(Error::Build {
                source_path: self.source.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let artifact = self.output_path();
        if !artifact.exists() {
            return Err(Error::Build {
                source_path: self.source.clone(),
                code: output.status.code(),
                stderr: format!(
                    "compiler succeeded but '{}' was not produced",
                    artifact.display()
                ),
            });
        }

        tracing::debug!(artifact = %artifact.display(), "Build finished");
        Ok(artifact)
    }
}

/// Find a C++ compiler on PATH
pub fn find_compiler() -> Result<PathBuf> {
    COMPILER_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| Error::compiler_not_found(COMPILER_CANDIDATES))
}
