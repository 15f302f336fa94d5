//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, LOCAL_CONFIG_NAME};
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// How the executable under test is built
    #[serde(default)]
    pub build: BuildConfig,

    /// How the executable under test is launched
    #[serde(default)]
    pub session: SessionConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Literals of the child's textual protocol
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Build step settings
#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Compiler executable; searched on PATH when unset
    #[serde(default)]
    pub compiler: Option<PathBuf>,

    /// Source file to compile
    #[serde(default = "default_source")]
    pub source: PathBuf,

    /// Where the compiled executable is written
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Extra compiler flags
    #[serde(default = "default_flags")]
    pub flags: Vec<String>,

    /// Skip the build and use an existing executable
    #[serde(default)]
    pub skip: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            compiler: None,
            source: default_source(),
            output: default_output(),
            flags: default_flags(),
            skip: false,
        }
    }
}

fn default_source() -> PathBuf {
    PathBuf::from("sqlite.cpp")
}
fn default_output() -> PathBuf {
    PathBuf::from("sqlite")
}
fn default_flags() -> Vec<String> {
    vec!["-std=c++17".to_string()]
}

/// Session launch settings
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Executable to launch
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory of the child; the harness's own when unset
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: Vec::new(),
            working_dir: None,
        }
    }
}

fn default_executable() -> PathBuf {
    PathBuf::from("./sqlite")
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Timeouts {
    /// Bound on waiting for the startup banner
    #[serde(default = "default_readiness")]
    pub readiness_ms: u64,

    /// Bound on each interactive capture
    #[serde(default = "default_response")]
    pub response_ms: u64,

    /// Bound on waiting for the child to exit
    #[serde(default = "default_exit")]
    pub exit_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness_ms: default_readiness(),
            response_ms: default_response(),
            exit_ms: default_exit(),
        }
    }
}

impl Timeouts {
    pub fn readiness(&self) -> Duration {
        Duration::from_millis(self.readiness_ms)
    }

    pub fn response(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }

    pub fn exit(&self) -> Duration {
        Duration::from_millis(self.exit_ms)
    }
}

fn default_readiness() -> u64 {
    5_000
}
fn default_response() -> u64 {
    2_000
}
fn default_exit() -> u64 {
    2_000
}

/// Protocol literals spoken by the child
#[derive(Debug, Deserialize, Clone)]
pub struct ProtocolConfig {
    /// Prompt printed before each read; delimits interactive responses
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Terminator appended to every command
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,

    /// Exact startup banner
    #[serde(default = "default_banner")]
    pub banner: String,

    /// Token printed in reply to the exit command
    #[serde(default = "default_farewell")]
    pub farewell: String,

    /// Command that makes the child exit
    #[serde(default = "default_exit_command")]
    pub exit_command: String,

    /// Harmless command used to check the child still answers
    #[serde(default = "default_probe_command")]
    pub probe_command: String,

    /// Fail the exit check when the child exits with a non-zero status
    #[serde(default)]
    pub require_clean_exit: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            line_terminator: default_line_terminator(),
            banner: default_banner(),
            farewell: default_farewell(),
            exit_command: default_exit_command(),
            probe_command: default_probe_command(),
            require_clean_exit: false,
        }
    }
}

fn default_prompt() -> String {
    "sqlite > ".to_string()
}
fn default_line_terminator() -> String {
    "\r\n".to_string()
}
fn default_banner() -> String {
    "Welcome to sqlite".to_string()
}
fn default_farewell() -> String {
    "byeee".to_string()
}
fn default_exit_command() -> String {
    ".exit".to_string()
}
fn default_probe_command() -> String {
    "select".to_string()
}

impl Config {
    /// Load configuration from `harness.toml` in the current directory,
    /// then from the user config file
    ///
    /// Returns default configuration if neither exists
    pub fn load() -> Result<Self> {
        let local = PathBuf::from(LOCAL_CONFIG_NAME);
        if local.exists() {
            return Self::load_from(&local);
        }
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.protocol.prompt.is_empty() {
            return Err(super::Error::Config("protocol.prompt must not be empty".to_string()));
        }
        if !self.protocol.line_terminator.ends_with('\n') {
            return Err(super::Error::Config(
                "protocol.line_terminator must end with a newline".to_string(),
            ));
        }
        if self.timeouts.readiness_ms == 0
            || self.timeouts.response_ms == 0
            || self.timeouts.exit_ms == 0
        {
            return Err(super::Error::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_sqlite_prototype() {
        let config = Config::default();
        assert_eq!(config.protocol.banner, "Welcome to sqlite");
        assert_eq!(config.protocol.farewell, "byeee");
        assert_eq!(config.protocol.line_terminator, "\r\n");
        assert_eq!(config.timeouts.exit(), Duration::from_secs(2));
        assert_eq!(config.session.executable, PathBuf::from("./sqlite"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
[session]
executable = "./target/debug/mock_repl"
args = ["--stderr-noise"]

[timeouts]
response_ms = 500
"#,
        )
        .unwrap();

        assert_eq!(config.session.args, vec!["--stderr-noise"]);
        assert_eq!(config.timeouts.response_ms, 500);
        assert_eq!(config.timeouts.readiness_ms, 5_000);
        assert_eq!(config.protocol.prompt, "sqlite > ");
        assert_eq!(config.build.source, PathBuf::from("sqlite.cpp"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            Config::parse("[protocol]\nprompt = \"\""),
            Err(super::super::Error::Config(_))
        ));
        assert!(matches!(
            Config::parse("[timeouts]\nexit_ms = 0"),
            Err(super::super::Error::Config(_))
        ));
        assert!(matches!(
            Config::parse("[session\n"),
            Err(super::super::Error::ConfigParse(_))
        ));
    }
}
