//! Configuration paths and path resolution helpers

use std::path::{Path, PathBuf};

/// Application name used for the user config directory
const APP_NAME: &str = "repl-harness";

/// Config file looked up in the current directory before the user config
pub const LOCAL_CONFIG_NAME: &str = "harness.toml";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/repl-harness/`
/// - macOS: `~/Library/Application Support/repl-harness/`
/// - Windows: `%APPDATA%\repl-harness\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the user configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
