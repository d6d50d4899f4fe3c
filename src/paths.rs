//! Centralized directory paths for the bot.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | Linux | macOS |
//! |---------|-------|-------|
//! | Data | `~/.local/share/taskboard/` | `~/Library/Application Support/taskboard/` |
//! | Config | `~/.config/taskboard/` | `~/Library/Application Support/taskboard/` |
//!
//! # Environment Overrides
//!
//! - `TASKBOARD_DATA_DIR` overrides [`data_dir`]
//! - `TASKBOARD_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Data root where the task and meeting stores live.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TASKBOARD_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("taskboard"))
        .unwrap_or_else(|| PathBuf::from("/tmp/taskboard-data"))
}

/// Config directory holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TASKBOARD_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("taskboard"))
        .unwrap_or_else(|| PathBuf::from("/tmp/taskboard-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn config_file_lives_in_config_dir() {
        let file = config_file();
        assert_eq!(file.parent(), Some(config_dir().as_path()));
        assert!(file.ends_with("config.toml"));
    }
}
