//! Configuration types for the bot.

use crate::error::{BoardError, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Discord credentials.
    pub discord: DiscordConfig,
    /// Where the JSON stores live.
    pub storage: StorageConfig,
    /// Board rendering and channel clearing.
    pub board: BoardConfig,
    /// Meeting reminder and attendance timing.
    pub schedule: ScheduleConfig,
    /// Initial gateway connection policy.
    pub connection: ConnectionConfig,
    /// Outbound message limits.
    pub rate_limits: RateLimitConfig,
    /// Directory for daily rolling log files. Unset logs to stderr only.
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token. `DISCORD_TOKEN` in the environment takes precedence.
    pub token: String,
    /// Application id used to register slash commands. Derived from the
    /// token when unset.
    pub application_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory (None = platform data dir).
    pub data_dir: Option<PathBuf>,
    pub tasks_file: String,
    pub meetings_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            tasks_file: "tasks.json".to_owned(),
            meetings_file: "meetings.json".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Tasks rendered per board block.
    pub tasks_per_block: usize,
    /// Most recent messages fetched per clear pass.
    pub purge_limit: u32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            tasks_per_block: 3,
            purge_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between meeting checks.
    pub tick_interval_secs: u64,
    /// Minutes before start at which the reminder fires.
    pub reminder_lead_mins: i64,
    /// Minutes after start at which attendance is checked.
    pub attendance_grace_mins: i64,
    /// Upper bound on a single meeting's check.
    pub check_timeout_secs: u64,
    /// Offset applied to meeting times typed by users, in minutes east of UTC.
    pub utc_offset_minutes: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            reminder_lead_mins: 30,
            attendance_grace_mins: 10,
            check_timeout_secs: 30,
            utc_offset_minutes: 60,
        }
    }
}

impl ScheduleConfig {
    /// Offset for interpreting user-entered meeting times. Falls back to UTC
    /// when the configured value is out of range.
    #[must_use]
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Attempts made on the initial connection before giving up.
    pub connect_attempts: u32,
    /// Fixed delay between initial connection attempts.
    pub connect_backoff_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            connect_backoff_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Messages per minute per channel.
    pub messages_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: 50,
        }
    }
}

/// How serious a config problem is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

/// A problem found by [`BotConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub id: String,
    pub title: String,
    pub severity: ConfigSeverity,
    pub summary: String,
}

impl BotConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| BoardError::Config(e.to_string()))
    }

    /// Load from `path` when it exists, otherwise defaults. Applies
    /// environment overrides either way.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BoardError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/taskboard/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_file()
    }

    /// Pull the bot token from `DISCORD_TOKEN` when set.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("DISCORD_TOKEN") {
            let token = token.trim();
            if !token.is_empty() {
                token.clone_into(&mut self.discord.token);
            }
        }
    }

    /// Resolved data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(crate::paths::data_dir)
    }

    #[must_use]
    pub fn tasks_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.tasks_file)
    }

    #[must_use]
    pub fn meetings_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.meetings_file)
    }

    /// Validate configuration without network calls.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.discord.token.trim().is_empty() {
            issues.push(ConfigIssue {
                id: "discord-missing-token".to_owned(),
                title: "Discord token missing".to_owned(),
                severity: ConfigSeverity::Error,
                summary: "Set `discord.token` or the DISCORD_TOKEN environment variable."
                    .to_owned(),
            });
        }

        if self.board.tasks_per_block == 0 {
            issues.push(ConfigIssue {
                id: "board-zero-tasks-per-block".to_owned(),
                title: "tasks_per_block is zero".to_owned(),
                severity: ConfigSeverity::Error,
                summary: "`board.tasks_per_block` must be at least 1.".to_owned(),
            });
        }

        if self.schedule.tick_interval_secs == 0 {
            issues.push(ConfigIssue {
                id: "schedule-zero-tick".to_owned(),
                title: "Scheduler tick interval is zero".to_owned(),
                severity: ConfigSeverity::Error,
                summary: "`schedule.tick_interval_secs` must be at least 1.".to_owned(),
            });
        } else if self.schedule.tick_interval_secs > 60 {
            issues.push(ConfigIssue {
                id: "schedule-tick-exceeds-window".to_owned(),
                title: "Scheduler tick is longer than the reminder window".to_owned(),
                severity: ConfigSeverity::Warning,
                summary: "Ticks longer than 60s can skip the one-minute reminder window."
                    .to_owned(),
            });
        }

        if FixedOffset::east_opt(self.schedule.utc_offset_minutes.saturating_mul(60)).is_none() {
            issues.push(ConfigIssue {
                id: "schedule-bad-offset".to_owned(),
                title: "UTC offset out of range".to_owned(),
                severity: ConfigSeverity::Error,
                summary: "`schedule.utc_offset_minutes` must be within ±1439.".to_owned(),
            });
        }

        if self.connection.connect_attempts == 0 {
            issues.push(ConfigIssue {
                id: "connection-zero-attempts".to_owned(),
                title: "No connection attempts".to_owned(),
                severity: ConfigSeverity::Error,
                summary: "`connection.connect_attempts` must be at least 1.".to_owned(),
            });
        }

        if self.rate_limits.messages_per_minute == 0 {
            issues.push(ConfigIssue {
                id: "rate-limit-zero".to_owned(),
                title: "Message rate limit is zero".to_owned(),
                severity: ConfigSeverity::Error,
                summary: "`rate_limits.messages_per_minute` must be at least 1.".to_owned(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = BotConfig::default();
        assert_eq!(config.board.tasks_per_block, 3);
        assert_eq!(config.schedule.tick_interval_secs, 60);
        assert_eq!(config.schedule.reminder_lead_mins, 30);
        assert_eq!(config.schedule.attendance_grace_mins, 10);
        assert_eq!(config.connection.connect_attempts, 5);
        assert_eq!(config.storage.tasks_file, "tasks.json");
        assert_eq!(config.schedule.utc_offset().local_minus_utc(), 3600);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: BotConfig = toml::from_str(
            r#"
            [discord]
            token = "abc"

            [board]
            tasks_per_block = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.discord.token, "abc");
        assert_eq!(config.board.tasks_per_block, 5);
        assert_eq!(config.board.purge_limit, 100);
        assert_eq!(config.schedule.check_timeout_secs, 30);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = BotConfig::default();
        config.discord.application_id = Some(42);
        config.save_to_file(&path).unwrap();
        let loaded = BotConfig::from_file(&path).unwrap();
        assert_eq!(loaded.discord.application_id, Some(42));
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(matches!(
            BotConfig::from_file(&path),
            Err(BoardError::Config(_))
        ));
    }

    #[test]
    fn validation_flags_missing_token() {
        let issues = BotConfig::default().validate();
        assert!(
            issues
                .iter()
                .any(|i| i.id == "discord-missing-token" && i.severity == ConfigSeverity::Error)
        );
    }

    #[test]
    fn validation_flags_bad_offset() {
        let mut config = BotConfig::default();
        config.discord.token = "t".to_owned();
        config.schedule.utc_offset_minutes = 5000;
        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "schedule-bad-offset");
        assert_eq!(config.schedule.utc_offset().local_minus_utc(), 0);
    }

    #[test]
    fn store_paths_join_data_dir() {
        let mut config = BotConfig::default();
        config.storage.data_dir = Some(PathBuf::from("/srv/bot"));
        assert_eq!(config.tasks_path(), PathBuf::from("/srv/bot/tasks.json"));
        assert_eq!(config.meetings_path(), PathBuf::from("/srv/bot/meetings.json"));
    }
}
