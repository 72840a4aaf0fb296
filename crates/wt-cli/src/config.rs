//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::{Duration, FixedOffset};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use wt_core::clock::offset_from_minutes;
use wt_core::{EngineConfig, ReaperConfig};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Minutes east of UTC used to decide which calendar day a session is on.
    pub utc_offset_minutes: i32,
    pub project_cache_ttl_secs: u64,
    pub reaper_interval_secs: u64,
    /// Let the reaper also close stale paused sessions.
    pub reap_paused: bool,
    /// Retries for read-only queries after a transient store error.
    pub read_retries: u32,
    /// How long SQLite waits on a locked database.
    pub busy_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("wt.db"),
            utc_offset_minutes: 0,
            project_cache_ttl_secs: 300,
            reaper_interval_secs: 3600,
            reap_paused: false,
            read_retries: 3,
            busy_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // WT_DATABASE_PATH, WT_UTC_OFFSET_MINUTES, ...
        figment = figment.merge(Env::prefixed("WT_"));

        figment.extract()
    }

    pub fn utc_offset(&self) -> anyhow::Result<FixedOffset> {
        offset_from_minutes(self.utc_offset_minutes).with_context(|| {
            format!(
                "utc_offset_minutes must be strictly between -1440 and 1440, got {}",
                self.utc_offset_minutes
            )
        })
    }

    pub fn project_cache_ttl(&self) -> anyhow::Result<Duration> {
        i64::try_from(self.project_cache_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .with_context(|| {
                format!(
                    "project_cache_ttl_secs is too large: {}",
                    self.project_cache_ttl_secs
                )
            })
    }

    pub const fn busy_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.busy_timeout_ms)
    }

    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        Ok(EngineConfig {
            utc_offset: self.utc_offset()?,
            read_retries: self.read_retries,
        })
    }

    pub fn reaper_config(&self) -> anyhow::Result<ReaperConfig> {
        Ok(ReaperConfig {
            interval: StdDuration::from_secs(self.reaper_interval_secs),
            include_paused: self.reap_paused,
            utc_offset: self.utc_offset()?,
        })
    }
}

/// Returns the platform-specific config directory for wt.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("wt"))
}

/// Returns the platform-specific data directory for wt.
///
/// On Linux: `~/.local/share/wt`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("wt"))
}
