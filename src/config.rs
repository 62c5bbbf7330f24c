//! Engine configuration.
//!
//! All tunables live in one TOML document; every section and every field is
//! optional and falls back to the built-in default.
//!
//! # Configuration File Format
//!
//! ```toml
//! [locks]
//! timeout_ms = 5000
//! poll_ms = 100
//! stale_ms = 300000
//!
//! [cache]
//! ttl_secs = 300
//!
//! [history]
//! max_versions = 10
//!
//! [snapshot]
//! max_backups = 10
//! backup_interval_secs = 3600
//! compression_enabled = false
//! encryption_enabled = false
//!
//! [health]
//! restore_point_interval_secs = 3600
//! content_base_url = "http://localhost:3000"
//!
//! [dispatcher]
//! max_command_log = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::locks::LockSettings;
use crate::snapshot::SnapshotConfig;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub locks: LocksConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse engine config")
    }

    /// Load from `path`, or fall back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize engine config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

/// `[locks]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocksConfig {
    /// Acquisition retry budget in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause between acquisition attempts in milliseconds.
    #[serde(default = "default_lock_poll_ms")]
    pub poll_ms: u64,
    /// Age past which a held lock counts as abandoned, in milliseconds.
    #[serde(default = "default_lock_stale_ms")]
    pub stale_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_lock_poll_ms() -> u64 {
    100
}

fn default_lock_stale_ms() -> u64 {
    300_000
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            poll_ms: default_lock_poll_ms(),
            stale_ms: default_lock_stale_ms(),
        }
    }
}

impl LocksConfig {
    pub fn settings(&self) -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(self.timeout_ms),
            poll_interval: Duration::from_millis(self.poll_ms),
            stale_after: Duration::from_millis(self.stale_ms),
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// `[history]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
}

fn default_max_versions() -> usize {
    10
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_versions: default_max_versions(),
        }
    }
}

/// `[health]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between automatic restore points.
    #[serde(default = "default_restore_point_interval_secs")]
    pub restore_point_interval_secs: u64,
    /// Base URL for content-route reachability checks. Empty disables them.
    #[serde(default)]
    pub content_base_url: String,
}

fn default_restore_point_interval_secs() -> u64 {
    3_600
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            restore_point_interval_secs: default_restore_point_interval_secs(),
            content_base_url: String::new(),
        }
    }
}

/// `[dispatcher]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_max_command_log")]
    pub max_command_log: usize,
}

fn default_max_command_log() -> usize {
    1_000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_command_log: default_max_command_log(),
        }
    }
}
