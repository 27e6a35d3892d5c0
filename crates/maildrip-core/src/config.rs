//! Maildrip configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MaildripError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaildripConfig {
    /// Base URL used when building unsubscribe links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Real SMTP sends only happen when true; otherwise the log-only
    /// transport is wired in and sends are recorded but not delivered.
    #[serde(default)]
    pub production: bool,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_base_url() -> String {
    "http://localhost:8080".into()
}

impl Default for MaildripConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            production: false,
            store: StoreConfig::default(),
            smtp: SmtpConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl MaildripConfig {
    /// Load config from the default path (~/.maildrip/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MaildripError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MaildripError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MaildripError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Maildrip home directory (~/.maildrip).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".maildrip")
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    MaildripConfig::home_dir()
        .join("maildrip.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// SMTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default)]
    pub from_email: String,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_from_name() -> String {
    "Maildrip".into()
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_name: default_from_name(),
            from_email: String::new(),
        }
    }
}

/// Scheduler configuration — three independent triggers plus throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the trigger loop wakes up to check job schedules.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Drip dispatch schedule. Every minute by default; combined with the
    /// batch size below this bounds outbound throughput (20/min = 1200/h).
    #[serde(default = "default_drip_cron")]
    pub drip_cron: String,
    #[serde(default = "default_drip_batch")]
    pub drip_batch_size: usize,
    /// Daily broadcast schedule (7 PM by default).
    #[serde(default = "default_daily_cron")]
    pub daily_cron: String,
    /// Weekly broadcast schedule (Sunday 6 PM by default).
    #[serde(default = "default_weekly_cron")]
    pub weekly_cron: String,
    /// Broadcast jobs send in sub-batches of this size...
    #[serde(default = "default_broadcast_batch")]
    pub broadcast_batch_size: usize,
    /// ...sleeping this long between sub-batches to smooth transport load.
    #[serde(default = "default_broadcast_delay")]
    pub broadcast_delay_ms: u64,
    /// Fixed-window send cap for drip dispatch (attempts per minute).
    #[serde(default = "default_sends_per_minute")]
    pub sends_per_minute: u32,
}

fn default_check_interval() -> u64 {
    30
}
fn default_drip_cron() -> String {
    "* * * * *".into()
}
fn default_drip_batch() -> usize {
    20
}
fn default_daily_cron() -> String {
    "0 19 * * *".into()
}
fn default_weekly_cron() -> String {
    "0 18 * * 0".into()
}
fn default_broadcast_batch() -> usize {
    25
}
fn default_broadcast_delay() -> u64 {
    200
}
fn default_sends_per_minute() -> u32 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            drip_cron: default_drip_cron(),
            drip_batch_size: default_drip_batch(),
            daily_cron: default_daily_cron(),
            weekly_cron: default_weekly_cron(),
            broadcast_batch_size: default_broadcast_batch(),
            broadcast_delay_ms: default_broadcast_delay(),
            sends_per_minute: default_sends_per_minute(),
        }
    }
}
