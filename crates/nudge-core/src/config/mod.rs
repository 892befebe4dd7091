mod defaults;


use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::NudgeError;
use defaults::*;

/// Environment variable that overrides `notifier.whatsapp.access_token`.
pub const WHATSAPP_TOKEN_ENV: &str = "NUDGE_WHATSAPP_TOKEN";

/// Top-level Nudge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub nudge: NudgeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub flow: FlowConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Relational store config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Delayed task queue and worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Concurrent executor workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Downstream send ceiling enforced by the worker layer.
    #[serde(default = "default_max_sends_per_second")]
    pub max_sends_per_second: u32,
    /// How often workers look for due tasks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delivery attempts per task before it moves to the dead lane.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Visibility timeout: an `active` task whose worker vanished is
    /// redelivered after this long.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: default_workers(),
            max_sends_per_second: default_max_sends_per_second(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            lease_secs: default_lease_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Recovery sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Pending reminders due within this horizon are re-admitted to the queue.
    #[serde(default = "default_lookahead_secs")]
    pub lookahead_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval_secs(),
            lookahead_secs: default_lookahead_secs(),
        }
    }
}

/// Which notifier backend delivers reminders.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Log the message and fabricate a message id (dry run).
    #[default]
    Log,
    /// WhatsApp Cloud API.
    Whatsapp,
}

/// Outbound notifier config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub kind: NotifierKind,
    /// Upper bound on a single send; a timeout is a retryable failure.
    #[serde(default = "default_notifier_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::default(),
            timeout_secs: default_notifier_timeout_secs(),
            whatsapp: None,
        }
    }
}

impl NotifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// WhatsApp Cloud API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default = "default_whatsapp_api_base")]
    pub api_base: String,
}

/// Conversation flow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Recent log entries handed to the classifier.
    #[serde(default = "default_history_window")]
    pub history_window: i64,
    /// Offset assumed for owners who have not finished setup.
    #[serde(default)]
    pub default_utc_offset_minutes: i32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            default_utc_offset_minutes: 0,
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, NudgeError> {
    let path = Path::new(path);
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NudgeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        parse(&content)?
    } else {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    };

    if let Ok(token) = std::env::var(WHATSAPP_TOKEN_ENV) {
        if !token.is_empty() {
            config
                .notifier
                .whatsapp
                .get_or_insert_with(WhatsAppConfig::default)
                .access_token = token;
        }
    }

    Ok(config)
}

/// Parse configuration from TOML text.
pub fn parse(content: &str) -> Result<Config, NudgeError> {
    toml::from_str(content).map_err(|e| NudgeError::Config(format!("failed to parse config: {e}")))
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            phone_number_id: String::new(),
            api_base: default_whatsapp_api_base(),
        }
    }
}
