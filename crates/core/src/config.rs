use serde::Deserialize;
use std::time::Duration;

/// Root console configuration. Loaded from environment variables with the
/// prefix `CAMPAIGN_CONSOLE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub messages: MessageConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_active_refresh_secs")]
    pub active_refresh_secs: u64,
    #[serde(default = "default_idle_refresh_secs")]
    pub idle_refresh_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_export_poll_interval_ms")]
    pub export_poll_interval_ms: u64,
    #[serde(default = "default_filter_debounce_ms")]
    pub filter_debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageConfig {
    #[serde(default = "default_status_ttl_ms")]
    pub status_ttl_ms: u64,
    #[serde(default = "default_error_ttl_ms")]
    pub error_ttl_ms: u64,
    #[serde(default = "default_segment_action_ttl_ms")]
    pub segment_action_ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default = "default_event_name")]
    pub event_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

// Default functions
fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    40
}
fn default_interval_ms() -> u64 {
    3000
}
fn default_active_refresh_secs() -> u64 {
    5
}
fn default_idle_refresh_secs() -> u64 {
    30
}
fn default_history_limit() -> usize {
    20
}
fn default_export_poll_interval_ms() -> u64 {
    3000
}
fn default_filter_debounce_ms() -> u64 {
    300
}
fn default_status_ttl_ms() -> u64 {
    4000
}
fn default_error_ttl_ms() -> u64 {
    4000
}
fn default_segment_action_ttl_ms() -> u64 {
    2200
}
fn default_stream_path() -> String {
    "/api/segments/stream".to_string()
}
fn default_event_name() -> String {
    "segments".to_string()
}
fn default_storage_path() -> String {
    ".campaign-console.json".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            admin_token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            active_refresh_secs: default_active_refresh_secs(),
            idle_refresh_secs: default_idle_refresh_secs(),
            history_limit: default_history_limit(),
            export_poll_interval_ms: default_export_poll_interval_ms(),
            filter_debounce_ms: default_filter_debounce_ms(),
        }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            status_ttl_ms: default_status_ttl_ms(),
            error_ttl_ms: default_error_ttl_ms(),
            segment_action_ttl_ms: default_segment_action_ttl_ms(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            stream_path: default_stream_path(),
            event_name: default_event_name(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            polling: PollingConfig::default(),
            messages: MessageConfig::default(),
            live: LiveConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn active_refresh(&self) -> Duration {
        Duration::from_secs(self.active_refresh_secs)
    }

    pub fn idle_refresh(&self) -> Duration {
        Duration::from_secs(self.idle_refresh_secs)
    }

    pub fn export_poll_interval(&self) -> Duration {
        Duration::from_millis(self.export_poll_interval_ms)
    }

    pub fn filter_debounce(&self) -> Duration {
        Duration::from_millis(self.filter_debounce_ms)
    }
}

impl ConsoleConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CAMPAIGN_CONSOLE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_console_cadence() {
        let config = ConsoleConfig::default();
        assert_eq!(config.polling.max_attempts, 40);
        assert_eq!(config.polling.interval(), Duration::from_millis(3000));
        assert_eq!(config.polling.active_refresh(), Duration::from_secs(5));
        assert_eq!(config.polling.idle_refresh(), Duration::from_secs(30));
        assert_eq!(config.messages.status_ttl_ms, 4000);
        assert_eq!(config.messages.segment_action_ttl_ms, 2200);
        assert_eq!(config.live.event_name, "segments");
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: ConsoleConfig =
            serde_json::from_str(r#"{"polling": {"max_attempts": 5}}"#).expect("valid config");
        assert_eq!(config.polling.max_attempts, 5);
        assert_eq!(config.polling.interval_ms, 3000);
        assert_eq!(config.api.base_url, "http://localhost:8080");
    }
}
