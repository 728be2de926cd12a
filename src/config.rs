use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::core::EngineConfig;

/// Width of `messages.text` in the schema, in characters
pub const MESSAGE_TEXT_COLUMN_CHARS: usize = 200;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub messaging: MessagingSettings,
    pub auth: AuthSettings,
    #[serde(default)]
    pub notifier: NotifierSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Which store implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    pub url: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
}

fn default_backend() -> StoreBackend { StoreBackend::Postgres }

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingSettings {
    #[serde(default = "default_signal_cap")]
    pub signal_cap: i64,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self { signal_cap: default_signal_cap() }
    }
}

fn default_signal_cap() -> i64 { 2 }

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingSettings {
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default)]
    pub notify_receiver: bool,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            max_text_chars: default_max_text_chars(),
            notify_receiver: false,
        }
    }
}

fn default_window_minutes() -> i64 { 10 }
fn default_max_text_chars() -> usize { 200 }

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    /// Shared key for the host dashboard endpoints
    pub host_key: String,
}

fn default_token_ttl_hours() -> i64 { 12 }

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierSettings {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self { channel_capacity: default_channel_capacity() }
    }
}

fn default_channel_capacity() -> usize { 64 }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with SPARK__)
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., SPARK__SERVER__PORT -> server.port
            .add_source(
                Environment::with_prefix("SPARK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings = apply_database_url(settings)?;

        let settings: Self = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("SPARK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject limits the engine or the schema cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.matching.signal_cap < 1 {
            return Err(ConfigError::Message(format!(
                "matching.signal_cap must be at least 1, got {}",
                self.matching.signal_cap
            )));
        }
        if !(1..=MESSAGE_TEXT_COLUMN_CHARS).contains(&self.messaging.max_text_chars) {
            return Err(ConfigError::Message(format!(
                "messaging.max_text_chars must be between 1 and {}, got {}",
                MESSAGE_TEXT_COLUMN_CHARS, self.messaging.max_text_chars
            )));
        }
        if self.messaging.window_minutes < 1 {
            return Err(ConfigError::Message(format!(
                "messaging.window_minutes must be at least 1, got {}",
                self.messaging.window_minutes
            )));
        }
        Ok(())
    }

    /// Engine tunables derived from the matching and messaging sections
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            signal_cap: self.matching.signal_cap,
            message_window: chrono::Duration::minutes(self.messaging.window_minutes),
            max_message_chars: self.messaging.max_text_chars,
            notify_message_receiver: self.messaging.notify_receiver,
        }
    }
}

/// `DATABASE_URL`, when set, wins over every other source for `database.url`
fn apply_database_url(settings: Config) -> Result<Config, ConfigError> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => Config::builder()
            .add_source(settings)
            .set_override("database.url", url)?
            .build(),
        Err(_) => Ok(settings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_default_sections() {
        let matching = MatchingSettings::default();
        let messaging = MessagingSettings::default();
        assert_eq!(matching.signal_cap, 2);
        assert_eq!(messaging.window_minutes, 10);
        assert_eq!(messaging.max_text_chars, 200);
        assert!(!messaging.notify_receiver);
    }

    #[test]
    fn test_default_logging() {
        let logging = LoggingSettings::default();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, "json");
    }

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 8080

            [database]
            backend = "memory"
            url = "unused"

            [auth]
            jwt_secret = "s"
            host_key = "h"
        "#;

        let settings: Settings = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.database.backend, StoreBackend::Memory);
        assert_eq!(settings.auth.token_ttl_hours, 12);
        assert_eq!(settings.notifier.channel_capacity, 64);

        let engine = settings.engine_config();
        assert_eq!(engine.signal_cap, 2);
        assert_eq!(engine.message_window, chrono::Duration::minutes(10));
        assert!(settings.validate().is_ok());
    }

    fn parse(extra: &str) -> Settings {
        let raw = format!(
            r#"
            [server]
            host = "127.0.0.1"
            port = 8080

            [database]
            url = "unused"

            [auth]
            jwt_secret = "s"
            host_key = "h"

            {extra}
            "#
        );
        Config::builder()
            .add_source(File::from_str(&raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_limits_beyond_schema_are_rejected() {
        let settings = parse("[messaging]\nmax_text_chars = 500");
        assert!(settings.validate().is_err());

        let settings = parse("[messaging]\nmax_text_chars = 0");
        assert!(settings.validate().is_err());

        let settings = parse("[messaging]\nmax_text_chars = 200");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_non_positive_cap_and_window_are_rejected() {
        assert!(parse("[matching]\nsignal_cap = 0").validate().is_err());
        assert!(parse("[matching]\nsignal_cap = -3").validate().is_err());
        assert!(parse("[messaging]\nwindow_minutes = 0").validate().is_err());
        assert!(parse("[matching]\nsignal_cap = 5").validate().is_ok());
    }
}
