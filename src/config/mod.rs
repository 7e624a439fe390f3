//! Layered configuration (spec §6 "Configuration", §7.1 ambient stack).
//!
//! Grounded on the teacher's `server/config/mod.rs` `ConfigBuilder`
//! precedent: defaults, then an optional TOML file, then environment
//! variables, each layer only overriding what it actually sets. The env
//! prefix here is `CHATCORE_` where the teacher used `LAIR_CHAT_`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::MAX_FRAME_SIZE;

/// Which `StateStore` backend `ChatService` should construct.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StoreConfig {
    Memory,
    Sqlite { database_url: String },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportConfig {
    pub bind_addr: String,
    pub max_frame_size: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".into(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Every config key enumerated by the spec, plus the logging pair the
/// ambient stack needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub namespace: String,
    pub history_max_messages: usize,
    pub use_raw_error_objects: bool,
    pub enable_userlist_updates: bool,
    pub enable_rooms_management: bool,
    pub enable_direct_messages: bool,
    pub close_timeout_secs: u64,
    pub bus_ack_timeout_secs: u64,
    pub store: StoreConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            namespace: "/chat-service".into(),
            history_max_messages: 100,
            use_raw_error_objects: false,
            enable_userlist_updates: false,
            enable_rooms_management: false,
            enable_direct_messages: false,
            close_timeout_secs: 5,
            bus_ack_timeout_secs: 5,
            store: StoreConfig::default(),
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn bus_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.bus_ack_timeout_secs)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, #[source] toml::de::Error),
    #[error("invalid value for environment variable {0}: {1}")]
    Env(String, String),
}

/// Builds a [`ServiceConfig`] by layering defaults, an optional file, and
/// environment variables, in that order, mirroring the teacher's
/// `with_defaults`/`with_file`/`with_environment`/`build` chain.
pub struct ConfigBuilder {
    config: ServiceConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ServiceConfig::default(),
        }
    }

    pub fn with_defaults(mut self) -> Self {
        self.config = ServiceConfig::default();
        self
    }

    /// Replaces the current config with the TOML file at `path`. Keys the
    /// file omits keep their default values, since every field carries
    /// `#[serde(default)]`.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let parsed: ServiceConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse(path.display().to_string(), e))?;
        self.config = parsed;
        Ok(self)
    }

    /// Applies `CHATCORE_*` environment variable overrides on top of
    /// whatever layer ran before it.
    pub fn with_environment(mut self) -> Result<Self, ConfigError> {
        apply_env(&mut self.config)?;
        Ok(self)
    }

    pub fn build(self) -> ServiceConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("CHATCORE_{name}")).ok()
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Env(name.to_string(), raw)),
        None => Ok(None),
    }
}

fn apply_env(config: &mut ServiceConfig) -> Result<(), ConfigError> {
    if let Some(v) = env_var("NAMESPACE") {
        config.namespace = v;
    }
    if let Some(v) = parse_env::<usize>("HISTORY_MAX_MESSAGES")? {
        config.history_max_messages = v;
    }
    if let Some(v) = parse_env::<bool>("USE_RAW_ERROR_OBJECTS")? {
        config.use_raw_error_objects = v;
    }
    if let Some(v) = parse_env::<bool>("ENABLE_USERLIST_UPDATES")? {
        config.enable_userlist_updates = v;
    }
    if let Some(v) = parse_env::<bool>("ENABLE_ROOMS_MANAGEMENT")? {
        config.enable_rooms_management = v;
    }
    if let Some(v) = parse_env::<bool>("ENABLE_DIRECT_MESSAGES")? {
        config.enable_direct_messages = v;
    }
    if let Some(v) = parse_env::<u64>("CLOSE_TIMEOUT_SECS")? {
        config.close_timeout_secs = v;
    }
    if let Some(v) = parse_env::<u64>("BUS_ACK_TIMEOUT_SECS")? {
        config.bus_ack_timeout_secs = v;
    }
    if let Some(v) = env_var("BIND_ADDR") {
        config.transport.bind_addr = v;
    }
    if let Some(v) = parse_env::<u32>("MAX_FRAME_SIZE")? {
        config.transport.max_frame_size = v;
    }
    if let Some(database_url) = env_var("DATABASE_URL") {
        config.store = StoreConfig::Sqlite { database_url };
    }
    if let Some(v) = env_var("LOG_LEVEL") {
        config.logging.level = v;
    }
    if let Some(v) = parse_env::<bool>("LOG_JSON")? {
        config.logging.json = v;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests that
    // touch `CHATCORE_*` so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_the_spec() {
        let config = ServiceConfig::default();
        assert_eq!(config.namespace, "/chat-service");
        assert_eq!(config.history_max_messages, 100);
        assert!(!config.use_raw_error_objects);
        assert!(!config.enable_userlist_updates);
        assert!(matches!(config.store, StoreConfig::Memory));
    }

    #[test]
    fn file_layer_fills_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatcore.toml");
        std::fs::write(&path, "historyMaxMessages = 10\nenableRoomsManagement = true\n").unwrap();

        let config = ConfigBuilder::new().with_file(&path).unwrap().build();
        assert_eq!(config.history_max_messages, 10);
        assert!(config.enable_rooms_management);
        assert_eq!(config.namespace, "/chat-service");
    }

    #[test]
    fn environment_layer_overrides_file_layer() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("CHATCORE_NAMESPACE", "/test-ns");
        std::env::set_var("CHATCORE_HISTORY_MAX_MESSAGES", "42");
        let config = ConfigBuilder::new().with_environment().unwrap().build();
        std::env::remove_var("CHATCORE_NAMESPACE");
        std::env::remove_var("CHATCORE_HISTORY_MAX_MESSAGES");

        assert_eq!(config.namespace, "/test-ns");
        assert_eq!(config.history_max_messages, 42);
    }

    #[test]
    fn invalid_environment_value_is_reported() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("CHATCORE_HISTORY_MAX_MESSAGES", "not-a-number");
        let err = ConfigBuilder::new().with_environment().unwrap_err();
        std::env::remove_var("CHATCORE_HISTORY_MAX_MESSAGES");
        assert!(matches!(err, ConfigError::Env(_, _)));
    }
}
