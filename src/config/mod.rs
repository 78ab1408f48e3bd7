//! Configuration Module
//!
//! Provides TOML-based configuration for the mock peer with support for:
//! - Listener settings (bind address, accept timeout)
//! - Step timing (step timeout, client retry interval, terminate grace)
//! - Client process environment (search-path variable)
//! - Scenario parameters
//! - Environment variable overrides (MOCKPEER__* prefix)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use bytes::Bytes;
use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::codec::DEFAULT_MAX_PACKET_SIZE;
use crate::engine::Timing;
use crate::protocol::ProtocolVersion;
use crate::scenario::{Scenario, ScenarioParams};

#[cfg(test)]
mod tests;

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("valid pattern"));

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Listener configuration
    pub server: ServerConfig,
    /// Frame size limits
    pub limits: LimitsConfig,
    /// Step and teardown timing
    pub timing: TimingConfig,
    /// Client process environment
    pub client: ClientConfig,
    /// Scenario selection and parameters
    pub scenario: ScenarioConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP bind address the client is told to connect to
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// How long to wait for the client to connect
    #[serde(default = "default_accept_timeout", with = "humantime_serde")]
    pub accept_timeout: Duration,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1888))
}

fn default_accept_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            accept_timeout: default_accept_timeout(),
        }
    }
}

/// Frame size limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest remaining length accepted from the client
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

fn default_max_packet_size() -> usize {
    DEFAULT_MAX_PACKET_SIZE
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_packet_size: default_max_packet_size(),
        }
    }
}

/// Step and teardown timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait for a packet that answers the previous step
    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub step_timeout: Duration,
    /// Retry interval of the client under test; retransmission steps wait
    /// this long on top of the step timeout
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
    /// How long the client gets to exit after the terminate signal
    #[serde(default = "default_terminate_grace", with = "humantime_serde")]
    pub terminate_grace: Duration,
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_terminate_grace() -> Duration {
    Duration::from_secs(5)
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            step_timeout: default_step_timeout(),
            retry_interval: default_retry_interval(),
            terminate_grace: default_terminate_grace(),
        }
    }
}

impl TimingConfig {
    pub fn engine_timing(&self) -> Timing {
        Timing {
            step_timeout: self.step_timeout,
            retry_interval: self.retry_interval,
        }
    }
}

/// Client process environment
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Search-path variable the client resolves its implementation through
    #[serde(default = "default_search_path_var")]
    pub search_path_var: String,
    /// Entry prepended to that variable
    #[serde(default = "default_search_path")]
    pub search_path: String,
}

fn default_search_path_var() -> String {
    "PYTHONPATH".to_string()
}

fn default_search_path() -> String {
    "../../src".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            search_path_var: default_search_path_var(),
            search_path: default_search_path(),
        }
    }
}

/// Scenario selection and parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Scenario to play
    pub name: Scenario,
    /// Client id the client must connect with (scenario default if unset)
    pub client_id: Option<String>,
    /// Keep alive the client must connect with
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u16,
    /// 3 for MQTT v3.1 ("MQIsdp"), 4 for v3.1.1 ("MQTT")
    #[serde(default = "default_protocol_level")]
    pub protocol_level: u8,
    /// Topic the client must publish to (scenario default if unset)
    pub topic: Option<String>,
    /// Payload the client must publish
    #[serde(default = "default_payload")]
    pub payload: String,
    /// Packet identifier the client must use
    #[serde(default = "default_packet_id")]
    pub packet_id: u16,
}

fn default_keep_alive() -> u16 {
    60
}

fn default_protocol_level() -> u8 {
    3
}

fn default_payload() -> String {
    "message".to_string()
}

fn default_packet_id() -> u16 {
    1
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: Scenario::default(),
            client_id: None,
            keep_alive: default_keep_alive(),
            protocol_level: default_protocol_level(),
            topic: None,
            payload: default_payload(),
            packet_id: default_packet_id(),
        }
    }
}

impl ScenarioConfig {
    /// Script parameters; call after [`Config::validate`]
    pub fn params(&self) -> Result<ScenarioParams, ConfigError> {
        let protocol_version = ProtocolVersion::from_u8(self.protocol_level).ok_or_else(|| {
            ConfigError::Validation(format!(
                "protocol_level must be 3 or 4, got {}",
                self.protocol_level
            ))
        })?;

        Ok(ScenarioParams {
            client_id: self.client_id.clone(),
            keep_alive: self.keep_alive,
            protocol_version,
            topic: self.topic.clone(),
            payload: Bytes::from(self.payload.clone()),
            packet_id: self.packet_id,
        })
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable support.
    ///
    /// Supports:
    /// - `${VAR}` and `${VAR:-default}` substitution in the file
    /// - `MOCKPEER__SECTION__KEY` overrides, e.g. `MOCKPEER__TIMING__STEP_TIMEOUT=2s`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("server.bind", "0.0.0.0:1888")?
            .set_default("server.accept_timeout", "10s")?
            .set_default("timing.step_timeout", "5s")?
            .set_default("timing.retry_interval", "3s")?
            .set_default("timing.terminate_grace", "5s")?
            .set_default("client.search_path_var", "PYTHONPATH")?
            .set_default("client.search_path", "../../src")?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("MOCKPEER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("server.accept_timeout", self.server.accept_timeout),
            ("timing.step_timeout", self.timing.step_timeout),
            ("timing.retry_interval", self.timing.retry_interval),
            ("timing.terminate_grace", self.timing.terminate_grace),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Validation(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.client.search_path_var.is_empty() || self.client.search_path_var.contains('=') {
            return Err(ConfigError::Validation(
                "client.search_path_var must be a non-empty variable name".to_string(),
            ));
        }

        if self.limits.max_packet_size == 0 {
            return Err(ConfigError::Validation(
                "limits.max_packet_size must be greater than zero".to_string(),
            ));
        }

        if self.scenario.packet_id == 0 {
            return Err(ConfigError::Validation(
                "scenario.packet_id must be between 1 and 65535".to_string(),
            ));
        }

        self.scenario.params()?;

        Ok(())
    }
}
