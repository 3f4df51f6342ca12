//! Configuration module for the node simulator service.
//!
//! Settings come from `NODE_SIM_*` environment variables with defaults for
//! everything, so the service starts without any configuration.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default address the control surface listens on
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

/// Default base URL of the ingestion sink; the node id is appended as a path segment
const DEFAULT_SINK_URL: &str = "https://ccsp.m2m.cdot.in";

const DEFAULT_ORIGIN: &str = "SOTIiithWQ1";
const DEFAULT_REQUEST_ID: &str = "SmartCityiiith";
const DEFAULT_PROTOCOL_VERSION: &str = "3";
const DEFAULT_APP_FIELD: &str = "m2m:cin";
const DEFAULT_CONTENT_FIELD: &str = "con";

/// Default directory for per-node delivery logs
const DEFAULT_LOG_DIR: &str = "logs";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EVENT_TICK_SECS: u64 = 1;

/// Bounds shared by every seconds-valued setting
const MIN_INTERVAL_SECS: u64 = 1;
const MAX_INTERVAL_SECS: u64 = 300;

/// Configuration for the node simulator service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address for the HTTP control surface
    pub listen_addr: SocketAddr,

    /// Sink settings used by the transmitter
    pub sink: SinkConfig,

    /// Directory holding `node_<id>_log.json` delivery logs
    pub log_dir: PathBuf,

    /// Cadence of the live event stream, independent of node frequencies
    pub event_tick: Duration,

    /// Optional JSON file seeding the in-memory node store
    pub nodes_file: Option<PathBuf>,
}

/// Where and how readings are delivered.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Base URL; requests go to `{base_url}/{node_id}`
    pub base_url: String,

    /// `X-M2M-Origin` header value
    pub origin: String,

    /// `X-M2M-RI` header value
    pub request_id: String,

    /// `X-M2M-RVI` header value
    pub protocol_version: String,

    /// Outer envelope field, e.g. `m2m:cin`
    pub app_field: String,

    /// Inner field carrying the stringified reading, e.g. `con`
    pub content_field: String,

    /// PEM client certificate
    pub client_cert: Option<PathBuf>,

    /// PEM private key matching `client_cert`
    pub client_key: Option<PathBuf>,

    /// Skip server certificate verification
    pub accept_invalid_certs: bool,

    pub request_timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SINK_URL.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            request_id: DEFAULT_REQUEST_ID.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            app_field: DEFAULT_APP_FIELD.to_string(),
            content_field: DEFAULT_CONTENT_FIELD.to_string(),
            client_cert: None,
            client_key: None,
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Error type for configuration loading failures
#[derive(Debug, Error)]
#[error(
    "Configuration error{}: {}",
    .env_var.as_ref().map(|v| format!(" for {}", v)).unwrap_or_default(),
    .message
)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but malformed or out of range,
    /// or if only one of the client certificate and key is given.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = match env::var("NODE_SIM_LISTEN_ADDR") {
            Ok(value) => value.parse().map_err(|_| {
                ConfigError::for_var(
                    "NODE_SIM_LISTEN_ADDR",
                    format!("'{}' is not a valid socket address", value),
                )
            })?,
            Err(_) => DEFAULT_LISTEN_ADDR
                .parse()
                .map_err(|_| ConfigError {
                    message: "invalid default listen address".to_string(),
                    env_var: None,
                })?,
        };

        let base_url = string_var("NODE_SIM_SINK_URL", DEFAULT_SINK_URL)
            .trim_end_matches('/')
            .to_string();

        let client_cert = env::var("NODE_SIM_CLIENT_CERT").ok().map(PathBuf::from);
        let client_key = env::var("NODE_SIM_CLIENT_KEY").ok().map(PathBuf::from);
        if client_cert.is_some() != client_key.is_some() {
            return Err(ConfigError {
                message: "NODE_SIM_CLIENT_CERT and NODE_SIM_CLIENT_KEY must be set together"
                    .to_string(),
                env_var: None,
            });
        }

        let sink = SinkConfig {
            base_url,
            origin: string_var("NODE_SIM_ORIGIN", DEFAULT_ORIGIN),
            request_id: string_var("NODE_SIM_REQUEST_ID", DEFAULT_REQUEST_ID),
            protocol_version: string_var("NODE_SIM_PROTOCOL_VERSION", DEFAULT_PROTOCOL_VERSION),
            app_field: string_var("NODE_SIM_APP_FIELD", DEFAULT_APP_FIELD),
            content_field: string_var("NODE_SIM_CONTENT_FIELD", DEFAULT_CONTENT_FIELD),
            client_cert,
            client_key,
            accept_invalid_certs: Self::parse_bool("NODE_SIM_ACCEPT_INVALID_CERTS")?,
            request_timeout: Duration::from_secs(Self::parse_secs(
                "NODE_SIM_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
        };

        let event_tick = Duration::from_secs(Self::parse_secs(
            "NODE_SIM_EVENT_TICK_SECS",
            DEFAULT_EVENT_TICK_SECS,
        )?);

        Ok(Self {
            listen_addr,
            sink,
            log_dir: PathBuf::from(string_var("NODE_SIM_LOG_DIR", DEFAULT_LOG_DIR)),
            event_tick,
            nodes_file: env::var("NODE_SIM_NODES_FILE").ok().map(PathBuf::from),
        })
    }

    /// Parse a seconds value within `MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS`.
    fn parse_secs(env_var: &str, default: u64) -> Result<u64, ConfigError> {
        match env::var(env_var) {
            Ok(value) => {
                let secs: u64 = value.parse().map_err(|_| {
                    ConfigError::for_var(env_var, format!("'{}' is not a valid number", value))
                })?;

                if secs < MIN_INTERVAL_SECS {
                    return Err(ConfigError::for_var(
                        env_var,
                        format!("{} is below minimum ({}s)", secs, MIN_INTERVAL_SECS),
                    ));
                }

                if secs > MAX_INTERVAL_SECS {
                    return Err(ConfigError::for_var(
                        env_var,
                        format!("{} exceeds maximum ({}s)", secs, MAX_INTERVAL_SECS),
                    ));
                }

                Ok(secs)
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_bool(env_var: &str) -> Result<bool, ConfigError> {
        match env::var(env_var) {
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(ConfigError::for_var(
                    env_var,
                    format!("'{}' is not a valid boolean", value),
                )),
            },
            Err(_) => Ok(false),
        }
    }
}

fn string_var(env_var: &str, default: &str) -> String {
    env::var(env_var).unwrap_or_else(|_| default.to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            sink: SinkConfig::default(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            event_tick: Duration::from_secs(DEFAULT_EVENT_TICK_SECS),
            nodes_file: None,
        }
    }
}
