//! Configuration
//!
//! Every interval, timeout, port and endpoint used by matchmaking and the
//! transports. Defaults follow the values the game shipped with; a JSON file
//! and a handful of environment variables can override them.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::participant::Side;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "DUELNET_CONFIG";
/// Environment variable overriding the store base URL.
pub const STORE_URL_ENV: &str = "DUELNET_STORE_URL";
/// Environment variable overriding the advertised `address/prefix`.
pub const ADVERTISE_ENV: &str = "DUELNET_ADVERTISE";
/// Environment variable overriding the direct transport base port.
pub const BASE_PORT_ENV: &str = "DUELNET_BASE_PORT";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid JSON for this schema.
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    /// An environment override has the wrong shape.
    #[error("invalid value for {name}: {value}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
    /// A loaded value is outside its usable range.
    #[error("{field} out of range: {value}")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Matchmaking queue polling.
    pub matchmaking: MatchmakingConfig,
    /// Same-subnet TCP transport.
    pub direct: DirectConfig,
    /// Store-relayed transport.
    pub relay: RelayConfig,
    /// Remote text store endpoint.
    pub store: StoreConfig,
    /// Advertised `address/prefix`, bypassing interface discovery.
    pub advertise: Option<String>,
}

impl NetConfig {
    /// Load from the file named by `DUELNET_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(url) = std::env::var(STORE_URL_ENV) {
            config.store.base_url = Some(url);
        }
        if let Ok(advertise) = std::env::var(ADVERTISE_ENV) {
            config.advertise = Some(advertise);
        }
        if let Ok(port) = std::env::var(BASE_PORT_ENV) {
            config.direct.base_port = parse_base_port(&port)?;
        }

        Ok(config)
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the transports cannot use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.direct.base_port > DirectConfig::MAX_BASE_PORT {
            return Err(ConfigError::OutOfRange {
                field: "direct.base_port",
                value: self.direct.base_port.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_base_port(value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|port| *port <= DirectConfig::MAX_BASE_PORT)
        .ok_or_else(|| ConfigError::InvalidEnv {
            name: BASE_PORT_ENV,
            value: value.to_string(),
        })
}

/// Matchmaking queue polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Delay between queue reloads while waiting for an opponent.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Delay between checks while the queue is full.
    #[serde(with = "millis")]
    pub availability_interval: Duration,
    /// How long a full queue is tolerated before it is cleared.
    #[serde(with = "millis")]
    pub max_availability_wait: Duration,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            availability_interval: Duration::from_millis(500),
            max_availability_wait: Duration::from_secs(5),
        }
    }
}

/// Same-subnet TCP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    /// Base port; each side derives its listen/send ports from its token.
    pub base_port: u16,
    /// How long the outbound side keeps retrying a refused connection.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Delay between connection attempts.
    #[serde(with = "millis")]
    pub connect_retry: Duration,
    /// Outgoing queue capacity.
    pub queue_capacity: usize,
    /// Upper bound on draining the outgoing queue in `close()`.
    #[serde(with = "millis")]
    pub drain_timeout: Duration,
}

impl DirectConfig {
    /// Highest usable base port; side A listens one above it.
    pub const MAX_BASE_PORT: u16 = u16::MAX - 1;

    /// `(send_port, listen_port)` for a participant holding `side`.
    ///
    /// The peer's listen port is this side's send port, and the two listen
    /// ports never coincide. Loaders reject bases above
    /// [`DirectConfig::MAX_BASE_PORT`]; a hand-built one is clamped.
    pub fn ports(&self, side: Side) -> (u16, u16) {
        let base = self.base_port.min(Self::MAX_BASE_PORT);
        let token = u16::from(side.token());
        (base + token, base + 1 - token)
    }
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            base_port: 9877,
            connect_timeout: Duration::from_secs(5),
            connect_retry: Duration::from_millis(100),
            queue_capacity: 256,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Store-relayed transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Delay between reads of the own mailbox.
    #[serde(with = "millis")]
    pub read_interval: Duration,
    /// Delay between write attempts to the opponent's mailbox.
    #[serde(with = "millis")]
    pub write_interval: Duration,
    /// Delay between existence checks during the handshake.
    #[serde(with = "millis")]
    pub mailbox_check_interval: Duration,
    /// How long to wait for the opponent's mailbox to appear.
    #[serde(with = "millis")]
    pub mailbox_timeout: Duration,
    /// Outgoing queue capacity.
    pub queue_capacity: usize,
    /// Upper bound on draining the outgoing queue in `close()`.
    #[serde(with = "millis")]
    pub drain_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            read_interval: Duration::from_millis(50),
            write_interval: Duration::from_millis(100),
            mailbox_check_interval: Duration::from_millis(500),
            mailbox_timeout: Duration::from_secs(7),
            queue_capacity: 256,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Remote text store endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the HTTP text store (resources are `{base_url}/{name}`).
    pub base_url: Option<String>,
    /// Per-request timeout.
    #[serde(with = "millis")]
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Durations as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
