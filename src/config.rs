//! # Bridge Configuration
//!
//! One [`BridgeConfig`] drives both the orchestrator and the game-server
//! agent; each side reads the sections it needs.
//!
//! Sources, lowest precedence first: built-in defaults, a TOML document
//! (`from_file` / `from_toml`) or `BRIDGE_*` environment variables
//! (`from_env`). Durations are written as integer milliseconds.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Version of the frame type-code table both peers must agree on
pub const WIRE_VERSION: u8 = 1;

/// One read quota; the largest frame body either side accepts (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default size of the frame-handling pool
pub const DEFAULT_WORKER_LIMIT: usize = 16;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BridgeConfig {
    /// Accepting-side configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Initiating-side configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Framing and correlation settings shared by both sides
    #[serde(default)]
    pub transport: TransportConfig,

    /// Background sweeper intervals
    #[serde(default)]
    pub overseer: OverseerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Read and parse a TOML file
    ///
    /// # Errors
    /// `ConfigError` if the file cannot be read or is not valid TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Parse a TOML document. Missing sections keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ProtocolError::ConfigError(format!("Malformed TOML: {e}")))
    }

    /// Defaults overridden by whichever `BRIDGE_*` variables are set
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(address) = env_var::<String>("BRIDGE_SERVER_ADDRESS")? {
            config.server.address = address;
        }
        if let Some(address) = env_var::<String>("BRIDGE_CLIENT_ADDRESS")? {
            config.client.address = address;
        }
        if let Some(limit) = env_var("BRIDGE_WORKER_LIMIT")? {
            config.server.worker_limit = limit;
        }
        if let Some(ms) = env_var("BRIDGE_RESPONSE_TIMEOUT_MS")? {
            config.transport.response_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_var("BRIDGE_LOBBY_GRACE_MS")? {
            config.server.lobby_grace_period = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Defaults with `edit` applied; handy in tests
    pub fn default_with_overrides(edit: impl FnOnce(&mut Self)) -> Self {
        let mut config = Self::default();
        edit(&mut config);
        config
    }

    /// The default configuration rendered as TOML
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Every problem found across all sections. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        problems.extend(self.server.validate());
        problems.extend(self.client.validate());
        problems.extend(self.transport.validate());
        problems.extend(self.overseer.validate());
        problems.extend(self.logging.validate());
        problems
    }

    /// [`validate`](Self::validate) folded into one `ConfigError`
    pub fn validate_strict(&self) -> Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed: {}",
            problems.join("; ")
        )))
    }
}

fn env_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ProtocolError::ConfigError(format!("{name} has an unusable value '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// Push a problem if `value` falls outside `[min, max]`
fn check_duration(problems: &mut Vec<String>, label: &str, value: Duration, min: Duration, max: Option<Duration>) {
    if value < min {
        problems.push(format!("{label} too short: {value:?} (minimum: {min:?})"));
    } else if let Some(max) = max.filter(|max| value > *max) {
        problems.push(format!("{label} too long: {value:?} (maximum: {max:?})"));
    }
}

const MS_10: Duration = Duration::from_millis(10);
const MS_100: Duration = Duration::from_millis(100);

/// Orchestrator (accepting side)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub address: String,

    /// Cap on lobby plus identified connections
    pub max_connections: usize,

    /// Frames handled concurrently across all connections
    pub worker_limit: usize,

    /// How long an accepted socket may stay unidentified
    #[serde(with = "millis")]
    pub lobby_grace_period: Duration,

    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3003".into(),
            max_connections: 1000,
            worker_limit: DEFAULT_WORKER_LIMIT,
            lobby_grace_period: timeout::LOBBY_GRACE_PERIOD,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.address.is_empty() {
            problems.push("Server address cannot be empty".into());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            problems.push(format!("Invalid server address '{}', expected ip:port", self.address));
        }

        if self.max_connections == 0 {
            problems.push("Max connections must be at least 1".into());
        }

        match self.worker_limit {
            0 => problems.push("Worker limit must be greater than 0".into()),
            n if n > MAX_WORKER_LIMIT => {
                problems.push(format!("Worker limit too large: {n} (maximum: {MAX_WORKER_LIMIT})"))
            }
            _ => {}
        }

        check_duration(
            &mut problems,
            "Lobby grace period",
            self.lobby_grace_period,
            MS_100,
            Some(Duration::from_secs(300)),
        );
        check_duration(&mut problems, "Shutdown timeout", self.shutdown_timeout, MS_100, None);
        problems
    }
}

const MAX_WORKER_LIMIT: usize = 4096;

/// Game-server agent (initiating side)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Orchestrator address to dial
    pub address: String,

    #[serde(with = "millis")]
    pub connection_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3003".into(),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.address.is_empty() {
            problems.push("Client address cannot be empty".into());
        }
        check_duration(&mut problems, "Connection timeout", self.connection_timeout, MS_100, None);
        problems
    }
}

/// Framing and correlation, shared by both sides
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Largest accepted frame body in bytes
    pub max_frame_size: usize,

    /// Bounded readiness wait of each read loop
    #[serde(with = "millis")]
    pub read_poll_interval: Duration,

    /// Bound on a single frame write
    #[serde(with = "millis")]
    pub write_timeout: Duration,

    /// Ledger deadline of an outstanding request
    #[serde(with = "millis")]
    pub response_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            read_poll_interval: timeout::READ_POLL_INTERVAL,
            write_timeout: timeout::DEFAULT_TIMEOUT,
            response_timeout: timeout::RESPONSE_TIMEOUT,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.max_frame_size < 1024 {
            problems.push(format!("Max frame size too small: {} bytes (minimum: 1024)", self.max_frame_size));
        } else if self.max_frame_size > MAX_FRAME_SIZE {
            problems.push(format!(
                "Max frame size too large: {} bytes (maximum: {MAX_FRAME_SIZE})",
                self.max_frame_size
            ));
        }

        check_duration(
            &mut problems,
            "Read poll interval",
            self.read_poll_interval,
            MS_10,
            Some(Duration::from_secs(10)),
        );
        check_duration(&mut problems, "Write timeout", self.write_timeout, MS_10, None);
        check_duration(
            &mut problems,
            "Response timeout",
            self.response_timeout,
            MS_10,
            Some(Duration::from_secs(600)),
        );
        problems
    }
}

/// Sweep intervals of the background overseers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverseerConfig {
    #[serde(with = "millis")]
    pub request_sweep_interval: Duration,

    #[serde(with = "millis")]
    pub lobby_sweep_interval: Duration,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            request_sweep_interval: timeout::REQUEST_SWEEP_INTERVAL,
            lobby_sweep_interval: timeout::LOBBY_SWEEP_INTERVAL,
        }
    }
}

impl OverseerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        check_duration(&mut problems, "Request sweep interval", self.request_sweep_interval, MS_10, None);
        check_duration(&mut problems, "Lobby sweep interval", self.lobby_sweep_interval, MS_10, None);
        problems
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Reported once at startup to tell processes apart
    pub app_name: String,

    /// Overridden by `RUST_LOG` when set
    #[serde(with = "level_name")]
    pub log_level: Level,

    /// JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: "bridge-protocol".into(),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        match self.app_name.len() {
            0 => vec!["Application name cannot be empty".into()],
            n if n > 64 => vec![format!("Application name too long: {n} characters (maximum: 64)")],
            _ => Vec::new(),
        }
    }
}

/// `Duration` as integer milliseconds
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `tracing::Level` as its lowercase name
mod level_name {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse()
            .map_err(|_| D::Error::custom(format!("unknown log level '{name}'")))
    }
}
