//! Connection configuration.
//!
//! A configuration is plain data loaded from TOML:
//!
//! ```toml
//! source_net_id = "192.168.1.10.1.1"
//! source_port = 65534
//! target_net_id = "192.168.1.100.1.1"
//! target_port = 851
//! request_timeout_ms = 5000
//! symbol_resolution = "handle"
//! ```

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use ads_transport::{AmsAddr, AmsNetId, PORT_TC3_PLC1};
use serde::{Deserialize, Serialize};

/// Port conventionally used by ADS clients.
pub const DEFAULT_SOURCE_PORT: u16 = 65534;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How symbolic tags are turned into direct addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolResolution {
    /// Ask the device for a symbol handle and access through it.
    #[default]
    Handle,
    /// Use the group and offset from the symbol tables.
    Offset,
}

/// Addresses and tuning for one connection. Immutable once the connection
/// is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub source_net_id: AmsNetId,
    #[serde(default = "default_source_port")]
    pub source_port: u16,
    pub target_net_id: AmsNetId,
    #[serde(default = "default_target_port")]
    pub target_port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub symbol_resolution: SymbolResolution,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_source_port() -> u16 {
    DEFAULT_SOURCE_PORT
}

fn default_target_port() -> u16 {
    PORT_TC3_PLC1
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl ConnectionConfig {
    /// A configuration with default ports and tuning.
    pub fn new(source_net_id: AmsNetId, target_net_id: AmsNetId) -> Self {
        Self {
            source_net_id,
            source_port: DEFAULT_SOURCE_PORT,
            target_net_id,
            target_port: PORT_TC3_PLC1,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            symbol_resolution: SymbolResolution::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Read a TOML configuration from any reader.
    pub fn load(mut r: impl Read) -> Result<Self, ConfigError> {
        let mut contents = String::new();
        r.read_to_string(&mut contents)?;
        Self::from_toml_str(&contents)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading connection configuration");
        Self::load(std::fs::File::open(path)?)
    }

    pub fn source(&self) -> AmsAddr {
        AmsAddr::new(self.source_net_id, self.source_port)
    }

    pub fn target(&self) -> AmsAddr {
        AmsAddr::new(self.target_net_id, self.target_port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_symbol_resolution(mut self, symbol_resolution: SymbolResolution) -> Self {
        self.symbol_resolution = symbol_resolution;
        self
    }
}
