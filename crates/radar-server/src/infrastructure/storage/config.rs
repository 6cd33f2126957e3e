//! TOML configuration for the radar server.
//!
//! Read from `--config <path>` when given, otherwise from the platform
//! config directory:
//! - Windows:  `%APPDATA%\RadarGateway\config.toml`
//! - Linux:    `~/.config/radar-gateway/config.toml`
//! - macOS:    `~/Library/Application Support/RadarGateway/config.toml`
//!
//! A missing file is not an error; every field has a default, so a partial
//! file only needs the values it changes:
//!
//! ```toml
//! [server]
//! port = 1060
//! idle_timeout_secs = 60
//!
//! [protocol]
//! response_timeout_ms = 4000
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::context::EngineSettings;
use crate::infrastructure::network::ConnectionOptions;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but cannot be used.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub advertise: AdvertiseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and per-connection transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port devices connect to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds without an inbound frame before a connection is closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Largest accepted frame length prefix, in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Request/response correlation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
}

/// Address handed to devices in `GetServerResponse`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdvertiseConfig {
    /// Empty: the local address of the socket the request arrived on.
    #[serde(default)]
    pub host: String,
    /// 0: `server.port`.
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    1060
}
fn default_idle_timeout_secs() -> u64 {
    60
}
fn default_max_frame_len() -> usize {
    64 * 1024
}
fn default_event_buffer() -> usize {
    1024
}
fn default_response_timeout_ms() -> u64 {
    4000
}
fn default_max_pending_requests() -> usize {
    50_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_frame_len: default_max_frame_len(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            max_pending_requests: default_max_pending_requests(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Socket address the listener binds.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `server.bind_address` is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .bind_address
            .trim()
            .parse()
            .map_err(|e| ConfigError::Invalid {
                field: "server.bind_address",
                reason: format!("'{}': {e}", self.server.bind_address),
            })?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    pub fn to_engine_settings(&self) -> EngineSettings {
        let host = self.advertise.host.trim();
        EngineSettings {
            response_timeout: Duration::from_millis(self.protocol.response_timeout_ms),
            max_pending_requests: self.protocol.max_pending_requests,
            event_buffer: self.server.event_buffer.max(1),
            advertised_host: (!host.is_empty()).then(|| host.to_string()),
            advertised_port: (self.advertise.port != 0).then_some(self.advertise.port),
        }
    }

    pub fn to_connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            idle_timeout: Duration::from_secs(self.server.idle_timeout_secs),
            max_frame_len: self.server.max_frame_len,
            ..ConnectionOptions::default()
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads `AppConfig` from `path` (or the default path), returning
/// `AppConfig::default()` if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("RadarGateway"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("radar-gateway"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("RadarGateway")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
