//! Configuration management for RAX FTP Server
//!
//! Loaded once at startup from `config.toml` with `RAX_FTP_` environment
//! overrides (`RAX_FTP_SERVER__CONTROL_PORT=2121`,
//! `RAX_FTP_LIMITS__MAX_CLIENTS=50`). Every section has defaults, so a
//! partial file is enough.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::middleware::rate_limit::UNLIMITED;

/// Complete server configuration
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: StartupConfig,
    pub limits: RuntimeConfig,
    pub users: Vec<UserConfig>,
}

/// Network, filesystem and protocol settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StartupConfig {
    // ═══ NETWORK INFRASTRUCTURE ═══
    /// IP address to bind the FTP control connection
    pub bind_address: String,

    /// Port for FTP control connection; 0 picks an ephemeral port
    pub control_port: u16,

    /// Port range for PASV data connections; a minimum of 0 means ephemeral
    pub data_port_min: u16,
    pub data_port_max: u16,

    /// Root directory for FTP operations
    pub server_root: String,

    // ═══ INTERNAL BEHAVIOR ═══
    /// Buffer size for file transfers
    pub buffer_size: usize,

    /// Connection timeout for data channels
    pub connection_timeout_secs: u64,

    /// Control connection idle timeout; 0 disables it
    pub idle_timeout_secs: u64,

    /// Maximum FTP command length
    pub max_command_length: usize,

    pub max_username_length: usize,
    pub min_client_port: u16,

    // ═══ TRANSFER ENCODING ═══
    /// Charset of files stored under `server_root`
    pub local_charset: String,

    /// Payload size of outgoing block-mode blocks
    pub block_size: usize,

    /// Bytes between restart markers on block-mode downloads; 0 disables
    pub restart_marker_interval: u64,
}

/// Server-wide limits
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum concurrent clients
    pub max_clients: usize,

    /// Maximum file upload size in MB
    pub max_file_size_mb: u64,

    /// Default transfer ceilings in KB/s, -1 for unlimited
    pub max_upload_rate_kbps: i64,
    pub max_download_rate_kbps: i64,

    /// Refuse STOR over an existing file
    pub unique_required: bool,
}

/// A user account
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UserConfig {
    pub name: String,
    pub password: String,

    /// Home directory relative to the server root
    pub home: String,

    pub writable: bool,
    pub max_upload_rate_kbps: Option<i64>,
    pub max_download_rate_kbps: Option<i64>,

    /// Storage quota for the home directory in MB
    pub quota_mb: Option<u64>,
}

impl ServerConfig {
    /// Load configuration from config.toml with environment overrides
    pub fn load() -> Result<Self, config::ConfigError> {
        // Try production path first, then development path
        let config_paths = [
            "rax-ftp-server/config", // Docker production: /app/rax-ftp-server/config.toml
            "config",                // Local development: ./config.toml
        ];

        let mut last_error = None;

        for config_path in &config_paths {
            match Config::builder()
                .add_source(File::with_name(config_path))
                .add_source(
                    Environment::with_prefix("RAX_FTP")
                        .prefix_separator("_")
                        .separator("__")
                        .try_parsing(true),
                )
                .build()
            {
                Ok(settings) => {
                    let config: ServerConfig = settings.try_deserialize()?;
                    config.validate()?;
                    return Ok(config);
                }
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            }
        }

        Err(config::ConfigError::Message(format!(
            "Failed to load config.toml from any location. Tried: {config_paths:?}. Last error: {last_error:?}"
        )))
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let server = &self.server;

        if server.data_port_min != 0 {
            if server.data_port_min >= server.data_port_max {
                return Err(config::ConfigError::Message(
                    "data_port_min must be less than data_port_max".into(),
                ));
            }

            if server.data_port_max - server.data_port_min < 10 {
                return Err(config::ConfigError::Message(
                    "Data port range too small (need at least 10 ports)".into(),
                ));
            }
        }

        if server.server_root.is_empty() {
            return Err(config::ConfigError::Message(
                "server_root cannot be empty".into(),
            ));
        }

        if server.block_size == 0 || server.block_size > u16::MAX as usize {
            return Err(config::ConfigError::Message(
                "block_size must be between 1 and 65535".into(),
            ));
        }

        if server.buffer_size == 0 {
            return Err(config::ConfigError::Message(
                "buffer_size must be greater than 0".into(),
            ));
        }

        if self.limits.max_clients == 0 {
            return Err(config::ConfigError::Message(
                "max_clients must be greater than 0".into(),
            ));
        }

        if self.limits.max_file_size_mb == 0 {
            return Err(config::ConfigError::Message(
                "max_file_size_mb must be greater than 0".into(),
            ));
        }

        for user in &self.users {
            if user.name.is_empty() || user.name.len() > server.max_username_length {
                return Err(config::ConfigError::Message(format!(
                    "Invalid user name '{}'",
                    user.name
                )));
            }
            if user.home.contains("..") {
                return Err(config::ConfigError::Message(format!(
                    "Home directory of '{}' escapes the server root",
                    user.name
                )));
            }
        }

        Ok(())
    }

    pub fn find_user(&self, name: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.name == name)
    }
}

impl StartupConfig {
    /// Get bind address and control port as socket address
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.control_port)
    }

    /// Get data port range for PASV mode, `None` for ephemeral ports
    pub fn data_port_range(&self) -> Option<std::ops::RangeInclusive<u16>> {
        (self.data_port_min != 0).then(|| self.data_port_min..=self.data_port_max)
    }

    /// Get server root as PathBuf
    pub fn server_root_path(&self) -> PathBuf {
        PathBuf::from(&self.server_root)
    }

    /// Get connection timeout as Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl RuntimeConfig {
    /// Get maximum file size in bytes
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl UserConfig {
    pub fn upload_rate(&self, limits: &RuntimeConfig) -> i64 {
        self.max_upload_rate_kbps.unwrap_or(limits.max_upload_rate_kbps)
    }

    pub fn download_rate(&self, limits: &RuntimeConfig) -> i64 {
        self.max_download_rate_kbps.unwrap_or(limits.max_download_rate_kbps)
    }

    pub fn quota_bytes(&self) -> Option<u64> {
        self.quota_mb.map(|mb| mb * 1024 * 1024)
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            control_port: 2121,
            data_port_min: 0,
            data_port_max: 0,
            server_root: "server_root".into(),
            buffer_size: 8192,
            connection_timeout_secs: 10,
            idle_timeout_secs: 300,
            max_command_length: 512,
            max_username_length: 32,
            min_client_port: 1024,
            local_charset: "UTF-8".into(),
            block_size: 8192,
            restart_marker_interval: 0,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_clients: 10,
            max_file_size_mb: 100,
            max_upload_rate_kbps: UNLIMITED,
            max_download_rate_kbps: UNLIMITED,
            unique_required: false,
        }
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            password: String::new(),
            home: String::new(),
            writable: true,
            max_upload_rate_kbps: None,
            max_download_rate_kbps: None,
            quota_mb: None,
        }
    }
}
