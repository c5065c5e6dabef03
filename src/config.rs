//! Configuration for the Tor control connection.
//!
//! This module provides configuration options for connecting to and
//! interacting with the Tor control port.

use crate::auth::AuthCredential;
use crate::error::{Result, TorControlError};
use crate::protocol::DEFAULT_MAX_LINE_LENGTH;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable holding the control address.
pub const ENV_ADDRESS: &str = "TOR_CONTROL_ADDR";
/// Environment variable holding the control password.
pub const ENV_PASSWORD: &str = "TOR_CONTROL_PASSWORD";
/// Environment variable holding the cookie file path.
pub const ENV_COOKIE: &str = "TOR_CONTROL_COOKIE";

/// Default Tor control port.
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Configuration for connecting to Tor's control port.
#[derive(Debug, Clone)]
pub struct TorControlConfig {
    /// The address to connect to.
    pub address: ConnectionAddress,
    /// Authentication credentials.
    pub auth: AuthCredential,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long a command waits for its reply.
    pub command_timeout: Duration,
    /// Longest line accepted from the daemon.
    pub max_line_length: usize,
}

impl Default for TorControlConfig {
    fn default() -> Self {
        Self {
            address: ConnectionAddress::default(),
            auth: AuthCredential::None,
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl TorControlConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from `TOR_CONTROL_ADDR`, `TOR_CONTROL_PASSWORD`
    /// and `TOR_CONTROL_COOKIE`. Unset variables keep their defaults; a
    /// password wins over a cookie.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(address) = lookup(ENV_ADDRESS).filter(|s| !s.is_empty()) {
            config.address = address.parse()?;
        }
        if let Some(password) = lookup(ENV_PASSWORD).filter(|s| !s.is_empty()) {
            config.auth = AuthCredential::Password(password);
        } else if let Some(cookie) = lookup(ENV_COOKIE).filter(|s| !s.is_empty()) {
            config.auth = AuthCredential::CookieFile(PathBuf::from(cookie));
        }

        Ok(config)
    }

    /// Set the connection address.
    pub fn address(mut self, address: ConnectionAddress) -> Self {
        self.address = address;
        self
    }

    /// Connect to a TCP address.
    pub fn tcp(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.address = ConnectionAddress::Tcp(addr.into());
        self
    }

    /// Connect to a Unix socket.
    pub fn unix(mut self, path: impl Into<PathBuf>) -> Self {
        self.address = ConnectionAddress::Unix(path.into());
        self
    }

    /// Set authentication credentials.
    pub fn auth(mut self, auth: AuthCredential) -> Self {
        self.auth = auth;
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.auth = AuthCredential::Password(password.into());
        self
    }

    /// Set cookie file authentication.
    pub fn cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth = AuthCredential::CookieFile(path.into());
        self
    }

    /// Set safe cookie authentication.
    pub fn safe_cookie(mut self, cookie_path: impl Into<PathBuf>) -> Self {
        self.auth = AuthCredential::SafeCookie {
            cookie_path: cookie_path.into(),
        };
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the default command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the longest line accepted from the daemon.
    pub fn max_line_length(mut self, bytes: usize) -> Self {
        self.max_line_length = bytes;
        self
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout.is_zero() {
            return Err(TorControlError::Configuration(
                "Command timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_line_length < 64 {
            return Err(TorControlError::Configuration(format!(
                "Maximum line length {} is too small",
                self.max_line_length
            )));
        }
        Ok(())
    }
}

/// The address to connect to for the control port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAddress {
    /// TCP socket address.
    Tcp(SocketAddr),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl Default for ConnectionAddress {
    fn default() -> Self {
        ConnectionAddress::Tcp(SocketAddr::from(([127, 0, 0, 1], DEFAULT_CONTROL_PORT)))
    }
}

impl ConnectionAddress {
    /// Create a TCP connection address.
    pub fn tcp(addr: impl Into<SocketAddr>) -> Self {
        ConnectionAddress::Tcp(addr.into())
    }

    /// Create a Unix socket connection address.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ConnectionAddress::Unix(path.into())
    }
}

impl FromStr for ConnectionAddress {
    type Err = TorControlError;

    /// Supports `host:port` for TCP and `unix:/path/to/socket` for Unix sockets.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(TorControlError::Configuration(
                    "Unix socket address without a path".to_string(),
                ));
            }
            Ok(ConnectionAddress::Unix(PathBuf::from(path)))
        } else {
            s.parse::<SocketAddr>()
                .map(ConnectionAddress::Tcp)
                .map_err(|e| TorControlError::Configuration(format!("Invalid address '{}': {}", s, e)))
        }
    }
}

impl std::fmt::Display for ConnectionAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionAddress::Tcp(addr) => write!(f, "{}", addr),
            ConnectionAddress::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}
