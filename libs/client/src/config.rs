//! Client configuration
//!
//! Everything the transport and the middleware chain need to be built.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::middleware::RetryPolicy;

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `host:port`
    Tcp(String),
    /// Path of a Unix domain socket
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse `tcp://host:port`, `unix:///path/to.sock` or a bare `host:port`.
    pub fn parse(s: &str) -> Result<Self> {
        let endpoint = if let Some(path) = s.strip_prefix("unix://") {
            Self::Unix(PathBuf::from(path))
        } else {
            Self::Tcp(s.strip_prefix("tcp://").unwrap_or(s).to_string())
        };
        endpoint.validate()?;
        Ok(endpoint)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Tcp(address) if !address.contains(':') => Err(Error::config(format!(
                "TCP address '{address}' has no port"
            ))),
            Self::Unix(path) if path.as_os_str().is_empty() => {
                Err(Error::config("Unix socket path is empty"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(address) => write!(f, "tcp://{address}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Main configuration for a client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------
    pub endpoint: Endpoint,

    /// Bound on establishing the connection, greeting included
    pub connect_timeout: Option<Duration>,

    /// How long a request waits for its response
    pub read_timeout: Option<Duration>,

    /// How long writing one frame may take
    pub write_timeout: Option<Duration>,

    pub tcp_nodelay: bool,

    /// Keep the connection open between calls. When false the connection is
    /// closed after each call that leaves nothing in flight.
    pub persistent: bool,

    // -------------------------------------------------------------------------
    // Middleware
    // -------------------------------------------------------------------------
    /// Retries of transient failures; 0 disables the retry middleware
    pub max_retries: u32,

    pub retry_policy: RetryPolicy,

    /// Enables authentication when set
    pub username: Option<String>,

    pub password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Tcp("127.0.0.1:3301".to_string()),
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
            tcp_nodelay: true,
            persistent: true,
            max_retries: 0,
            retry_policy: RetryPolicy::Linear(Duration::from_millis(100)),
            username: None,
            password: None,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoint.validate()?;
        if self.password.is_some() && self.username.is_none() {
            return Err(Error::config("password given without a username"));
        }
        if matches!(&self.username, Some(user) if user.is_empty()) {
            return Err(Error::config("username is empty"));
        }
        Ok(())
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.endpoint = endpoint;
        self
    }

    /// Connect over TCP to `host:port`
    pub fn tcp(mut self, address: impl Into<String>) -> Self {
        self.config.endpoint = Endpoint::Tcp(address.into());
        self
    }

    /// Connect over a Unix domain socket
    pub fn unix(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.endpoint = Endpoint::Unix(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.config.tcp_nodelay = nodelay;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.config.persistent = persistent;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Authenticate as `username` with `password`
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Authenticate as a user that has no password
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
