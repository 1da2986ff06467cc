use std::fmt;

use thiserror::Error;

/// Which of the three transport timeouts fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Read,
    Write,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("Connect"),
            Self::Read => f.write_str("Read"),
            Self::Write => f.write_str("Write"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} timeout exceeded")]
    Timeout(TimeoutKind),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] tarn_protocol::Error),

    #[error("Request failed ({code}): {message}")]
    RequestFailed { code: u32, message: String },

    #[error("Authentication failed ({code}): {message}")]
    Authentication { code: u32, message: String },

    #[error("Space '{0}' not found")]
    SpaceNotFound(String),

    #[error("Index '{name}' not found in space {space_id}")]
    IndexNotFound { space_id: u32, name: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Failures that may succeed when the request is issued again, possibly
    /// on a fresh connection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io(_) | Self::Timeout(_) | Self::ConnectionClosed
        )
    }

    /// Failures after which the physical connection can no longer be trusted.
    pub(crate) fn breaks_connection(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::ConnectionClosed
                | Self::InvalidFrame(_)
                | Self::Timeout(TimeoutKind::Write)
        )
    }

    /// Copy of a connection-level error, handed to every waiter of a dead
    /// connection.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Connect { address, source } => Self::Connect {
                address: address.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::Timeout(kind) => Self::Timeout(*kind),
            Self::ConnectionClosed => Self::ConnectionClosed,
            Self::InvalidFrame(msg) => Self::InvalidFrame(msg.clone()),
            Self::Protocol(e) => Self::Protocol(e.clone()),
            Self::RequestFailed { code, message } => Self::RequestFailed {
                code: *code,
                message: message.clone(),
            },
            Self::Authentication { code, message } => Self::Authentication {
                code: *code,
                message: message.clone(),
            },
            Self::SpaceNotFound(name) => Self::SpaceNotFound(name.clone()),
            Self::IndexNotFound { space_id, name } => Self::IndexNotFound {
                space_id: *space_id,
                name: name.clone(),
            },
            Self::Config(msg) => Self::Config(msg.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
