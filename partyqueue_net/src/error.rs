// Error types for partyqueue_net.

use std::io;
use std::path::PathBuf;

use partyqueue_protocol::ConnectionId;
use thiserror::Error;

use crate::discovery::EndpointId;

/// Main error type for session operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Connect(#[from] ConnectFailed),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The session's event loop has exited and can no longer take commands.
    #[error("session has shut down")]
    SessionStopped,

    /// A scan ended before any host was picked.
    #[error("scan ended without selecting a host")]
    NoHostSelected,
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures on a single connection channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Send attempted on a channel that is already closed. Callers must treat
    /// this as a bug in their own control flow.
    #[error("channel to {peer} is closed")]
    Closed { peer: ConnectionId },

    /// The encoded message does not fit in one frame. Nothing was written and
    /// the channel stays open.
    #[error("message to {peer} is {len} bytes, limit is {max}")]
    TooLarge {
        peer: ConnectionId,
        len: usize,
        max: usize,
    },

    /// The transport failed. The channel has already reported `Disconnected`
    /// to its owner and is now closed.
    #[error("transport error on {peer}: {source}")]
    Io {
        peer: ConnectionId,
        #[source]
        source: io::Error,
    },
}

/// A client-side connect attempt failed. Never retried automatically.
#[derive(Debug, Error)]
#[error("failed to connect to {endpoint}: {source}")]
pub struct ConnectFailed {
    pub endpoint: EndpointId,
    #[source]
    pub source: io::Error,
}

/// Advertising or scanning could not be set up.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to bind {what} socket: {source}")]
    Bind {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("socket setup failed: {0}")]
    Socket(#[from] io::Error),
}

/// Configuration file problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Errors reported by the external catalog collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("track not found: {0}")]
    NotFound(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}
