//! Coordination Client Error Hierarchy
//!
//! Errors are split by the layer that produced them: transient transport
//! failures, logical failures reported by the coordination service, payload
//! codec failures and local misuse of the client.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport/session level failures, retried by the session
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Logical failures reported by the coordination service
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// Payload encode/decode failures, never swallowed
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// Configuration source loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Malformed node path supplied by the caller
    #[error("Invalid node path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// The client is switched off by `enable = false`
    #[error("Coordination client is disabled by configuration")]
    Disabled,

    /// The owning session has been closed
    #[error("Session is closed")]
    SessionClosed,

    /// Release called on a lock handle that holds nothing
    #[error("Lock `{0}` is not held by this handle")]
    LockNotHeld(String),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Connection to the ensemble dropped while a request was in flight
    #[error("Connection to the coordination service was lost")]
    ConnectionLoss,

    /// A single attempt exceeded its deadline
    #[error("Operation `{operation}` timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Nothing to connect to
    #[error("No coordination server address configured")]
    NoServers,

    /// Retry policy exhaustion
    #[error("Operation `{operation}` failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: usize,
        last_error: String,
    },

    /// The service dropped the session, ephemeral state is gone
    #[error("Session {0:#x} expired")]
    SessionExpired(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Version mismatch on {path} (expected {expected}, actual {actual})")]
    BadVersion {
        path: String,
        expected: i32,
        actual: i32,
    },

    #[error("Not authorized to access {0}")]
    NoAuth(String),

    #[error("Invalid ACL for {0}")]
    InvalidAcl(String),

    #[error("Ephemeral node {0} cannot have children")]
    NoChildrenForEphemerals(String),

    #[error("Bad arguments: {0}")]
    BadArguments(String),
}

// Serialization is classified separately from service failures
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Protobuf decoding failed: {0}")]
    ProstDecode(#[from] prost::DecodeError),

    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),
}

impl Error {
    /// Whether the failure is a transport hiccup worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Connection(
                ConnectionError::ConnectionLoss
                    | ConnectionError::Timeout { .. }
                    | ConnectionError::RetryExhausted { .. }
            )
        )
    }

    /// Whether a single attempt may be re-issued right away by the retry loop.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError::ConnectionLoss | ConnectionError::Timeout { .. })
        )
    }

    /// Logical absence of the addressed node.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Coordination(CoordinationError::NoNode(_)))
    }

    pub fn is_node_exists(&self) -> bool {
        matches!(self, Error::Coordination(CoordinationError::NodeExists(_)))
    }

    pub fn is_not_empty(&self) -> bool {
        matches!(self, Error::Coordination(CoordinationError::NotEmpty(_)))
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::Serialization(SerializationError::ProstDecode(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(SerializationError::Bincode(e))
    }
}
