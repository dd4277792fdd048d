//! Error types for remote procedure calls.

use thiserror::Error;

/// Errors that can occur when calling or serving a remote procedure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Nothing is registered under the called name.
    #[error("no such procedure: {0}")]
    NoSuchProcedure(String),

    /// The callee exists but does not implement this operation.
    #[error("procedure not supported: {0}")]
    NotSupported(String),

    /// The session's transport went away.
    #[error("transport lost")]
    TransportLost,

    /// Another handler already owns this name.
    #[error("procedure already registered: {0}")]
    AlreadyRegistered(String),

    /// The remote handler ran and failed.
    #[error("application error ({error}): {message}")]
    Application { error: String, message: String },

    /// Arguments or results could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl RpcError {
    /// Build an application error with an error URI.
    pub fn application(error: impl Into<String>, message: impl Into<String>) -> Self {
        RpcError::Application {
            error: error.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same call cannot help: the procedure is missing
    /// or unsupported, or the transport is gone.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RpcError::NoSuchProcedure(_) | RpcError::NotSupported(_) | RpcError::TransportLost
        )
    }
}

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;
