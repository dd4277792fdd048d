//! Error types for the seller side.

use keymart_core::{ApiId, CoreError, KeyId};
use keymart_rpc::{errors, RpcError};
use thiserror::Error;

/// Errors raised by a [`KeySeries`](crate::KeySeries).
#[derive(Debug, Error)]
pub enum SeriesError {
    /// `start` was called on a series that was already started.
    #[error("key series already started")]
    AlreadyStarted,

    /// No key has been rotated in yet.
    #[error("key series not started: no active key")]
    NotStarted,

    /// The series was stopped and rotates no more.
    #[error("key series stopped")]
    Stopped,

    /// The key was never issued by this series.
    #[error("key not found: {0}")]
    KeyNotFound(KeyId),

    #[error("rotation interval must be non-zero")]
    InvalidInterval,

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Errors raised while publishing an offer.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The market maker cannot take offers right now; retrying won't help.
    #[error("offer publication aborted: {0}")]
    Unavailable(RpcError),

    /// Every attempt failed.
    #[error("offer publication gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: RpcError },

    /// The seller stopped before the offer was placed.
    #[error("offer publication stopped")]
    Stopped,

    #[error("failed to sign offer: {0}")]
    Signing(#[from] CoreError),
}

/// Errors raised by a [`Seller`](crate::Seller).
#[derive(Debug, Error)]
pub enum SellerError {
    #[error("seller already started")]
    AlreadyStarted,

    /// The seller was stopped and cannot be started again.
    #[error("seller stopped")]
    Stopped,

    /// The api already has a key series.
    #[error("duplicate api: {0}")]
    DuplicateApi(ApiId),

    /// No key series exists for the api.
    #[error("unknown api: {0}")]
    UnknownApi(ApiId),

    #[error("uri {uri} is outside prefix {prefix}")]
    UriOutsidePrefix { uri: String, prefix: String },

    /// No series ever issued this key.
    #[error("unknown key: {0}")]
    UnknownKey(KeyId),

    /// The payment does not cover the key or is not authorized.
    #[error("payment invalid: {0}")]
    PaymentInvalid(String),

    #[error("series error: {0}")]
    Series(#[from] SeriesError),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SellerError {
    /// The error to return to a remote caller of `sell`.
    pub fn into_rpc(self) -> RpcError {
        match self {
            SellerError::UnknownKey(_) => RpcError::application(errors::UNKNOWN_KEY, self.to_string()),
            SellerError::PaymentInvalid(_) => {
                RpcError::application(errors::PAYMENT_INVALID, self.to_string())
            }
            SellerError::Rpc(e) => e,
            other => RpcError::application(errors::INTERNAL, other.to_string()),
        }
    }
}

/// Result type for key series operations.
pub type SeriesResult<T> = std::result::Result<T, SeriesError>;

/// Result type for seller operations.
pub type Result<T> = std::result::Result<T, SellerError>;
