//! Error types for the buyer side.

use keymart_core::{CoreError, KeyId};
use keymart_rpc::RpcError;
use thiserror::Error;

/// Errors raised by a [`Buyer`](crate::Buyer).
#[derive(Debug, Error)]
pub enum BuyerError {
    #[error("buyer already started")]
    AlreadyStarted,

    /// `unwrap` was called before a successful `start`.
    #[error("buyer not started")]
    NotStarted,

    /// The market maker knows no channel for this buyer.
    #[error("no payment channel for {0}")]
    NoChannel(String),

    #[error("payment channel not open")]
    ChannelNotOpen,

    #[error("payment channel has no balance")]
    NoBalance,

    /// The advisory balance cannot cover another purchase.
    #[error("insufficient channel balance: have {balance}, need {amount}")]
    InsufficientBalance { balance: u64, amount: u64 },

    /// The purchased key envelope did not open with our receive key.
    #[error("failed to unseal key {0}")]
    Unseal(KeyId),

    /// The payload does not authenticate under its key.
    #[error("failed to decrypt payload under key {0}")]
    Decrypt(KeyId),

    #[error("failed to deserialize payload: {0}")]
    Deserialization(String),

    #[error("unsupported serialization: {0}")]
    UnsupportedSerialization(String),

    /// Another caller's purchase of the key failed.
    #[error("purchase of key {key_id} failed: {reason}")]
    PurchaseFailed { key_id: KeyId, reason: String },

    /// Another caller's purchase of the key was cancelled.
    #[error("purchase of key {0} aborted")]
    PurchaseAborted(KeyId),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for buyer operations.
pub type Result<T> = std::result::Result<T, BuyerError>;
