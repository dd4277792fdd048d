//! Error types for the keymart facade.

use keymart_buyer::BuyerError;
use keymart_core::CoreError;
use keymart_rpc::RpcError;
use keymart_seller::{SellerError, SeriesError};
use thiserror::Error;

use crate::config::ConfigError;

/// Any error the market components can raise.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("series error: {0}")]
    Series(#[from] SeriesError),

    #[error("seller error: {0}")]
    Seller(#[from] SellerError),

    #[error("buyer error: {0}")]
    Buyer(#[from] BuyerError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, MarketError>;
