//! Payment verification for incoming sales.

use keymart_core::{Ed25519PublicKey, Terms, TokenAmount};
use keymart_rpc::SellRequest;

use crate::error::{Result, SellerError};

/// Decides whether a relayed sale is paid for.
pub trait PaymentVerifier: Send + Sync {
    /// Accept or reject `request` for a key priced at `price`.
    fn verify(&self, request: &SellRequest, price: TokenAmount) -> Result<()>;
}

/// Accepts sales signed by a known market maker that cover the price.
#[derive(Debug, Clone)]
pub struct SignedPaymentVerifier {
    market_maker: Ed25519PublicKey,
}

impl SignedPaymentVerifier {
    pub fn new(market_maker: Ed25519PublicKey) -> Self {
        Self { market_maker }
    }
}

impl PaymentVerifier for SignedPaymentVerifier {
    fn verify(&self, request: &SellRequest, price: TokenAmount) -> Result<()> {
        if request.amount_paid < price {
            return Err(SellerError::PaymentInvalid(format!(
                "paid {} below price {}",
                request.amount_paid, price
            )));
        }
        request
            .terms()
            .verify(&self.market_maker, &request.signature)
            .map_err(|e| SellerError::PaymentInvalid(e.to_string()))
    }
}
