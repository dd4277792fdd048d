//! # keymart rpc
//!
//! The network contract of the keymart market.
//!
//! Market components never talk to a socket. They hold a [`Session`], call
//! named procedures through it, and expose their own capabilities as
//! registered [`Procedure`]s. [`memory::MemoryRouter`] connects sessions in
//! one process for tests and embedded deployments.

pub mod error;
pub mod interfaces;
pub mod procedures;
pub mod session;

pub use error::{Result, RpcError};
pub use interfaces::{serve_market_maker, serve_provider, KeyProvider, MarketMaker};
pub use procedures::{
    decode, encode, errors, names, BuyRequest, ChannelLookupRequest, ChannelStatus,
    PaymentChannelInfo, PlaceOfferRequest, PlaceOfferResponse, SellRequest,
};
pub use session::{
    memory, CallDetails, Procedure, Registration, Session, SessionExt, SessionId,
};
