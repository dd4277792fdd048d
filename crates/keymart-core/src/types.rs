//! Strong type definitions for keymart.
//!
//! All identifiers are newtypes to prevent misuse at compile time. They are
//! 16 random bytes and display in UUID form, which is how they show up in
//! logs and on the market maker.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "crate::fixed_bytes")] pub [u8; 16]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Generate a fresh identifier from the OS-seeded CSPRNG.
            pub fn random() -> Self {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                let arr: [u8; 16] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// The all-zero identifier.
            pub const ZERO: Self = Self([0u8; 16]);
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), uuid::Uuid::from_bytes(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", uuid::Uuid::from_bytes(self.0))
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            /// Parse the UUID form, hyphenated or simple.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(*uuid::Uuid::parse_str(s)?.as_bytes()))
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 16]> for $name {
            fn from(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; 16] = slice.try_into()?;
                Ok(Self(arr))
            }
        }
    };
}

define_id!(
    /// Identifier of one rotation epoch's symmetric data key.
    ///
    /// Unique per key series; a series never reuses an id.
    KeyId
);

define_id!(
    /// Identifier of a sellable API or data stream.
    ApiId
);

define_id!(
    /// Identifier of an off-chain payment channel.
    ChannelId
);

define_id!(
    /// Identifier the market maker assigns to a placed offer.
    OfferId
);

/// Amount of market tokens, in the smallest unit.
pub type TokenAmount = u64;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Get current time in milliseconds.
pub fn now_millis() -> Timestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}
