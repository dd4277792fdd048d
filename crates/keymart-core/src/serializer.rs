//! Payload serialization tags.
//!
//! Encrypted payloads travel with a tag naming how the plaintext was
//! serialized. Only CBOR is supported.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// A payload serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSerializer {
    Cbor,
}

impl PayloadSerializer {
    /// The wire tag for this serializer.
    pub const fn tag(&self) -> &'static str {
        match self {
            PayloadSerializer::Cbor => "cbor",
        }
    }

    /// Serialize a payload.
    pub fn encode<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Vec<u8>> {
        match self {
            PayloadSerializer::Cbor => {
                let mut buf = Vec::new();
                ciborium::into_writer(payload, &mut buf)
                    .map_err(|e| CoreError::Encoding(e.to_string()))?;
                Ok(buf)
            }
        }
    }

    /// Deserialize a payload.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            PayloadSerializer::Cbor => {
                ciborium::from_reader(bytes).map_err(|e| CoreError::Decoding(e.to_string()))
            }
        }
    }
}

impl FromStr for PayloadSerializer {
    type Err = CoreError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "cbor" => Ok(PayloadSerializer::Cbor),
            other => Err(CoreError::UnsupportedSerializer(other.to_string())),
        }
    }
}

impl fmt::Display for PayloadSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
