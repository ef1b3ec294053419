//! Record codec.
//!
//! Collection and document records are serde values; the physical encoding
//! behind the store is JSON. Decode failures surface as
//! [`XylemError::Corrupt`] with the offending key so operators can find
//! the damaged record.

use serde::Serialize;
use serde::de::DeserializeOwned;
use xylem_error::{Result, XylemError};

/// Encode a record for storage.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| XylemError::Corrupt {
        key: "<encode>".to_string(),
        detail: e.to_string(),
    })
}

/// Decode a record fetched under `keyb`.
pub fn decode<T: DeserializeOwned>(keyb: &[u8], bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| XylemError::Corrupt {
        key: String::from_utf8_lossy(keyb).into_owned(),
        detail: e.to_string(),
    })
}
