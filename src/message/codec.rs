use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;

/// Serialize a payload for the wire.
///
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Deserialize a payload received from the wire.
///
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    Ok(rmp_serde::from_slice(bytes)?)
}
