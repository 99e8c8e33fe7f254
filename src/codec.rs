//! Codec
//!
//! Encodes values into self-describing JSON content and back.
//!
//! ## Content Format
//! ```text
//! { "$type": "<discriminator>", ...fields, "e_tag": "<token>" (versioned only) }
//! ```
//!
//! The discriminator is mandatory in both directions: a value that would be
//! stored without one is rejected, and content without one is never decoded
//! structurally.

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::item::{StoreValue, TYPE_FIELD};

/// Encode a value into record content
pub fn encode<T: StoreValue>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)
        .map_err(|e| StoreError::Serialization(format!("Failed to encode value: {}", e)))?;

    discriminator(&json).ok_or_else(|| {
        StoreError::Serialization(format!(
            "Value does not carry a string {:?} discriminator",
            TYPE_FIELD
        ))
    })?;

    serde_json::to_string(&json)
        .map_err(|e| StoreError::Serialization(format!("Failed to encode value: {}", e)))
}

/// Decode record content
///
/// Returns `Ok(None)` when the content is JSON `null`.
pub fn decode<T: StoreValue>(content: &str) -> Result<Option<T>> {
    let json: Value = serde_json::from_str(content)
        .map_err(|e| StoreError::Serialization(format!("Malformed record content: {}", e)))?;

    if json.is_null() {
        return Ok(None);
    }

    let kind = discriminator(&json)
        .ok_or_else(|| {
            StoreError::Serialization(format!(
                "Record content has no {:?} discriminator",
                TYPE_FIELD
            ))
        })?
        .to_string();

    serde_json::from_value(json)
        .map(Some)
        .map_err(|e| StoreError::Serialization(format!("Failed to decode {}: {}", kind, e)))
}

/// ETag of a decoded value, if it is versioned and has one
pub fn stored_e_tag<T: StoreValue>(value: &T) -> Option<String> {
    value
        .as_store_item()
        .and_then(|item| item.e_tag())
        .map(str::to_string)
}

fn discriminator(json: &Value) -> Option<&str> {
    json.as_object()?.get(TYPE_FIELD)?.as_str()
}
