//! JSON Canonicalization Scheme (RFC 8785).
//!
//! Every byte string that gets signed or hashed in this crate goes through
//! here, so two parties serialising the same mandate always agree on the
//! bytes regardless of field order or whitespace.

use anyhow::{Context, Result};
use serde::Serialize;

/// Serialize a value to JCS (RFC 8785) canonical JSON bytes.
///
/// # Example
///
/// ```
/// use ap2_mandate::crypto::jcs;
/// use serde_json::json;
///
/// let value = json!({"b": 2, "a": 1});
/// let bytes = jcs::to_vec(&value).unwrap();
/// assert_eq!(bytes, br#"{"a":1,"b":2}"#);
/// ```
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_jcs::to_vec(value).context("failed to serialize canonical json")
}

/// Serialize to a JCS canonical JSON string.
pub fn to_string<T: Serialize>(value: &T) -> Result<String> {
    serde_jcs::to_string(value).context("failed to serialize canonical json string")
}
