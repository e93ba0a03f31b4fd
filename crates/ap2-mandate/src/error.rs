//! Error taxonomy for mandate construction, signing and verification.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Mandate construction and validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MandateError {
    #[error("invalid validity window: expires_at={expires_at} is not after created_at={created_at}")]
    InvalidValidity {
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("mandate {id} references itself as parent")]
    SelfReference { id: String },

    #[error("cart item {item_id}: quantity must be positive")]
    NonPositiveQuantity { item_id: String },

    #[error("cart item {item_id}: unit price {unit_price} is negative")]
    NegativePrice { item_id: String, unit_price: Decimal },

    #[error("{field} {amount} is negative")]
    NegativeAmount { field: &'static str, amount: Decimal },

    #[error("cart item {item_id} not found")]
    ItemNotFound { item_id: String },

    #[error("mandate {id} is signed and can no longer be modified")]
    AlreadySigned { id: String },

    #[error("cart amount {claimed} does not match item total {computed}")]
    AmountNotDerived { claimed: Decimal, computed: Decimal },

    #[error("cart total overflows at item {item_id}")]
    AmountOverflow { item_id: String },

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("cart already contains item {item_id}")]
    DuplicateItem { item_id: String },

    #[error("mandate {id} must name a receiving agent")]
    MissingReceivingAgent { id: String },
}

/// Signature capability errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signing key not found: {key_id}")]
    KeyNotFound { key_id: String },

    #[error("failed to canonicalize credential: {reason}")]
    Canonicalization { reason: String },

    #[error("key error: {reason}")]
    Key { reason: String },
}

/// The kind of check a mandate failed.
///
/// Every verification failure maps onto exactly one kind; callers that only
/// need a verdict collapse these to a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// Missing proof, or the proof does not validate.
    SignatureInvalid,
    /// `expires_at <= now`.
    MandateExpired,
    /// Merchant, category or amount outside the intent's bounds.
    MandateScopeViolation,
    /// Parent reference does not match the mandate it is checked against.
    ChainMismatch,
    /// Amount, currency, merchant or payment method differs from the request.
    ValueMismatch,
    /// No applicable mandate could be found or obtained.
    MandateNotFound,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::MandateExpired => "MANDATE_EXPIRED",
            Self::MandateScopeViolation => "MANDATE_SCOPE_VIOLATION",
            Self::ChainMismatch => "CHAIN_MISMATCH",
            Self::ValueMismatch => "VALUE_MISMATCH",
            Self::MandateNotFound => "MANDATE_NOT_FOUND",
        }
    }

    /// Exit code for CLI reporting.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MandateNotFound => 2,
            Self::SignatureInvalid => 3,
            Self::MandateExpired
            | Self::MandateScopeViolation
            | Self::ChainMismatch
            | Self::ValueMismatch => 4,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment request was rejected because of a specific mandate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("mandate {mandate_id} violated ({violation_type}): {reason}")]
pub struct MandateViolation {
    pub mandate_id: String,
    pub violation_type: ViolationKind,
    pub reason: String,
}

impl MandateViolation {
    pub fn new(
        mandate_id: impl Into<String>,
        violation_type: ViolationKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            mandate_id: mandate_id.into(),
            violation_type,
            reason: reason.into(),
        }
    }

    /// No mandate with this id (or none at all, for an empty id) was usable.
    pub fn not_found(mandate_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(mandate_id, ViolationKind::MandateNotFound, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ViolationKind::ChainMismatch).unwrap(),
            "\"CHAIN_MISMATCH\""
        );
        assert_eq!(
            serde_json::to_string(&ViolationKind::MandateScopeViolation).unwrap(),
            "\"MANDATE_SCOPE_VIOLATION\""
        );
        for kind in [
            ViolationKind::SignatureInvalid,
            ViolationKind::MandateExpired,
            ViolationKind::ValueMismatch,
            ViolationKind::MandateNotFound,
        ] {
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
    }

    #[test]
    fn test_violation_display() {
        let v = MandateViolation::new("cart-1", ViolationKind::ValueMismatch, "amount differs");
        assert_eq!(
            v.to_string(),
            "mandate cart-1 violated (VALUE_MISMATCH): amount differs"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ViolationKind::MandateNotFound.exit_code(), 2);
        assert_eq!(ViolationKind::SignatureInvalid.exit_code(), 3);
        assert_eq!(ViolationKind::ValueMismatch.exit_code(), 4);
    }
}
