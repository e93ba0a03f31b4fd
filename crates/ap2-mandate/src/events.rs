//! Mandate lifecycle CloudEvents.
//!
//! # Event Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | `ap2.mandate.verified.v1` | One stage of a chain passed |
//! | `ap2.mandate.rejected.v1` | A stage failed; carries the violation kind |
//! | `ap2.mandate.revoked.v1` | Revocation |
//! | `ap2.payment.authorized.v1` | Whole chain verified for a request |

use crate::error::{MandateViolation, ViolationKind};
use crate::mandate::MandateKind;
use crate::verifier::ChainAuthorization;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// CloudEvents type for a passed verification stage.
pub const EVENT_TYPE_MANDATE_VERIFIED: &str = "ap2.mandate.verified.v1";

/// CloudEvents type for a rejected mandate.
pub const EVENT_TYPE_MANDATE_REJECTED: &str = "ap2.mandate.rejected.v1";

/// CloudEvents type for mandate revocation.
pub const EVENT_TYPE_MANDATE_REVOKED: &str = "ap2.mandate.revoked.v1";

/// CloudEvents type for an authorised payment.
pub const EVENT_TYPE_PAYMENT_AUTHORIZED: &str = "ap2.payment.authorized.v1";

/// Default event source.
pub const DEFAULT_EVENT_SOURCE: &str = "urn:ap2:enforcer";

/// CloudEvents envelope for mandate events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MandateEvent<T> {
    /// CloudEvents spec version (always "1.0")
    pub specversion: String,

    /// Unique event ID
    pub id: String,

    #[serde(rename = "type")]
    pub type_: String,

    pub source: String,

    pub time: DateTime<Utc>,

    /// Content type (always "application/json")
    pub datacontenttype: String,

    /// Mandate the event is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    pub data: T,
}

/// Type-erased event, as written by audit sinks.
pub type AuditEvent = MandateEvent<Value>;

impl<T> MandateEvent<T> {
    /// Create an event with a fresh UUID and the current time.
    pub fn new(type_: impl Into<String>, source: impl Into<String>, data: T) -> Self {
        Self {
            specversion: "1.0".to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            type_: type_.into(),
            source: source.into(),
            time: Utc::now(),
            datacontenttype: "application/json".to_string(),
            subject: None,
            data,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set explicit timestamp.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl<T: Serialize> MandateEvent<T> {
    /// Erase the payload type.
    pub fn into_audit_event(self) -> Result<AuditEvent, serde_json::Error> {
        Ok(MandateEvent {
            specversion: self.specversion,
            id: self.id,
            type_: self.type_,
            source: self.source,
            time: self.time,
            datacontenttype: self.datacontenttype,
            subject: self.subject,
            data: serde_json::to_value(self.data)?,
        })
    }
}

/// A verification stage passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandateVerifiedPayload {
    pub mandate_id: String,
    pub mandate_kind: MandateKind,
    pub request_ref: String,
    pub verified_at: DateTime<Utc>,
}

/// A mandate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandateRejectedPayload {
    pub mandate_id: String,
    pub violation_type: ViolationKind,
    pub reason: String,
    pub request_ref: String,
    pub rejected_at: DateTime<Utc>,
}

impl MandateRejectedPayload {
    pub fn from_violation(
        violation: &MandateViolation,
        request_ref: impl Into<String>,
        rejected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            mandate_id: violation.mandate_id.clone(),
            violation_type: violation.violation_type,
            reason: violation.reason.clone(),
            request_ref: request_ref.into(),
            rejected_at,
        }
    }
}

/// Mandate revocation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandateRevokedPayload {
    pub mandate_id: String,
    pub revoked_at: DateTime<Utc>,
    pub reason: String,
}

/// Whole chain verified for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAuthorizedPayload {
    #[serde(flatten)]
    pub authorization: ChainAuthorization,
    pub request_ref: String,
}

pub fn mandate_verified_event(
    source: impl Into<String>,
    payload: MandateVerifiedPayload,
) -> MandateEvent<MandateVerifiedPayload> {
    let subject = payload.mandate_id.clone();
    let time = payload.verified_at;
    MandateEvent::new(EVENT_TYPE_MANDATE_VERIFIED, source, payload)
        .with_time(time)
        .with_subject(subject)
}

pub fn mandate_rejected_event(
    source: impl Into<String>,
    payload: MandateRejectedPayload,
) -> MandateEvent<MandateRejectedPayload> {
    let subject = payload.mandate_id.clone();
    let time = payload.rejected_at;
    MandateEvent::new(EVENT_TYPE_MANDATE_REJECTED, source, payload)
        .with_time(time)
        .with_subject(subject)
}

pub fn mandate_revoked_event(
    source: impl Into<String>,
    payload: MandateRevokedPayload,
) -> MandateEvent<MandateRevokedPayload> {
    let subject = payload.mandate_id.clone();
    let time = payload.revoked_at;
    MandateEvent::new(EVENT_TYPE_MANDATE_REVOKED, source, payload)
        .with_time(time)
        .with_subject(subject)
}

pub fn payment_authorized_event(
    source: impl Into<String>,
    payload: PaymentAuthorizedPayload,
) -> MandateEvent<PaymentAuthorizedPayload> {
    let subject = payload.authorization.payment_mandate_id.clone();
    let time = payload.authorization.verified_at;
    MandateEvent::new(EVENT_TYPE_PAYMENT_AUTHORIZED, source, payload)
        .with_time(time)
        .with_subject(subject)
}
