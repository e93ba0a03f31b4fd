//! Shared mandate shape and the `Mandate` sum type.
//!
//! # Design Principles
//!
//! - **Tree-shaped chain** - Intent -> Cart -> Payment, each child naming one
//!   parent by id
//! - **Explicit scope** - an intent with no merchant restriction says so
//!   with [`ReceivingAgent::Unrestricted`]; an empty id is rejected
//! - **Exact money** - amounts are `Decimal`, serialised as strings

use crate::credential::{CredentialProof, CredentialSubject, Signable, VerifiableCredential};
use crate::error::{MandateError, SignatureError};
use crate::mandate::{CartMandate, IntentMandate, PaymentMandate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Intent mandate payload type for type confusion prevention.
pub const INTENT_MANDATE_PAYLOAD_TYPE: &str = "application/vnd.ap2.intent-mandate+json;v=1";

/// Cart mandate payload type.
pub const CART_MANDATE_PAYLOAD_TYPE: &str = "application/vnd.ap2.cart-mandate+json;v=1";

/// Payment mandate payload type.
pub const PAYMENT_MANDATE_PAYLOAD_TYPE: &str = "application/vnd.ap2.payment-mandate+json;v=1";

/// Mandate kind - position in the delegation chain.
///
/// | Kind | Parent | Purpose |
/// |------|--------|---------|
/// | `Intent` | none | Standing grant bounding merchant/amount/category |
/// | `Cart` | Intent | Itemised approval of one cart total |
/// | `Payment` | Cart | Release of funds for one amount and instrument |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MandateKind {
    Intent,
    Cart,
    Payment,
}

impl MandateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Cart => "cart",
            Self::Payment => "payment",
        }
    }

    pub fn payload_type(&self) -> &'static str {
        match self {
            Self::Intent => INTENT_MANDATE_PAYLOAD_TYPE,
            Self::Cart => CART_MANDATE_PAYLOAD_TYPE,
            Self::Payment => PAYMENT_MANDATE_PAYLOAD_TYPE,
        }
    }

    /// Kind a mandate of this kind must reference as its parent.
    pub fn parent_kind(&self) -> Option<MandateKind> {
        match self {
            Self::Intent => None,
            Self::Cart => Some(Self::Intent),
            Self::Payment => Some(Self::Cart),
        }
    }

    /// Credential type name used in exported credentials.
    pub fn credential_type(&self) -> &'static str {
        match self {
            Self::Intent => "IntentMandate",
            Self::Cart => "CartMandate",
            Self::Payment => "PaymentMandate",
        }
    }
}

impl fmt::Display for MandateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which agent may receive funds under a mandate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceivingAgent {
    /// Any merchant. Only meaningful on an intent.
    Unrestricted,
    /// Exactly this agent.
    Agent(String),
}

impl ReceivingAgent {
    pub fn agent(id: impl Into<String>) -> Self {
        Self::Agent(id.into())
    }

    /// Scope check: does this grant cover `merchant_id`?
    pub fn permits(&self, merchant_id: &str) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Agent(id) => id == merchant_id,
        }
    }

    /// Identity check: is this exactly `merchant_id`?
    pub fn is(&self, merchant_id: &str) -> bool {
        matches!(self, Self::Agent(id) if id == merchant_id)
    }

    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Unrestricted => None,
            Self::Agent(id) => Some(id),
        }
    }
}

impl fmt::Display for ReceivingAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrestricted => f.write_str("*"),
            Self::Agent(id) => f.write_str(id),
        }
    }
}

/// Fields shared by all three mandates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandateHeader {
    /// Unique mandate identifier
    pub id: String,

    /// Agent acting on the human's behalf
    pub requesting_agent_id: String,

    /// Merchant/processor side
    pub receiving_agent: ReceivingAgent,

    pub created_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

impl MandateHeader {
    pub fn new(
        id: impl Into<String>,
        requesting_agent_id: impl Into<String>,
        receiving_agent: ReceivingAgent,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, MandateError> {
        let header = Self {
            id: id.into(),
            requesting_agent_id: requesting_agent_id.into(),
            receiving_agent,
            created_at,
            expires_at,
        };
        header.validate()?;
        Ok(header)
    }

    /// Check construction invariants.
    pub fn validate(&self) -> Result<(), MandateError> {
        if self.id.is_empty() {
            return Err(MandateError::EmptyField { field: "id" });
        }
        if self.requesting_agent_id.is_empty() {
            return Err(MandateError::EmptyField {
                field: "requesting_agent_id",
            });
        }
        if let ReceivingAgent::Agent(id) = &self.receiving_agent {
            if id.is_empty() {
                return Err(MandateError::EmptyField {
                    field: "receiving_agent",
                });
            }
        }
        if self.expires_at <= self.created_at {
            return Err(MandateError::InvalidValidity {
                created_at: self.created_at,
                expires_at: self.expires_at,
            });
        }
        Ok(())
    }

    /// `now` lies strictly inside `(created_at, expires_at)`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.created_at < now && now < self.expires_at
    }

    /// `expires_at <= now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Any mandate in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mandate_kind", rename_all = "lowercase")]
pub enum Mandate {
    Intent(IntentMandate),
    Cart(CartMandate),
    Payment(PaymentMandate),
}

impl Mandate {
    pub fn kind(&self) -> MandateKind {
        match self {
            Self::Intent(_) => MandateKind::Intent,
            Self::Cart(_) => MandateKind::Cart,
            Self::Payment(_) => MandateKind::Payment,
        }
    }

    pub fn header(&self) -> &MandateHeader {
        match self {
            Self::Intent(m) => &m.header,
            Self::Cart(m) => &m.header,
            Self::Payment(m) => &m.header,
        }
    }

    pub fn id(&self) -> &str {
        &self.header().id
    }

    /// Id of the parent mandate (None for intents).
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Self::Intent(_) => None,
            Self::Cart(m) => Some(&m.parent_intent_mandate_id),
            Self::Payment(m) => Some(&m.parent_cart_mandate_id),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.header().is_expired_at(now)
    }

    pub fn validate(&self) -> Result<(), MandateError> {
        match self {
            Self::Intent(m) => m.validate(),
            Self::Cart(m) => m.validate(),
            Self::Payment(m) => m.validate(),
        }
    }

    pub fn as_intent(&self) -> Option<&IntentMandate> {
        match self {
            Self::Intent(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_cart(&self) -> Option<&CartMandate> {
        match self {
            Self::Cart(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_payment(&self) -> Option<&PaymentMandate> {
        match self {
            Self::Payment(m) => Some(m),
            _ => None,
        }
    }

    fn as_signable(&self) -> &dyn Signable {
        match self {
            Self::Intent(m) => m as &dyn Signable,
            Self::Cart(m) => m as &dyn Signable,
            Self::Payment(m) => m as &dyn Signable,
        }
    }

    /// Render as a W3C-style verifiable credential.
    ///
    /// Claims are the unsigned mandate document; the proof is carried over
    /// unchanged.
    pub fn to_verifiable_credential(&self) -> Result<VerifiableCredential, SignatureError> {
        let header = self.header();
        let mut subject = CredentialSubject::new(header.receiving_agent.to_string());
        if let Value::Object(claims) = self.document()? {
            subject.claims = claims;
        }
        Ok(VerifiableCredential {
            id: header.id.clone(),
            types: vec![
                "VerifiableCredential".to_string(),
                self.kind().credential_type().to_string(),
            ],
            issuer: header.requesting_agent_id.clone(),
            issuance_date: header.created_at,
            expiration_date: header.expires_at,
            credential_subject: subject,
            proof: self.proof().cloned(),
        })
    }
}

impl Signable for Mandate {
    fn credential_id(&self) -> &str {
        self.id()
    }

    fn payload_type(&self) -> &'static str {
        self.kind().payload_type()
    }

    /// Same document as the wrapped mandate, so a signature made over a
    /// concrete mandate verifies through the sum type and vice versa.
    fn document(&self) -> Result<Value, SignatureError> {
        self.as_signable().document()
    }

    fn proof(&self) -> Option<&CredentialProof> {
        self.as_signable().proof()
    }

    fn set_proof(&mut self, proof: CredentialProof) {
        match self {
            Self::Intent(m) => m.set_proof(proof),
            Self::Cart(m) => m.set_proof(proof),
            Self::Payment(m) => m.set_proof(proof),
        }
    }
}

impl From<IntentMandate> for Mandate {
    fn from(m: IntentMandate) -> Self {
        Self::Intent(m)
    }
}

impl From<CartMandate> for Mandate {
    fn from(m: CartMandate) -> Self {
        Self::Cart(m)
    }
}

impl From<PaymentMandate> for Mandate {
    fn from(m: PaymentMandate) -> Self {
        Self::Payment(m)
    }
}
