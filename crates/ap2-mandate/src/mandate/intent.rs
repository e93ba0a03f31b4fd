//! Intent mandate: the standing, human-issued grant at the root of a chain.

use crate::credential::{unsigned_document, CredentialProof, Signable};
use crate::error::{MandateError, SignatureError};
use crate::mandate::types::{MandateHeader, ReceivingAgent, INTENT_MANDATE_PAYLOAD_TYPE};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

/// Default lifetime of an intent when no expiry is given.
pub const DEFAULT_INTENT_VALIDITY_DAYS: i64 = 30;

/// Standing grant: "agent may spend up to X per payment with merchant Y for
/// categories Z".
///
/// Revocation is tracked outside the mandate (by the repository); the entity
/// itself is never mutated after signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IntentMandateRepr")]
pub struct IntentMandate {
    #[serde(flatten)]
    pub header: MandateHeader,

    /// Upper bound for a single payment (inclusive)
    pub max_amount_per_payment: Decimal,

    #[serde(default)]
    pub requires_human_approval: bool,

    /// Empty set = no category restriction
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub allowed_categories: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    proof: Option<CredentialProof>,
}

/// Wire shape; validated through [`IntentMandate::try_from`].
#[derive(Deserialize)]
struct IntentMandateRepr {
    #[serde(flatten)]
    header: MandateHeader,
    max_amount_per_payment: Decimal,
    #[serde(default)]
    requires_human_approval: bool,
    #[serde(default)]
    allowed_categories: BTreeSet<String>,
    #[serde(default)]
    proof: Option<CredentialProof>,
}

impl TryFrom<IntentMandateRepr> for IntentMandate {
    type Error = MandateError;

    fn try_from(repr: IntentMandateRepr) -> Result<Self, Self::Error> {
        let mandate = IntentMandate {
            header: repr.header,
            max_amount_per_payment: repr.max_amount_per_payment,
            requires_human_approval: repr.requires_human_approval,
            allowed_categories: repr.allowed_categories,
            proof: repr.proof,
        };
        mandate.validate()?;
        Ok(mandate)
    }
}

/// Why an intent does not cover a payment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeViolation {
    #[error("merchant '{requested}' is outside intent scope '{allowed}'")]
    MerchantNotAllowed {
        allowed: ReceivingAgent,
        requested: String,
    },

    #[error("amount {requested} exceeds max_amount_per_payment {max}")]
    AmountExceeded { max: Decimal, requested: Decimal },

    #[error("category '{category}' is not allowed")]
    CategoryNotAllowed { category: String },
}

impl IntentMandate {
    pub fn builder() -> IntentMandateBuilder {
        IntentMandateBuilder::default()
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    pub fn validate(&self) -> Result<(), MandateError> {
        self.header.validate()?;
        if self.max_amount_per_payment < Decimal::ZERO {
            return Err(MandateError::NegativeAmount {
                field: "max_amount_per_payment",
                amount: self.max_amount_per_payment,
            });
        }
        Ok(())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.header.is_expired_at(now)
    }

    pub fn is_expired(&self) -> bool {
        self.header.is_expired()
    }

    pub fn is_valid(&self) -> bool {
        self.header.is_valid()
    }

    /// Scope check with the reason for a rejection.
    ///
    /// Checks run merchant, then amount, then category; the first failure is
    /// reported.
    pub fn check_permits(
        &self,
        merchant_id: &str,
        amount: Decimal,
        category: Option<&str>,
    ) -> Result<(), ScopeViolation> {
        if !self.header.receiving_agent.permits(merchant_id) {
            return Err(ScopeViolation::MerchantNotAllowed {
                allowed: self.header.receiving_agent.clone(),
                requested: merchant_id.to_string(),
            });
        }

        if amount > self.max_amount_per_payment {
            return Err(ScopeViolation::AmountExceeded {
                max: self.max_amount_per_payment,
                requested: amount,
            });
        }

        if let Some(category) = category {
            if !self.allowed_categories.is_empty() && !self.allowed_categories.contains(category)
            {
                return Err(ScopeViolation::CategoryNotAllowed {
                    category: category.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Does this intent cover a payment of `amount` to `merchant_id`?
    pub fn permits(&self, merchant_id: &str, amount: Decimal, category: Option<&str>) -> bool {
        self.check_permits(merchant_id, amount, category).is_ok()
    }
}

impl Signable for IntentMandate {
    fn credential_id(&self) -> &str {
        &self.header.id
    }

    fn payload_type(&self) -> &'static str {
        INTENT_MANDATE_PAYLOAD_TYPE
    }

    fn document(&self) -> Result<Value, SignatureError> {
        unsigned_document(self)
    }

    fn proof(&self) -> Option<&CredentialProof> {
        self.proof.as_ref()
    }

    fn set_proof(&mut self, proof: CredentialProof) {
        self.proof = Some(proof);
    }
}

/// Builder for intent mandates.
#[derive(Default)]
pub struct IntentMandateBuilder {
    id: Option<String>,
    requesting_agent_id: Option<String>,
    receiving_agent: Option<ReceivingAgent>,
    max_amount_per_payment: Option<Decimal>,
    requires_human_approval: bool,
    allowed_categories: BTreeSet<String>,
    created_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl IntentMandateBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn requesting_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.requesting_agent_id = Some(agent_id.into());
        self
    }

    /// Restrict to one merchant, or pass [`ReceivingAgent::Unrestricted`].
    pub fn receiving_agent(mut self, receiving_agent: ReceivingAgent) -> Self {
        self.receiving_agent = Some(receiving_agent);
        self
    }

    pub fn max_amount_per_payment(mut self, max: Decimal) -> Self {
        self.max_amount_per_payment = Some(max);
        self
    }

    pub fn requires_human_approval(mut self, required: bool) -> Self {
        self.requires_human_approval = required;
        self
    }

    pub fn allowed_category(mut self, category: impl Into<String>) -> Self {
        self.allowed_categories.insert(category.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Build an unsigned intent.
    ///
    /// The receiving agent is required even when unrestricted, so a grant
    /// to any merchant is always spelled out.
    pub fn build(self) -> Result<IntentMandate, MandateError> {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        let expires_at = self
            .expires_at
            .unwrap_or(created_at + Duration::days(DEFAULT_INTENT_VALIDITY_DAYS));

        let header = MandateHeader::new(
            self.id.ok_or(MandateError::MissingField { field: "id" })?,
            self.requesting_agent_id.ok_or(MandateError::MissingField {
                field: "requesting_agent_id",
            })?,
            self.receiving_agent.ok_or(MandateError::MissingField {
                field: "receiving_agent",
            })?,
            created_at,
            expires_at,
        )?;

        let mandate = IntentMandate {
            header,
            max_amount_per_payment: self.max_amount_per_payment.ok_or(
                MandateError::MissingField {
                    field: "max_amount_per_payment",
                },
            )?,
            requires_human_approval: self.requires_human_approval,
            allowed_categories: self.allowed_categories,
            proof: None,
        };
        mandate.validate()?;
        Ok(mandate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap()
    }

    fn intent() -> IntentMandate {
        IntentMandate::builder()
            .id("intent-123")
            .requesting_agent("agent-456")
            .receiving_agent(ReceivingAgent::agent("merchant-789"))
            .max_amount_per_payment(Decimal::new(20000, 2))
            .created_at(t0())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_defaults_to_thirty_days() {
        let m = intent();
        assert_eq!(m.header.expires_at - m.header.created_at, Duration::days(30));
        assert!(!m.requires_human_approval);
        assert!(m.allowed_categories.is_empty());
        assert!(!m.has_proof());
    }

    #[test]
    fn test_builder_requires_receiving_agent() {
        let err = IntentMandate::builder()
            .id("i")
            .requesting_agent("a")
            .max_amount_per_payment(Decimal::ONE)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            MandateError::MissingField {
                field: "receiving_agent"
            }
        );
    }

    #[test]
    fn test_builder_rejects_negative_limit() {
        let err = IntentMandate::builder()
            .id("i")
            .requesting_agent("a")
            .receiving_agent(ReceivingAgent::Unrestricted)
            .max_amount_per_payment(Decimal::new(-1, 0))
            .build()
            .unwrap_err();
        assert!(matches!(err, MandateError::NegativeAmount { .. }));
    }

    #[test]
    fn test_permits_within_limits() {
        let m = intent();
        assert!(m.permits("merchant-789", Decimal::new(15000, 2), None));
        // Limit is inclusive
        assert!(m.permits("merchant-789", Decimal::new(200, 0), None));
    }

    #[test]
    fn test_permits_rejects_other_merchant() {
        let m = intent();
        assert!(matches!(
            m.check_permits("merchant-000", Decimal::ONE, None),
            Err(ScopeViolation::MerchantNotAllowed { .. })
        ));
    }

    #[test]
    fn test_permits_rejects_amount_over_limit() {
        let m = intent();
        assert_eq!(
            m.check_permits("merchant-789", Decimal::new(20001, 2), None),
            Err(ScopeViolation::AmountExceeded {
                max: Decimal::new(20000, 2),
                requested: Decimal::new(20001, 2),
            })
        );
    }

    #[test]
    fn test_unrestricted_intent_permits_any_merchant() {
        let mut m = intent();
        m.header.receiving_agent = ReceivingAgent::Unrestricted;
        assert!(m.permits("anyone", Decimal::ONE, None));
    }

    #[test]
    fn test_category_restriction() {
        let m = IntentMandate::builder()
            .id("i")
            .requesting_agent("a")
            .receiving_agent(ReceivingAgent::Unrestricted)
            .max_amount_per_payment(Decimal::new(100, 0))
            .allowed_category("groceries")
            .allowed_category("books")
            .build()
            .unwrap();

        assert!(m.permits("m", Decimal::ONE, Some("books")));
        assert!(m.permits("m", Decimal::ONE, None));
        assert_eq!(
            m.check_permits("m", Decimal::ONE, Some("electronics")),
            Err(ScopeViolation::CategoryNotAllowed {
                category: "electronics".to_string()
            })
        );
    }

    #[test]
    fn test_serialization_shape() {
        let json = serde_json::to_value(intent()).unwrap();
        assert_eq!(json["id"], "intent-123");
        assert_eq!(json["max_amount_per_payment"], "200.00");
        assert_eq!(json["receiving_agent"]["agent"], "merchant-789");
        assert!(json.get("proof").is_none());
        assert!(json.get("allowed_categories").is_none());

        let back: IntentMandate = serde_json::from_value(json).unwrap();
        assert_eq!(back, intent());
    }

    #[test]
    fn test_deserialize_checks_invariants() {
        let mut json = serde_json::to_value(intent()).unwrap();
        json["expires_at"] = json["created_at"].clone();
        let err = serde_json::from_value::<IntentMandate>(json).unwrap_err();
        assert!(err.to_string().contains("invalid validity window"), "{err}");

        let mut json = serde_json::to_value(intent()).unwrap();
        json["max_amount_per_payment"] = Value::from("-1");
        let err = serde_json::from_value::<IntentMandate>(json).unwrap_err();
        assert!(err.to_string().contains("is negative"), "{err}");
    }
}
