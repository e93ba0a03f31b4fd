//! Payment mandate: release of funds for one cart, amount and instrument.

use crate::credential::{unsigned_document, CredentialProof, Signable};
use crate::error::{MandateError, SignatureError};
use crate::mandate::types::{MandateHeader, ReceivingAgent, PAYMENT_MANDATE_PAYLOAD_TYPE};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key in `payment_details` naming the payment instrument.
pub const PAYMENT_METHOD_ID_KEY: &str = "paymentMethodId";

/// Final, narrowest authorization in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PaymentMandateRepr")]
pub struct PaymentMandate {
    #[serde(flatten)]
    pub header: MandateHeader,

    pub parent_cart_mandate_id: String,

    pub amount: Decimal,

    pub currency_code: String,

    /// Processor correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub payment_details: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    proof: Option<CredentialProof>,
}

/// Wire shape; validated through [`PaymentMandate::try_from`].
#[derive(Deserialize)]
struct PaymentMandateRepr {
    #[serde(flatten)]
    header: MandateHeader,
    parent_cart_mandate_id: String,
    amount: Decimal,
    currency_code: String,
    #[serde(default)]
    payment_reference: Option<String>,
    #[serde(default)]
    payment_details: BTreeMap<String, Value>,
    #[serde(default)]
    proof: Option<CredentialProof>,
}

impl TryFrom<PaymentMandateRepr> for PaymentMandate {
    type Error = MandateError;

    fn try_from(repr: PaymentMandateRepr) -> Result<Self, Self::Error> {
        let mandate = PaymentMandate {
            header: repr.header,
            parent_cart_mandate_id: repr.parent_cart_mandate_id,
            amount: repr.amount,
            currency_code: repr.currency_code,
            payment_reference: repr.payment_reference,
            payment_details: repr.payment_details,
            proof: repr.proof,
        };
        mandate.validate()?;
        Ok(mandate)
    }
}

impl PaymentMandate {
    pub fn builder() -> PaymentMandateBuilder {
        PaymentMandateBuilder::default()
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    /// Instrument named in `payment_details`, if any.
    ///
    /// Non-string values are rendered as JSON text.
    pub fn payment_method_id(&self) -> Option<String> {
        self.payment_details
            .get(PAYMENT_METHOD_ID_KEY)
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.header.is_expired_at(now)
    }

    pub fn is_expired(&self) -> bool {
        self.header.is_expired()
    }

    pub fn validate(&self) -> Result<(), MandateError> {
        self.header.validate()?;
        if self.header.receiving_agent == ReceivingAgent::Unrestricted {
            return Err(MandateError::MissingReceivingAgent {
                id: self.header.id.clone(),
            });
        }
        if self.parent_cart_mandate_id.is_empty() {
            return Err(MandateError::EmptyField {
                field: "parent_cart_mandate_id",
            });
        }
        if self.parent_cart_mandate_id == self.header.id {
            return Err(MandateError::SelfReference {
                id: self.header.id.clone(),
            });
        }
        if self.currency_code.is_empty() {
            return Err(MandateError::EmptyField {
                field: "currency_code",
            });
        }
        if self.amount < Decimal::ZERO {
            return Err(MandateError::NegativeAmount {
                field: "amount",
                amount: self.amount,
            });
        }
        Ok(())
    }
}

impl Signable for PaymentMandate {
    fn credential_id(&self) -> &str {
        &self.header.id
    }

    fn payload_type(&self) -> &'static str {
        PAYMENT_MANDATE_PAYLOAD_TYPE
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

/// Builder for payment mandates.
#[derive(Default)]
pub struct PaymentMandateBuilder {
    id: Option<String>,
    requesting_agent_id: Option<String>,
    merchant_id: Option<String>,
    parent_cart_mandate_id: Option<String>,
    amount: Option<Decimal>,
    currency_code: Option<String>,
    payment_reference: Option<String>,
    payment_details: BTreeMap<String, Value>,
    created_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl PaymentMandateBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn requesting_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.requesting_agent_id = Some(agent_id.into());
        self
    }

    pub fn merchant(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    pub fn parent_cart(mut self, cart_id: impl Into<String>) -> Self {
        self.parent_cart_mandate_id = Some(cart_id.into());
        self
    }

    pub fn amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn currency(mut self, currency_code: impl Into<String>) -> Self {
        self.currency_code = Some(currency_code.into());
        self
    }

    pub fn payment_reference(mut self, reference: impl Into<String>) -> Self {
        self.payment_reference = Some(reference.into());
        self
    }

    pub fn payment_method(self, method_id: impl Into<String>) -> Self {
        self.detail(PAYMENT_METHOD_ID_KEY, Value::String(method_id.into()))
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payment_details.insert(key.into(), value.into());
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

    pub fn build(self) -> Result<PaymentMandate, MandateError> {
        let header = MandateHeader::new(
            self.id.ok_or(MandateError::MissingField { field: "id" })?,
            self.requesting_agent_id.ok_or(MandateError::MissingField {
                field: "requesting_agent_id",
            })?,
            ReceivingAgent::Agent(
                self.merchant_id
                    .ok_or(MandateError::MissingField { field: "merchant" })?,
            ),
            self.created_at.unwrap_or_else(Utc::now),
            self.expires_at
                .ok_or(MandateError::MissingField { field: "expires_at" })?,
        )?;

        let payment = PaymentMandate {
            header,
            parent_cart_mandate_id: self.parent_cart_mandate_id.ok_or(
                MandateError::MissingField {
                    field: "parent_cart_mandate_id",
                },
            )?,
            amount: self
                .amount
                .ok_or(MandateError::MissingField { field: "amount" })?,
            currency_code: self.currency_code.ok_or(MandateError::MissingField {
                field: "currency_code",
            })?,
            payment_reference: self.payment_reference,
            payment_details: self.payment_details,
            proof: None,
        };
        payment.validate()?;
        Ok(payment)
    }
}
