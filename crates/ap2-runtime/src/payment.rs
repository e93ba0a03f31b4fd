//! Payment domain types and the processor boundary.

use crate::enforcer::{EnforceError, MandateEnforcer};
use ap2_mandate::mandate::PAYMENT_METHOD_ID_KEY;
use ap2_mandate::{ChainAuthorization, PaymentRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// `processor_data` keys set by [`PaymentResponse::attach_authorization`].
pub const INTENT_MANDATE_ID_KEY: &str = "intent_mandate_id";
pub const CART_MANDATE_ID_KEY: &str = "cart_mandate_id";
pub const PAYMENT_MANDATE_ID_KEY: &str = "payment_mandate_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Created,
    Processing,
    RequiresAuth,
    Authorized,
    Completed,
    Failed,
    Canceled,
    Refunded,
    Error,
}

/// A payment as recorded by a processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub amount: Decimal,
    pub currency_code: String,
    pub requesting_agent_id: String,
    pub receiving_agent_id: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
}

impl Payment {
    /// Record a new payment for `request` with a fresh id.
    pub fn from_request(request: &PaymentRequest, status: PaymentStatus) -> Self {
        let mut metadata = request.metadata.clone();
        if let Some(method) = &request.payment_method {
            metadata.insert(PAYMENT_METHOD_ID_KEY.to_string(), Value::from(method.clone()));
        }
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            amount: request.amount,
            currency_code: request.currency_code.clone(),
            requesting_agent_id: request.requesting_agent_id.clone(),
            receiving_agent_id: request.receiving_agent_id.clone(),
            status,
            created_at: Utc::now(),
            updated_at: None,
            metadata,
            description: request.description.clone(),
            external_reference: request.external_reference.clone(),
        }
    }

    /// The request this payment executed, for after-the-fact auditing.
    ///
    /// The payment method is read back from `metadata.paymentMethodId`.
    pub fn to_request(&self) -> PaymentRequest {
        let mut request = PaymentRequest::new(
            self.requesting_agent_id.clone(),
            self.receiving_agent_id.clone(),
            self.amount,
            self.currency_code.clone(),
        );
        request.description = self.description.clone();
        request.external_reference = self.external_reference.clone();
        request.metadata = self.metadata.clone();
        request.payment_method = self
            .metadata
            .get(PAYMENT_METHOD_ID_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);
        request
    }
}

/// Processor reply to a payment operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub processor_data: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
}

impl PaymentResponse {
    pub fn new(payment_id: impl Into<String>, status: PaymentStatus) -> Self {
        Self {
            payment_id: payment_id.into(),
            status,
            created_at: Utc::now(),
            updated_at: None,
            auth_url: None,
            verification_url: None,
            error_code: None,
            error_message: None,
            processor_data: BTreeMap::new(),
            receipt_url: None,
        }
    }

    /// Record which mandates authorised this payment.
    pub fn attach_authorization(&mut self, authorization: &ChainAuthorization) {
        for (key, id) in [
            (INTENT_MANDATE_ID_KEY, &authorization.intent_mandate_id),
            (CART_MANDATE_ID_KEY, &authorization.cart_mandate_id),
            (PAYMENT_MANDATE_ID_KEY, &authorization.payment_mandate_id),
        ] {
            self.processor_data
                .insert(key.to_string(), Value::from(id.clone()));
        }
    }

    pub fn mandate_id(&self, key: &str) -> Option<&str> {
        self.processor_data.get(key).and_then(Value::as_str)
    }
}

/// Downstream processor failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("payment processor error ({code}): {message}")]
pub struct ProcessorError {
    pub code: String,
    pub message: String,
}

/// Executes payments. Only ever sees requests that passed enforcement when
/// wrapped in [`GuardedProcessor`].
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResponse, ProcessorError>;
}

#[derive(Debug, Error)]
pub enum GuardedPaymentError {
    #[error("payment blocked: {0}")]
    Blocked(#[from] EnforceError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Enforces the mandate chain before forwarding to the inner processor.
pub struct GuardedProcessor<P> {
    enforcer: Arc<MandateEnforcer>,
    inner: P,
}

impl<P: PaymentProcessor> GuardedProcessor<P> {
    pub fn new(enforcer: Arc<MandateEnforcer>, inner: P) -> Self {
        Self { enforcer, inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Enforce, forward, then tag the response with the authorising mandates.
    pub async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResponse, GuardedPaymentError> {
        let authorization = self.enforcer.enforce(request).await?;
        let mut response = self.inner.create_payment(request).await?;
        response.attach_authorization(&authorization);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn authorization() -> ChainAuthorization {
        ChainAuthorization {
            intent_mandate_id: "intent-1".to_string(),
            cart_mandate_id: "cart-1".to_string(),
            payment_mandate_id: "pay-1".to_string(),
            merchant_id: "merchant-1".to_string(),
            amount: Decimal::new(10500, 2),
            currency_code: "USD".to_string(),
            verified_at: Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::RequiresAuth).unwrap(),
            "\"REQUIRES_AUTH\""
        );
        assert_eq!(
            serde_json::from_str::<PaymentStatus>("\"CANCELED\"").unwrap(),
            PaymentStatus::Canceled
        );
    }

    #[test]
    fn test_attach_authorization() {
        let mut response = PaymentResponse::new("psp-1", PaymentStatus::Created);
        response
            .processor_data
            .insert("psp_trace".to_string(), Value::from("abc"));
        response.attach_authorization(&authorization());

        assert_eq!(response.mandate_id(INTENT_MANDATE_ID_KEY), Some("intent-1"));
        assert_eq!(response.mandate_id(CART_MANDATE_ID_KEY), Some("cart-1"));
        assert_eq!(response.mandate_id(PAYMENT_MANDATE_ID_KEY), Some("pay-1"));
        assert_eq!(response.processor_data["psp_trace"], "abc");
    }

    #[test]
    fn test_payment_request_roundtrip_keeps_method() {
        let request = PaymentRequest::new("agent-1", "merchant-1", Decimal::new(10500, 2), "USD")
            .with_payment_method("card-123")
            .with_external_reference("order-7");
        let payment = Payment::from_request(&request, PaymentStatus::Completed);
        assert_eq!(payment.metadata[PAYMENT_METHOD_ID_KEY], "card-123");

        let back = payment.to_request();
        assert_eq!(back.amount, request.amount);
        assert_eq!(back.payment_method.as_deref(), Some("card-123"));
        assert_eq!(back.external_reference.as_deref(), Some("order-7"));
        assert_eq!(back.receiving_agent_id, "merchant-1");
    }
}
