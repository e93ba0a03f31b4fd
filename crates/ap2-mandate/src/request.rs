//! The payment request a mandate chain is checked against.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A payment an agent asks a merchant/processor to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub currency_code: String,
    pub requesting_agent_id: String,
    /// Merchant receiving the funds
    pub receiving_agent_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,

    /// Caller correlation id; used as the request reference in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,

    /// Instrument the payment mandate must name, when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,

    /// Purchase category; unrestricted when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Already-approved cart mandate presented with the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_mandate_id: Option<String>,

    /// Already-approved payment mandate presented with the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_mandate_id: Option<String>,
}

impl PaymentRequest {
    pub fn new(
        requesting_agent_id: impl Into<String>,
        receiving_agent_id: impl Into<String>,
        amount: Decimal,
        currency_code: impl Into<String>,
    ) -> Self {
        Self {
            amount,
            currency_code: currency_code.into(),
            requesting_agent_id: requesting_agent_id.into(),
            receiving_agent_id: receiving_agent_id.into(),
            description: None,
            metadata: BTreeMap::new(),
            external_reference: None,
            callback_url: None,
            payment_method: None,
            category: None,
            cart_mandate_id: None,
            payment_mandate_id: None,
        }
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mandates(
        mut self,
        cart_mandate_id: impl Into<String>,
        payment_mandate_id: impl Into<String>,
    ) -> Self {
        self.cart_mandate_id = Some(cart_mandate_id.into());
        self.payment_mandate_id = Some(payment_mandate_id.into());
        self
    }

    /// Reference used in logs and events.
    pub fn reference(&self) -> &str {
        self.external_reference.as_deref().unwrap_or("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_request_json() {
        let req = PaymentRequest::new("agent-1", "merchant-1", Decimal::new(10500, 2), "USD");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "amount": "105.00",
                "currency_code": "USD",
                "requesting_agent_id": "agent-1",
                "receiving_agent_id": "merchant-1",
            })
        );
        assert_eq!(req.reference(), "-");
    }

    #[test]
    fn test_parse_with_optional_fields() {
        let req: PaymentRequest = serde_json::from_str(
            r#"{
                "amount": "105.00",
                "currency_code": "USD",
                "requesting_agent_id": "agent-1",
                "receiving_agent_id": "merchant-1",
                "payment_method": "card-123",
                "category": "books",
                "external_reference": "order-9"
            }"#,
        )
        .unwrap();
        assert_eq!(req.payment_method.as_deref(), Some("card-123"));
        assert_eq!(req.category.as_deref(), Some("books"));
        assert_eq!(req.reference(), "order-9");
        assert!(req.cart_mandate_id.is_none());
    }
}
