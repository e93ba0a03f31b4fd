//! Cart mandate: itemised approval of one purchase total under an intent.
//!
//! The cart amount is derived from its items and is never set directly.
//! Deserialisation recomputes it and rejects documents whose stored amount
//! disagrees with the item total.

use crate::credential::{unsigned_document, CredentialProof, Signable};
use crate::error::{MandateError, SignatureError};
use crate::mandate::types::{MandateHeader, ReceivingAgent, CART_MANDATE_PAYLOAD_TYPE};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// One line of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub description: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl CartItem {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        unit_price: Decimal,
        quantity: u32,
    ) -> Result<Self, MandateError> {
        let item = Self {
            id: id.into(),
            description: description.into(),
            unit_price,
            quantity,
        };
        item.validate()?;
        Ok(item)
    }

    pub fn validate(&self) -> Result<(), MandateError> {
        if self.id.is_empty() {
            return Err(MandateError::EmptyField { field: "item.id" });
        }
        if self.quantity == 0 {
            return Err(MandateError::NonPositiveQuantity {
                item_id: self.id.clone(),
            });
        }
        if self.unit_price < Decimal::ZERO {
            return Err(MandateError::NegativePrice {
                item_id: self.id.clone(),
                unit_price: self.unit_price,
            });
        }
        Ok(())
    }

    /// `unit_price * quantity`
    pub fn total_price(&self) -> Result<Decimal, MandateError> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| MandateError::AmountOverflow {
                item_id: self.id.clone(),
            })
    }
}

/// Approval of one concrete cart total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CartMandateRepr")]
pub struct CartMandate {
    #[serde(flatten)]
    pub header: MandateHeader,

    pub parent_intent_mandate_id: String,

    items: Vec<CartItem>,

    pub currency_code: String,

    amount: Decimal,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    proof: Option<CredentialProof>,
}

/// Wire shape; converted through [`CartMandate::try_from`].
#[derive(Deserialize)]
struct CartMandateRepr {
    #[serde(flatten)]
    header: MandateHeader,
    parent_intent_mandate_id: String,
    #[serde(default)]
    items: Vec<CartItem>,
    currency_code: String,
    amount: Decimal,
    #[serde(default)]
    proof: Option<CredentialProof>,
}

impl TryFrom<CartMandateRepr> for CartMandate {
    type Error = MandateError;

    fn try_from(repr: CartMandateRepr) -> Result<Self, Self::Error> {
        let computed = total_of(&repr.items)?;
        if computed != repr.amount {
            return Err(MandateError::AmountNotDerived {
                claimed: repr.amount,
                computed,
            });
        }
        let cart = CartMandate {
            header: repr.header,
            parent_intent_mandate_id: repr.parent_intent_mandate_id,
            items: repr.items,
            currency_code: repr.currency_code,
            amount: computed,
            proof: repr.proof,
        };
        cart.validate()?;
        Ok(cart)
    }
}

fn total_of(items: &[CartItem]) -> Result<Decimal, MandateError> {
    items.iter().try_fold(Decimal::ZERO, |acc, item| {
        acc.checked_add(item.total_price()?)
            .ok_or_else(|| MandateError::AmountOverflow {
                item_id: item.id.clone(),
            })
    })
}

impl CartMandate {
    pub fn builder() -> CartMandateBuilder {
        CartMandateBuilder::default()
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Sum of `unit_price * quantity` over all items.
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Merchant id. Carts always name exactly one merchant.
    pub fn merchant_id(&self) -> Option<&str> {
        self.header.receiving_agent.agent_id()
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
        if self.parent_intent_mandate_id.is_empty() {
            return Err(MandateError::EmptyField {
                field: "parent_intent_mandate_id",
            });
        }
        if self.parent_intent_mandate_id == self.header.id {
            return Err(MandateError::SelfReference {
                id: self.header.id.clone(),
            });
        }
        if self.currency_code.is_empty() {
            return Err(MandateError::EmptyField {
                field: "currency_code",
            });
        }
        let mut seen = HashSet::new();
        for item in &self.items {
            item.validate()?;
            if !seen.insert(item.id.as_str()) {
                return Err(MandateError::DuplicateItem {
                    item_id: item.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Append an item and recompute the amount.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), MandateError> {
        self.ensure_unsigned()?;
        item.validate()?;
        if self.items.iter().any(|existing| existing.id == item.id) {
            return Err(MandateError::DuplicateItem { item_id: item.id });
        }
        self.items.push(item);
        if let Err(e) = self.recompute() {
            self.items.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Remove an item by id and recompute the amount.
    pub fn remove_item(&mut self, item_id: &str) -> Result<CartItem, MandateError> {
        self.ensure_unsigned()?;
        let position = self
            .items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| MandateError::ItemNotFound {
                item_id: item_id.to_string(),
            })?;
        let removed = self.items.remove(position);
        self.recompute()?;
        Ok(removed)
    }

    /// Replace all items and recompute the amount.
    pub fn set_items(&mut self, items: Vec<CartItem>) -> Result<(), MandateError> {
        self.ensure_unsigned()?;
        let previous = std::mem::replace(&mut self.items, items);
        if let Err(e) = self.validate().and_then(|()| self.recompute()) {
            self.items = previous;
            return Err(e);
        }
        Ok(())
    }

    fn ensure_unsigned(&self) -> Result<(), MandateError> {
        if self.proof.is_some() {
            return Err(MandateError::AlreadySigned {
                id: self.header.id.clone(),
            });
        }
        Ok(())
    }

    /// Leaves `amount` untouched on overflow.
    fn recompute(&mut self) -> Result<(), MandateError> {
        self.amount = total_of(&self.items)?;
        Ok(())
    }
}

impl Signable for CartMandate {
    fn credential_id(&self) -> &str {
        &self.header.id
    }

    fn payload_type(&self) -> &'static str {
        CART_MANDATE_PAYLOAD_TYPE
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

/// Builder for cart mandates.
#[derive(Default)]
pub struct CartMandateBuilder {
    id: Option<String>,
    requesting_agent_id: Option<String>,
    merchant_id: Option<String>,
    parent_intent_mandate_id: Option<String>,
    items: Vec<CartItem>,
    currency_code: Option<String>,
    created_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl CartMandateBuilder {
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

    pub fn parent_intent(mut self, intent_id: impl Into<String>) -> Self {
        self.parent_intent_mandate_id = Some(intent_id.into());
        self
    }

    pub fn item(mut self, item: CartItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn currency(mut self, currency_code: impl Into<String>) -> Self {
        self.currency_code = Some(currency_code.into());
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

    pub fn build(self) -> Result<CartMandate, MandateError> {
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

        let mut cart = CartMandate {
            header,
            parent_intent_mandate_id: self.parent_intent_mandate_id.ok_or(
                MandateError::MissingField {
                    field: "parent_intent_mandate_id",
                },
            )?,
            items: self.items,
            currency_code: self.currency_code.ok_or(MandateError::MissingField {
                field: "currency_code",
            })?,
            amount: Decimal::ZERO,
            proof: None,
        };
        cart.validate()?;
        cart.recompute()?;
        Ok(cart)
    }
}
