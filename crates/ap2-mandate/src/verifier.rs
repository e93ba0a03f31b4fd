//! Mandate verification pipeline.
//!
//! Three independent stages, called parent to child:
//!
//! | Stage | Checked against |
//! |-------|-----------------|
//! | intent | request merchant, amount, category |
//! | cart | verified intent + request merchant, amount, currency |
//! | payment | verified cart + request amount, currency, payment method |
//!
//! Every stage re-checks the original request rather than trusting its
//! parent, so a substituted cart or payment cannot carry a different amount
//! through a still-valid intent. Within a stage the signature check runs
//! first, then expiry; the first failing check is reported.
//!
//! Verification holds no locks and has no side effects apart from logging.

use crate::credential::Signable;
use crate::error::{MandateViolation, ViolationKind};
use crate::mandate::{CartMandate, IntentMandate, PaymentMandate, ScopeViolation};
use crate::request::PaymentRequest;
use crate::signing::SignatureVerifier;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyFailure {
    #[error("signature missing or invalid")]
    SignatureInvalid,

    #[error("mandate expired at {expires_at}")]
    Expired { expires_at: DateTime<Utc> },

    #[error(transparent)]
    Scope(#[from] ScopeViolation),

    #[error("parent reference '{actual}' does not match '{expected}'")]
    ParentMismatch { expected: String, actual: String },

    #[error("mandate id '{id}' appears more than once in the chain")]
    CyclicReference { id: String },

    #[error("merchant '{mandate}' does not match request merchant '{request}'")]
    MerchantMismatch { mandate: String, request: String },

    #[error("amount {mandate} does not match request amount {request}")]
    AmountMismatch { mandate: Decimal, request: Decimal },

    #[error("currency {mandate} does not match request currency {request}")]
    CurrencyMismatch { mandate: String, request: String },

    #[error("payment method {mandate:?} does not match request payment method '{request}'")]
    PaymentMethodMismatch {
        mandate: Option<String>,
        request: String,
    },
}

impl VerifyFailure {
    pub fn kind(&self) -> ViolationKind {
        match self {
            Self::SignatureInvalid => ViolationKind::SignatureInvalid,
            Self::Expired { .. } => ViolationKind::MandateExpired,
            Self::Scope(_) => ViolationKind::MandateScopeViolation,
            Self::ParentMismatch { .. } | Self::CyclicReference { .. } => {
                ViolationKind::ChainMismatch
            }
            Self::MerchantMismatch { .. }
            | Self::AmountMismatch { .. }
            | Self::CurrencyMismatch { .. }
            | Self::PaymentMethodMismatch { .. } => ViolationKind::ValueMismatch,
        }
    }

    fn into_violation(self, mandate_id: &str) -> MandateViolation {
        MandateViolation::new(mandate_id, self.kind(), self.to_string())
    }
}

/// Receipt for a fully verified chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainAuthorization {
    pub intent_mandate_id: String,
    pub cart_mandate_id: String,
    pub payment_mandate_id: String,
    pub merchant_id: String,
    pub amount: Decimal,
    pub currency_code: String,
    pub verified_at: DateTime<Utc>,
}

/// Checks mandates against their parent and the payment request.
#[derive(Clone)]
pub struct MandateVerifier {
    signatures: Arc<dyn SignatureVerifier>,
}

impl MandateVerifier {
    pub fn new(signatures: Arc<dyn SignatureVerifier>) -> Self {
        Self { signatures }
    }

    pub fn verify_signature(&self, mandate: &dyn Signable) -> bool {
        self.signatures.verify(mandate)
    }

    fn check_signed_and_current(
        &self,
        now: DateTime<Utc>,
        mandate: &dyn Signable,
        expires_at: DateTime<Utc>,
    ) -> Result<(), VerifyFailure> {
        if !self.verify_signature(mandate) {
            return Err(VerifyFailure::SignatureInvalid);
        }
        if expires_at <= now {
            return Err(VerifyFailure::Expired { expires_at });
        }
        Ok(())
    }

    fn intent_failure(
        &self,
        now: DateTime<Utc>,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> Result<(), VerifyFailure> {
        self.check_signed_and_current(now, intent, intent.header.expires_at)?;
        intent.check_permits(
            &request.receiving_agent_id,
            request.amount,
            request.category.as_deref(),
        )?;
        Ok(())
    }

    fn cart_failure(
        &self,
        now: DateTime<Utc>,
        cart: &CartMandate,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> Result<(), VerifyFailure> {
        self.check_signed_and_current(now, cart, cart.header.expires_at)?;

        if cart.id() == intent.id() {
            return Err(VerifyFailure::CyclicReference {
                id: cart.id().to_string(),
            });
        }
        if cart.parent_intent_mandate_id != intent.id() {
            return Err(VerifyFailure::ParentMismatch {
                expected: intent.id().to_string(),
                actual: cart.parent_intent_mandate_id.clone(),
            });
        }
        if !cart.header.receiving_agent.is(&request.receiving_agent_id) {
            return Err(VerifyFailure::MerchantMismatch {
                mandate: cart.header.receiving_agent.to_string(),
                request: request.receiving_agent_id.clone(),
            });
        }
        if cart.amount() != request.amount {
            return Err(VerifyFailure::AmountMismatch {
                mandate: cart.amount(),
                request: request.amount,
            });
        }
        if cart.currency_code != request.currency_code {
            return Err(VerifyFailure::CurrencyMismatch {
                mandate: cart.currency_code.clone(),
                request: request.currency_code.clone(),
            });
        }
        Ok(())
    }

    fn payment_failure(
        &self,
        now: DateTime<Utc>,
        payment: &PaymentMandate,
        cart: &CartMandate,
        request: &PaymentRequest,
    ) -> Result<(), VerifyFailure> {
        self.check_signed_and_current(now, payment, payment.header.expires_at)?;

        if payment.id() == cart.id() || payment.id() == cart.parent_intent_mandate_id {
            return Err(VerifyFailure::CyclicReference {
                id: payment.id().to_string(),
            });
        }
        if payment.parent_cart_mandate_id != cart.id() {
            return Err(VerifyFailure::ParentMismatch {
                expected: cart.id().to_string(),
                actual: payment.parent_cart_mandate_id.clone(),
            });
        }
        if payment.amount != request.amount {
            return Err(VerifyFailure::AmountMismatch {
                mandate: payment.amount,
                request: request.amount,
            });
        }
        if payment.currency_code != request.currency_code {
            return Err(VerifyFailure::CurrencyMismatch {
                mandate: payment.currency_code.clone(),
                request: request.currency_code.clone(),
            });
        }
        if let Some(method) = &request.payment_method {
            let mandate_method = payment.payment_method_id();
            if mandate_method.as_deref() != Some(method.as_str()) {
                return Err(VerifyFailure::PaymentMethodMismatch {
                    mandate: mandate_method,
                    request: method.clone(),
                });
            }
        }
        Ok(())
    }

    /// Check an intent against the request as of `now`.
    pub fn check_intent_mandate_at(
        &self,
        now: DateTime<Utc>,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> Result<(), MandateViolation> {
        debug!(
            mandate_id = intent.id(),
            request_ref = request.reference(),
            "verifying intent mandate"
        );
        self.intent_failure(now, intent, request)
            .map_err(|f| reject(intent.id(), "intent", f))
    }

    /// Check a cart against its (already verified) intent and the request.
    pub fn check_cart_mandate_at(
        &self,
        now: DateTime<Utc>,
        cart: &CartMandate,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> Result<(), MandateViolation> {
        debug!(
            mandate_id = cart.id(),
            request_ref = request.reference(),
            "verifying cart mandate"
        );
        self.cart_failure(now, cart, intent, request)
            .map_err(|f| reject(cart.id(), "cart", f))
    }

    /// Check a payment against its (already verified) cart and the request.
    pub fn check_payment_mandate_at(
        &self,
        now: DateTime<Utc>,
        payment: &PaymentMandate,
        cart: &CartMandate,
        request: &PaymentRequest,
    ) -> Result<(), MandateViolation> {
        debug!(
            mandate_id = payment.id(),
            request_ref = request.reference(),
            "verifying payment mandate"
        );
        self.payment_failure(now, payment, cart, request)
            .map_err(|f| reject(payment.id(), "payment", f))
    }

    pub fn check_intent_mandate(
        &self,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> Result<(), MandateViolation> {
        self.check_intent_mandate_at(Utc::now(), intent, request)
    }

    pub fn check_cart_mandate(
        &self,
        cart: &CartMandate,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> Result<(), MandateViolation> {
        self.check_cart_mandate_at(Utc::now(), cart, intent, request)
    }

    pub fn check_payment_mandate(
        &self,
        payment: &PaymentMandate,
        cart: &CartMandate,
        request: &PaymentRequest,
    ) -> Result<(), MandateViolation> {
        self.check_payment_mandate_at(Utc::now(), payment, cart, request)
    }

    pub fn verify_intent_mandate_at(
        &self,
        now: DateTime<Utc>,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> bool {
        self.check_intent_mandate_at(now, intent, request).is_ok()
    }

    pub fn verify_cart_mandate_at(
        &self,
        now: DateTime<Utc>,
        cart: &CartMandate,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> bool {
        self.check_cart_mandate_at(now, cart, intent, request).is_ok()
    }

    pub fn verify_payment_mandate_at(
        &self,
        now: DateTime<Utc>,
        payment: &PaymentMandate,
        cart: &CartMandate,
        request: &PaymentRequest,
    ) -> bool {
        self.check_payment_mandate_at(now, payment, cart, request)
            .is_ok()
    }

    pub fn verify_intent_mandate(&self, intent: &IntentMandate, request: &PaymentRequest) -> bool {
        self.verify_intent_mandate_at(Utc::now(), intent, request)
    }

    pub fn verify_cart_mandate(
        &self,
        cart: &CartMandate,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> bool {
        self.verify_cart_mandate_at(Utc::now(), cart, intent, request)
    }

    pub fn verify_payment_mandate(
        &self,
        payment: &PaymentMandate,
        cart: &CartMandate,
        request: &PaymentRequest,
    ) -> bool {
        self.verify_payment_mandate_at(Utc::now(), payment, cart, request)
    }

    /// Run all three stages in order.
    ///
    /// Also rejects a chain in which any mandate id repeats.
    pub fn verify_chain_at(
        &self,
        now: DateTime<Utc>,
        intent: &IntentMandate,
        cart: &CartMandate,
        payment: &PaymentMandate,
        request: &PaymentRequest,
    ) -> Result<ChainAuthorization, MandateViolation> {
        if intent.id() == cart.id() {
            return Err(reject(
                cart.id(),
                "cart",
                VerifyFailure::CyclicReference {
                    id: cart.id().to_string(),
                },
            ));
        }
        if payment.id() == intent.id() || payment.id() == cart.id() {
            return Err(reject(
                payment.id(),
                "payment",
                VerifyFailure::CyclicReference {
                    id: payment.id().to_string(),
                },
            ));
        }

        self.check_intent_mandate_at(now, intent, request)?;
        self.check_cart_mandate_at(now, cart, intent, request)?;
        self.check_payment_mandate_at(now, payment, cart, request)?;

        Ok(ChainAuthorization {
            intent_mandate_id: intent.id().to_string(),
            cart_mandate_id: cart.id().to_string(),
            payment_mandate_id: payment.id().to_string(),
            merchant_id: request.receiving_agent_id.clone(),
            amount: request.amount,
            currency_code: request.currency_code.clone(),
            verified_at: now,
        })
    }

    pub fn verify_chain(
        &self,
        intent: &IntentMandate,
        cart: &CartMandate,
        payment: &PaymentMandate,
        request: &PaymentRequest,
    ) -> Result<ChainAuthorization, MandateViolation> {
        self.verify_chain_at(Utc::now(), intent, cart, payment, request)
    }
}

fn reject(mandate_id: &str, stage: &'static str, failure: VerifyFailure) -> MandateViolation {
    let violation = failure.into_violation(mandate_id);
    warn!(
        mandate_id,
        stage,
        kind = %violation.violation_type,
        reason = %violation.reason,
        "mandate rejected"
    );
    violation
}
