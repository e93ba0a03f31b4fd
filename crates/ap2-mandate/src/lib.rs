//! Signed Intent -> Cart -> Payment mandate chains for agent payments.
//!
//! A human grants an agent a bounded [`IntentMandate`]; each purchase under
//! it is approved as a [`CartMandate`] and released as a [`PaymentMandate`].
//! [`MandateVerifier`] checks every link against its parent and against the
//! concrete [`PaymentRequest`].
//!
//! # Example
//!
//! ```rust
//! use ap2_mandate::{
//!     CartItem, CartMandate, Ed25519SignatureService, IntentMandate, MandateVerifier,
//!     PaymentMandate, PaymentRequest, ReceivingAgent, SignatureService,
//! };
//! use chrono::{Duration, Utc};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! let signatures = Arc::new(Ed25519SignatureService::new());
//! signatures.generate_key_pair("user-key").unwrap();
//!
//! let intent = IntentMandate::builder()
//!     .id("intent-1")
//!     .requesting_agent("agent-1")
//!     .receiving_agent(ReceivingAgent::agent("merchant-1"))
//!     .max_amount_per_payment(Decimal::new(200, 0))
//!     .build()
//!     .unwrap();
//! let intent = signatures.signed(intent, "user-key").unwrap();
//!
//! let cart = CartMandate::builder()
//!     .id("cart-1")
//!     .requesting_agent("agent-1")
//!     .merchant("merchant-1")
//!     .parent_intent("intent-1")
//!     .item(CartItem::new("sku-1", "Book", Decimal::new(2500, 2), 2).unwrap())
//!     .currency("USD")
//!     .expires_at(Utc::now() + Duration::hours(1))
//!     .build()
//!     .unwrap();
//! let cart = signatures.signed(cart, "user-key").unwrap();
//!
//! let payment = PaymentMandate::builder()
//!     .id("pay-1")
//!     .requesting_agent("agent-1")
//!     .merchant("merchant-1")
//!     .parent_cart("cart-1")
//!     .amount(Decimal::new(5000, 2))
//!     .currency("USD")
//!     .payment_method("card-123")
//!     .expires_at(Utc::now() + Duration::minutes(15))
//!     .build()
//!     .unwrap();
//! let payment = signatures.signed(payment, "user-key").unwrap();
//!
//! let request = PaymentRequest::new("agent-1", "merchant-1", Decimal::new(5000, 2), "USD")
//!     .with_payment_method("card-123");
//!
//! let verifier = MandateVerifier::new(signatures);
//! let receipt = verifier.verify_chain(&intent, &cart, &payment, &request).unwrap();
//! assert_eq!(receipt.payment_mandate_id, "pay-1");
//! ```

pub mod credential;
pub mod crypto;
pub mod error;
pub mod events;
pub mod mandate;
pub mod request;
pub mod signing;
pub mod verifier;

// Re-export main types
pub use credential::{
    CredentialProof, CredentialSubject, Signable, VerifiableCredential, ED25519_PROOF_TYPE,
    PROOF_PURPOSE_ASSERTION,
};
pub use error::{MandateError, MandateViolation, SignatureError, ViolationKind};
pub use events::{AuditEvent, MandateEvent};
pub use mandate::{
    CartItem, CartMandate, IntentMandate, Mandate, MandateHeader, MandateKind, PaymentMandate,
    ReceivingAgent, ScopeViolation,
};
pub use request::PaymentRequest;
pub use signing::{Ed25519SignatureService, SignatureService, SignatureVerifier};
pub use verifier::{ChainAuthorization, MandateVerifier, VerifyFailure};
