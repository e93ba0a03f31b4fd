//! The Intent -> Cart -> Payment delegation chain.

pub mod cart;
pub mod intent;
pub mod payment;
pub mod types;

pub use cart::{CartItem, CartMandate, CartMandateBuilder};
pub use intent::{IntentMandate, IntentMandateBuilder, ScopeViolation};
pub use payment::{PaymentMandate, PaymentMandateBuilder, PAYMENT_METHOD_ID_KEY};
pub use types::{
    Mandate, MandateHeader, MandateKind, ReceivingAgent, CART_MANDATE_PAYLOAD_TYPE,
    INTENT_MANDATE_PAYLOAD_TYPE, PAYMENT_MANDATE_PAYLOAD_TYPE,
};
