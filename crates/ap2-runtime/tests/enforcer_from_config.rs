//! Enforcer wired from a YAML config file: file-backed store, NDJSON audit
//! log and a configured audit signing key.

use ap2_mandate::crypto::jcs;
use ap2_mandate::events::{EVENT_TYPE_MANDATE_VERIFIED, EVENT_TYPE_PAYMENT_AUTHORIZED};
use ap2_mandate::{
    CartItem, CartMandate, Ed25519SignatureService, IntentMandate, PaymentMandate,
    PaymentRequest, ReceivingAgent, SignatureService,
};
use ap2_runtime::{
    AuditRecord, EnforcerConfig, MandateEnforcer, MandateRepository, NoHumanApproval,
};
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::pkcs8::{EncodePrivateKey, EncodePublicKey, spki::der::pem::LineEnding};
use ed25519_dalek::{Signature, SigningKey, Verifier};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;

const USER_KEY_ID: &str = "user-key-1";
const AUDIT_KEY_ID: &str = "enforcer-key";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap()
}

fn user_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn audit_key() -> SigningKey {
    SigningKey::from_bytes(&[9u8; 32])
}

fn write_keys(dir: &Path) {
    std::fs::create_dir_all(dir.join("keys")).unwrap();
    std::fs::write(
        dir.join("keys/user.pem"),
        user_key()
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap(),
    )
    .unwrap();
    std::fs::write(
        dir.join("keys/enforcer.pem"),
        audit_key().to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes(),
    )
    .unwrap();
}

fn signed_chain() -> (IntentMandate, CartMandate, PaymentMandate) {
    let signer = Ed25519SignatureService::new();
    signer.add_signing_key(USER_KEY_ID, user_key()).unwrap();

    let intent = IntentMandate::builder()
        .id("intent-123")
        .requesting_agent("agent-456")
        .receiving_agent(ReceivingAgent::agent("merchant-789"))
        .max_amount_per_payment(Decimal::new(200, 0))
        .created_at(t0())
        .build()
        .unwrap();
    let cart = CartMandate::builder()
        .id("cart-1")
        .requesting_agent("agent-456")
        .merchant("merchant-789")
        .parent_intent("intent-123")
        .item(CartItem::new("sku-1", "Headphones", Decimal::new(10500, 2), 1).unwrap())
        .currency("USD")
        .created_at(t0())
        .expires_at(t0() + Duration::hours(1))
        .build()
        .unwrap();
    let payment = PaymentMandate::builder()
        .id("pay-1")
        .requesting_agent("agent-456")
        .merchant("merchant-789")
        .parent_cart("cart-1")
        .amount(Decimal::new(10500, 2))
        .currency("USD")
        .payment_method("card-123")
        .created_at(t0())
        .expires_at(t0() + Duration::minutes(15))
        .build()
        .unwrap();

    (
        signer.signed(intent, USER_KEY_ID).unwrap(),
        signer.signed(cart, USER_KEY_ID).unwrap(),
        signer.signed(payment, USER_KEY_ID).unwrap(),
    )
}

#[tokio::test]
async fn test_enforcer_from_config_signs_audit_records() {
    let dir = tempfile::tempdir().unwrap();
    write_keys(dir.path());
    let config_path = dir.path().join("enforcer.yaml");
    std::fs::write(
        &config_path,
        format!(
            r#"
approval_timeout_seconds: 5
database_path: ./mandates.db
audit_log_path: audit.ndjson
audit_signing_key_id: {AUDIT_KEY_ID}
audit_signing_key_path: keys/enforcer.pem
trusted_keys:
  - key_id: {USER_KEY_ID}
    public_key_path: keys/user.pem
"#
        ),
    )
    .unwrap();

    let config = EnforcerConfig::from_file(&config_path).unwrap();
    let enforcer = MandateEnforcer::from_config(
        &config,
        Arc::new(Ed25519SignatureService::new()),
        Arc::new(NoHumanApproval),
    )
    .unwrap();

    let (intent, cart, payment) = signed_chain();
    enforcer.repository().store_intent_mandate(&intent).unwrap();
    enforcer.repository().store_chain(&cart, &payment).unwrap();

    let request = PaymentRequest::new("agent-456", "merchant-789", Decimal::new(10500, 2), "USD")
        .with_payment_method("card-123")
        .with_mandates("cart-1", "pay-1");
    enforcer
        .enforce_at(t0() + Duration::minutes(1), &request)
        .await
        .unwrap();

    assert!(dir.path().join("mandates.db").exists());

    let log = std::fs::read_to_string(dir.path().join("audit.ndjson")).unwrap();
    let records: Vec<AuditRecord> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let types: Vec<&str> = records.iter().map(|r| r.event.type_.as_str()).collect();
    assert_eq!(
        types,
        vec![
            EVENT_TYPE_MANDATE_VERIFIED,
            EVENT_TYPE_MANDATE_VERIFIED,
            EVENT_TYPE_MANDATE_VERIFIED,
            EVENT_TYPE_PAYMENT_AUTHORIZED,
        ]
    );

    let key = audit_key().verifying_key();
    for record in records {
        assert_eq!(record.signer_id.as_deref(), Some(AUDIT_KEY_ID));
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(record.signature.as_deref().unwrap())
            .unwrap();
        let signature = Signature::from_slice(&bytes).unwrap();
        key.verify(&jcs::to_vec(&record.event).unwrap(), &signature)
            .unwrap();
    }
}

#[test]
fn test_from_config_rejects_unloadable_audit_key() {
    let dir = tempfile::tempdir().unwrap();
    let config = EnforcerConfig {
        audit_signing_key_id: Some(AUDIT_KEY_ID.to_string()),
        audit_signing_key_path: Some(dir.path().join("missing.pem")),
        ..Default::default()
    };

    let result = MandateEnforcer::from_config(
        &config,
        Arc::new(Ed25519SignatureService::new()),
        Arc::new(NoHumanApproval),
    );
    assert!(result.is_err());

    let config = EnforcerConfig {
        audit_signing_key_id: Some(AUDIT_KEY_ID.to_string()),
        ..Default::default()
    };
    let result = MandateEnforcer::from_config(
        &config,
        Arc::new(Ed25519SignatureService::new()),
        Arc::new(NoHumanApproval),
    );
    assert!(result.is_err());
}
