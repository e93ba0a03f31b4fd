//! Credential and proof model.
//!
//! Mandates are verifiable credentials: a claim set plus a detached proof.
//! Only the subset of the W3C VC shape that the verifier depends on is
//! modelled here.
//!
//! # Signing input
//!
//! ```text
//! document       = mandate serialised WITHOUT its `proof` field
//! proof_options  = proof WITHOUT `signature_value`
//! signing_input  = JCS({"document": document, "proof_options": proof_options})
//! signed bytes   = DSSEv1_PAE(payload_type(kind), signing_input)
//! ```
//!
//! Covering the proof options means the `created` timestamp and the
//! verification method cannot be swapped after signing.

use crate::crypto::jcs;
use crate::error::SignatureError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Proof type produced by the Ed25519 signature service.
pub const ED25519_PROOF_TYPE: &str = "Ed25519Signature2020";

/// Default proof purpose for mandate credentials.
pub const PROOF_PURPOSE_ASSERTION: &str = "assertionMethod";

/// Cryptographic proof attached to exactly one credential.
///
/// Built once (optionally extended with attributes) and then attached;
/// there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialProof {
    #[serde(rename = "type")]
    proof_type: String,
    created: DateTime<Utc>,
    verification_method: String,
    proof_purpose: String,
    #[serde(default)]
    signature_value: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extensions: BTreeMap<String, Value>,
}

/// Proof fields covered by the signature.
#[derive(Debug, Clone, Serialize)]
pub struct ProofOptions<'a> {
    #[serde(rename = "type")]
    pub proof_type: &'a str,
    pub created: DateTime<Utc>,
    pub verification_method: &'a str,
    pub proof_purpose: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: &'a BTreeMap<String, Value>,
}

impl CredentialProof {
    /// Create an unsigned proof template.
    pub fn new(
        proof_type: impl Into<String>,
        created: DateTime<Utc>,
        verification_method: impl Into<String>,
        proof_purpose: impl Into<String>,
    ) -> Self {
        Self {
            proof_type: proof_type.into(),
            created,
            verification_method: verification_method.into(),
            proof_purpose: proof_purpose.into(),
            signature_value: String::new(),
            extensions: BTreeMap::new(),
        }
    }

    /// Attach the signature value.
    pub fn with_signature_value(mut self, signature_value: impl Into<String>) -> Self {
        self.signature_value = signature_value.into();
        self
    }

    /// Add an extension attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn proof_type(&self) -> &str {
        &self.proof_type
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn verification_method(&self) -> &str {
        &self.verification_method
    }

    pub fn proof_purpose(&self) -> &str {
        &self.proof_purpose
    }

    pub fn signature_value(&self) -> &str {
        &self.signature_value
    }

    pub fn extensions(&self) -> &BTreeMap<String, Value> {
        &self.extensions
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    pub fn options(&self) -> ProofOptions<'_> {
        ProofOptions {
            proof_type: &self.proof_type,
            created: self.created,
            verification_method: &self.verification_method,
            proof_purpose: &self.proof_purpose,
            extensions: &self.extensions,
        }
    }
}

/// Capability shared by every signable mandate.
///
/// Implemented by each concrete mandate and by the [`crate::Mandate`] sum
/// type, so a signature service never needs to know which kind it holds.
pub trait Signable {
    /// Credential identifier (the mandate id).
    fn credential_id(&self) -> &str;

    /// DSSE payload type; distinct per mandate kind.
    fn payload_type(&self) -> &'static str;

    /// The claim document with the proof slot removed.
    fn document(&self) -> Result<Value, SignatureError>;

    fn proof(&self) -> Option<&CredentialProof>;

    /// Attach a proof. Last write wins.
    fn set_proof(&mut self, proof: CredentialProof);

    fn has_proof(&self) -> bool {
        self.proof().is_some()
    }

    /// JCS bytes of [`Signable::document`].
    fn canonical_bytes(&self) -> Result<Vec<u8>, SignatureError> {
        let document = self.document()?;
        jcs::to_vec(&document).map_err(|e| SignatureError::Canonicalization {
            reason: e.to_string(),
        })
    }
}

/// Serialize `value` and drop its `proof` field.
pub(crate) fn unsigned_document<T: Serialize>(value: &T) -> Result<Value, SignatureError> {
    let mut document = serde_json::to_value(value).map_err(|e| SignatureError::Canonicalization {
        reason: e.to_string(),
    })?;
    if let Value::Object(map) = &mut document {
        map.remove("proof");
    }
    Ok(document)
}

/// Canonical signing input for a credential under the given proof.
pub fn signing_input(
    credential: &dyn Signable,
    proof: &CredentialProof,
) -> Result<Vec<u8>, SignatureError> {
    #[derive(Serialize)]
    struct SigningInput<'a> {
        document: Value,
        proof_options: ProofOptions<'a>,
    }

    let input = SigningInput {
        document: credential.document()?,
        proof_options: proof.options(),
    };
    jcs::to_vec(&input).map_err(|e| SignatureError::Canonicalization {
        reason: e.to_string(),
    })
}

/// Subject of an exported credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSubject {
    pub id: String,
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl CredentialSubject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            claims: Map::new(),
        }
    }

    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }
}

/// W3C-style credential view of a mandate, for export and interop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredential {
    pub id: String,
    #[serde(rename = "type")]
    pub types: Vec<String>,
    pub issuer: String,
    pub issuance_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub credential_subject: CredentialSubject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<CredentialProof>,
}

impl VerifiableCredential {
    pub fn has_proof(&self) -> bool {
        self.proof.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_proof_builder_keeps_fields() {
        let proof = CredentialProof::new(
            ED25519_PROOF_TYPE,
            fixed(),
            "user-key-1",
            PROOF_PURPOSE_ASSERTION,
        )
        .with_attribute("key_fingerprint", "sha256:abc")
        .with_signature_value("c2ln");

        assert_eq!(proof.proof_type(), ED25519_PROOF_TYPE);
        assert_eq!(proof.verification_method(), "user-key-1");
        assert_eq!(proof.signature_value(), "c2ln");
        assert_eq!(
            proof.attribute("key_fingerprint"),
            Some(&Value::from("sha256:abc"))
        );
    }

    #[test]
    fn test_proof_serialization_uses_type_key() {
        let proof = CredentialProof::new("T", fixed(), "k", "p");
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["type"], "T");
        assert!(json.get("extensions").is_none());
    }

    #[test]
    fn test_options_exclude_signature_value() {
        let proof = CredentialProof::new("T", fixed(), "k", "p").with_signature_value("sig");
        let json = serde_json::to_value(proof.options()).unwrap();
        assert!(json.get("signature_value").is_none());
        assert_eq!(json["verification_method"], "k");
    }

    #[test]
    fn test_unsigned_document_drops_proof() {
        let doc = unsigned_document(&serde_json::json!({"id": "x", "proof": {"a": 1}})).unwrap();
        assert_eq!(doc, serde_json::json!({"id": "x"}));
    }

    #[test]
    fn test_subject_claims() {
        let subject = CredentialSubject::new("merchant-1").with_claim("max", "200.00");
        assert_eq!(subject.claim("max"), Some(&Value::from("200.00")));
        assert!(subject.claim("missing").is_none());
    }
}
