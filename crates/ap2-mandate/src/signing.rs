//! Signature capability for mandate credentials.
//!
//! The verifier depends only on [`SignatureVerifier`]; signing and key
//! management live on [`SignatureService`]. [`Ed25519SignatureService`] is
//! the in-process implementation.
//!
//! # Signing Process
//!
//! ```text
//! 1. Build proof options = {type, created, verification_method, purpose, key_fingerprint}
//! 2. signing_input = JCS({document: credential WITHOUT proof, proof_options})
//! 3. PAE = DSSEv1_PAE(payload_type(kind), signing_input)
//! 4. signature_value = base64(ed25519_sign(private_key, PAE))
//! 5. Attach proof (overwrites any earlier proof)
//! ```

use crate::credential::{
    signing_input, CredentialProof, Signable, ED25519_PROOF_TYPE, PROOF_PURPOSE_ASSERTION,
};
use crate::crypto::{self, fingerprint_verifying_key};
use crate::error::SignatureError;
use anyhow::Context as AnyhowContext;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::debug;

/// Proof extension carrying the signer's SPKI fingerprint.
pub const KEY_FINGERPRINT_ATTRIBUTE: &str = "key_fingerprint";

/// Pure signature predicate.
///
/// Returns `false` (never an error) for a credential without a proof, a
/// proof made with an unknown or mismatching key, or a credential altered
/// after signing.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, credential: &dyn Signable) -> bool;
}

/// Signing, proof creation and key generation.
pub trait SignatureService: SignatureVerifier {
    /// Sign `credential` in place with `key_id`.
    ///
    /// Fails with [`SignatureError::KeyNotFound`] for an unknown key.
    fn sign(&self, credential: &mut dyn Signable, key_id: &str) -> Result<(), SignatureError>;

    /// Unsigned proof template with `created = now`.
    fn create_proof(
        &self,
        key_id: &str,
        verification_method: &str,
        proof_purpose: &str,
    ) -> Result<CredentialProof, SignatureError>;

    /// Generate and register a key pair; returns the public key fingerprint.
    fn generate_key_pair(&self, key_id: &str) -> Result<String, SignatureError>;

    /// Detached base64 signature over raw bytes (audit records).
    fn sign_detached(&self, key_id: &str, message: &[u8]) -> Result<String, SignatureError>;

    /// Owned variant of [`SignatureService::sign`].
    fn signed<T: Signable>(&self, mut credential: T, key_id: &str) -> Result<T, SignatureError>
    where
        Self: Sized,
    {
        self.sign(&mut credential, key_id)?;
        Ok(credential)
    }
}

/// Build DSSE Pre-Authentication Encoding (PAE).
///
/// ```text
/// PAE(type, payload) = "DSSEv1" SP LEN(type) SP type SP LEN(payload) SP payload
/// ```
pub fn build_pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let type_len = payload_type.len().to_string();
    let payload_len = payload.len().to_string();

    let mut pae = Vec::with_capacity(16 + payload_type.len() + payload.len());
    pae.extend_from_slice(b"DSSEv1 ");
    pae.extend_from_slice(type_len.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_type.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_len.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload);
    pae
}

fn key_error(e: impl std::fmt::Display) -> SignatureError {
    SignatureError::Key {
        reason: e.to_string(),
    }
}

fn lock_poisoned() -> SignatureError {
    SignatureError::Key {
        reason: "keyring lock poisoned".to_string(),
    }
}

/// Ed25519 keyring: signing keys plus trusted verification keys, by key id.
///
/// A proof's `verification_method` is the key id it was made with.
#[derive(Default)]
pub struct Ed25519SignatureService {
    signing_keys: RwLock<HashMap<String, SigningKey>>,
    trusted_keys: RwLock<HashMap<String, VerifyingKey>>,
}

impl Ed25519SignatureService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signing key. Its public half is trusted as well.
    pub fn add_signing_key(
        &self,
        key_id: impl Into<String>,
        key: SigningKey,
    ) -> Result<(), SignatureError> {
        let key_id = key_id.into();
        self.trust_key(key_id.clone(), key.verifying_key())?;
        self.signing_keys
            .write()
            .map_err(|_| lock_poisoned())?
            .insert(key_id, key);
        Ok(())
    }

    /// Trust a public key for verification.
    pub fn trust_key(
        &self,
        key_id: impl Into<String>,
        key: VerifyingKey,
    ) -> Result<(), SignatureError> {
        self.trusted_keys
            .write()
            .map_err(|_| lock_poisoned())?
            .insert(key_id.into(), key);
        Ok(())
    }

    /// Trust a public key loaded from an SPKI PEM file.
    pub fn trust_key_pem(&self, key_id: &str, path: &Path) -> anyhow::Result<()> {
        let key = crypto::load_public_key_pem(path)?;
        self.trust_key(key_id, key)
            .with_context(|| format!("failed to trust key {key_id}"))
    }

    /// Register a signing key loaded from a PKCS#8 PEM file.
    pub fn add_signing_key_pem(&self, key_id: &str, path: &Path) -> anyhow::Result<()> {
        let key = crypto::load_signing_key_pem(path)?;
        self.add_signing_key(key_id, key)
            .with_context(|| format!("failed to add signing key {key_id}"))
    }

    pub fn verifying_key(&self, key_id: &str) -> Option<VerifyingKey> {
        self.trusted_keys.read().ok()?.get(key_id).copied()
    }

    /// Public key as SPKI PEM.
    pub fn public_key_pem(&self, key_id: &str) -> Result<String, SignatureError> {
        use pkcs8::{EncodePublicKey, LineEnding};
        let key = self
            .verifying_key(key_id)
            .ok_or_else(|| SignatureError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        key.to_public_key_pem(LineEnding::LF).map_err(key_error)
    }

    /// Write a registered signing key as PKCS#8 PEM, readable by the owner
    /// only. Overwrites `path`.
    pub fn write_signing_key_pem(&self, key_id: &str, path: &Path) -> anyhow::Result<()> {
        use pkcs8::{EncodePrivateKey, LineEnding};
        use std::io::Write;

        let pem = self
            .signing_key(key_id)?
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(key_error)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("failed to create key file: {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to restrict key file: {}", path.display()))?;
        }
        file.write_all(pem.as_bytes())
            .with_context(|| format!("failed to write key file: {}", path.display()))?;
        debug!(key_id, path = %path.display(), "signing key written");
        Ok(())
    }

    fn signing_key(&self, key_id: &str) -> Result<SigningKey, SignatureError> {
        self.signing_keys
            .read()
            .map_err(|_| lock_poisoned())?
            .get(key_id)
            .cloned()
            .ok_or_else(|| SignatureError::KeyNotFound {
                key_id: key_id.to_string(),
            })
    }

    fn check_signature(&self, credential: &dyn Signable) -> Result<(), String> {
        let proof = credential.proof().ok_or("credential has no proof")?;

        if proof.proof_type() != ED25519_PROOF_TYPE {
            return Err(format!("unsupported proof type {}", proof.proof_type()));
        }

        let key = self
            .verifying_key(proof.verification_method())
            .ok_or_else(|| format!("key not trusted: {}", proof.verification_method()))?;

        if let Some(claimed) = proof.attribute(KEY_FINGERPRINT_ATTRIBUTE) {
            let actual = fingerprint_verifying_key(&key).map_err(|e| e.to_string())?;
            if claimed.as_str() != Some(actual.as_str()) {
                return Err(format!("key fingerprint mismatch: claimed {claimed}, actual {actual}"));
            }
        }

        let input = signing_input(credential, proof).map_err(|e| e.to_string())?;
        let pae = build_pae(credential.payload_type(), &input);

        let signature_bytes = BASE64
            .decode(proof.signature_value())
            .map_err(|e| format!("invalid base64 signature: {e}"))?;
        let signature = ed25519_dalek::Signature::from_slice(&signature_bytes)
            .map_err(|e| format!("invalid signature bytes: {e}"))?;

        key.verify(&pae, &signature)
            .map_err(|_| "signature verification failed".to_string())
    }
}

impl SignatureVerifier for Ed25519SignatureService {
    fn verify(&self, credential: &dyn Signable) -> bool {
        match self.check_signature(credential) {
            Ok(()) => true,
            Err(reason) => {
                debug!(
                    credential_id = credential.credential_id(),
                    reason = %reason,
                    "signature rejected"
                );
                false
            }
        }
    }
}

impl SignatureService for Ed25519SignatureService {
    fn sign(&self, credential: &mut dyn Signable, key_id: &str) -> Result<(), SignatureError> {
        let key = self.signing_key(key_id)?;
        let proof = self.create_proof(key_id, key_id, PROOF_PURPOSE_ASSERTION)?;

        let input = signing_input(credential, &proof)?;
        let pae = build_pae(credential.payload_type(), &input);
        let signature = key.sign(&pae);

        credential.set_proof(proof.with_signature_value(BASE64.encode(signature.to_bytes())));
        debug!(
            credential_id = credential.credential_id(),
            key_id, "credential signed"
        );
        Ok(())
    }

    fn create_proof(
        &self,
        key_id: &str,
        verification_method: &str,
        proof_purpose: &str,
    ) -> Result<CredentialProof, SignatureError> {
        let key = self
            .verifying_key(key_id)
            .ok_or_else(|| SignatureError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        let fingerprint = fingerprint_verifying_key(&key).map_err(key_error)?;
        Ok(CredentialProof::new(
            ED25519_PROOF_TYPE,
            Utc::now(),
            verification_method,
            proof_purpose,
        )
        .with_attribute(KEY_FINGERPRINT_ATTRIBUTE, fingerprint))
    }

    fn generate_key_pair(&self, key_id: &str) -> Result<String, SignatureError> {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let fingerprint = fingerprint_verifying_key(&key.verifying_key()).map_err(key_error)?;
        self.add_signing_key(key_id, key)?;
        Ok(fingerprint)
    }

    fn sign_detached(&self, key_id: &str, message: &[u8]) -> Result<String, SignatureError> {
        let key = self.signing_key(key_id)?;
        Ok(BASE64.encode(key.sign(message).to_bytes()))
    }
}
