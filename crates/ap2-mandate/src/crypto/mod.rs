//! Canonicalisation and key helpers shared by signing and verification.

pub mod jcs;

use anyhow::{Context, Result};
use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Compute a key fingerprint from SPKI-encoded public key bytes.
///
/// Returns `sha256:<lowercase-hex>`.
pub fn compute_key_fingerprint(spki_bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(spki_bytes)))
}

/// Compute a key fingerprint from a VerifyingKey.
pub fn fingerprint_verifying_key(key: &VerifyingKey) -> Result<String> {
    use pkcs8::EncodePublicKey;
    let doc = key
        .to_public_key_der()
        .context("failed to encode public key as SPKI DER")?;
    Ok(compute_key_fingerprint(doc.as_bytes()))
}

/// Load an Ed25519 public key from an SPKI PEM file.
pub fn load_public_key_pem(path: &Path) -> Result<VerifyingKey> {
    use pkcs8::DecodePublicKey;
    let pem = fs::read_to_string(path)
        .with_context(|| format!("failed to read public key: {}", path.display()))?;
    VerifyingKey::from_public_key_pem(&pem)
        .with_context(|| format!("failed to parse public key PEM: {}", path.display()))
}

/// Load an Ed25519 signing key from a PKCS#8 PEM file.
pub fn load_signing_key_pem(path: &Path) -> Result<ed25519_dalek::SigningKey> {
    use pkcs8::DecodePrivateKey;
    let pem = fs::read_to_string(path)
        .with_context(|| format!("failed to read private key: {}", path.display()))?;
    ed25519_dalek::SigningKey::from_pkcs8_pem(&pem)
        .with_context(|| format!("failed to parse private key PEM: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn test_fingerprint_lowercase_hex() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let fp = fingerprint_verifying_key(&key.verifying_key()).unwrap();

        assert!(fp.starts_with("sha256:"));
        assert_eq!(fp.len(), 71);
        assert!(fp[7..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_pem_roundtrip_through_files() {
        use pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

        let dir = tempfile::tempdir().unwrap();
        let key = SigningKey::generate(&mut rand::thread_rng());
        let private_path = dir.path().join("private_key.pem");
        let public_path = dir.path().join("public_key.pem");

        fs::write(
            &private_path,
            key.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes(),
        )
        .unwrap();
        fs::write(
            &public_path,
            key.verifying_key().to_public_key_pem(LineEnding::LF).unwrap(),
        )
        .unwrap();

        let loaded_private = load_signing_key_pem(&private_path).unwrap();
        let loaded_public = load_public_key_pem(&public_path).unwrap();
        assert_eq!(loaded_private.to_bytes(), key.to_bytes());
        assert_eq!(loaded_public, key.verifying_key());
    }
}
