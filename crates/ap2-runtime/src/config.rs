//! Enforcer configuration, loaded from YAML.
//!
//! ```yaml
//! approval_timeout_seconds: 300
//! database_path: ./mandates.db
//! audit_log_path: ./audit.ndjson
//! audit_signing_key_id: enforcer-key
//! audit_signing_key_path: keys/enforcer.pem
//! trusted_keys:
//!   - key_id: user-key-1
//!     public_key_path: keys/user.pem
//! ```

use crate::approval::DEFAULT_APPROVAL_TIMEOUT;
use crate::audit::NdjsonAuditLogger;
use crate::repository::SqliteMandateRepository;
use anyhow::{Context, Result};
use ap2_mandate::crypto::{fingerprint_verifying_key, load_public_key_pem};
use ap2_mandate::Ed25519SignatureService;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

fn default_approval_timeout_seconds() -> u64 {
    DEFAULT_APPROVAL_TIMEOUT.as_secs()
}

/// Runtime settings for [`crate::MandateEnforcer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcerConfig {
    /// Bound on each human-approval wait.
    #[serde(default = "default_approval_timeout_seconds")]
    pub approval_timeout_seconds: u64,

    /// SQLite file; in-memory store when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// NDJSON audit sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,

    /// Key used to sign audit records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_signing_key_id: Option<String>,

    /// PKCS#8 PEM for `audit_signing_key_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_signing_key_path: Option<PathBuf>,

    /// Verification keys for mandate proofs.
    #[serde(default)]
    pub trusted_keys: Vec<TrustedKey>,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            approval_timeout_seconds: default_approval_timeout_seconds(),
            database_path: None,
            audit_log_path: None,
            audit_signing_key_id: None,
            audit_signing_key_path: None,
            trusted_keys: Vec::new(),
        }
    }
}

/// A public key trusted to sign mandates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedKey {
    /// Verification method named in mandate proofs
    pub key_id: String,

    /// SPKI PEM file
    pub public_key_path: PathBuf,

    /// Expected `sha256:<hex>` SPKI fingerprint, checked on load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl EnforcerConfig {
    /// Load configuration from a YAML file.
    ///
    /// Relative paths are resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read enforcer config: {}", path.display()))?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        for path in [
            self.database_path.as_mut(),
            self.audit_log_path.as_mut(),
            self.audit_signing_key_path.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            resolve(path);
        }
        for key in &mut self.trusted_keys {
            resolve(&mut key.public_key_path);
        }
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("failed to parse enforcer config YAML")
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_seconds)
    }

    /// Load every trusted key into `service`; returns how many were added.
    pub fn load_trusted_keys(&self, service: &Ed25519SignatureService) -> Result<usize> {
        for trusted in &self.trusted_keys {
            let key = load_public_key_pem(&trusted.public_key_path)?;

            if let Some(expected) = &trusted.fingerprint {
                let actual = fingerprint_verifying_key(&key)?;
                if &actual != expected {
                    anyhow::bail!(
                        "fingerprint mismatch for {}: expected {}, got {}",
                        trusted.public_key_path.display(),
                        expected,
                        actual
                    );
                }
            }

            service
                .trust_key(trusted.key_id.clone(), key)
                .with_context(|| format!("failed to trust key {}", trusted.key_id))?;
            debug!(key_id = %trusted.key_id, "trusted mandate key loaded");
        }
        Ok(self.trusted_keys.len())
    }

    /// Load the audit signing key into `service`; returns its key id.
    ///
    /// Id and path must be set together.
    pub fn load_audit_signing_key(
        &self,
        service: &Ed25519SignatureService,
    ) -> Result<Option<String>> {
        match (&self.audit_signing_key_id, &self.audit_signing_key_path) {
            (None, None) => Ok(None),
            (Some(key_id), Some(path)) => {
                service.add_signing_key_pem(key_id, path).with_context(|| {
                    format!("failed to load audit signing key: {}", path.display())
                })?;
                debug!(key_id = %key_id, "audit signing key loaded");
                Ok(Some(key_id.clone()))
            }
            (Some(key_id), None) => {
                anyhow::bail!("audit_signing_key_id {key_id} set without audit_signing_key_path")
            }
            (None, Some(path)) => anyhow::bail!(
                "audit_signing_key_path {} set without audit_signing_key_id",
                path.display()
            ),
        }
    }

    pub fn open_repository(&self) -> Result<SqliteMandateRepository> {
        match &self.database_path {
            Some(path) => SqliteMandateRepository::open(path)
                .with_context(|| format!("failed to open mandate database: {}", path.display())),
            None => SqliteMandateRepository::memory().context("failed to open in-memory store"),
        }
    }

    pub fn open_audit_logger(&self) -> Result<Option<NdjsonAuditLogger>> {
        self.audit_log_path
            .as_deref()
            .map(|path| {
                NdjsonAuditLogger::open(path)
                    .with_context(|| format!("failed to open audit log: {}", path.display()))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn write_private_pem(key: &SigningKey, path: &Path) {
        use ed25519_dalek::pkcs8::{EncodePrivateKey, spki::der::pem::LineEnding};
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        fs::write(path, pem.as_bytes()).unwrap();
    }

    fn write_public_pem(key: &SigningKey, path: &Path) {
        use ed25519_dalek::pkcs8::{EncodePublicKey, spki::der::pem::LineEnding};
        let pem = key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        fs::write(path, pem).unwrap();
    }

    #[test]
    fn test_defaults() {
        let config = EnforcerConfig::from_yaml("{}").unwrap();
        assert_eq!(config, EnforcerConfig::default());
        assert_eq!(config.approval_timeout(), Duration::from_secs(300));
        assert!(config.open_audit_logger().unwrap().is_none());
    }

    #[test]
    fn test_parse_full() {
        let yaml = r#"
approval_timeout_seconds: 30
database_path: /var/lib/ap2/mandates.db
audit_log_path: /var/log/ap2/audit.ndjson
audit_signing_key_id: enforcer-key
trusted_keys:
  - key_id: user-key-1
    public_key_path: keys/user.pem
"#;
        let config = EnforcerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.approval_timeout(), Duration::from_secs(30));
        assert_eq!(config.audit_signing_key_id.as_deref(), Some("enforcer-key"));
        assert_eq!(config.trusted_keys[0].key_id, "user-key-1");
        assert!(config.trusted_keys[0].fingerprint.is_none());
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        assert!(EnforcerConfig::from_yaml("approval_timeout_seconds: soon").is_err());
    }

    #[test]
    fn test_load_trusted_keys_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("keys")).unwrap();
        let key = SigningKey::from_bytes(&[3u8; 32]);
        write_public_pem(&key, &dir.path().join("keys/user.pem"));

        let fingerprint = fingerprint_verifying_key(&key.verifying_key()).unwrap();
        let config_path = dir.path().join("enforcer.yaml");
        std::fs::write(
            &config_path,
            format!(
                "trusted_keys:\n  - key_id: user-key-1\n    public_key_path: keys/user.pem\n    fingerprint: \"{fingerprint}\"\n"
            ),
        )
        .unwrap();

        let config = EnforcerConfig::from_file(&config_path).unwrap();
        let service = Ed25519SignatureService::new();
        assert_eq!(config.load_trusted_keys(&service).unwrap(), 1);
        assert_eq!(
            service.verifying_key("user-key-1"),
            Some(key.verifying_key())
        );
    }

    #[test]
    fn test_load_trusted_keys_fingerprint_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.pem");
        write_public_pem(&SigningKey::from_bytes(&[3u8; 32]), &path);

        let config = EnforcerConfig {
            trusted_keys: vec![TrustedKey {
                key_id: "user-key-1".to_string(),
                public_key_path: path,
                fingerprint: Some("sha256:00".to_string()),
            }],
            ..Default::default()
        };
        let err = config
            .load_trusted_keys(&Ed25519SignatureService::new())
            .unwrap_err();
        assert!(err.to_string().contains("fingerprint mismatch"));
    }

    #[test]
    fn test_from_file_resolves_all_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("enforcer.yaml");
        std::fs::write(
            &config_path,
            "database_path: ./mandates.db\naudit_log_path: logs/audit.ndjson\naudit_signing_key_id: enforcer-key\naudit_signing_key_path: keys/enforcer.pem\n",
        )
        .unwrap();

        let config = EnforcerConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.database_path,
            Some(dir.path().join("./mandates.db"))
        );
        assert_eq!(
            config.audit_log_path,
            Some(dir.path().join("logs/audit.ndjson"))
        );
        assert_eq!(
            config.audit_signing_key_path,
            Some(dir.path().join("keys/enforcer.pem"))
        );
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("elsewhere.db");
        let config_path = dir.path().join("enforcer.yaml");
        std::fs::write(
            &config_path,
            format!("database_path: \"{}\"\n", db.display()),
        )
        .unwrap();

        let config = EnforcerConfig::from_file(&config_path).unwrap();
        assert_eq!(config.database_path, Some(db));
    }

    #[test]
    fn test_load_audit_signing_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = SigningKey::from_bytes(&[5u8; 32]);
        let path = dir.path().join("enforcer.pem");
        write_private_pem(&key, &path);

        let config = EnforcerConfig {
            audit_signing_key_id: Some("enforcer-key".to_string()),
            audit_signing_key_path: Some(path),
            ..Default::default()
        };
        let service = Ed25519SignatureService::new();
        assert_eq!(
            config.load_audit_signing_key(&service).unwrap().as_deref(),
            Some("enforcer-key")
        );
        assert_eq!(
            service.verifying_key("enforcer-key"),
            Some(key.verifying_key())
        );
    }

    #[test]
    fn test_audit_signing_key_id_requires_path() {
        let config = EnforcerConfig {
            audit_signing_key_id: Some("enforcer-key".to_string()),
            ..Default::default()
        };
        let err = config
            .load_audit_signing_key(&Ed25519SignatureService::new())
            .unwrap_err();
        assert!(err.to_string().contains("without audit_signing_key_path"));
    }

    #[test]
    fn test_missing_audit_signing_key_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = EnforcerConfig {
            audit_signing_key_id: Some("enforcer-key".to_string()),
            audit_signing_key_path: Some(dir.path().join("missing.pem")),
            ..Default::default()
        };
        assert!(config
            .load_audit_signing_key(&Ed25519SignatureService::new())
            .is_err());
    }
}
