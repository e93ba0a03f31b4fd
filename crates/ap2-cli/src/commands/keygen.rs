//! `ap2 keygen` - Generate a mandate signing key and register it as trusted.

use anyhow::{Context, Result};
use ap2_mandate::{Ed25519SignatureService, SignatureService};
use ap2_runtime::config::TrustedKey;
use ap2_runtime::EnforcerConfig;
use clap::Args;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::exit_codes;

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Verification method recorded in proofs signed with this key
    #[arg(long)]
    pub key_id: String,

    /// Output directory for `<key-id>.pem` and `<key-id>.pub.pem`
    #[arg(long, default_value = ".")]
    pub out: PathBuf,

    /// Enforcer config (YAML) to add the key to; created if missing.
    /// Without it a trusted_keys snippet is printed instead.
    #[arg(long)]
    pub trust_policy: Option<PathBuf>,

    /// Overwrite existing key files and replace an existing trusted entry
    #[arg(long, short)]
    pub force: bool,
}

/// Single-entry config fragment printed when no trust policy is given.
#[derive(Serialize)]
struct TrustedKeysSnippet<'a> {
    trusted_keys: [&'a TrustedKey; 1],
}

pub fn cmd_keygen(args: KeygenArgs) -> i32 {
    match run_keygen(&args) {
        Ok(()) => exit_codes::OK,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::INPUT_ERROR
        }
    }
}

fn run_keygen(args: &KeygenArgs) -> Result<()> {
    let key_id = args.key_id.trim();
    if key_id.is_empty() || key_id.contains(['/', '\\']) {
        anyhow::bail!("invalid key id: {:?}", args.key_id);
    }

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create directory: {}", args.out.display()))?;

    let private_path = args.out.join(format!("{key_id}.pem"));
    let public_path = args.out.join(format!("{key_id}.pub.pem"));
    if !args.force {
        for path in [&private_path, &public_path] {
            if path.exists() {
                anyhow::bail!(
                    "key file already exists: {} (use --force to overwrite)",
                    path.display()
                );
            }
        }
    }

    // Check the policy before any key material is written.
    let policy = match &args.trust_policy {
        Some(path) => Some((path, load_policy(path, key_id, args.force)?)),
        None => None,
    };

    let service = Ed25519SignatureService::new();
    let fingerprint = service.generate_key_pair(key_id)?;
    service.write_signing_key_pem(key_id, &private_path)?;
    fs::write(&public_path, service.public_key_pem(key_id)?)
        .with_context(|| format!("failed to write public key: {}", public_path.display()))?;

    println!("Generated ed25519 key {key_id}:");
    println!("  Private key: {} (PKCS#8 PEM, mode 0600)", private_path.display());
    println!("  Public key:  {} (SPKI PEM)", public_path.display());

    match policy {
        Some((path, mut config)) => {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            let entry = TrustedKey {
                key_id: key_id.to_string(),
                public_key_path: relative_to(&public_path, base),
                fingerprint: Some(fingerprint.clone()),
            };
            config.trusted_keys.retain(|k| k.key_id != key_id);
            config.trusted_keys.push(entry);
            let yaml = serde_yaml::to_string(&config).context("failed to encode enforcer config")?;
            fs::write(path, yaml)
                .with_context(|| format!("failed to write trust policy: {}", path.display()))?;
            println!("  Trusted in:  {}", path.display());
        }
        None => {
            let entry = TrustedKey {
                key_id: key_id.to_string(),
                public_key_path: public_path.clone(),
                fingerprint: Some(fingerprint.clone()),
            };
            let yaml = serde_yaml::to_string(&TrustedKeysSnippet {
                trusted_keys: [&entry],
            })
            .context("failed to encode trusted key entry")?;
            println!();
            print!("{yaml}");
        }
    }

    println!();
    println!("fingerprint: {fingerprint}");
    Ok(())
}

/// Parse an existing policy without rewriting its paths, or start an empty one.
fn load_policy(path: &Path, key_id: &str, force: bool) -> Result<EnforcerConfig> {
    let config = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read trust policy: {}", path.display()))?;
        EnforcerConfig::from_yaml(&content)?
    } else {
        EnforcerConfig::default()
    };

    if !force && config.trusted_keys.iter().any(|k| k.key_id == key_id) {
        anyhow::bail!(
            "key {key_id} already trusted in {} (use --force to replace)",
            path.display()
        );
    }
    Ok(config)
}

/// `path` relative to `base` when it lies beneath it, so the policy resolves
/// it from its own directory.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let absolute = |p: &Path| std::path::absolute(p).unwrap_or_else(|_| p.to_path_buf());
    let path_abs = absolute(path);
    match path_abs.strip_prefix(absolute(base)) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path_abs,
    }
}
