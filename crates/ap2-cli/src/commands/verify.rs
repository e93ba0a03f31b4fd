//! `ap2 verify` - Verify an intent/cart/payment chain against a request.

use anyhow::Result;
use ap2_mandate::crypto::load_public_key_pem;
use ap2_mandate::{
    ChainAuthorization, Ed25519SignatureService, Mandate, MandateKind, MandateVerifier,
    MandateViolation, PaymentRequest, Signable,
};
use ap2_runtime::EnforcerConfig;
use chrono::{DateTime, Utc};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::{read_json, read_mandate};
use crate::exit_codes;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Signed intent mandate file
    #[arg(long)]
    pub intent: PathBuf,

    /// Signed cart mandate file
    #[arg(long)]
    pub cart: PathBuf,

    /// Signed payment mandate file
    #[arg(long)]
    pub payment: PathBuf,

    /// Payment request file (JSON)
    #[arg(long)]
    pub request: PathBuf,

    /// Public key file (SPKI PEM) trusted for every proof in the chain
    #[arg(long, conflicts_with = "trust_policy")]
    pub pubkey: Option<PathBuf>,

    /// Enforcer config (YAML) whose trusted_keys are used
    #[arg(long, conflicts_with = "pubkey")]
    pub trust_policy: Option<PathBuf>,

    /// Verification time (RFC 3339); defaults to now
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,

    /// Print the authorization receipt as JSON
    #[arg(long)]
    pub json: bool,

    /// Quiet mode - only exit code, no output
    #[arg(long, short)]
    pub quiet: bool,
}

pub fn cmd_verify(args: VerifyArgs) -> i32 {
    match run_verify(&args) {
        Ok(receipt) => {
            if !args.quiet {
                print_receipt(&receipt, args.json);
            }
            exit_codes::OK
        }
        Err(e) => {
            if !args.quiet {
                eprintln!("error: {e:#}");
            }
            match e.downcast_ref::<VerifyError>() {
                Some(verify_err) => verify_err.exit_code(),
                None => exit_codes::INPUT_ERROR,
            }
        }
    }
}

fn run_verify(args: &VerifyArgs) -> Result<ChainAuthorization> {
    let intent = read_kind(&args.intent, MandateKind::Intent, Mandate::as_intent)?;
    let cart = read_kind(&args.cart, MandateKind::Cart, Mandate::as_cart)?;
    let payment = read_kind(&args.payment, MandateKind::Payment, Mandate::as_payment)?;
    let request: PaymentRequest = read_json(&args.request, "payment request")?;

    let proofs: [&dyn Signable; 3] = [&intent, &cart, &payment];
    for mandate in proofs {
        if mandate.proof().is_none() {
            return Err(VerifyError::Unsigned {
                mandate_id: mandate.credential_id().to_string(),
            }
            .into());
        }
    }

    let signatures = Ed25519SignatureService::new();
    if let Some(pubkey_path) = &args.pubkey {
        let key = load_public_key_pem(pubkey_path)?;
        for mandate in proofs {
            if let Some(proof) = mandate.proof() {
                signatures.trust_key(proof.verification_method(), key)?;
            }
        }
    } else if let Some(policy_path) = &args.trust_policy {
        let config = EnforcerConfig::from_file(policy_path)?;
        config.load_trusted_keys(&signatures)?;
        for mandate in proofs {
            if let Some(proof) = mandate.proof() {
                if signatures.verifying_key(proof.verification_method()).is_none() {
                    return Err(VerifyError::KeyNotTrusted {
                        key_id: proof.verification_method().to_string(),
                    }
                    .into());
                }
            }
        }
    } else {
        anyhow::bail!("must specify --pubkey or --trust-policy");
    }

    let verifier = MandateVerifier::new(Arc::new(signatures));
    let now = args.at.unwrap_or_else(Utc::now);
    verifier
        .verify_chain_at(now, &intent, &cart, &payment, &request)
        .map_err(|v| VerifyError::from(v).into())
}

/// Read a mandate file and require it to be of `kind`.
fn read_kind<T: Clone>(
    path: &Path,
    kind: MandateKind,
    select: fn(&Mandate) -> Option<&T>,
) -> Result<T> {
    let mandate = read_mandate(path)?;
    match select(&mandate) {
        Some(m) => Ok(m.clone()),
        None => anyhow::bail!(
            "{} holds a {} mandate, expected {kind}",
            path.display(),
            mandate.kind()
        ),
    }
}

fn print_receipt(receipt: &ChainAuthorization, json: bool) {
    if json {
        match serde_json::to_string_pretty(receipt) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("error: failed to encode receipt: {e}"),
        }
        return;
    }
    println!("Verification successful!");
    println!();
    println!("  intent:      {}", receipt.intent_mandate_id);
    println!("  cart:        {}", receipt.cart_mandate_id);
    println!("  payment:     {}", receipt.payment_mandate_id);
    println!("  merchant:    {}", receipt.merchant_id);
    println!("  amount:      {} {}", receipt.amount, receipt.currency_code);
    println!("  verified_at: {}", receipt.verified_at);
}

/// Verification outcome other than success.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("mandate {mandate_id} is not signed")]
    Unsigned { mandate_id: String },

    #[error("key not trusted: {key_id}")]
    KeyNotTrusted { key_id: String },

    #[error(transparent)]
    Violation(#[from] MandateViolation),
}

impl VerifyError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unsigned { .. } => exit_codes::UNSIGNED,
            Self::KeyNotTrusted { .. } => exit_codes::KEY_NOT_TRUSTED,
            Self::Violation(v) => v.violation_type.exit_code(),
        }
    }
}
