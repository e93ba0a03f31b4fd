//! `ap2 sign` - Sign a mandate.

use anyhow::{Context, Result};
use ap2_mandate::{Ed25519SignatureService, Signable, SignatureService};
use clap::Args;
use std::fs;
use std::path::PathBuf;

use super::read_mandate;
use crate::exit_codes;

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Mandate file (JSON, tagged with "mandate_kind")
    pub mandate: PathBuf,

    /// Private key file (PKCS#8 PEM)
    #[arg(long, short)]
    pub key: PathBuf,

    /// Key id recorded as the proof's verification method
    #[arg(long)]
    pub key_id: String,

    /// Output file (required unless --in-place)
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    /// Modify input file in place
    #[arg(long, conflicts_with = "out")]
    pub in_place: bool,
}

pub fn cmd_sign(args: SignArgs) -> i32 {
    match run_sign(args) {
        Ok(()) => exit_codes::OK,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::INPUT_ERROR
        }
    }
}

fn run_sign(args: SignArgs) -> Result<()> {
    let output_path = if args.in_place {
        args.mandate.clone()
    } else if let Some(out) = args.out {
        out
    } else {
        anyhow::bail!("must specify --out <PATH> or --in-place");
    };

    let signatures = Ed25519SignatureService::new();
    signatures.add_signing_key_pem(&args.key_id, &args.key)?;

    let mut mandate = read_mandate(&args.mandate)?;
    mandate
        .validate()
        .with_context(|| format!("invalid mandate: {}", args.mandate.display()))?;
    if mandate.proof().is_some() {
        tracing::warn!(mandate_id = mandate.id(), "replacing existing proof");
    }

    signatures
        .sign(&mut mandate, &args.key_id)
        .with_context(|| format!("failed to sign mandate {}", mandate.id()))?;

    let output_json = serde_json::to_string_pretty(&mandate)?;
    fs::write(&output_path, output_json)
        .with_context(|| format!("failed to write output: {}", output_path.display()))?;

    println!("Signed {} mandate {}:", mandate.kind(), mandate.id());
    println!("  Input:  {}", args.mandate.display());
    println!("  Output: {}", output_path.display());
    if let Some(proof) = mandate.proof() {
        println!();
        println!("Proof:");
        println!("  type:                {}", proof.proof_type());
        println!("  verification_method: {}", proof.verification_method());
        println!("  created:             {}", proof.created());
    }

    Ok(())
}
