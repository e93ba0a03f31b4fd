//! `ap2 revoke` - Revoke a stored mandate.

use anyhow::{Context, Result};
use ap2_runtime::{MandateRepository, SqliteMandateRepository};
use clap::Args;
use std::path::PathBuf;

use crate::exit_codes;

#[derive(Args, Debug)]
pub struct RevokeArgs {
    /// Mandate id to revoke
    pub mandate_id: String,

    /// Mandate database (SQLite)
    #[arg(long, env = "AP2_DB")]
    pub db: PathBuf,

    /// Reason recorded with the revocation
    #[arg(long, default_value = "revoked by operator")]
    pub reason: String,
}

enum Outcome {
    Revoked,
    AlreadyRevoked(chrono::DateTime<chrono::Utc>),
    NotFound,
}

pub fn cmd_revoke(args: RevokeArgs) -> i32 {
    match run_revoke(&args) {
        Ok(Outcome::Revoked) => {
            println!("revoked: {}", args.mandate_id);
            exit_codes::OK
        }
        Ok(Outcome::AlreadyRevoked(at)) => {
            println!("already revoked: {} (at {at})", args.mandate_id);
            exit_codes::OK
        }
        Ok(Outcome::NotFound) => {
            eprintln!("error: mandate not found: {}", args.mandate_id);
            exit_codes::UNSIGNED
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::INPUT_ERROR
        }
    }
}

fn run_revoke(args: &RevokeArgs) -> Result<Outcome> {
    let repository = SqliteMandateRepository::open(&args.db)
        .with_context(|| format!("failed to open mandate store: {}", args.db.display()))?;

    if repository.revoke_mandate(&args.mandate_id, &args.reason)? {
        return Ok(Outcome::Revoked);
    }
    Ok(match repository.revoked_at(&args.mandate_id)? {
        Some(at) => Outcome::AlreadyRevoked(at),
        None => Outcome::NotFound,
    })
}
