//! `ap2` subcommands.

pub mod export;
pub mod keygen;
pub mod revoke;
pub mod sign;
pub mod verify;

use anyhow::{Context, Result};
use ap2_mandate::Mandate;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "ap2", version, about = "Sign, verify and revoke AP2 payment mandates")]
pub struct Cli {
    /// Log filter when RUST_LOG is unset (e.g. "debug", "ap2_mandate=trace")
    #[arg(long, global = true, default_value = "info", env = "AP2_LOG_LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a mandate signing key and register it as trusted
    Keygen(keygen::KeygenArgs),

    /// Sign a mandate
    Sign(sign::SignArgs),

    /// Verify an intent/cart/payment chain against a payment request
    Verify(verify::VerifyArgs),

    /// Revoke a stored mandate
    Revoke(revoke::RevokeArgs),

    /// Print a mandate as a verifiable credential
    Export(export::ExportArgs),
}

pub async fn dispatch(command: Command) -> i32 {
    match command {
        Command::Keygen(args) => keygen::cmd_keygen(args),
        Command::Sign(args) => sign::cmd_sign(args),
        Command::Verify(args) => verify::cmd_verify(args),
        Command::Revoke(args) => revoke::cmd_revoke(args),
        Command::Export(args) => export::cmd_export(args),
    }
}

/// Read and parse a JSON document.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what}: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {what} JSON: {}", path.display()))
}

pub(crate) fn read_mandate(path: &Path) -> Result<Mandate> {
    read_json(path, "mandate")
}
