//! `ap2 export` - Print a mandate as a verifiable credential.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use super::read_mandate;
use crate::exit_codes;

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Mandate file (JSON, tagged with "mandate_kind")
    pub mandate: PathBuf,
}

pub fn cmd_export(args: ExportArgs) -> i32 {
    match run_export(&args) {
        Ok(json) => {
            println!("{json}");
            exit_codes::OK
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::INPUT_ERROR
        }
    }
}

fn run_export(args: &ExportArgs) -> Result<String> {
    let mandate = read_mandate(&args.mandate)?;
    let credential = mandate
        .to_verifiable_credential()
        .with_context(|| format!("failed to build credential for {}", mandate.id()))?;
    Ok(serde_json::to_string_pretty(&credential)?)
}
