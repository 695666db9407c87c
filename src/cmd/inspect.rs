//! Operator helpers: `merge-agent extract` and `merge-agent sign`.

use std::path::Path;

use anyhow::{Context, Result, bail};

use merge_agent::instruction;
use merge_agent::webhook::SignatureVerifier;

pub fn cmd_extract(text: &str) -> Result<()> {
    let Some(mention) = instruction::extract(text) else {
        bail!("No instruction found in text");
    };
    let json = serde_json::to_string_pretty(&mention).context("Failed to serialize instruction")?;
    println!("{}", json);
    Ok(())
}

pub fn cmd_sign(secret: &str, file: &Path) -> Result<()> {
    if secret.is_empty() {
        bail!("Secret must not be empty");
    }
    let body = std::fs::read(file)
        .with_context(|| format!("Failed to read payload file: {}", file.display()))?;
    let Some(signature) = SignatureVerifier::new(secret).sign(&body) else {
        bail!("Failed to compute signature");
    };
    println!("{}", signature);
    Ok(())
}
