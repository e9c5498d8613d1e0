//! Model catalogue: one-shot invocation of the inference CLI's `list`
//! subcommand, parsed from its table output.

use serde::Serialize;
use tokio::process::Command;

use crate::errors::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub id: String,
    pub size: String,
}

/// List the models installed locally, via `<model_cli> list`.
pub async fn list_models(model_cli: &str) -> Result<Vec<ModelInfo>> {
    let output = Command::new(model_cli).arg("list").output().await?;
    if !output.status.success() {
        return Err(Error::Process {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(parse_model_table(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse the whitespace-aligned table, skipping the header row.
fn parse_model_table(stdout: &str) -> Vec<ModelInfo> {
    stdout
        .trim()
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(ModelInfo {
                name: parts.next()?.to_string(),
                id: parts.next()?.to_string(),
                size: parts.next()?.to_string(),
            })
        })
        .collect()
}
