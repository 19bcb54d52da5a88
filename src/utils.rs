use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::errors::{OrchestratorError, OrchestratorResult};

/// Appends one JSON document as a line. Creates the file (and its parent
/// directory) on first use.
pub async fn append_json_line<T: Serialize>(path: &Path, value: &T) -> OrchestratorResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Reads every line back. A missing file is an empty log, not an error.
pub async fn read_json_lines<T: DeserializeOwned>(path: &Path) -> OrchestratorResult<Vec<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| OrchestratorError::Store {
                path: path.to_path_buf(),
                message: format!("line {}: {}", n + 1, e),
            })
        })
        .collect()
}
