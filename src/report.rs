use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::types::AnalysisResult;

/// Persist `result` as pretty JSON, creating parent directories as needed.
pub async fn write_report(path: &Path, result: &AnalysisResult) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(result)?;
    tokio::fs::write(path, body).await?;
    info!("Report written to {:?}", path);
    Ok(())
}

pub async fn read_report(path: &Path) -> Result<AnalysisResult> {
    let raw = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}
