//! Filesystem output: the JSON report and the assignments JSON Lines file

use post_classifier_domain::{Assignment, ClassificationReport};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum ReportWriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

async fn ensure_parent(path: &Path) -> Result<(), ReportWriteError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Write the report as pretty-printed JSON. The file is written next to its
/// destination and renamed into place, so readers never see a partial report.
pub async fn write_report(path: &Path, report: &ClassificationReport) -> Result<(), ReportWriteError> {
    ensure_parent(path).await?;

    let mut json = serde_json::to_vec_pretty(report)?;
    json.push(b'\n');

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, &json).await?;
    fs::rename(&tmp, path).await?;

    tracing::debug!(path = %path.display(), bytes = json.len(), "Wrote report");
    Ok(())
}

/// Write one assignment per line, truncating any previous file
pub async fn write_assignments(path: &Path, assignments: &[Assignment]) -> Result<(), ReportWriteError> {
    ensure_parent(path).await?;

    let mut file = fs::File::create(path).await?;
    for assignment in assignments {
        let line = serde_json::to_string(assignment)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
    }
    file.flush().await?;

    tracing::debug!(path = %path.display(), count = assignments.len(), "Wrote assignments");
    Ok(())
}
