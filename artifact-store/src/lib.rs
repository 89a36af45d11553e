//! Durable JSON and Markdown artifacts shared between pipeline stages.
//!
//! Every write goes to a uniquely named temp file in the target directory,
//! is synced, then renamed over the destination. Readers therefore see
//! either the previous file or the complete new one.

pub mod checkpoint;

#[cfg(test)]
mod tests;

pub use checkpoint::{Checkpoint, CheckpointStore};

use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use threadscope_core::{ArtifactError, CoreError};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Locations of every artifact produced for one concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    dir: PathBuf,
    prefix: String,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}_{}", self.prefix, suffix))
    }

    pub fn threads(&self) -> PathBuf {
        self.file("reddit_threads.json")
    }

    pub fn analysis_results(&self) -> PathBuf {
        self.file("final_analysis_results.json")
    }

    pub fn filtered_out(&self) -> PathBuf {
        self.file("filtered_out_threads.json")
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.file("analysis_checkpoint.json")
    }

    pub fn thematic_summary(&self) -> PathBuf {
        self.file("thematic_summary.json")
    }

    pub fn report(&self) -> PathBuf {
        self.file("market_validation_report.md")
    }
}

fn write_failed(path: &Path, reason: impl ToString) -> CoreError {
    CoreError::Artifact(ArtifactError::WriteFailed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    })
}

/// Atomically replaces `path` with `bytes`, creating parent directories.
pub async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .map_err(|e| write_failed(path, e))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| write_failed(path, "path has no file name"))?
        .to_string_lossy();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(write_failed(path, e));
    }

    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes).await
}

pub async fn write_text_atomic(path: &Path, text: &str) -> Result<(), CoreError> {
    write_bytes_atomic(path, text.as_bytes()).await
}

/// Reads a JSON artifact. A missing file is `NotFound`, an unparseable one `Corrupt`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ArtifactError::NotFound {
                path: path.display().to_string(),
            }
            .into())
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&bytes).map_err(|e| {
        ArtifactError::Corrupt {
            path: path.display().to_string(),
            details: e.to_string(),
        }
        .into()
    })
}
