use crate::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use threadscope_core::{ArtifactError, CoreError, ExtractionResult};
use tokio::fs;
use tracing::{debug, info};

/// Durable record of extraction progress, keyed by post id.
///
/// Only terminal results are stored, so presence of a key means the thread
/// needs no further work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub concept_name: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub results: BTreeMap<String, ExtractionResult>,
}

impl Checkpoint {
    pub fn new(concept_name: impl Into<String>) -> Self {
        Self {
            concept_name: concept_name.into(),
            updated_at: None,
            results: BTreeMap::new(),
        }
    }

    /// Inserts or replaces the result for its post. Non-terminal results are ignored.
    pub fn upsert(&mut self, result: ExtractionResult) -> bool {
        if !result.status().is_terminal() {
            return false;
        }
        self.results.insert(result.post_id.clone(), result);
        true
    }

    pub fn contains(&self, post_id: &str) -> bool {
        self.results.contains_key(post_id)
    }

    pub fn get(&self, post_id: &str) -> Option<&ExtractionResult> {
        self.results.get(post_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the checkpoint, or an empty one when none has been written yet.
    pub async fn load(&self, concept_name: &str) -> Result<Checkpoint, CoreError> {
        match read_json::<Checkpoint>(&self.path).await {
            Ok(checkpoint) => {
                if checkpoint.concept_name != concept_name {
                    return Err(ArtifactError::Corrupt {
                        path: self.path.display().to_string(),
                        details: format!(
                            "checkpoint belongs to concept '{}', not '{}'",
                            checkpoint.concept_name, concept_name
                        ),
                    }
                    .into());
                }
                info!(
                    "Resuming from checkpoint {} with {} processed threads",
                    self.path.display(),
                    checkpoint.len()
                );
                Ok(checkpoint)
            }
            Err(CoreError::Artifact(ArtifactError::NotFound { .. })) => {
                debug!("No checkpoint at {}, starting fresh", self.path.display());
                Ok(Checkpoint::new(concept_name))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), CoreError> {
        checkpoint.updated_at = Some(Utc::now());
        write_json_atomic(&self.path, checkpoint).await?;
        debug!(
            "Checkpoint saved with {} processed threads",
            checkpoint.len()
        );
        Ok(())
    }

    /// Removes the checkpoint once the stage's final artifacts are written.
    pub async fn discard(&self) -> Result<(), CoreError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Removed checkpoint {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
