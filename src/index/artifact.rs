use super::cache::HashCache;
use super::inverted::{InvertedIndex, Posting};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ARTIFACT_SUFFIX: &str = ".index.json";

/// Per-book index file: the durable form of one book's term counts. Keys are
/// kept sorted (`BTreeMap`) so the file content is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexArtifact {
    pub book_id: u32,
    pub lake_path: String,
    pub tokens_total: usize,
    pub terms_unique: usize,
    pub hash: String,
    pub terms: BTreeMap<String, u32>,
}

pub fn artifact_path(index_root: &Path, book_id: u32) -> PathBuf {
    index_root.join(format!("{}{}", book_id, ARTIFACT_SUFFIX))
}

pub fn write_artifact(path: &Path, artifact: &IndexArtifact) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(artifact)?)?;
    Ok(())
}

pub fn read_artifact(path: &Path) -> Result<IndexArtifact> {
    let raw = std::fs::read_to_string(path)?;
    let artifact: IndexArtifact = serde_json::from_str(&raw)?;
    Ok(artifact)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Folds existing index artifacts into the shared inverted index on startup,
/// so a restarted service serves previously indexed data again.
pub struct IndexLoader {
    index_root: PathBuf,
    inverted: Arc<dyn InvertedIndex>,
    hash_cache: Arc<HashCache>,
}

impl IndexLoader {
    pub fn new(
        index_root: PathBuf,
        inverted: Arc<dyn InvertedIndex>,
        hash_cache: Arc<HashCache>,
    ) -> Self {
        Self {
            index_root,
            inverted,
            hash_cache,
        }
    }

    /// Loads every artifact under the index root. Artifacts the cluster
    /// already knows (matching cached hash) are skipped; corrupt files are
    /// warned about and skipped without aborting the batch.
    pub async fn load_all(&self) -> LoadSummary {
        let mut summary = LoadSummary::default();

        let entries = match std::fs::read_dir(&self.index_root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::info!(
                    "Index directory {} not readable, nothing to load: {}",
                    self.index_root.display(),
                    e
                );
                return summary;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_artifact = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(ARTIFACT_SUFFIX))
                .unwrap_or(false);
            if !is_artifact {
                continue;
            }

            let artifact = match read_artifact(&path) {
                Ok(artifact) => artifact,
                Err(e) => {
                    tracing::warn!("Skipping corrupt index artifact {}: {}", path.display(), e);
                    summary.errors += 1;
                    continue;
                }
            };

            if self.hash_cache.get(artifact.book_id).await.as_deref() == Some(&artifact.hash) {
                summary.skipped += 1;
                continue;
            }

            let mut failed = false;
            for (term, count) in &artifact.terms {
                let posting = Posting {
                    book_id: artifact.book_id,
                    count: *count,
                };
                if let Err(e) = self.inverted.merge(term, posting).await {
                    tracing::warn!(
                        "Failed to load term '{}' from {}: {}",
                        term,
                        path.display(),
                        e
                    );
                    failed = true;
                    break;
                }
            }
            if failed {
                summary.errors += 1;
                continue;
            }

            self.hash_cache.put(artifact.book_id, artifact.hash).await;
            summary.loaded += 1;
        }

        tracing::info!(
            "Index loader: {} loaded, {} skipped, {} errors",
            summary.loaded,
            summary.skipped,
            summary.errors
        );
        summary
    }
}
