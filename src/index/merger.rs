use super::artifact::{ARTIFACT_SUFFIX, read_artifact};
use crate::search::tokenizer::{is_stop_word, letter_group};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalPosting {
    pub book_id: u32,
    pub count: u32,
}

/// `letter -> term -> postings`, every level sorted so repeated runs over the
/// same inputs serialize byte-identically.
pub type GlobalIndex = BTreeMap<String, BTreeMap<String, Vec<GlobalPosting>>>;

#[derive(Debug, Serialize)]
pub struct MergeSummary {
    pub files_merged: usize,
    pub files_skipped: usize,
    pub letters: usize,
    pub terms: usize,
    pub output: String,
}

/// Batch reconciliation of per-book index artifacts into one canonical
/// hierarchical index.
///
/// Each run starts from a fresh accumulator and folds every source file at
/// most once, so re-running over the same artifacts cannot double any posting.
/// Stopwords are dropped here (the hierarchical export wants a clean term
/// list); the raw per-book artifacts keep them for ranking.
pub struct GlobalIndexMerger {
    index_root: PathBuf,
    output_path: PathBuf,
}

impl GlobalIndexMerger {
    pub fn new(index_root: PathBuf, output_path: PathBuf) -> Self {
        Self {
            index_root,
            output_path,
        }
    }

    pub fn merge(&self) -> Result<(GlobalIndex, usize, usize)> {
        let mut global: GlobalIndex = BTreeMap::new();
        let mut folded: HashSet<PathBuf> = HashSet::new();
        let mut merged = 0usize;
        let mut skipped = 0usize;

        if !self.index_root.is_dir() {
            tracing::info!(
                "Index directory {} does not exist, producing empty global index",
                self.index_root.display()
            );
            return Ok((global, merged, skipped));
        }

        for entry in std::fs::read_dir(&self.index_root)? {
            let path = entry?.path();
            let is_artifact = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(ARTIFACT_SUFFIX))
                .unwrap_or(false);
            if !is_artifact {
                continue;
            }

            // Fold each source file at most once per run
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            if !folded.insert(canonical) {
                continue;
            }

            match read_artifact(&path) {
                Ok(artifact) => {
                    for (term, count) in &artifact.terms {
                        if is_stop_word(term) {
                            continue;
                        }
                        let postings = global
                            .entry(letter_group(term))
                            .or_default()
                            .entry(term.clone())
                            .or_default();
                        match postings.iter_mut().find(|p| p.book_id == artifact.book_id) {
                            Some(existing) => existing.count += count,
                            None => postings.push(GlobalPosting {
                                book_id: artifact.book_id,
                                count: *count,
                            }),
                        }
                    }
                    merged += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping corrupt index artifact {}: {}", path.display(), e);
                    skipped += 1;
                }
            }
        }

        // Posting order must not depend on directory iteration order
        for group in global.values_mut() {
            for postings in group.values_mut() {
                postings.sort_by_key(|posting| posting.book_id);
            }
        }

        Ok((global, merged, skipped))
    }

    /// Merges and writes the canonical index file.
    pub fn run(&self) -> Result<MergeSummary> {
        let (global, files_merged, files_skipped) = self.merge()?;

        if let Some(parent) = self.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.output_path, serde_json::to_string_pretty(&global)?)?;

        let terms = global.values().map(|group| group.len()).sum();
        tracing::info!(
            "Global index written to {} ({} letters, {} terms)",
            self.output_path.display(),
            global.len(),
            terms
        );

        Ok(MergeSummary {
            files_merged,
            files_skipped,
            letters: global.len(),
            terms,
            output: self.output_path.to_string_lossy().replace('\\', "/"),
        })
    }
}
