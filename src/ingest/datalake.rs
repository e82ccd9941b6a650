use crate::index::types::BookDocument;

use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// File-backed document store, bucketed as `<root>/<yyyymmdd>/<HH>/<id>.json`.
pub struct Datalake {
    root: PathBuf,
}

impl Datalake {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persists a freshly ingested document under the current date/hour bucket.
    /// Returns the absolute path plus the bucket components for replication.
    pub fn save(&self, document: &BookDocument) -> Result<(PathBuf, String, String)> {
        let now = Utc::now();
        let date = now.format("%Y%m%d").to_string();
        let hour = now.format("%H").to_string();

        let path = self.save_raw(&date, &hour, document.id, &serde_json::to_string_pretty(document)?)?;
        Ok((path, date, hour))
    }

    /// Writes pre-serialized document JSON into a specific bucket. Used both by
    /// `save` and by the replica receiver, which must preserve the sender's
    /// bucket so both nodes resolve the same lake path.
    pub fn save_raw(&self, date: &str, hour: &str, book_id: u32, raw: &str) -> Result<PathBuf> {
        let dir = self.root.join(date).join(hour);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.json", book_id));
        std::fs::write(&path, raw)?;
        Ok(path)
    }

    /// Scans the date/hour buckets for `<id>.json`.
    pub fn find_file(&self, book_id: u32) -> Option<PathBuf> {
        let target = format!("{}.json", book_id);

        for date_dir in read_dirs(&self.root) {
            for hour_dir in read_dirs(&date_dir) {
                let candidate = hour_dir.join(&target);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// All book ids currently stored, ascending.
    pub fn list_books(&self) -> Vec<u32> {
        let mut books = Vec::new();

        for date_dir in read_dirs(&self.root) {
            for hour_dir in read_dirs(&date_dir) {
                let Ok(entries) = std::fs::read_dir(&hour_dir) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let path = entry.path();
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    if path.extension().and_then(|e| e.to_str()) == Some("json") {
                        if let Ok(book_id) = stem.parse::<u32>() {
                            books.push(book_id);
                        }
                    }
                }
            }
        }

        books.sort_unstable();
        books.dedup();
        books
    }

    /// Lake path (relative to the root, forward slashes) used in events and
    /// index requests.
    pub fn lake_path_of(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn read_dirs(path: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect()
}
