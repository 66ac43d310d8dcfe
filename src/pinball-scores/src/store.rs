// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tracing::{info, warn};

use pinball_core::{DynResult, HighScoreEntry, ScoreStore};

use crate::table::HighScoreTable;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Error)]
pub enum ScoreStoreError {
    #[error("high score file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("high score encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// High-score table persisted as a JSON array of entries.
#[derive(Debug)]
pub struct HighScoreStore {
    path: PathBuf,
    table: HighScoreTable,
}

impl HighScoreStore {
    /// Load the table at `path`. A missing or unreadable file starts an
    /// empty table; the file is only written on the first new score.
    pub fn open(path: impl AsRef<Path>, max_entries: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<HighScoreEntry>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("ignoring corrupt high score file {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("cannot read high score file {}: {}", path.display(), e);
                Vec::new()
            }
        };
        let table = HighScoreTable::from_entries(entries, max_entries);
        info!(
            "loaded {} high score(s) from {}",
            table.entries().len(),
            path.display()
        );
        Self { path, table }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &HighScoreTable {
        &self.table
    }

    pub fn record(&mut self, score: u64, name: &str) -> Result<(), ScoreStoreError> {
        self.table.insert(HighScoreEntry {
            name: name.to_string(),
            score,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        });
        self.save()
    }

    pub fn save(&self) -> Result<(), ScoreStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)
                    .map_err(|e| ScoreStoreError::Io(parent.to_path_buf(), e))?;
            }
        }
        let json = serde_json::to_string_pretty(self.table.entries())?;
        std::fs::write(&self.path, json).map_err(|e| ScoreStoreError::Io(self.path.clone(), e))
    }
}

impl ScoreStore for HighScoreStore {
    fn is_high_score(&self, score: u64) -> bool {
        self.table.is_high_score(score)
    }

    fn add_score(&mut self, score: u64, name: &str) -> DynResult<()> {
        self.record(score, name)?;
        Ok(())
    }

    fn scores(&self) -> Vec<HighScoreEntry> {
        self.table.entries().to_vec()
    }
}
