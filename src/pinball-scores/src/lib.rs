// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! High-score persistence.
//!
//! [`HighScoreTable`] keeps the best scores in memory, highest first and
//! capped at a fixed size. [`HighScoreStore`] backs a table with a JSON file
//! and implements the game's [`pinball_core::ScoreStore`] interface.

mod store;
mod table;

use serde::{Deserialize, Serialize};

pub use store::{HighScoreStore, ScoreStoreError};
pub use table::HighScoreTable;

pub const DEFAULT_MAX_ENTRIES: usize = 3;

fn default_scores_path() -> String {
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir
            .join("pinball")
            .join("high_scores.json")
            .to_string_lossy()
            .to_string();
    }
    "high_scores.json".to_string()
}

/// High-score file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoresConfig {
    /// JSON file holding the table
    pub path: String,
    /// Number of scores kept
    pub max_entries: usize,
}

impl Default for ScoresConfig {
    fn default() -> Self {
        Self {
            path: default_scores_path(),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}
