// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use pinball_core::HighScoreEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighScoreTable {
    entries: Vec<HighScoreEntry>,
    max_entries: usize,
}

impl HighScoreTable {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
        }
    }

    /// Build from stored entries, re-sorting and trimming them.
    pub fn from_entries(entries: Vec<HighScoreEntry>, max_entries: usize) -> Self {
        let mut table = Self {
            entries,
            max_entries,
        };
        table.normalize();
        table
    }

    pub fn entries(&self) -> &[HighScoreEntry] {
        &self.entries
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// True while the table has room, otherwise only when `score` beats the
    /// lowest stored score. Ties do not qualify.
    pub fn is_high_score(&self, score: u64) -> bool {
        if self.entries.len() < self.max_entries {
            return true;
        }
        self.entries.last().is_some_and(|lowest| score > lowest.score)
    }

    pub fn insert(&mut self, entry: HighScoreEntry) {
        self.entries.push(entry);
        self.normalize();
    }

    fn normalize(&mut self) {
        // Stable: earlier entries win ties.
        self.entries.sort_by(|a, b| b.score.cmp(&a.score));
        self.entries.truncate(self.max_entries);
    }
}
