// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Interfaces to the screen, the speakers and the high-score table.

use serde::{Deserialize, Serialize};

use crate::game::state::GameView;
use crate::DynResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighScoreEntry {
    pub name: String,
    pub score: u64,
    /// Local time the score was recorded, `YYYY-MM-DD HH:MM`.
    pub timestamp: String,
}

pub trait RenderSink: Send {
    fn update(&mut self, view: &GameView, high_scores: &[HighScoreEntry]);

    /// Ask the player for a name. Blocks until one is entered or the prompt
    /// is abandoned.
    fn get_player_name(&mut self, score: u64) -> String;
}

pub trait AudioSink: Send {
    fn set_background_music(&mut self, track: &str, volume: f32);
    fn play(&mut self, effect: &str);
    fn stop_background_music(&mut self);
}

/// Capped table of the best scores, highest first.
pub trait ScoreStore: Send {
    fn is_high_score(&self, score: u64) -> bool;
    fn add_score(&mut self, score: u64, name: &str) -> DynResult<()>;
    fn scores(&self) -> Vec<HighScoreEntry>;
}
