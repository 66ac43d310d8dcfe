// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod collaborators;
pub mod machine;
pub mod state;

pub use collaborators::{AudioSink, HighScoreEntry, RenderSink, ScoreStore};
pub use machine::{GameAction, GameConfig, GameStateMachine};
pub use state::{GameSession, GameState, GameView};
