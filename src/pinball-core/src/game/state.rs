// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    #[default]
    Attract,
    Play,
    GameOver,
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameState::Attract => "attract",
            GameState::Play => "play",
            GameState::GameOver => "game_over",
        };
        f.write_str(s)
    }
}

/// Mutable session data. Lives for the whole process; only some fields are
/// reset on specific transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameSession {
    pub state: GameState,
    /// State seen by the previous tick. `None` before the first tick.
    pub previous_state: Option<GameState>,
    pub score: u64,
    pub last_score: u64,
    /// Current ball, as counted by the drain counter.
    pub ball: u16,
    /// Time spent on the game-over screen, in milliseconds.
    pub elapsed_ms: u64,
    pub num_balls: u16,
}

impl GameSession {
    pub fn new(num_balls: u16) -> Self {
        Self {
            state: GameState::Attract,
            previous_state: None,
            score: 0,
            last_score: 0,
            ball: 0,
            elapsed_ms: 0,
            num_balls,
        }
    }
}

/// What the render collaborator draws each frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameView {
    pub state: GameState,
    pub score: u64,
    pub ball: u16,
    pub ball_launch_ready: bool,
    pub last_score: u64,
}

impl Default for GameView {
    fn default() -> Self {
        Self {
            state: GameState::Attract,
            score: 0,
            ball: 0,
            ball_launch_ready: false,
            last_score: 0,
        }
    }
}
