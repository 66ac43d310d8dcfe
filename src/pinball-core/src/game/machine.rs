// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Game state machine.
//!
//! The machine is pure: it reads a [`Snapshot`] and returns the side effects
//! it wants as [`GameAction`]s. Whoever owns it applies them in order. All
//! calls must come from a single consumer.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::device::DeviceRegistry;
use crate::events::{edge_event_name, GAME_OVER_TIMEOUT_EVENT};
use crate::game::state::{GameSession, GameState, GameView};
use crate::snapshot::Snapshot;

/// Device names, timings and media used by the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Balls per game.
    pub num_balls: u16,
    /// Time on the game-over screen before returning to attract mode.
    pub game_over_timeout_ms: u64,
    /// Coil whose edge starts a game and whose level keeps a game running.
    pub start_button: String,
    /// Counter incremented by the controller each time a ball drains.
    pub ball_drain: String,
    /// Reads 0 while a ball sits in the shooter lane.
    pub launch_lane: String,
    /// Output coil that resets the drop targets.
    pub drop_target_reset: String,
    /// Output coil pulsed to feed a ball into the shooter lane.
    pub load_ball: String,
    /// Output coil raised when the last ball drains.
    pub game_over_bit: String,
    /// Background track for attract mode and the game-over screen.
    pub attract_track: String,
    /// Background track while playing.
    pub gameplay_track: String,
    pub music_volume: f32,
    /// Effect played when a scoring counter moves.
    pub score_sound: String,
    /// Effect played when a ball drains.
    pub drain_sound: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            num_balls: 3,
            game_over_timeout_ms: 10_000,
            start_button: "start_button".to_string(),
            ball_drain: "ball_drain".to_string(),
            launch_lane: "shooter_lane_switch".to_string(),
            drop_target_reset: "drop_target_reset".to_string(),
            load_ball: "load_ball".to_string(),
            game_over_bit: "game_over_bit".to_string(),
            attract_track: "fight_song.wav".to_string(),
            gameplay_track: "pinball_wizard.wav".to_string(),
            music_volume: 0.5,
            score_sound: "chaching".to_string(),
            drain_sound: "ball_drain".to_string(),
        }
    }
}

/// Side effect requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum GameAction {
    WriteCoil { device: String, value: bool },
    PlaySound(String),
    SetMusic { track: String, volume: f32 },
    StopMusic,
    /// Check `score` against the high-score table and, if it qualifies, ask
    /// the player for a name and store it.
    HighScoreCheck { score: u64 },
}

pub struct GameStateMachine {
    config: GameConfig,
    session: GameSession,
    /// Scoring devices and their weights.
    scoring: Vec<(String, u32)>,
    /// Last count seen per scoring device.
    baselines: HashMap<String, u16>,
    current_track: Option<String>,
    transition_count: u64,
}

impl GameStateMachine {
    pub fn new(config: GameConfig, registry: &DeviceRegistry) -> Self {
        let scoring: Vec<(String, u32)> = registry
            .scoring()
            .map(|d| (d.name.clone(), d.weight))
            .collect();
        let baselines = scoring.iter().map(|(name, _)| (name.clone(), 0)).collect();
        Self {
            session: GameSession::new(config.num_balls),
            config,
            scoring,
            baselines,
            current_track: None,
            transition_count: 0,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub fn state(&self) -> GameState {
        self.session.state
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn baseline(&self, device: &str) -> Option<u16> {
        self.baselines.get(device).copied()
    }

    /// Effects to apply once at startup.
    pub fn start(&mut self) -> Vec<GameAction> {
        let mut actions = Vec::new();
        self.ensure_music(self.config.attract_track.clone(), &mut actions);
        actions
    }

    pub fn view(&self, snapshot: &Snapshot) -> GameView {
        GameView {
            state: self.session.state,
            score: self.session.score,
            ball: self.session.ball,
            ball_launch_ready: snapshot.get(&self.config.launch_lane) == 0,
            last_score: self.session.last_score,
        }
    }

    pub fn handle_event(&mut self, event: &str, snapshot: &Snapshot) -> Vec<GameAction> {
        let mut actions = Vec::new();
        let start = edge_event_name(&self.config.start_button);
        let drain = edge_event_name(&self.config.ball_drain);

        match self.session.state {
            GameState::Attract if event == start => {
                self.transition(GameState::Play);
                self.session.score = 0;
                self.write(&self.config.drop_target_reset, true, &mut actions);
                self.load_ball(&mut actions);
                self.ensure_music(self.config.gameplay_track.clone(), &mut actions);
            }
            GameState::Play if event == drain => {
                self.session.ball = snapshot.get(&self.config.ball_drain);
                actions.push(GameAction::PlaySound(self.config.drain_sound.clone()));
                if self.session.ball < self.config.num_balls {
                    debug!(
                        "ball {} of {} drained, reloading",
                        self.session.ball, self.config.num_balls
                    );
                    self.load_ball(&mut actions);
                } else {
                    self.enter_game_over(&mut actions);
                    self.write(&self.config.game_over_bit, true, &mut actions);
                }
            }
            GameState::GameOver if event == start => {
                self.transition(GameState::Play);
                self.session.last_score = self.session.score;
                self.ensure_music(self.config.gameplay_track.clone(), &mut actions);
            }
            GameState::GameOver if event == GAME_OVER_TIMEOUT_EVENT => {
                self.return_to_attract();
            }
            state => {
                debug!("ignoring event '{}' in state {}", event, state);
            }
        }
        actions
    }

    /// Advance time by `dt`.
    pub fn tick(&mut self, dt: Duration, snapshot: &Snapshot) -> Vec<GameAction> {
        let mut actions = Vec::new();
        let state = self.session.state;

        if self.session.previous_state != Some(state) {
            self.session.previous_state = Some(state);
            match state {
                GameState::Play => {
                    self.ensure_music(self.config.gameplay_track.clone(), &mut actions);
                }
                GameState::GameOver => {
                    self.ensure_music(self.config.attract_track.clone(), &mut actions);
                    actions.push(GameAction::HighScoreCheck {
                        score: self.session.score,
                    });
                }
                GameState::Attract => {
                    self.ensure_music(self.config.attract_track.clone(), &mut actions);
                }
            }
        }

        match state {
            GameState::Play => {
                // A coil missing from the snapshot does not end the game.
                let enabled = snapshot
                    .value(&self.config.start_button)
                    .map_or(true, |v| v != 0);
                if enabled {
                    self.recompute_score(snapshot, &mut actions);
                } else {
                    info!("run-enable coil dropped, ending game");
                    self.enter_game_over(&mut actions);
                }
            }
            GameState::GameOver => {
                let dt_ms = u64::try_from(dt.as_millis()).unwrap_or(u64::MAX);
                self.session.elapsed_ms = self.session.elapsed_ms.saturating_add(dt_ms);
                if self.session.elapsed_ms >= self.config.game_over_timeout_ms {
                    self.return_to_attract();
                }
            }
            GameState::Attract => {}
        }
        actions
    }

    /// Score is the sum of `count * weight` over scoring devices right now.
    fn recompute_score(&mut self, snapshot: &Snapshot, actions: &mut Vec<GameAction>) {
        let mut total: u64 = 0;
        for (name, weight) in &self.scoring {
            let count = snapshot.get(name);
            let baseline = self.baselines.entry(name.clone()).or_insert(0);
            if count > *baseline {
                actions.push(GameAction::PlaySound(self.config.score_sound.clone()));
            }
            total = total.saturating_add(u64::from(count) * u64::from(*weight));
            *baseline = count;
        }
        self.session.score = total;
    }

    fn enter_game_over(&mut self, actions: &mut Vec<GameAction>) {
        self.transition(GameState::GameOver);
        self.session.elapsed_ms = 0;
        self.current_track = None;
        actions.push(GameAction::StopMusic);
    }

    fn return_to_attract(&mut self) {
        self.transition(GameState::Attract);
        self.session.last_score = self.session.score;
        self.session.elapsed_ms = 0;
    }

    fn load_ball(&self, actions: &mut Vec<GameAction>) {
        self.write(&self.config.load_ball, true, actions);
        self.write(&self.config.load_ball, false, actions);
    }

    fn write(&self, device: &str, value: bool, actions: &mut Vec<GameAction>) {
        actions.push(GameAction::WriteCoil {
            device: device.to_string(),
            value,
        });
    }

    fn ensure_music(&mut self, track: String, actions: &mut Vec<GameAction>) {
        if self.current_track.as_deref() == Some(track.as_str()) {
            return;
        }
        actions.push(GameAction::SetMusic {
            track: track.clone(),
            volume: self.config.music_volume,
        });
        self.current_track = Some(track);
    }

    fn transition(&mut self, to: GameState) {
        info!("game state {} -> {}", self.session.state, to);
        self.session.state = to;
        self.transition_count += 1;
    }
}
