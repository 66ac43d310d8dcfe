// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Terminal stand-ins for the cabinet's display and speakers.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use pinball_core::{AudioSink, GameState, GameView, HighScoreEntry, RenderSink};

use crate::game_task::DEFAULT_PLAYER_NAME;

/// Longest name kept in the high-score table.
pub const MAX_NAME_LEN: usize = 12;

/// How long the name prompt waits before giving up.
pub const NAME_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Lines typed while no prompt is open and starting with this prefix are
/// emitted as events, e.g. `!game_over_timeout`.
pub const EVENT_PREFIX: char = '!';

/// Trim, cap at [`MAX_NAME_LEN`] characters, and default blank input.
pub fn sanitize_player_name(raw: &str) -> String {
    let name: String = raw.trim().chars().take(MAX_NAME_LEN).collect();
    let name = name.trim_end();
    if name.is_empty() {
        DEFAULT_PLAYER_NAME.to_string()
    } else {
        name.to_string()
    }
}

/// Logs what a screen would show and reads player names from stdin.
pub struct ConsoleRenderer {
    last: Option<GameView>,
    prompting: Arc<AtomicBool>,
    names: mpsc::Receiver<String>,
    prompt_timeout: Duration,
}

impl ConsoleRenderer {
    /// Start reading stdin on a background thread.
    ///
    /// While a name prompt is open every line is taken as the name.
    /// Otherwise lines beginning with [`EVENT_PREFIX`] are handed to
    /// `on_event` and anything else is ignored.
    pub fn spawn<F>(on_event: F) -> Self
    where
        F: Fn(&str) + Send + 'static,
    {
        let (tx, names) = mpsc::channel();
        let prompting = Arc::new(AtomicBool::new(false));
        let flag = prompting.clone();
        let reader = std::thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    route_line(&line, &flag, &tx, &on_event);
                }
                debug!("console input closed");
            });
        if let Err(e) = reader {
            warn!("Console input unavailable: {}", e);
        }
        Self::with_input(names, prompting, NAME_PROMPT_TIMEOUT)
    }

    fn with_input(
        names: mpsc::Receiver<String>,
        prompting: Arc<AtomicBool>,
        prompt_timeout: Duration,
    ) -> Self {
        Self {
            last: None,
            prompting,
            names,
            prompt_timeout,
        }
    }
}

fn route_line<F: Fn(&str)>(
    line: &str,
    prompting: &AtomicBool,
    names: &mpsc::Sender<String>,
    on_event: &F,
) {
    if prompting.load(Ordering::Acquire) {
        let _ = names.send(line.to_string());
        return;
    }
    match line.trim().strip_prefix(EVENT_PREFIX) {
        Some(event) if !event.trim().is_empty() => on_event(event.trim()),
        _ => debug!("console: ignoring '{}'", line),
    }
}

impl RenderSink for ConsoleRenderer {
    fn update(&mut self, view: &GameView, high_scores: &[HighScoreEntry]) {
        if self.last.as_ref() == Some(view) {
            return;
        }
        let entered_attract = view.state == GameState::Attract
            && self.last.as_ref().map_or(true, |last| last.state != GameState::Attract);
        match view.state {
            GameState::Play => info!(
                "[play] score {} | ball {} | {}",
                view.score,
                view.ball,
                if view.ball_launch_ready {
                    "ball ready"
                } else {
                    "ball in play"
                }
            ),
            GameState::GameOver => info!("[game over] score {}", view.score),
            GameState::Attract => info!("[attract] last score {}", view.last_score),
        }
        if entered_attract {
            for (rank, entry) in high_scores.iter().enumerate() {
                info!(
                    "  {}. {:<12} {:>8}  {}",
                    rank + 1,
                    entry.name,
                    entry.score,
                    entry.timestamp
                );
            }
        }
        self.last = Some(view.clone());
    }

    fn get_player_name(&mut self, score: u64) -> String {
        // Drop anything typed before the prompt opened.
        while self.names.try_recv().is_ok() {}
        self.prompting.store(true, Ordering::Release);
        println!("New high score: {}! Enter your name:", score);
        let name = match self.names.recv_timeout(self.prompt_timeout) {
            Ok(line) => sanitize_player_name(&line),
            Err(RecvTimeoutError::Timeout) => {
                info!("Name prompt timed out");
                DEFAULT_PLAYER_NAME.to_string()
            }
            Err(RecvTimeoutError::Disconnected) => DEFAULT_PLAYER_NAME.to_string(),
        };
        self.prompting.store(false, Ordering::Release);
        name
    }
}

/// Logs audio cues instead of playing them.
#[derive(Debug, Default)]
pub struct LogAudio {
    track: Option<String>,
}

impl LogAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self) -> Option<&str> {
        self.track.as_deref()
    }
}

impl AudioSink for LogAudio {
    fn set_background_music(&mut self, track: &str, volume: f32) {
        info!("music: {} (volume {:.2})", track, volume);
        self.track = Some(track.to_string());
    }

    fn play(&mut self, effect: &str) {
        debug!("sound: {}", effect);
    }

    fn stop_background_music(&mut self) {
        if let Some(track) = self.track.take() {
            info!("music stopped: {}", track);
        }
    }
}
