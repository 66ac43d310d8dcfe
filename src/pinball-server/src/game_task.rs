// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Game task: the only place the state machine runs.
//!
//! Device events arrive on a queue fed by dispatcher handlers and are
//! handled between ticks, so the machine never sees two callers at once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use pinball_core::{
    edge_event_name, AudioSink, DeviceRegistry, GameAction, GameStateMachine, GameView,
    RenderSink, ScoreStore, GAME_OVER_TIMEOUT_EVENT,
};

use crate::bus_client::BusClient;
use crate::dispatcher::EdgeEventDispatcher;

/// Name stored when the player leaves the prompt empty.
pub const DEFAULT_PLAYER_NAME: &str = "AAA";

/// Capacity of the queue between dispatcher handlers and the game task.
pub const GAME_EVENT_CHANNEL_BUFFER: usize = 64;

/// The machine's collaborators.
pub struct GameIo {
    pub render: Box<dyn RenderSink>,
    pub audio: Box<dyn AudioSink>,
    pub scores: Box<dyn ScoreStore>,
}

/// Owns the state machine and applies the actions it returns.
pub struct GameExecutor {
    machine: GameStateMachine,
    bus: Arc<BusClient>,
    // Shared with the blocking name prompt.
    render: Arc<Mutex<Box<dyn RenderSink>>>,
    audio: Box<dyn AudioSink>,
    scores: Box<dyn ScoreStore>,
    view_tx: watch::Sender<GameView>,
    // Set by `run`; an open name prompt gives up when it fires.
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl GameExecutor {
    pub fn new(
        machine: GameStateMachine,
        bus: Arc<BusClient>,
        io: GameIo,
        view_tx: watch::Sender<GameView>,
    ) -> Self {
        Self {
            machine,
            bus,
            render: Arc::new(Mutex::new(io.render)),
            audio: io.audio,
            scores: io.scores,
            view_tx,
            shutdown_rx: None,
        }
    }

    pub fn machine(&self) -> &GameStateMachine {
        &self.machine
    }

    /// Apply the machine's startup effects.
    pub async fn start(&mut self) {
        let actions = self.machine.start();
        self.apply(actions).await;
    }

    /// Handle one queued event against the current snapshot.
    pub async fn on_event(&mut self, event: &str) {
        let snapshot = self.bus.read_all();
        let actions = self.machine.handle_event(event, &snapshot);
        self.apply(actions).await;
    }

    /// Advance the game by `dt`, then redraw.
    pub async fn on_tick(&mut self, dt: Duration) {
        let snapshot = self.bus.read_all();
        let actions = self.machine.tick(dt, &snapshot);
        self.apply(actions).await;

        let view = self.machine.view(&snapshot);
        let high_scores = self.scores.scores();
        match self.render.lock() {
            Ok(mut render) => render.update(&view, &high_scores),
            Err(_) => warn!("Render mutex poisoned; frame skipped"),
        }
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    async fn apply(&mut self, actions: Vec<GameAction>) {
        for action in actions {
            match action {
                GameAction::WriteCoil { device, value } => {
                    match self.bus.write(&device, value).await {
                        Ok(true) => {}
                        Ok(false) => warn!("Write {}={} failed", device, value),
                        Err(e) => warn!("Write {}={} rejected: {}", device, value, e),
                    }
                }
                GameAction::PlaySound(effect) => self.audio.play(&effect),
                GameAction::SetMusic { track, volume } => {
                    self.audio.set_background_music(&track, volume)
                }
                GameAction::StopMusic => self.audio.stop_background_music(),
                GameAction::HighScoreCheck { score } => self.check_high_score(score).await,
            }
        }
    }

    async fn check_high_score(&mut self, score: u64) {
        if !self.scores.is_high_score(score) {
            debug!("Score {} does not make the table", score);
            return;
        }
        info!("New high score {}", score);
        let name = prompt_name(self.render.clone(), score, self.shutdown_rx.clone()).await;
        if let Err(e) = self.scores.add_score(score, &name) {
            error!("Failed to save high score {} for {}: {}", score, name, e);
        }
    }

    /// Run until shutdown. Ticks every `tick_interval`; queued events are
    /// handled as they arrive.
    pub async fn run(
        mut self,
        tick_interval: Duration,
        mut events_rx: mpsc::Receiver<String>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(
            "Game task started ({:?} per tick, {} balls)",
            tick_interval,
            self.machine.config().num_balls
        );
        self.shutdown_rx = Some(shutdown_rx.clone());
        self.start().await;

        let mut interval = time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Instant::now();
                    let dt = now.saturating_duration_since(last_tick);
                    self.on_tick(dt).await;
                    // Time spent in a name prompt does not count.
                    last_tick = Instant::now();
                }
                Some(event) = events_rx.recv() => {
                    self.on_event(&event).await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("game_task shutting down");
    }
}

/// Ask for the player's name on a dedicated thread; blank means
/// [`DEFAULT_PLAYER_NAME`].
///
/// Shutdown abandons the prompt and keeps the score under the default name.
/// The prompt thread is left to run out its own timeout.
async fn prompt_name(
    render: Arc<Mutex<Box<dyn RenderSink>>>,
    score: u64,
    shutdown_rx: Option<watch::Receiver<bool>>,
) -> String {
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("name-prompt".to_string())
        .spawn(move || {
            let name = render
                .lock()
                .ok()
                .map(|mut render| render.get_player_name(score));
            let _ = tx.send(name);
        });
    if let Err(e) = spawned {
        error!("Name prompt failed to start: {}", e);
        return DEFAULT_PLAYER_NAME.to_string();
    }

    let reply = match shutdown_rx {
        Some(mut shutdown_rx) => tokio::select! {
            reply = rx => reply,
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("Shutdown during name prompt; saving as {}", DEFAULT_PLAYER_NAME);
                return DEFAULT_PLAYER_NAME.to_string();
            }
        },
        None => rx.await,
    };
    let raw = match reply {
        Ok(Some(name)) => name,
        Ok(None) => {
            warn!("Render mutex poisoned; using default name");
            String::new()
        }
        Err(_) => {
            error!("Name prompt ended without an answer");
            String::new()
        }
    };
    let name = raw.trim();
    if name.is_empty() {
        DEFAULT_PLAYER_NAME.to_string()
    } else {
        name.to_string()
    }
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Forward every device edge and the game-over timeout to the game task.
///
/// Handlers only enqueue; a full queue drops the event with a warning.
pub fn route_events(
    dispatcher: &EdgeEventDispatcher,
    registry: &DeviceRegistry,
    events_tx: mpsc::Sender<String>,
) {
    let mut names: Vec<String> = registry.iter().map(|d| edge_event_name(&d.name)).collect();
    names.push(GAME_OVER_TIMEOUT_EVENT.to_string());
    for name in names {
        let tx = events_tx.clone();
        let event = name.clone();
        dispatcher.register(&name, move || {
            if let Err(e) = tx.try_send(event.clone()) {
                warn!("Game event '{}' dropped: {}", event, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinball_backend::SimController;
    use pinball_core::{
        DeviceEntry, Direction, DynResult, GameConfig, GameState, HighScoreEntry, RegisterKind,
        Snapshot,
    };

    const POLL: Duration = Duration::from_millis(5);
    const FRAME: Duration = Duration::from_millis(33);

    #[derive(Default)]
    struct Recorded {
        frames: Vec<GameView>,
        prompts: Vec<u64>,
        sounds: Vec<String>,
        music: Vec<Option<String>>,
        saved: Vec<(u64, String)>,
    }

    type Shared = Arc<Mutex<Recorded>>;

    struct FakeRender(Shared, String);

    impl RenderSink for FakeRender {
        fn update(&mut self, view: &GameView, _high_scores: &[HighScoreEntry]) {
            self.0.lock().unwrap().frames.push(view.clone());
        }

        fn get_player_name(&mut self, score: u64) -> String {
            self.0.lock().unwrap().prompts.push(score);
            self.1.clone()
        }
    }

    struct FakeAudio(Shared);

    impl AudioSink for FakeAudio {
        fn set_background_music(&mut self, track: &str, _volume: f32) {
            self.0.lock().unwrap().music.push(Some(track.to_string()));
        }

        fn play(&mut self, effect: &str) {
            self.0.lock().unwrap().sounds.push(effect.to_string());
        }

        fn stop_background_music(&mut self) {
            self.0.lock().unwrap().music.push(None);
        }
    }

    struct FakeScores(Shared, u64);

    impl ScoreStore for FakeScores {
        fn is_high_score(&self, score: u64) -> bool {
            score > self.1
        }

        fn add_score(&mut self, score: u64, name: &str) -> DynResult<()> {
            self.0.lock().unwrap().saved.push((score, name.to_string()));
            Ok(())
        }

        fn scores(&self) -> Vec<HighScoreEntry> {
            Vec::new()
        }
    }

    fn registry() -> Arc<DeviceRegistry> {
        Arc::new(
            DeviceRegistry::from_entries([
                (
                    "start_button".to_string(),
                    DeviceEntry::new(1, RegisterKind::Coil, Direction::Input, 0),
                ),
                (
                    "shooter_lane_switch".to_string(),
                    DeviceEntry::new(2, RegisterKind::Coil, Direction::Input, 0),
                ),
                (
                    "ball_drain".to_string(),
                    DeviceEntry::new(3, RegisterKind::InputRegister, Direction::Input, 0),
                ),
                (
                    "bumper".to_string(),
                    DeviceEntry::new(4, RegisterKind::InputRegister, Direction::Input, 100),
                ),
                (
                    "drop_target_reset".to_string(),
                    DeviceEntry::new(10, RegisterKind::Coil, Direction::Output, 0),
                ),
                (
                    "load_ball".to_string(),
                    DeviceEntry::new(11, RegisterKind::Coil, Direction::Output, 0),
                ),
                (
                    "game_over_bit".to_string(),
                    DeviceEntry::new(12, RegisterKind::Coil, Direction::Output, 0),
                ),
            ])
            .unwrap(),
        )
    }

    struct Rig {
        controller: SimController,
        bus: Arc<BusClient>,
        executor: GameExecutor,
        recorded: Shared,
        view_rx: watch::Receiver<GameView>,
    }

    fn setup(config: GameConfig, best: u64, name: &str) -> Rig {
        let controller = SimController::new();
        let registry = registry();
        let bus = Arc::new(BusClient::start(
            Box::new(controller.bus()),
            registry.clone(),
            POLL,
        ));
        let recorded = Shared::default();
        let io = GameIo {
            render: Box::new(FakeRender(recorded.clone(), name.to_string())),
            audio: Box::new(FakeAudio(recorded.clone())),
            scores: Box::new(FakeScores(recorded.clone(), best)),
        };
        let (view_tx, view_rx) = watch::channel(GameView::default());
        let machine = GameStateMachine::new(config, &registry);
        let executor = GameExecutor::new(machine, bus.clone(), io, view_tx);
        Rig {
            controller,
            bus,
            executor,
            recorded,
            view_rx,
        }
    }

    async fn wait_for(bus: &BusClient, pred: impl Fn(&Snapshot) -> bool) {
        let mut rx = bus.subscribe();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if pred(&rx.borrow_and_update()) {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("snapshot never matched");
    }

    #[tokio::test]
    async fn test_start_writes_coils_and_switches_music() {
        let mut rig = setup(GameConfig::default(), 0, "ZED");
        rig.executor.start().await;
        rig.controller.set_coil(0, true);
        wait_for(&rig.bus, |s| s.get("start_button") == 1).await;

        rig.executor.on_event("start_button_pressed").await;
        assert_eq!(rig.executor.machine().state(), GameState::Play);
        assert_eq!(
            rig.controller.coil_writes(),
            vec![(9, true), (10, true), (10, false)]
        );
        let music = rig.recorded.lock().unwrap().music.clone();
        assert_eq!(
            music,
            vec![
                Some("fight_song.wav".to_string()),
                Some("pinball_wizard.wav".to_string())
            ]
        );
        rig.bus.stop().await;
    }

    #[tokio::test]
    async fn test_tick_scores_and_publishes_view() {
        let mut rig = setup(GameConfig::default(), 0, "ZED");
        rig.controller.set_coil(0, true);
        wait_for(&rig.bus, |s| s.get("start_button") == 1).await;
        rig.executor.on_event("start_button_pressed").await;

        rig.controller.set_input_register(3, 2);
        wait_for(&rig.bus, |s| s.get("bumper") == 2).await;
        rig.executor.on_tick(FRAME).await;

        let view = rig.view_rx.borrow().clone();
        assert_eq!(view.state, GameState::Play);
        assert_eq!(view.score, 200);
        // Shooter lane reads 0: a ball is waiting.
        assert!(view.ball_launch_ready);
        let recorded = rig.recorded.lock().unwrap();
        assert_eq!(recorded.sounds, vec!["chaching".to_string()]);
        assert_eq!(recorded.frames.last(), Some(&view));
        drop(recorded);
        rig.bus.stop().await;
    }

    #[tokio::test]
    async fn test_last_drain_ends_game_and_records_high_score() {
        let config = GameConfig {
            num_balls: 1,
            ..GameConfig::default()
        };
        let mut rig = setup(config, 100, "  Ada  ");
        rig.controller.set_coil(0, true);
        wait_for(&rig.bus, |s| s.get("start_button") == 1).await;
        rig.executor.on_event("start_button_pressed").await;

        rig.controller.set_input_register(3, 3);
        wait_for(&rig.bus, |s| s.get("bumper") == 3).await;
        rig.executor.on_tick(FRAME).await;

        rig.controller.set_input_register(2, 1);
        wait_for(&rig.bus, |s| s.get("ball_drain") == 1).await;
        rig.executor.on_event("ball_drain_pressed").await;
        assert_eq!(rig.executor.machine().state(), GameState::GameOver);
        assert!(rig.controller.coil(11));

        rig.executor.on_tick(FRAME).await;
        rig.executor.on_tick(FRAME).await;
        let recorded = rig.recorded.lock().unwrap();
        assert_eq!(recorded.prompts, vec![300]);
        assert_eq!(recorded.saved, vec![(300, "Ada".to_string())]);
        assert!(recorded.sounds.contains(&"ball_drain".to_string()));
        drop(recorded);
        rig.bus.stop().await;
    }

    #[tokio::test]
    async fn test_low_score_is_not_prompted_and_blank_name_defaults() {
        let config = GameConfig {
            num_balls: 1,
            ..GameConfig::default()
        };
        let mut rig = setup(config.clone(), 1_000, "");
        rig.controller.set_coil(0, true);
        wait_for(&rig.bus, |s| s.get("start_button") == 1).await;
        rig.executor.on_event("start_button_pressed").await;
        rig.controller.set_coil(0, false);
        wait_for(&rig.bus, |s| s.get("start_button") == 0).await;
        rig.executor.on_tick(FRAME).await;
        rig.executor.on_tick(FRAME).await;
        assert_eq!(rig.executor.machine().state(), GameState::GameOver);
        assert!(rig.recorded.lock().unwrap().prompts.is_empty());
        rig.bus.stop().await;

        let mut rig = setup(config, 0, "   ");
        rig.controller.set_coil(0, true);
        rig.controller.set_input_register(3, 1);
        wait_for(&rig.bus, |s| s.get("start_button") == 1 && s.get("bumper") == 1).await;
        rig.executor.on_event("start_button_pressed").await;
        rig.executor.on_tick(FRAME).await;
        rig.controller.set_coil(0, false);
        wait_for(&rig.bus, |s| s.get("start_button") == 0).await;
        rig.executor.on_tick(FRAME).await;
        rig.executor.on_tick(FRAME).await;
        assert_eq!(
            rig.recorded.lock().unwrap().saved,
            vec![(100, DEFAULT_PLAYER_NAME.to_string())]
        );
        rig.bus.stop().await;
    }

    struct StuckRender;

    impl RenderSink for StuckRender {
        fn update(&mut self, _view: &GameView, _high_scores: &[HighScoreEntry]) {}

        fn get_player_name(&mut self, _score: u64) -> String {
            std::thread::sleep(Duration::from_secs(5));
            "LATE".to_string()
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_name_prompt() {
        let render: Arc<Mutex<Box<dyn RenderSink>>> = Arc::new(Mutex::new(Box::new(StuckRender)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let prompt = tokio::spawn(prompt_name(render, 500, Some(shutdown_rx)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        let name = tokio::time::timeout(Duration::from_secs(1), prompt)
            .await
            .expect("prompt outlived shutdown")
            .unwrap();
        assert_eq!(name, DEFAULT_PLAYER_NAME);
    }

    #[tokio::test]
    async fn test_rejected_write_does_not_stop_game() {
        let config = GameConfig {
            load_ball: "no_such_coil".to_string(),
            ..GameConfig::default()
        };
        let mut rig = setup(config, 0, "ZED");
        rig.controller.set_coil(0, true);
        wait_for(&rig.bus, |s| s.get("start_button") == 1).await;
        rig.executor.on_event("start_button_pressed").await;

        assert_eq!(rig.executor.machine().state(), GameState::Play);
        assert_eq!(rig.controller.coil_writes(), vec![(9, true)]);
        rig.bus.stop().await;
    }

    #[tokio::test]
    async fn test_run_loop_routes_dispatcher_events() {
        let rig = setup(GameConfig::default(), 0, "ZED");
        let dispatcher = EdgeEventDispatcher::start(rig.bus.subscribe());
        let (events_tx, events_rx) = mpsc::channel(GAME_EVENT_CHANNEL_BUFFER);
        route_events(&dispatcher, rig.bus.registry(), events_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut view_rx = rig.view_rx.clone();
        let task = tokio::spawn(rig.executor.run(FRAME, events_rx, shutdown_rx));

        rig.controller.set_coil(0, true);
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if view_rx.borrow_and_update().state == GameState::Play {
                    return;
                }
                view_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("game never started");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        dispatcher.stop().await;
        rig.bus.stop().await;
    }
}
