// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod bus;
pub mod device;
pub mod events;
pub mod game;
pub mod snapshot;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use bus::request::BusRequest;
pub use bus::{BusError, FieldBus, WriteRejected};
pub use device::{Device, DeviceConfigError, DeviceEntry, DeviceRegistry, Direction, RegisterKind};
pub use events::{edge_event_name, EventRegistry, GAME_OVER_TIMEOUT_EVENT};
pub use game::{
    AudioSink, GameAction, GameConfig, GameSession, GameState, GameStateMachine, GameView,
    HighScoreEntry, RenderSink, ScoreStore,
};
pub use snapshot::Snapshot;
