// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Named events and their handlers.
//!
//! Events carry no payload. Handlers registered under the same name run in
//! registration order each time the event is emitted.

use std::collections::HashMap;
use std::sync::Arc;

/// Synthetic event that ends the game-over screen early.
pub const GAME_OVER_TIMEOUT_EVENT: &str = "game_over_timeout";

pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

/// Event name fired when a device's polled value changes.
pub fn edge_event_name(device: &str) -> String {
    format!("{device}_pressed")
}

#[derive(Default)]
pub struct EventRegistry {
    handlers: HashMap<String, Vec<EventHandler>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, event: &str, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Handlers for `event`, cloned so they can run without holding a lock
    /// on the registry.
    pub fn handlers(&self, event: &str) -> Vec<EventHandler> {
        self.handlers.get(event).cloned().unwrap_or_default()
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("EventRegistry")
            .field("events", &names)
            .finish()
    }
}
