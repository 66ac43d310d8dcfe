// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Turns snapshot changes into named events.

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pinball_core::{edge_event_name, EventRegistry, Snapshot};

/// Watches the published snapshots and fires `<device>_pressed` for every
/// device whose value differs from the one seen last time.
///
/// Handlers run on the dispatcher task, in registration order, and should
/// return quickly.
pub struct EdgeEventDispatcher {
    handlers: Arc<RwLock<EventRegistry>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EdgeEventDispatcher {
    pub fn start(snapshots: watch::Receiver<Snapshot>) -> Self {
        let handlers = Arc::new(RwLock::new(EventRegistry::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_dispatcher(snapshots, handlers.clone(), shutdown_rx));
        Self {
            handlers,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn register<F>(&self, event: &str, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.register(event, handler),
            Err(_) => warn!("Event registry lock poisoned; '{}' not registered", event),
        }
    }

    /// Run the handlers for `event` now, on the caller's thread. Returns
    /// how many ran.
    pub fn emit(&self, event: &str) -> usize {
        emit(&self.handlers, event)
    }

    /// Stop watching snapshots. Safe to call more than once.
    pub async fn stop(&self) {
        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => {
                warn!("Dispatcher task mutex poisoned");
                None
            }
        };
        let Some(task) = task else {
            return;
        };
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = task.await {
            warn!("Dispatcher task ended abnormally: {}", e);
        }
    }
}

fn emit(handlers: &RwLock<EventRegistry>, event: &str) -> usize {
    // Handlers run without the lock held; they may register or emit.
    let list = match handlers.read() {
        Ok(handlers) => handlers.handlers(event),
        Err(_) => {
            warn!("Event registry lock poisoned; dropping '{}'", event);
            return 0;
        }
    };
    if list.is_empty() {
        debug!("No handlers for '{}'", event);
    }
    for handler in &list {
        handler();
    }
    list.len()
}

async fn run_dispatcher(
    mut snapshots: watch::Receiver<Snapshot>,
    handlers: Arc<RwLock<EventRegistry>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Edge dispatcher started");
    let mut last_seen = Snapshot::new();
    loop {
        let current = snapshots.borrow_and_update().clone();
        for device in current.changed_since(&last_seen) {
            let event = edge_event_name(device);
            debug!("Edge on '{}' -> {}", device, event);
            emit(&handlers, &event);
        }
        last_seen = current;

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    info!("dispatcher shutting down");
}
