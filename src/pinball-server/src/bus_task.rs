// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Bus task: owns the field-bus connection, polls input devices and
//! serialises coil writes with the polling.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use pinball_core::bus::read_device;
use pinball_core::{BusError, BusRequest, DeviceRegistry, FieldBus, Snapshot};

/// Configuration for the bus task.
pub struct BusTaskConfig {
    pub registry: Arc<DeviceRegistry>,
    pub poll_interval: Duration,
}

/// Channels and shared state the task works against.
pub struct BusTaskChannels {
    pub snapshot: Arc<Mutex<Snapshot>>,
    pub snapshot_tx: watch::Sender<Snapshot>,
    pub rx: mpsc::Receiver<BusRequest>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Per-device read failure bookkeeping so a dead sensor logs once, not
/// every cycle.
#[derive(Default)]
struct FailureLog {
    failing: HashSet<String>,
    link_down: bool,
}

impl FailureLog {
    fn failed(&mut self, device: &str, err: &BusError) {
        if self.failing.insert(device.to_string()) {
            warn!("Read of '{}' failed, keeping last value: {}", device, err);
        } else {
            debug!("Read of '{}' still failing: {}", device, err);
        }
    }

    fn succeeded(&mut self, device: &str) {
        if self.failing.remove(device) {
            info!("Read of '{}' recovered", device);
        }
    }

    fn link(&mut self, up: bool, endpoint: &str) {
        if up && self.link_down {
            info!("Bus link to {} restored", endpoint);
        } else if !up && !self.link_down {
            warn!("Bus link to {} lost; serving cached values", endpoint);
        }
        self.link_down = !up;
    }
}

/// Run the bus task until shutdown is signalled or the client is dropped.
pub async fn run_bus_task(
    config: BusTaskConfig,
    mut bus: Box<dyn FieldBus>,
    channels: BusTaskChannels,
) {
    let BusTaskChannels {
        snapshot,
        snapshot_tx,
        mut rx,
        mut shutdown_rx,
    } = channels;
    let endpoint = bus.endpoint();
    info!(
        "Bus task started on {} ({} input devices, poll every {:?})",
        endpoint,
        config.registry.inputs().count(),
        config.poll_interval
    );

    let mut current = snapshot_tx.borrow().clone();
    let mut failures = FailureLog::default();
    let mut interval = time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                current = poll_once(&mut *bus, &config.registry, &current, &mut failures, &endpoint).await;
                match snapshot.lock() {
                    Ok(mut shared) => *shared = current.clone(),
                    Err(_) => warn!("Snapshot mutex poisoned; readers see stale data"),
                }
                snapshot_tx.send_replace(current.clone());
            }
            Some(request) = rx.recv() => {
                let address = request.device.wire_address();
                let result = bus.write_single_coil(address, request.value).await;
                match &result {
                    Ok(()) => debug!("Wrote {}={}", request.device.name, request.value),
                    Err(e) => warn!("Write {}={} failed: {}", request.device.name, request.value, e),
                }
                let _ = request.respond_to.send(result);
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    if let Err(e) = bus.close().await {
        warn!("Closing bus {} failed: {}", endpoint, e);
    }
    info!("bus_task shutting down");
}

/// Read every input device once and return the resulting snapshot.
///
/// A device whose read fails keeps its previous value. A transport-level
/// failure ends the cycle early; the remaining devices keep their values
/// until the next interval.
async fn poll_once(
    bus: &mut dyn FieldBus,
    registry: &DeviceRegistry,
    previous: &Snapshot,
    failures: &mut FailureLog,
    endpoint: &str,
) -> Snapshot {
    let mut next = previous.clone();
    for device in registry.inputs() {
        match read_device(bus, device).await {
            Ok(value) => {
                failures.succeeded(&device.name);
                failures.link(true, endpoint);
                next.set(device.name.clone(), value);
            }
            Err(e @ BusError::Exception { .. }) => {
                failures.link(true, endpoint);
                failures.failed(&device.name, &e);
            }
            Err(e) => {
                failures.link(false, endpoint);
                debug!("Poll cycle aborted at '{}': {}", device.name, e);
                break;
            }
        }
    }
    next
}
