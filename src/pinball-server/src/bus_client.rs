// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Handle giving the rest of the server access to the bus task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pinball_core::{BusRequest, DeviceRegistry, FieldBus, Snapshot, WriteRejected};

use crate::bus_task::{run_bus_task, BusTaskChannels, BusTaskConfig};

const BUS_TASK_CHANNEL_BUFFER: usize = 32;

/// Owns the polling task and the latest snapshot of every input device.
///
/// Reads never touch the bus: they are answered from the snapshot the
/// task publishes after each poll cycle. Writes are queued to the task and
/// interleaved with polling so the bus only ever has one request in flight.
pub struct BusClient {
    registry: Arc<DeviceRegistry>,
    snapshot: Arc<Mutex<Snapshot>>,
    snapshot_rx: watch::Receiver<Snapshot>,
    bus_tx: mpsc::Sender<BusRequest>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BusClient {
    /// Spawn the bus task. Must be called from within a tokio runtime.
    pub fn start(
        bus: Box<dyn FieldBus>,
        registry: Arc<DeviceRegistry>,
        poll_interval: Duration,
    ) -> Self {
        let initial = Snapshot::zeroed(&registry);
        let snapshot = Arc::new(Mutex::new(initial.clone()));
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (bus_tx, rx) = mpsc::channel(BUS_TASK_CHANNEL_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let config = BusTaskConfig {
            registry: registry.clone(),
            poll_interval,
        };
        let channels = BusTaskChannels {
            snapshot: snapshot.clone(),
            snapshot_tx,
            rx,
            shutdown_rx,
        };
        let task = tokio::spawn(run_bus_task(config, bus, channels));

        Self {
            registry,
            snapshot,
            snapshot_rx,
            bus_tx,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Last polled value of `name`; 0 for unknown or not-yet-read devices.
    pub fn read(&self, name: &str) -> u16 {
        match self.snapshot.lock() {
            Ok(snapshot) => snapshot.get(name),
            Err(_) => {
                warn!("Snapshot mutex poisoned; reading '{}' as 0", name);
                0
            }
        }
    }

    /// Copy of the whole snapshot, taken atomically.
    pub fn read_all(&self) -> Snapshot {
        match self.snapshot.lock() {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => {
                warn!("Snapshot mutex poisoned; serving published snapshot");
                self.snapshot_rx.borrow().clone()
            }
        }
    }

    /// Receiver that sees every snapshot the poll loop publishes.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Set an output coil.
    ///
    /// Targets that are unknown, inputs, or not coils are rejected without
    /// touching the bus. Otherwise returns whether the controller accepted
    /// the write.
    pub async fn write(&self, name: &str, value: bool) -> Result<bool, WriteRejected> {
        let device = self.registry.writable(name)?.clone();
        let (respond_to, reply) = oneshot::channel();
        let request = BusRequest {
            device,
            value,
            respond_to,
        };
        if self.bus_tx.send(request).await.is_err() {
            warn!("Write {}={} dropped: bus task stopped", name, value);
            return Ok(false);
        }
        match reply.await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => {
                debug!("Write {}={} not applied: {}", name, value, e);
                Ok(false)
            }
            Err(_) => {
                warn!("Write {}={} lost: bus task stopped", name, value);
                Ok(false)
            }
        }
    }

    /// Stop polling and close the bus. Safe to call more than once.
    pub async fn stop(&self) {
        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => {
                warn!("Bus client task mutex poisoned");
                None
            }
        };
        let Some(task) = task else {
            return;
        };
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = task.await {
            warn!("Bus task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinball_backend::SimController;
    use pinball_core::{DeviceEntry, Direction, RegisterKind};

    const POLL: Duration = Duration::from_millis(5);

    fn registry() -> Arc<DeviceRegistry> {
        Arc::new(
            DeviceRegistry::from_entries([
                (
                    "start_button".to_string(),
                    DeviceEntry::new(1, RegisterKind::Coil, Direction::Input, 0),
                ),
                (
                    "bumper".to_string(),
                    DeviceEntry::new(3, RegisterKind::InputRegister, Direction::Input, 100),
                ),
                (
                    "load_ball".to_string(),
                    DeviceEntry::new(11, RegisterKind::Coil, Direction::Output, 0),
                ),
            ])
            .unwrap(),
        )
    }

    async fn wait_for(client: &BusClient, pred: impl Fn(&Snapshot) -> bool) {
        let mut rx = client.subscribe();
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
    async fn test_starts_with_zeroed_snapshot() {
        let controller = SimController::new();
        controller.set_offline(true);
        let client = BusClient::start(Box::new(controller.bus()), registry(), POLL);

        assert_eq!(client.read("bumper"), 0);
        assert_eq!(client.read("no_such_device"), 0);
        let all = client.read_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all.value("load_ball"), None);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_poll_updates_snapshot() {
        let controller = SimController::new();
        let client = BusClient::start(Box::new(controller.bus()), registry(), POLL);

        controller.set_coil(0, true);
        controller.set_input_register(2, 42);
        wait_for(&client, |s| s.get("bumper") == 42 && s.get("start_button") == 1).await;
        assert_eq!(client.read("bumper"), 42);
        assert_eq!(client.read_all().get("start_button"), 1);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_failed_reads_keep_last_value() {
        let controller = SimController::new();
        let client = BusClient::start(Box::new(controller.bus()), registry(), POLL);
        controller.set_input_register(2, 7);
        wait_for(&client, |s| s.get("bumper") == 7).await;

        controller.set_failing(2, true);
        controller.set_input_register(2, 8);
        controller.set_coil(0, true);
        wait_for(&client, |s| s.get("start_button") == 1).await;
        assert_eq!(client.read("bumper"), 7);

        controller.set_failing(2, false);
        wait_for(&client, |s| s.get("bumper") == 8).await;
        client.stop().await;
    }

    #[tokio::test]
    async fn test_write_reaches_controller() {
        let controller = SimController::new();
        let client = BusClient::start(Box::new(controller.bus()), registry(), POLL);

        assert_eq!(client.write("load_ball", true).await, Ok(true));
        assert_eq!(client.write("load_ball", false).await, Ok(true));
        assert_eq!(controller.coil_writes(), vec![(10, true), (10, false)]);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_write_rejections_never_reach_bus() {
        let controller = SimController::new();
        controller.set_input_register(2, 7);
        let client = BusClient::start(Box::new(controller.bus()), registry(), POLL);
        wait_for(&client, |s| s.get("bumper") == 7).await;
        let before = client.read_all();

        assert_eq!(
            client.write("start_button", true).await,
            Err(WriteRejected::NotOutput("start_button".to_string()))
        );
        assert_eq!(
            client.write("missing", true).await,
            Err(WriteRejected::UnknownDevice("missing".to_string()))
        );
        assert!(controller.coil_writes().is_empty());
        tokio::time::sleep(POLL * 4).await;
        assert_eq!(client.read_all(), before);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_write_failure_returns_false() {
        let controller = SimController::new();
        let client = BusClient::start(Box::new(controller.bus()), registry(), POLL);

        controller.set_offline(true);
        assert_eq!(client.write("load_ball", true).await, Ok(false));
        controller.set_offline(false);
        assert_eq!(client.write("load_ball", true).await, Ok(true));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let controller = SimController::new();
        let client = BusClient::start(Box::new(controller.bus()), registry(), POLL);
        controller.set_input_register(2, 3);
        wait_for(&client, |s| s.get("bumper") == 3).await;

        client.stop().await;
        client.stop().await;

        let requests = controller.request_count();
        tokio::time::sleep(POLL * 4).await;
        assert_eq!(controller.request_count(), requests);
        assert_eq!(client.read("bumper"), 3);
        assert_eq!(client.write("load_ball", true).await, Ok(false));
    }
}
