// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated controller for development and testing.
//!
//! Holds coils and registers in memory and answers immediately. No hardware
//! or network required. A [`SimController`] handle stays with the caller so
//! that inputs can be driven and outputs inspected while a [`SimBus`] is in
//! use elsewhere.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use pinball_core::bus::BusFuture;
use pinball_core::{BusError, FieldBus};

use crate::codec::{FunctionCode, EXCEPTION_DEVICE_FAILURE};

#[derive(Debug, Default)]
struct SimState {
    coils: BTreeMap<u16, bool>,
    input_registers: BTreeMap<u16, u16>,
    holding_registers: BTreeMap<u16, u16>,
    /// Addresses whose reads and writes are answered with a device-failure
    /// exception.
    failing: HashSet<u16>,
    offline: bool,
    coil_writes: Vec<(u16, bool)>,
    requests: u64,
}

/// Shared handle to the simulated controller's memory.
#[derive(Debug, Clone, Default)]
pub struct SimController {
    state: Arc<Mutex<SimState>>,
}

impl SimController {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus connected to this controller.
    pub fn bus(&self) -> SimBus {
        SimBus {
            controller: self.clone(),
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, SimState>> {
        match self.state.lock() {
            Ok(state) => Some(state),
            Err(_) => {
                warn!("sim controller mutex poisoned");
                None
            }
        }
    }

    pub fn set_coil(&self, address: u16, value: bool) {
        if let Some(mut state) = self.lock() {
            state.coils.insert(address, value);
        }
    }

    pub fn coil(&self, address: u16) -> bool {
        self.lock()
            .and_then(|s| s.coils.get(&address).copied())
            .unwrap_or(false)
    }

    pub fn set_input_register(&self, address: u16, value: u16) {
        if let Some(mut state) = self.lock() {
            state.input_registers.insert(address, value);
        }
    }

    /// Add `amount` to an input register, wrapping like a 16-bit counter.
    pub fn bump_input_register(&self, address: u16, amount: u16) -> u16 {
        let Some(mut state) = self.lock() else {
            return 0;
        };
        let value = state.input_registers.entry(address).or_insert(0);
        *value = value.wrapping_add(amount);
        *value
    }

    pub fn input_register(&self, address: u16) -> u16 {
        self.lock()
            .and_then(|s| s.input_registers.get(&address).copied())
            .unwrap_or(0)
    }

    pub fn set_holding_register(&self, address: u16, value: u16) {
        if let Some(mut state) = self.lock() {
            state.holding_registers.insert(address, value);
        }
    }

    pub fn holding_register(&self, address: u16) -> u16 {
        self.lock()
            .and_then(|s| s.holding_registers.get(&address).copied())
            .unwrap_or(0)
    }

    /// Make every request touching `address` fail (or stop failing).
    pub fn set_failing(&self, address: u16, failing: bool) {
        if let Some(mut state) = self.lock() {
            if failing {
                state.failing.insert(address);
            } else {
                state.failing.remove(&address);
            }
        }
    }

    /// Fail every request, as if the link were down.
    pub fn set_offline(&self, offline: bool) {
        if let Some(mut state) = self.lock() {
            state.offline = offline;
        }
    }

    /// Coil writes received so far, oldest first.
    pub fn coil_writes(&self) -> Vec<(u16, bool)> {
        self.lock().map(|s| s.coil_writes.clone()).unwrap_or_default()
    }

    /// Requests received so far, failed ones included.
    pub fn request_count(&self) -> u64 {
        self.lock().map_or(0, |s| s.requests)
    }

    fn with_state<T>(
        &self,
        function: FunctionCode,
        address: u16,
        count: u16,
        f: impl FnOnce(&mut SimState) -> T,
    ) -> Result<T, BusError> {
        let Some(mut state) = self.lock() else {
            return Err(BusError::Protocol("sim controller state poisoned".to_string()));
        };
        state.requests += 1;
        if state.offline {
            return Err(BusError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "sim controller offline",
            )));
        }
        let end = address.saturating_add(count.max(1));
        if (address..end).any(|a| state.failing.contains(&a)) {
            return Err(BusError::Exception {
                function: function as u8,
                code: EXCEPTION_DEVICE_FAILURE,
            });
        }
        Ok(f(&mut state))
    }
}

fn read_range<T: Copy + Default>(map: &BTreeMap<u16, T>, address: u16, count: u16) -> Vec<T> {
    (0..count)
        .map(|i| {
            map.get(&address.wrapping_add(i))
                .copied()
                .unwrap_or_default()
        })
        .collect()
}

/// [`FieldBus`] backed by a [`SimController`].
pub struct SimBus {
    controller: SimController,
}

impl SimBus {
    pub fn new() -> Self {
        SimController::new().bus()
    }

    pub fn controller(&self) -> &SimController {
        &self.controller
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldBus for SimBus {
    fn endpoint(&self) -> String {
        "sim".to_string()
    }

    fn read_coils<'a>(&'a mut self, address: u16, count: u16) -> BusFuture<'a, Vec<bool>> {
        let result = self
            .controller
            .with_state(FunctionCode::ReadCoils, address, count, |s| {
                read_range(&s.coils, address, count)
            });
        Box::pin(std::future::ready(result))
    }

    fn read_input_registers<'a>(
        &'a mut self,
        address: u16,
        count: u16,
    ) -> BusFuture<'a, Vec<u16>> {
        let result =
            self.controller
                .with_state(FunctionCode::ReadInputRegisters, address, count, |s| {
                    read_range(&s.input_registers, address, count)
                });
        Box::pin(std::future::ready(result))
    }

    fn read_holding_registers<'a>(
        &'a mut self,
        address: u16,
        count: u16,
    ) -> BusFuture<'a, Vec<u16>> {
        let result =
            self.controller
                .with_state(FunctionCode::ReadHoldingRegisters, address, count, |s| {
                    read_range(&s.holding_registers, address, count)
                });
        Box::pin(std::future::ready(result))
    }

    fn write_single_coil<'a>(&'a mut self, address: u16, value: bool) -> BusFuture<'a, ()> {
        let result =
            self.controller
                .with_state(FunctionCode::WriteSingleCoil, address, 1, |s| {
                    s.coils.insert(address, value);
                    s.coil_writes.push((address, value));
                });
        Box::pin(std::future::ready(result))
    }

    fn close<'a>(&'a mut self) -> BusFuture<'a, ()> {
        Box::pin(std::future::ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_reflect_controller_state() {
        let controller = SimController::new();
        let mut bus = controller.bus();
        controller.set_coil(3, true);
        controller.set_input_register(4, 12);
        controller.set_holding_register(5, 99);

        assert_eq!(bus.read_coils(2, 2).await.unwrap(), vec![false, true]);
        assert_eq!(bus.read_input_registers(4, 1).await.unwrap(), vec![12]);
        assert_eq!(bus.read_holding_registers(5, 1).await.unwrap(), vec![99]);
        assert_eq!(controller.request_count(), 3);
    }

    #[tokio::test]
    async fn test_writes_are_recorded() {
        let controller = SimController::new();
        let mut bus = controller.bus();
        bus.write_single_coil(9, true).await.unwrap();
        bus.write_single_coil(9, false).await.unwrap();

        assert_eq!(controller.coil_writes(), vec![(9, true), (9, false)]);
        assert!(!controller.coil(9));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let controller = SimController::new();
        let mut bus = controller.bus();
        controller.set_failing(4, true);
        assert!(matches!(
            bus.read_input_registers(4, 1).await,
            Err(BusError::Exception {
                function: 0x04,
                code: EXCEPTION_DEVICE_FAILURE
            })
        ));
        assert!(bus.read_input_registers(5, 1).await.is_ok());

        controller.set_failing(4, false);
        controller.set_offline(true);
        assert!(matches!(
            bus.read_input_registers(5, 1).await,
            Err(BusError::Io(_))
        ));
        assert!(bus.write_single_coil(1, true).await.is_err());
        assert!(controller.coil_writes().is_empty());
    }

    #[test]
    fn test_bump_wraps() {
        let controller = SimController::new();
        controller.set_input_register(0, u16::MAX);
        assert_eq!(controller.bump_input_register(0, 2), 1);
        assert_eq!(controller.input_register(0), 1);
    }
}
