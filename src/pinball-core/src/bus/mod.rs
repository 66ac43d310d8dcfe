// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::device::{Device, RegisterKind};

pub mod request;

/// Failure talking to the controller. Always transient from the caller's
/// point of view: the next poll cycle simply tries again.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bus {0} timed out")]
    Timeout(&'static str),

    #[error("controller exception {code:#04x} for function {function:#04x}")]
    Exception { function: u8, code: u8 },

    #[error("bus protocol error: {0}")]
    Protocol(String),

    #[error("bus task is not running")]
    Closed,
}

/// A write that was refused before reaching the bus.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriteRejected {
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("device '{0}' is not an output")]
    NotOutput(String),

    #[error("device '{0}' is not a coil")]
    NotCoil(String),
}

pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BusError>> + Send + 'a>>;

/// The four operations the cabinet needs from a field bus.
///
/// Addresses are 0-based wire addresses.
pub trait FieldBus: Send {
    /// Short human-readable description of the endpoint, for logs.
    fn endpoint(&self) -> String;

    fn read_coils<'a>(&'a mut self, address: u16, count: u16) -> BusFuture<'a, Vec<bool>>;

    fn read_input_registers<'a>(&'a mut self, address: u16, count: u16)
        -> BusFuture<'a, Vec<u16>>;

    fn read_holding_registers<'a>(
        &'a mut self,
        address: u16,
        count: u16,
    ) -> BusFuture<'a, Vec<u16>>;

    fn write_single_coil<'a>(&'a mut self, address: u16, value: bool) -> BusFuture<'a, ()>;

    /// Drop the connection. A later call may reconnect.
    fn close<'a>(&'a mut self) -> BusFuture<'a, ()>;
}

/// Read one device with the operation matching its register kind.
pub async fn read_device(bus: &mut dyn FieldBus, device: &Device) -> Result<u16, BusError> {
    let address = device.wire_address();
    match device.kind {
        RegisterKind::Coil => {
            let bits = bus.read_coils(address, 1).await?;
            let bit = bits
                .first()
                .copied()
                .ok_or_else(|| BusError::Protocol("empty coil response".to_string()))?;
            Ok(u16::from(bit))
        }
        RegisterKind::InputRegister => first_register(bus.read_input_registers(address, 1).await?),
        RegisterKind::HoldingRegister => {
            first_register(bus.read_holding_registers(address, 1).await?)
        }
    }
}

fn first_register(values: Vec<u16>) -> Result<u16, BusError> {
    values
        .first()
        .copied()
        .ok_or_else(|| BusError::Protocol("empty register response".to_string()))
}
