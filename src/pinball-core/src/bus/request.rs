// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tokio::sync::oneshot;

use crate::bus::BusError;
use crate::device::Device;

/// Coil write sent to the task that owns the bus connection.
///
/// The target has already been checked to be an output coil.
#[derive(Debug)]
pub struct BusRequest {
    pub device: Device,
    pub value: bool,
    pub respond_to: oneshot::Sender<Result<(), BusError>>,
}
