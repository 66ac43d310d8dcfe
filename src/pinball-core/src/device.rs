// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device table: the cabinet's sensors and actuators as the controller
//! exposes them.
//!
//! The table is parsed once at startup from loosely typed entries
//! ([`DeviceEntry`]) into a validated, immutable [`DeviceRegistry`]. Every
//! problem in the table is reported as a [`DeviceConfigError`]; nothing is
//! checked lazily at first use.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::bus::WriteRejected;

/// Register space a device lives in on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// Single-bit read/write register.
    Coil,
    /// Read-only 16-bit counter.
    InputRegister,
    /// Read/write 16-bit counter.
    HoldingRegister,
}

impl RegisterKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "coil" => Some(Self::Coil),
            "input_register" => Some(Self::InputRegister),
            "holding_register" => Some(Self::HoldingRegister),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coil => "coil",
            Self::InputRegister => "input_register",
            Self::HoldingRegister => "holding_register",
        }
    }

    /// Counter registers are the only kinds that contribute to the score.
    pub fn is_counter(&self) -> bool {
        matches!(self, Self::InputRegister | Self::HoldingRegister)
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "input" => Some(Self::Input),
            "output" => Some(Self::Output),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub name: String,
    /// 1-based register number as printed on the controller's IO map.
    pub address: u16,
    pub kind: RegisterKind,
    pub direction: Direction,
    /// Points per counted hit. Zero means the device never scores.
    pub weight: u32,
}

impl Device {
    /// 0-based address used on the wire.
    pub fn wire_address(&self) -> u16 {
        self.address - 1
    }

    pub fn is_output_coil(&self) -> bool {
        self.direction == Direction::Output && self.kind == RegisterKind::Coil
    }

    pub fn is_scoring(&self) -> bool {
        self.direction == Direction::Input && self.kind.is_counter() && self.weight > 0
    }
}

/// One raw entry of the device table, as found in a config file.
///
/// Every field is optional here so that a missing field can be reported by
/// name instead of as a generic deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reg_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
}

impl DeviceEntry {
    pub fn new(address: i64, kind: RegisterKind, direction: Direction, score: i64) -> Self {
        Self {
            address: Some(address),
            reg_type: Some(kind.as_str().to_string()),
            direction: Some(direction.as_str().to_string()),
            score: Some(score),
        }
    }

    fn validate(&self, name: &str) -> Result<Device, DeviceConfigError> {
        let missing = |field: &'static str| DeviceConfigError::MissingField {
            device: name.to_string(),
            field,
        };

        let address = self.address.ok_or_else(|| missing("address"))?;
        let reg_type = self.reg_type.as_deref().ok_or_else(|| missing("reg_type"))?;
        let direction = self.direction.as_deref().ok_or_else(|| missing("direction"))?;

        let address = match u16::try_from(address) {
            Ok(a) if a >= 1 => a,
            _ => {
                return Err(DeviceConfigError::InvalidAddress {
                    device: name.to_string(),
                    address,
                })
            }
        };
        let kind =
            RegisterKind::parse(reg_type).ok_or_else(|| DeviceConfigError::UnknownKind {
                device: name.to_string(),
                value: reg_type.to_string(),
            })?;
        let direction =
            Direction::parse(direction).ok_or_else(|| DeviceConfigError::UnknownDirection {
                device: name.to_string(),
                value: direction.to_string(),
            })?;
        let weight = match self.score {
            None => 0,
            Some(score) => {
                u32::try_from(score).map_err(|_| DeviceConfigError::InvalidScore {
                    device: name.to_string(),
                    score,
                })?
            }
        };

        // Only single-coil writes exist on the bus.
        if direction == Direction::Output && kind != RegisterKind::Coil {
            return Err(DeviceConfigError::InvalidCombination {
                device: name.to_string(),
                kind,
                direction,
            });
        }

        Ok(Device {
            name: name.to_string(),
            address,
            kind,
            direction,
            weight,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceConfigError {
    #[error("device table is empty")]
    Empty,

    #[error("device name must not be empty")]
    EmptyName,

    #[error("device '{device}' is defined more than once")]
    DuplicateName { device: String },

    #[error("device '{device}' is missing required field '{field}'")]
    MissingField { device: String, field: &'static str },

    #[error("device '{device}' has unknown reg_type '{value}'")]
    UnknownKind { device: String, value: String },

    #[error("device '{device}' has unknown direction '{value}'")]
    UnknownDirection { device: String, value: String },

    #[error("device '{device}' has invalid address {address} (expected 1..=65535)")]
    InvalidAddress { device: String, address: i64 },

    #[error("device '{device}' has invalid score {score} (expected a non-negative integer)")]
    InvalidScore { device: String, score: i64 },

    #[error("device '{device}': {direction} devices cannot be of kind {kind}")]
    InvalidCombination {
        device: String,
        kind: RegisterKind,
        direction: Direction,
    },

    #[error("failed to parse device table: {0}")]
    Parse(String),
}

/// JSON document shape: `{"devices": {"name": {...}}}`.
#[derive(Debug, Deserialize)]
struct DeviceFile {
    #[serde(deserialize_with = "entries_in_file_order")]
    devices: Vec<(String, DeviceEntry)>,
}

/// Keep every key of the `devices` object, repeats included, so that
/// [`DeviceRegistry::from_entries`] can reject them.
fn entries_in_file_order<'de, D>(deserializer: D) -> Result<Vec<(String, DeviceEntry)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Vec<(String, DeviceEntry)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of device names to device entries")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, entry)) = map.next_entry::<String, DeviceEntry>()? {
                entries.push((name, entry));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor)
}

/// Raw entries of a JSON device file in file order, not yet validated.
pub fn parse_device_file(content: &str) -> Result<Vec<(String, DeviceEntry)>, DeviceConfigError> {
    let file: DeviceFile =
        serde_json::from_str(content).map_err(|e| DeviceConfigError::Parse(e.to_string()))?;
    Ok(file.devices)
}

/// Immutable name-to-device table.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
}

impl DeviceRegistry {
    /// Validate every entry. The first invalid entry aborts the whole load,
    /// and so does a name that appears twice once trimmed.
    pub fn from_entries<I>(entries: I) -> Result<Self, DeviceConfigError>
    where
        I: IntoIterator<Item = (String, DeviceEntry)>,
    {
        let mut devices = BTreeMap::new();
        for (name, entry) in entries {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(DeviceConfigError::EmptyName);
            }
            if devices.contains_key(&name) {
                return Err(DeviceConfigError::DuplicateName { device: name });
            }
            let device = entry.validate(&name)?;
            devices.insert(name, device);
        }
        if devices.is_empty() {
            return Err(DeviceConfigError::Empty);
        }
        Ok(Self { devices })
    }

    pub fn from_json_str(content: &str) -> Result<Self, DeviceConfigError> {
        Self::from_entries(parse_device_file(content)?)
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// All devices in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Devices the poll loop reads.
    pub fn inputs(&self) -> impl Iterator<Item = &Device> {
        self.iter().filter(|d| d.direction == Direction::Input)
    }

    /// Input counters with a non-zero weight.
    pub fn scoring(&self) -> impl Iterator<Item = &Device> {
        self.iter().filter(|d| d.is_scoring())
    }

    /// Resolve a write target, rejecting anything that is not an output coil.
    pub fn writable(&self, name: &str) -> Result<&Device, WriteRejected> {
        let device = self
            .get(name)
            .ok_or_else(|| WriteRejected::UnknownDevice(name.to_string()))?;
        if device.direction != Direction::Output {
            return Err(WriteRejected::NotOutput(name.to_string()));
        }
        if device.kind != RegisterKind::Coil {
            return Err(WriteRejected::NotCoil(name.to_string()));
        }
        Ok(device)
    }
}
