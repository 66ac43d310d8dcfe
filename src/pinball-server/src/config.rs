// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for pinball-server.
//!
//! Config is loaded from the `[pinball-server]` section of `pinball.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./pinball.toml`
//! 3. `~/.config/pinball/pinball.toml`
//! 4. `/etc/pinball/pinball.toml`

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use pinball_app::ConfigFile;
use pinball_core::device::parse_device_file;
use pinball_core::{DeviceEntry, DeviceRegistry, Direction, GameConfig, RegisterKind};
use pinball_scores::ScoresConfig;

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// JSON device table (`{"devices": {...}}`), merged under `[devices]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices_file: Option<String>,
    /// General settings
    pub general: GeneralConfig,
    /// Field-bus connection
    pub bus: BusConfig,
    /// Loop timing
    pub behavior: BehaviorConfig,
    /// Game rules, device roles and media
    pub game: GameConfig,
    /// High-score table
    pub scores: ScoresConfig,
    /// Device table, keyed by device name
    pub devices: BTreeMap<String, DeviceEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Backend name ("modbus" or "sim")
    #[serde(rename = "type")]
    pub bus_type: String,
    /// Controller host name or IP
    pub host: String,
    /// Controller TCP port
    pub port: u16,
    /// Modbus unit identifier
    pub unit_id: u8,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_type: "modbus".to_string(),
            host: "192.168.1.10".to_string(),
            port: 502,
            unit_id: 1,
            timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Bus poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Game clock rate in ticks per second
    pub tick_rate_hz: u32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            tick_rate_hz: 30,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.bus.bus_type.trim().is_empty() {
            return Err("[bus].type must not be empty".to_string());
        }
        if self.bus.bus_type.eq_ignore_ascii_case("modbus") {
            if self.bus.host.trim().is_empty() {
                return Err("[bus].host must not be empty".to_string());
            }
            if self.bus.port == 0 {
                return Err("[bus].port must be > 0".to_string());
            }
        }
        if self.bus.timeout_ms == 0 {
            return Err("[bus].timeout_ms must be > 0".to_string());
        }

        if self.behavior.poll_interval_ms == 0 {
            return Err("[behavior].poll_interval_ms must be > 0".to_string());
        }
        if !(1..=1000).contains(&self.behavior.tick_rate_hz) {
            return Err("[behavior].tick_rate_hz must be in range 1..=1000".to_string());
        }

        if self.game.num_balls == 0 {
            return Err("[game].num_balls must be > 0".to_string());
        }
        if self.game.game_over_timeout_ms == 0 {
            return Err("[game].game_over_timeout_ms must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.game.music_volume) {
            return Err("[game].music_volume must be in range 0.0..=1.0".to_string());
        }

        if self.scores.max_entries == 0 {
            return Err("[scores].max_entries must be > 0".to_string());
        }
        if self.scores.path.trim().is_empty() {
            return Err("[scores].path must not be empty".to_string());
        }

        Ok(())
    }

    /// Build the device registry from `devices_file` (if any) and the
    /// `[devices]` table. Entries in the table win over the file.
    pub fn device_registry(&self, devices_file: Option<&Path>) -> Result<DeviceRegistry, String> {
        let mut entries: Vec<(String, DeviceEntry)> = Vec::new();

        let file = devices_file
            .map(Path::to_path_buf)
            .or_else(|| self.devices_file.as_ref().map(Into::into));
        if let Some(path) = file {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read device file {}: {}", path.display(), e))?;
            let parsed = parse_device_file(&content)
                .map_err(|e| format!("Failed to load device file {}: {}", path.display(), e))?;
            entries.extend(parsed);
        }
        for (name, entry) in &self.devices {
            entries.retain(|(existing, _)| existing.trim() != name.trim());
            entries.push((name.clone(), entry.clone()));
        }

        DeviceRegistry::from_entries(entries).map_err(|e| format!("Invalid device table: {}", e))
    }

    /// Game roles that point at missing or mistyped devices.
    pub fn check_game_devices(&self, registry: &DeviceRegistry) -> Vec<String> {
        let game = &self.game;
        let mut problems = Vec::new();
        let inputs = [
            ("start_button", &game.start_button),
            ("ball_drain", &game.ball_drain),
            ("launch_lane", &game.launch_lane),
        ];
        for (role, name) in inputs {
            match registry.get(name) {
                None => problems.push(format!("[game].{} device '{}' is not defined", role, name)),
                Some(d) if d.direction != Direction::Input => problems.push(format!(
                    "[game].{} device '{}' is not an input",
                    role, name
                )),
                Some(_) => {}
            }
        }
        let outputs = [
            ("drop_target_reset", &game.drop_target_reset),
            ("load_ball", &game.load_ball),
            ("game_over_bit", &game.game_over_bit),
        ];
        for (role, name) in outputs {
            if let Err(e) = registry.writable(name) {
                problems.push(format!("[game].{}: {}", role, e));
            }
        }
        problems
    }

    /// Generate an example configuration under the `[pinball-server]`
    /// section header.
    pub fn example_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "pinball-server")]
            inner: ServerConfig,
        }
        let devices = [
            ("start_button", 1, RegisterKind::Coil, Direction::Input, 0),
            ("shooter_lane_switch", 2, RegisterKind::Coil, Direction::Input, 0),
            ("ball_drain", 1, RegisterKind::InputRegister, Direction::Input, 0),
            ("pop_bumper", 2, RegisterKind::InputRegister, Direction::Input, 100),
            ("spinner", 3, RegisterKind::InputRegister, Direction::Input, 10),
            ("drop_targets", 1, RegisterKind::HoldingRegister, Direction::Input, 500),
            ("drop_target_reset", 9, RegisterKind::Coil, Direction::Output, 0),
            ("load_ball", 10, RegisterKind::Coil, Direction::Output, 0),
            ("game_over_bit", 11, RegisterKind::Coil, Direction::Output, 0),
        ]
        .into_iter()
        .map(|(name, address, kind, direction, score)| {
            (
                name.to_string(),
                DeviceEntry::new(address, kind, direction, score),
            )
        })
        .collect();

        let example = ServerConfig {
            devices_file: None,
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            bus: BusConfig::default(),
            behavior: BehaviorConfig::default(),
            game: GameConfig::default(),
            scores: ScoresConfig::default(),
            devices,
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "pinball-server"
    }
}
