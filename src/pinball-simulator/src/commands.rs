// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Operator commands typed at the simulator prompt.

use std::fmt::Write;

use pinball_backend::SimController;
use pinball_core::{Device, DeviceRegistry, RegisterKind};

pub const HELP: &str = "\
commands:
  press <device>        toggle a coil, or add 1 to a counter
  hit <device> [n]      add n (default 1) to a counter
  set <device> <value>  set a coil (0/1) or register
  reset                 zero every input
  show                  print every device
  help                  this text
  quit                  stop the simulator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Press(String),
    Hit(String, u16),
    Set(String, u16),
    Reset,
    Show,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();
    let device = || {
        args.first()
            .map(|s| s.to_string())
            .ok_or_else(|| format!("'{}' needs a device name", verb))
    };
    let number = |s: &str| {
        s.parse::<u16>()
            .map_err(|_| format!("'{}' is not a number in 0..=65535", s))
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "press" | "toggle" | "p" => Command::Press(device()?),
        "hit" | "h" => {
            let amount = match args.get(1) {
                Some(n) => number(*n)?,
                None => 1,
            };
            Command::Hit(device()?, amount)
        }
        "set" | "s" => {
            let value = args
                .get(1)
                .ok_or_else(|| "'set' needs a value".to_string())
                .and_then(|v| number(*v))?;
            Command::Set(device()?, value)
        }
        "reset" | "r" => Command::Reset,
        "show" | "ls" => Command::Show,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command '{}' (try 'help')", other)),
    };
    Ok(command)
}

fn lookup<'a>(registry: &'a DeviceRegistry, name: &str) -> Result<&'a Device, String> {
    registry
        .get(name)
        .ok_or_else(|| format!("no device named '{}'", name))
}

fn read(controller: &SimController, device: &Device) -> u16 {
    let address = device.wire_address();
    match device.kind {
        RegisterKind::Coil => u16::from(controller.coil(address)),
        RegisterKind::InputRegister => controller.input_register(address),
        RegisterKind::HoldingRegister => controller.holding_register(address),
    }
}

fn write(controller: &SimController, device: &Device, value: u16) {
    let address = device.wire_address();
    match device.kind {
        RegisterKind::Coil => controller.set_coil(address, value != 0),
        RegisterKind::InputRegister => controller.set_input_register(address, value),
        RegisterKind::HoldingRegister => controller.set_holding_register(address, value),
    }
}

/// Apply `command` to the controller and describe the result.
///
/// `Quit` is left to the caller.
pub fn execute(
    controller: &SimController,
    registry: &DeviceRegistry,
    command: &Command,
) -> Result<String, String> {
    match command {
        Command::Press(name) => {
            let device = lookup(registry, name)?;
            let value = match device.kind {
                RegisterKind::Coil => u16::from(read(controller, device) == 0),
                _ => read(controller, device).wrapping_add(1),
            };
            write(controller, device, value);
            Ok(format!("{} = {}", name, value))
        }
        Command::Hit(name, amount) => {
            let device = lookup(registry, name)?;
            if device.kind == RegisterKind::Coil {
                return Err(format!("'{}' is a coil; use 'press'", name));
            }
            let value = read(controller, device).wrapping_add(*amount);
            write(controller, device, value);
            Ok(format!("{} = {}", name, value))
        }
        Command::Set(name, value) => {
            let device = lookup(registry, name)?;
            if device.kind == RegisterKind::Coil && *value > 1 {
                return Err(format!("coil '{}' takes 0 or 1", name));
            }
            write(controller, device, *value);
            Ok(format!("{} = {}", name, value))
        }
        Command::Reset => {
            for device in registry.inputs() {
                write(controller, device, 0);
            }
            Ok("all inputs reset".to_string())
        }
        Command::Show => Ok(render_table(controller, registry)),
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok(String::new()),
    }
}

pub fn render_table(controller: &SimController, registry: &DeviceRegistry) -> String {
    let mut out = String::new();
    for device in registry.iter() {
        let _ = writeln!(
            out,
            "{:<24} {:<6} {:<16} @{:<5} = {}",
            device.name,
            device.direction.as_str(),
            device.kind.as_str(),
            device.address,
            read(controller, device)
        );
    }
    out
}
