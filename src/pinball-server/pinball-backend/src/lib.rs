// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::time::Duration;

use pinball_app::normalize_name;
use pinball_core::{DynResult, FieldBus};

pub mod codec;
mod modbus;
mod sim;
mod sim_server;

pub use modbus::ModbusTcp;
pub use sim::{SimBus, SimController};
pub use sim_server::serve_sim;

/// Connection details for instantiating a bus backend.
#[derive(Debug, Clone)]
pub enum BusAccess {
    Tcp {
        addr: String,
        unit_id: u8,
        timeout: Duration,
    },
    Sim,
}

pub type BackendFactory = fn(BusAccess) -> DynResult<Box<dyn FieldBus>>;

/// Context for registering and instantiating bus backends.
#[derive(Clone)]
pub struct RegistrationContext {
    factories: HashMap<String, BackendFactory>,
}

impl RegistrationContext {
    /// Create a new empty registration context.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory under a stable name (e.g. "modbus").
    pub fn register_backend(&mut self, name: &str, factory: BackendFactory) {
        self.factories.insert(normalize_name(name), factory);
    }

    pub fn is_backend_registered(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize_name(name))
    }

    /// Registered backend names, sorted.
    pub fn registered_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate a bus backend by name.
    pub fn build_bus(&self, name: &str, access: BusAccess) -> DynResult<Box<dyn FieldBus>> {
        let factory = self
            .factories
            .get(&normalize_name(name))
            .ok_or_else(|| format!("Unknown bus backend: {}", name))?;
        factory(access)
    }
}

impl Default for RegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Register all built-in backends on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    context.register_backend("modbus", modbus_factory);
    context.register_backend("sim", sim_factory);
}

fn modbus_factory(access: BusAccess) -> DynResult<Box<dyn FieldBus>> {
    match access {
        BusAccess::Tcp {
            addr,
            unit_id,
            timeout,
        } => Ok(Box::new(ModbusTcp::new(&addr, unit_id, timeout))),
        BusAccess::Sim => Err("modbus backend requires TCP access".into()),
    }
}

fn sim_factory(_access: BusAccess) -> DynResult<Box<dyn FieldBus>> {
    Ok(Box::new(SimBus::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_backends() {
        let mut context = RegistrationContext::new();
        register_builtin_backends_on(&mut context);
        assert_eq!(context.registered_backends(), vec!["modbus", "sim"]);
        assert!(context.is_backend_registered("Modbus"));
        assert!(!context.is_backend_registered("serial"));
    }

    #[test]
    fn test_build_bus() {
        let mut context = RegistrationContext::new();
        register_builtin_backends_on(&mut context);

        let bus = context.build_bus("sim", BusAccess::Sim).unwrap();
        assert_eq!(bus.endpoint(), "sim");

        let bus = context
            .build_bus(
                "modbus",
                BusAccess::Tcp {
                    addr: "127.0.0.1:502".to_string(),
                    unit_id: 2,
                    timeout: Duration::from_millis(500),
                },
            )
            .unwrap();
        assert_eq!(bus.endpoint(), "modbus://127.0.0.1:502 (unit 2)");

        assert!(context.build_bus("modbus", BusAccess::Sim).is_err());
        assert!(context.build_bus("serial", BusAccess::Sim).is_err());
    }
}
