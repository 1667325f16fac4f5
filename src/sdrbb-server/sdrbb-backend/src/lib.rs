// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::sync::Arc;

use sdrbb_app::normalize_name;
use sdrbb_core::{DynResult, Transceiver};

mod sim;

pub use sim::{SimSettings, SimTransceiver};

/// Options handed to a backend factory.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Feed transmitted buffers back into the receive stream.
    pub loopback: bool,
    /// Cadence multiplier for simulated streaming; `1.0` is real time.
    pub speed: f64,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            loopback: false,
            speed: 1.0,
        }
    }
}

pub type BackendFactory = fn(&BackendOptions) -> DynResult<Arc<dyn Transceiver>>;

/// Context for registering and instantiating transceiver backends.
#[derive(Clone)]
pub struct RegistrationContext {
    factories: HashMap<String, BackendFactory>,
}

impl RegistrationContext {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory under a stable name (e.g. "sim").
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

    pub fn build(&self, name: &str, options: &BackendOptions) -> DynResult<Arc<dyn Transceiver>> {
        let factory = self
            .factories
            .get(&normalize_name(name))
            .ok_or_else(|| {
                format!(
                    "Unknown transceiver backend: {} (available: {})",
                    name,
                    self.registered_backends().join(", ")
                )
            })?;
        factory(options)
    }
}

impl Default for RegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Register all built-in backends on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    context.register_backend("sim", sim_factory);
}

fn sim_factory(options: &BackendOptions) -> DynResult<Arc<dyn Transceiver>> {
    if options.speed.is_nan() || options.speed <= 0.0 {
        return Err(format!("Simulation speed must be positive, got {}", options.speed).into());
    }
    Ok(Arc::new(SimTransceiver::new(options.loopback, options.speed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registration() {
        let mut ctx = RegistrationContext::new();
        register_builtin_backends_on(&mut ctx);
        assert!(ctx.is_backend_registered("SIM"));
        assert_eq!(ctx.registered_backends(), vec!["sim".to_string()]);
        let hw = ctx.build("sim", &BackendOptions::default()).unwrap();
        assert_eq!(hw.name(), "sim");
    }

    #[test]
    fn test_unknown_backend() {
        let ctx = RegistrationContext::default();
        let err = ctx
            .build("hackrf", &BackendOptions::default())
            .err()
            .expect("unknown backend must fail");
        assert!(err.to_string().contains("hackrf"));
    }

    #[test]
    fn test_rejects_non_positive_speed() {
        let mut ctx = RegistrationContext::new();
        register_builtin_backends_on(&mut ctx);
        let options = BackendOptions {
            speed: 0.0,
            ..BackendOptions::default()
        };
        assert!(ctx.build("sim", &options).is_err());
    }
}
