//! Managed-instance model: power state plus one-shot boot overrides.
//!
//! The protocol engine never holds power or boot state itself; it
//! drives the [`ManagedTargets`] capability and reports the outcome as
//! a completion code.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::info;

use crate::types::{BootDevice, PowerState};

/// Failures surfaced by a managed-target backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TargetError {
    /// No target is registered under the given name.
    #[error("target not found")]
    NotFound,
    /// The backend reported a failure for the operation.
    #[error("backend operation failed")]
    Failed,
    /// The backend did not complete the operation in time.
    #[error("backend operation timed out")]
    Timeout,
}

/// Capability interface onto the systems this BMC fronts.
///
/// Every method is a bounded synchronous operation; callers that live
/// on an async runtime wrap these in a timeout. Operations on different
/// names must not block each other.
pub trait ManagedTargets: Send + Sync {
    /// Current power state of `name`.
    fn query(&self, name: &str) -> Result<PowerState, TargetError>;

    /// Power `name` on, applying any staged one-shot boot override.
    fn power_on(&self, name: &str) -> Result<(), TargetError>;

    /// Power `name` off, restoring the boot order an override replaced.
    fn power_off(&self, name: &str) -> Result<(), TargetError>;

    /// Stage a one-shot boot-device override for the next power-on.
    fn set_boot_device(&self, name: &str, device: BootDevice) -> Result<(), TargetError>;

    /// The staged-but-not-yet-applied boot override, if any.
    fn boot_override(&self, name: &str) -> Result<Option<BootDevice>, TargetError>;
}

#[derive(Debug)]
struct Instance {
    power: PowerState,
    boot_order: Vec<BootDevice>,
    next_boot_order: Option<Vec<BootDevice>>,
    restore_boot_order: Option<Vec<BootDevice>>,
}

impl Instance {
    fn new() -> Self {
        Self {
            power: PowerState::Stopped,
            boot_order: vec![BootDevice::Hdd, BootDevice::Cd, BootDevice::Pxe],
            next_boot_order: None,
            restore_boot_order: None,
        }
    }

    fn set_boot_device(&mut self, device: BootDevice) {
        let mut order = vec![device];
        order.extend(self.boot_order.iter().copied().filter(|&d| d != device));
        self.next_boot_order = Some(order);
    }

    fn power_on(&mut self) {
        if let Some(next) = self.next_boot_order.take() {
            let previous = std::mem::replace(&mut self.boot_order, next);
            // An override staged on top of an unrestored override keeps
            // the earliest boot order for restoration.
            if self.restore_boot_order.is_none() {
                self.restore_boot_order = Some(previous);
            }
        }
        self.power = PowerState::Running;
    }

    fn power_off(&mut self) {
        if let Some(previous) = self.restore_boot_order.take() {
            self.boot_order = previous;
        }
        self.power = PowerState::Stopped;
    }
}

/// In-memory managed-instance registry with per-name mutual exclusion.
///
/// The map lock is held only to look up an instance handle; state
/// changes serialize on the per-instance mutex, so commands against
/// different names never block each other.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: RwLock<HashMap<String, Arc<Mutex<Instance>>>>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, powered off, with the default boot order.
    /// Re-registering an existing name resets its state.
    pub fn add(&self, name: &str) {
        self.instances
            .write()
            .insert(name.to_string(), Arc::new(Mutex::new(Instance::new())));
        info!(instance = name, "registered instance");
    }

    /// Remove `name` from the registry, if present.
    pub fn remove(&self, name: &str) {
        if self.instances.write().remove(name).is_some() {
            info!(instance = name, "removed instance");
        }
    }

    /// Names of all registered instances.
    pub fn names(&self) -> Vec<String> {
        self.instances.read().keys().cloned().collect()
    }

    fn instance(&self, name: &str) -> Result<Arc<Mutex<Instance>>, TargetError> {
        self.instances
            .read()
            .get(name)
            .cloned()
            .ok_or(TargetError::NotFound)
    }
}

impl ManagedTargets for InstanceRegistry {
    fn query(&self, name: &str) -> Result<PowerState, TargetError> {
        Ok(self.instance(name)?.lock().power)
    }

    fn power_on(&self, name: &str) -> Result<(), TargetError> {
        self.instance(name)?.lock().power_on();
        info!(instance = name, "power on");
        Ok(())
    }

    fn power_off(&self, name: &str) -> Result<(), TargetError> {
        self.instance(name)?.lock().power_off();
        info!(instance = name, "power off");
        Ok(())
    }

    fn set_boot_device(&self, name: &str, device: BootDevice) -> Result<(), TargetError> {
        self.instance(name)?.lock().set_boot_device(device);
        info!(instance = name, ?device, "staged boot override");
        Ok(())
    }

    fn boot_override(&self, name: &str) -> Result<Option<BootDevice>, TargetError> {
        Ok(self
            .instance(name)?
            .lock()
            .next_boot_order
            .as_ref()
            .and_then(|order| order.first().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_transitions() {
        let registry = InstanceRegistry::new();
        registry.add("node");

        assert_eq!(registry.query("node"), Ok(PowerState::Stopped));
        registry.power_on("node").expect("power on");
        assert_eq!(registry.query("node"), Ok(PowerState::Running));
        registry.power_off("node").expect("power off");
        assert_eq!(registry.query("node"), Ok(PowerState::Stopped));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = InstanceRegistry::new();
        assert_eq!(registry.query("ghost"), Err(TargetError::NotFound));
        assert_eq!(registry.power_on("ghost"), Err(TargetError::NotFound));
        assert_eq!(
            registry.set_boot_device("ghost", BootDevice::Pxe),
            Err(TargetError::NotFound)
        );
    }

    #[test]
    fn boot_override_is_one_shot() {
        let registry = InstanceRegistry::new();
        registry.add("node");

        let original = {
            let instance = registry.instance("node").unwrap();
            let order = instance.lock().boot_order.clone();
            order
        };

        registry
            .set_boot_device("node", BootDevice::Pxe)
            .expect("stage");
        assert_eq!(registry.boot_override("node"), Ok(Some(BootDevice::Pxe)));

        registry.power_on("node").expect("power on");
        // Applied: no longer staged, PXE leads the live order.
        assert_eq!(registry.boot_override("node"), Ok(None));
        {
            let instance = registry.instance("node").unwrap();
            assert_eq!(instance.lock().boot_order[0], BootDevice::Pxe);
        }

        registry.power_off("node").expect("power off");
        {
            let instance = registry.instance("node").unwrap();
            assert_eq!(instance.lock().boot_order, original);
        }
    }

    #[test]
    fn second_power_off_leaves_boot_order_alone() {
        let registry = InstanceRegistry::new();
        registry.add("node");

        registry
            .set_boot_device("node", BootDevice::Cd)
            .expect("stage");
        registry.power_on("node").expect("power on");
        registry.power_off("node").expect("power off");

        let restored = {
            let instance = registry.instance("node").unwrap();
            let order = instance.lock().boot_order.clone();
            order
        };

        registry.power_off("node").expect("second power off");
        let instance = registry.instance("node").unwrap();
        assert_eq!(instance.lock().boot_order, restored);
    }

    #[test]
    fn add_remove_and_names() {
        let registry = InstanceRegistry::new();
        registry.add("a");
        registry.add("b");

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        registry.remove("a");
        assert_eq!(registry.query("a"), Err(TargetError::NotFound));
        assert_eq!(registry.query("b"), Ok(PowerState::Stopped));
    }
}
