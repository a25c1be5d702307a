// SPDX-License-Identifier: Apache-2.0

//! CPU entitlement against container and hypervisor limits.

use jitc_vm::PortLayer;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct Cached {
    num_target_cpus: u32,
    guest_cpu_entitlement: f64,
    jvm_cpu_entitlement: f64,
}

/// Cached CPU entitlement facts.
///
/// The numbers are not expected to change while the VM runs, so they are
/// computed once on first use and on explicit refresh. All percentages use
/// 100 = one full CPU.
pub struct CpuEntitlement {
    port: Arc<dyn PortLayer>,
    cached: Mutex<Option<Cached>>,
}

impl CpuEntitlement {
    /// Creates an entitlement cache over the port layer.
    #[must_use]
    pub fn new(port: Arc<dyn PortLayer>) -> Self {
        CpuEntitlement {
            port,
            cached: Mutex::new(None),
        }
    }

    /// Recomputes and caches the entitlement numbers.
    pub fn refresh(&self) {
        let num_target_cpus = self.port.target_cpu_count().max(1);
        let target_entitlement = f64::from(num_target_cpus) * 100.0;
        let guest = if self.port.hypervisor_present() {
            self.port.guest_cpu_entitlement_percent().unwrap_or(0.0)
        } else {
            0.0
        };
        // If the process is bound to fewer CPUs than the guest is entitled
        // to, the binding wins; a zero or failed guest reading also falls
        // back to the target CPUs.
        let jvm = if guest > 0.0 && guest < target_entitlement {
            guest
        } else {
            target_entitlement
        };
        *self.cached.lock() = Some(Cached {
            num_target_cpus,
            guest_cpu_entitlement: guest,
            jvm_cpu_entitlement: jvm,
        });
    }

    fn cached(&self) -> Cached {
        let mut cached = self.cached.lock();
        if cached.is_none() {
            drop(cached);
            self.refresh();
            cached = self.cached.lock();
        }
        cached.unwrap_or(Cached {
            num_target_cpus: 1,
            guest_cpu_entitlement: 0.0,
            jvm_cpu_entitlement: 100.0,
        })
    }

    /// CPUs the process may use.
    #[must_use]
    pub fn num_target_cpus(&self) -> u32 {
        self.cached().num_target_cpus
    }

    /// Guest entitlement percent; zero without a hypervisor.
    #[must_use]
    pub fn guest_cpu_entitlement(&self) -> f64 {
        self.cached().guest_cpu_entitlement
    }

    /// What the VM may actually consume: the smaller of the CPU binding and
    /// the guest entitlement.
    #[must_use]
    pub fn jvm_cpu_entitlement(&self) -> f64 {
        self.cached().jvm_cpu_entitlement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitc_vm::testing::MockPortLayer;

    #[test]
    fn without_hypervisor_entitlement_is_cpu_count() {
        let port = Arc::new(MockPortLayer::new());
        port.set_target_cpus(8);
        let entitlement = CpuEntitlement::new(port);
        assert_eq!(entitlement.num_target_cpus(), 8);
        assert_eq!(entitlement.jvm_cpu_entitlement(), 800.0);
    }

    #[test]
    fn hypervisor_limit_caps_entitlement() {
        let port = Arc::new(MockPortLayer::new());
        port.set_target_cpus(8);
        port.set_hypervisor(true, Some(250.0));
        let entitlement = CpuEntitlement::new(port);
        assert_eq!(entitlement.jvm_cpu_entitlement(), 250.0);
    }

    #[test]
    fn cpu_binding_overrides_larger_guest_entitlement() {
        let port = Arc::new(MockPortLayer::new());
        port.set_target_cpus(2);
        port.set_hypervisor(true, Some(1600.0));
        let entitlement = CpuEntitlement::new(port);
        assert_eq!(entitlement.jvm_cpu_entitlement(), 200.0);
    }
}
