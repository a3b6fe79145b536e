//! System resource gate consulted before assigning heavy work.
//!
//! When CPU or memory pressure is above the configured thresholds the
//! coordinator simply skips assignment for the tick and leaves units
//! pending; this is back-pressure, not a failure.

use backup_agent::task::Capability;
use std::sync::Mutex;
use sysinfo::System;
use tracing::debug;

pub trait ResourceGate: Send + Sync {
    fn can_start(&self, capability: Capability) -> bool;
}

/// Ceilings for work that does not stress the machine.
const LIGHT_TASK_CEILING: f32 = 95.0;

pub struct SystemResourceGate {
    sys: Mutex<System>,
    max_cpu_percent: f32,
    max_memory_percent: f32,
}

impl SystemResourceGate {
    pub fn new(max_cpu_percent: f32, max_memory_percent: f32) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        Self {
            sys: Mutex::new(sys),
            max_cpu_percent,
            max_memory_percent,
        }
    }

    fn usage(&self) -> (f32, f32) {
        let mut sys = self.sys.lock().unwrap();
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu = sys.global_cpu_usage();
        let total = sys.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            (sys.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        (cpu, memory)
    }
}

impl ResourceGate for SystemResourceGate {
    fn can_start(&self, capability: Capability) -> bool {
        let (cpu, memory) = self.usage();
        let allowed = if capability.is_heavy() {
            cpu < self.max_cpu_percent && memory < self.max_memory_percent
        } else {
            cpu < LIGHT_TASK_CEILING && memory < LIGHT_TASK_CEILING
        };

        if !allowed {
            debug!(cpu, memory, ?capability, "resource gate closed");
        }
        allowed
    }
}

/// Gate that never blocks; used in tests and when gating is disabled.
pub struct OpenGate;

impl ResourceGate for OpenGate {
    fn can_start(&self, _capability: Capability) -> bool {
        true
    }
}
