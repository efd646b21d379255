//! Resource sampling behind an injected capability.
//!
//! The rest of the worker only sees [`ResourceSampler`], so platform
//! differences stay inside the sysinfo-backed implementation and tests can
//! substitute fixed readings.

use llamagrid_cluster::{PeerCapacity, ResourceUsage};
use sysinfo::System;

/// Source of utilization samples for status reports.
pub trait ResourceSampler: Send {
    fn sample(&mut self) -> ResourceUsage;

    /// Capacity declared to the cluster in discovery datagrams.
    fn capacity(&mut self) -> PeerCapacity {
        let usage = self.sample();
        PeerCapacity {
            memory_bytes: usage.memory_bytes,
            has_accelerator: usage.has_accelerator,
        }
    }
}

/// sysinfo-backed sampler: CPU and memory utilization of the host.
///
/// No accelerator probing; hosts with one report it via config in a later
/// iteration, so `has_accelerator` is false and `accelerator_percent` stays
/// unsampled here.
pub struct SysinfoSampler {
    sys: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        Self { sys }
    }

    pub fn hostname() -> String {
        System::host_name().unwrap_or_else(|| "unknown-host".to_string())
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&mut self) -> ResourceUsage {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_usage();

        let total = self.sys.total_memory();
        let used = self.sys.used_memory();
        let memory_percent = if total > 0 {
            (used as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };

        ResourceUsage {
            cpu_percent: self.sys.global_cpu_info().cpu_usage(),
            memory_percent,
            accelerator_percent: None,
            memory_bytes: total,
            has_accelerator: false,
        }
    }
}

/// Fixed-reading sampler for tests and dry runs.
pub struct StaticSampler(pub ResourceUsage);

impl ResourceSampler for StaticSampler {
    fn sample(&mut self) -> ResourceUsage {
        self.0.clone()
    }
}
