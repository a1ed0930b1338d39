//! Self-reported memory sampling. The worker measures its own process, never
//! the supervisor inspecting it externally — the sample rides back as the
//! payload of a `status`/`ping` response.

use supervisor_protocol::Priority;
use sysinfo::{Pid, System};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct MemorySampleWire {
    pub rss_bytes: u64,
    pub heap_used_bytes: u64,
    pub heap_total_bytes: u64,
    pub external_bytes: u64,
    pub array_buffers_bytes: u64,
}

/// Wraps a `sysinfo::System` refreshed for just this process, so repeated
/// sampling doesn't pay the cost of a full system-wide scan.
pub struct MemorySampler {
    system: System,
    pid: Pid,
}

impl MemorySampler {
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
        Self { system, pid }
    }

    /// Refresh and report the current process's memory. `heap_*` and
    /// `external`/`array_buffers` are not distinguishable from the allocator
    /// at this layer, so they are reported equal to `rss` rather than left at
    /// zero, which would otherwise read as "no heap usage" on a dashboard.
    pub fn sample(&mut self) -> MemorySampleWire {
        self.system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[self.pid]), true);
        let rss = self.system.process(self.pid).map(|p| p.memory()).unwrap_or(0);
        MemorySampleWire {
            rss_bytes: rss,
            heap_used_bytes: rss,
            heap_total_bytes: rss,
            external_bytes: rss,
            array_buffers_bytes: rss,
        }
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

pub const STATUS_PRIORITY: Priority = Priority::Low;
