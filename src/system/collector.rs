use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, ProcessRefreshKind, ProcessesToUpdate, System};

use super::snapshot::{ProcessSample, Snapshot, SystemStats};

/// Enumerates OS processes for the `probe` subcommand.
///
/// Runs inside the probe child process only; the streaming service never
/// touches sysinfo directly.
pub struct Collector {
    sys: System,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        Collector { sys }
    }

    /// Refresh twice across the minimum CPU interval so per-process CPU is a real delta.
    pub fn sample(&mut self) -> Snapshot {
        std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        self.refresh();
        self.build_snapshot()
    }

    fn refresh(&mut self) {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_all();
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
    }

    fn build_snapshot(&self) -> Snapshot {
        let mut all_processes: Vec<ProcessSample> = self
            .sys
            .processes()
            .iter()
            .map(|(pid, process)| ProcessSample {
                name: process.name().to_string_lossy().to_string(),
                pid: pid.as_u32(),
                cpu_percent: f64::from(process.cpu_usage()),
                memory_bytes: process.memory(),
            })
            .collect();
        all_processes.sort_unstable_by_key(|p| p.pid);

        Snapshot {
            apps: Vec::new(),
            all_processes,
            system_stats: SystemStats {
                total_cpu_percent: f64::from(self.sys.global_cpu_usage()),
                total_memory_bytes: self.sys.total_memory(),
                used_memory_bytes: self.sys.used_memory(),
            },
        }
    }
}
