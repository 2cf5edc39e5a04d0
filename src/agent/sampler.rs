//! Runtime and host samplers.
//!
//! `RuntimeSampler` is cheap and reads the agent's own process. `HostSampler`
//! reads machine-wide memory and per-CPU utilization; the CPU figures need two
//! readings a window apart, so a host sample blocks for that window.

use std::thread;
use std::time::Duration;
use sysinfo::{get_current_pid, Pid, ProcessesToUpdate, System, MINIMUM_CPU_UPDATE_INTERVAL};

/// A named gauge reading.
pub type Sample = (String, f64);

/// Samples the agent's own process.
pub struct RuntimeSampler {
    system: System,
    pid: Option<Pid>,
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        RuntimeSampler::new()
    }
}

impl RuntimeSampler {
    /// A sampler for the current process.
    pub fn new() -> RuntimeSampler {
        let pid = match get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("unable to determine own pid, process gauges disabled: {}", e);
                None
            }
        };
        RuntimeSampler {
            system: System::new(),
            pid,
        }
    }

    /// Process gauges plus `RandomValue`.
    pub fn sample(&mut self) -> Vec<Sample> {
        let mut gauges = Vec::with_capacity(8);
        if let Some(pid) = self.pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = self.system.process(pid) {
                let disk = process.disk_usage();
                gauges.push(("ResidentMemory".to_string(), process.memory() as f64));
                gauges.push(("VirtualMemory".to_string(), process.virtual_memory() as f64));
                gauges.push(("ProcessCPU".to_string(), f64::from(process.cpu_usage())));
                gauges.push(("RunTime".to_string(), process.run_time() as f64));
                gauges.push(("DiskReadBytes".to_string(), disk.total_read_bytes as f64));
                gauges.push(("DiskWrittenBytes".to_string(), disk.total_written_bytes as f64));
            }
        }
        gauges.push(("RandomValue".to_string(), rand::random::<f64>()));
        gauges
    }
}

/// Samples host memory and CPU utilization.
pub struct HostSampler {
    system: System,
    window: Duration,
}

impl HostSampler {
    /// A sampler measuring CPU over `window`, never shorter than the minimum
    /// interval sysinfo needs between readings.
    pub fn new(window: Duration) -> HostSampler {
        let mut system = System::new();
        system.refresh_cpu_usage();
        HostSampler {
            system,
            window: window.max(MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }

    /// `TotalMemory`, `FreeMemory` and one `CPUutilization<N>` per CPU,
    /// numbered from 1.
    pub fn sample(&mut self) -> Vec<Sample> {
        self.system.refresh_memory();
        let mut gauges = vec![
            ("TotalMemory".to_string(), self.system.total_memory() as f64),
            ("FreeMemory".to_string(), self.system.free_memory() as f64),
        ];

        self.system.refresh_cpu_usage();
        thread::sleep(self.window);
        self.system.refresh_cpu_usage();
        for (idx, cpu) in self.system.cpus().iter().enumerate() {
            gauges.push((
                format!("CPUutilization{}", idx + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }
        gauges
    }
}
