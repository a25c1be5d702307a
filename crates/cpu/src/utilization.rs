// SPDX-License-Identifier: Apache-2.0

//! Whole-machine and VM CPU utilization.

use jitc_config::CpuOptions;
use jitc_vm::PortLayer;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Value reported before the first complete measurement interval.
const INITIAL_USAGE: i32 = -1;

/// One raw sample kept in the circular buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuUsageSample {
    /// Port-layer timestamp of the sample, ns.
    pub timestamp_ns: i64,
    /// Cumulative machine CPU time at the sample, ns.
    pub system_cpu_ns: i64,
    /// Cumulative VM (process) CPU time at the sample, ns.
    pub vm_cpu_ns: i64,
}

#[derive(Debug)]
struct UtilizationState {
    cpu_usage: i32,
    vm_cpu_usage: i32,
    avg_cpu_usage: i32,
    avg_cpu_idle: i32,
    prev_interval_ns: i64,
    prev_machine_uptime_ns: i64,
    prev_machine_cpu_ns: i64,
    prev_vm_cpu_ns: i64,
}

#[derive(Debug)]
struct CircularBuffer {
    samples: Vec<CpuUsageSample>,
    index: usize,
}

/// Periodic reader of machine and process CPU totals.
///
/// `update()` is driven by the sampling thread; readers take the cached
/// percentages without blocking on the port layer.
pub struct CpuUtilization {
    port: Arc<dyn PortLayer>,
    state: Mutex<UtilizationState>,
    buffer: Option<Mutex<CircularBuffer>>,
    functional: AtomicBool,
}

impl CpuUtilization {
    /// Creates the monitor. A zero circular-buffer size disables the buffer;
    /// non-zero sizes are raised to the built-in minimum.
    #[must_use]
    pub fn new(port: Arc<dyn PortLayer>, options: &CpuOptions) -> Self {
        let buffer = (options.usage_circular_buffer_size > 0).then(|| {
            let size = options
                .usage_circular_buffer_size
                .max(CpuOptions::MIN_CIRCULAR_BUFFER_SIZE);
            Mutex::new(CircularBuffer {
                samples: vec![
                    CpuUsageSample {
                        timestamp_ns: 0,
                        system_cpu_ns: 0,
                        vm_cpu_ns: 0,
                    };
                    size
                ],
                index: 0,
            })
        });
        CpuUtilization {
            port,
            state: Mutex::new(UtilizationState {
                cpu_usage: INITIAL_USAGE,
                vm_cpu_usage: INITIAL_USAGE,
                avg_cpu_usage: INITIAL_USAGE,
                avg_cpu_idle: INITIAL_USAGE,
                prev_interval_ns: 0,
                prev_machine_uptime_ns: 0,
                prev_machine_cpu_ns: 0,
                prev_vm_cpu_ns: 0,
            }),
            buffer,
            functional: AtomicBool::new(true),
        }
    }

    /// Whether the monitor still trusts its port-layer readings.
    #[must_use]
    pub fn is_functional(&self) -> bool {
        self.functional.load(Ordering::Acquire)
    }

    fn disable(&self) {
        if self.functional.swap(false, Ordering::AcqRel) {
            tracing::warn!("CPU utilization monitor disabled after port-layer failure");
        }
    }

    /// Takes a fresh reading and recomputes the interval percentages.
    ///
    /// Returns `false` when the monitor is (or just became) non-functional.
    pub fn update(&self) -> bool {
        if !self.is_functional() {
            return false;
        }
        let (machine, process) = match (self.port.machine_cpu_time(), self.port.process_cpu_time())
        {
            (Ok(machine), Ok(process)) => (machine, process),
            _ => {
                self.disable();
                return false;
            }
        };

        let mut state = self.state.lock();
        state.prev_interval_ns = machine.timestamp_ns - state.prev_machine_uptime_ns;
        if state.prev_interval_ns > 0 {
            let vm_total = process.total_ns();
            state.cpu_usage =
                (100 * (machine.cpu_time_ns - state.prev_machine_cpu_ns) / state.prev_interval_ns)
                    as i32;
            state.vm_cpu_usage =
                (100 * (vm_total - state.prev_vm_cpu_ns) / state.prev_interval_ns) as i32;
        }
        if machine.num_cpus > 0 {
            state.avg_cpu_usage = state.cpu_usage / machine.num_cpus;
        }
        state.avg_cpu_idle = 100 - state.avg_cpu_usage;
        state.prev_machine_uptime_ns = machine.timestamp_ns;
        state.prev_machine_cpu_ns = machine.cpu_time_ns;
        state.prev_vm_cpu_ns = process.total_ns();
        true
    }

    /// Appends a raw sample to the circular buffer.
    ///
    /// Returns `false` when the buffer is disabled or the port layer failed.
    pub fn update_circular_buffer(&self) -> bool {
        if !self.is_functional() {
            return false;
        }
        let Some(buffer) = &self.buffer else {
            return false;
        };
        let (machine, process) = match (self.port.machine_cpu_time(), self.port.process_cpu_time())
        {
            (Ok(machine), Ok(process)) => (machine, process),
            _ => {
                self.disable();
                return false;
            }
        };
        let mut buffer = buffer.lock();
        let index = buffer.index;
        buffer.samples[index] = CpuUsageSample {
            timestamp_ns: machine.timestamp_ns,
            system_cpu_ns: machine.cpu_time_ns,
            vm_cpu_ns: process.total_ns(),
        };
        buffer.index = (index + 1) % buffer.samples.len();
        true
    }

    /// Machine CPU usage over the last interval, percent of one CPU summed
    /// over all CPUs; `-1` before the first interval.
    #[must_use]
    pub fn cpu_usage_percent(&self) -> i32 {
        self.state.lock().cpu_usage
    }

    /// VM (process) CPU usage over the last interval; `-1` before the
    /// first interval.
    #[must_use]
    pub fn vm_cpu_usage_percent(&self) -> i32 {
        self.state.lock().vm_cpu_usage
    }

    /// Machine usage averaged per core; `-1` before the first interval.
    #[must_use]
    pub fn avg_cpu_usage_percent(&self) -> i32 {
        self.state.lock().avg_cpu_usage
    }

    /// Idle percentage averaged per core.
    #[must_use]
    pub fn avg_cpu_idle_percent(&self) -> i32 {
        self.state.lock().avg_cpu_idle
    }

    /// Copies out the circular buffer, oldest sample first. Empty when the
    /// buffer is disabled.
    #[must_use]
    pub fn usage_history(&self) -> Vec<CpuUsageSample> {
        let Some(buffer) = &self.buffer else {
            return Vec::new();
        };
        let buffer = buffer.lock();
        let mut out = Vec::with_capacity(buffer.samples.len());
        for i in 0..buffer.samples.len() {
            let sample = buffer.samples[(buffer.index + i) % buffer.samples.len()];
            if sample.timestamp_ns != 0 {
                out.push(sample);
            }
        }
        out
    }
}
