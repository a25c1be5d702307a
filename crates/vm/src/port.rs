// SPDX-License-Identifier: Apache-2.0

//! The OS port layer.
//!
//! Mirrors the handful of OS readings the controller consumes: whole-machine
//! CPU totals, process CPU totals, the calling thread's CPU clock, page
//! sizes, and CPU entitlement facts. Every reading is fallible; consumers
//! self-disable on the first failure instead of retrying forever.

use crate::error::PortError;
use cpu_time::{ProcessTime, ThreadTime};
use std::time::Instant;

/// Whole-machine CPU totals, cumulative since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineCpuTime {
    /// Monotonic timestamp of the reading, in nanoseconds from an arbitrary
    /// fixed point.
    pub timestamp_ns: i64,
    /// Cumulative CPU time (user + system, all CPUs summed) in nanoseconds.
    pub cpu_time_ns: i64,
    /// Number of online CPUs as reported by the OS.
    pub num_cpus: i32,
}

/// Process CPU totals, cumulative since process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessCpuTime {
    /// Time spent in the kernel on behalf of the process, in nanoseconds.
    pub system_ns: i64,
    /// Time spent in user code, in nanoseconds.
    pub user_ns: i64,
}

impl ProcessCpuTime {
    /// Total CPU charged to the process.
    #[must_use]
    pub fn total_ns(&self) -> i64 {
        self.system_ns + self.user_ns
    }
}

/// The narrow OS interface the controller depends on.
pub trait PortLayer: Send + Sync {
    /// Reads cumulative whole-machine CPU totals.
    fn machine_cpu_time(&self) -> Result<MachineCpuTime, PortError>;

    /// Reads cumulative process CPU totals.
    fn process_cpu_time(&self) -> Result<ProcessCpuTime, PortError>;

    /// Reads the calling thread's cumulative CPU clock, in nanoseconds.
    fn self_thread_cpu_time_ns(&self) -> Result<i64, PortError>;

    /// A monotonic wall clock, in nanoseconds from an arbitrary fixed point.
    fn monotonic_time_ns(&self) -> i64;

    /// Page sizes usable for memory segments, smallest first.
    fn supported_page_sizes(&self) -> Vec<usize>;

    /// Number of CPUs the process is allowed to run on.
    fn target_cpu_count(&self) -> u32;

    /// Whether the OS reports a hypervisor under the VM.
    fn hypervisor_present(&self) -> bool;

    /// Guest CPU entitlement in percent (100 = one full CPU), when a
    /// hypervisor reports one.
    fn guest_cpu_entitlement_percent(&self) -> Option<f64>;
}

/// Port layer backed by the host OS.
///
/// Thread and process CPU clocks come from the POSIX CPU-time clocks.
/// Machine totals are read from `/proc/stat` on Linux; on other platforms
/// [`PortLayer::machine_cpu_time`] reports [`PortError::Unsupported`] and the
/// whole-machine monitor self-disables, which is the designed degradation.
pub struct SystemPortLayer {
    epoch: Instant,
    num_cpus: u32,
}

impl SystemPortLayer {
    /// Probes the host and builds the port layer.
    #[must_use]
    pub fn new() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu_usage();
        let num_cpus = system.cpus().len().max(1) as u32;
        SystemPortLayer {
            epoch: Instant::now(),
            num_cpus,
        }
    }
}

impl Default for SystemPortLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl PortLayer for SystemPortLayer {
    fn machine_cpu_time(&self) -> Result<MachineCpuTime, PortError> {
        let cpu_time_ns = read_proc_stat_total_ns()?;
        Ok(MachineCpuTime {
            timestamp_ns: self.monotonic_time_ns(),
            cpu_time_ns,
            num_cpus: self.num_cpus as i32,
        })
    }

    fn process_cpu_time(&self) -> Result<ProcessCpuTime, PortError> {
        // The portable CPU clock gives user+system only; report the total on
        // the user side, consumers only ever use the sum.
        let total = ProcessTime::try_now().map_err(|source| PortError::Io {
            what: "process cpu time",
            source,
        })?;
        let total_ns = i64::try_from(total.as_duration().as_nanos())
            .map_err(|_| PortError::ImplausibleReading {
                what: "process cpu time",
            })?;
        Ok(ProcessCpuTime {
            system_ns: 0,
            user_ns: total_ns,
        })
    }

    fn self_thread_cpu_time_ns(&self) -> Result<i64, PortError> {
        let time = ThreadTime::try_now().map_err(|source| PortError::Io {
            what: "thread cpu time",
            source,
        })?;
        i64::try_from(time.as_duration().as_nanos()).map_err(|_| PortError::ImplausibleReading {
            what: "thread cpu time",
        })
    }

    fn monotonic_time_ns(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn supported_page_sizes(&self) -> Vec<usize> {
        vec![4096]
    }

    fn target_cpu_count(&self) -> u32 {
        self.num_cpus
    }

    fn hypervisor_present(&self) -> bool {
        false
    }

    fn guest_cpu_entitlement_percent(&self) -> Option<f64> {
        None
    }
}

/// Sums the first `cpu` line of `/proc/stat` into nanoseconds.
///
/// `/proc/stat` reports in USER_HZ units, which is 100 on every Linux
/// configuration this code targets.
#[cfg(target_os = "linux")]
fn read_proc_stat_total_ns() -> Result<i64, PortError> {
    const NS_PER_TICK: i64 = 1_000_000_000 / 100;

    let stat = std::fs::read_to_string("/proc/stat").map_err(|source| PortError::Io {
        what: "machine cpu time",
        source,
    })?;
    let line = stat
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or(PortError::ImplausibleReading {
            what: "machine cpu time",
        })?;
    let mut ticks: i64 = 0;
    for field in line.split_ascii_whitespace().skip(1) {
        let value: i64 = field.parse().map_err(|_| PortError::ImplausibleReading {
            what: "machine cpu time",
        })?;
        ticks = ticks.saturating_add(value);
    }
    Ok(ticks.saturating_mul(NS_PER_TICK))
}

#[cfg(not(target_os = "linux"))]
fn read_proc_stat_total_ns() -> Result<i64, PortError> {
    Err(PortError::Unsupported {
        what: "machine cpu time",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_moves_forward() {
        let port = SystemPortLayer::new();
        let a = port.monotonic_time_ns();
        let b = port.monotonic_time_ns();
        assert!(b >= a);
    }

    #[test]
    fn reports_at_least_one_cpu() {
        let port = SystemPortLayer::new();
        assert!(port.target_cpu_count() >= 1);
    }
}
