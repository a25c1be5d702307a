// SPDX-License-Identifier: Apache-2.0

//! Per-thread CPU utilization readout.

use jitc_vm::{PortLayer, RuntimeState};
use std::sync::Arc;
use std::time::Duration;

const MS_PER_NS: i64 = 1_000_000;

/// CPU utilization of one thread over its last two measurement intervals.
///
/// The owning thread calls [`update`](CpuSelfThreadUtilization::update)
/// periodically; an update is refused when less than the minimum
/// measurement interval elapsed since the previous one. Queries combine
/// the last one or two intervals, counting the gap since the last readout
/// as idle when that gap exceeds the measurement interval.
pub struct CpuSelfThreadUtilization {
    port: Arc<dyn PortLayer>,
    state: Arc<RuntimeState>,
    min_measurement_interval_ns: i64,
    id: i32,
    low_resolution_clock_at_last_update_ms: u64,
    clock_time_at_last_update_ns: i64,
    cpu_time_at_last_update_ns: i64,
    cpu_time_during_last_interval_ns: i64,
    last_interval_length_ns: i64,
    last_cpu_util: i32,
    cpu_time_during_second_last_interval_ns: i64,
    second_last_interval_length_ns: i64,
    second_last_cpu_util: i32,
    functional: bool,
}

impl CpuSelfThreadUtilization {
    /// Creates a readout for the calling thread.
    #[must_use]
    pub fn new(
        port: Arc<dyn PortLayer>,
        state: Arc<RuntimeState>,
        min_measurement_interval: Duration,
        id: i32,
    ) -> Self {
        let now_ns = port.monotonic_time_ns();
        CpuSelfThreadUtilization {
            min_measurement_interval_ns: min_measurement_interval.as_nanos() as i64,
            id,
            low_resolution_clock_at_last_update_ms: state.elapsed_ms(),
            clock_time_at_last_update_ns: now_ns,
            cpu_time_at_last_update_ns: 0,
            cpu_time_during_last_interval_ns: -1,
            last_interval_length_ns: 1,
            last_cpu_util: -1,
            cpu_time_during_second_last_interval_ns: -1,
            second_last_interval_length_ns: 1,
            second_last_cpu_util: -1,
            functional: true,
            port,
            state,
        }
    }

    /// Thread id this readout belongs to.
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Whether the readout still trusts its clock sources.
    #[must_use]
    pub fn is_functional(&self) -> bool {
        self.functional
    }

    /// Utilization over the last completed interval, percent; `-1` when
    /// unknown.
    #[must_use]
    pub fn last_cpu_util(&self) -> i32 {
        self.last_cpu_util
    }

    /// Utilization over the interval before last, percent; `-1` when
    /// unknown.
    #[must_use]
    pub fn second_last_cpu_util(&self) -> i32 {
        self.second_last_cpu_util
    }

    /// Length of the last completed interval.
    #[must_use]
    pub fn last_interval_length_ns(&self) -> i64 {
        self.last_interval_length_ns
    }

    fn set_as_unfunctional(&mut self) {
        self.functional = false;
        self.cpu_time_during_last_interval_ns = -1;
        self.cpu_time_during_second_last_interval_ns = -1;
        self.cpu_time_at_last_update_ns = -1;
        self.last_cpu_util = -1;
        self.second_last_cpu_util = -1;
        tracing::warn!(id = self.id, "thread CPU readout disabled");
    }

    /// Takes a new readout. Returns `true` when one was actually taken.
    ///
    /// Refused (returning `false`) when the monitor is unfunctional or when
    /// less than the minimum measurement interval elapsed since the last
    /// accepted update, judged on the cheap low-resolution clock.
    pub fn update(&mut self) -> bool {
        if !self.functional {
            return false;
        }
        let elapsed_low_res_ms =
            self.state.elapsed_ms() - self.low_resolution_clock_at_last_update_ms;
        if (elapsed_low_res_ms as i64) * MS_PER_NS < self.min_measurement_interval_ns {
            return false;
        }
        let Ok(current_cpu_ns) = self.port.self_thread_cpu_time_ns() else {
            self.set_as_unfunctional();
            return false;
        };
        let now_ns = self.port.monotonic_time_ns();
        if now_ns <= 0 {
            self.set_as_unfunctional();
            return false;
        }

        // Shift the previous interval down.
        self.second_last_interval_length_ns = self.last_interval_length_ns;
        self.cpu_time_during_second_last_interval_ns = self.cpu_time_during_last_interval_ns;
        self.second_last_cpu_util = self.last_cpu_util;

        let elapsed_ns = now_ns - self.clock_time_at_last_update_ns;
        let elapsed_cpu_ns = current_cpu_ns - self.cpu_time_at_last_update_ns;
        let cpu_util = if elapsed_ns <= 0 {
            // Time went backwards; make the reading unusable.
            -1
        } else if elapsed_cpu_ns > elapsed_ns {
            // A thread cannot exceed 100%, but bookkeeping imprecision up
            // to 10% is forgiven and clamped.
            if elapsed_cpu_ns > elapsed_ns * 11 / 10 {
                -1
            } else {
                100
            }
        } else {
            (100 * elapsed_cpu_ns / elapsed_ns) as i32
        };

        self.low_resolution_clock_at_last_update_ms = self.state.elapsed_ms();
        self.cpu_time_during_last_interval_ns = elapsed_cpu_ns;
        self.last_interval_length_ns = elapsed_ns;
        self.last_cpu_util = cpu_util;
        self.cpu_time_at_last_update_ns = current_cpu_ns;
        self.clock_time_at_last_update_ns = now_ns;
        true
    }

    /// Thread utilization over the last up-to-two intervals that fit inside
    /// `[now - valid_interval, now]`, percent.
    ///
    /// Returns `-1` when no usable reading exists, and `0` when the last
    /// readout is too old to count (the thread may have slept since).
    #[must_use]
    pub fn thread_cpu_util_over_last(&self, valid_interval: Duration) -> i32 {
        if self.last_cpu_util < 0 {
            return -1;
        }
        let now_ns = (self.state.elapsed_ms() as i64) * MS_PER_NS;
        let last_valid_time_ns = now_ns - valid_interval.as_nanos() as i64;
        let last_interval_end_ns = (self.low_resolution_clock_at_last_update_ms as i64) * MS_PER_NS;
        let last_interval_start_ns = last_interval_end_ns - self.last_interval_length_ns;
        if last_interval_start_ns < last_valid_time_ns {
            // The thread may have accumulated CPU since the last readout;
            // zero is an underestimate but never misleading.
            return 0;
        }
        let mut total_cpu_ns = self.cpu_time_during_last_interval_ns;
        let mut total_time_ns = self.last_interval_length_ns;

        // The stretch between the last readout and now is unaccounted; if it
        // is longer than a measurement period the thread never woke up to
        // update, so count it as idle time.
        if now_ns - last_interval_end_ns > self.min_measurement_interval_ns {
            total_time_ns += now_ns - last_interval_end_ns;
        }

        if self.second_last_cpu_util >= 0
            && last_interval_start_ns - self.second_last_interval_length_ns >= last_valid_time_ns
        {
            total_cpu_ns += self.cpu_time_during_second_last_interval_ns;
            total_time_ns += self.second_last_interval_length_ns;
        }
        (100 * total_cpu_ns / total_time_ns) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitc_vm::testing::MockPortLayer;

    fn readout() -> (Arc<MockPortLayer>, Arc<RuntimeState>, CpuSelfThreadUtilization) {
        let port = Arc::new(MockPortLayer::new());
        let state = Arc::new(RuntimeState::new(4));
        let util = CpuSelfThreadUtilization::new(
            port.clone(),
            state.clone(),
            Duration::from_millis(100),
            1,
        );
        (port, state, util)
    }

    #[test]
    fn refuses_updates_inside_minimum_interval() {
        let (_port, _state, mut util) = readout();
        assert!(!util.update(), "no time has passed");
    }

    #[test]
    fn computes_utilization_over_an_interval() {
        let (port, state, mut util) = readout();
        state.advance_elapsed(200);
        port.set_now_ns(200 * MS_PER_NS);
        port.set_thread_cpu_ns(100 * MS_PER_NS);
        assert!(util.update());
        assert_eq!(util.last_cpu_util(), 50);
        assert!(util.is_functional());
    }

    #[test]
    fn small_overshoot_clamps_to_100() {
        let (port, state, mut util) = readout();
        state.advance_elapsed(200);
        port.set_now_ns(200 * MS_PER_NS);
        port.set_thread_cpu_ns(205 * MS_PER_NS);
        assert!(util.update());
        assert_eq!(util.last_cpu_util(), 100);
    }

    #[test]
    fn large_overshoot_disables_nothing_but_marks_reading_invalid() {
        let (port, state, mut util) = readout();
        state.advance_elapsed(200);
        port.set_now_ns(200 * MS_PER_NS);
        port.set_thread_cpu_ns(300 * MS_PER_NS);
        assert!(util.update());
        assert_eq!(util.last_cpu_util(), -1);
        assert!(util.is_functional());
    }

    #[test]
    fn failed_clock_read_disables_the_monitor() {
        let (port, state, mut util) = readout();
        state.advance_elapsed(200);
        port.fail_thread_cpu();
        assert!(!util.update());
        assert!(!util.is_functional());
    }

    #[test]
    fn util_over_window_never_exceeds_100() {
        let (port, state, mut util) = readout();
        state.advance_elapsed(200);
        port.set_now_ns(200 * MS_PER_NS);
        port.set_thread_cpu_ns(200 * MS_PER_NS);
        assert!(util.update());
        let value = util.thread_cpu_util_over_last(Duration::from_secs(1));
        assert!((0..=100).contains(&value), "got {value}");
    }

    #[test]
    fn stale_readout_counts_as_idle() {
        let (port, state, mut util) = readout();
        state.advance_elapsed(200);
        port.set_now_ns(200 * MS_PER_NS);
        port.set_thread_cpu_ns(200 * MS_PER_NS);
        assert!(util.update());
        // Move far past the readout; the whole window predates it.
        state.advance_elapsed(10_000);
        assert_eq!(util.thread_cpu_util_over_last(Duration::from_secs(1)), 0);
    }
}
