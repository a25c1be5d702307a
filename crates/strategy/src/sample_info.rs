// SPDX-License-Identifier: Apache-2.0

//! Global sampling-density bookkeeping.

use jitc_vm::MethodId;
use parking_lot::Mutex;

/// Sampling density the increase factor treats as nominal, per second.
const NOMINAL_SAMPLES_PER_SECOND: u32 = 100;

/// Cap on the window increase factor.
const MAX_INCREASE_FACTOR: u32 = 16;

#[derive(Debug, Clone, Copy)]
struct SampleWindow {
    max_samples_per_second: u32,
    samples_per_second_last_interval: u32,
    global_counter_last_interval: u64,
    timestamp_last_interval_ms: u64,
    increase_factor: u32,
}

/// Tracks how densely the sampling thread is observing the VM.
///
/// Denser sampling means every window sees proportionally more samples, so
/// the scorching window is stretched by the derived increase factor to
/// keep its statistical meaning.
pub struct JitSampleInfo {
    window: Mutex<SampleWindow>,
}

impl JitSampleInfo {
    /// Creates the tracker.
    #[must_use]
    pub fn new() -> Self {
        JitSampleInfo {
            window: Mutex::new(SampleWindow {
                max_samples_per_second: 0,
                samples_per_second_last_interval: 0,
                global_counter_last_interval: 0,
                timestamp_last_interval_ms: 0,
                increase_factor: 1,
            }),
        }
    }

    /// Feeds one interval's worth of density data (sampling thread).
    pub fn update(&self, now_ms: u64, global_sample_counter: u64) {
        let mut window = self.window.lock();
        let interval_ms = now_ms.saturating_sub(window.timestamp_last_interval_ms);
        if interval_ms == 0 {
            return;
        }
        let samples = global_sample_counter.saturating_sub(window.global_counter_last_interval);
        let per_second = (samples * 1000 / u64::from(interval_ms.max(1))) as u32;
        window.samples_per_second_last_interval = per_second;
        window.max_samples_per_second = window.max_samples_per_second.max(per_second);
        window.global_counter_last_interval = global_sample_counter;
        window.timestamp_last_interval_ms = now_ms;
        window.increase_factor =
            (per_second / NOMINAL_SAMPLES_PER_SECOND).clamp(1, MAX_INCREASE_FACTOR);
    }

    /// Density-driven multiplier applied to the scorching window length.
    #[must_use]
    pub fn increase_factor(&self) -> u32 {
        self.window.lock().increase_factor
    }

    /// Samples per second over the last interval.
    #[must_use]
    pub fn samples_per_second(&self) -> u32 {
        self.window.lock().samples_per_second_last_interval
    }

    /// Highest density seen so far.
    #[must_use]
    pub fn max_samples_per_second(&self) -> u32 {
        self.window.lock().max_samples_per_second
    }
}

impl Default for JitSampleInfo {
    fn default() -> Self {
        JitSampleInfo::new()
    }
}

/// Methods whose invocation count was lowered by interpreter sampling.
///
/// When such a method finally compiles, the compiler can look up how much
/// counting it skipped and set up sampling-JProfiling accordingly. Callers
/// hold the compilation monitor around both operations.
pub struct InterpreterSamplingTracking {
    entries: Mutex<Vec<(MethodId, i32)>>,
    max_elements: Mutex<usize>,
}

impl InterpreterSamplingTracking {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        InterpreterSamplingTracking {
            entries: Mutex::new(Vec::new()),
            max_elements: Mutex::new(0),
        }
    }

    /// Adds to the skipped count recorded for `method`.
    pub fn add_or_update(&self, method: MethodId, skipped: i32) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|(m, _)| *m == method) {
            entry.1 += skipped;
        } else {
            entries.push((method, skipped));
            let mut max = self.max_elements.lock();
            *max = (*max).max(entries.len());
        }
    }

    /// Removes and returns the skipped count for `method`.
    #[must_use]
    pub fn find_and_delete(&self, method: MethodId) -> Option<i32> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|(m, _)| *m == method)?;
        Some(entries.swap_remove(index).1)
    }

    /// High-water mark of tracked methods.
    #[must_use]
    pub fn max_elements(&self) -> usize {
        *self.max_elements.lock()
    }
}

impl Default for InterpreterSamplingTracking {
    fn default() -> Self {
        InterpreterSamplingTracking::new()
    }
}
