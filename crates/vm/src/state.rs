// SPDX-License-Identifier: Apache-2.0

//! Process-wide runtime state the controller heuristics read.
//!
//! The VM updates these fields from its hooks (class load/unload, phase
//! transitions, the sampling tick); the strategy, profiler and controller
//! read them without locks. Everything here is advisory — readers tolerate
//! slightly stale values.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Shared mutable runtime facts.
#[derive(Debug)]
pub struct RuntimeState {
    /// Milliseconds since VM start, advanced by the sampling thread.
    elapsed_ms: AtomicU64,
    /// Whether the VM is still in its startup phase.
    startup_phase: AtomicBool,
    /// Whether the VM is currently in a class-loading phase.
    class_loading_phase: AtomicBool,
    /// Number of classes loaded so far.
    loaded_classes: AtomicU32,
    /// Number of classes unloaded so far.
    unloaded_classes: AtomicU32,
    /// Global count of method samples taken by the sampling thread.
    global_sample_count: AtomicU64,
    /// Number of application threads currently runnable.
    active_threads: AtomicU32,
    /// Number of CPUs the process may use.
    target_cpus: AtomicU32,
    /// Latched when the code cache is close to exhaustion.
    code_cache_near_full: AtomicBool,
    /// Latched when the code or data cache is completely full.
    code_or_data_cache_full: AtomicBool,
}

impl RuntimeState {
    /// Creates the state block for a machine with `target_cpus` CPUs.
    #[must_use]
    pub fn new(target_cpus: u32) -> Self {
        RuntimeState {
            elapsed_ms: AtomicU64::new(0),
            startup_phase: AtomicBool::new(true),
            class_loading_phase: AtomicBool::new(true),
            loaded_classes: AtomicU32::new(0),
            unloaded_classes: AtomicU32::new(0),
            global_sample_count: AtomicU64::new(0),
            active_threads: AtomicU32::new(1),
            target_cpus: AtomicU32::new(target_cpus.max(1)),
            code_cache_near_full: AtomicBool::new(false),
            code_or_data_cache_full: AtomicBool::new(false),
        }
    }

    /// Milliseconds since VM start.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms.load(Ordering::Relaxed)
    }

    /// Advances the elapsed clock (sampling thread).
    pub fn advance_elapsed(&self, delta_ms: u64) {
        let _ = self.elapsed_ms.fetch_add(delta_ms, Ordering::Relaxed);
    }

    /// Whether the VM is still starting up.
    #[must_use]
    pub fn is_startup_phase(&self) -> bool {
        self.startup_phase.load(Ordering::Relaxed)
    }

    /// Marks the end (or restart) of the startup phase.
    pub fn set_startup_phase(&self, on: bool) {
        self.startup_phase.store(on, Ordering::Relaxed);
    }

    /// Whether classes are currently being loaded in bulk.
    #[must_use]
    pub fn is_class_loading_phase(&self) -> bool {
        self.class_loading_phase.load(Ordering::Relaxed)
    }

    /// Sets the class-loading-phase flag.
    pub fn set_class_loading_phase(&self, on: bool) {
        self.class_loading_phase.store(on, Ordering::Relaxed);
    }

    /// Number of classes loaded so far.
    #[must_use]
    pub fn loaded_classes(&self) -> u32 {
        self.loaded_classes.load(Ordering::Relaxed)
    }

    /// Records class loads.
    pub fn add_loaded_classes(&self, count: u32) {
        let _ = self.loaded_classes.fetch_add(count, Ordering::Relaxed);
    }

    /// Number of classes unloaded so far.
    #[must_use]
    pub fn unloaded_classes(&self) -> u32 {
        self.unloaded_classes.load(Ordering::Relaxed)
    }

    /// Records class unloads.
    pub fn add_unloaded_classes(&self, count: u32) {
        let _ = self.unloaded_classes.fetch_add(count, Ordering::Relaxed);
    }

    /// Global sample count since VM start.
    #[must_use]
    pub fn global_sample_count(&self) -> u64 {
        self.global_sample_count.load(Ordering::Relaxed)
    }

    /// Counts one sampling-thread observation.
    pub fn count_global_sample(&self) -> u64 {
        self.global_sample_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of runnable application threads.
    #[must_use]
    pub fn active_threads(&self) -> u32 {
        self.active_threads.load(Ordering::Relaxed)
    }

    /// Updates the runnable-thread count.
    pub fn set_active_threads(&self, count: u32) {
        self.active_threads.store(count, Ordering::Relaxed);
    }

    /// Number of CPUs the process may use.
    #[must_use]
    pub fn target_cpus(&self) -> u32 {
        self.target_cpus.load(Ordering::Relaxed).max(1)
    }

    /// Runnable threads per CPU; at least 1 when threads outnumber CPUs.
    #[must_use]
    pub fn load_factor(&self) -> u32 {
        self.active_threads() / self.target_cpus()
    }

    /// Whether the code cache is close to exhaustion.
    #[must_use]
    pub fn is_code_cache_near_full(&self) -> bool {
        self.code_cache_near_full.load(Ordering::Relaxed)
    }

    /// Latches (or clears) the code-cache-near-full condition.
    pub fn set_code_cache_near_full(&self, on: bool) {
        self.code_cache_near_full.store(on, Ordering::Relaxed);
    }

    /// Whether the code or data cache is full.
    #[must_use]
    pub fn is_code_or_data_cache_full(&self) -> bool {
        self.code_or_data_cache_full.load(Ordering::Relaxed)
    }

    /// Latches the cache-full condition.
    pub fn set_code_or_data_cache_full(&self, on: bool) {
        self.code_or_data_cache_full.store(on, Ordering::Relaxed);
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        RuntimeState::new(1)
    }
}
