// SPDX-License-Identifier: Apache-2.0

//! Method-tracking tables: scheduled promotion and DLT observation.

use jitc_vm::MethodId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Counters of the promotion tracking table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingStats {
    /// Compilations scheduled from profiled call counts.
    pub compilations_scheduled: u32,
    /// Samples lost to slot conflicts between distinct methods.
    pub conflicts: u32,
}

struct TrackingSlot {
    /// Raw method id; zero means unclaimed.
    method: AtomicU64,
    count: AtomicU32,
    queued_for_compilation: AtomicBool,
}

/// Direct-mapped table counting profiled calls of interpreted methods.
///
/// When a tracked method's count crosses the threshold while the method is
/// still interpreted, a first-time compilation is scheduled on the
/// low-priority queue; the `queued_for_compilation` flag keeps duplicates
/// out. Slot conflicts are tolerated: the incumbent stays, the newcomer's
/// sample is dropped and counted.
pub struct CallCountTracking {
    spine: Box<[TrackingSlot]>,
    mask: u64,
    threshold: u32,
    scheduled: AtomicU32,
    conflicts: AtomicU32,
}

impl CallCountTracking {
    /// Creates a table with `size` slots (a power of two) and the given
    /// promotion threshold.
    #[must_use]
    pub fn new(size: usize, threshold: u32) -> Self {
        let spine: Vec<TrackingSlot> = (0..size)
            .map(|_| TrackingSlot {
                method: AtomicU64::new(0),
                count: AtomicU32::new(0),
                queued_for_compilation: AtomicBool::new(false),
            })
            .collect();
        CallCountTracking {
            spine: spine.into_boxed_slice(),
            mask: (size as u64) - 1,
            threshold,
            scheduled: AtomicU32::new(0),
            conflicts: AtomicU32::new(0),
        }
    }

    fn slot(&self, method: MethodId) -> &TrackingSlot {
        &self.spine[((method.0 >> 3) & self.mask) as usize]
    }

    /// Counts one profiled call of `method`; `schedule` is invoked when the
    /// threshold is crossed and must return whether the compilation was
    /// actually queued.
    pub fn observe_call(&self, method: MethodId, schedule: impl FnOnce(MethodId) -> bool) {
        let slot = self.slot(method);
        let occupant = slot.method.load(Ordering::Acquire);
        if occupant == 0 {
            if slot
                .method
                .compare_exchange(0, method.0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.count.store(1, Ordering::Release);
                slot.queued_for_compilation.store(false, Ordering::Release);
                return;
            }
            // Lost the claim race; the winner may have recorded the same
            // method from another thread.
            if slot.method.load(Ordering::Acquire) != method.0 {
                let _ = self.conflicts.fetch_add(1, Ordering::Relaxed);
                return;
            }
        } else if occupant != method.0 {
            let _ = self.conflicts.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let count = slot.count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.threshold
            && !slot.queued_for_compilation.swap(true, Ordering::AcqRel)
        {
            if schedule(method) {
                let _ = self.scheduled.fetch_add(1, Ordering::Relaxed);
            } else {
                // Queueing failed; allow a later retry.
                slot.queued_for_compilation.store(false, Ordering::Release);
            }
        }
    }

    /// Releases the slot when the compilation request completes.
    pub fn stop_tracking(&self, method: MethodId) {
        let slot = self.slot(method);
        if slot.method.load(Ordering::Acquire) == method.0 {
            slot.method.store(0, Ordering::Release);
            slot.count.store(0, Ordering::Release);
            slot.queued_for_compilation.store(false, Ordering::Release);
        }
    }

    /// Scrubs entries for unloaded or redefined methods.
    pub fn purge(&self, is_stale: impl Fn(MethodId) -> bool) {
        for slot in &self.spine {
            let raw = slot.method.load(Ordering::Acquire);
            if raw != 0 && is_stale(MethodId(raw)) {
                slot.method.store(0, Ordering::Release);
                slot.count.store(0, Ordering::Release);
                slot.queued_for_compilation.store(false, Ordering::Release);
            }
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> TrackingStats {
        TrackingStats {
            compilations_scheduled: self.scheduled.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DltEntry {
    invocation_count: i64,
    timestamp_ms: u64,
    seq_id: u32,
}

/// Observation table for dynamic-loop-transfer decisions.
///
/// Records the invocation count last seen for a method. A method whose
/// count has not moved between two observations with DLT hits is stuck
/// mid-invocation in a long-running loop, which is exactly when on-stack
/// replacement pays off.
pub struct DltTracking {
    entries: Mutex<hashbrown::HashMap<MethodId, DltEntry, ahash::RandomState>>,
}

impl Default for DltTracking {
    fn default() -> Self {
        DltTracking {
            entries: Mutex::new(hashbrown::HashMap::default()),
        }
    }
}

impl DltTracking {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        DltTracking::default()
    }

    /// Decides whether a DLT compilation should be issued for `method`,
    /// given its current invocation count and DLT-buffer hits.
    pub fn should_issue_dlt_compilation(
        &self,
        method: MethodId,
        num_hits_in_buffer: u32,
        invocation_count: i64,
        now_ms: u64,
    ) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&method) {
            None => {
                let _ = entries.insert(
                    method,
                    DltEntry {
                        invocation_count,
                        timestamp_ms: now_ms,
                        seq_id: 0,
                    },
                );
                false
            }
            Some(entry) => {
                if entry.invocation_count == invocation_count {
                    // Same invocation, repeated hits: a loop is spinning.
                    num_hits_in_buffer > 1
                } else {
                    entry.invocation_count = invocation_count;
                    entry.timestamp_ms = now_ms;
                    entry.seq_id = entry.seq_id.wrapping_add(1);
                    false
                }
            }
        }
    }

    /// Applies an out-of-band invocation-count delta (interpreter sampling
    /// edits the counter behind the tracker's back).
    pub fn adjust_stored_counter(&self, method: MethodId, delta: i64) {
        if let Some(entry) = self.entries.lock().get_mut(&method) {
            entry.invocation_count += delta;
        }
    }

    /// Drops stale methods on class unloading.
    pub fn purge(&self, is_stale: impl Fn(MethodId) -> bool) {
        self.entries.lock().retain(|&method, _| !is_stale(method));
    }
}
