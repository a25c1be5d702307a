// SPDX-License-Identifier: Apache-2.0

//! Options for the interpreter profiler.

use serde::{Deserialize, Serialize};

/// Sizing and throttling knobs of the interpreter profiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct IProfilerOptions {
    /// Buckets in the bytecode-PC hashtable. Must be a power of two.
    pub bc_hash_table_size: usize,
    /// Buckets in the fan-in method hashtable. Must be a power of two.
    pub method_hash_table_size: usize,
    /// Records per profiling buffer.
    pub buffer_size: usize,
    /// Outstanding (posted, unparsed) buffers before application threads
    /// must parse their own.
    pub num_outstanding_buffers: u32,
    /// Percentage of buffer-post requests that may be discarded outright
    /// before the fallback switches to in-thread parsing.
    pub buffer_max_percentage_to_discard: u32,
    /// Epochs kept in the read-sample failure history ring. Must be a
    /// power of two.
    pub fail_history_size: usize,
    /// Unloaded-class count at which interpreter profiling stops for good.
    pub disable_class_unload_threshold: u32,
    /// Slots in the direct-mapped call-count tracking table. Must be a
    /// power of two.
    pub tracking_table_size: usize,
    /// Profiled-call count at which a tracked interpreted method is queued
    /// on the low-priority queue.
    pub tracking_compilation_threshold: u32,
    /// Callers remembered per callee before weight spills into the "other"
    /// bucket.
    pub max_callers_per_callee: usize,
    /// Disables writing profile blobs to the shared cache.
    pub disable_persist_profile: bool,
    /// Disables reading profile blobs from the shared cache.
    pub do_not_use_persistent_profile: bool,
    /// Prefer hashtable data over shared-cache data on reads.
    pub prefer_hash_table_data: bool,
    /// Opt into newer profiler behavior: application threads parsing
    /// their own buffers may also schedule tracked promotions, not just
    /// the worker thread.
    pub enable_iprofiler_changes: bool,
    /// Do not start the profiler worker thread; application threads parse
    /// every buffer themselves.
    pub disable_worker_thread: bool,
}

impl Default for IProfilerOptions {
    fn default() -> Self {
        IProfilerOptions {
            bc_hash_table_size: 1 << 14,
            method_hash_table_size: 1 << 10,
            buffer_size: 1024,
            num_outstanding_buffers: 10,
            buffer_max_percentage_to_discard: 10,
            fail_history_size: 8,
            disable_class_unload_threshold: 20_000,
            tracking_table_size: 1 << 13,
            tracking_compilation_threshold: 250,
            max_callers_per_callee: 20,
            disable_persist_profile: false,
            do_not_use_persistent_profile: false,
            prefer_hash_table_data: false,
            enable_iprofiler_changes: false,
            disable_worker_thread: false,
        }
    }
}
