// SPDX-License-Identifier: Apache-2.0

//! Profiler statistics.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($(#[$struct_doc:meta])* $name:ident, $snapshot:ident { $($(#[$doc:meta])* $field:ident),+ $(,)? }) => {
        $(#[$struct_doc])*
        #[derive(Debug, Default)]
        pub struct $name {
            $($(#[$doc])* pub $field: AtomicU64,)+
        }

        /// Plain copy of the counters at one point in time.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $snapshot {
            $($(#[$doc])* pub $field: u64,)+
        }

        impl $name {
            /// Copies the counters out.
            #[must_use]
            pub fn snapshot(&self) -> $snapshot {
                $snapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)+
                }
            }
        }
    };
}

counters!(
    /// Counters written across the profiler; all monotonically increasing,
    /// imprecision under concurrency is acceptable.
    ProfilerStats,
    ProfilerStatsSnapshot {
        /// Profile lookups served.
        entries_read,
        /// Lookups that chose the persistent (shared-cache) source.
        entries_chose_persistent,
        /// Persistent reads that produced usable data.
        persistent_read_success,
        /// Persistent reads that found nothing.
        persistent_read_fail,
        /// Persistent reads that found an empty or damaged blob.
        persistent_read_bad_data,
        /// Methods for which persistence was attempted.
        method_persistence_attempts,
        /// Methods whose profile was stored.
        methods_persisted,
        /// Persistence attempts aborted on entry-lock contention.
        persistence_aborted,
        /// Methods not stored: shared cache full.
        not_persisted_scc_full,
        /// Methods not stored: ROM method not resident in the cache.
        not_persisted_not_in_scc,
        /// Methods not stored: a blob already exists.
        not_persisted_already_stored,
        /// Methods not stored: nothing persistable found.
        not_persisted_no_entries,
        /// Methods not stored: everything else.
        not_persisted_other,
        /// Entries serialized into blobs.
        entries_persisted,
        /// Entries skipped: referenced class not in the cache.
        entries_not_persisted_not_in_scc,
        /// Entries skipped: referenced class unloaded.
        entries_not_persisted_unloaded,
        /// Entries skipped: no data or entry invalid.
        entries_not_persisted_no_info,
        /// Entries skipped: other reasons.
        entries_not_persisted_other,
        /// Buffers submitted by application threads.
        buffers_submitted,
        /// Buffers handed to the worker thread.
        buffers_posted_to_worker,
        /// Buffers dropped inside the discard budget.
        buffers_dropped,
        /// Buffers parsed by the submitting thread itself.
        buffers_parsed_in_caller,
        /// Buffers thrown away because the GC invalidated them.
        buffers_invalidated,
        /// Records decoded and applied.
        records_parsed,
        /// Records skipped by throttling or the skip bands.
        records_discarded,
    }
);

impl ProfilerStats {
    /// Bumps one counter by one.
    pub fn bump(&self, counter: &AtomicU64) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds to one counter.
    pub fn add(&self, counter: &AtomicU64, amount: u64) {
        let _ = counter.fetch_add(amount, Ordering::Relaxed);
    }
}
