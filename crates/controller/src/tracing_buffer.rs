// SPDX-License-Identifier: Apache-2.0

//! The compilation tracing ring buffer.
//!
//! Debug-only facility recording monitor and lifecycle operations as tiny
//! fixed-size entries. Disabled (zero-sized) in production configurations;
//! when enabled it costs one short lock per recorded operation.

use parking_lot::Mutex;

/// Operations worth recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompilationOperation {
    /// Placeholder for unused slots.
    Empty = 0,
    /// A thread acquired the compilation monitor.
    HasAcquiredCompilationMonitor,
    /// A thread is about to release the compilation monitor.
    WillReleaseCompilationMonitor,
    /// A thread is about to notify the compilation monitor.
    WillNotifyCompilationMonitor,
    /// A thread is about to wait on the compilation monitor.
    WillWaitOnCompilationMonitor,
    /// A thread returned from waiting on the compilation monitor.
    HasFinishedWaitingOnCompilationMonitor,
    /// A worker changed lifecycle state; the extra byte carries the state.
    StateChange,
    /// A compilation request entered the asynchronous path.
    CompileOnSeparateThreadEnter,
    /// Shutdown of the compilation threads began.
    WillStopCompilationThreads,
}

/// One recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingEntry {
    /// Low bits of the recording thread's id.
    pub thread_id: u16,
    /// The operation.
    pub operation: CompilationOperation,
    /// Operation-specific extra byte.
    pub other_data: u8,
}

struct Ring {
    entries: Vec<TracingEntry>,
    index: usize,
}

/// The ring buffer itself.
pub struct CompilationTracingFacility {
    ring: Option<Mutex<Ring>>,
}

impl CompilationTracingFacility {
    /// Creates a facility with `size` slots; zero disables it entirely.
    #[must_use]
    pub fn new(size: usize) -> Self {
        CompilationTracingFacility {
            ring: (size > 0).then(|| {
                Mutex::new(Ring {
                    entries: vec![
                        TracingEntry {
                            thread_id: 0,
                            operation: CompilationOperation::Empty,
                            other_data: 0,
                        };
                        size
                    ],
                    index: 0,
                })
            }),
        }
    }

    /// Whether recording is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.ring.is_some()
    }

    /// Records one operation.
    pub fn record(&self, thread_id: u16, operation: CompilationOperation, other_data: u8) {
        let Some(ring) = &self.ring else {
            return;
        };
        let mut ring = ring.lock();
        let index = ring.index;
        ring.entries[index] = TracingEntry {
            thread_id,
            operation,
            other_data,
        };
        ring.index = (index + 1) % ring.entries.len();
    }

    /// The recorded entries, oldest first, skipping unused slots.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TracingEntry> {
        let Some(ring) = &self.ring else {
            return Vec::new();
        };
        let ring = ring.lock();
        let mut out = Vec::with_capacity(ring.entries.len());
        for i in 0..ring.entries.len() {
            let entry = ring.entries[(ring.index + i) % ring.entries.len()];
            if entry.operation != CompilationOperation::Empty {
                out.push(entry);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_facility_records_nothing() {
        let facility = CompilationTracingFacility::new(0);
        assert!(!facility.is_enabled());
        facility.record(1, CompilationOperation::StateChange, 0);
        assert!(facility.snapshot().is_empty());
    }

    #[test]
    fn ring_wraps_and_keeps_the_newest() {
        let facility = CompilationTracingFacility::new(4);
        for i in 0..6u16 {
            facility.record(i, CompilationOperation::HasAcquiredCompilationMonitor, i as u8);
        }
        let snapshot = facility.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot[0].thread_id, 2, "oldest surviving entry");
        assert_eq!(snapshot[3].thread_id, 5, "newest entry");
    }
}
