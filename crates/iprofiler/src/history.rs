// SPDX-License-Identifier: Apache-2.0

//! Rolling history of profile-read success.
//!
//! Compilation threads count every profile lookup and every miss; the
//! sampling thread snapshots the totals once per epoch into a small ring.
//! The failure rate over the ring's span tells the strategy whether the
//! profile store is still answering usefully.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Below this many reads per ring span the rate is reported as zero; tiny
/// windows produce nothing but false alarms.
const SAMPLE_CUTOFF: u32 = 120;

#[derive(Debug, Clone, Copy, Default)]
struct Snapshot {
    total: u32,
    failed: u32,
}

struct Ring {
    snapshots: Vec<Snapshot>,
    index: usize,
}

/// The failure-rate history.
pub struct ReadSampleRequestsHistory {
    total: AtomicU32,
    failed: AtomicU32,
    ring: Mutex<Ring>,
}

impl ReadSampleRequestsHistory {
    /// Creates a history spanning `size` epochs (a power of two, enforced
    /// by config validation).
    #[must_use]
    pub fn new(size: usize) -> Self {
        ReadSampleRequestsHistory {
            total: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            ring: Mutex::new(Ring {
                snapshots: vec![Snapshot::default(); size.max(2)],
                index: 0,
            }),
        }
    }

    /// Counts one profile read request.
    pub fn count_read(&self) {
        let _ = self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one failed profile read request.
    pub fn count_failed_read(&self) {
        let _ = self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Total reads so far.
    #[must_use]
    pub fn total_reads(&self) -> u32 {
        self.total.load(Ordering::Relaxed)
    }

    /// Rolls the ring forward one epoch. Sampling thread only.
    pub fn advance_epoch(&self) {
        let mut ring = self.ring.lock();
        let next = (ring.index + 1) % ring.snapshots.len();
        ring.snapshots[next] = Snapshot {
            total: self.total.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        };
        ring.index = next;
    }

    /// Failure percentage over the ring's span; zero when too few reads
    /// happened to judge.
    #[must_use]
    pub fn failure_rate_percent(&self) -> u32 {
        let ring = self.ring.lock();
        let oldest = ring.snapshots[(ring.index + 1) % ring.snapshots.len()];
        let current = ring.snapshots[ring.index];
        let reads = current.total.wrapping_sub(oldest.total);
        if reads > SAMPLE_CUTOFF {
            let failed = current.failed.wrapping_sub(oldest.failed);
            failed * 100 / reads
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_windows_report_zero() {
        let history = ReadSampleRequestsHistory::new(4);
        for _ in 0..10 {
            history.count_read();
            history.count_failed_read();
        }
        history.advance_epoch();
        assert_eq!(history.failure_rate_percent(), 0);
    }

    #[test]
    fn failure_rate_tracks_the_ring_span() {
        let history = ReadSampleRequestsHistory::new(2);
        for _ in 0..200 {
            history.count_read();
        }
        for _ in 0..100 {
            history.count_read();
            history.count_failed_read();
        }
        history.advance_epoch();
        // 300 reads, 100 failures since the (zero) oldest snapshot.
        assert_eq!(history.failure_rate_percent(), 33);
    }
}
