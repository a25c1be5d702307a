// SPDX-License-Identifier: Apache-2.0

//! Buffer hand-off between application threads and the profiler worker.
//!
//! Full buffers are published to the worker's work list and a fresh buffer
//! is taken from the free list inside the same critical section; buffer
//! contents are immutable between publication and acknowledgment. The GC
//! may invalidate in-flight buffers just before it unloads classes; the
//! worker checks the flag after taking VM access and before parsing.

use crate::records::ProfileRecord;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One profiling buffer.
#[derive(Debug, Default)]
pub struct ProfileBuffer {
    /// The records, immutable while the buffer is in flight.
    pub records: Vec<ProfileRecord>,
    invalidated: AtomicBool,
}

impl ProfileBuffer {
    /// Creates a buffer holding `records`.
    #[must_use]
    pub fn new(records: Vec<ProfileRecord>) -> Self {
        ProfileBuffer {
            records,
            invalidated: AtomicBool::new(false),
        }
    }

    /// Marks the buffer invalid (GC hook).
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    /// Whether the buffer may still be parsed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::Acquire)
    }
}

/// Lifetime states of the profiler worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No worker exists yet.
    NotCreated,
    /// Worker is running and between work items.
    Initialized,
    /// Worker is parked waiting for buffers.
    WaitingForWork,
    /// Worker has been asked to park for a checkpoint.
    Suspending,
    /// Worker is parked for a checkpoint.
    Suspended,
    /// Worker is waking from a checkpoint.
    Resuming,
    /// Worker has been asked to exit.
    Stopping,
    /// Worker exited.
    Destroyed,
    /// Worker thread could not be started.
    FailedToAttach,
}

/// What happened to a submitted buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Posted to the worker; the caller got a fresh buffer back.
    PostedToWorker,
    /// The caller must parse the buffer itself (backlog or contention).
    ParseInCaller,
    /// Dropped within the discard budget.
    Dropped,
}

/// State shared under the profiler monitor.
#[derive(Debug)]
pub struct MonitorState {
    /// Record storage ready for reuse by application threads.
    pub free_records: Vec<Vec<ProfileRecord>>,
    /// Buffers awaiting the worker, oldest first.
    pub work_queue: VecDeque<Arc<ProfileBuffer>>,
    /// The buffer the worker is currently parsing, if any. Kept reachable
    /// so GC invalidation can still hit it.
    pub current: Option<Arc<ProfileBuffer>>,
    /// Worker lifetime state.
    pub state: WorkerState,
    /// Buffers posted but not yet parsed.
    pub outstanding: u32,
}

/// The profiler monitor: free/work lists plus worker lifetime state.
#[derive(Debug)]
pub struct BufferMonitor {
    /// The guarded state.
    pub shared: Mutex<MonitorState>,
    /// Signalled when work arrives or the state changes.
    pub work_available: Condvar,
    /// Signalled on worker state transitions (stop/suspend acks).
    pub state_changed: Condvar,
}

impl BufferMonitor {
    /// Creates the monitor with an empty free list.
    #[must_use]
    pub fn new() -> Self {
        BufferMonitor {
            shared: Mutex::new(MonitorState {
                free_records: Vec::new(),
                work_queue: VecDeque::new(),
                current: None,
                state: WorkerState::NotCreated,
                outstanding: 0,
            }),
            work_available: Condvar::new(),
            state_changed: Condvar::new(),
        }
    }

    /// Current worker state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.shared.lock().state
    }
}

impl Default for BufferMonitor {
    fn default() -> Self {
        BufferMonitor::new()
    }
}
