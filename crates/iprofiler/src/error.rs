// SPDX-License-Identifier: Apache-2.0

//! Errors for the interpreter profiler.

/// All errors that can occur in the profiler infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The worker thread could not be spawned.
    #[error("failed to start the profiler worker thread: {source}")]
    WorkerSpawn {
        /// The error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A lifecycle operation does not apply to the worker's current state.
    #[error("profiler worker is in state {state:?}, cannot {operation}")]
    InvalidWorkerState {
        /// The state the worker was found in.
        state: crate::buffer::WorkerState,
        /// The rejected operation.
        operation: &'static str,
    },

    /// A buffer record does not match the bytecode at its PC.
    #[error("profile record at pc {pc:#x} does not match the bytecode there")]
    CorruptRecord {
        /// PC of the offending record.
        pc: u64,
    },
}
