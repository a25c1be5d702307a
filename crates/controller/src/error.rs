// SPDX-License-Identifier: Apache-2.0

//! Errors for the compilation controller.

/// All errors that can occur in the controller infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A compilation worker thread could not be spawned.
    #[error("failed to start compilation thread {index}: {source}")]
    WorkerSpawn {
        /// Index of the worker that failed to start.
        index: usize,
        /// The error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The controller is shutting down and accepts no more work.
    #[error("compilation threads are stopping")]
    ShuttingDown,

    /// The method is already queued or being compiled.
    #[error("method is already queued for compilation")]
    AlreadyQueued,
}
