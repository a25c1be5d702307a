// SPDX-License-Identifier: Apache-2.0

//! Errors for the data-cache manager.

/// All errors that can occur in the data-cache manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configured total segment-memory cap has been reached. Latched:
    /// later allocations fail fast without retrying the OS.
    #[error("data cache is full (cap {cap_bytes} bytes)")]
    DataCacheFull {
        /// The configured cap, in bytes.
        cap_bytes: u64,
    },

    /// The OS refused to provide a new segment.
    #[error("failed to allocate a data-cache segment of {size} bytes: {source}")]
    SegmentAllocation {
        /// Requested segment size.
        size: usize,
        /// The error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The requested size cannot be represented after quantum rounding.
    #[error("allocation of {requested} bytes overflows the record size field")]
    OversizedAllocation {
        /// The payload size the caller asked for.
        requested: u64,
    },

    /// A record or cache handle does not refer to live manager state.
    #[error("stale or foreign data-cache handle")]
    InvalidHandle,

    /// No active cache has enough room and a new one cannot be created.
    #[error("no data cache with {requested} contiguous bytes available")]
    NoSpace {
        /// The size the caller asked for.
        requested: u32,
    },
}
