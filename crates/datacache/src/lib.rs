// SPDX-License-Identifier: Apache-2.0

//! The data-cache manager: scratch memory for compiler metadata.
//!
//! Compiled bodies leave metadata behind (exception tables, GC maps,
//! relocation records); the data cache is the quantized, pooled, reclaimable
//! allocator backing it. Two APIs coexist:
//!
//! - the **legacy bump path**: a thread reserves a whole cache, bump-
//!   allocates into it, and releases it;
//! - the **pooling path**: per-record allocate/free with a size-bucket pool
//!   of reclaimed records.
//!
//! The pool holds (segment, offset) indices rather than addresses, so the
//! layout stays valid if segments are relocated by the disclaim/reload
//! paths. Freed neighbours are deliberately not coalesced: the pool's whole
//! point is to re-issue records of the sizes the compiler actually asks for.

pub mod error;
pub mod manager;
pub mod segment;

pub use error::Error;
pub use manager::{DataCacheManager, DataCacheStats, Record, RecordType, ReservedCache};
