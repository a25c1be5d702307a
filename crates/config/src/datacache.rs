// SPDX-License-Identifier: Apache-2.0

//! Options for the data-cache manager.

use serde::{Deserialize, Serialize};

/// Sizing and reclamation knobs of the data cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct DataCacheOptions {
    /// Allocation granule in bytes. Must be a power of two.
    pub quantum_size: u32,
    /// Minimum allocation, in quanta. The minimum chunk must hold a free
    /// record header.
    pub min_quanta: u32,
    /// Size of one data-cache segment, in bytes.
    #[serde(deserialize_with = "crate::byte_units::deserialize")]
    pub segment_size: u64,
    /// Cap on total segment memory, in bytes. Zero means unlimited.
    #[serde(deserialize_with = "crate::byte_units::deserialize")]
    pub total_cap: u64,
    /// Pick the largest free chunk instead of the best fit.
    pub worst_fit: bool,
    /// Disables returning freed records to the pool.
    pub disable_reclamation: bool,
    /// Disables disclaiming segment memory to the OS.
    pub disable_disclaiming: bool,
    /// Allows disclaiming anonymous segment memory to swap.
    pub disclaim_on_swap: bool,
    /// Fill freed records with a recognizable pattern.
    pub paint_on_free: bool,
}

impl Default for DataCacheOptions {
    fn default() -> Self {
        DataCacheOptions {
            quantum_size: 64,
            min_quanta: 2,
            segment_size: 2 * 1024 * 1024,
            total_cap: 384 * 1024 * 1024,
            worst_fit: false,
            disable_reclamation: false,
            disable_disclaiming: false,
            disclaim_on_swap: false,
            paint_on_free: false,
        }
    }
}
