// SPDX-License-Identifier: Apache-2.0

//! Options for the CPU utilization monitors.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Knobs of the machine and per-thread CPU monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CpuOptions {
    /// Entries in the (timestamp, system CPU, VM CPU) circular buffer.
    /// Zero disables the buffer; small values are raised to the built-in
    /// minimum.
    pub usage_circular_buffer_size: usize,
    /// Minimum time between two per-thread utilization readouts; updates
    /// arriving earlier are refused.
    #[serde(with = "humantime_serde")]
    pub min_measurement_interval: Duration,
}

impl CpuOptions {
    /// The enforced minimum circular-buffer size.
    pub const MIN_CIRCULAR_BUFFER_SIZE: usize = 60;
}

impl Default for CpuOptions {
    fn default() -> Self {
        CpuOptions {
            usage_circular_buffer_size: Self::MIN_CIRCULAR_BUFFER_SIZE,
            min_measurement_interval: Duration::from_millis(100),
        }
    }
}
