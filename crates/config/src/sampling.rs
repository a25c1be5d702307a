// SPDX-License-Identifier: Apache-2.0

//! Options steering the sampling-based recompilation strategy.

use serde::{Deserialize, Serialize};

/// Thresholds and factors for the default (sampling) strategy.
///
/// The sample counts all refer to observations by the periodic sampling
/// thread; the hot window is `sample_interval` samples of one body, the
/// scorching window is that times the density-driven increase factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct SamplingOptions {
    /// Global samples inside a hot window below which a body looks hot.
    pub sample_threshold: u32,
    /// Global samples inside a scorching window below which a body looks
    /// scorching.
    pub scorching_sample_threshold: u32,
    /// Length of the hot window, in samples of one body.
    pub sample_interval: u32,
    /// Base length of the scorching window, in samples of one body; the
    /// density-driven increase factor stretches it further.
    pub scorching_sample_interval: u32,
    /// Body-sample count at which a postponed decision is re-armed.
    pub reset_count_threshold: u32,
    /// Global samples per window above which a hot promotion refuses to
    /// switch to a profiling body.
    pub sample_dont_switch_to_profiling_threshold: u32,
    /// Samples a downgraded or AOT-loaded cold body must accumulate before
    /// the upgrade path triggers.
    pub cold_upgrade_sample_threshold: u32,
    /// Subtracted from the invocation count per interpreted sample when the
    /// interpreter profiler is off.
    pub iprofiler_off_subtraction_factor: i64,
    /// Divisor applied to the invocation count per interpreted sample when
    /// the interpreter profiler is off.
    pub iprofiler_off_division_factor: i64,
    /// Subtracted from the invocation count per interpreted sample for
    /// loopy methods.
    pub loopy_method_subtraction_factor: i64,
    /// Divisor applied to the invocation count per interpreted sample for
    /// loopy methods.
    pub loopy_method_division_factor: i64,
    /// Invocation counts never drop below this due to sampling; `-1` means
    /// derive it from the number of active threads.
    pub active_threads_threshold: i64,
    /// Loaded-class count past which the application counts as big.
    pub big_app_threshold: u32,
    /// Divisor dampening sample thresholds for big applications during
    /// startup with a shared cache.
    pub big_app_sample_threshold_adjust: u32,
    /// Milliseconds after VM start before interpreted samples may trigger
    /// compilations.
    pub warmup_delay_ms: u64,
    /// Quickstart mode: favour cheap first compilations (AOT upgrades go
    /// to cold instead of warm).
    pub quickstart: bool,
    /// Disables profiling-instrumented (very-hot) bodies.
    pub disable_profiling: bool,
    /// Disables invocation-count reduction on interpreted samples.
    pub disable_interpreter_sampling: bool,
    /// Disables the cold/AOT upgrade path.
    pub disable_upgrades: bool,
    /// Disables the softer second promotion criteria.
    pub disable_aggressive_recompilations: bool,
    /// Halves the effective sample thresholds.
    pub conservative_compilation: bool,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        SamplingOptions {
            sample_threshold: 300,
            scorching_sample_threshold: 120,
            sample_interval: 30,
            scorching_sample_interval: 300,
            reset_count_threshold: 3,
            sample_dont_switch_to_profiling_threshold: 3000,
            cold_upgrade_sample_threshold: 30,
            iprofiler_off_subtraction_factor: 1,
            iprofiler_off_division_factor: 16,
            loopy_method_subtraction_factor: 1,
            loopy_method_division_factor: 16,
            active_threads_threshold: -1,
            big_app_threshold: 20_000,
            big_app_sample_threshold_adjust: 2,
            warmup_delay_ms: 0,
            quickstart: false,
            disable_profiling: false,
            disable_interpreter_sampling: false,
            disable_upgrades: false,
            disable_aggressive_recompilations: false,
            conservative_compilation: false,
        }
    }
}
