// SPDX-License-Identifier: Apache-2.0

//! Configuration model for the recompilation controller.
//!
//! Every knob the controller core consults is declared here as a typed,
//! serde-deserializable option with a production default. Options are
//! loaded once at VM start ([`Options::from_yaml`]), validated
//! ([`Options::validate`]), and then shared immutably; nothing in the core
//! re-reads configuration at runtime.

pub mod byte_units;
pub mod controller;
pub mod cpu;
pub mod datacache;
pub mod error;
pub mod iprofiler;
pub mod sampling;

pub use controller::ControllerOptions;
pub use cpu::CpuOptions;
pub use datacache::DataCacheOptions;
pub use error::Error;
pub use iprofiler::IProfilerOptions;
pub use sampling::SamplingOptions;

use serde::{Deserialize, Serialize};

/// Which compilation strategy converts events into plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// The sampling-window strategy.
    #[default]
    Default,
    /// Deterministic per-method sample counting.
    Threshold,
    /// No recompilation at all; first compilations only.
    None,
}

/// The complete option set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Options {
    /// Strategy selection, fixed at init.
    pub strategy: StrategyKind,
    /// Sampling-strategy thresholds and factors.
    pub sampling: SamplingOptions,
    /// Interpreter profiler sizing and throttling.
    pub iprofiler: IProfilerOptions,
    /// Data-cache sizing and reclamation.
    pub datacache: DataCacheOptions,
    /// CPU monitor knobs.
    pub cpu: CpuOptions,
    /// Controller queueing and thread management.
    pub controller: ControllerOptions,
}

impl Options {
    /// Parses options from a YAML document and validates them.
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        let options: Options = serde_yaml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Checks cross-field and representability constraints.
    pub fn validate(&self) -> Result<(), Error> {
        require_power_of_two(
            "iprofiler.bc-hash-table-size",
            self.iprofiler.bc_hash_table_size as u64,
        )?;
        require_power_of_two(
            "iprofiler.method-hash-table-size",
            self.iprofiler.method_hash_table_size as u64,
        )?;
        require_power_of_two(
            "iprofiler.fail-history-size",
            self.iprofiler.fail_history_size as u64,
        )?;
        require_power_of_two(
            "iprofiler.tracking-table-size",
            self.iprofiler.tracking_table_size as u64,
        )?;
        require_power_of_two("datacache.quantum-size", u64::from(self.datacache.quantum_size))?;

        if self.iprofiler.buffer_size == 0 {
            return Err(Error::OutOfRange {
                field: "iprofiler.buffer-size",
                range: "1..",
                value: 0,
            });
        }
        if self.iprofiler.buffer_max_percentage_to_discard > 100 {
            return Err(Error::OutOfRange {
                field: "iprofiler.buffer-max-percentage-to-discard",
                range: "0..=100",
                value: i64::from(self.iprofiler.buffer_max_percentage_to_discard),
            });
        }
        if self.datacache.min_quanta < 2 {
            // A freed chunk must be able to hold its free-record header.
            return Err(Error::OutOfRange {
                field: "datacache.min-quanta",
                range: "2..",
                value: i64::from(self.datacache.min_quanta),
            });
        }
        if self.sampling.sample_interval == 0 {
            return Err(Error::OutOfRange {
                field: "sampling.sample-interval",
                range: "1..",
                value: 0,
            });
        }
        if self.sampling.iprofiler_off_division_factor <= 0
            || self.sampling.loopy_method_division_factor <= 0
        {
            return Err(Error::Inconsistent {
                reason: "sampling division factors must be positive".to_owned(),
            });
        }
        let min_chunk = u64::from(self.datacache.quantum_size) * u64::from(self.datacache.min_quanta);
        if self.datacache.segment_size < min_chunk {
            return Err(Error::Inconsistent {
                reason: format!(
                    "datacache.segment-size {} is smaller than one minimum chunk ({min_chunk})",
                    self.datacache.segment_size
                ),
            });
        }
        Ok(())
    }
}

fn require_power_of_two(field: &'static str, value: u64) -> Result<(), Error> {
    if value == 0 || !value.is_power_of_two() {
        return Err(Error::NotAPowerOfTwo { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Options::default().validate().expect("defaults must pass");
    }

    #[test]
    fn parses_partial_yaml() {
        let options = Options::from_yaml(
            "strategy: threshold\nsampling:\n  sample-interval: 60\ndatacache:\n  segment-size: 1 MiB\n",
        )
        .expect("should parse");
        assert_eq!(options.strategy, StrategyKind::Threshold);
        assert_eq!(options.sampling.sample_interval, 60);
        assert_eq!(options.datacache.segment_size, 1024 * 1024);
        // Unmentioned fields keep their defaults.
        assert_eq!(
            options.sampling.sample_threshold,
            SamplingOptions::default().sample_threshold
        );
    }

    #[test]
    fn rejects_non_power_of_two_table() {
        let err = Options::from_yaml("iprofiler:\n  bc-hash-table-size: 1000\n")
            .expect_err("1000 is not a power of two");
        assert!(matches!(err, Error::NotAPowerOfTwo { .. }));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(Options::from_yaml("samplings: {}\n").is_err());
    }

    #[test]
    fn rejects_degenerate_min_quanta() {
        let err = Options::from_yaml("datacache:\n  min-quanta: 1\n")
            .expect_err("min chunk must hold a free header");
        assert!(matches!(err, Error::OutOfRange { .. }));
    }
}
