// SPDX-License-Identifier: Apache-2.0

//! Errors for the configuration model.

/// All errors that can occur while loading or validating options.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The YAML document could not be deserialized.
    #[error("failed to parse options: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A field that must be a power of two is not.
    #[error("`{field}` must be a power of two, got {value}")]
    NotAPowerOfTwo {
        /// The offending field, in config notation.
        field: &'static str,
        /// The rejected value.
        value: u64,
    },

    /// A field fell outside its permitted range.
    #[error("`{field}` must be in {range}, got {value}")]
    OutOfRange {
        /// The offending field, in config notation.
        field: &'static str,
        /// Human-readable permitted range.
        range: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// Two fields are individually valid but mutually inconsistent.
    #[error("inconsistent options: {reason}")]
    Inconsistent {
        /// What does not fit together.
        reason: String,
    },
}
