// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced by the port layer.

/// All errors the port layer can report.
///
/// Dependent monitors treat any of these as "no information" and
/// self-disable rather than propagating the failure.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The host platform has no implementation for the requested reading.
    #[error("port layer does not support {what} on this platform")]
    Unsupported {
        /// Short name of the missing reading.
        what: &'static str,
    },

    /// The underlying OS call failed.
    #[error("port layer OS call for {what} failed: {source}")]
    Io {
        /// Short name of the reading being taken.
        what: &'static str,
        /// The error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The OS produced a value the port layer refuses to vouch for
    /// (e.g. a negative CPU time).
    #[error("port layer read an implausible value for {what}")]
    ImplausibleReading {
        /// Short name of the reading being taken.
        what: &'static str,
    },
}
