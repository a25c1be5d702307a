// SPDX-License-Identifier: Apache-2.0

//! CPU utilization monitors.
//!
//! Three cooperating pieces feed the controller's throttling and
//! entitlement decisions:
//!
//! - [`CpuUtilization`] reads whole-machine and process CPU totals through
//!   the port layer and derives interval percentages plus a circular buffer
//!   of raw samples for external analysis.
//! - [`CpuSelfThreadUtilization`] is a per-thread readout with a
//!   two-interval history, used by compilation threads to report their own
//!   duty cycle.
//! - [`CpuEntitlement`] caches how much CPU the process is actually
//!   entitled to, accounting for hypervisor guests.
//!
//! Every monitor self-disables on the first port-layer failure and then
//! yields `-1` sentinels; consumers treat those as "no information".

pub mod entitlement;
pub mod thread;
pub mod utilization;

pub use entitlement::CpuEntitlement;
pub use thread::CpuSelfThreadUtilization;
pub use utilization::{CpuUsageSample, CpuUtilization};
