// SPDX-License-Identifier: Apache-2.0

//! Compilation strategies.
//!
//! A strategy converts [`MethodEvent`]s raised by the sampling thread and
//! application threads into [`OptimizationPlan`]s: which tier to compile
//! at, whether to instrument for profiling, and at what priority. Two
//! strategies implement the shared [`CompilationStrategy`] trait:
//!
//! - [`DefaultStrategy`] drives promotion from nested sampling windows
//!   (hot and scorching) with density-scaled thresholds;
//! - [`ThresholdStrategy`] promotes deterministically after a fixed number
//!   of samples per tier.
//!
//! The strategy owns no queues and no threads; the controller calls
//! [`process_event`](CompilationStrategy::process_event) under the
//! compilation lock and routes any returned plan.

pub mod event;
pub mod info;
pub mod plan;
pub mod sample_info;
pub mod strategy;
pub mod threshold;
pub mod tier;

mod default;

pub use default::DefaultStrategy;
pub use event::MethodEvent;
pub use info::{MethodInfoRegistry, PersistentJittedBodyInfo, PersistentMethodInfo, RecompReason};
pub use plan::{OptimizationPlan, PlanPool};
pub use sample_info::{InterpreterSamplingTracking, JitSampleInfo};
pub use strategy::{CompilationStrategy, ControllerView, ProcessedEvent, StrategyEnv};
pub use threshold::ThresholdStrategy;
pub use tier::Tier;
