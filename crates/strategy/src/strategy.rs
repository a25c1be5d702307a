// SPDX-License-Identifier: Apache-2.0

//! The strategy interface and its environment.

use crate::event::MethodEvent;
use crate::info::MethodInfoRegistry;
use crate::plan::{OptimizationPlan, PlanPool};
use crate::sample_info::{InterpreterSamplingTracking, JitSampleInfo};
use crate::tier::Tier;
use jitc_config::SamplingOptions;
use jitc_iprofiler::InterpreterProfiler;
use jitc_vm::{MethodId, RuntimeState, VmRuntime};
use std::sync::Arc;

/// What the strategy may ask of the controller.
///
/// Implemented by the compilation controller; the strategy stays free of
/// queue internals.
pub trait ControllerView: Send + Sync {
    /// Entries currently on the main asynchronous queue.
    fn main_queue_size(&self) -> usize;

    /// Combined weight of all queues.
    fn overall_queue_weight(&self) -> i32;

    /// Whether a compilation for `method` is queued or in progress.
    fn is_method_being_compiled(&self, method: MethodId) -> bool;

    /// Moves an already queued request for `method` to the queue front.
    fn promote_method_in_async_queue(&self, method: MethodId) -> bool;

    /// Raises an in-flight request for `method` to `tier`, attaching the
    /// measured CPU share. Returns whether an adjustment happened.
    fn adjust_in_flight_plan(
        &self,
        method: MethodId,
        tier: Tier,
        perceived_cpu_util_permille: u32,
    ) -> bool;
}

/// Result of processing one event.
#[derive(Debug)]
pub struct ProcessedEvent {
    /// The plan to act on, when the event warrants one.
    pub plan: Option<Box<OptimizationPlan>>,
    /// `true` when the plan was freshly allocated rather than cloned from
    /// a pre-attached plan.
    pub created: bool,
}

impl ProcessedEvent {
    /// No action.
    #[must_use]
    pub fn none() -> Self {
        ProcessedEvent {
            plan: None,
            created: false,
        }
    }

    /// A freshly created plan.
    #[must_use]
    pub fn created(plan: Box<OptimizationPlan>) -> Self {
        ProcessedEvent {
            plan: Some(plan),
            created: true,
        }
    }

    /// A plan cloned from a pre-attached one.
    #[must_use]
    pub fn cloned(plan: Box<OptimizationPlan>) -> Self {
        ProcessedEvent {
            plan: Some(plan),
            created: false,
        }
    }
}

/// Shared collaborators every strategy reads.
pub struct StrategyEnv {
    /// Method and class metadata.
    pub vm: Arc<dyn VmRuntime>,
    /// Process-wide phase and counter state.
    pub state: Arc<RuntimeState>,
    /// The interpreter profiler (enabled/disabled state, DLT table).
    pub profiler: Arc<InterpreterProfiler>,
    /// Per-method and per-body recompilation state.
    pub registry: Arc<MethodInfoRegistry>,
    /// The plan pool, guarded by the plan monitor.
    pub plan_pool: Arc<PlanPool>,
    /// Global sampling-density tracker.
    pub sample_info: Arc<JitSampleInfo>,
    /// Methods with sampling-skipped invocation counts.
    pub sampling_tracking: Arc<InterpreterSamplingTracking>,
    /// The sampling knobs.
    pub options: SamplingOptions,
}

/// A compilation strategy: events in, plans out.
///
/// `process_event` runs under the compilation lock; that lock is what makes
/// the read of a body's `sampling_recomp_decided` flag and the decision to
/// queue atomic with respect to concurrent samplers.
pub trait CompilationStrategy: Send + Sync {
    /// Converts one event into at most one plan.
    fn process_event(&self, event: &MethodEvent, controller: &dyn ControllerView)
    -> ProcessedEvent;

    /// Adjusts a queued plan's tier by `opt_level_delta` steps. Returns
    /// whether anything changed.
    fn adjust_optimization_plan(&self, plan: &mut OptimizationPlan, opt_level_delta: i32) -> bool;

    /// Called right before code generation: fixes the next recompilation
    /// trip-wire (next tier and counter) for the body about to be built.
    fn before_code_gen(&self, plan: &OptimizationPlan, method: MethodId);

    /// Called after a compilation finished: registers the new body's state
    /// and recycles the plan.
    fn post_compilation(
        &self,
        plan: Box<OptimizationPlan>,
        method: MethodId,
        new_start_pc: Option<u64>,
    );
}
