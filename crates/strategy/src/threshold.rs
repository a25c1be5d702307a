// SPDX-License-Identifier: Apache-2.0

//! The threshold (deterministic) strategy.

use crate::event::MethodEvent;
use crate::info::{PersistentJittedBodyInfo, RecompReason};
use crate::plan::OptimizationPlan;
use crate::strategy::{CompilationStrategy, ControllerView, ProcessedEvent, StrategyEnv};
use crate::tier::Tier;
use jitc_vm::MethodId;
use std::sync::Arc;

/// Samples needed to move a body to the given tier, and whether the body
/// compiled there carries profiling instrumentation.
fn samples_needed_to_move_to(tier: Tier) -> Option<(u32, bool)> {
    match tier {
        Tier::Warm => Some((10, false)),
        Tier::Hot => Some((50, false)),
        Tier::VeryHot => Some((125, true)),
        Tier::Scorching => Some((250, false)),
        Tier::NoOpt | Tier::Cold => None,
    }
}

/// The ladder the threshold strategy climbs, one rung per threshold.
fn next_rung(tier: Tier) -> Option<Tier> {
    match tier {
        Tier::NoOpt | Tier::Cold => Some(Tier::Warm),
        Tier::Warm => Some(Tier::Hot),
        Tier::Hot => Some(Tier::VeryHot),
        Tier::VeryHot => Some(Tier::Scorching),
        Tier::Scorching => None,
    }
}

/// Deterministic promotion: every jitted sample bumps a per-method
/// counter, and hitting the table entry for the next tier emits the plan.
/// Used where reproducible tier decisions matter more than adaptivity.
pub struct ThresholdStrategy {
    env: StrategyEnv,
}

impl ThresholdStrategy {
    /// Wraps the shared environment.
    #[must_use]
    pub fn new(env: StrategyEnv) -> Self {
        ThresholdStrategy { env }
    }

    /// The environment (shared with the controller for assembly).
    #[must_use]
    pub fn env(&self) -> &StrategyEnv {
        &self.env
    }

    fn first_compile(&self, method: MethodId) -> ProcessedEvent {
        if let Some(counter) = self.env.vm.invocation_counter(method) {
            if counter.is_queued() || counter.mark_queued().is_err() {
                return ProcessedEvent::none();
            }
        }
        let _ = self
            .env
            .registry
            .get_or_create_method_info(method, Tier::Warm);
        ProcessedEvent::created(self.env.plan_pool.allocate(Tier::Warm))
    }

    fn on_jitted_sample(
        &self,
        method: MethodId,
        controller: &dyn ControllerView,
    ) -> ProcessedEvent {
        let info = self
            .env
            .registry
            .get_or_create_method_info(method, Tier::Warm);
        let Some(next) = next_rung(info.current_tier()) else {
            return ProcessedEvent::none();
        };
        let Some((needed, instrument)) = samples_needed_to_move_to(next) else {
            return ProcessedEvent::none();
        };
        let seen = info.count_cpo_sample();
        if seen < needed || controller.is_method_being_compiled(method) {
            return ProcessedEvent::none();
        }
        info.reset_cpo_samples();
        info.set_reason(Some(RecompReason::DueToThreshold));
        info.set_next_tier(Some(next));
        let mut plan = self.env.plan_pool.allocate(next);
        plan.insert_instrumentation = instrument && !self.env.options.disable_profiling;
        ProcessedEvent::created(plan)
    }
}

impl CompilationStrategy for ThresholdStrategy {
    fn process_event(
        &self,
        event: &MethodEvent,
        controller: &dyn ControllerView,
    ) -> ProcessedEvent {
        match *event {
            MethodEvent::JittedMethodSample { method, .. } => {
                self.on_jitted_sample(method, controller)
            }
            MethodEvent::InterpreterCounterTripped { method }
            | MethodEvent::InterpretedMethodSample { method, .. }
            | MethodEvent::NewInstanceImpl { method }
            | MethodEvent::ShareableMethodHandleThunk { method }
            | MethodEvent::CustomMethodHandleThunk { method }
            | MethodEvent::JitCompilationInducedByDlt { method } => self.first_compile(method),
            MethodEvent::OtherRecompilationTrigger { method, .. }
            | MethodEvent::MethodBodyInvalidated { method, .. } => {
                let info = self
                    .env
                    .registry
                    .get_or_create_method_info(method, Tier::Warm);
                ProcessedEvent::created(self.env.plan_pool.allocate(info.current_tier()))
            }
            MethodEvent::HwpRecompilationTrigger {
                method,
                next_tier_hint,
                ..
            } => {
                let info = self
                    .env
                    .registry
                    .get_or_create_method_info(method, Tier::Warm);
                if next_tier_hint > info.current_tier() {
                    info.set_reason(Some(RecompReason::DueToRi));
                    ProcessedEvent::created(self.env.plan_pool.allocate(next_tier_hint))
                } else {
                    ProcessedEvent::none()
                }
            }
        }
    }

    fn adjust_optimization_plan(&self, plan: &mut OptimizationPlan, opt_level_delta: i32) -> bool {
        let adjusted = plan.tier.offset(opt_level_delta);
        if adjusted == plan.tier {
            return false;
        }
        if opt_level_delta < 0 {
            plan.opt_level_downgraded = true;
        }
        plan.tier = adjusted;
        true
    }

    fn before_code_gen(&self, plan: &OptimizationPlan, method: MethodId) {
        let info = self
            .env
            .registry
            .get_or_create_method_info(method, plan.tier);
        info.set_next_tier(next_rung(plan.tier));
        info.set_next_counter(i32::MAX);
    }

    fn post_compilation(
        &self,
        plan: Box<OptimizationPlan>,
        method: MethodId,
        new_start_pc: Option<u64>,
    ) {
        let info = self
            .env
            .registry
            .get_or_create_method_info(method, plan.tier);
        let _ = info.detach_plan();
        info.set_current_tier(plan.tier);
        info.set_reason(None);
        if let Some(start_pc) = new_start_pc {
            let body = Arc::new(PersistentJittedBodyInfo::new(
                plan.tier,
                i32::MAX,
                self.env.state.global_sample_count(),
            ));
            body.set_profiling_body(plan.insert_instrumentation);
            self.env.registry.register_body(start_pc, body);
        }
        self.env.plan_pool.release(plan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::MethodInfoRegistry;
    use crate::plan::PlanPool;
    use crate::sample_info::{InterpreterSamplingTracking, JitSampleInfo};
    use jitc_config::{IProfilerOptions, SamplingOptions};
    use jitc_iprofiler::InterpreterProfiler;
    use jitc_vm::testing::{MockMethod, MockVm};
    use jitc_vm::{RomMethodId, RuntimeState, VmRuntime};
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[derive(Default)]
    struct IdleController {
        compiling: Mutex<HashSet<MethodId>>,
    }

    impl ControllerView for IdleController {
        fn main_queue_size(&self) -> usize {
            0
        }
        fn overall_queue_weight(&self) -> i32 {
            0
        }
        fn is_method_being_compiled(&self, method: MethodId) -> bool {
            self.compiling.lock().contains(&method)
        }
        fn promote_method_in_async_queue(&self, _method: MethodId) -> bool {
            false
        }
        fn adjust_in_flight_plan(&self, _method: MethodId, _tier: Tier, _permille: u32) -> bool {
            false
        }
    }

    fn strategy() -> (Arc<MockVm>, ThresholdStrategy) {
        let vm = Arc::new(MockVm::new());
        let state = Arc::new(RuntimeState::new(4));
        let profiler = Arc::new(InterpreterProfiler::new(
            Arc::clone(&vm) as Arc<dyn VmRuntime>,
            None,
            Arc::clone(&state),
            IProfilerOptions::default(),
        ));
        let env = StrategyEnv {
            vm: Arc::clone(&vm) as Arc<dyn VmRuntime>,
            state,
            profiler,
            registry: Arc::new(MethodInfoRegistry::new()),
            plan_pool: Arc::new(PlanPool::default()),
            sample_info: Arc::new(JitSampleInfo::new()),
            sampling_tracking: Arc::new(InterpreterSamplingTracking::new()),
            options: SamplingOptions::default(),
        };
        (vm, ThresholdStrategy::new(env))
    }

    #[test]
    fn promotes_after_the_table_count() {
        let (vm, strategy) = strategy();
        let method = MethodId(1);
        let _ = vm.add_method(method, MockMethod::plain(0x1000, RomMethodId(1)));
        let info = strategy
            .env()
            .registry
            .get_or_create_method_info(method, Tier::Warm);
        info.set_current_tier(Tier::Warm);
        let controller = IdleController::default();

        let mut plans = Vec::new();
        for _ in 0..50 {
            let result = strategy.process_event(
                &MethodEvent::JittedMethodSample {
                    method,
                    start_pc: 0x9000,
                    sample_pc: None,
                },
                &controller,
            );
            if let Some(plan) = result.plan {
                plans.push(plan);
            }
        }
        assert_eq!(plans.len(), 1, "50 samples buy exactly the hot move");
        assert_eq!(plans[0].tier, Tier::Hot);
    }

    #[test]
    fn very_hot_rung_is_instrumented() {
        let (vm, strategy) = strategy();
        let method = MethodId(1);
        let _ = vm.add_method(method, MockMethod::plain(0x1000, RomMethodId(1)));
        let info = strategy
            .env()
            .registry
            .get_or_create_method_info(method, Tier::Warm);
        info.set_current_tier(Tier::Hot);
        let controller = IdleController::default();

        let mut plan = None;
        for _ in 0..125 {
            let result = strategy.process_event(
                &MethodEvent::JittedMethodSample {
                    method,
                    start_pc: 0x9000,
                    sample_pc: None,
                },
                &controller,
            );
            if result.plan.is_some() {
                plan = result.plan;
            }
        }
        let plan = plan.expect("very-hot move");
        assert_eq!(plan.tier, Tier::VeryHot);
        assert!(plan.insert_instrumentation);
    }
}
