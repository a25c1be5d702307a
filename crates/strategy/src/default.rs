// SPDX-License-Identifier: Apache-2.0

//! The default (sampling-window) strategy.

use crate::event::MethodEvent;
use crate::info::{PersistentJittedBodyInfo, PersistentMethodInfo, RecompReason};
use crate::plan::OptimizationPlan;
use crate::strategy::{CompilationStrategy, ControllerView, ProcessedEvent, StrategyEnv};
use crate::tier::Tier;
use jitc_vm::MethodId;
use std::sync::Arc;

/// Queue length up to which upgrade recompilations are allowed in.
const SMALL_QUEUE: usize = 5;

/// Platform-average compiled code size the thresholds are normalized to.
const AVG_COMPILED_CODE_SIZE: u32 = 4096;

/// Countdown for bodies whose recompilation came from a GCR counter.
const GCR_RECOMP_COUNT: i32 = 500;

/// The production strategy: promotion decisions from nested sampling
/// windows with density- and size-scaled thresholds.
pub struct DefaultStrategy {
    env: StrategyEnv,
}

impl DefaultStrategy {
    /// Wraps the shared environment.
    #[must_use]
    pub fn new(env: StrategyEnv) -> Self {
        DefaultStrategy { env }
    }

    /// The environment (shared with the controller for assembly).
    #[must_use]
    pub fn env(&self) -> &StrategyEnv {
        &self.env
    }

    /// First-compile tier: loopy methods are profiling candidates, the
    /// rest start warm.
    fn initial_tier(&self, method: MethodId) -> Tier {
        if self.env.vm.method_has_loops(method) {
            Tier::VeryHot
        } else {
            Tier::Warm
        }
    }

    fn profiling_permitted(&self, info: &PersistentMethodInfo) -> bool {
        !self.env.options.disable_profiling
            && !info.is_profiling_disabled()
            && !self.env.state.is_code_cache_near_full()
    }

    /// Materializes the initial-tier decision: very-hot candidates get an
    /// instrumented plan when profiling is possible, a plain warm plan
    /// otherwise.
    fn initial_plan(&self, method: MethodId) -> Box<OptimizationPlan> {
        let tier = self.initial_tier(method);
        let info = self.env.registry.get_or_create_method_info(method, tier);
        if tier == Tier::VeryHot && self.profiling_permitted(&info) {
            let mut plan = self.env.plan_pool.allocate(Tier::VeryHot);
            plan.insert_instrumentation = true;
            plan
        } else {
            let plain = if tier == Tier::VeryHot { Tier::Warm } else { tier };
            self.env.plan_pool.allocate(plain)
        }
    }

    fn is_big_app(&self) -> bool {
        self.env.state.loaded_classes() > self.env.options.big_app_threshold
    }

    /// Hot and scorching thresholds scaled for `method` and the current
    /// phase.
    fn scaled_thresholds(&self, method: MethodId) -> (u32, u32) {
        let options = &self.env.options;
        let size = self
            .env
            .vm
            .compiled_code_size(method)
            .unwrap_or(AVG_COMPILED_CODE_SIZE)
            .max(1);
        let scale = |base: u32| {
            let scaled = (u64::from(base) * u64::from(AVG_COMPILED_CODE_SIZE) / u64::from(size))
                as u32;
            scaled.clamp(base / 4, base.saturating_mul(2))
        };
        let mut hot = scale(options.sample_threshold);
        let mut scorching = scale(options.scorching_sample_threshold);
        if options.conservative_compilation {
            hot /= 2;
            scorching /= 2;
        }
        if self.env.state.is_startup_phase() && self.env.state.target_cpus() <= 2 {
            hot /= 2;
            scorching /= 2;
        }
        if self.is_big_app() && self.env.state.is_startup_phase() {
            let adjust = options.big_app_sample_threshold_adjust.max(1);
            hot /= adjust;
            scorching /= adjust;
        }
        (hot.max(1), scorching.max(1))
    }

    // ---- event handlers ---------------------------------------------------

    fn on_counter_tripped(&self, method: MethodId) -> ProcessedEvent {
        if let Some(counter) = self.env.vm.invocation_counter(method) {
            if counter.is_queued() {
                return ProcessedEvent::none();
            }
            if counter.mark_queued().is_err() {
                // Another thread got here first (or the count moved); the
                // decision will be re-made on its next trip.
                return ProcessedEvent::none();
            }
        }
        ProcessedEvent::created(self.initial_plan(method))
    }

    fn on_interpreted_sample(
        &self,
        method: MethodId,
        controller: &dyn ControllerView,
    ) -> ProcessedEvent {
        let options = &self.env.options;
        if options.disable_interpreter_sampling {
            return ProcessedEvent::none();
        }
        let Some(counter) = self.env.vm.invocation_counter(method) else {
            return ProcessedEvent::none();
        };
        if counter.is_queued() {
            // Compilation is pending; a sample means the method is still
            // busy, so nudge its request forward.
            let _ = controller.promote_method_in_async_queue(method);
            return ProcessedEvent::none();
        }
        let Some(count) = counter.count() else {
            return ProcessedEvent::none();
        };

        let loopy = self.env.vm.method_has_loops(method);
        let profiler_off = !self.env.profiler.is_profiling_enabled();
        let (subtraction, division) = if profiler_off {
            (
                options.iprofiler_off_subtraction_factor,
                options.iprofiler_off_division_factor,
            )
        } else if loopy {
            (
                options.loopy_method_subtraction_factor,
                options.loopy_method_division_factor,
            )
        } else {
            (1, 16)
        };
        // Startup shaves counts gently; steady state divides.
        let reduced = if self.env.state.is_startup_phase() {
            count - subtraction
        } else {
            count - (count / division).max(subtraction)
        };
        let floor = if options.active_threads_threshold >= 0 {
            options.active_threads_threshold
        } else if self.env.state.active_threads() > self.env.state.target_cpus() {
            i64::from(self.env.state.active_threads())
        } else {
            0
        };
        let new_count = reduced.max(floor.min(count)).max(0);
        if new_count != count {
            if counter.set_count(count, new_count).is_err() {
                // Contended; this sample's reduction is simply lost.
                return ProcessedEvent::none();
            }
            self.env
                .profiler
                .dlt()
                .adjust_stored_counter(method, new_count - count);
            self.env
                .sampling_tracking
                .add_or_update(method, (count - new_count) as i32);
        }
        if new_count <= 0 && self.env.state.elapsed_ms() >= options.warmup_delay_ms {
            if counter.mark_queued().is_err() {
                return ProcessedEvent::none();
            }
            return ProcessedEvent::created(self.initial_plan(method));
        }
        ProcessedEvent::none()
    }

    fn on_jitted_sample(
        &self,
        method: MethodId,
        start_pc: u64,
        controller: &dyn ControllerView,
    ) -> ProcessedEvent {
        let options = &self.env.options;
        let Some(body) = self.env.registry.body_info(start_pc) else {
            return ProcessedEvent::none();
        };
        if body.is_sampling_disabled() {
            return ProcessedEvent::none();
        }
        let info = self
            .env
            .registry
            .get_or_create_method_info(method, body.hotness());

        let global = self.env.state.global_sample_count();
        let count = body.decrement_counter(1);
        let window_count = body.count_window_sample();
        let hot_interval = options.sample_interval;
        let increase_factor = self.env.sample_info.increase_factor();
        let scorching_interval =
            options.scorching_sample_interval.max(hot_interval) * increase_factor;

        // Counter exhaustion is its own recompilation signal, distinct from
        // the window densities below.
        if count <= 0
            && !controller.is_method_being_compiled(method)
            && !body.is_sampling_recomp_decided()
        {
            let next = info
                .next_tier()
                .or_else(|| body.hotness().next_for_sampling());
            match next {
                Some(next) if next > Tier::Hot => {
                    // Scorching-class compilations never come from counter
                    // exhaustion; rearm and let the windows decide.
                    body.set_counter(hot_interval.max(options.reset_count_threshold) as i32);
                    if count < 0 && !info.is_misc_counter_decrement_disabled() {
                        info.set_reason(Some(RecompReason::DueToMegamorphicCallProfile));
                        info.disable_misc_counter_decrement();
                    }
                }
                Some(next) => {
                    if body.try_decide_sampling_recomp() {
                        info.set_reason(Some(if count < 0 {
                            RecompReason::DueToMegamorphicCallProfile
                        } else {
                            RecompReason::DueToCounterZero
                        }));
                        info.set_next_tier(Some(next));
                        return ProcessedEvent::created(self.env.plan_pool.allocate(next));
                    }
                }
                None => {}
            }
        }

        if window_count < hot_interval {
            return ProcessedEvent::none();
        }

        // ---- hot window complete -----------------------------------------
        let window_start = body.close_hot_window(global);
        let global_in_window = global.saturating_sub(window_start).max(1) as u32;
        let (hot_threshold, scorching_threshold) = self.scaled_thresholds(method);
        let scorching_samples = body.scorching_window_samples();
        let perceived = hot_interval.saturating_mul(1000) / global_in_window;

        let mut plan: Option<Box<OptimizationPlan>> = None;
        if global_in_window <= scorching_threshold {
            if scorching_samples >= scorching_interval {
                let scorching_start = body.close_scorching_window(global);
                let global_in_scorching = global.saturating_sub(scorching_start) as u32;
                // The scorching budget is the per-window threshold spread
                // over the base window ratio. The density increase factor
                // stretches the window but not the budget, so a stretched
                // window can be unreachable; the test still runs and the
                // failing case lands on hot below.
                let base_ratio =
                    (options.scorching_sample_interval.max(hot_interval) / hot_interval).max(1);
                let scorching_budget = scorching_threshold.saturating_mul(base_ratio);
                if global_in_scorching <= scorching_budget {
                    let dont_switch = global_in_window
                        > options.sample_dont_switch_to_profiling_threshold;
                    let mut p = if self.profiling_permitted(&info) && !dont_switch {
                        let mut p = self.env.plan_pool.allocate(Tier::VeryHot);
                        p.insert_instrumentation = true;
                        p
                    } else {
                        self.env.plan_pool.allocate(Tier::Scorching)
                    };
                    p.do_not_switch_to_profiling = dont_switch;
                    info.set_reason(Some(RecompReason::DueToThreshold));
                    plan = Some(p);
                } else if body.hotness() <= Tier::Warm {
                    info.set_reason(Some(RecompReason::DueToThreshold));
                    plan = Some(self.env.plan_pool.allocate(Tier::Hot));
                }
            } else {
                // Looks scorching, but the longer window has not finished;
                // hold the decision.
                body.set_postponed_decision(true);
            }
        } else if body.hotness() <= Tier::Warm && global_in_window <= hot_threshold {
            let mut p = self.env.plan_pool.allocate(Tier::Hot);
            p.do_not_switch_to_profiling =
                global_in_window > options.sample_dont_switch_to_profiling_threshold;
            info.set_reason(Some(RecompReason::DueToThreshold));
            plan = Some(p);
        } else if !options.disable_aggressive_recompilations
            && body.hotness() <= Tier::Warm
            && (body.aggressive_recomp_chances() > 0 || !self.is_big_app())
            && scorching_samples >= scorching_interval
        {
            // Second, softer criterion: half the density suffices if it
            // held over the whole longer window.
            let scorching_start = body.close_scorching_window(global);
            let global_in_scorching = global.saturating_sub(scorching_start) as u32;
            let base_ratio =
                (options.scorching_sample_interval.max(hot_interval) / hot_interval).max(1);
            if global_in_scorching <= hot_threshold.saturating_mul(2 * base_ratio)
                && body.take_aggressive_chance()
            {
                info.set_reason(Some(RecompReason::DueToThreshold));
                plan = Some(self.env.plan_pool.allocate(Tier::Hot));
            }
        }

        if plan.is_none() {
            plan = self.maybe_upgrade(method, &info, &body, controller);
        }

        let Some(mut plan) = plan else {
            return ProcessedEvent::none();
        };
        plan.perceived_cpu_util_permille = perceived;
        tracing::debug!(
            method = %method,
            tier = ?plan.tier,
            global_in_window,
            perceived,
            "sampling promotion decided"
        );
        if controller.is_method_being_compiled(method) {
            // Never double-queue; at most raise the request in flight.
            let _ = controller.adjust_in_flight_plan(method, plan.tier, perceived);
            self.env.plan_pool.release(plan);
            return ProcessedEvent::none();
        }
        if !body.try_decide_sampling_recomp() {
            self.env.plan_pool.release(plan);
            return ProcessedEvent::none();
        }
        info.set_next_tier(Some(plan.tier));
        ProcessedEvent::created(plan)
    }

    /// The upgrade path for bodies stuck below warm (downgraded or
    /// AOT-loaded).
    fn maybe_upgrade(
        &self,
        method: MethodId,
        info: &Arc<PersistentMethodInfo>,
        body: &Arc<PersistentJittedBodyInfo>,
        controller: &dyn ControllerView,
    ) -> Option<Box<OptimizationPlan>> {
        let options = &self.env.options;
        if options.disable_upgrades
            || body.hotness() >= Tier::Warm
            || !(body.is_opt_level_downgraded() || body.is_aot_body())
            || controller.main_queue_size() > SMALL_QUEUE
            || self.env.state.is_class_loading_phase()
        {
            return None;
        }
        let mut threshold = options.cold_upgrade_sample_threshold;
        if self.is_big_app()
            && self
                .env
                .vm
                .compiled_code_size(method)
                .is_some_and(|size| size > AVG_COMPILED_CODE_SIZE)
        {
            threshold = threshold.saturating_mul(2);
        }
        if body.total_samples() < threshold {
            return None;
        }
        let tier = if body.is_aot_body() && options.quickstart {
            if self.env.vm.is_bootstrap_method(method)
                && !self.env.vm.is_large_memory_method(method)
            {
                Tier::Warm
            } else {
                Tier::Cold
            }
        } else {
            Tier::Warm
        };
        if tier <= body.hotness() {
            return None;
        }
        let mut plan = self.env.plan_pool.allocate(tier);
        plan.is_upgrade_recompilation = true;
        info.set_reason(Some(RecompReason::DueToOptLevelUpgrade));
        Some(plan)
    }

    fn on_other_trigger(&self, method: MethodId, old_start_pc: u64) -> ProcessedEvent {
        let info = self
            .env
            .registry
            .get_or_create_method_info(method, self.initial_tier(method));
        // Synchronous recompilations hand their plan over pre-attached; it
        // is cloned, never consumed in place.
        if let Some(attached) = info.attached_plan_copy() {
            return ProcessedEvent::cloned(self.env.plan_pool.clone_plan(&attached));
        }
        let body = self.env.registry.body_info(old_start_pc);
        if body.as_ref().is_some_and(|b| b.uses_gcr()) {
            info.set_gcr_trip(true);
            return ProcessedEvent::created(self.env.plan_pool.allocate(Tier::Warm));
        }
        let keep_tier = match info.reason() {
            Some(RecompReason::DueToInlinedMethodRedefinition) => true,
            Some(RecompReason::DueToJProfiling) => {
                body.as_ref().is_none_or(|b| !b.is_profiling_body())
            }
            _ => false,
        };
        let tier = if keep_tier {
            info.current_tier()
        } else {
            body.as_ref()
                .and_then(|b| b.hotness().next_for_sampling())
                .unwrap_or_else(|| info.current_tier())
        };
        ProcessedEvent::created(self.env.plan_pool.allocate(tier))
    }

    fn on_body_invalidated(&self, method: MethodId, old_start_pc: u64) -> ProcessedEvent {
        let info = self
            .env
            .registry
            .get_or_create_method_info(method, self.initial_tier(method));
        let _ = info.count_invalidation();
        self.env.registry.remove_body(old_start_pc);
        // Same tier again; the body died for external reasons.
        ProcessedEvent::created(self.env.plan_pool.allocate(info.current_tier()))
    }

    fn on_hwp_trigger(
        &self,
        method: MethodId,
        old_start_pc: u64,
        next_tier_hint: Tier,
        controller: &dyn ControllerView,
    ) -> ProcessedEvent {
        let info = self
            .env
            .registry
            .get_or_create_method_info(method, self.initial_tier(method));
        let body = self.env.registry.body_info(old_start_pc);
        let rises = next_tier_hint > info.current_tier();
        let aot_upgrade =
            body.as_ref().is_some_and(|b| b.is_aot_body()) && !self.env.options.disable_upgrades;
        if (!rises && !aot_upgrade) || controller.is_method_being_compiled(method) {
            return ProcessedEvent::none();
        }
        let plan = if next_tier_hint == Tier::Scorching && self.profiling_permitted(&info) {
            let mut plan = self.env.plan_pool.allocate(Tier::VeryHot);
            plan.insert_instrumentation = true;
            plan
        } else {
            self.env.plan_pool.allocate(next_tier_hint)
        };
        info.set_reason(Some(RecompReason::DueToRi));
        ProcessedEvent::created(plan)
    }

    fn on_method_handle_thunk(&self, method: MethodId, custom: bool) -> ProcessedEvent {
        let mut plan = self.initial_plan(method);
        if custom && plan.tier < Tier::Warm {
            plan.tier = Tier::Warm;
        }
        // Thunks are glue; sampling them buys nothing.
        plan.use_sampling = false;
        ProcessedEvent::created(plan)
    }
}

impl CompilationStrategy for DefaultStrategy {
    fn process_event(
        &self,
        event: &MethodEvent,
        controller: &dyn ControllerView,
    ) -> ProcessedEvent {
        match *event {
            MethodEvent::InterpreterCounterTripped { method } => self.on_counter_tripped(method),
            MethodEvent::InterpretedMethodSample { method, .. } => {
                self.on_interpreted_sample(method, controller)
            }
            MethodEvent::JittedMethodSample {
                method, start_pc, ..
            } => self.on_jitted_sample(method, start_pc, controller),
            MethodEvent::OtherRecompilationTrigger {
                method,
                old_start_pc,
            } => self.on_other_trigger(method, old_start_pc),
            MethodEvent::MethodBodyInvalidated {
                method,
                old_start_pc,
            } => self.on_body_invalidated(method, old_start_pc),
            MethodEvent::HwpRecompilationTrigger {
                method,
                old_start_pc,
                next_tier_hint,
            } => self.on_hwp_trigger(method, old_start_pc, next_tier_hint, controller),
            MethodEvent::NewInstanceImpl { method } => {
                ProcessedEvent::created(self.initial_plan(method))
            }
            MethodEvent::ShareableMethodHandleThunk { method } => {
                self.on_method_handle_thunk(method, false)
            }
            MethodEvent::CustomMethodHandleThunk { method } => {
                self.on_method_handle_thunk(method, true)
            }
            MethodEvent::JitCompilationInducedByDlt { method } => {
                let mut plan = self.initial_plan(method);
                plan.induced_by_dlt = true;
                ProcessedEvent::created(plan)
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
        // Settle the sampling debt: counts skipped by interpreter sampling
        // are owed to this compilation's profiling setup.
        if let Some(skipped) = self.env.sampling_tracking.find_and_delete(method) {
            tracing::debug!(method = %method, skipped, "compiling with sampling-skipped counts");
        }
        if info.take_gcr_trip() {
            info.set_next_tier(Tier::Warm.next_for_sampling());
            info.set_next_counter(GCR_RECOMP_COUNT);
            return;
        }
        match plan.tier.next_for_sampling() {
            Some(next) => {
                info.set_next_tier(Some(next));
                info.set_next_counter(self.env.options.sample_interval as i32);
            }
            None => {
                // Top of the ladder: prevent recompilation, and the new
                // body will not be sampled either.
                info.set_next_tier(None);
                info.set_next_counter(i32::MAX);
            }
        }
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
        info.set_opt_level_downgraded(plan.opt_level_downgraded);
        if let Some(start_pc) = new_start_pc {
            let counter = match info.next_counter() {
                0 => self.env.options.sample_interval as i32,
                planned => planned,
            };
            let body = PersistentJittedBodyInfo::new(
                plan.tier,
                counter,
                self.env.state.global_sample_count(),
            );
            body.set_profiling_body(plan.insert_instrumentation);
            body.set_opt_level_downgraded(plan.opt_level_downgraded);
            if !plan.use_sampling || plan.tier.next_for_sampling().is_none() {
                body.set_disable_sampling(true);
            }
            self.env.registry.register_body(start_pc, Arc::new(body));
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

    const BODY_PC: u64 = 0x9000;

    #[derive(Default)]
    struct TestController {
        compiling: Mutex<HashSet<MethodId>>,
        queue_size: usize,
        promoted: Mutex<Vec<MethodId>>,
        adjusted: Mutex<Vec<(MethodId, Tier, u32)>>,
    }

    impl ControllerView for TestController {
        fn main_queue_size(&self) -> usize {
            self.queue_size
        }

        fn overall_queue_weight(&self) -> i32 {
            self.queue_size as i32
        }

        fn is_method_being_compiled(&self, method: MethodId) -> bool {
            self.compiling.lock().contains(&method)
        }

        fn promote_method_in_async_queue(&self, method: MethodId) -> bool {
            self.promoted.lock().push(method);
            true
        }

        fn adjust_in_flight_plan(
            &self,
            method: MethodId,
            tier: Tier,
            perceived_cpu_util_permille: u32,
        ) -> bool {
            self.adjusted
                .lock()
                .push((method, tier, perceived_cpu_util_permille));
            true
        }
    }

    fn fixture(options: SamplingOptions) -> (Arc<MockVm>, Arc<RuntimeState>, DefaultStrategy) {
        let vm = Arc::new(MockVm::new());
        let state = Arc::new(RuntimeState::new(4));
        state.set_startup_phase(false);
        state.set_class_loading_phase(false);
        let profiler = Arc::new(InterpreterProfiler::new(
            Arc::clone(&vm) as Arc<dyn VmRuntime>,
            None,
            Arc::clone(&state),
            IProfilerOptions::default(),
        ));
        let env = StrategyEnv {
            vm: Arc::clone(&vm) as Arc<dyn VmRuntime>,
            state: Arc::clone(&state),
            profiler,
            registry: Arc::new(MethodInfoRegistry::new()),
            plan_pool: Arc::new(PlanPool::default()),
            sample_info: Arc::new(JitSampleInfo::new()),
            sampling_tracking: Arc::new(InterpreterSamplingTracking::new()),
            options,
        };
        (vm, state, DefaultStrategy::new(env))
    }

    fn add_average_sized_method(vm: &MockVm, method: MethodId) {
        let mut def = MockMethod::plain(0x1000, RomMethodId(1));
        def.code_size = AVG_COMPILED_CODE_SIZE;
        let _ = vm.add_method(method, def);
        vm.set_compiled(method, true);
    }

    fn install_body(strategy: &DefaultStrategy, tier: Tier, counter: i32) -> Arc<PersistentJittedBodyInfo> {
        let body = Arc::new(PersistentJittedBodyInfo::new(tier, counter, 0));
        strategy.env().registry.register_body(BODY_PC, Arc::clone(&body));
        body
    }

    /// Drives jitted samples, advancing the global counter so that after
    /// sample `k` of `total` it reads `k * global_total / total`.
    fn drive_samples(
        strategy: &DefaultStrategy,
        state: &RuntimeState,
        controller: &TestController,
        method: MethodId,
        total: u64,
        global_total: u64,
    ) -> Option<Box<OptimizationPlan>> {
        let mut plan = None;
        for k in 1..=total {
            let target = k * global_total / total;
            while state.global_sample_count() < target {
                let _ = state.count_global_sample();
            }
            let result = strategy.process_event(
                &MethodEvent::JittedMethodSample {
                    method,
                    start_pc: BODY_PC,
                    sample_pc: None,
                },
                controller,
            );
            if result.plan.is_some() {
                assert!(result.created);
                assert!(plan.is_none(), "at most one plan per scenario");
                plan = result.plan;
            }
        }
        plan
    }

    #[test]
    fn sample_driven_hot_promotion() {
        let (vm, state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let _body = install_body(&strategy, Tier::Warm, 1000);
        let controller = TestController::default();

        // 30 body samples among 200 global samples.
        let plan = drive_samples(&strategy, &state, &controller, method, 30, 200)
            .expect("hot promotion");
        assert_eq!(plan.tier, Tier::Hot);
        assert_eq!(plan.perceived_cpu_util_permille, 30 * 1000 / 200);
        let info = strategy.env().registry.method_info(method).expect("info");
        assert_eq!(info.reason(), Some(RecompReason::DueToThreshold));
    }

    #[test]
    fn postponed_scorching_promotion() {
        let (vm, state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let body = install_body(&strategy, Tier::Warm, 100_000);
        let controller = TestController::default();

        // First hot window: 30 body samples in 40 global. Looks scorching
        // but the scorching window is incomplete: no plan, decision held.
        let plan = drive_samples(&strategy, &state, &controller, method, 30, 40);
        assert!(plan.is_none());
        assert!(body.is_decision_postponed());

        // Keep the same density until the scorching window (300 samples)
        // completes: 270 more body samples, global moving on to 340.
        let mut plan = None;
        for k in 1..=270u64 {
            let target = 40 + k * 300 / 270;
            while state.global_sample_count() < target {
                let _ = state.count_global_sample();
            }
            let result = strategy.process_event(
                &MethodEvent::JittedMethodSample {
                    method,
                    start_pc: BODY_PC,
                    sample_pc: None,
                },
                &controller,
            );
            if result.plan.is_some() {
                plan = result.plan;
            }
        }
        let plan = plan.expect("scorching promotion");
        // Profiling is available, so the promotion detours through an
        // instrumented very-hot body.
        assert_eq!(plan.tier, Tier::VeryHot);
        assert!(plan.insert_instrumentation);
    }

    #[test]
    fn scorching_without_profiling_goes_straight_up() {
        let options = SamplingOptions {
            disable_profiling: true,
            ..SamplingOptions::default()
        };
        let (vm, state, strategy) = fixture(options);
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let _body = install_body(&strategy, Tier::Warm, 100_000);
        let controller = TestController::default();
        let plan = drive_samples(&strategy, &state, &controller, method, 300, 340)
            .expect("scorching promotion");
        assert_eq!(plan.tier, Tier::Scorching);
        assert!(!plan.insert_instrumentation);
    }

    #[test]
    fn scaled_out_scorching_falls_back_to_hot() {
        // A stretched scorching window whose budget stays unscaled: the
        // window is unreachable, the test still runs, the decision lands
        // on hot.
        let options = SamplingOptions {
            sample_interval: 3,
            scorching_sample_interval: 6,
            sample_threshold: 100,
            scorching_sample_threshold: 10,
            disable_aggressive_recompilations: true,
            disable_profiling: true,
            ..SamplingOptions::default()
        };
        let (vm, state, strategy) = fixture(options);
        // 200 samples/second doubles the scorching window (6 -> 12 body
        // samples) without touching the budget.
        strategy.env().sample_info.update(1000, 200);
        assert_eq!(strategy.env().sample_info.increase_factor(), 2);

        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let body = install_body(&strategy, Tier::Warm, 100_000);
        let controller = TestController::default();

        // Four windows too dilute for anything (150 global each), then one
        // dense window completing the stretched scorching interval.
        for _ in 0..4 {
            let before = state.global_sample_count();
            let plan = drive_samples(
                &strategy,
                &state,
                &controller,
                method,
                3,
                before + 150,
            );
            assert!(plan.is_none());
        }
        assert_eq!(body.scorching_window_samples(), 12);
        let before = state.global_sample_count();
        let plan = drive_samples(&strategy, &state, &controller, method, 3, before + 8)
            .expect("fallback promotion");
        assert_eq!(plan.tier, Tier::Hot, "failed scorching test lands on hot");
    }

    #[test]
    fn aggressive_upgrade_from_cold() {
        let (vm, state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let body = install_body(&strategy, Tier::Cold, 100_000);
        body.set_opt_level_downgraded(true);
        let controller = TestController::default();

        // One full window of samples, too dilute to look hot (400 global),
        // but enough elapsed samples to win the upgrade.
        let plan = drive_samples(&strategy, &state, &controller, method, 30, 400)
            .expect("upgrade plan");
        assert_eq!(plan.tier, Tier::Warm);
        assert!(plan.is_upgrade_recompilation);
        let info = strategy.env().registry.method_info(method).expect("info");
        assert_eq!(info.reason(), Some(RecompReason::DueToOptLevelUpgrade));
    }

    #[test]
    fn counter_exhaustion_never_goes_past_hot() {
        let (vm, _state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        // A hot body's next tier is scorching; draining its counter must
        // rearm instead of promoting.
        let body = install_body(&strategy, Tier::Hot, 1);
        let controller = TestController::default();
        let result = strategy.process_event(
            &MethodEvent::JittedMethodSample {
                method,
                start_pc: BODY_PC,
                sample_pc: None,
            },
            &controller,
        );
        assert!(result.plan.is_none());
        assert_eq!(body.counter(), 30, "counter rearmed to the hot interval");

        // A warm body's next tier is hot; exhaustion promotes directly.
        let warm = Arc::new(PersistentJittedBodyInfo::new(Tier::Warm, 1, 0));
        strategy.env().registry.register_body(0xA000, Arc::clone(&warm));
        let result = strategy.process_event(
            &MethodEvent::JittedMethodSample {
                method,
                start_pc: 0xA000,
                sample_pc: None,
            },
            &controller,
        );
        let plan = result.plan.expect("counter-zero promotion");
        assert_eq!(plan.tier, Tier::Hot);
        let info = strategy.env().registry.method_info(method).expect("info");
        assert_eq!(info.reason(), Some(RecompReason::DueToCounterZero));
    }

    #[test]
    fn sub_zero_counter_means_megamorphic_pressure() {
        let (vm, _state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let body = install_body(&strategy, Tier::Warm, 0);
        // In-code events already drained the counter below zero.
        let _ = body.decrement_counter(3);
        let controller = TestController::default();
        let result = strategy.process_event(
            &MethodEvent::JittedMethodSample {
                method,
                start_pc: BODY_PC,
                sample_pc: None,
            },
            &controller,
        );
        let plan = result.plan.expect("promotion");
        assert_eq!(plan.tier, Tier::Hot);
        let info = strategy.env().registry.method_info(method).expect("info");
        assert_eq!(
            info.reason(),
            Some(RecompReason::DueToMegamorphicCallProfile)
        );
    }

    #[test]
    fn in_flight_compilations_are_adjusted_not_requeued() {
        let (vm, state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let _body = install_body(&strategy, Tier::Warm, 100_000);
        let controller = TestController::default();
        let _ = controller.compiling.lock().insert(method);

        let plan = drive_samples(&strategy, &state, &controller, method, 30, 200);
        assert!(plan.is_none(), "no plan while a compile is in flight");
        let adjusted = controller.adjusted.lock();
        assert_eq!(adjusted.len(), 1);
        assert_eq!(adjusted[0].0, method);
        assert_eq!(adjusted[0].1, Tier::Hot);
    }

    #[test]
    fn interpreted_samples_count_down_to_one_plan() {
        let (vm, _state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        let mut def = MockMethod::plain(0x1000, RomMethodId(1));
        def.initial_count = 10;
        let counter = vm.add_method(method, def);
        let controller = TestController::default();

        let mut plans = 0;
        for _ in 0..40 {
            let result = strategy.process_event(
                &MethodEvent::InterpretedMethodSample {
                    method,
                    sample_pc: None,
                },
                &controller,
            );
            if result.plan.is_some() {
                plans += 1;
            }
        }
        assert_eq!(plans, 1, "the method is queued exactly once");
        assert!(counter.is_queued());
        assert!(
            !controller.promoted.lock().is_empty(),
            "further samples promote the queued request"
        );
    }

    #[test]
    fn custom_method_handle_thunks_start_at_warm_without_sampling() {
        let (vm, _state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        let _ = vm.add_method(method, MockMethod::plain(0x1000, RomMethodId(1)));
        let controller = TestController::default();
        let result = strategy.process_event(
            &MethodEvent::CustomMethodHandleThunk { method },
            &controller,
        );
        let plan = result.plan.expect("thunk plan");
        assert!(plan.tier >= Tier::Warm);
        assert!(!plan.use_sampling);
    }

    #[test]
    fn invalidation_recompiles_at_the_same_tier() {
        let (vm, _state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let _body = install_body(&strategy, Tier::Hot, 30);
        let info = strategy
            .env()
            .registry
            .get_or_create_method_info(method, Tier::Hot);
        info.set_current_tier(Tier::Hot);
        let controller = TestController::default();
        let result = strategy.process_event(
            &MethodEvent::MethodBodyInvalidated {
                method,
                old_start_pc: BODY_PC,
            },
            &controller,
        );
        let plan = result.plan.expect("replacement plan");
        assert_eq!(plan.tier, Tier::Hot);
        assert_eq!(info.invalidations(), 1);
        assert!(strategy.env().registry.body_info(BODY_PC).is_none());
    }

    #[test]
    fn attached_plans_are_cloned_not_consumed() {
        let (vm, _state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let info = strategy
            .env()
            .registry
            .get_or_create_method_info(method, Tier::Warm);
        let mut attached = OptimizationPlan::new(Tier::Hot);
        attached.relaxed_limits = true;
        info.attach_plan(Box::new(attached.clone()));
        let controller = TestController::default();
        let result = strategy.process_event(
            &MethodEvent::OtherRecompilationTrigger {
                method,
                old_start_pc: BODY_PC,
            },
            &controller,
        );
        assert!(!result.created, "cloned from the attached plan");
        let plan = result.plan.expect("plan");
        assert_eq!(*plan, attached);
        assert!(info.attached_plan_copy().is_some(), "original still attached");
    }

    #[test]
    fn hardware_profiler_hint_is_honoured_upward_only() {
        let (vm, _state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let _body = install_body(&strategy, Tier::Warm, 30);
        let info = strategy
            .env()
            .registry
            .get_or_create_method_info(method, Tier::Warm);
        info.set_current_tier(Tier::Warm);
        let controller = TestController::default();

        let result = strategy.process_event(
            &MethodEvent::HwpRecompilationTrigger {
                method,
                old_start_pc: BODY_PC,
                next_tier_hint: Tier::Hot,
            },
            &controller,
        );
        assert_eq!(result.plan.expect("upgrade").tier, Tier::Hot);
        assert_eq!(info.reason(), Some(RecompReason::DueToRi));

        // A hint at or below the current tier is ignored for non-AOT
        // bodies.
        info.set_current_tier(Tier::Hot);
        let result = strategy.process_event(
            &MethodEvent::HwpRecompilationTrigger {
                method,
                old_start_pc: BODY_PC,
                next_tier_hint: Tier::Warm,
            },
            &controller,
        );
        assert!(result.plan.is_none());
    }

    #[test]
    fn post_compilation_sets_up_the_next_trip_wire() {
        let (vm, _state, strategy) = fixture(SamplingOptions::default());
        let method = MethodId(1);
        add_average_sized_method(&vm, method);
        let plan = strategy.env().plan_pool.allocate(Tier::Warm);
        strategy.before_code_gen(&plan, method);
        strategy.post_compilation(plan, method, Some(BODY_PC));

        let info = strategy.env().registry.method_info(method).expect("info");
        assert_eq!(info.current_tier(), Tier::Warm);
        assert_eq!(info.next_tier(), Some(Tier::Hot));
        let body = strategy.env().registry.body_info(BODY_PC).expect("body");
        assert_eq!(body.hotness(), Tier::Warm);
        assert_eq!(body.counter(), 30);
        assert!(!body.is_sampling_disabled());

        // Scorching is the end of the ladder: no next tier, no sampling.
        let plan = strategy.env().plan_pool.allocate(Tier::Scorching);
        strategy.before_code_gen(&plan, method);
        strategy.post_compilation(plan, method, Some(0xB000));
        assert_eq!(info.next_tier(), None);
        let body = strategy.env().registry.body_info(0xB000).expect("body");
        assert!(body.is_sampling_disabled());
    }
}
