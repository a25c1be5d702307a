// SPDX-License-Identifier: Apache-2.0

//! `CompilationInfo`: queues, workers, lifecycle.

use crate::activation::{self, YesNoMaybe};
use crate::error::Error;
use crate::queue::{MethodQueue, MethodToBeCompiled, entry_weight};
use crate::smooth::smooth_compilation;
use crate::tracing_buffer::{CompilationOperation, CompilationTracingFacility};
use jitc_config::ControllerOptions;
use jitc_cpu::{CpuEntitlement, CpuSelfThreadUtilization, CpuUtilization};
use jitc_iprofiler::PromotionSink;
use jitc_strategy::{
    CompilationStrategy, ControllerView, MethodEvent, OptimizationPlan, PlanPool, Tier,
};
use jitc_vm::{MethodId, PortLayer, RuntimeState, VmRuntime};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

/// Why a compilation failed.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The compiler could not produce a body.
    #[error("compilation failed: {reason}")]
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

/// The compiler proper, out of scope for the controller. Returns the new
/// body's entry point.
pub trait CompileDispatcher: Send + Sync {
    /// Compiles `method` according to `plan`.
    fn compile(
        &self,
        method: MethodId,
        plan: &OptimizationPlan,
        old_start_pc: Option<u64>,
    ) -> Result<u64, CompileError>;
}

/// Where a request enters the queue system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilePriority {
    /// The low-priority queue (upgrades, profiler-scheduled first compiles).
    Low,
    /// The main asynchronous queue.
    Normal,
    /// Front of the main queue, compiled before anything else.
    Sync,
}

struct QueueState {
    main: MethodQueue,
    low_priority: MethodQueue,
    jprofiling: MethodQueue,
    jprofiling_allowed: bool,
    compiling: HashSet<MethodId>,
    stopping: bool,
}

/// The compilation controller.
///
/// One per VM. The queue monitor is held briefly around queue edits and
/// `notify`; the separate decision lock serializes strategy decisions so a
/// body's `sampling_recomp_decided` read and the enqueue that follows form
/// one atomic step with respect to concurrent samplers.
pub struct CompilationInfo {
    strategy: Arc<dyn CompilationStrategy>,
    dispatcher: Arc<dyn CompileDispatcher>,
    plan_pool: Arc<PlanPool>,
    vm: Arc<dyn VmRuntime>,
    state: Arc<RuntimeState>,
    cpu: Arc<CpuUtilization>,
    entitlement: Arc<CpuEntitlement>,
    port: Arc<dyn PortLayer>,
    thread_measurement_interval: std::time::Duration,
    options: ControllerOptions,
    tracing: CompilationTracingFacility,
    monitor: Mutex<QueueState>,
    work_available: Condvar,
    decision_lock: Mutex<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_entry_id: AtomicU64,
}

impl CompilationInfo {
    /// Wires the controller to its collaborators.
    #[must_use]
    pub fn new(
        strategy: Arc<dyn CompilationStrategy>,
        dispatcher: Arc<dyn CompileDispatcher>,
        plan_pool: Arc<PlanPool>,
        vm: Arc<dyn VmRuntime>,
        state: Arc<RuntimeState>,
        cpu: Arc<CpuUtilization>,
        entitlement: Arc<CpuEntitlement>,
        port: Arc<dyn PortLayer>,
        thread_measurement_interval: std::time::Duration,
        options: ControllerOptions,
    ) -> Arc<Self> {
        Arc::new(CompilationInfo {
            tracing: CompilationTracingFacility::new(options.tracing_buffer_size),
            strategy,
            dispatcher,
            plan_pool,
            vm,
            state,
            cpu,
            entitlement,
            port,
            thread_measurement_interval,
            options,
            monitor: Mutex::new(QueueState {
                main: MethodQueue::new(),
                low_priority: MethodQueue::new(),
                jprofiling: MethodQueue::new(),
                jprofiling_allowed: false,
                compiling: HashSet::new(),
                stopping: false,
            }),
            work_available: Condvar::new(),
            decision_lock: Mutex::new(()),
            workers: Mutex::new(Vec::new()),
            next_entry_id: AtomicU64::new(1),
        })
    }

    /// The tracing facility (diagnostics).
    #[must_use]
    pub fn tracing(&self) -> &CompilationTracingFacility {
        &self.tracing
    }

    // ---- event entry point ------------------------------------------------

    /// Routes one method event through the strategy and queues any plan it
    /// produces. Returns whether a request was queued.
    pub fn process_event(&self, event: &MethodEvent) -> bool {
        let _decision = self.decision_lock.lock();
        let processed = self.strategy.process_event(event, self);
        let Some(plan) = processed.plan else {
            return false;
        };
        let method = event.method();
        let old_start_pc = match *event {
            MethodEvent::OtherRecompilationTrigger { old_start_pc, .. }
            | MethodEvent::MethodBodyInvalidated { old_start_pc, .. }
            | MethodEvent::HwpRecompilationTrigger { old_start_pc, .. } => Some(old_start_pc),
            MethodEvent::JittedMethodSample { start_pc, .. } => Some(start_pc),
            _ => None,
        };
        let is_invalidation = matches!(*event, MethodEvent::MethodBodyInvalidated { .. });
        let jsr292 = matches!(
            *event,
            MethodEvent::ShareableMethodHandleThunk { .. }
                | MethodEvent::CustomMethodHandleThunk { .. }
        );
        let priority = if plan.is_upgrade_recompilation {
            CompilePriority::Low
        } else {
            CompilePriority::Normal
        };
        let queued = match self.add_method_to_be_compiled(
            method,
            old_start_pc,
            plan,
            priority,
            is_invalidation,
            jsr292,
        ) {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(%error, method = %method, "compilation request not queued");
                false
            }
        };
        if queued
            && self.options.enable_app_thread_yield
            && self.overall_queue_weight() >= i32::from(crate::queue::VERY_HOT_WEIGHT)
        {
            // Give the compilation threads a chance to bite into the
            // backlog before the caller produces more work.
            std::thread::yield_now();
        }
        queued
    }

    // ---- queue operations -------------------------------------------------

    /// Queues a compilation request.
    pub fn add_method_to_be_compiled(
        &self,
        method: MethodId,
        old_start_pc: Option<u64>,
        plan: Box<OptimizationPlan>,
        priority: CompilePriority,
        is_invalidation: bool,
        jsr292: bool,
    ) -> Result<(), Error> {
        let has_loops = self.vm.method_has_loops(method);
        let mut state = self.monitor.lock();
        if state.stopping {
            self.plan_pool.release(plan);
            return Err(Error::ShuttingDown);
        }
        if state.compiling.contains(&method)
            || state.main.contains(method)
            || state.low_priority.contains(method)
            || state.jprofiling.contains(method)
        {
            self.plan_pool.release(plan);
            return Err(Error::AlreadyQueued);
        }
        let weight = entry_weight(plan.tier, has_loops, jsr292, false);
        let mut entry = MethodToBeCompiled {
            method,
            old_start_pc,
            plan,
            weight,
            is_sync: matches!(priority, CompilePriority::Sync),
            is_invalidation_request: is_invalidation,
            entry_id: self.next_entry_id.fetch_add(1, Ordering::Relaxed),
        };
        let overall = state.main.weight() + state.low_priority.weight();
        let invalidations = state.main.invalidation_requests();
        let _ = smooth_compilation(
            &mut entry,
            overall,
            invalidations,
            self.options.num_queued_inv_req_to_downgrade_opt_level,
            has_loops,
        );
        self.tracing.record(
            0,
            CompilationOperation::CompileOnSeparateThreadEnter,
            entry.plan.tier.to_u8(),
        );
        match priority {
            CompilePriority::Low => state.low_priority.push_back(entry),
            CompilePriority::Normal => state.main.push_back(entry),
            CompilePriority::Sync => state.main.push_front(entry),
        }
        drop(state);
        self.tracing
            .record(0, CompilationOperation::WillNotifyCompilationMonitor, 0);
        let _ = self.work_available.notify_one();
        Ok(())
    }

    /// Re-tiers a queued entry and repositions its weight.
    pub fn adjust_compilation_entry_and_requeue(
        &self,
        method: MethodId,
        new_tier: Tier,
        perceived_cpu_util_permille: u32,
    ) -> bool {
        let mut state = self.monitor.lock();
        let strategy = Arc::clone(&self.strategy);
        let vm = Arc::clone(&self.vm);
        state
            .main
            .with_entry_mut(method, |entry| {
                let delta =
                    i32::from(new_tier.to_u8()) - i32::from(entry.plan.tier.to_u8());
                if delta <= 0 {
                    return false;
                }
                if !strategy.adjust_optimization_plan(&mut entry.plan, delta) {
                    return false;
                }
                entry.plan.perceived_cpu_util_permille = perceived_cpu_util_permille;
                entry.weight =
                    entry_weight(entry.plan.tier, vm.method_has_loops(method), false, false);
                true
            })
            .unwrap_or(false)
    }

    /// Converts a queued asynchronous request into a synchronous one and
    /// moves it to the front.
    pub fn change_comp_req_from_async_to_sync(&self, method: MethodId) -> bool {
        let mut state = self.monitor.lock();
        let marked = state
            .main
            .with_entry_mut(method, |entry| entry.is_sync = true)
            .is_some();
        if marked {
            let _ = state.main.promote(method);
        }
        marked
    }

    /// Allows (or stops) draining of the JProfiling queue.
    pub fn set_jprofiling_allowed(&self, allowed: bool) {
        let mut state = self.monitor.lock();
        state.jprofiling_allowed = allowed;
        drop(state);
        let _ = self.work_available.notify_all();
    }

    /// Queues a JProfiling candidate.
    pub fn add_jprofiling_candidate(
        &self,
        method: MethodId,
        plan: Box<OptimizationPlan>,
    ) -> Result<(), Error> {
        let mut state = self.monitor.lock();
        if state.stopping {
            self.plan_pool.release(plan);
            return Err(Error::ShuttingDown);
        }
        if state.jprofiling.contains(method) {
            self.plan_pool.release(plan);
            return Err(Error::AlreadyQueued);
        }
        let weight = entry_weight(plan.tier, self.vm.method_has_loops(method), false, false);
        state.jprofiling.push_back(MethodToBeCompiled {
            method,
            old_start_pc: None,
            plan,
            weight,
            is_sync: false,
            is_invalidation_request: false,
            entry_id: self.next_entry_id.fetch_add(1, Ordering::Relaxed),
        });
        drop(state);
        let _ = self.work_available.notify_one();
        Ok(())
    }

    /// Drains every queue, recycling the queued plans.
    pub fn purge_method_queue(&self) {
        let mut state = self.monitor.lock();
        let drained: Vec<MethodToBeCompiled> = state
            .main
            .drain()
            .into_iter()
            .chain(state.low_priority.drain())
            .chain(state.jprofiling.drain())
            .collect();
        drop(state);
        for entry in drained {
            self.plan_pool.release(entry.plan);
        }
    }

    /// Queue sizes as (main, low-priority, jprofiling).
    #[must_use]
    pub fn queue_sizes(&self) -> (usize, usize, usize) {
        let state = self.monitor.lock();
        (
            state.main.len(),
            state.low_priority.len(),
            state.jprofiling.len(),
        )
    }

    // ---- thread management ------------------------------------------------

    /// Spawns `count` compilation workers (capped by options).
    pub fn start_compilation_threads(self: &Arc<Self>, count: usize) -> Result<(), Error> {
        let count = count.clamp(1, self.options.max_compilation_threads);
        let mut workers = self.workers.lock();
        for index in workers.len()..count {
            let controller = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("jitc-comp-{index}"))
                .spawn(move || controller.worker_loop(index))
                .map_err(|source| Error::WorkerSpawn { index, source })?;
            workers.push(handle);
        }
        Ok(())
    }

    /// Whether the backlog justifies another compilation thread, taking
    /// the process's CPU entitlement into account.
    #[must_use]
    pub fn should_activate_new_comp_thread(&self) -> YesNoMaybe {
        let vm_usage = self.cpu.vm_cpu_usage_percent();
        if vm_usage >= 0 && f64::from(vm_usage) >= self.entitlement.jvm_cpu_entitlement() {
            // The process already consumes its entitlement; another
            // compile thread would only steal from the application.
            return YesNoMaybe::No;
        }
        let (active, weight) = {
            let state = self.monitor.lock();
            let workers = self.workers.lock().len();
            (
                workers,
                state.main.weight() + state.low_priority.weight() / 2,
            )
        };
        if active >= self.options.max_compilation_threads {
            return YesNoMaybe::No;
        }
        activation::should_activate_new_comp_thread(active, weight)
    }

    /// Stops and joins every worker, purging pending requests.
    pub fn stop_compilation_threads(&self) {
        {
            let mut state = self.monitor.lock();
            self.tracing
                .record(0, CompilationOperation::WillStopCompilationThreads, 0);
            state.stopping = true;
        }
        let _ = self.work_available.notify_all();
        self.purge_method_queue();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("compilation worker panicked during shutdown");
            }
        }
    }

    fn next_entry(state: &mut QueueState) -> Option<MethodToBeCompiled> {
        if let Some(entry) = state.main.pop_front() {
            return Some(entry);
        }
        if state.jprofiling_allowed {
            if let Some(entry) = state.jprofiling.pop_front() {
                return Some(entry);
            }
        }
        state.low_priority.pop_front()
    }

    fn worker_loop(self: Arc<Self>, index: usize) {
        let thread_id = index as u16;
        // Each worker keeps a readout of its own duty cycle; the sampler
        // consults these when judging compilation CPU pressure.
        let mut self_util = CpuSelfThreadUtilization::new(
            Arc::clone(&self.port),
            Arc::clone(&self.state),
            self.thread_measurement_interval,
            index as i32,
        );
        let mut state = self.monitor.lock();
        self.tracing.record(
            thread_id,
            CompilationOperation::HasAcquiredCompilationMonitor,
            0,
        );
        loop {
            if state.stopping {
                break;
            }
            let Some(entry) = Self::next_entry(&mut state) else {
                self.tracing.record(
                    thread_id,
                    CompilationOperation::WillWaitOnCompilationMonitor,
                    0,
                );
                self.work_available.wait(&mut state);
                self.tracing.record(
                    thread_id,
                    CompilationOperation::HasFinishedWaitingOnCompilationMonitor,
                    0,
                );
                continue;
            };
            let _ = state.compiling.insert(entry.method);
            self.tracing.record(
                thread_id,
                CompilationOperation::WillReleaseCompilationMonitor,
                0,
            );
            drop(state);

            let MethodToBeCompiled {
                method,
                old_start_pc,
                plan,
                ..
            } = entry;
            self.strategy.before_code_gen(&plan, method);
            match self.dispatcher.compile(method, &plan, old_start_pc) {
                Ok(start_pc) => {
                    self.strategy.post_compilation(plan, method, Some(start_pc));
                }
                Err(error) => {
                    tracing::warn!(%error, method = %method, "compilation failed");
                    self.strategy.post_compilation(plan, method, None);
                }
            }

            if self_util.update() {
                tracing::trace!(
                    worker = index,
                    util = self_util.last_cpu_util(),
                    "compilation thread duty cycle"
                );
            }

            state = self.monitor.lock();
            let _ = state.compiling.remove(&method);
        }
        self.tracing
            .record(thread_id, CompilationOperation::StateChange, 1);
    }
}

impl ControllerView for CompilationInfo {
    fn main_queue_size(&self) -> usize {
        self.monitor.lock().main.len()
    }

    fn overall_queue_weight(&self) -> i32 {
        let state = self.monitor.lock();
        // The secondary queue counts half; its entries are cheap and
        // interruptible.
        state.main.weight() + state.low_priority.weight() / 2
    }

    fn is_method_being_compiled(&self, method: MethodId) -> bool {
        let state = self.monitor.lock();
        state.compiling.contains(&method)
            || state.main.contains(method)
            || state.low_priority.contains(method)
            || state.jprofiling.contains(method)
    }

    fn promote_method_in_async_queue(&self, method: MethodId) -> bool {
        self.monitor.lock().main.promote(method)
    }

    fn adjust_in_flight_plan(
        &self,
        method: MethodId,
        tier: Tier,
        perceived_cpu_util_permille: u32,
    ) -> bool {
        self.adjust_compilation_entry_and_requeue(method, tier, perceived_cpu_util_permille)
    }
}

impl PromotionSink for CompilationInfo {
    fn enqueue_first_time_compilation(&self, method: MethodId) -> bool {
        // Profiler-scheduled first compiles are cheap, interruptible work:
        // cold, on the low-priority queue.
        let plan = self.plan_pool.allocate(Tier::Cold);
        self.add_method_to_be_compiled(
            method,
            None,
            plan,
            CompilePriority::Low,
            false,
            false,
        )
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDispatcher;
    use jitc_config::{IProfilerOptions, SamplingOptions};
    use jitc_cpu::CpuUtilization;
    use jitc_iprofiler::InterpreterProfiler;
    use jitc_strategy::{
        DefaultStrategy, InterpreterSamplingTracking, JitSampleInfo, MethodInfoRegistry,
        StrategyEnv,
    };
    use jitc_vm::testing::{MockMethod, MockPortLayer, MockVm};
    use jitc_vm::{PortLayer, RomMethodId};

    struct Fixture {
        vm: Arc<MockVm>,
        registry: Arc<MethodInfoRegistry>,
        dispatcher: Arc<RecordingDispatcher>,
        controller: Arc<CompilationInfo>,
    }

    fn fixture() -> Fixture {
        let vm = Arc::new(MockVm::new());
        let state = Arc::new(RuntimeState::new(4));
        state.set_startup_phase(false);
        state.set_class_loading_phase(false);
        let port = Arc::new(MockPortLayer::new());
        let profiler = Arc::new(InterpreterProfiler::new(
            Arc::clone(&vm) as Arc<dyn VmRuntime>,
            None,
            Arc::clone(&state),
            IProfilerOptions::default(),
        ));
        let registry = Arc::new(MethodInfoRegistry::new());
        let plan_pool = Arc::new(PlanPool::default());
        let env = StrategyEnv {
            vm: Arc::clone(&vm) as Arc<dyn VmRuntime>,
            state: Arc::clone(&state),
            profiler,
            registry: Arc::clone(&registry),
            plan_pool: Arc::clone(&plan_pool),
            sample_info: Arc::new(JitSampleInfo::new()),
            sampling_tracking: Arc::new(InterpreterSamplingTracking::new()),
            options: SamplingOptions::default(),
        };
        let strategy: Arc<dyn CompilationStrategy> = Arc::new(DefaultStrategy::new(env));
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let cpu = Arc::new(CpuUtilization::new(
            Arc::clone(&port) as Arc<dyn PortLayer>,
            &jitc_config::CpuOptions::default(),
        ));
        let entitlement = Arc::new(CpuEntitlement::new(Arc::clone(&port) as Arc<dyn PortLayer>));
        let controller = CompilationInfo::new(
            strategy,
            Arc::clone(&dispatcher) as Arc<dyn CompileDispatcher>,
            plan_pool,
            Arc::clone(&vm) as Arc<dyn VmRuntime>,
            state,
            cpu,
            entitlement,
            Arc::clone(&port) as Arc<dyn PortLayer>,
            std::time::Duration::from_millis(100),
            ControllerOptions {
                tracing_buffer_size: 32,
                ..ControllerOptions::default()
            },
        );
        Fixture {
            vm,
            registry,
            dispatcher,
            controller,
        }
    }

    fn wait_for_compilations(fixture: &Fixture, count: usize) {
        for _ in 0..400 {
            if fixture.dispatcher.compiled().len() >= count {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("worker never compiled {count} request(s)");
    }

    #[test]
    fn counter_trip_flows_through_to_a_compiled_body() {
        let fixture = fixture();
        let method = MethodId(1);
        let counter = fixture
            .vm
            .add_method(method, MockMethod::plain(0x1000, RomMethodId(1)));
        fixture
            .controller
            .start_compilation_threads(1)
            .expect("worker starts");

        let queued = fixture
            .controller
            .process_event(&MethodEvent::InterpreterCounterTripped { method });
        assert!(queued);
        assert!(counter.is_queued());
        // The same trip again does not double-queue.
        assert!(
            !fixture
                .controller
                .process_event(&MethodEvent::InterpreterCounterTripped { method })
        );

        wait_for_compilations(&fixture, 1);
        let compiled = fixture.dispatcher.compiled();
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].method, method);
        assert_eq!(compiled[0].tier, Tier::Warm);
        // post_compilation registered the body for future sampling.
        assert!(
            fixture
                .registry
                .body_info(compiled[0].start_pc)
                .is_some()
        );
        fixture.controller.stop_compilation_threads();
    }

    #[test]
    fn queued_requests_can_be_promoted_and_adjusted() {
        let fixture = fixture();
        for id in 1..=3u64 {
            let _ = fixture
                .vm
                .add_method(MethodId(id), MockMethod::plain(0x1000 * id, RomMethodId(id)));
        }
        // No workers running: requests stay queued.
        for id in 1..=3u64 {
            assert!(fixture.controller.process_event(
                &MethodEvent::InterpreterCounterTripped { method: MethodId(id) }
            ));
        }
        assert_eq!(fixture.controller.queue_sizes().0, 3);
        assert!(fixture.controller.promote_method_in_async_queue(MethodId(3)));
        assert!(fixture.controller.adjust_compilation_entry_and_requeue(
            MethodId(2),
            Tier::Hot,
            150
        ));
        // Downward adjustments are refused.
        assert!(!fixture.controller.adjust_compilation_entry_and_requeue(
            MethodId(2),
            Tier::Cold,
            0
        ));
        fixture.controller.purge_method_queue();
        assert_eq!(fixture.controller.queue_sizes(), (0, 0, 0));
    }

    #[test]
    fn promotion_sink_lands_on_the_low_priority_queue() {
        let fixture = fixture();
        let method = MethodId(9);
        let _ = fixture
            .vm
            .add_method(method, MockMethod::plain(0x9000, RomMethodId(9)));
        assert!(fixture.controller.enqueue_first_time_compilation(method));
        assert_eq!(fixture.controller.queue_sizes(), (0, 1, 0));
        // Duplicates are refused.
        assert!(!fixture.controller.enqueue_first_time_compilation(method));
        fixture.controller.purge_method_queue();
    }

    #[test]
    fn stop_is_terminal_for_new_requests() {
        let fixture = fixture();
        let method = MethodId(1);
        let _ = fixture
            .vm
            .add_method(method, MockMethod::plain(0x1000, RomMethodId(1)));
        fixture
            .controller
            .start_compilation_threads(2)
            .expect("workers start");
        fixture.controller.stop_compilation_threads();
        assert!(
            !fixture
                .controller
                .process_event(&MethodEvent::InterpreterCounterTripped { method })
        );
        let snapshot = fixture.controller.tracing().snapshot();
        assert!(
            snapshot
                .iter()
                .any(|e| e.operation == CompilationOperation::WillStopCompilationThreads)
        );
    }

    #[test]
    fn jprofiling_queue_waits_for_permission() {
        let fixture = fixture();
        let method = MethodId(5);
        let _ = fixture
            .vm
            .add_method(method, MockMethod::plain(0x5000, RomMethodId(5)));
        fixture
            .controller
            .add_jprofiling_candidate(method, Box::new(OptimizationPlan::new(Tier::VeryHot)))
            .expect("candidate queued");
        fixture
            .controller
            .start_compilation_threads(1)
            .expect("worker starts");
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(
            fixture.dispatcher.compiled().is_empty(),
            "candidates wait until JProfiling is allowed"
        );
        fixture.controller.set_jprofiling_allowed(true);
        wait_for_compilations(&fixture, 1);
        assert_eq!(fixture.dispatcher.compiled()[0].method, method);
        fixture.controller.stop_compilation_threads();
    }

    #[test]
    fn sync_requests_jump_the_queue() {
        let fixture = fixture();
        for id in 1..=2u64 {
            let _ = fixture
                .vm
                .add_method(MethodId(id), MockMethod::plain(0x1000 * id, RomMethodId(id)));
        }
        let plan_a = Box::new(OptimizationPlan::new(Tier::Warm));
        let plan_b = Box::new(OptimizationPlan::new(Tier::Warm));
        fixture
            .controller
            .add_method_to_be_compiled(
                MethodId(1),
                None,
                plan_a,
                CompilePriority::Normal,
                false,
                false,
            )
            .expect("queue a");
        fixture
            .controller
            .add_method_to_be_compiled(
                MethodId(2),
                None,
                plan_b,
                CompilePriority::Sync,
                false,
                false,
            )
            .expect("queue b");
        fixture
            .controller
            .start_compilation_threads(1)
            .expect("worker starts");
        wait_for_compilations(&fixture, 2);
        let compiled = fixture.dispatcher.compiled();
        assert_eq!(compiled[0].method, MethodId(2), "sync request ran first");
        fixture.controller.stop_compilation_threads();
    }
}
