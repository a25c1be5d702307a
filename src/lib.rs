// SPDX-License-Identifier: Apache-2.0

//! Adaptive tiered recompilation controller for a managed-language VM.
//!
//! This crate assembles the subsystem crates into one runtime:
//!
//! - [`jitc_strategy`] — method events in, optimization plans out;
//! - [`jitc_iprofiler`] — the interpreter bytecode profiler;
//! - [`jitc_datacache`] — pooled scratch memory for compiler metadata;
//! - [`jitc_cpu`] — CPU utilization and entitlement monitors;
//! - [`jitc_controller`] — queues, compilation workers, lifecycle.
//!
//! The embedding VM supplies the three external interfaces from
//! [`jitc_vm`] (`VmRuntime`, `PortLayer`, optionally `SharedCache`) plus a
//! [`CompileDispatcher`] fronting the actual compiler, and drives the
//! runtime from its hooks: sampler ticks, method samples, counter trips.
//!
//! ```no_run
//! use jitc::{JitRuntime, Options};
//! use jitc_vm::SystemPortLayer;
//! use std::sync::Arc;
//!
//! # fn vm() -> Arc<dyn jitc_vm::VmRuntime> { unimplemented!() }
//! # fn compiler() -> Arc<dyn jitc::CompileDispatcher> { unimplemented!() }
//! let runtime = JitRuntime::builder(vm(), compiler())
//!     .port(Arc::new(SystemPortLayer::new()))
//!     .options(Options::default())
//!     .build()
//!     .expect("runtime assembles");
//! runtime.start(1).expect("workers start");
//! ```

use jitc_config::StrategyKind;
use jitc_controller::CompilationInfo;
use jitc_cpu::{CpuEntitlement, CpuUtilization};
use jitc_datacache::DataCacheManager;
use jitc_iprofiler::InterpreterProfiler;
use jitc_strategy::{
    CompilationStrategy, ControllerView, DefaultStrategy, InterpreterSamplingTracking,
    JitSampleInfo, MethodInfoRegistry, PlanPool, ProcessedEvent, StrategyEnv, ThresholdStrategy,
};
use jitc_vm::{PortLayer, RuntimeState, SharedCache, SystemPortLayer, VmRuntime};
use std::sync::Arc;

pub use jitc_config::Options;
pub use jitc_controller::{CompileDispatcher, CompileError, CompilePriority, YesNoMaybe};
pub use jitc_strategy::{MethodEvent, OptimizationPlan, Tier};

/// Errors from assembling the runtime.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The options failed validation.
    #[error("invalid options: {0}")]
    Config(#[from] jitc_config::Error),
    /// The data-cache manager could not initialize.
    #[error("data cache initialization failed: {0}")]
    DataCache(#[from] jitc_datacache::Error),
    /// The controller could not start.
    #[error("controller failed: {0}")]
    Controller(#[from] jitc_controller::Error),
    /// The profiler could not start.
    #[error("profiler failed: {0}")]
    Profiler(#[from] jitc_iprofiler::Error),
}

/// With strategy `none`, events produce no recompilations; only first
/// compiles from counter trips go through.
struct NoRecompilationStrategy {
    inner: DefaultStrategy,
}

impl CompilationStrategy for NoRecompilationStrategy {
    fn process_event(
        &self,
        event: &MethodEvent,
        controller: &dyn ControllerView,
    ) -> ProcessedEvent {
        match event {
            MethodEvent::InterpreterCounterTripped { .. }
            | MethodEvent::InterpretedMethodSample { .. }
            | MethodEvent::NewInstanceImpl { .. }
            | MethodEvent::ShareableMethodHandleThunk { .. }
            | MethodEvent::CustomMethodHandleThunk { .. }
            | MethodEvent::JitCompilationInducedByDlt { .. }
            | MethodEvent::MethodBodyInvalidated { .. } => {
                self.inner.process_event(event, controller)
            }
            _ => ProcessedEvent::none(),
        }
    }

    fn adjust_optimization_plan(&self, plan: &mut OptimizationPlan, delta: i32) -> bool {
        self.inner.adjust_optimization_plan(plan, delta)
    }

    fn before_code_gen(&self, plan: &OptimizationPlan, method: jitc_vm::MethodId) {
        self.inner.before_code_gen(plan, method);
    }

    fn post_compilation(
        &self,
        plan: Box<OptimizationPlan>,
        method: jitc_vm::MethodId,
        new_start_pc: Option<u64>,
    ) {
        self.inner.post_compilation(plan, method, new_start_pc);
    }
}

/// Builder for [`JitRuntime`].
pub struct JitRuntimeBuilder {
    vm: Arc<dyn VmRuntime>,
    dispatcher: Arc<dyn CompileDispatcher>,
    shared_cache: Option<Arc<dyn SharedCache>>,
    port: Option<Arc<dyn PortLayer>>,
    options: Options,
}

impl JitRuntimeBuilder {
    /// Attaches the shared class cache for cross-run profile persistence.
    #[must_use]
    pub fn shared_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    /// Uses the given port layer instead of the host default.
    #[must_use]
    pub fn port(mut self, port: Arc<dyn PortLayer>) -> Self {
        self.port = Some(port);
        self
    }

    /// Uses the given options instead of the defaults.
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Validates the options and wires everything together.
    pub fn build(self) -> Result<JitRuntime, BuildError> {
        self.options.validate()?;
        let port = self
            .port
            .unwrap_or_else(|| Arc::new(SystemPortLayer::new()) as Arc<dyn PortLayer>);
        let state = Arc::new(RuntimeState::new(port.target_cpu_count()));
        let profiler = Arc::new(InterpreterProfiler::new(
            Arc::clone(&self.vm),
            self.shared_cache,
            Arc::clone(&state),
            self.options.iprofiler.clone(),
        ));
        let cpu = Arc::new(CpuUtilization::new(Arc::clone(&port), &self.options.cpu));
        let entitlement = Arc::new(CpuEntitlement::new(Arc::clone(&port)));
        let data_cache = Arc::new(DataCacheManager::new(&self.options.datacache)?);
        let plan_pool = Arc::new(PlanPool::default());
        let registry = Arc::new(MethodInfoRegistry::new());
        let sample_info = Arc::new(JitSampleInfo::new());
        let sampling_tracking = Arc::new(InterpreterSamplingTracking::new());

        let env = || StrategyEnv {
            vm: Arc::clone(&self.vm),
            state: Arc::clone(&state),
            profiler: Arc::clone(&profiler),
            registry: Arc::clone(&registry),
            plan_pool: Arc::clone(&plan_pool),
            sample_info: Arc::clone(&sample_info),
            sampling_tracking: Arc::clone(&sampling_tracking),
            options: self.options.sampling.clone(),
        };
        let strategy: Arc<dyn CompilationStrategy> = match self.options.strategy {
            StrategyKind::Default => Arc::new(DefaultStrategy::new(env())),
            StrategyKind::Threshold => Arc::new(ThresholdStrategy::new(env())),
            StrategyKind::None => Arc::new(NoRecompilationStrategy {
                inner: DefaultStrategy::new(env()),
            }),
        };

        let controller = CompilationInfo::new(
            strategy,
            self.dispatcher,
            Arc::clone(&plan_pool),
            Arc::clone(&self.vm),
            Arc::clone(&state),
            Arc::clone(&cpu),
            Arc::clone(&entitlement),
            Arc::clone(&port),
            self.options.cpu.min_measurement_interval,
            self.options.controller.clone(),
        );
        profiler.set_promotion_sink(Arc::clone(&controller) as Arc<dyn jitc_iprofiler::PromotionSink>);

        Ok(JitRuntime {
            state,
            profiler,
            cpu,
            entitlement,
            data_cache,
            registry,
            sample_info,
            controller,
        })
    }
}

/// The assembled recompilation runtime.
pub struct JitRuntime {
    state: Arc<RuntimeState>,
    profiler: Arc<InterpreterProfiler>,
    cpu: Arc<CpuUtilization>,
    entitlement: Arc<CpuEntitlement>,
    data_cache: Arc<DataCacheManager>,
    registry: Arc<MethodInfoRegistry>,
    sample_info: Arc<JitSampleInfo>,
    controller: Arc<CompilationInfo>,
}

impl JitRuntime {
    /// Starts building a runtime over the VM and the compiler dispatcher.
    #[must_use]
    pub fn builder(
        vm: Arc<dyn VmRuntime>,
        dispatcher: Arc<dyn CompileDispatcher>,
    ) -> JitRuntimeBuilder {
        JitRuntimeBuilder {
            vm,
            dispatcher,
            shared_cache: None,
            port: None,
            options: Options::default(),
        }
    }

    /// Starts the profiler worker and `compilation_threads` workers.
    pub fn start(&self, compilation_threads: usize) -> Result<(), BuildError> {
        self.profiler.start_worker()?;
        self.controller
            .start_compilation_threads(compilation_threads)?;
        tracing::debug!(compilation_threads, "recompilation runtime started");
        Ok(())
    }

    /// Orderly shutdown: persist profiles, stop the pipelines.
    pub fn shutdown(&self) {
        self.profiler.persist_all_entries();
        self.profiler.stop_worker();
        self.controller.stop_compilation_threads();
        tracing::debug!("recompilation runtime stopped");
    }

    /// Routes one method event. Returns whether a compilation was queued.
    pub fn process_event(&self, event: &MethodEvent) -> bool {
        self.controller.process_event(event)
    }

    /// One sampling-thread tick: advances the low-resolution clock, the
    /// CPU readings, the profiler's read-failure epoch and the sampling
    /// density tracker.
    pub fn sampler_tick(&self, delta_ms: u64) {
        self.state.advance_elapsed(delta_ms);
        let _ = self.cpu.update();
        let _ = self.cpu.update_circular_buffer();
        self.profiler.advance_epoch();
        self.sample_info
            .update(self.state.elapsed_ms(), self.state.global_sample_count());
    }

    /// Records one sampling-thread observation of `method` and routes the
    /// corresponding event. `start_pc` distinguishes jitted from
    /// interpreted samples.
    pub fn sample_method(&self, method: jitc_vm::MethodId, start_pc: Option<u64>) -> bool {
        let _ = self.state.count_global_sample();
        let event = match start_pc {
            Some(start_pc) => MethodEvent::JittedMethodSample {
                method,
                start_pc,
                sample_pc: None,
            },
            None => MethodEvent::InterpretedMethodSample {
                method,
                sample_pc: None,
            },
        };
        self.process_event(&event)
    }

    /// The shared runtime state block (VM hooks update it).
    #[must_use]
    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    /// The interpreter profiler.
    #[must_use]
    pub fn profiler(&self) -> &Arc<InterpreterProfiler> {
        &self.profiler
    }

    /// The data-cache manager.
    #[must_use]
    pub fn data_cache(&self) -> &Arc<DataCacheManager> {
        &self.data_cache
    }

    /// The CPU utilization monitor.
    #[must_use]
    pub fn cpu(&self) -> &Arc<CpuUtilization> {
        &self.cpu
    }

    /// The CPU entitlement cache.
    #[must_use]
    pub fn entitlement(&self) -> &Arc<CpuEntitlement> {
        &self.entitlement
    }

    /// The method/body info registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<MethodInfoRegistry> {
        &self.registry
    }

    /// The compilation controller.
    #[must_use]
    pub fn controller(&self) -> &Arc<CompilationInfo> {
        &self.controller
    }
}
