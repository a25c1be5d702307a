// SPDX-License-Identifier: Apache-2.0

//! Per-method and per-body persistent state.

use crate::plan::OptimizationPlan;
use crate::tier::Tier;
use jitc_vm::MethodId;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Why a recompilation was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecompReason {
    /// Sampling density crossed a promotion threshold.
    DueToThreshold,
    /// The body counter counted down to zero.
    DueToCounterZero,
    /// In-code events (megamorphic sites, PIC misses) drained the counter.
    DueToMegamorphicCallProfile,
    /// Upgrade of a downgraded or AOT-loaded body.
    DueToOptLevelUpgrade,
    /// An inlined method was redefined.
    DueToInlinedMethodRedefinition,
    /// JProfiling wants an instrumented body.
    DueToJProfiling,
    /// The hardware profiler asked for it.
    DueToRi,
    /// Batch recompilation pushing.
    DueToRecompilationPushing,
}

#[derive(Debug)]
struct MethodInfoInner {
    current_tier: Tier,
    next_tier: Option<Tier>,
    reason: Option<RecompReason>,
    invalidations: u32,
    opt_level_downgraded: bool,
    disable_misc_sampling_counter_decrementation: bool,
    profiling_disabled: bool,
    attached_plan: Option<Box<OptimizationPlan>>,
    /// The pending recompilation was triggered by a GCR counter.
    gcr_trip: bool,
    /// Countdown loaded into the next body's counter.
    next_counter: i32,
    /// Sample counter of the threshold strategy.
    cpo_sample_counter: u32,
}

/// Recompilation bookkeeping that outlives individual bodies.
#[derive(Debug)]
pub struct PersistentMethodInfo {
    inner: Mutex<MethodInfoInner>,
}

impl PersistentMethodInfo {
    /// Fresh info for a method first compiled at `tier`.
    #[must_use]
    pub fn new(tier: Tier) -> Self {
        PersistentMethodInfo {
            inner: Mutex::new(MethodInfoInner {
                current_tier: tier,
                next_tier: None,
                reason: None,
                invalidations: 0,
                opt_level_downgraded: false,
                disable_misc_sampling_counter_decrementation: false,
                profiling_disabled: false,
                attached_plan: None,
                gcr_trip: false,
                next_counter: 0,
                cpo_sample_counter: 0,
            }),
        }
    }

    /// The tier of the current body.
    #[must_use]
    pub fn current_tier(&self) -> Tier {
        self.inner.lock().current_tier
    }

    /// Moves the method to `tier` (post-compilation).
    pub fn set_current_tier(&self, tier: Tier) {
        self.inner.lock().current_tier = tier;
    }

    /// The tier the next recompilation should target, when decided.
    #[must_use]
    pub fn next_tier(&self) -> Option<Tier> {
        self.inner.lock().next_tier
    }

    /// Sets the target of the next recompilation.
    pub fn set_next_tier(&self, tier: Option<Tier>) {
        self.inner.lock().next_tier = tier;
    }

    /// Reason recorded for the pending recompilation.
    #[must_use]
    pub fn reason(&self) -> Option<RecompReason> {
        self.inner.lock().reason
    }

    /// Records why the pending recompilation was decided.
    pub fn set_reason(&self, reason: Option<RecompReason>) {
        self.inner.lock().reason = reason;
    }

    /// How many bodies of this method have been invalidated.
    #[must_use]
    pub fn invalidations(&self) -> u32 {
        self.inner.lock().invalidations
    }

    /// Counts one body invalidation.
    pub fn count_invalidation(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.invalidations += 1;
        inner.invalidations
    }

    /// Whether the method currently runs below its deserved tier.
    #[must_use]
    pub fn is_opt_level_downgraded(&self) -> bool {
        self.inner.lock().opt_level_downgraded
    }

    /// Marks (or clears) the downgraded state.
    pub fn set_opt_level_downgraded(&self, downgraded: bool) {
        self.inner.lock().opt_level_downgraded = downgraded;
    }

    /// Whether misc in-code counter decrements are ignored from now on.
    #[must_use]
    pub fn is_misc_counter_decrement_disabled(&self) -> bool {
        self.inner.lock().disable_misc_sampling_counter_decrementation
    }

    /// Stops misc in-code events from draining the body counter again.
    pub fn disable_misc_counter_decrement(&self) {
        self.inner.lock().disable_misc_sampling_counter_decrementation = true;
    }

    /// Whether profiling bodies are forbidden for this method.
    #[must_use]
    pub fn is_profiling_disabled(&self) -> bool {
        self.inner.lock().profiling_disabled
    }

    /// Forbids (or re-allows) profiling bodies for this method.
    pub fn set_profiling_disabled(&self, disabled: bool) {
        self.inner.lock().profiling_disabled = disabled;
    }

    /// Attaches a caller-built plan for a synchronous recompilation.
    pub fn attach_plan(&self, plan: Box<OptimizationPlan>) {
        self.inner.lock().attached_plan = Some(plan);
    }

    /// Takes the attached plan, if any.
    #[must_use]
    pub fn detach_plan(&self) -> Option<Box<OptimizationPlan>> {
        self.inner.lock().attached_plan.take()
    }

    /// Copy of the attached plan's fields, when one is attached.
    #[must_use]
    pub fn attached_plan_copy(&self) -> Option<OptimizationPlan> {
        self.inner.lock().attached_plan.as_deref().cloned()
    }

    /// Records that the pending recompilation came from a GCR counter.
    pub fn set_gcr_trip(&self, gcr: bool) {
        self.inner.lock().gcr_trip = gcr;
    }

    /// Takes (and clears) the GCR-origin marker.
    #[must_use]
    pub fn take_gcr_trip(&self) -> bool {
        std::mem::take(&mut self.inner.lock().gcr_trip)
    }

    /// Countdown the next compiled body starts with.
    #[must_use]
    pub fn next_counter(&self) -> i32 {
        self.inner.lock().next_counter
    }

    /// Plans the countdown for the next compiled body.
    pub fn set_next_counter(&self, counter: i32) {
        self.inner.lock().next_counter = counter;
    }

    /// Bumps the threshold strategy's sample counter; returns the new count.
    pub fn count_cpo_sample(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.cpo_sample_counter += 1;
        inner.cpo_sample_counter
    }

    /// Resets the threshold strategy's sample counter.
    pub fn reset_cpo_samples(&self) {
        self.inner.lock().cpo_sample_counter = 0;
    }
}

/// Per-compiled-body state, updated by the sampling thread.
#[derive(Debug)]
pub struct PersistentJittedBodyInfo {
    hotness: AtomicU8,
    /// Counts down on every jitted sample and on select in-code events;
    /// hitting zero is its own recompilation signal.
    counter: AtomicI32,
    /// Samples of this body inside the current hot window.
    sample_interval_count: AtomicU32,
    /// Samples of this body since creation.
    total_samples: AtomicU32,
    /// Global sample count when the current hot window opened.
    hot_start_count: AtomicU64,
    /// Global sample count when the current scorching window opened.
    start_count: AtomicU64,
    /// Samples of this body inside the current scorching window.
    scorching_window_samples: AtomicU32,
    aggressive_recomp_chances: AtomicU8,
    sampling_recomp_decided: AtomicBool,
    postponed_decision: AtomicBool,
    disable_sampling: AtomicBool,
    is_profiling_body: AtomicBool,
    uses_jprofiling: AtomicBool,
    uses_gcr: AtomicBool,
    long_running_interpreted: AtomicBool,
    is_aot_body: AtomicBool,
    opt_level_downgraded: AtomicBool,
}

impl PersistentJittedBodyInfo {
    /// Chances a fresh body gets at the softer promotion criteria.
    pub const DEFAULT_AGGRESSIVE_CHANCES: u8 = 3;

    /// State for a body compiled at `hotness`, with its countdown counter
    /// loaded and windows opened at `global_now`.
    #[must_use]
    pub fn new(hotness: Tier, counter: i32, global_now: u64) -> Self {
        PersistentJittedBodyInfo {
            hotness: AtomicU8::new(hotness.to_u8()),
            counter: AtomicI32::new(counter),
            sample_interval_count: AtomicU32::new(0),
            total_samples: AtomicU32::new(0),
            hot_start_count: AtomicU64::new(global_now),
            start_count: AtomicU64::new(global_now),
            scorching_window_samples: AtomicU32::new(0),
            aggressive_recomp_chances: AtomicU8::new(Self::DEFAULT_AGGRESSIVE_CHANCES),
            sampling_recomp_decided: AtomicBool::new(false),
            postponed_decision: AtomicBool::new(false),
            disable_sampling: AtomicBool::new(false),
            is_profiling_body: AtomicBool::new(false),
            uses_jprofiling: AtomicBool::new(false),
            uses_gcr: AtomicBool::new(false),
            long_running_interpreted: AtomicBool::new(false),
            is_aot_body: AtomicBool::new(false),
            opt_level_downgraded: AtomicBool::new(false),
        }
    }

    /// The body's tier.
    #[must_use]
    pub fn hotness(&self) -> Tier {
        Tier::from_u8(self.hotness.load(Ordering::Acquire))
    }

    /// Current countdown value.
    #[must_use]
    pub fn counter(&self) -> i32 {
        self.counter.load(Ordering::Acquire)
    }

    /// Counts down by `by`; returns the new value.
    pub fn decrement_counter(&self, by: i32) -> i32 {
        self.counter.fetch_sub(by, Ordering::AcqRel) - by
    }

    /// Refills the counter (sampling thread only, on window completion).
    pub fn set_counter(&self, value: i32) {
        self.counter.store(value, Ordering::Release);
    }

    /// Counts a sample into the hot window; returns the new window count.
    pub fn count_window_sample(&self) -> u32 {
        let _ = self.total_samples.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .scorching_window_samples
            .fetch_add(1, Ordering::Relaxed);
        self.sample_interval_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Samples of this body since creation.
    #[must_use]
    pub fn total_samples(&self) -> u32 {
        self.total_samples.load(Ordering::Relaxed)
    }

    /// Closes the hot window: resets its sample count and returns the
    /// global sample count at which it had opened, replacing it with
    /// `global_now`.
    pub fn close_hot_window(&self, global_now: u64) -> u64 {
        self.sample_interval_count.store(0, Ordering::Release);
        self.hot_start_count.swap(global_now, Ordering::AcqRel)
    }

    /// Samples of this body inside the current scorching window.
    #[must_use]
    pub fn scorching_window_samples(&self) -> u32 {
        self.scorching_window_samples.load(Ordering::Acquire)
    }

    /// Closes the scorching window, analogous to
    /// [`close_hot_window`](Self::close_hot_window).
    pub fn close_scorching_window(&self, global_now: u64) -> u64 {
        self.scorching_window_samples.store(0, Ordering::Release);
        self.postponed_decision.store(false, Ordering::Release);
        self.start_count.swap(global_now, Ordering::AcqRel)
    }

    /// Global sample count when the scorching window opened.
    #[must_use]
    pub fn scorching_window_start(&self) -> u64 {
        self.start_count.load(Ordering::Acquire)
    }

    /// Takes one chance at the softer promotion criteria; `false` when
    /// exhausted.
    pub fn take_aggressive_chance(&self) -> bool {
        self.aggressive_recomp_chances
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |chances| {
                chances.checked_sub(1)
            })
            .is_ok()
    }

    /// Remaining chances at the softer criteria.
    #[must_use]
    pub fn aggressive_recomp_chances(&self) -> u8 {
        self.aggressive_recomp_chances.load(Ordering::Acquire)
    }

    /// Marks the one-shot sampling recompilation decision. Returns `false`
    /// when it was already taken. Callers hold the compilation lock.
    pub fn try_decide_sampling_recomp(&self) -> bool {
        !self.sampling_recomp_decided.swap(true, Ordering::AcqRel)
    }

    /// Whether a sampling recompilation was already decided for this body.
    #[must_use]
    pub fn is_sampling_recomp_decided(&self) -> bool {
        self.sampling_recomp_decided.load(Ordering::Acquire)
    }

    /// Flags a scorching decision waiting for its window to complete.
    pub fn set_postponed_decision(&self, postponed: bool) {
        self.postponed_decision.store(postponed, Ordering::Release);
    }

    /// Whether a scorching decision is pending the longer window.
    #[must_use]
    pub fn is_decision_postponed(&self) -> bool {
        self.postponed_decision.load(Ordering::Acquire)
    }

    /// Stops the sampling thread from looking at this body again.
    pub fn set_disable_sampling(&self, disable: bool) {
        self.disable_sampling.store(disable, Ordering::Release);
    }

    /// Whether sampling is off for this body.
    #[must_use]
    pub fn is_sampling_disabled(&self) -> bool {
        self.disable_sampling.load(Ordering::Acquire)
    }

    /// Marks the body as profiling-instrumented.
    pub fn set_profiling_body(&self, profiling: bool) {
        self.is_profiling_body.store(profiling, Ordering::Release);
    }

    /// Whether the body is profiling-instrumented.
    #[must_use]
    pub fn is_profiling_body(&self) -> bool {
        self.is_profiling_body.load(Ordering::Acquire)
    }

    /// Marks the body as carrying JProfiling instrumentation.
    pub fn set_uses_jprofiling(&self, uses: bool) {
        self.uses_jprofiling.store(uses, Ordering::Release);
    }

    /// Whether the body carries JProfiling instrumentation.
    #[must_use]
    pub fn uses_jprofiling(&self) -> bool {
        self.uses_jprofiling.load(Ordering::Acquire)
    }

    /// Marks the body as using guarded counting recompilation.
    pub fn set_uses_gcr(&self, uses: bool) {
        self.uses_gcr.store(uses, Ordering::Release);
    }

    /// Whether the body uses guarded counting recompilation.
    #[must_use]
    pub fn uses_gcr(&self) -> bool {
        self.uses_gcr.load(Ordering::Acquire)
    }

    /// Marks the method as having run interpreted for a long time.
    pub fn set_long_running_interpreted(&self, long: bool) {
        self.long_running_interpreted.store(long, Ordering::Release);
    }

    /// Whether the method ran interpreted for a long time before this body.
    #[must_use]
    pub fn is_long_running_interpreted(&self) -> bool {
        self.long_running_interpreted.load(Ordering::Acquire)
    }

    /// Marks the body as loaded from the AOT store.
    pub fn set_aot_body(&self, aot: bool) {
        self.is_aot_body.store(aot, Ordering::Release);
    }

    /// Whether the body was loaded from the AOT store.
    #[must_use]
    pub fn is_aot_body(&self) -> bool {
        self.is_aot_body.load(Ordering::Acquire)
    }

    /// Marks the body as compiled below its deserved tier.
    pub fn set_opt_level_downgraded(&self, downgraded: bool) {
        self.opt_level_downgraded.store(downgraded, Ordering::Release);
    }

    /// Whether the body was compiled below its deserved tier.
    #[must_use]
    pub fn is_opt_level_downgraded(&self) -> bool {
        self.opt_level_downgraded.load(Ordering::Acquire)
    }
}

/// Shared registry of method info and body info, keyed by method id and
/// body entry point respectively.
#[derive(Default)]
pub struct MethodInfoRegistry {
    methods: RwLock<hashbrown::HashMap<MethodId, Arc<PersistentMethodInfo>, ahash::RandomState>>,
    bodies: RwLock<hashbrown::HashMap<u64, Arc<PersistentJittedBodyInfo>, ahash::RandomState>>,
}

impl MethodInfoRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        MethodInfoRegistry::default()
    }

    /// Looks up the method's info.
    #[must_use]
    pub fn method_info(&self, method: MethodId) -> Option<Arc<PersistentMethodInfo>> {
        self.methods.read().get(&method).cloned()
    }

    /// Looks up or creates the method's info, starting at `tier`.
    pub fn get_or_create_method_info(
        &self,
        method: MethodId,
        tier: Tier,
    ) -> Arc<PersistentMethodInfo> {
        if let Some(info) = self.method_info(method) {
            return info;
        }
        let mut methods = self.methods.write();
        Arc::clone(
            methods
                .entry(method)
                .or_insert_with(|| Arc::new(PersistentMethodInfo::new(tier))),
        )
    }

    /// Registers a fresh body at `start_pc`.
    pub fn register_body(&self, start_pc: u64, info: Arc<PersistentJittedBodyInfo>) {
        let _ = self.bodies.write().insert(start_pc, info);
    }

    /// Looks up the body at `start_pc`.
    #[must_use]
    pub fn body_info(&self, start_pc: u64) -> Option<Arc<PersistentJittedBodyInfo>> {
        self.bodies.read().get(&start_pc).cloned()
    }

    /// Forgets the body at `start_pc` (invalidation, replacement).
    pub fn remove_body(&self, start_pc: u64) {
        let _ = self.bodies.write().remove(&start_pc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_recomp_is_decided_once() {
        let body = PersistentJittedBodyInfo::new(Tier::Warm, 30, 0);
        assert!(body.try_decide_sampling_recomp());
        assert!(!body.try_decide_sampling_recomp());
        assert!(body.is_sampling_recomp_decided());
    }

    #[test]
    fn aggressive_chances_run_out() {
        let body = PersistentJittedBodyInfo::new(Tier::Warm, 30, 0);
        let mut taken = 0;
        while body.take_aggressive_chance() {
            taken += 1;
        }
        assert_eq!(
            taken,
            u32::from(PersistentJittedBodyInfo::DEFAULT_AGGRESSIVE_CHANCES)
        );
        assert!(!body.take_aggressive_chance());
    }

    #[test]
    fn windows_track_global_counts() {
        let body = PersistentJittedBodyInfo::new(Tier::Warm, 30, 100);
        let _ = body.count_window_sample();
        let _ = body.count_window_sample();
        assert_eq!(body.scorching_window_samples(), 2);
        let opened_at = body.close_hot_window(250);
        assert_eq!(opened_at, 100);
        let opened_at = body.close_scorching_window(250);
        assert_eq!(opened_at, 100);
        assert_eq!(body.scorching_window_samples(), 0);
    }

    #[test]
    fn registry_round_trips() {
        let registry = MethodInfoRegistry::new();
        let info = registry.get_or_create_method_info(MethodId(1), Tier::Warm);
        assert!(Arc::ptr_eq(
            &info,
            &registry.get_or_create_method_info(MethodId(1), Tier::Cold)
        ));
        let body = Arc::new(PersistentJittedBodyInfo::new(Tier::Warm, 30, 0));
        registry.register_body(0x5000, Arc::clone(&body));
        assert!(Arc::ptr_eq(
            &body,
            &registry.body_info(0x5000).expect("registered")
        ));
        registry.remove_body(0x5000);
        assert!(registry.body_info(0x5000).is_none());
    }
}
