// SPDX-License-Identifier: Apache-2.0

//! Optimization plans and their pool.

use crate::tier::Tier;
use parking_lot::Mutex;

/// The strategy's output: how to compile a method.
///
/// Plans are plain data; the pool below recycles allocations. When a
/// caller pre-attached a plan to a method (synchronous recompilation), the
/// strategy clones the attached plan's decision fields onto a fresh pool
/// allocation rather than reusing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizationPlan {
    /// Target tier.
    pub tier: Tier,
    /// Compile a profiling-instrumented (very-hot) body.
    pub insert_instrumentation: bool,
    /// Keep sampling the resulting body.
    pub use_sampling: bool,
    /// The request came from a dynamic loop transfer.
    pub induced_by_dlt: bool,
    /// The tier was lowered from what the heuristics first chose.
    pub opt_level_downgraded: bool,
    /// Queue a later upgrade to win back the downgrade.
    pub add_to_upgrade_queue: bool,
    /// This plan upgrades a previously downgraded or AOT-loaded body.
    pub is_upgrade_recompilation: bool,
    /// Compile with relaxed inlining/size limits.
    pub relaxed_limits: bool,
    /// Do not divert this promotion into a profiling body.
    pub do_not_switch_to_profiling: bool,
    /// Method CPU share observed by sampling, in permille.
    pub perceived_cpu_util_permille: u32,
}

impl OptimizationPlan {
    /// A plain plan at `tier`, everything else off.
    #[must_use]
    pub fn new(tier: Tier) -> Self {
        OptimizationPlan {
            tier,
            insert_instrumentation: false,
            use_sampling: true,
            induced_by_dlt: false,
            opt_level_downgraded: false,
            add_to_upgrade_queue: false,
            is_upgrade_recompilation: false,
            relaxed_limits: false,
            do_not_switch_to_profiling: false,
            perceived_cpu_util_permille: 0,
        }
    }
}

/// Pool of reusable plan allocations, guarded by the plan monitor.
///
/// The pool exists to keep plan churn off the allocator during sampling
/// storms; it is bounded so a burst cannot pin memory forever.
pub struct PlanPool {
    pool: Mutex<Vec<Box<OptimizationPlan>>>,
    max_pooled: usize,
}

impl PlanPool {
    /// Creates a pool keeping at most `max_pooled` free plans.
    #[must_use]
    pub fn new(max_pooled: usize) -> Self {
        PlanPool {
            pool: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// Takes a plan from the pool (or allocates) and initializes it to a
    /// plain plan at `tier`.
    #[must_use]
    pub fn allocate(&self, tier: Tier) -> Box<OptimizationPlan> {
        let recycled = self.pool.lock().pop();
        match recycled {
            Some(mut plan) => {
                *plan = OptimizationPlan::new(tier);
                plan
            }
            None => Box::new(OptimizationPlan::new(tier)),
        }
    }

    /// Clones `source`'s decision fields onto a pool allocation.
    #[must_use]
    pub fn clone_plan(&self, source: &OptimizationPlan) -> Box<OptimizationPlan> {
        let mut plan = self.allocate(source.tier);
        (*plan).clone_from(source);
        plan
    }

    /// Returns a plan to the pool.
    pub fn release(&self, plan: Box<OptimizationPlan>) {
        let mut pool = self.pool.lock();
        if pool.len() < self.max_pooled {
            pool.push(plan);
        }
    }

    /// Free plans currently pooled.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.pool.lock().len()
    }
}

impl Default for PlanPool {
    fn default() -> Self {
        PlanPool::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_reuses_released_plans() {
        let pool = PlanPool::new(4);
        let plan = pool.allocate(Tier::Warm);
        pool.release(plan);
        assert_eq!(pool.pooled(), 1);
        let plan = pool.allocate(Tier::Hot);
        assert_eq!(pool.pooled(), 0);
        assert_eq!(plan.tier, Tier::Hot);
        assert!(!plan.insert_instrumentation, "recycled plans are reset");
    }

    #[test]
    fn clone_copies_every_decision_field() {
        let pool = PlanPool::new(4);
        let mut source = OptimizationPlan::new(Tier::VeryHot);
        source.insert_instrumentation = true;
        source.perceived_cpu_util_permille = 150;
        source.opt_level_downgraded = true;
        let clone = pool.clone_plan(&source);
        assert_eq!(*clone, source);
    }

    #[test]
    fn pool_is_bounded() {
        let pool = PlanPool::new(1);
        pool.release(Box::new(OptimizationPlan::new(Tier::Cold)));
        pool.release(Box::new(OptimizationPlan::new(Tier::Cold)));
        assert_eq!(pool.pooled(), 1);
    }
}
