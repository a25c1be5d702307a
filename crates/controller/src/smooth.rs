// SPDX-License-Identifier: Apache-2.0

//! Smooth compilation: keeping the queue digestible.
//!
//! When the backlog grows faster than the workers drain it, expensive
//! first-time compilations are downgraded to cold and flagged for a later
//! upgrade; when too many invalidation replacements pile up, those are
//! downgraded too. The goal is throughput smoothness, not fairness.

use crate::queue::{COLD_WEIGHT, entry_weight};
use crate::queue::MethodToBeCompiled;
use jitc_strategy::Tier;

/// Backlog weight past which first-time compilations are downgraded.
const DOWNGRADE_QUEUE_WEIGHT: i32 = 260;

/// Result of smoothing one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmoothingOutcome {
    /// Tier steps applied (negative = downgraded).
    pub opt_level_adjustment: i32,
}

/// Applies queue-pressure adjustments to an entry about to be queued.
pub fn smooth_compilation(
    entry: &mut MethodToBeCompiled,
    overall_queue_weight: i32,
    queued_invalidations: usize,
    invalidation_downgrade_threshold: usize,
    has_loops: bool,
) -> SmoothingOutcome {
    let mut adjustment = 0;

    // Invalidation storms: replacements beyond the threshold go cold, the
    // application is clearly redefining the world under us.
    if entry.is_invalidation_request
        && queued_invalidations > invalidation_downgrade_threshold
        && entry.plan.tier > Tier::Cold
    {
        adjustment = tier_distance(entry.plan.tier, Tier::Cold);
        entry.plan.tier = Tier::Cold;
        entry.plan.opt_level_downgraded = true;
        entry.weight = COLD_WEIGHT;
        return SmoothingOutcome {
            opt_level_adjustment: adjustment,
        };
    }

    // Backlog pressure: first-time compilations go cold with a deferred
    // upgrade instead of clogging the queue at warm.
    if entry.old_start_pc.is_none()
        && overall_queue_weight >= DOWNGRADE_QUEUE_WEIGHT
        && matches!(entry.plan.tier, Tier::Warm | Tier::Hot | Tier::VeryHot)
    {
        adjustment = tier_distance(entry.plan.tier, Tier::Cold);
        entry.plan.tier = Tier::Cold;
        entry.plan.insert_instrumentation = false;
        entry.plan.opt_level_downgraded = true;
        entry.plan.add_to_upgrade_queue = true;
        entry.weight = entry_weight(Tier::Cold, has_loops, false, false);
    }

    SmoothingOutcome {
        opt_level_adjustment: adjustment,
    }
}

fn tier_distance(from: Tier, to: Tier) -> i32 {
    i32::from(to.to_u8()) - i32::from(from.to_u8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitc_strategy::OptimizationPlan;
    use jitc_vm::MethodId;

    fn first_time_entry(tier: Tier) -> MethodToBeCompiled {
        MethodToBeCompiled {
            method: MethodId(1),
            old_start_pc: None,
            plan: Box::new(OptimizationPlan::new(tier)),
            weight: entry_weight(tier, false, false, false),
            is_sync: false,
            is_invalidation_request: false,
            entry_id: 1,
        }
    }

    #[test]
    fn light_queues_change_nothing() {
        let mut entry = first_time_entry(Tier::Warm);
        let outcome = smooth_compilation(&mut entry, 10, 0, 20, false);
        assert_eq!(outcome.opt_level_adjustment, 0);
        assert_eq!(entry.plan.tier, Tier::Warm);
    }

    #[test]
    fn heavy_queues_downgrade_first_time_compiles() {
        let mut entry = first_time_entry(Tier::Warm);
        let outcome = smooth_compilation(&mut entry, 300, 0, 20, false);
        assert!(outcome.opt_level_adjustment < 0);
        assert_eq!(entry.plan.tier, Tier::Cold);
        assert!(entry.plan.opt_level_downgraded);
        assert!(entry.plan.add_to_upgrade_queue);
        assert_eq!(entry.weight, COLD_WEIGHT);
    }

    #[test]
    fn recompilations_keep_their_tier_under_pressure() {
        let mut entry = first_time_entry(Tier::Hot);
        entry.old_start_pc = Some(0x9000);
        let outcome = smooth_compilation(&mut entry, 300, 0, 20, false);
        assert_eq!(outcome.opt_level_adjustment, 0);
        assert_eq!(entry.plan.tier, Tier::Hot);
    }

    #[test]
    fn invalidation_storms_go_cold() {
        let mut entry = first_time_entry(Tier::Hot);
        entry.is_invalidation_request = true;
        entry.old_start_pc = Some(0x9000);
        let outcome = smooth_compilation(&mut entry, 0, 25, 20, false);
        assert!(outcome.opt_level_adjustment < 0);
        assert_eq!(entry.plan.tier, Tier::Cold);
    }
}
