// SPDX-License-Identifier: Apache-2.0

//! The caller→callee fan-in table.
//!
//! For every callee the profiler remembers which call sites reach it and
//! how often, up to a capacity cap; weight beyond the cap pools in an
//! "other" bucket that is never displaced. The inliner uses this to judge
//! upstream pressure on a callee it considers inlining.

use hashbrown::HashMap;
use jitc_vm::MethodId;
use parking_lot::RwLock;
use smallvec::SmallVec;

/// One observed call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Caller {
    method: MethodId,
    bytecode_index: u32,
    weight: u32,
}

#[derive(Debug, Default)]
struct FanInEntry {
    /// Most recent callers first.
    callers: SmallVec<[Caller; 4]>,
    other_weight: u32,
}

/// Aggregate fan-in facts for one callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanInInfo {
    /// Distinct tracked call sites.
    pub caller_count: usize,
    /// Total weight across tracked call sites.
    pub total_weight: u32,
    /// Weight absorbed by the "other" bucket.
    pub other_weight: u32,
}

/// The fan-in table.
pub struct FanInTable {
    entries: RwLock<HashMap<MethodId, FanInEntry, ahash::RandomState>>,
    max_callers: usize,
}

impl FanInTable {
    /// Creates a table pre-sized for `capacity` callees, capping each
    /// callee at `max_callers` tracked sites.
    #[must_use]
    pub fn new(capacity: usize, max_callers: usize) -> Self {
        FanInTable {
            entries: RwLock::new(HashMap::with_capacity_and_hasher(
                capacity,
                ahash::RandomState::default(),
            )),
            max_callers: max_callers.max(1),
        }
    }

    /// Records one call from `(caller, bytecode_index)` into `callee`.
    pub fn add(&self, caller: MethodId, bytecode_index: u32, callee: MethodId) {
        let mut entries = self.entries.write();
        let entry = entries.entry(callee).or_default();
        if let Some(site) = entry
            .callers
            .iter_mut()
            .find(|site| site.method == caller && site.bytecode_index == bytecode_index)
        {
            site.weight = site.weight.saturating_add(1);
            return;
        }
        if entry.callers.len() < self.max_callers {
            // New callers link at the head.
            entry.callers.insert(
                0,
                Caller {
                    method: caller,
                    bytecode_index,
                    weight: 1,
                },
            );
        } else {
            entry.other_weight = entry.other_weight.saturating_add(1);
        }
    }

    /// Aggregate facts for a callee.
    #[must_use]
    pub fn info(&self, callee: MethodId) -> Option<FanInInfo> {
        let entries = self.entries.read();
        let entry = entries.get(&callee)?;
        Some(FanInInfo {
            caller_count: entry.callers.len(),
            total_weight: entry.callers.iter().map(|site| site.weight).sum(),
            other_weight: entry.other_weight,
        })
    }

    /// Weight observed from one specific call site, when tracked.
    #[must_use]
    pub fn caller_weight(
        &self,
        callee: MethodId,
        caller: MethodId,
        bytecode_index: u32,
    ) -> Option<u32> {
        let entries = self.entries.read();
        let entry = entries.get(&callee)?;
        entry
            .callers
            .iter()
            .find(|site| site.method == caller && site.bytecode_index == bytecode_index)
            .map(|site| site.weight)
    }

    /// Drops every record mentioning `method`, as caller or callee.
    pub fn purge_method(&self, method: MethodId) {
        let mut entries = self.entries.write();
        let _ = entries.remove(&method);
        for entry in entries.values_mut() {
            entry.callers.retain(|site| site.method != method);
        }
    }
}
