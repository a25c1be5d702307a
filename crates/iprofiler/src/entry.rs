// SPDX-License-Identifier: Apache-2.0

//! Bytecode hashtable entries.
//!
//! One entry per profiled bytecode PC, in one of three representations
//! chosen by bytecode family. All counters are updated with atomics so
//! readers never lock; the only mutual exclusion is the per-entry persist
//! lock, taken when an entry is serialized or its call-graph slots are
//! rotated wholesale.

use arc_swap::ArcSwapOption;
use jitc_vm::ClassId;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering};

/// Call-graph slots per entry.
pub const NUM_CS_SLOTS: usize = 3;

/// Residue weights saturate at 15 bits.
const RESIDUE_SATURATION: u16 = 0x7FFF;

/// Weak-profile guard: a dominant class carrying less than this fraction of
/// the total weight is not reported.
const DOMINANT_MIN_RATIO: f32 = 0.1;

// Entry flag bits.
const FLAG_LOCKED: u8 = 1 << 0;
const FLAG_PERSISTENT_READ: u8 = 1 << 1;
const FLAG_CANNOT_PERSIST: u8 = 1 << 2;
const FLAG_INVALID: u8 = 1 << 3;

/// Two saturating 16-bit counters packed in one word, for conditionals.
#[derive(Debug, Default)]
pub struct BranchData {
    /// Taken in the high half, not-taken in the low half.
    packed: AtomicU32,
}

impl BranchData {
    /// Records one branch outcome. On saturation both counters are halved
    /// so the taken/not-taken ratio survives.
    pub fn add(&self, taken: bool) {
        let mut current = self.packed.load(Ordering::Acquire);
        loop {
            let (mut taken_count, mut not_taken_count) = unpack(current);
            if (taken && taken_count == u16::MAX) || (!taken && not_taken_count == u16::MAX) {
                taken_count >>= 1;
                not_taken_count >>= 1;
            }
            if taken {
                taken_count += 1;
            } else {
                not_taken_count += 1;
            }
            match self.packed.compare_exchange_weak(
                current,
                pack(taken_count, not_taken_count),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(seen) => current = seen,
            }
        }
    }

    /// (taken, not-taken) counts.
    #[must_use]
    pub fn counts(&self) -> (u16, u16) {
        unpack(self.packed.load(Ordering::Acquire))
    }

    /// Sum of both counters.
    #[must_use]
    pub fn sum(&self) -> u32 {
        let (taken, not_taken) = self.counts();
        u32::from(taken) + u32::from(not_taken)
    }

    pub(crate) fn set_counts(&self, taken: u16, not_taken: u16) {
        self.packed.store(pack(taken, not_taken), Ordering::Release);
    }
}

fn pack(taken: u16, not_taken: u16) -> u32 {
    (u32::from(taken) << 16) | u32::from(not_taken)
}

fn unpack(packed: u32) -> (u16, u16) {
    ((packed >> 16) as u16, (packed & 0xFFFF) as u16)
}

#[derive(Debug, Default)]
struct SwitchSlot {
    /// Operand value plus one; zero means the slot is unclaimed.
    value: AtomicU32,
    count: AtomicU32,
}

/// Per-target counts for switch bytecodes: three tracked operand values
/// plus an "other" segment absorbing the rest.
#[derive(Debug, Default)]
pub struct SwitchData {
    slots: [SwitchSlot; 4],
}

impl SwitchData {
    /// Records one switch operand.
    pub fn add(&self, operand: u32) {
        let encoded = operand.wrapping_add(1);
        for slot in &self.slots[..3] {
            let seen = slot.value.load(Ordering::Acquire);
            if seen == encoded {
                let _ = slot.count.fetch_add(1, Ordering::AcqRel);
                return;
            }
            if seen == 0
                && slot
                    .value
                    .compare_exchange(0, encoded, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                let _ = slot.count.fetch_add(1, Ordering::AcqRel);
                return;
            }
            // Lost the claim race; re-read in case the winner installed the
            // same operand.
            if slot.value.load(Ordering::Acquire) == encoded {
                let _ = slot.count.fetch_add(1, Ordering::AcqRel);
                return;
            }
        }
        let _ = self.slots[3].count.fetch_add(1, Ordering::AcqRel);
    }

    /// Count recorded for a specific operand, if tracked.
    #[must_use]
    pub fn count_for(&self, operand: u32) -> Option<u32> {
        let encoded = operand.wrapping_add(1);
        self.slots[..3]
            .iter()
            .find(|slot| slot.value.load(Ordering::Acquire) == encoded)
            .map(|slot| slot.count.load(Ordering::Acquire))
    }

    /// Count absorbed by the "other" segment.
    #[must_use]
    pub fn other_count(&self) -> u32 {
        self.slots[3].count.load(Ordering::Acquire)
    }

    /// Sum over all segments.
    #[must_use]
    pub fn sum(&self) -> u32 {
        self.slots
            .iter()
            .map(|slot| slot.count.load(Ordering::Acquire))
            .sum()
    }

    pub(crate) fn snapshot(&self) -> [(u32, u32); 4] {
        let mut out = [(0, 0); 4];
        for (slot, out) in self.slots.iter().zip(out.iter_mut()) {
            *out = (
                slot.value.load(Ordering::Acquire),
                slot.count.load(Ordering::Acquire),
            );
        }
        out
    }

    pub(crate) fn restore(&self, slots: [(u32, u32); 4]) {
        for (slot, (value, count)) in self.slots.iter().zip(slots) {
            slot.value.store(value, Ordering::Release);
            slot.count.store(count, Ordering::Release);
        }
    }
}

#[derive(Debug, Default)]
struct CallSlot {
    class: AtomicU64,
    weight: AtomicU16,
}

/// Receiver-class observations at an invoke or type-check site.
#[derive(Debug, Default)]
pub struct CallGraphData {
    slots: [CallSlot; NUM_CS_SLOTS],
    residue: AtomicU16,
    too_big: AtomicBool,
}

/// Plain copy of a call-graph entry's observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallGraphSnapshot {
    /// (class, weight) per slot; empty slots are `None`.
    pub slots: [(Option<ClassId>, u16); NUM_CS_SLOTS],
    /// Weight accumulated for classes outside the slots.
    pub residue: u16,
    /// Whether the inliner flagged the dominant target as too big.
    pub too_big_to_be_inlined: bool,
}

impl CallGraphData {
    /// Weight of the heaviest slot and the slot's class, ties broken by
    /// slot index. `None` when no slot is occupied.
    #[must_use]
    pub fn dominant_slot(&self) -> Option<(ClassId, u16)> {
        let mut best: Option<(ClassId, u16)> = None;
        for slot in &self.slots {
            let class = ClassId::from_raw(slot.class.load(Ordering::Acquire));
            let weight = slot.weight.load(Ordering::Acquire);
            if let Some(class) = class {
                match best {
                    Some((_, best_weight)) if best_weight >= weight => {}
                    _ => best = Some((class, weight)),
                }
            }
        }
        best
    }

    /// The dominant class, unless the profile is too flat to trust.
    #[must_use]
    pub fn data(&self) -> Option<ClassId> {
        let (class, max_weight) = self.dominant_slot()?;
        let sum = self.sum();
        if sum > 0 && (f32::from(max_weight) / sum as f32) < DOMINANT_MIN_RATIO {
            return None;
        }
        Some(class)
    }

    /// Total weight including the residue.
    #[must_use]
    pub fn sum(&self) -> u32 {
        let mut sum = u32::from(self.residue.load(Ordering::Acquire));
        for slot in &self.slots {
            sum += u32::from(slot.weight.load(Ordering::Acquire));
        }
        sum
    }

    /// Weight recorded for a specific class, zero when untracked.
    #[must_use]
    pub fn edge_weight(&self, class: ClassId) -> u16 {
        for slot in &self.slots {
            if slot.class.load(Ordering::Acquire) == class.0 {
                return slot.weight.load(Ordering::Acquire);
            }
        }
        0
    }

    /// Marks the dominant target as too big to inline.
    pub fn set_too_big_to_be_inlined(&self, too_big: bool) {
        self.too_big.store(too_big, Ordering::Release);
    }

    /// Whether the dominant target is flagged too big to inline.
    #[must_use]
    pub fn is_too_big_to_be_inlined(&self) -> bool {
        self.too_big.load(Ordering::Acquire)
    }

    /// Copies the observable state out.
    #[must_use]
    pub fn snapshot(&self) -> CallGraphSnapshot {
        let mut slots = [(None, 0); NUM_CS_SLOTS];
        for (slot, out) in self.slots.iter().zip(slots.iter_mut()) {
            *out = (
                ClassId::from_raw(slot.class.load(Ordering::Acquire)),
                slot.weight.load(Ordering::Acquire),
            );
        }
        CallGraphSnapshot {
            slots,
            residue: self.residue.load(Ordering::Acquire),
            too_big_to_be_inlined: self.too_big.load(Ordering::Acquire),
        }
    }

    pub(crate) fn restore(&self, snapshot: &CallGraphSnapshot) {
        for (slot, (class, weight)) in self.slots.iter().zip(snapshot.slots) {
            slot.class
                .store(class.map_or(0, |c| c.0), Ordering::Release);
            slot.weight.store(weight, Ordering::Release);
        }
        self.residue.store(snapshot.residue, Ordering::Release);
        self.too_big
            .store(snapshot.too_big_to_be_inlined, Ordering::Release);
    }

    fn add(&self, class: ClassId, freq: u16, entry: &ProfileEntry) {
        let mut max_weight: u16 = 0;
        for slot in &self.slots {
            let seen = slot.class.load(Ordering::Acquire);
            if seen == class.0 {
                let weight = slot.weight.load(Ordering::Acquire);
                slot.weight
                    .store(weight.saturating_add(freq), Ordering::Release);
                return;
            }
            if seen == 0 {
                if slot
                    .class
                    .compare_exchange(0, class.0, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    slot.weight.store(freq, Ordering::Release);
                    return;
                }
                if slot.class.load(Ordering::Acquire) == class.0 {
                    let weight = slot.weight.load(Ordering::Acquire);
                    slot.weight
                        .store(weight.saturating_add(freq), Ordering::Release);
                    return;
                }
            }
            max_weight = max_weight.max(slot.weight.load(Ordering::Acquire));
        }

        // No slot matched; the sample lands in the residue.
        let residue = self.residue.load(Ordering::Acquire);
        let new_residue = residue.saturating_add(freq).min(RESIDUE_SATURATION);
        self.residue.store(new_residue, Ordering::Release);

        // A residue outgrowing every tracked class means the site moved on
        // to classes we are not tracking: rotate slot 0 to the newcomer.
        // Rotation needs the entry lock so a concurrent persist never sees
        // a half-reset slot set; failing to get it just defers the rotation.
        if new_residue > max_weight && entry.lock_entry() {
            for slot in self.slots[1..].iter().rev() {
                slot.class.store(0, Ordering::Release);
                slot.weight.store(0, Ordering::Release);
            }
            self.slots[0].weight.store(freq, Ordering::Release);
            self.slots[0].class.store(class.0, Ordering::Release);
            self.residue.store(0, Ordering::Release);
            entry.release_entry();
        }
    }

    fn classes(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| ClassId::from_raw(slot.class.load(Ordering::Acquire)))
    }
}

/// The representation variants, tagged per bytecode family.
#[derive(Debug)]
pub enum EntryData {
    /// Conditional-branch counters.
    Branch(BranchData),
    /// Switch histograms.
    Switch(SwitchData),
    /// Receiver-class observations.
    CallGraph(CallGraphData),
}

/// One hashtable entry: a PC plus its profile representation.
#[derive(Debug)]
pub struct ProfileEntry {
    pc: u64,
    data: EntryData,
    /// Class-unload epoch the entry was last validated against.
    epoch: AtomicU64,
    flags: AtomicU8,
    /// Next entry in the bucket chain; published atomically.
    pub(crate) next: ArcSwapOption<ProfileEntry>,
}

impl ProfileEntry {
    /// Creates an entry for `pc` validated against `epoch`.
    #[must_use]
    pub fn new(pc: u64, data: EntryData, epoch: u64) -> Self {
        ProfileEntry {
            pc,
            data,
            epoch: AtomicU64::new(epoch),
            flags: AtomicU8::new(0),
            next: ArcSwapOption::const_empty(),
        }
    }

    /// The bytecode PC this entry profiles.
    #[must_use]
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// The representation variant.
    #[must_use]
    pub fn data(&self) -> &EntryData {
        &self.data
    }

    /// Records a branch outcome (branch entries only; others ignore it).
    pub fn add_branch_sample(&self, taken: bool) {
        if let EntryData::Branch(branch) = &self.data {
            branch.add(taken);
        }
    }

    /// Records a switch operand (switch entries only).
    pub fn add_switch_sample(&self, operand: u32) {
        if let EntryData::Switch(switch) = &self.data {
            switch.add(operand);
        }
    }

    /// Records a receiver class (call-graph entries only).
    pub fn add_class_sample(&self, class: ClassId, freq: u16) {
        if let EntryData::CallGraph(cg) = &self.data {
            cg.add(class, freq, self);
        }
    }

    /// Total sample mass in the entry, comparable across sources.
    #[must_use]
    pub fn sum_count(&self) -> u32 {
        match &self.data {
            EntryData::Branch(branch) => branch.sum(),
            EntryData::Switch(switch) => switch.sum(),
            EntryData::CallGraph(cg) => cg.sum(),
        }
    }

    /// Whether the entry holds any samples at all.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.sum_count() > 0
    }

    /// Tries to take the per-entry persist lock.
    #[must_use]
    pub fn lock_entry(&self) -> bool {
        self.flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |flags| {
                (flags & FLAG_LOCKED == 0).then_some(flags | FLAG_LOCKED)
            })
            .is_ok()
    }

    /// Releases the persist lock.
    pub fn release_entry(&self) {
        let _ = self.flags.fetch_and(!FLAG_LOCKED, Ordering::AcqRel);
    }

    /// Whether the persist lock is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_LOCKED != 0
    }

    /// Remembers that the shared cache was already consulted for this PC.
    pub fn set_persistent_entry_read(&self) {
        let _ = self.flags.fetch_or(FLAG_PERSISTENT_READ, Ordering::AcqRel);
    }

    /// Whether the shared cache was already consulted for this PC.
    #[must_use]
    pub fn is_persistent_entry_read(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_PERSISTENT_READ != 0
    }

    /// Permanently excludes the entry from persistence (used for entries
    /// that themselves came out of the shared cache).
    pub fn set_cannot_persist(&self) {
        let _ = self.flags.fetch_or(FLAG_CANNOT_PERSIST, Ordering::AcqRel);
    }

    /// Whether the entry may be persisted.
    #[must_use]
    pub fn can_persist(&self) -> bool {
        self.flags.load(Ordering::Acquire) & (FLAG_CANNOT_PERSIST | FLAG_INVALID) == 0
    }

    /// Whether the entry was invalidated by class unloading.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_INVALID != 0
    }

    /// Checks the entry against the global class-unload epoch, marking it
    /// invalid when it references an unloaded class. Returns `true` when
    /// the entry remains usable.
    pub fn validate(&self, current_epoch: u64, is_unloaded: impl Fn(ClassId) -> bool) -> bool {
        if self.is_invalid() {
            return false;
        }
        if self.epoch.load(Ordering::Acquire) == current_epoch {
            return true;
        }
        if let EntryData::CallGraph(cg) = &self.data {
            if cg.classes().any(is_unloaded) {
                let _ = self.flags.fetch_or(FLAG_INVALID, Ordering::AcqRel);
                return false;
            }
        }
        self.epoch.store(current_epoch, Ordering::Release);
        true
    }

    /// Copies the other entry's samples into this one (two-source merge).
    pub fn copy_from(&self, other: &ProfileEntry) {
        match (&self.data, &other.data) {
            (EntryData::Branch(dst), EntryData::Branch(src)) => {
                let (taken, not_taken) = src.counts();
                dst.set_counts(taken, not_taken);
            }
            (EntryData::Switch(dst), EntryData::Switch(src)) => {
                dst.restore(src.snapshot());
            }
            (EntryData::CallGraph(dst), EntryData::CallGraph(src)) => {
                dst.restore(&src.snapshot());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_counters_saturate_by_halving() {
        let branch = BranchData::default();
        branch.set_counts(u16::MAX, 100);
        branch.add(true);
        let (taken, not_taken) = branch.counts();
        assert_eq!(taken, (u16::MAX >> 1) + 1);
        assert_eq!(not_taken, 50, "both halves shrink together");
    }

    #[test]
    fn switch_overflow_lands_in_other() {
        let switch = SwitchData::default();
        switch.add(7);
        switch.add(7);
        switch.add(8);
        switch.add(9);
        switch.add(10); // fourth distinct value: other segment
        assert_eq!(switch.count_for(7), Some(2));
        assert_eq!(switch.count_for(8), Some(1));
        assert_eq!(switch.count_for(10), None);
        assert_eq!(switch.other_count(), 1);
        assert_eq!(switch.sum(), 5);
    }

    #[test]
    fn dominant_class_ties_break_by_slot_index() {
        let entry = ProfileEntry::new(0x10, EntryData::CallGraph(CallGraphData::default()), 0);
        entry.add_class_sample(ClassId(1), 5);
        entry.add_class_sample(ClassId(2), 5);
        let EntryData::CallGraph(cg) = entry.data() else {
            unreachable!()
        };
        assert_eq!(cg.dominant_slot(), Some((ClassId(1), 5)));
    }

    #[test]
    fn residue_overflow_rotates_slot_zero() {
        let entry = ProfileEntry::new(0x10, EntryData::CallGraph(CallGraphData::default()), 0);
        entry.add_class_sample(ClassId(1), 2);
        entry.add_class_sample(ClassId(2), 1);
        entry.add_class_sample(ClassId(3), 1);
        // Slots are full; this class accumulates residue past the max
        // slot weight and takes over slot 0.
        entry.add_class_sample(ClassId(9), 3);
        let EntryData::CallGraph(cg) = entry.data() else {
            unreachable!()
        };
        let snapshot = cg.snapshot();
        assert_eq!(snapshot.slots[0], (Some(ClassId(9)), 3));
        assert_eq!(snapshot.slots[1], (None, 0));
        assert_eq!(snapshot.slots[2], (None, 0));
        assert_eq!(snapshot.residue, 0);
    }

    #[test]
    fn weight_sum_respects_saturation_bound() {
        let entry = ProfileEntry::new(0x10, EntryData::CallGraph(CallGraphData::default()), 0);
        for _ in 0..10 {
            entry.add_class_sample(ClassId(1), u16::MAX);
        }
        let EntryData::CallGraph(cg) = entry.data() else {
            unreachable!()
        };
        let snapshot = cg.snapshot();
        let sum: u32 = snapshot
            .slots
            .iter()
            .map(|&(_, weight)| u32::from(weight))
            .sum::<u32>()
            + u32::from(snapshot.residue);
        assert!(sum <= u32::from(u16::MAX) + u32::from(RESIDUE_SATURATION) * 3);
        assert_eq!(snapshot.slots[0].1, u16::MAX);
    }

    #[test]
    fn weak_profiles_are_not_reported() {
        let entry = ProfileEntry::new(0x10, EntryData::CallGraph(CallGraphData::default()), 0);
        entry.add_class_sample(ClassId(1), 1);
        entry.add_class_sample(ClassId(2), 100);
        let EntryData::CallGraph(cg) = entry.data() else {
            unreachable!()
        };
        assert_eq!(cg.data(), Some(ClassId(2)));
        // A profile whose dominant class carries under 10% of the weight is
        // too flat to act on.
        let weak = CallGraphData::default();
        weak.restore(&CallGraphSnapshot {
            slots: [
                (Some(ClassId(1)), 1),
                (Some(ClassId(2)), 4),
                (Some(ClassId(3)), 1),
            ],
            residue: 64,
            too_big_to_be_inlined: false,
        });
        assert_eq!(weak.dominant_slot(), Some((ClassId(2), 4)));
        assert_eq!(weak.data(), None);
    }

    #[test]
    fn entry_lock_is_exclusive() {
        let entry = ProfileEntry::new(0x10, EntryData::Branch(BranchData::default()), 0);
        assert!(entry.lock_entry());
        assert!(!entry.lock_entry());
        entry.release_entry();
        assert!(entry.lock_entry());
    }

    #[test]
    fn epoch_mismatch_invalidates_unloaded_classes() {
        let entry = ProfileEntry::new(0x10, EntryData::CallGraph(CallGraphData::default()), 0);
        entry.add_class_sample(ClassId(5), 10);
        assert!(entry.validate(0, |_| false));
        // Epoch moved and the class is gone.
        assert!(!entry.validate(1, |class| class == ClassId(5)));
        assert!(entry.is_invalid());
        // Invalidation is sticky.
        assert!(!entry.validate(2, |_| false));
    }

    #[test]
    fn epoch_advances_for_surviving_entries() {
        let entry = ProfileEntry::new(0x10, EntryData::Branch(BranchData::default()), 0);
        assert!(entry.validate(3, |_| true));
        assert!(entry.validate(3, |_| true));
    }
}
