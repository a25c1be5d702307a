// SPDX-License-Identifier: Apache-2.0

//! The bytecode-PC hashtable.
//!
//! Power-of-two bucket array; each bucket is a singly-linked chain of
//! [`ProfileEntry`]s published through atomic head swaps. Readers traverse
//! without locks. Racing inserters may build duplicate entries; the loser
//! rechecks the chain on commit and discards its own entry.

use crate::entry::{EntryData, ProfileEntry};
use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// The hashtable.
pub struct BytecodeTable {
    buckets: Box<[ArcSwapOption<ProfileEntry>]>,
    mask: u64,
}

impl BytecodeTable {
    /// Creates a table with `size` buckets (`size` is a power of two,
    /// enforced by config validation).
    #[must_use]
    pub fn new(size: usize) -> Self {
        let buckets: Vec<ArcSwapOption<ProfileEntry>> =
            (0..size).map(|_| ArcSwapOption::const_empty()).collect();
        BytecodeTable {
            buckets: buckets.into_boxed_slice(),
            mask: (size as u64) - 1,
        }
    }

    fn bucket(&self, pc: u64) -> &ArcSwapOption<ProfileEntry> {
        // Fibonacci hashing over the PC; the low two bits are alignment
        // noise on every target we care about.
        let hash = (pc >> 2).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        &self.buckets[((hash >> 16) & self.mask) as usize]
    }

    fn scan(head: &Option<Arc<ProfileEntry>>, pc: u64) -> Option<Arc<ProfileEntry>> {
        let mut cursor = head.clone();
        while let Some(entry) = cursor {
            if entry.pc() == pc {
                return Some(entry);
            }
            cursor = entry.next.load_full();
        }
        None
    }

    /// Lock-free lookup.
    #[must_use]
    pub fn find(&self, pc: u64) -> Option<Arc<ProfileEntry>> {
        Self::scan(&self.bucket(pc).load_full(), pc)
    }

    /// Finds the entry for `pc`, creating it with `make_data` when absent.
    ///
    /// The entry is linked at the bucket head. When two threads race, one
    /// publication wins and the other thread's freshly built entry is
    /// dropped in favour of the winner's.
    pub fn find_or_create(
        &self,
        pc: u64,
        epoch: u64,
        make_data: impl Fn() -> EntryData,
    ) -> Arc<ProfileEntry> {
        let bucket = self.bucket(pc);
        if let Some(existing) = Self::scan(&bucket.load_full(), pc) {
            return existing;
        }
        let mut result: Option<Arc<ProfileEntry>> = None;
        let _previous = bucket.rcu(|head| {
            if let Some(existing) = Self::scan(head, pc) {
                result = Some(existing);
                Option::<Arc<ProfileEntry>>::clone(head)
            } else {
                let entry = Arc::new(ProfileEntry::new(pc, make_data(), epoch));
                entry.next.store(Option::clone(head));
                result = Some(Arc::clone(&entry));
                Some(entry)
            }
        });
        result.unwrap_or_else(|| unreachable!("rcu closure always sets an entry"))
    }

    /// Visits every entry in the table.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<ProfileEntry>)) {
        for bucket in &self.buckets {
            let mut cursor = bucket.load_full();
            while let Some(entry) = cursor {
                f(&entry);
                cursor = entry.next.load_full();
            }
        }
    }

    /// Number of entries currently linked.
    #[must_use]
    pub fn count_entries(&self) -> usize {
        let mut count = 0;
        self.for_each(|_| count += 1);
        count
    }

    /// Releases persist locks left behind by a failed persistence pass and
    /// reports how many were unexpectedly held.
    pub fn release_all_entries(&self) -> usize {
        let mut unexpected = 0;
        self.for_each(|entry| {
            if entry.is_locked() {
                unexpected += 1;
                entry.release_entry();
            }
        });
        unexpected
    }
}
