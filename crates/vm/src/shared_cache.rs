// SPDX-License-Identifier: Apache-2.0

//! The shared class cache interface.
//!
//! The shared cache is the cross-run persistent store. The profiler keeps
//! one attached-data blob per ROM method and persists class identity as a
//! pair of class-chain offsets; both sides of that contract are expressed
//! here and nothing else leaks through.

use crate::ids::{ClassId, RomMethodId};

/// Offset of a class chain inside the shared cache.
///
/// A chain identifies either a class (via its ROM class chain) or a class
/// loader (via the chain of the first class that loader loaded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassChainOffset(pub u32);

/// Errors from storing attached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SccStoreError {
    /// The cache has no room left. Callers latch this and stop trying.
    #[error("shared cache is full")]
    Full,
    /// The store failed for a reason other than capacity.
    #[error("shared cache store failed")]
    Other,
}

/// The narrow shared-cache surface the profiler persists through.
pub trait SharedCache: Send + Sync {
    /// Whether the ROM method is resident in the cache.
    fn is_rom_method_in_cache(&self, rom_method: RomMethodId) -> bool;

    /// Whether an absolute PC points into the cache's ROM-classes section.
    fn is_pc_in_rom_section(&self, pc: u64) -> bool;

    /// Offset of a PC from the start of the ROM-classes section.
    fn offset_from_rom_section(&self, pc: u64) -> Option<u64>;

    /// Looks up the profile blob attached to a ROM method.
    fn find_attached_data(&self, rom_method: RomMethodId) -> Option<Vec<u8>>;

    /// Attaches a profile blob to a ROM method.
    fn store_attached_data(&self, rom_method: RomMethodId, data: &[u8])
    -> Result<(), SccStoreError>;

    /// Whether the class's ROM image is resident in the cache.
    fn is_class_in_cache(&self, class: ClassId) -> bool;

    /// Records the class's chain in the cache and returns its offset.
    fn remember_class(&self, class: ClassId) -> Option<ClassChainOffset>;

    /// Chain identifying the class's defining loader (the chain of the
    /// first class that loader loaded).
    fn class_chain_identifying_loader(&self, class: ClassId) -> Option<ClassChainOffset>;

    /// Resolves a (class chain, loader chain) pair back to a runtime class.
    fn lookup_class_from_chain_and_loader(
        &self,
        chain: ClassChainOffset,
        loader_chain: ClassChainOffset,
    ) -> Option<ClassId>;
}
