// SPDX-License-Identifier: Apache-2.0

//! Opaque identifiers handed out by the VM.
//!
//! The controller never dereferences these; they are hash keys and equality
//! tokens. The VM is free to derive them from whatever it likes (method
//! block addresses, slot indices) as long as they are stable for the
//! lifetime of the entity.

use std::fmt;

/// Identifies a resolved (RAM) method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u64);

/// Identifies the read-only (ROM) image of a method, shared across VM runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RomMethodId(pub u64);

/// Identifies a loaded class. The all-zero value is reserved to mean
/// "no class" inside profiling slots, so the VM must never hand out zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u64);

impl ClassId {
    /// Reconstructs a class id from a raw slot word, mapping zero to `None`.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(ClassId(raw))
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{:x}", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{:x}", self.0)
    }
}
