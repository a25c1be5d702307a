// SPDX-License-Identifier: Apache-2.0

//! The VM-side method and class interface.

use crate::bytecode::Bytecode;
use crate::ids::{ClassId, MethodId, RomMethodId};
use crate::invocation::InvocationCounter;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Shared/exclusive VM access.
///
/// Parsing profiling buffers reads raw class words and must exclude class
/// unloading for the duration; the GC takes the exclusive side while it
/// unloads. This is deliberately a plain reader/writer lock: the controller
/// holds the shared side briefly and never nests other monitors inside it.
#[derive(Debug, Default)]
pub struct VmAccess {
    lock: RwLock<()>,
}

impl VmAccess {
    /// Creates the access lock.
    #[must_use]
    pub fn new() -> Self {
        VmAccess::default()
    }

    /// Acquires shared VM access, blocking out exclusive holders.
    pub fn acquire(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    /// Acquires exclusive VM access (GC side).
    pub fn acquire_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }
}

/// Method and class metadata the controller reads from the VM.
///
/// All queries are by opaque id; `None` answers mean the entity is gone
/// (unloaded, redefined) and callers treat the datum as missing.
pub trait VmRuntime: Send + Sync {
    /// Address of the first bytecode of the method.
    fn bytecode_start(&self, method: MethodId) -> Option<u64>;

    /// Size of the method's bytecode stream, in bytes.
    fn bytecode_size(&self, method: MethodId) -> Option<u32>;

    /// The bytecode family at an absolute PC, or `None` when the PC does
    /// not fall inside any known method.
    fn opcode_at(&self, pc: u64) -> Option<Bytecode>;

    /// The method whose bytecode range contains `pc`.
    fn method_containing(&self, pc: u64) -> Option<MethodId>;

    /// Walks the method's bytecodes as `(bytecode index, family)` pairs.
    fn bytecodes(&self, method: MethodId) -> Option<Vec<(u32, Bytecode)>>;

    /// The shared (ROM) image backing the method.
    fn rom_method(&self, method: MethodId) -> Option<RomMethodId>;

    /// Whether a compiled body currently exists for the method.
    fn is_compiled(&self, method: MethodId) -> bool;

    /// Whether the method contains loops (drives the initial tier and the
    /// interpreter-sample decrement policy).
    fn method_has_loops(&self, method: MethodId) -> bool;

    /// Whether the method belongs to a bootstrap-loader class.
    fn is_bootstrap_method(&self, method: MethodId) -> bool;

    /// Whether the method is flagged as large-memory (excluded from the
    /// quickstart AOT warm upgrade).
    fn is_large_memory_method(&self, method: MethodId) -> bool;

    /// Size of the current compiled body's code, when one exists.
    fn compiled_code_size(&self, method: MethodId) -> Option<u32>;

    /// The method's invocation-counter word.
    fn invocation_counter(&self, method: MethodId) -> Option<Arc<InvocationCounter>>;

    /// Whether the class has been unloaded.
    fn is_unloaded_class(&self, class: ClassId) -> bool;

    /// Whether the class has completed static initialization.
    fn is_class_initialized(&self, class: ClassId) -> bool;

    /// The monotonically increasing global class-unload epoch.
    fn class_unload_epoch(&self) -> u64;

    /// The VM access lock.
    fn vm_access(&self) -> &VmAccess;
}
