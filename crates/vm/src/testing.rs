// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the external interfaces.
//!
//! These are deliberately simple, fully deterministic implementations used
//! by the controller's own tests and by embedders writing integration tests:
//! a scriptable VM, a scriptable port layer and an in-memory shared cache
//! that survives across "runs" by being shared between VM instances.

use crate::bytecode::Bytecode;
use crate::error::PortError;
use crate::ids::{ClassId, MethodId, RomMethodId};
use crate::invocation::InvocationCounter;
use crate::port::{MachineCpuTime, PortLayer, ProcessCpuTime};
use crate::runtime::{VmAccess, VmRuntime};
use crate::shared_cache::{ClassChainOffset, SccStoreError, SharedCache};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Definition of a method registered with [`MockVm`].
#[derive(Debug, Clone)]
pub struct MockMethod {
    /// Address of the first bytecode.
    pub bytecode_start: u64,
    /// Bytecodes as `(byte offset, family)` pairs, offsets ascending.
    pub bytecodes: Vec<(u32, Bytecode)>,
    /// Total bytecode size in bytes.
    pub bytecode_size: u32,
    /// ROM image id.
    pub rom_method: RomMethodId,
    /// Whether the method contains loops.
    pub has_loops: bool,
    /// Whether it belongs to a bootstrap-loader class.
    pub bootstrap: bool,
    /// Whether it is flagged large-memory.
    pub large_memory: bool,
    /// Compiled-code size to report once compiled.
    pub code_size: u32,
    /// Initial invocation count.
    pub initial_count: i64,
}

impl MockMethod {
    /// A loopless method with sensible defaults at the given start address.
    #[must_use]
    pub fn plain(bytecode_start: u64, rom_method: RomMethodId) -> Self {
        MockMethod {
            bytecode_start,
            bytecodes: vec![(0, Bytecode::Other)],
            bytecode_size: 1,
            rom_method,
            has_loops: false,
            bootstrap: false,
            large_memory: false,
            code_size: 1024,
            initial_count: 10,
        }
    }
}

struct MethodRecord {
    def: MockMethod,
    compiled: AtomicBool,
    counter: Arc<InvocationCounter>,
}

/// A scriptable [`VmRuntime`].
#[derive(Default)]
pub struct MockVm {
    methods: RwLock<HashMap<MethodId, Arc<MethodRecord>>>,
    pcs: RwLock<HashMap<u64, Bytecode>>,
    unloaded: RwLock<HashSet<ClassId>>,
    uninitialized: RwLock<HashSet<ClassId>>,
    epoch: AtomicU64,
    access: VmAccess,
}

impl MockVm {
    /// Creates an empty VM.
    #[must_use]
    pub fn new() -> Self {
        MockVm::default()
    }

    /// Registers a method and returns its invocation counter.
    pub fn add_method(&self, id: MethodId, def: MockMethod) -> Arc<InvocationCounter> {
        let counter = Arc::new(InvocationCounter::new(def.initial_count));
        {
            let mut pcs = self.pcs.write();
            for &(offset, bc) in &def.bytecodes {
                let _ = pcs.insert(def.bytecode_start + u64::from(offset), bc);
            }
        }
        let record = Arc::new(MethodRecord {
            def,
            compiled: AtomicBool::new(false),
            counter: Arc::clone(&counter),
        });
        let _ = self.methods.write().insert(id, record);
        counter
    }

    /// Marks the method as having (or not having) a compiled body.
    pub fn set_compiled(&self, id: MethodId, compiled: bool) {
        if let Some(record) = self.methods.read().get(&id) {
            record.compiled.store(compiled, Ordering::Release);
        }
    }

    /// Unloads a class: future predicate checks fail and the epoch advances.
    pub fn unload_class(&self, class: ClassId) {
        let _ = self.unloaded.write().insert(class);
        let _ = self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Marks a class as not yet initialized.
    pub fn set_class_uninitialized(&self, class: ClassId, uninitialized: bool) {
        let mut set = self.uninitialized.write();
        if uninitialized {
            let _ = set.insert(class);
        } else {
            let _ = set.remove(&class);
        }
    }
}

impl VmRuntime for MockVm {
    fn bytecode_start(&self, method: MethodId) -> Option<u64> {
        self.methods
            .read()
            .get(&method)
            .map(|r| r.def.bytecode_start)
    }

    fn bytecode_size(&self, method: MethodId) -> Option<u32> {
        self.methods.read().get(&method).map(|r| r.def.bytecode_size)
    }

    fn opcode_at(&self, pc: u64) -> Option<Bytecode> {
        self.pcs.read().get(&pc).copied()
    }

    fn method_containing(&self, pc: u64) -> Option<MethodId> {
        self.methods.read().iter().find_map(|(&id, record)| {
            let start = record.def.bytecode_start;
            let end = start + u64::from(record.def.bytecode_size);
            (start..end).contains(&pc).then_some(id)
        })
    }

    fn bytecodes(&self, method: MethodId) -> Option<Vec<(u32, Bytecode)>> {
        self.methods
            .read()
            .get(&method)
            .map(|r| r.def.bytecodes.clone())
    }

    fn rom_method(&self, method: MethodId) -> Option<RomMethodId> {
        self.methods.read().get(&method).map(|r| r.def.rom_method)
    }

    fn is_compiled(&self, method: MethodId) -> bool {
        self.methods
            .read()
            .get(&method)
            .is_some_and(|r| r.compiled.load(Ordering::Acquire))
    }

    fn method_has_loops(&self, method: MethodId) -> bool {
        self.methods
            .read()
            .get(&method)
            .is_some_and(|r| r.def.has_loops)
    }

    fn is_bootstrap_method(&self, method: MethodId) -> bool {
        self.methods
            .read()
            .get(&method)
            .is_some_and(|r| r.def.bootstrap)
    }

    fn is_large_memory_method(&self, method: MethodId) -> bool {
        self.methods
            .read()
            .get(&method)
            .is_some_and(|r| r.def.large_memory)
    }

    fn compiled_code_size(&self, method: MethodId) -> Option<u32> {
        let methods = self.methods.read();
        let record = methods.get(&method)?;
        record
            .compiled
            .load(Ordering::Acquire)
            .then_some(record.def.code_size)
    }

    fn invocation_counter(&self, method: MethodId) -> Option<Arc<InvocationCounter>> {
        self.methods
            .read()
            .get(&method)
            .map(|r| Arc::clone(&r.counter))
    }

    fn is_unloaded_class(&self, class: ClassId) -> bool {
        self.unloaded.read().contains(&class)
    }

    fn is_class_initialized(&self, class: ClassId) -> bool {
        !self.uninitialized.read().contains(&class)
    }

    fn class_unload_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn vm_access(&self) -> &VmAccess {
        &self.access
    }
}

/// A scriptable [`PortLayer`]. All readings are set by the test.
pub struct MockPortLayer {
    machine: Mutex<Result<MachineCpuTime, ()>>,
    process: Mutex<Result<ProcessCpuTime, ()>>,
    thread_ns: Mutex<Result<i64, ()>>,
    now_ns: Mutex<i64>,
    target_cpus: AtomicU32,
    hypervisor: AtomicBool,
    guest_entitlement: Mutex<Option<f64>>,
}

impl Default for MockPortLayer {
    fn default() -> Self {
        MockPortLayer {
            machine: Mutex::new(Ok(MachineCpuTime {
                timestamp_ns: 0,
                cpu_time_ns: 0,
                num_cpus: 4,
            })),
            process: Mutex::new(Ok(ProcessCpuTime {
                system_ns: 0,
                user_ns: 0,
            })),
            thread_ns: Mutex::new(Ok(0)),
            now_ns: Mutex::new(0),
            target_cpus: AtomicU32::new(4),
            hypervisor: AtomicBool::new(false),
            guest_entitlement: Mutex::new(None),
        }
    }
}

impl MockPortLayer {
    /// Creates a port layer with all-zero readings on a 4-CPU machine.
    #[must_use]
    pub fn new() -> Self {
        MockPortLayer::default()
    }

    /// Scripts the next machine reading.
    pub fn set_machine(&self, reading: MachineCpuTime) {
        *self.machine.lock() = Ok(reading);
    }

    /// Makes machine readings fail from now on.
    pub fn fail_machine(&self) {
        *self.machine.lock() = Err(());
    }

    /// Scripts the process reading.
    pub fn set_process(&self, reading: ProcessCpuTime) {
        *self.process.lock() = Ok(reading);
    }

    /// Scripts the thread CPU clock.
    pub fn set_thread_cpu_ns(&self, value: i64) {
        *self.thread_ns.lock() = Ok(value);
    }

    /// Makes thread CPU readings fail from now on.
    pub fn fail_thread_cpu(&self) {
        *self.thread_ns.lock() = Err(());
    }

    /// Moves the monotonic clock.
    pub fn set_now_ns(&self, now: i64) {
        *self.now_ns.lock() = now;
    }

    /// Sets the CPU count.
    pub fn set_target_cpus(&self, count: u32) {
        self.target_cpus.store(count, Ordering::Relaxed);
    }

    /// Scripts hypervisor presence and guest entitlement.
    pub fn set_hypervisor(&self, present: bool, entitlement_percent: Option<f64>) {
        self.hypervisor.store(present, Ordering::Relaxed);
        *self.guest_entitlement.lock() = entitlement_percent;
    }
}

impl PortLayer for MockPortLayer {
    fn machine_cpu_time(&self) -> Result<MachineCpuTime, PortError> {
        let reading = *self.machine.lock();
        reading.map_err(|()| PortError::Unsupported {
            what: "machine cpu time",
        })
    }

    fn process_cpu_time(&self) -> Result<ProcessCpuTime, PortError> {
        let reading = *self.process.lock();
        reading.map_err(|()| PortError::Unsupported {
            what: "process cpu time",
        })
    }

    fn self_thread_cpu_time_ns(&self) -> Result<i64, PortError> {
        let reading = *self.thread_ns.lock();
        reading.map_err(|()| PortError::Unsupported {
            what: "thread cpu time",
        })
    }

    fn monotonic_time_ns(&self) -> i64 {
        *self.now_ns.lock()
    }

    fn supported_page_sizes(&self) -> Vec<usize> {
        vec![4096]
    }

    fn target_cpu_count(&self) -> u32 {
        self.target_cpus.load(Ordering::Relaxed)
    }

    fn hypervisor_present(&self) -> bool {
        self.hypervisor.load(Ordering::Relaxed)
    }

    fn guest_cpu_entitlement_percent(&self) -> Option<f64> {
        *self.guest_entitlement.lock()
    }
}

/// An in-memory [`SharedCache`].
///
/// Share one instance (behind `Arc`) between two controller instances to
/// model two VM runs against the same cache.
pub struct InMemorySharedCache {
    rom_section: std::ops::Range<u64>,
    rom_methods: RwLock<HashSet<RomMethodId>>,
    attached: RwLock<HashMap<RomMethodId, Vec<u8>>>,
    classes: RwLock<HashMap<ClassId, (ClassChainOffset, ClassChainOffset)>>,
    chains: RwLock<HashMap<(u32, u32), ClassId>>,
    next_chain: AtomicU32,
    full: AtomicBool,
}

impl InMemorySharedCache {
    /// Creates a cache whose ROM-classes section spans `rom_section`.
    #[must_use]
    pub fn new(rom_section: std::ops::Range<u64>) -> Self {
        InMemorySharedCache {
            rom_section,
            rom_methods: RwLock::default(),
            attached: RwLock::default(),
            classes: RwLock::default(),
            chains: RwLock::default(),
            next_chain: AtomicU32::new(1),
            full: AtomicBool::new(false),
        }
    }

    /// Marks a ROM method as resident.
    pub fn add_rom_method(&self, rom_method: RomMethodId) {
        let _ = self.rom_methods.write().insert(rom_method);
    }

    /// Registers a class with a given loader id, making it cache-resident.
    pub fn add_class(&self, class: ClassId, loader: u32) {
        let chain = ClassChainOffset(self.next_chain.fetch_add(1, Ordering::Relaxed));
        let loader_chain = ClassChainOffset(loader);
        let _ = self.classes.write().insert(class, (chain, loader_chain));
        let _ = self.chains.write().insert((chain.0, loader_chain.0), class);
    }

    /// Forgets a class, so chain lookups fail at load time.
    pub fn drop_class(&self, class: ClassId) {
        if let Some((chain, loader_chain)) = self.classes.write().remove(&class) {
            let _ = self.chains.write().remove(&(chain.0, loader_chain.0));
        }
    }

    /// Forces the cache into the full state.
    pub fn set_full(&self, full: bool) {
        self.full.store(full, Ordering::Relaxed);
    }

    /// Number of blobs currently attached.
    #[must_use]
    pub fn attached_count(&self) -> usize {
        self.attached.read().len()
    }
}

impl SharedCache for InMemorySharedCache {
    fn is_rom_method_in_cache(&self, rom_method: RomMethodId) -> bool {
        self.rom_methods.read().contains(&rom_method)
    }

    fn is_pc_in_rom_section(&self, pc: u64) -> bool {
        self.rom_section.contains(&pc)
    }

    fn offset_from_rom_section(&self, pc: u64) -> Option<u64> {
        self.rom_section
            .contains(&pc)
            .then(|| pc - self.rom_section.start)
    }

    fn find_attached_data(&self, rom_method: RomMethodId) -> Option<Vec<u8>> {
        self.attached.read().get(&rom_method).cloned()
    }

    fn store_attached_data(
        &self,
        rom_method: RomMethodId,
        data: &[u8],
    ) -> Result<(), SccStoreError> {
        if self.full.load(Ordering::Relaxed) {
            return Err(SccStoreError::Full);
        }
        let _ = self.attached.write().insert(rom_method, data.to_vec());
        Ok(())
    }

    fn is_class_in_cache(&self, class: ClassId) -> bool {
        self.classes.read().contains_key(&class)
    }

    fn remember_class(&self, class: ClassId) -> Option<ClassChainOffset> {
        self.classes.read().get(&class).map(|&(chain, _)| chain)
    }

    fn class_chain_identifying_loader(&self, class: ClassId) -> Option<ClassChainOffset> {
        self.classes.read().get(&class).map(|&(_, loader)| loader)
    }

    fn lookup_class_from_chain_and_loader(
        &self,
        chain: ClassChainOffset,
        loader_chain: ClassChainOffset,
    ) -> Option<ClassId> {
        self.chains.read().get(&(chain.0, loader_chain.0)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_vm_resolves_opcodes_by_pc() {
        let vm = MockVm::new();
        let mut def = MockMethod::plain(0x1000, RomMethodId(1));
        def.bytecodes = vec![(0, Bytecode::Branch), (3, Bytecode::InvokeVirtual)];
        def.bytecode_size = 6;
        let _counter = vm.add_method(MethodId(1), def);
        assert_eq!(vm.opcode_at(0x1000), Some(Bytecode::Branch));
        assert_eq!(vm.opcode_at(0x1003), Some(Bytecode::InvokeVirtual));
        assert_eq!(vm.opcode_at(0x1001), None);
    }

    #[test]
    fn shared_cache_store_full_is_reported() {
        let cache = InMemorySharedCache::new(0x1000..0x2000);
        cache.add_rom_method(RomMethodId(7));
        cache.set_full(true);
        assert_eq!(
            cache.store_attached_data(RomMethodId(7), &[1, 2, 3]),
            Err(SccStoreError::Full)
        );
    }

    #[test]
    fn unloading_a_class_advances_the_epoch() {
        let vm = MockVm::new();
        let before = vm.class_unload_epoch();
        vm.unload_class(ClassId(42));
        assert!(vm.class_unload_epoch() > before);
        assert!(vm.is_unloaded_class(ClassId(42)));
    }
}
