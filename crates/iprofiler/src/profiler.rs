// SPDX-License-Identifier: Apache-2.0

//! The profiler facade: ingestion, lookup, persistence, worker lifecycle.

use crate::buffer::{BufferMonitor, ProfileBuffer, SubmitOutcome, WorkerState};
use crate::entry::{EntryData, ProfileEntry};
use crate::error::Error;
use crate::fanin::FanInTable;
use crate::history::ReadSampleRequestsHistory;
use crate::parser::{self, ParseContext, ParseSummary};
use crate::persist::{self, StoredEntry};
use crate::records::ProfileRecord;
use crate::stats::ProfilerStats;
use crate::table::BytecodeTable;
use crate::tracking::{CallCountTracking, DltTracking, TrackingStats};
use jitc_config::IProfilerOptions;
use jitc_vm::{ClassId, MethodId, RuntimeState, SharedCache, VmRuntime};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// Receives first-time compilation requests scheduled by the profiler.
///
/// Implemented by the controller's low-priority queue. Returning `false`
/// means the request could not be queued and may be retried later.
pub trait PromotionSink: Send + Sync {
    /// Queues a first-time compilation of `method`.
    fn enqueue_first_time_compilation(&self, method: MethodId) -> bool;
}

/// The interpreter profiler.
///
/// Construction wires the VM, the (optional) shared cache and the shared
/// runtime state; [`start_worker`](InterpreterProfiler::start_worker) brings
/// up the parsing thread. All public reads are safe from any thread.
pub struct InterpreterProfiler {
    vm: Arc<dyn VmRuntime>,
    scc: Option<Arc<dyn SharedCache>>,
    state: Arc<RuntimeState>,
    options: IProfilerOptions,
    table: BytecodeTable,
    fanin: FanInTable,
    tracking: CallCountTracking,
    dlt: DltTracking,
    history: ReadSampleRequestsHistory,
    stats: ProfilerStats,
    monitor: BufferMonitor,
    worker: Mutex<Option<JoinHandle<()>>>,
    promotion_sink: RwLock<Option<Arc<dyn PromotionSink>>>,
    profiling_enabled: AtomicBool,
    scc_full: AtomicBool,
    /// Serializes persistence passes (per-entry lock acquisition order).
    persistence_monitor: Mutex<()>,
}

impl InterpreterProfiler {
    /// Creates the profiler. `scc` of `None` disables persistence entirely.
    #[must_use]
    pub fn new(
        vm: Arc<dyn VmRuntime>,
        scc: Option<Arc<dyn SharedCache>>,
        state: Arc<RuntimeState>,
        options: IProfilerOptions,
    ) -> Self {
        InterpreterProfiler {
            table: BytecodeTable::new(options.bc_hash_table_size),
            fanin: FanInTable::new(
                options.method_hash_table_size,
                options.max_callers_per_callee,
            ),
            tracking: CallCountTracking::new(
                options.tracking_table_size,
                options.tracking_compilation_threshold,
            ),
            dlt: DltTracking::new(),
            history: ReadSampleRequestsHistory::new(options.fail_history_size),
            stats: ProfilerStats::default(),
            monitor: BufferMonitor::new(),
            worker: Mutex::new(None),
            promotion_sink: RwLock::new(None),
            profiling_enabled: AtomicBool::new(true),
            scc_full: AtomicBool::new(false),
            persistence_monitor: Mutex::new(()),
            vm,
            scc,
            state,
            options,
        }
    }

    /// Whether profiling is still running (sticky off once stopped).
    #[must_use]
    pub fn is_profiling_enabled(&self) -> bool {
        self.profiling_enabled.load(Ordering::Acquire)
    }

    /// Stops profiling for good.
    pub fn stop_profiling(&self) {
        if self.profiling_enabled.swap(false, Ordering::AcqRel) {
            tracing::warn!("interpreter profiling stopped");
        }
    }

    /// Installs the controller-side sink for scheduled promotions.
    pub fn set_promotion_sink(&self, sink: Arc<dyn PromotionSink>) {
        *self.promotion_sink.write() = Some(sink);
    }

    /// The fan-in table.
    #[must_use]
    pub fn fanin(&self) -> &FanInTable {
        &self.fanin
    }

    /// The DLT observation table.
    #[must_use]
    pub fn dlt(&self) -> &DltTracking {
        &self.dlt
    }

    /// The read-sample failure history.
    #[must_use]
    pub fn history(&self) -> &ReadSampleRequestsHistory {
        &self.history
    }

    /// The profiler counters.
    #[must_use]
    pub fn stats(&self) -> &ProfilerStats {
        &self.stats
    }

    /// Counters of the promotion tracking table.
    #[must_use]
    pub fn tracking_stats(&self) -> TrackingStats {
        self.tracking.stats()
    }

    /// Releases a compile-completed method from promotion tracking.
    pub fn stop_tracking_method(&self, method: MethodId) {
        self.tracking.stop_tracking(method);
    }

    /// Rolls the read-failure history one epoch (sampling thread).
    pub fn advance_epoch(&self) {
        self.history.advance_epoch();
    }

    // ---- ingestion --------------------------------------------------------

    /// Hands out record storage for an application thread's next buffer.
    #[must_use]
    pub fn acquire_buffer(&self) -> Vec<ProfileRecord> {
        let mut shared = self.monitor.shared.lock();
        shared
            .free_records
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.options.buffer_size))
    }

    /// Capacity at which a buffer should be submitted.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.options.buffer_size
    }

    /// Takes a full buffer off an application thread.
    ///
    /// The buffer is posted to the worker when the backlog allows, parsed on
    /// the calling thread when the discard budget is exhausted, and dropped
    /// otherwise. The caller gets its outcome and fetches fresh storage with
    /// [`acquire_buffer`](InterpreterProfiler::acquire_buffer).
    pub fn submit_buffer(&self, records: Vec<ProfileRecord>) -> SubmitOutcome {
        self.stats.bump(&self.stats.buffers_submitted);
        if !self.is_profiling_enabled() {
            self.stats.bump(&self.stats.buffers_dropped);
            return SubmitOutcome::Dropped;
        }
        // Global stop conditions: the profile can no longer pay off.
        if self.state.unloaded_classes() >= self.options.disable_class_unload_threshold
            || self.state.is_code_or_data_cache_full()
        {
            self.stop_profiling();
            self.stats.bump(&self.stats.buffers_dropped);
            return SubmitOutcome::Dropped;
        }
        if parser::churn_says_skip(&self.state) {
            self.stats.bump(&self.stats.buffers_dropped);
            self.recycle(records);
            return SubmitOutcome::Dropped;
        }

        let snapshot = self.stats.snapshot();
        let backlogged = self.monitor.shared.lock().outstanding
            >= self.options.num_outstanding_buffers
            || self.state.load_factor() >= 1;
        if backlogged {
            if 100 * snapshot.buffers_dropped
                >= u64::from(self.options.buffer_max_percentage_to_discard)
                    * snapshot.buffers_submitted
            {
                // The discard budget is spent; this thread pays with its
                // own time instead.
                return self.parse_in_caller(records);
            }
            self.stats.bump(&self.stats.buffers_dropped);
            self.recycle(records);
            return SubmitOutcome::Dropped;
        }
        if self.options.disable_worker_thread {
            return self.parse_in_caller(records);
        }
        match self.try_post_to_worker(records) {
            Ok(()) => {
                self.stats.bump(&self.stats.buffers_posted_to_worker);
                SubmitOutcome::PostedToWorker
            }
            Err(records) => self.parse_in_caller(records),
        }
    }

    /// Marks all in-flight buffers invalid. GC hook, called with exclusive
    /// VM access; only the profiler monitor is taken, briefly.
    pub fn invalidate_in_flight_buffers(&self) {
        let shared = self.monitor.shared.lock();
        for buffer in &shared.work_queue {
            buffer.invalidate();
        }
        if let Some(current) = &shared.current {
            current.invalidate();
        }
    }

    fn recycle(&self, mut records: Vec<ProfileRecord>) {
        records.clear();
        self.monitor.shared.lock().free_records.push(records);
    }

    fn try_post_to_worker(&self, records: Vec<ProfileRecord>) -> Result<(), Vec<ProfileRecord>> {
        // A contended monitor means the worker (or another producer) is
        // busy right here; the app thread parses rather than spinning.
        let Some(mut shared) = self.monitor.shared.try_lock() else {
            return Err(records);
        };
        if shared.state != WorkerState::Initialized && shared.state != WorkerState::WaitingForWork {
            return Err(records);
        }
        shared
            .work_queue
            .push_back(Arc::new(ProfileBuffer::new(records)));
        shared.outstanding += 1;
        drop(shared);
        let _ = self.monitor.work_available.notify_all();
        Ok(())
    }

    fn parse_in_caller(&self, records: Vec<ProfileRecord>) -> SubmitOutcome {
        self.stats.bump(&self.stats.buffers_parsed_in_caller);
        let _summary = self.parse_with_vm_access(&records, false);
        self.recycle(records);
        SubmitOutcome::ParseInCaller
    }

    fn parse_with_vm_access(&self, records: &[ProfileRecord], from_worker: bool) -> ParseSummary {
        let _vm_access = self.vm.vm_access().acquire();
        let sink = self.promotion_sink.read().clone();
        let schedule = move |method: MethodId| {
            sink.as_ref()
                .is_some_and(|sink| sink.enqueue_first_time_compilation(method))
        };
        let ctx = ParseContext {
            vm: self.vm.as_ref(),
            state: &self.state,
            table: &self.table,
            fanin: &self.fanin,
            tracking: &self.tracking,
            may_schedule_promotions: from_worker || self.options.enable_iprofiler_changes,
            schedule: &schedule,
        };
        match parser::parse_records(&ctx, records) {
            Ok(summary) => {
                self.stats.add(&self.stats.records_parsed, summary.parsed);
                self.stats
                    .add(&self.stats.records_discarded, summary.discarded);
                summary
            }
            Err(error) => {
                tracing::warn!(%error, "abandoning corrupt profiling buffer");
                ParseSummary::default()
            }
        }
    }

    // ---- worker lifecycle -------------------------------------------------

    /// Starts the worker thread. A no-op when the worker is disabled by
    /// options; application threads then parse every buffer themselves.
    pub fn start_worker(self: &Arc<Self>) -> Result<(), Error> {
        if self.options.disable_worker_thread {
            return Ok(());
        }
        {
            let mut shared = self.monitor.shared.lock();
            if shared.state != WorkerState::NotCreated {
                return Err(Error::InvalidWorkerState {
                    state: shared.state,
                    operation: "start",
                });
            }
            shared.state = WorkerState::Initialized;
        }
        let profiler = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("jitc-iprofiler".to_owned())
            .spawn(move || profiler.process_working_queue())
            .map_err(|source| {
                self.monitor.shared.lock().state = WorkerState::FailedToAttach;
                Error::WorkerSpawn { source }
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Current worker state.
    #[must_use]
    pub fn worker_state(&self) -> WorkerState {
        self.monitor.state()
    }

    /// Asks the worker to exit, discards its backlog and joins it.
    pub fn stop_worker(&self) {
        {
            let mut shared = self.monitor.shared.lock();
            match shared.state {
                WorkerState::NotCreated
                | WorkerState::Destroyed
                | WorkerState::FailedToAttach => return,
                _ => shared.state = WorkerState::Stopping,
            }
            let _ = self.monitor.work_available.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("profiler worker panicked during shutdown");
            }
        }
    }

    /// Parks the worker for a checkpoint; returns once it is parked.
    pub fn suspend_worker(&self) {
        let mut shared = self.monitor.shared.lock();
        match shared.state {
            WorkerState::Initialized | WorkerState::WaitingForWork => {
                shared.state = WorkerState::Suspending;
                let _ = self.monitor.work_available.notify_all();
                while shared.state == WorkerState::Suspending {
                    self.monitor.state_changed.wait(&mut shared);
                }
            }
            _ => {}
        }
    }

    /// Wakes the worker from a checkpoint park.
    pub fn resume_worker(&self) {
        let mut shared = self.monitor.shared.lock();
        if shared.state == WorkerState::Suspended {
            shared.state = WorkerState::Resuming;
            let _ = self.monitor.work_available.notify_all();
        }
    }

    fn process_working_queue(self: Arc<Self>) {
        let mut shared = self.monitor.shared.lock();
        loop {
            while shared.state == WorkerState::Initialized && shared.work_queue.is_empty() {
                shared.state = WorkerState::WaitingForWork;
                let _ = self.monitor.state_changed.notify_all();
                self.monitor.work_available.wait(&mut shared);
                // Shutdown or checkpoint may have changed the state while
                // we slept; only undo our own marker.
                if shared.state == WorkerState::WaitingForWork {
                    shared.state = WorkerState::Initialized;
                }
            }
            match shared.state {
                WorkerState::Stopping => {
                    // Drop the backlog; reclaim storage where possible.
                    while let Some(buffer) = shared.work_queue.pop_front() {
                        shared.outstanding = shared.outstanding.saturating_sub(1);
                        if let Ok(buffer) = Arc::try_unwrap(buffer) {
                            let mut records = buffer.records;
                            records.clear();
                            shared.free_records.push(records);
                        }
                    }
                    break;
                }
                WorkerState::Suspending => {
                    shared.state = WorkerState::Suspended;
                    let _ = self.monitor.state_changed.notify_all();
                    while shared.state == WorkerState::Suspended {
                        self.monitor.work_available.wait(&mut shared);
                    }
                    if shared.state == WorkerState::Resuming {
                        shared.state = WorkerState::Initialized;
                    }
                }
                _ => {
                    let Some(buffer) = shared.work_queue.pop_front() else {
                        continue;
                    };
                    shared.current = Some(Arc::clone(&buffer));
                    drop(shared);

                    // Parse outside the monitor, under VM access, unless the
                    // GC got to the buffer first.
                    if buffer.is_valid() {
                        let _ = self.parse_with_vm_access(&buffer.records, true);
                    } else {
                        self.stats.bump(&self.stats.buffers_invalidated);
                    }

                    shared = self.monitor.shared.lock();
                    shared.current = None;
                    shared.outstanding = shared.outstanding.saturating_sub(1);
                    if let Ok(buffer) = Arc::try_unwrap(buffer) {
                        let mut records = buffer.records;
                        records.clear();
                        shared.free_records.push(records);
                    }
                }
            }
        }
        shared.state = WorkerState::Destroyed;
        let _ = self.monitor.state_changed.notify_all();
    }

    // ---- compile-time lookup ---------------------------------------------

    /// Profile data for `(method, bci)`, merging the live hashtable and the
    /// shared cache.
    ///
    /// The richer source wins: an entry only present persistently is loaded
    /// into the hashtable; when both sources hold data the one with the
    /// greater sample mass is kept. Entries referencing unloaded classes
    /// are invalidated on sight.
    #[must_use]
    pub fn profiling_entry(&self, method: MethodId, bci: u32) -> Option<Arc<ProfileEntry>> {
        let start = self.vm.bytecode_start(method)?;
        let pc = start + u64::from(bci);
        let opcode = self.vm.opcode_at(pc)?;
        if !opcode.is_profiled() {
            return None;
        }
        let count_in_history = !opcode.is_direct_invoke();
        let epoch = self.vm.class_unload_epoch();
        self.stats.bump(&self.stats.entries_read);

        let current = self.table.find(pc).filter(|entry| {
            entry.validate(epoch, |class: ClassId| self.vm.is_unloaded_class(class))
        });
        if let Some(entry) = &current {
            if count_in_history {
                self.history.count_read();
            }
            if self.options.prefer_hash_table_data || entry.is_persistent_entry_read() {
                return current;
            }
        }

        let (stored, method_has_blob) = self.load_stored(method, pc);
        match (&current, &stored) {
            (None, None) => {
                if count_in_history && !method_has_blob {
                    // Only a method with no blob at all counts as a failed
                    // read; missing PCs inside a stored method are paths
                    // the previous run never took either.
                    self.history.count_read();
                    self.history.count_failed_read();
                    self.stats.bump(&self.stats.persistent_read_fail);
                }
                None
            }
            (Some(entry), None) => {
                entry.set_persistent_entry_read();
                Some(Arc::clone(entry))
            }
            (None, Some(stored)) => {
                if count_in_history {
                    self.history.count_read();
                }
                Some(self.install_stored(stored, pc, epoch))
            }
            (Some(entry), Some(stored)) => {
                entry.set_persistent_entry_read();
                let scc = self.scc()?;
                let persistent =
                    persist::materialize(stored, pc, epoch, self.vm.as_ref(), scc.as_ref());
                if persistent.sum_count() > entry.sum_count() {
                    self.stats.bump(&self.stats.entries_chose_persistent);
                    entry.copy_from(&persistent);
                }
                Some(Arc::clone(entry))
            }
        }
    }

    /// (taken, not-taken) branch counters at a conditional.
    #[must_use]
    pub fn branch_counters(&self, method: MethodId, bci: u32) -> Option<(u16, u16)> {
        let entry = self.profiling_entry(method, bci)?;
        match entry.data() {
            EntryData::Branch(branch) => Some(branch.counts()),
            _ => None,
        }
    }

    /// Dominant receiver class at a call or type-check site.
    #[must_use]
    pub fn dominant_class(&self, method: MethodId, bci: u32) -> Option<ClassId> {
        let entry = self.profiling_entry(method, bci)?;
        match entry.data() {
            EntryData::CallGraph(cg) => cg.data(),
            _ => None,
        }
    }

    fn scc(&self) -> Option<&Arc<dyn SharedCache>> {
        self.scc.as_ref()
    }

    fn load_stored(&self, method: MethodId, pc: u64) -> (Option<StoredEntry>, bool) {
        if self.options.do_not_use_persistent_profile {
            return (None, false);
        }
        let Some(scc) = self.scc() else {
            return (None, false);
        };
        let Some(rom) = self.vm.rom_method(method) else {
            return (None, false);
        };
        let Some(blob) = scc.find_attached_data(rom) else {
            return (None, false);
        };
        let Some(offset) = scc.offset_from_rom_section(pc) else {
            return (None, true);
        };
        let stored = persist::find_in_blob(&blob, offset as u32);
        if stored.is_some() {
            self.stats.bump(&self.stats.persistent_read_success);
        }
        (stored, true)
    }

    fn install_stored(&self, stored: &StoredEntry, pc: u64, epoch: u64) -> Arc<ProfileEntry> {
        self.stats.bump(&self.stats.entries_chose_persistent);
        let vm = self.vm.as_ref();
        let entry = self.table.find_or_create(pc, epoch, || {
            // Placeholder of the right variant; filled in below.
            match stored.payload {
                persist::StoredPayload::Branch { .. } => {
                    EntryData::Branch(crate::entry::BranchData::default())
                }
                persist::StoredPayload::Switch { .. } => {
                    EntryData::Switch(crate::entry::SwitchData::default())
                }
                persist::StoredPayload::CallGraph { .. } => {
                    EntryData::CallGraph(crate::entry::CallGraphData::default())
                }
            }
        });
        if let Some(scc) = self.scc() {
            let loaded = persist::materialize(stored, pc, epoch, vm, scc.as_ref());
            entry.copy_from(&loaded);
        }
        entry.set_cannot_persist();
        entry.set_persistent_entry_read();
        entry
    }

    // ---- persistence ------------------------------------------------------

    /// Whether persistence is worth attempting at all.
    #[must_use]
    pub fn eligible_for_persist(&self) -> bool {
        self.scc.is_some()
            && !self.options.disable_persist_profile
            && self.is_profiling_enabled()
            && !self.scc_full.load(Ordering::Acquire)
    }

    /// Persists `method`'s profile entries into the shared cache.
    pub fn persist_iprofile_info(&self, method: MethodId) {
        self.stats.bump(&self.stats.method_persistence_attempts);
        if self.scc_full.load(Ordering::Acquire) {
            self.stats.bump(&self.stats.not_persisted_scc_full);
            return;
        }
        if !self.eligible_for_persist() {
            self.stats.bump(&self.stats.not_persisted_other);
            return;
        }
        let Some(scc) = self.scc().cloned() else {
            self.stats.bump(&self.stats.not_persisted_other);
            return;
        };
        let (Some(rom), Some(start), Some(bytecodes)) = (
            self.vm.rom_method(method),
            self.vm.bytecode_start(method),
            self.vm.bytecodes(method),
        ) else {
            self.stats.bump(&self.stats.not_persisted_other);
            return;
        };
        if !scc.is_rom_method_in_cache(rom) {
            self.stats.bump(&self.stats.not_persisted_not_in_scc);
            return;
        }
        if scc.find_attached_data(rom).is_some() {
            self.stats.bump(&self.stats.not_persisted_already_stored);
            return;
        }

        let _serialize = self.persistence_monitor.lock();
        let epoch = self.vm.class_unload_epoch();
        let mut locked: Vec<Arc<ProfileEntry>> = Vec::new();
        let mut prepared: Vec<StoredEntry> = Vec::new();
        let mut aborted = false;

        for (bci, opcode) in bytecodes {
            if !opcode.is_profiled() {
                continue;
            }
            let pc = start + u64::from(bci);
            let Some(entry) = self.table.find(pc) else {
                continue;
            };
            if !entry.validate(epoch, |class: ClassId| self.vm.is_unloaded_class(class)) {
                self.stats.bump(&self.stats.entries_not_persisted_unloaded);
                continue;
            }
            if !entry.has_data() {
                self.stats.bump(&self.stats.entries_not_persisted_no_info);
                continue;
            }
            if !entry.can_persist() {
                self.stats.bump(&self.stats.entries_not_persisted_other);
                continue;
            }
            if let EntryData::CallGraph(cg) = entry.data() {
                let snapshot = cg.snapshot();
                let classes: Vec<ClassId> =
                    snapshot.slots.iter().filter_map(|&(class, _)| class).collect();
                if classes.iter().any(|&c| self.vm.is_unloaded_class(c)) {
                    self.stats.bump(&self.stats.entries_not_persisted_unloaded);
                    continue;
                }
                if !classes.iter().all(|&c| scc.is_class_in_cache(c)) {
                    self.stats
                        .bump(&self.stats.entries_not_persisted_not_in_scc);
                    continue;
                }
            }
            if !entry.lock_entry() {
                // Someone else is persisting this very entry; give up on
                // the whole method, the data will be stored by them.
                aborted = true;
                break;
            }
            let Some(offset) = scc.offset_from_rom_section(pc) else {
                entry.release_entry();
                self.stats
                    .bump(&self.stats.entries_not_persisted_not_in_scc);
                continue;
            };
            match persist::prepare_entry(&entry, offset as u32, self.vm.as_ref(), scc.as_ref()) {
                Some(stored) => {
                    locked.push(entry);
                    prepared.push(stored);
                }
                None => {
                    entry.release_entry();
                    self.stats
                        .bump(&self.stats.entries_not_persisted_not_in_scc);
                }
            }
        }

        if aborted {
            self.stats.bump(&self.stats.persistence_aborted);
        } else if prepared.is_empty() {
            self.stats.bump(&self.stats.not_persisted_no_entries);
        } else {
            match persist::build_blob(&prepared) {
                Ok(blob) => match scc.store_attached_data(rom, &blob) {
                    Ok(()) => {
                        self.stats.bump(&self.stats.methods_persisted);
                        self.stats
                            .add(&self.stats.entries_persisted, prepared.len() as u64);
                    }
                    Err(jitc_vm::SccStoreError::Full) => {
                        self.scc_full.store(true, Ordering::Release);
                        self.stats.bump(&self.stats.not_persisted_scc_full);
                        tracing::warn!("shared cache full, no further profiles persisted");
                    }
                    Err(jitc_vm::SccStoreError::Other) => {
                        self.stats.bump(&self.stats.not_persisted_other);
                    }
                },
                Err(error) => {
                    tracing::warn!(%error, method = %method, "profile blob layout failed");
                    self.stats.bump(&self.stats.not_persisted_other);
                }
            }
        }

        // Locks come off no matter how the attempt ended.
        for entry in locked {
            entry.release_entry();
        }
    }

    /// Persists every method with live profile data (shutdown path).
    pub fn persist_all_entries(&self) {
        if !self.eligible_for_persist() {
            return;
        }
        let mut methods: HashSet<MethodId> = HashSet::new();
        self.table.for_each(|entry| {
            if let Some(method) = self.vm.method_containing(entry.pc()) {
                let _ = methods.insert(method);
            }
        });
        for method in methods {
            if self.scc_full.load(Ordering::Acquire) {
                break;
            }
            self.persist_iprofile_info(method);
        }
    }

    /// Entries currently in the hashtable (diagnostics).
    #[must_use]
    pub fn count_entries(&self) -> usize {
        self.table.count_entries()
    }
}

impl Drop for InterpreterProfiler {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordPayload;
    use jitc_vm::testing::{InMemorySharedCache, MockMethod, MockVm};
    use jitc_vm::{Bytecode, RomMethodId};

    const ROM_BASE: u64 = 0x1000;

    fn vm_with_call_site() -> Arc<MockVm> {
        let vm = Arc::new(MockVm::new());
        let mut def = MockMethod::plain(ROM_BASE, RomMethodId(1));
        def.bytecodes = vec![(0, Bytecode::InvokeVirtual), (12, Bytecode::Branch)];
        def.bytecode_size = 16;
        let _ = vm.add_method(MethodId(1), def);
        vm
    }

    fn profiler_over(
        vm: &Arc<MockVm>,
        scc: &Arc<InMemorySharedCache>,
        options: IProfilerOptions,
    ) -> Arc<InterpreterProfiler> {
        Arc::new(InterpreterProfiler::new(
            Arc::clone(vm) as Arc<dyn VmRuntime>,
            Some(Arc::clone(scc) as Arc<dyn SharedCache>),
            Arc::new(RuntimeState::new(4)),
            options,
        ))
    }

    fn feed_call_samples(profiler: &InterpreterProfiler, class: ClassId, weight: usize) {
        let records: Vec<ProfileRecord> = (0..weight)
            .map(|_| ProfileRecord {
                pc: ROM_BASE,
                payload: RecordPayload::VirtualCall {
                    receiver: class,
                    caller: MethodId(1),
                    callee: Some(MethodId(2)),
                },
            })
            .collect();
        let _ = profiler.parse_with_vm_access(&records, false);
    }

    #[test]
    fn persist_and_reload_keeps_dominant_class_only() {
        let scc = Arc::new(InMemorySharedCache::new(ROM_BASE..ROM_BASE + 0x1000));
        scc.add_rom_method(RomMethodId(1));
        scc.add_class(ClassId(0xC1), 1);
        scc.add_class(ClassId(0xC2), 1);

        // First run: two receiver classes, C1 dominant.
        let vm1 = vm_with_call_site();
        let run1 = profiler_over(&vm1, &scc, IProfilerOptions::default());
        feed_call_samples(&run1, ClassId(0xC1), 100);
        feed_call_samples(&run1, ClassId(0xC2), 40);
        run1.persist_iprofile_info(MethodId(1));
        assert_eq!(run1.stats().snapshot().methods_persisted, 1);
        assert_eq!(scc.attached_count(), 1);

        // Second run against the same cache: slot 0 holds (C1, 100), every
        // other observation became residue, and the entry cannot be
        // persisted again.
        let vm2 = vm_with_call_site();
        let run2 = profiler_over(&vm2, &scc, IProfilerOptions::default());
        let entry = run2
            .profiling_entry(MethodId(1), 0)
            .expect("reloaded entry");
        let EntryData::CallGraph(cg) = entry.data() else {
            panic!("call-graph entry expected");
        };
        let snapshot = cg.snapshot();
        assert_eq!(snapshot.slots[0], (Some(ClassId(0xC1)), 100));
        assert_eq!(snapshot.slots[1], (None, 0));
        assert_eq!(snapshot.slots[2], (None, 0));
        assert_eq!(snapshot.residue, 40);
        assert!(!entry.can_persist(), "reloaded entries never persist again");
        assert_eq!(cg.data(), Some(ClassId(0xC1)));

        // A second persistence attempt short-circuits on the existing blob.
        run2.persist_iprofile_info(MethodId(1));
        assert_eq!(
            run2.stats().snapshot().not_persisted_already_stored,
            1
        );
    }

    #[test]
    fn scc_full_is_sticky() {
        let scc = Arc::new(InMemorySharedCache::new(ROM_BASE..ROM_BASE + 0x1000));
        scc.add_rom_method(RomMethodId(1));
        scc.add_class(ClassId(0xC1), 1);
        scc.set_full(true);
        let vm = vm_with_call_site();
        let profiler = profiler_over(&vm, &scc, IProfilerOptions::default());
        feed_call_samples(&profiler, ClassId(0xC1), 10);
        profiler.persist_iprofile_info(MethodId(1));
        assert_eq!(profiler.stats().snapshot().not_persisted_scc_full, 1);
        // The flag latched; the next attempt does not even look at the VM.
        profiler.persist_iprofile_info(MethodId(1));
        assert_eq!(profiler.stats().snapshot().not_persisted_scc_full, 2);
        assert!(!profiler.eligible_for_persist());
    }

    #[test]
    fn uninitialized_dominant_class_loads_classless() {
        let scc = Arc::new(InMemorySharedCache::new(ROM_BASE..ROM_BASE + 0x1000));
        scc.add_rom_method(RomMethodId(1));
        scc.add_class(ClassId(0xC1), 1);
        let vm1 = vm_with_call_site();
        let run1 = profiler_over(&vm1, &scc, IProfilerOptions::default());
        feed_call_samples(&run1, ClassId(0xC1), 50);
        run1.persist_iprofile_info(MethodId(1));

        let vm2 = vm_with_call_site();
        vm2.set_class_uninitialized(ClassId(0xC1), true);
        let run2 = profiler_over(&vm2, &scc, IProfilerOptions::default());
        let entry = run2
            .profiling_entry(MethodId(1), 0)
            .expect("entry loads even without the class");
        let EntryData::CallGraph(cg) = entry.data() else {
            panic!("call-graph entry expected");
        };
        assert_eq!(cg.snapshot().slots[0], (None, 0));
    }

    #[test]
    fn worker_parses_posted_buffers() {
        let scc = Arc::new(InMemorySharedCache::new(ROM_BASE..ROM_BASE + 0x1000));
        let vm = vm_with_call_site();
        let profiler = profiler_over(&vm, &scc, IProfilerOptions::default());
        profiler.start_worker().expect("worker starts");

        let mut records = profiler.acquire_buffer();
        for _ in 0..10 {
            records.push(ProfileRecord {
                pc: ROM_BASE,
                payload: RecordPayload::VirtualCall {
                    receiver: ClassId(0xC1),
                    caller: MethodId(1),
                    callee: Some(MethodId(2)),
                },
            });
        }
        let outcome = profiler.submit_buffer(records);
        assert_ne!(outcome, SubmitOutcome::Dropped);

        // Wait for the worker to drain the queue.
        for _ in 0..200 {
            if profiler.monitor.shared.lock().outstanding == 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        profiler.stop_worker();
        assert_eq!(profiler.worker_state(), WorkerState::Destroyed);
        let entry = profiler.table.find(ROM_BASE).expect("worker parsed");
        assert_eq!(entry.sum_count(), 10);
    }

    #[test]
    fn cache_pressure_stops_profiling_for_good() {
        let scc = Arc::new(InMemorySharedCache::new(ROM_BASE..ROM_BASE + 0x1000));
        let vm = vm_with_call_site();
        let profiler = profiler_over(&vm, &scc, IProfilerOptions::default());
        profiler.state.set_code_or_data_cache_full(true);
        assert_eq!(profiler.submit_buffer(Vec::new()), SubmitOutcome::Dropped);
        assert!(!profiler.is_profiling_enabled());
        // Even after the pressure clears, profiling stays off.
        profiler.state.set_code_or_data_cache_full(false);
        assert_eq!(profiler.submit_buffer(Vec::new()), SubmitOutcome::Dropped);
    }

    #[test]
    fn suspend_and_resume_round_trip() {
        let scc = Arc::new(InMemorySharedCache::new(ROM_BASE..ROM_BASE + 0x1000));
        let vm = vm_with_call_site();
        let profiler = profiler_over(&vm, &scc, IProfilerOptions::default());
        profiler.start_worker().expect("worker starts");
        // Give the worker a moment to park.
        for _ in 0..200 {
            if profiler.worker_state() == WorkerState::WaitingForWork {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        profiler.suspend_worker();
        assert_eq!(profiler.worker_state(), WorkerState::Suspended);
        profiler.resume_worker();
        profiler.stop_worker();
        assert_eq!(profiler.worker_state(), WorkerState::Destroyed);
    }
}
