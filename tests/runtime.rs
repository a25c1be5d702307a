// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios through the assembled runtime.

use jitc::{JitRuntime, MethodEvent, Options, Tier};
use jitc_controller::testing::RecordingDispatcher;
use jitc_iprofiler::{EntryData, ProfileRecord, RecordPayload, SubmitOutcome};
use jitc_vm::testing::{InMemorySharedCache, MockMethod, MockPortLayer, MockVm};
use jitc_vm::{Bytecode, ClassId, MethodId, PortLayer, RomMethodId, VmRuntime};
use std::sync::Arc;
use std::time::Duration;

const ROM_BASE: u64 = 0x1000;

struct Harness {
    vm: Arc<MockVm>,
    dispatcher: Arc<RecordingDispatcher>,
    runtime: JitRuntime,
}

fn harness_with(options: Options, scc: Option<Arc<InMemorySharedCache>>) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let vm = Arc::new(MockVm::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let port = Arc::new(MockPortLayer::new());
    let mut builder = JitRuntime::builder(
        Arc::clone(&vm) as Arc<dyn VmRuntime>,
        Arc::clone(&dispatcher) as Arc<dyn jitc::CompileDispatcher>,
    )
    .port(Arc::clone(&port) as Arc<dyn PortLayer>)
    .options(options);
    if let Some(scc) = scc {
        builder = builder.shared_cache(scc as Arc<dyn jitc_vm::SharedCache>);
    }
    let runtime = builder.build().expect("runtime assembles");
    runtime.state().set_startup_phase(false);
    runtime.state().set_class_loading_phase(false);
    Harness {
        vm,
        dispatcher,
        runtime,
    }
}

fn harness() -> Harness {
    harness_with(Options::default(), None)
}

fn wait_for_compilations(harness: &Harness, count: usize) {
    for _ in 0..400 {
        if harness.dispatcher.compiled().len() >= count {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("expected {count} compilation(s)");
}

#[test]
fn counter_driven_warm_promotion() {
    let harness = harness();
    let method = MethodId(1);
    let mut def = MockMethod::plain(ROM_BASE, RomMethodId(1));
    def.initial_count = 10;
    let counter = harness.vm.add_method(method, def);
    harness.runtime.start(1).expect("runtime starts");

    // Ten invocations drain the counter to zero; every trip raises the
    // event, only the first produces a plan.
    let mut queued = 0;
    for _ in 0..10 {
        let count = counter.decrement(1, 0).expect("countable");
        if count == 0
            && harness
                .runtime
                .process_event(&MethodEvent::InterpreterCounterTripped { method })
        {
            queued += 1;
        }
    }
    for _ in 0..3 {
        // Stray trips after queueing change nothing.
        if harness
            .runtime
            .process_event(&MethodEvent::InterpreterCounterTripped { method })
        {
            queued += 1;
        }
    }
    assert_eq!(queued, 1, "queued exactly once");
    assert!(counter.is_queued());

    wait_for_compilations(&harness, 1);
    let compiled = harness.dispatcher.compiled();
    assert_eq!(compiled[0].method, method);
    assert_eq!(compiled[0].tier, Tier::Warm);
    harness.runtime.shutdown();
}

#[test]
fn sampling_promotes_a_warm_body_to_hot() {
    let harness = harness();
    let method = MethodId(1);
    let mut def = MockMethod::plain(ROM_BASE, RomMethodId(1));
    def.code_size = 4096;
    let _counter = harness.vm.add_method(method, def);
    harness.runtime.start(1).expect("runtime starts");

    // First compilation at warm.
    assert!(
        harness
            .runtime
            .process_event(&MethodEvent::InterpreterCounterTripped { method })
    );
    wait_for_compilations(&harness, 1);
    let start_pc = harness.dispatcher.compiled()[0].start_pc;
    harness.vm.set_compiled(method, true);

    // The sampler keeps catching the body among other work.
    for _ in 0..40 {
        for _ in 0..6 {
            let _ = harness.runtime.state().count_global_sample();
        }
        let _ = harness.runtime.sample_method(method, Some(start_pc));
    }

    wait_for_compilations(&harness, 2);
    let compiled = harness.dispatcher.compiled();
    assert_eq!(compiled[1].method, method);
    assert_eq!(compiled[1].tier, Tier::Hot, "promoted by sampling");
    harness.runtime.shutdown();
}

#[test]
fn profile_survives_a_vm_restart() {
    let scc = Arc::new(InMemorySharedCache::new(ROM_BASE..ROM_BASE + 0x1000));
    scc.add_rom_method(RomMethodId(1));
    scc.add_class(ClassId(0xC1), 1);
    scc.add_class(ClassId(0xC2), 1);
    scc.add_class(ClassId(0xC3), 1);

    let mut options = Options::default();
    options.iprofiler.disable_worker_thread = true;

    let call_site = |vm: &MockVm| {
        let mut def = MockMethod::plain(ROM_BASE, RomMethodId(1));
        def.bytecodes = vec![(0, Bytecode::InvokeVirtual)];
        def.bytecode_size = 4;
        let _ = vm.add_method(MethodId(1), def);
    };
    let record = |class: u64| ProfileRecord {
        pc: ROM_BASE,
        payload: RecordPayload::VirtualCall {
            receiver: ClassId(class),
            caller: MethodId(1),
            callee: Some(MethodId(2)),
        },
    };

    // First run: one dominant receiver plus assorted noise, then persist.
    {
        let run1 = harness_with(options.clone(), Some(Arc::clone(&scc)));
        call_site(&run1.vm);
        let mut records = Vec::new();
        records.extend(std::iter::repeat_n(record(0xC1), 100));
        records.extend(std::iter::repeat_n(record(0xC2), 40));
        records.extend(std::iter::repeat_n(record(0xC3), 7));
        records.extend(std::iter::repeat_n(record(0xC4), 10));
        assert_eq!(
            run1.runtime.profiler().submit_buffer(records),
            SubmitOutcome::ParseInCaller
        );
        run1.runtime.profiler().persist_iprofile_info(MethodId(1));
        assert_eq!(
            run1.runtime.profiler().stats().snapshot().methods_persisted,
            1
        );
    }

    // Second run, fresh VM, same cache: only the dominant class survives,
    // all other weight pooled into the residue, and the entry can never be
    // persisted again.
    let run2 = harness_with(options, Some(Arc::clone(&scc)));
    call_site(&run2.vm);
    let entry = run2
        .runtime
        .profiler()
        .profiling_entry(MethodId(1), 0)
        .expect("reloaded entry");
    let EntryData::CallGraph(cg) = entry.data() else {
        panic!("call-graph entry expected");
    };
    let snapshot = cg.snapshot();
    assert_eq!(snapshot.slots[0], (Some(ClassId(0xC1)), 100));
    assert_eq!(snapshot.slots[1], (None, 0));
    assert_eq!(snapshot.slots[2], (None, 0));
    assert_eq!(snapshot.residue, 57, "non-dominant weight becomes residue");
    assert!(!entry.can_persist());
    assert_eq!(cg.data(), Some(ClassId(0xC1)));
    assert_eq!(
        run2.runtime
            .profiler()
            .dominant_class(MethodId(1), 0),
        Some(ClassId(0xC1))
    );
}

#[test]
fn data_cache_split_and_exact_reuse() {
    let mut options = Options::default();
    options.datacache.quantum_size = 8;
    options.datacache.min_quanta = 4;
    options.datacache.segment_size = 4096;
    let harness = harness_with(options, None);
    let cache = harness.runtime.data_cache();

    let seed = cache
        .allocate_data_cache_record(248, jitc_datacache::RecordType::Scratch)
        .expect("seed record");
    let location = seed.location();
    cache.free_data_cache_record(seed).expect("free");

    // 64 payload + 8 header = 72; the 256-byte chunk splits, 184 bytes
    // re-enter the pool.
    let small = cache
        .allocate_data_cache_record(64, jitc_datacache::RecordType::Scratch)
        .expect("split allocation");
    assert_eq!(small.location(), location);

    // 176 payload + 8 header = 184: exact reuse of the remainder.
    let exact = cache
        .allocate_data_cache_record(176, jitc_datacache::RecordType::Scratch)
        .expect("exact reuse");
    assert_eq!(exact.location(), (location.0, location.1 + 72));

    // 200 payload does not fit either piece; it comes from elsewhere.
    let fresh = cache
        .allocate_data_cache_record(200, jitc_datacache::RecordType::Scratch)
        .expect("fresh allocation");
    assert_ne!(fresh.location(), location);
    assert_ne!(fresh.location(), (location.0, location.1 + 72));

    let stats = cache.stats();
    assert_eq!(stats.live_records, 3);
    assert!(stats.bytes_in_pool <= stats.total_segment_bytes);
}

#[test]
fn strategy_none_never_recompiles() {
    let mut options = Options::default();
    options.strategy = jitc_config::StrategyKind::None;
    let harness = harness_with(options, None);
    let method = MethodId(1);
    let _ = harness.vm.add_method(method, MockMethod::plain(ROM_BASE, RomMethodId(1)));
    harness.runtime.start(1).expect("runtime starts");

    assert!(
        harness
            .runtime
            .process_event(&MethodEvent::InterpreterCounterTripped { method })
    );
    wait_for_compilations(&harness, 1);
    let start_pc = harness.dispatcher.compiled()[0].start_pc;
    harness.vm.set_compiled(method, true);

    // Sampling pressure that would promote under the default strategy.
    for _ in 0..200 {
        let _ = harness.runtime.sample_method(method, Some(start_pc));
    }
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        harness.dispatcher.compiled().len(),
        1,
        "no recompilations under strategy none"
    );
    harness.runtime.shutdown();
}

#[test]
fn shutdown_persists_outstanding_profiles() {
    let scc = Arc::new(InMemorySharedCache::new(ROM_BASE..ROM_BASE + 0x1000));
    scc.add_rom_method(RomMethodId(1));
    scc.add_class(ClassId(0xC1), 1);
    let mut options = Options::default();
    options.iprofiler.disable_worker_thread = true;
    let harness = harness_with(options, Some(Arc::clone(&scc)));
    let mut def = MockMethod::plain(ROM_BASE, RomMethodId(1));
    def.bytecodes = vec![(0, Bytecode::InvokeVirtual)];
    def.bytecode_size = 4;
    let _ = harness.vm.add_method(MethodId(1), def);

    let records = vec![
        ProfileRecord {
            pc: ROM_BASE,
            payload: RecordPayload::VirtualCall {
                receiver: ClassId(0xC1),
                caller: MethodId(1),
                callee: Some(MethodId(2)),
            },
        };
        20
    ];
    let _ = harness.runtime.profiler().submit_buffer(records);
    assert_eq!(scc.attached_count(), 0);
    harness.runtime.shutdown();
    assert_eq!(scc.attached_count(), 1, "persisted at shutdown");
}
