// SPDX-License-Identifier: Apache-2.0

//! Record-by-record buffer parsing.

use crate::entry::{BranchData, CallGraphData, EntryData, SwitchData};
use crate::error::Error;
use crate::fanin::FanInTable;
use crate::records::{ProfileRecord, RecordPayload};
use crate::table::BytecodeTable;
use crate::tracking::CallCountTracking;
use jitc_vm::{Bytecode, MethodId, RuntimeState, VmRuntime};
use rand::RngExt;

/// Heavier class-unloading churn than this skips whole buffers.
pub(crate) const IP_THROTTLE: u32 = 32;

/// Accounting for one parsed buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseSummary {
    /// Records present in the buffer.
    pub produced: u64,
    /// Records decoded and applied.
    pub parsed: u64,
    /// Records skipped by the profile/skip bands.
    pub discarded: u64,
}

/// Everything the parser touches; borrowed from the profiler.
pub(crate) struct ParseContext<'a> {
    pub vm: &'a dyn VmRuntime,
    pub state: &'a RuntimeState,
    pub table: &'a BytecodeTable,
    pub fanin: &'a FanInTable,
    pub tracking: &'a CallCountTracking,
    /// Scheduling first-time compilations is normally reserved for the
    /// worker thread; application threads parsing their own buffers only
    /// do it when the newer-profiler-behavior option is on.
    pub may_schedule_promotions: bool,
    pub schedule: &'a dyn Fn(MethodId) -> bool,
}

/// Whole-buffer throttling on class-unloading churn.
///
/// Returns `true` when the buffer should be dropped unparsed.
pub(crate) fn churn_says_skip(state: &RuntimeState) -> bool {
    let unloaded = state.unloaded_classes();
    if unloaded == 0 {
        return false;
    }
    let samples_to_skip = unloaded >> 10;
    let ratio = state.loaded_classes() / unloaded;
    if ratio > 2 {
        return false;
    }
    samples_to_skip.min(IP_THROTTLE) == IP_THROTTLE
}

/// Parses a buffer into the hashtable and the fan-in table.
///
/// The caller must hold shared VM access: class pointers inside the records
/// stay resolvable only while unloading is excluded. Corrupt records abort
/// the buffer; whatever parsed before the corruption sticks.
pub(crate) fn parse_records(
    ctx: &ParseContext<'_>,
    records: &[ProfileRecord],
) -> Result<ParseSummary, Error> {
    let mut summary = ParseSummary {
        produced: records.len() as u64,
        ..ParseSummary::default()
    };
    let is_class_load_phase = ctx.state.is_class_loading_phase();
    let epoch = ctx.vm.class_unload_epoch();

    // Alternating profile/skip bands, offset by a little noise so every
    // buffer does not profile the same record positions.
    let skip_count_main: i32 = 20 + rand::rng().random_range(0..10);
    let mut skip_count = skip_count_main;
    let mut profile_flag = true;

    for record in records {
        if skip_count <= 0 {
            skip_count = skip_count_main;
            profile_flag = !profile_flag;
            if profile_flag {
                // Profile less while classes are pouring in, more after.
                if is_class_load_phase {
                    skip_count >>= 2;
                } else {
                    skip_count <<= 1;
                }
            }
        }
        skip_count -= 1;

        let Some(opcode) = ctx.vm.opcode_at(record.pc) else {
            return Err(Error::CorruptRecord { pc: record.pc });
        };
        match (opcode, record.payload) {
            (Bytecode::Branch, RecordPayload::BranchTaken(taken)) => {
                if profile_flag {
                    let entry = ctx.table.find_or_create(record.pc, epoch, || {
                        EntryData::Branch(BranchData::default())
                    });
                    entry.add_branch_sample(taken);
                    summary.parsed += 1;
                } else {
                    summary.discarded += 1;
                }
            }
            (
                Bytecode::CheckCast | Bytecode::InstanceOf,
                RecordPayload::OperandClass(class),
            ) => {
                let entry = ctx.table.find_or_create(record.pc, epoch, || {
                    EntryData::CallGraph(CallGraphData::default())
                });
                entry.add_class_sample(class, 1);
                summary.parsed += 1;
            }
            (
                Bytecode::InvokeVirtual | Bytecode::InvokeInterface,
                RecordPayload::VirtualCall {
                    receiver,
                    caller,
                    callee,
                },
            ) => {
                if let Some(callee) = callee {
                    let bci = bci_of(ctx.vm, caller, record.pc);
                    ctx.fanin.add(caller, bci, callee);
                    observe_for_promotion(ctx, caller);
                }
                let entry = ctx.table.find_or_create(record.pc, epoch, || {
                    EntryData::CallGraph(CallGraphData::default())
                });
                entry.add_class_sample(receiver, 1);
                summary.parsed += 1;
            }
            (
                Bytecode::InvokeStatic | Bytecode::InvokeSpecial,
                RecordPayload::DirectCall { caller, callee },
            ) => {
                // Direct invokes never enter the hashtable; the interpreter
                // observes no receiver for them.
                if let Some(callee) = callee {
                    let bci = bci_of(ctx.vm, caller, record.pc);
                    ctx.fanin.add(caller, bci, callee);
                    observe_for_promotion(ctx, caller);
                }
                summary.parsed += 1;
            }
            (
                Bytecode::LookupSwitch | Bytecode::TableSwitch,
                RecordPayload::SwitchOperand(operand),
            ) => {
                // Switches are rare next to branches; profile them all.
                let entry = ctx.table.find_or_create(record.pc, epoch, || {
                    EntryData::Switch(SwitchData::default())
                });
                entry.add_switch_sample(operand);
                summary.parsed += 1;
            }
            _ => return Err(Error::CorruptRecord { pc: record.pc }),
        }
    }
    Ok(summary)
}

fn observe_for_promotion(ctx: &ParseContext<'_>, caller: MethodId) {
    if ctx.may_schedule_promotions && !ctx.vm.is_compiled(caller) {
        ctx.tracking.observe_call(caller, ctx.schedule);
    }
}

fn bci_of(vm: &dyn VmRuntime, method: MethodId, pc: u64) -> u32 {
    vm.bytecode_start(method)
        .map_or(0, |start| pc.saturating_sub(start) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitc_vm::ClassId;
    use jitc_vm::testing::{MockMethod, MockVm};
    use std::sync::Arc;

    fn fixture() -> (Arc<MockVm>, BytecodeTable, FanInTable, CallCountTracking) {
        let vm = Arc::new(MockVm::new());
        let mut def = MockMethod::plain(0x1000, jitc_vm::RomMethodId(1));
        def.bytecodes = vec![
            (0, Bytecode::Branch),
            (4, Bytecode::InvokeVirtual),
            (8, Bytecode::LookupSwitch),
            (12, Bytecode::InvokeStatic),
            (16, Bytecode::CheckCast),
        ];
        def.bytecode_size = 20;
        let _ = vm.add_method(MethodId(1), def);
        (
            vm,
            BytecodeTable::new(64),
            FanInTable::new(64, 8),
            CallCountTracking::new(64, 1000),
        )
    }

    #[test]
    fn accounting_balances() {
        let (vm, table, fanin, tracking) = fixture();
        let state = RuntimeState::new(4);
        state.set_class_loading_phase(false);
        let schedule = |_m: MethodId| true;
        let ctx = ParseContext {
            vm: vm.as_ref(),
            state: &state,
            table: &table,
            fanin: &fanin,
            tracking: &tracking,
            may_schedule_promotions: true,
            schedule: &schedule,
        };
        let records: Vec<ProfileRecord> = (0..100)
            .map(|i| ProfileRecord {
                pc: 0x1000,
                payload: RecordPayload::BranchTaken(i % 2 == 0),
            })
            .collect();
        let summary = parse_records(&ctx, &records).expect("parse");
        assert_eq!(summary.produced, 100);
        assert_eq!(summary.parsed + summary.discarded, summary.produced);
        // The first band always profiles.
        assert!(summary.parsed >= 20);
    }

    #[test]
    fn virtual_calls_feed_table_and_fanin() {
        let (vm, table, fanin, tracking) = fixture();
        let state = RuntimeState::new(4);
        let schedule = |_m: MethodId| true;
        let ctx = ParseContext {
            vm: vm.as_ref(),
            state: &state,
            table: &table,
            fanin: &fanin,
            tracking: &tracking,
            may_schedule_promotions: true,
            schedule: &schedule,
        };
        let records = vec![
            ProfileRecord {
                pc: 0x1004,
                payload: RecordPayload::VirtualCall {
                    receiver: ClassId(42),
                    caller: MethodId(1),
                    callee: Some(MethodId(2)),
                },
            };
            5
        ];
        let summary = parse_records(&ctx, &records).expect("parse");
        assert_eq!(summary.parsed, 5);
        let entry = table.find(0x1004).expect("entry created");
        assert_eq!(entry.sum_count(), 5);
        let info = fanin.info(MethodId(2)).expect("fan-in entry");
        assert_eq!(info.total_weight, 5);
    }

    #[test]
    fn direct_calls_skip_the_hashtable() {
        let (vm, table, fanin, tracking) = fixture();
        let state = RuntimeState::new(4);
        let schedule = |_m: MethodId| true;
        let ctx = ParseContext {
            vm: vm.as_ref(),
            state: &state,
            table: &table,
            fanin: &fanin,
            tracking: &tracking,
            may_schedule_promotions: false,
            schedule: &schedule,
        };
        let records = vec![ProfileRecord {
            pc: 0x100c,
            payload: RecordPayload::DirectCall {
                caller: MethodId(1),
                callee: Some(MethodId(3)),
            },
        }];
        let summary = parse_records(&ctx, &records).expect("parse");
        assert_eq!(summary.parsed, 1);
        assert!(table.find(0x100c).is_none());
        assert!(fanin.info(MethodId(3)).is_some());
    }

    #[test]
    fn mismatched_payload_is_corrupt() {
        let (vm, table, fanin, tracking) = fixture();
        let state = RuntimeState::new(4);
        let schedule = |_m: MethodId| true;
        let ctx = ParseContext {
            vm: vm.as_ref(),
            state: &state,
            table: &table,
            fanin: &fanin,
            tracking: &tracking,
            may_schedule_promotions: false,
            schedule: &schedule,
        };
        let records = vec![ProfileRecord {
            pc: 0x1008, // a switch
            payload: RecordPayload::BranchTaken(true),
        }];
        assert!(matches!(
            parse_records(&ctx, &records),
            Err(Error::CorruptRecord { pc: 0x1008 })
        ));
    }

    #[test]
    fn heavy_churn_skips_buffers() {
        let state = RuntimeState::new(4);
        state.add_loaded_classes(40_000);
        state.add_unloaded_classes(33_000);
        assert!(churn_says_skip(&state));
        let calm = RuntimeState::new(4);
        calm.add_loaded_classes(40_000);
        calm.add_unloaded_classes(100);
        assert!(!churn_says_skip(&calm));
    }
}
