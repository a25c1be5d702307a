// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the controller.

use crate::controller::{CompileDispatcher, CompileError};
use jitc_strategy::{OptimizationPlan, Tier};
use jitc_vm::MethodId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// One compilation the recording dispatcher performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledRecord {
    /// The compiled method.
    pub method: MethodId,
    /// Tier it was compiled at.
    pub tier: Tier,
    /// Whether the body carries profiling instrumentation.
    pub instrumented: bool,
    /// Entry point handed back.
    pub start_pc: u64,
}

/// A dispatcher that "compiles" instantly and remembers what it was asked
/// to do. Start PCs are handed out sequentially from `0x10_0000`.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    records: Mutex<Vec<CompiledRecord>>,
    next_start_pc: AtomicU64,
    fail_all: Mutex<bool>,
}

impl RecordingDispatcher {
    /// Creates the dispatcher.
    #[must_use]
    pub fn new() -> Self {
        RecordingDispatcher {
            records: Mutex::new(Vec::new()),
            next_start_pc: AtomicU64::new(0x10_0000),
            fail_all: Mutex::new(false),
        }
    }

    /// Makes every further compilation fail.
    pub fn fail_compilations(&self, fail: bool) {
        *self.fail_all.lock() = fail;
    }

    /// Everything compiled so far.
    #[must_use]
    pub fn compiled(&self) -> Vec<CompiledRecord> {
        self.records.lock().clone()
    }
}

impl CompileDispatcher for RecordingDispatcher {
    fn compile(
        &self,
        method: MethodId,
        plan: &OptimizationPlan,
        _old_start_pc: Option<u64>,
    ) -> Result<u64, CompileError> {
        if *self.fail_all.lock() {
            return Err(CompileError::Failed {
                reason: "test dispatcher set to fail".to_owned(),
            });
        }
        let start_pc = self.next_start_pc.fetch_add(0x1000, Ordering::Relaxed);
        self.records.lock().push(CompiledRecord {
            method,
            tier: plan.tier,
            instrumented: plan.insert_instrumentation,
            start_pc,
        });
        Ok(start_pc)
    }
}
