// SPDX-License-Identifier: Apache-2.0

//! Method events consumed by the strategies.

use crate::tier::Tier;
use jitc_vm::MethodId;

/// Everything that can ask for a (re)compilation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodEvent {
    /// The sampling thread caught the method running interpreted.
    InterpretedMethodSample {
        /// The sampled method.
        method: MethodId,
        /// PC observed by the sample, when available.
        sample_pc: Option<u64>,
    },
    /// The sampling thread caught a compiled body running.
    JittedMethodSample {
        /// The sampled method.
        method: MethodId,
        /// Entry point of the sampled body.
        start_pc: u64,
        /// PC observed by the sample, when available.
        sample_pc: Option<u64>,
    },
    /// The interpreter's invocation counter reached zero.
    InterpreterCounterTripped {
        /// The method whose counter tripped.
        method: MethodId,
    },
    /// A dynamic loop transfer wants a compiled body to jump into.
    JitCompilationInducedByDlt {
        /// The method being transferred into.
        method: MethodId,
    },
    /// Some other mechanism (redefinition, JProfiling, forced recompile)
    /// asks for a recompilation.
    OtherRecompilationTrigger {
        /// The method to recompile.
        method: MethodId,
        /// Entry point of the body being replaced.
        old_start_pc: u64,
    },
    /// A `new`-instance fast-path helper needs compiling.
    NewInstanceImpl {
        /// The helper method.
        method: MethodId,
    },
    /// A shareable method-handle invocation thunk needs compiling.
    ShareableMethodHandleThunk {
        /// The thunk method.
        method: MethodId,
    },
    /// A customized method-handle invocation thunk needs compiling.
    CustomMethodHandleThunk {
        /// The thunk method.
        method: MethodId,
    },
    /// A compiled body was invalidated and must be replaced.
    MethodBodyInvalidated {
        /// The method whose body died.
        method: MethodId,
        /// Entry point of the dead body.
        old_start_pc: u64,
    },
    /// The hardware profiler asks for an upgrade.
    HwpRecompilationTrigger {
        /// The method to recompile.
        method: MethodId,
        /// Entry point of the current body.
        old_start_pc: u64,
        /// Tier the hardware profile suggests.
        next_tier_hint: Tier,
    },
}

impl MethodEvent {
    /// The method the event is about.
    #[must_use]
    pub fn method(&self) -> MethodId {
        match *self {
            MethodEvent::InterpretedMethodSample { method, .. }
            | MethodEvent::JittedMethodSample { method, .. }
            | MethodEvent::InterpreterCounterTripped { method }
            | MethodEvent::JitCompilationInducedByDlt { method }
            | MethodEvent::OtherRecompilationTrigger { method, .. }
            | MethodEvent::NewInstanceImpl { method }
            | MethodEvent::ShareableMethodHandleThunk { method }
            | MethodEvent::CustomMethodHandleThunk { method }
            | MethodEvent::MethodBodyInvalidated { method, .. }
            | MethodEvent::HwpRecompilationTrigger { method, .. } => method,
        }
    }
}
