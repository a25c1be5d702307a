// SPDX-License-Identifier: Apache-2.0

//! Bytecode family tags.
//!
//! The controller treats bytecodes as opaque tagged operations at known
//! offsets; only the family matters for profiling. The VM maps its concrete
//! opcode set onto these tags when answering [`opcode_at`].
//!
//! [`opcode_at`]: crate::runtime::VmRuntime::opcode_at

/// The bytecode families the profiler distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bytecode {
    /// A two-way conditional branch (if-style opcodes).
    Branch,
    /// A `checkcast`-style type test recording the operand class.
    CheckCast,
    /// An `instanceof`-style type test recording the operand class.
    InstanceOf,
    /// A virtual invoke recording the receiver class.
    InvokeVirtual,
    /// An interface invoke recording the receiver class.
    InvokeInterface,
    /// A static invoke; contributes to fan-in only.
    InvokeStatic,
    /// A special (direct) invoke; contributes to fan-in only.
    InvokeSpecial,
    /// A `lookupswitch`-style multi-way branch recording the operand value.
    LookupSwitch,
    /// A `tableswitch`-style multi-way branch recording the operand value.
    TableSwitch,
    /// Anything the profiler does not track.
    Other,
}

impl Bytecode {
    /// Branches use the compact two-counter profile representation.
    #[must_use]
    pub fn is_compact(self) -> bool {
        matches!(self, Bytecode::Branch)
    }

    /// Switches use the segmented count representation.
    #[must_use]
    pub fn is_switch(self) -> bool {
        matches!(self, Bytecode::LookupSwitch | Bytecode::TableSwitch)
    }

    /// Families whose records carry a receiver/operand class and populate
    /// the call-graph representation.
    #[must_use]
    pub fn records_class(self) -> bool {
        matches!(
            self,
            Bytecode::CheckCast
                | Bytecode::InstanceOf
                | Bytecode::InvokeVirtual
                | Bytecode::InvokeInterface
        )
    }

    /// Direct invokes never populate the bytecode hashtable; the interpreter
    /// does not observe a receiver for them. They still feed the fan-in
    /// table.
    #[must_use]
    pub fn is_direct_invoke(self) -> bool {
        matches!(self, Bytecode::InvokeStatic | Bytecode::InvokeSpecial)
    }

    /// Any invoke, direct or dispatched.
    #[must_use]
    pub fn is_invoke(self) -> bool {
        self.is_direct_invoke()
            || matches!(self, Bytecode::InvokeVirtual | Bytecode::InvokeInterface)
    }

    /// True when the profiler keeps any per-PC state for this family.
    #[must_use]
    pub fn is_profiled(self) -> bool {
        self.is_compact() || self.is_switch() || self.records_class()
    }
}
