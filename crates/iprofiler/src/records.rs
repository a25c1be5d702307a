// SPDX-License-Identifier: Apache-2.0

//! Profile records as application threads produce them.

use jitc_vm::{ClassId, MethodId};

/// Payload of one observation; the variant must match the bytecode family
/// at the record's PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPayload {
    /// Conditional branch outcome.
    BranchTaken(bool),
    /// Operand class of a `checkcast`/`instanceof`.
    OperandClass(ClassId),
    /// Dispatched invoke: receiver class plus the resolved edge.
    VirtualCall {
        /// Receiver class observed at the site.
        receiver: ClassId,
        /// The calling method.
        caller: MethodId,
        /// The resolved callee, when resolution succeeded.
        callee: Option<MethodId>,
    },
    /// Direct (static/special) invoke: fan-in only.
    DirectCall {
        /// The calling method.
        caller: MethodId,
        /// The resolved callee, when resolution succeeded.
        callee: Option<MethodId>,
    },
    /// Switch operand value.
    SwitchOperand(u32),
}

/// One `(pc, payload)` observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileRecord {
    /// Absolute PC of the bytecode.
    pub pc: u64,
    /// The observation payload.
    pub payload: RecordPayload,
}
