// SPDX-License-Identifier: Apache-2.0

//! External interfaces of the recompilation controller.
//!
//! The controller core never talks to the virtual machine, the operating
//! system or the shared class cache directly. It goes through the three
//! narrow traits defined here ([`VmRuntime`], [`PortLayer`], [`SharedCache`])
//! plus the process-wide [`RuntimeState`] snapshot that the VM keeps up to
//! date from its hooks. Everything behind these traits is an external
//! collaborator; everything in front of them is the controller core.
//!
//! Test doubles for all three traits live in the `testing` module, enabled
//! with the `testing` feature.

pub mod bytecode;
pub mod error;
pub mod ids;
pub mod invocation;
pub mod port;
pub mod runtime;
pub mod shared_cache;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bytecode::Bytecode;
pub use error::PortError;
pub use ids::{ClassId, MethodId, RomMethodId};
pub use invocation::{CounterError, InvocationCounter};
pub use port::{MachineCpuTime, PortLayer, ProcessCpuTime, SystemPortLayer};
pub use runtime::{VmAccess, VmRuntime};
pub use shared_cache::{ClassChainOffset, SccStoreError, SharedCache};
pub use state::RuntimeState;
