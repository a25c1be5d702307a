// SPDX-License-Identifier: Apache-2.0

//! The compilation controller.
//!
//! Owns the three compilation queues (main asynchronous, low-priority,
//! JProfiling), the compilation worker threads and their lifecycle, and
//! the small diagnostics machinery around them. Events flow in through
//! [`CompilationInfo::process_event`], get turned into plans by the
//! configured strategy, pass through smooth-compilation adjustment, and
//! land on a queue; workers drain the queues into the [`CompileDispatcher`]
//! (the compiler proper, out of scope here) and drive the strategy's
//! `before_code_gen`/`post_compilation` callbacks around it.

pub mod activation;
pub mod controller;
pub mod error;
pub mod queue;
pub mod smooth;
pub mod tracing_buffer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use activation::YesNoMaybe;
pub use controller::{CompilationInfo, CompileDispatcher, CompileError, CompilePriority};
pub use error::Error;
pub use queue::{MethodToBeCompiled, entry_weight};
pub use tracing_buffer::{CompilationOperation, CompilationTracingFacility};
