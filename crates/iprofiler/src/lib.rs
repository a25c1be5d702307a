// SPDX-License-Identifier: Apache-2.0

//! The interpreter profiler.
//!
//! Application threads record `(pc, payload)` observations of interpreted
//! bytecodes into fixed-size buffers. Full buffers are either posted to the
//! profiler's worker thread or parsed by the application thread itself,
//! depending on backlog and the configured discard budget. Parsing populates
//! two lock-free-read data structures:
//!
//! - the **bytecode hashtable**, keyed by bytecode PC, holding branch
//!   counters, switch histograms and call-graph class/weight observations;
//! - the **fan-in table**, mapping callees to their observed callers.
//!
//! Compilation threads read both without locks and consult the shared class
//! cache for profile data persisted by earlier runs; the merge policy lives
//! in [`profiler::InterpreterProfiler::profiling_entry`]. Persistence
//! serializes per-method entries into a balanced binary search tree stored
//! as attached data in the shared cache.

pub mod buffer;
pub mod entry;
pub mod error;
pub mod fanin;
pub mod history;
pub mod parser;
pub mod persist;
pub mod profiler;
pub mod records;
pub mod stats;
pub mod table;
pub mod tracking;

pub use buffer::{ProfileBuffer, SubmitOutcome, WorkerState};
pub use entry::{CallGraphSnapshot, EntryData, ProfileEntry, NUM_CS_SLOTS};
pub use error::Error;
pub use fanin::{FanInInfo, FanInTable};
pub use profiler::{InterpreterProfiler, PromotionSink};
pub use records::{ProfileRecord, RecordPayload};
pub use stats::ProfilerStats;
