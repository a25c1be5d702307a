// SPDX-License-Identifier: Apache-2.0

//! The per-method invocation counter word.
//!
//! The interpreter stores the remaining invocation count for a method in a
//! single machine word of method metadata. The encoding is shared with the
//! VM: a countable method stores `(count << 1) | 1` (low bit set), and the
//! reserved word value `-1` means "queued for compilation". All updates go
//! through compare-and-swap; a failed exchange is reported to the caller,
//! which either retries or abandons the edit depending on the call site.

use std::sync::atomic::{AtomicI64, Ordering};

/// Raw word value meaning "this method has been queued for compilation".
pub const QUEUED_FOR_COMPILATION: i64 = -1;

/// Errors from invocation-counter edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CounterError {
    /// Another thread changed the word between read and update.
    #[error("invocation counter word changed concurrently")]
    Contended,
    /// The requested count is negative; negative counts have no encoding
    /// and a wrapped store could alias the reserved "queued" word.
    #[error("invocation count {requested} is negative and cannot be encoded")]
    NegativeCount {
        /// The count the caller asked to store.
        requested: i64,
    },
    /// Encoding the requested count would collide with the reserved
    /// "queued for compilation" word.
    #[error("invocation count {requested} would encode the queued sentinel")]
    WouldEncodeQueued {
        /// The count the caller asked to store.
        requested: i64,
    },
    /// The word does not currently hold a countable encoding.
    #[error("method is not in a countable state")]
    NotCountable,
}

/// A single CAS-updated counter word, in the VM's encoding.
#[derive(Debug)]
pub struct InvocationCounter {
    word: AtomicI64,
}

impl InvocationCounter {
    /// Creates a counter holding `count` invocations.
    #[must_use]
    pub fn new(count: i64) -> Self {
        InvocationCounter {
            word: AtomicI64::new(encode(count)),
        }
    }

    /// Reads the raw word.
    #[must_use]
    pub fn raw(&self) -> i64 {
        self.word.load(Ordering::Acquire)
    }

    /// Returns the decoded count, or `None` when the method is queued or
    /// otherwise not in a countable state.
    #[must_use]
    pub fn count(&self) -> Option<i64> {
        decode(self.raw())
    }

    /// True when the word holds the queued sentinel.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.raw() == QUEUED_FOR_COMPILATION
    }

    /// Replaces `old_count` with `new_count`, failing on contention.
    ///
    /// Negative counts and counts whose encoding would alias the queued
    /// sentinel are rejected up front with a typed error; the word is left
    /// untouched in every error case.
    pub fn set_count(&self, old_count: i64, new_count: i64) -> Result<(), CounterError> {
        if new_count < 0 {
            return Err(CounterError::NegativeCount {
                requested: new_count,
            });
        }
        let encoded = encode(new_count);
        if encoded == QUEUED_FOR_COMPILATION {
            return Err(CounterError::WouldEncodeQueued {
                requested: new_count,
            });
        }
        // Shifting must round-trip; a count big enough to lose its top bit
        // has no faithful encoding.
        if decode(encoded) != Some(new_count) {
            return Err(CounterError::WouldEncodeQueued {
                requested: new_count,
            });
        }
        self.word
            .compare_exchange(
                encode(old_count),
                encoded,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| CounterError::Contended)
    }

    /// Subtracts `amount` from the current count, flooring at `floor`.
    ///
    /// Returns the new count on success. Fails with [`CounterError::NotCountable`]
    /// when the word holds the queued sentinel (or any non-countable value)
    /// and with [`CounterError::Contended`] when the CAS loses a race; the
    /// caller decides whether to retry.
    pub fn decrement(&self, amount: i64, floor: i64) -> Result<i64, CounterError> {
        let raw = self.raw();
        let Some(count) = decode(raw) else {
            return Err(CounterError::NotCountable);
        };
        let new_count = (count - amount).max(floor).max(0);
        if new_count == count {
            return Ok(count);
        }
        self.word
            .compare_exchange(raw, encode(new_count), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| new_count)
            .map_err(|_| CounterError::Contended)
    }

    /// Marks the method as queued for compilation.
    ///
    /// Returns the count that was displaced, or an error when the method is
    /// already queued.
    pub fn mark_queued(&self) -> Result<i64, CounterError> {
        let raw = self.raw();
        let Some(count) = decode(raw) else {
            return Err(CounterError::NotCountable);
        };
        self.word
            .compare_exchange(
                raw,
                QUEUED_FOR_COMPILATION,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| count)
            .map_err(|_| CounterError::Contended)
    }
}

fn encode(count: i64) -> i64 {
    (count << 1) | 1
}

fn decode(word: i64) -> Option<i64> {
    if word == QUEUED_FOR_COMPILATION || word & 1 == 0 {
        None
    } else {
        Some(word >> 1)
    }
}
