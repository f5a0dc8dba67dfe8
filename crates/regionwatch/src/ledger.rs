//! Ring buffer of recent lock attempts per region.
//!
//! The ledger exists for diagnostics only. It has its own small lock that is
//! never held while acquiring anything else, so it cannot take part in a
//! cycle with the registry table lock or a region's primitive.

use parking_lot::Mutex;
use serde::Serialize;

use crate::location::SourceLocation;
use crate::thread::ThreadToken;

/// Number of attempts remembered per region.
pub const LEDGER_CAPACITY: usize = 16;

/// One remembered lock attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// Thread that attempted the lock.
    pub thread: Option<ThreadToken>,
    /// Call site of the attempt.
    pub location: Option<SourceLocation>,
    /// Still waiting for the primitive.
    pub pending: bool,
}

/// Handle returned by [`AttemptLedger::record_attempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptSlot {
    index: usize,
    sequence: u64,
}

impl AttemptSlot {
    /// Ring index the attempt was written to.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

/// Copy of a ledger's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    /// Total attempts recorded. The latest one lives at `attempts % LEDGER_CAPACITY`.
    pub attempts: u64,
    /// Total attempts that acquired the region.
    pub completed: u64,
    /// Ring contents in index order.
    pub entries: Vec<AttemptRecord>,
}

impl LedgerSnapshot {
    /// Attempts still waiting on the primitive.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|entry| entry.pending).count()
    }
}

#[derive(Debug)]
struct LedgerState {
    attempts: u64,
    completed: u64,
    entries: [AttemptRecord; LEDGER_CAPACITY],
}

/// Fixed-capacity history of lock attempts.
#[derive(Debug)]
pub struct AttemptLedger {
    state: Mutex<LedgerState>,
}

impl Default for AttemptLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                attempts: 0,
                completed: 0,
                entries: [AttemptRecord::default(); LEDGER_CAPACITY],
            }),
        }
    }

    /// Record an attempt and mark it pending.
    pub fn record_attempt(&self, thread: ThreadToken, location: SourceLocation) -> AttemptSlot {
        let mut state = self.state.lock();
        state.attempts = state.attempts.wrapping_add(1);
        let sequence = state.attempts;
        let index = ring_index(sequence);
        if let Some(entry) = state.entries.get_mut(index) {
            *entry = AttemptRecord {
                thread: Some(thread),
                location: Some(location),
                pending: true,
            };
        }
        AttemptSlot { index, sequence }
    }

    /// Count a completed acquisition and clear the attempt's pending flag,
    /// unless the slot has been reused by a newer attempt since.
    pub fn mark_complete(&self, slot: AttemptSlot) {
        let mut state = self.state.lock();
        state.completed = state.completed.wrapping_add(1);
        let age = state.attempts.wrapping_sub(slot.sequence);
        if age < LEDGER_CAPACITY as u64 {
            if let Some(entry) = state.entries.get_mut(slot.index) {
                entry.pending = false;
            }
        }
    }

    /// Copy the current contents.
    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.lock();
        LedgerSnapshot {
            attempts: state.attempts,
            completed: state.completed,
            entries: state.entries.to_vec(),
        }
    }

    /// Forget all attempts.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.attempts = 0;
        state.completed = 0;
        state.entries = [AttemptRecord::default(); LEDGER_CAPACITY];
    }
}

fn ring_index(sequence: u64) -> usize {
    usize::try_from(sequence % LEDGER_CAPACITY as u64).unwrap_or(0)
}
