//! The three underlying primitives a region can wrap.
//!
//! They are plain blocking primitives built on `parking_lot` mutexes and
//! condition variables. Lock and unlock are separate calls (not RAII)
//! because a region's `exit` happens in a different call than its `enter`,
//! and a semaphore may be posted by a thread other than the one that waited.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::thread::ThreadToken;

/// Which primitive a region wraps. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionKind {
    /// Binary mutex; the owner must release it and may not re-enter.
    Mutex,
    /// Recursive mutex; the owner may re-enter and must exit as often.
    RecursiveMutex,
    /// Counting semaphore with one initial permit; any thread may post.
    Semaphore,
}

impl RegionKind {
    /// One-letter code used in diagnostic tables.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Mutex => 'M',
            Self::RecursiveMutex => 'R',
            Self::Semaphore => 'S',
        }
    }

    /// Whether only the locking thread may unlock.
    #[must_use]
    pub const fn has_owner(self) -> bool {
        matches!(self, Self::Mutex | Self::RecursiveMutex)
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mutex => write!(f, "Mutex"),
            Self::RecursiveMutex => write!(f, "Recursive Mutex"),
            Self::Semaphore => write!(f, "Semaphore"),
        }
    }
}

/// Observed state of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LockState {
    /// Held, or not yet opened by its first exit.
    Locked,
    /// Free.
    Unlocked,
}

#[derive(Debug, Default)]
pub(crate) struct BinaryMutex {
    owner: Mutex<Option<ThreadToken>>,
    released: Condvar,
}

impl BinaryMutex {
    fn lock(&self, me: ThreadToken) {
        let mut owner = self.owner.lock();
        while owner.is_some() {
            self.released.wait(&mut owner);
        }
        *owner = Some(me);
    }

    fn try_lock(&self, me: ThreadToken) -> bool {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return false;
        }
        *owner = Some(me);
        true
    }

    fn owner(&self) -> Option<ThreadToken> {
        *self.owner.lock()
    }

    /// Release if `me` holds it.
    fn unlock(&self, me: ThreadToken) -> bool {
        let mut owner = self.owner.lock();
        if *owner != Some(me) {
            return false;
        }
        *owner = None;
        drop(owner);
        self.released.notify_one();
        true
    }
}

#[derive(Debug, Default)]
struct RecursiveState {
    owner: Option<ThreadToken>,
    depth: u32,
}

#[derive(Debug, Default)]
pub(crate) struct RecursiveMutex {
    state: Mutex<RecursiveState>,
    released: Condvar,
}

impl RecursiveMutex {
    fn lock(&self, me: ThreadToken) -> u32 {
        let mut state = self.state.lock();
        while state.owner.is_some_and(|owner| owner != me) {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = state.depth.saturating_add(1);
        state.depth
    }

    fn try_lock(&self, me: ThreadToken) -> Option<u32> {
        let mut state = self.state.lock();
        if state.owner.is_some_and(|owner| owner != me) {
            return None;
        }
        state.owner = Some(me);
        state.depth = state.depth.saturating_add(1);
        Some(state.depth)
    }

    /// Returns the depth left after the release, or `None` if `me` does not
    /// own the mutex.
    fn unlock(&self, me: ThreadToken) -> Option<u32> {
        let mut state = self.state.lock();
        if state.owner != Some(me) || state.depth == 0 {
            return None;
        }
        state.depth -= 1;
        let left = state.depth;
        if left == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_one();
        }
        Some(left)
    }

    fn depth(&self) -> u32 {
        self.state.lock().depth
    }

    fn owner(&self) -> Option<ThreadToken> {
        self.state.lock().owner
    }
}

#[derive(Debug)]
pub(crate) struct CountingSemaphore {
    permits: Mutex<u32>,
    posted: Condvar,
}

impl CountingSemaphore {
    fn new(permits: u32) -> Self {
        Self {
            permits: Mutex::new(permits),
            posted: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.posted.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn post(&self) {
        let mut permits = self.permits.lock();
        *permits = permits.saturating_add(1);
        drop(permits);
        self.posted.notify_one();
    }

    fn available(&self) -> u32 {
        *self.permits.lock()
    }
}

/// The wrapped primitive, one variant per [`RegionKind`].
#[derive(Debug)]
pub(crate) enum Primitive {
    Mutex(BinaryMutex),
    RecursiveMutex(RecursiveMutex),
    Semaphore(CountingSemaphore),
}

impl Primitive {
    /// Create the primitive unlocked.
    pub(crate) fn new(kind: RegionKind) -> Self {
        match kind {
            RegionKind::Mutex => Self::Mutex(BinaryMutex::default()),
            RegionKind::RecursiveMutex => Self::RecursiveMutex(RecursiveMutex::default()),
            RegionKind::Semaphore => Self::Semaphore(CountingSemaphore::new(1)),
        }
    }

    pub(crate) fn kind(&self) -> RegionKind {
        match self {
            Self::Mutex(_) => RegionKind::Mutex,
            Self::RecursiveMutex(_) => RegionKind::RecursiveMutex,
            Self::Semaphore(_) => RegionKind::Semaphore,
        }
    }

    /// Block until acquired. Returns the recursion depth after acquiring,
    /// which is always 1 for the non-recursive kinds.
    pub(crate) fn acquire(&self, me: ThreadToken) -> u32 {
        match self {
            Self::Mutex(m) => {
                m.lock(me);
                1
            }
            Self::RecursiveMutex(m) => m.lock(me),
            Self::Semaphore(s) => {
                s.wait();
                1
            }
        }
    }

    /// Release once. Returns the depth left, or `None` if the primitive
    /// refused because `me` does not hold a mutex kind.
    pub(crate) fn release(&self, me: ThreadToken) -> Option<u32> {
        match self {
            Self::Mutex(m) => m.unlock(me).then_some(0),
            Self::RecursiveMutex(m) => m.unlock(me),
            Self::Semaphore(s) => {
                s.post();
                Some(0)
            }
        }
    }

    /// Current recursion depth; 0 for the non-recursive kinds.
    pub(crate) fn depth(&self) -> u32 {
        match self {
            Self::RecursiveMutex(m) => m.depth(),
            Self::Mutex(_) | Self::Semaphore(_) => 0,
        }
    }

    /// Thread that owns a mutex kind right now. Always `None` for
    /// semaphores, which have no owner.
    pub(crate) fn owner(&self) -> Option<ThreadToken> {
        match self {
            Self::Mutex(m) => m.owner(),
            Self::RecursiveMutex(m) => m.owner(),
            Self::Semaphore(_) => None,
        }
    }

    /// Non-blocking probe.
    ///
    /// Mutexes have no peek, so a try-lock is attempted and immediately
    /// undone. A recursive mutex that `me` already owns will accept the
    /// try-lock, so it only counts as free if the depth after the try-lock
    /// is 1. Semaphores are inspected directly.
    pub(crate) fn peek(&self, me: ThreadToken) -> LockState {
        match self {
            Self::Mutex(m) => {
                if m.try_lock(me) {
                    m.unlock(me);
                    LockState::Unlocked
                } else {
                    LockState::Locked
                }
            }
            Self::RecursiveMutex(m) => match m.try_lock(me) {
                Some(depth) => {
                    m.unlock(me);
                    if depth <= 1 {
                        LockState::Unlocked
                    } else {
                        LockState::Locked
                    }
                }
                None => LockState::Locked,
            },
            Self::Semaphore(s) => {
                if s.available() == 0 {
                    LockState::Locked
                } else {
                    LockState::Unlocked
                }
            }
        }
    }
}
