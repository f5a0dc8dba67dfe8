//! Small stable integer identities for threads.
//!
//! `std::thread::ThreadId` is opaque and cannot be stored in an atomic, so
//! every thread that touches a region is handed a [`ThreadToken`] on first
//! use. Tokens start at 1 and are never reused; 0 is reserved for "nobody".

use serde::Serialize;
use std::cell::Cell;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<Option<ThreadToken>> = const { Cell::new(None) };
}

/// Identity of a thread as recorded by regions and the attempt ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ThreadToken(NonZeroU64);

impl ThreadToken {
    /// Token of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(|slot| {
            if let Some(token) = slot.get() {
                return token;
            }
            let raw = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
            let token = Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN));
            slot.set(Some(token));
            token
        })
    }

    /// Raw value, never 0.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    pub(crate) fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub(crate) fn to_raw(token: Option<Self>) -> u64 {
        token.map_or(0, Self::get)
    }
}

impl fmt::Display for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_stable_per_thread() {
        let a = ThreadToken::current();
        let b = ThreadToken::current();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tokens_differ_between_threads() -> Result<(), String> {
        let mine = ThreadToken::current();
        let theirs = std::thread::spawn(ThreadToken::current)
            .join()
            .map_err(|e| format!("thread panicked: {e:?}"))?;
        assert_ne!(mine, theirs);
        Ok(())
    }

    #[test]
    fn test_raw_round_trip() {
        let token = ThreadToken::current();
        assert_eq!(ThreadToken::from_raw(ThreadToken::to_raw(Some(token))), Some(token));
        assert_eq!(ThreadToken::from_raw(ThreadToken::to_raw(None)), None);
    }
}
