//! One-shot gate that keeps a new region logically locked until its first
//! exit.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// Closed at creation, opened exactly once, never closed again.
#[derive(Debug, Default)]
pub(crate) struct BootstrapGate {
    open: AtomicBool,
    state: Mutex<bool>,
    opened: Condvar,
}

impl BootstrapGate {
    pub(crate) fn closed() -> Self {
        Self::default()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Block until the gate has been opened. Free once open.
    pub(crate) fn wait_open(&self) {
        if self.is_open() {
            return;
        }
        let mut open = self.state.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    /// Open the gate. Returns `true` only for the call that opened it.
    pub(crate) fn open(&self) -> bool {
        if self.is_open() {
            return false;
        }
        let mut open = self.state.lock();
        if *open {
            return false;
        }
        *open = true;
        self.open.store(true, Ordering::Release);
        drop(open);
        self.opened.notify_all();
        true
    }
}
