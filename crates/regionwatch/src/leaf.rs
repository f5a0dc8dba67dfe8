//! Leaf-region discipline.
//!
//! A leaf region must be the only region its thread holds. The held leaf is
//! genuine thread-local state, keyed by discipline so that independent
//! registries (one per test, for example) do not see each other's leaves.
//! The first violation disables enforcement for the owning registry for good:
//! reporting may itself need locks, so it must not be retried.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::error;

use crate::error::Violation;
use crate::region::RegionId;

static NEXT_DISCIPLINE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct HeldLeaf {
    discipline: u64,
    region: RegionId,
    name: Arc<str>,
}

thread_local! {
    static HELD_LEAVES: RefCell<Vec<HeldLeaf>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug)]
pub(crate) struct LeafDiscipline {
    id: u64,
    disabled: AtomicBool,
    violations: AtomicU64,
    last_violation: Mutex<Option<Violation>>,
}

impl LeafDiscipline {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_DISCIPLINE.fetch_add(1, Ordering::Relaxed),
            disabled: AtomicBool::new(false),
            violations: AtomicU64::new(0),
            last_violation: Mutex::new(None),
        }
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub(crate) fn violations(&self) -> u64 {
        self.violations.load(Ordering::Acquire)
    }

    pub(crate) fn last_violation(&self) -> Option<Violation> {
        self.last_violation.lock().clone()
    }

    /// Check an acquisition of `region` by the calling thread.
    ///
    /// Returns the violation only to the one caller that latched enforcement
    /// off; every later call is a no-op.
    pub(crate) fn on_enter(&self, region: RegionId, name: &Arc<str>, is_leaf: bool) -> Option<Violation> {
        if self.is_disabled() {
            return None;
        }
        HELD_LEAVES.with(|held| {
            let mut held = held.borrow_mut();
            match held.iter().find(|leaf| leaf.discipline == self.id) {
                Some(leaf) if leaf.region != region => {
                    if self.disabled.swap(true, Ordering::AcqRel) {
                        return None;
                    }
                    let violation = Violation::Leaf {
                        region: name.to_string(),
                        leaf: leaf.name.to_string(),
                    };
                    self.violations.fetch_add(1, Ordering::AcqRel);
                    *self.last_violation.lock() = Some(violation.clone());
                    Some(violation)
                }
                Some(_) => None,
                None => {
                    if is_leaf {
                        held.push(HeldLeaf {
                            discipline: self.id,
                            region,
                            name: Arc::clone(name),
                        });
                    }
                    None
                }
            }
        })
    }

    /// Forget the thread's held leaf after the logical unlock of `region`.
    pub(crate) fn on_exit(&self, region: RegionId, name: &str, is_leaf: bool) {
        if !is_leaf {
            return;
        }
        let enforcing = !self.is_disabled();
        HELD_LEAVES.with(|held| {
            let mut held = held.borrow_mut();
            match held.iter().position(|leaf| leaf.discipline == self.id) {
                Some(pos) => {
                    let matches = held.get(pos).is_some_and(|leaf| leaf.region == region);
                    if matches {
                        held.swap_remove(pos);
                    } else if enforcing {
                        let other = held.get(pos).map(|leaf| Arc::clone(&leaf.name));
                        error!(
                            region = name,
                            held_leaf = other.as_deref().unwrap_or("?"),
                            "Internal error: releasing leaf region while another leaf is recorded"
                        );
                    }
                }
                None if enforcing => {
                    error!(region = name, "Internal error: releasing leaf region with no leaf recorded");
                }
                None => {}
            }
        });
    }
}
