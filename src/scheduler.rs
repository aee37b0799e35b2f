//! Per-group work scheduling
//!
//! At most one pass runs per group tag at any time. A trigger arriving
//! while a pass is running does not queue a second pass; it sets a pending
//! flag, and the running pass loops again before releasing the slot. Many
//! triggers during one pass collapse into a single rerun (latest wins,
//! since a pass always reloads its inputs from scratch).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Serialization state for one group tag
struct GroupSlot {
    lock: Mutex<()>,
    pending: AtomicBool,
}

/// Schedules reconciliation passes, one at a time per group tag
#[derive(Default)]
pub struct GroupScheduler {
    slots: DashMap<String, Arc<GroupSlot>>,
}

impl GroupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` under the group's slot, or coalesce into the running pass
    ///
    /// Returns `Some` with the final pass result when this caller executed
    /// the work (rerunning as long as triggers arrived meanwhile), `None`
    /// when a pass was already running and this trigger was folded into it.
    pub async fn run<F, Fut, T>(&self, tag: &str, work: F) -> Option<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = self
            .slots
            .entry(tag.to_string())
            .or_insert_with(|| {
                Arc::new(GroupSlot {
                    lock: Mutex::new(()),
                    pending: AtomicBool::new(false),
                })
            })
            .clone();

        let mut executed = None;
        loop {
            let attempt = slot.lock.try_lock();
            match attempt {
                Ok(_guard) => loop {
                    slot.pending.store(false, Ordering::SeqCst);
                    executed = Some(work().await);
                    if !slot.pending.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(tag = %tag, "trigger arrived during the pass, rerunning");
                },
                Err(_) => {
                    slot.pending.store(true, Ordering::SeqCst);
                    if executed.is_none() {
                        debug!(tag = %tag, "pass already running, coalescing trigger");
                        return None;
                    }
                    // Whoever took the slot clears the flag and runs fresh,
                    // so the racing trigger is covered.
                    return executed;
                }
            }
            // The guard is released at this point. A trigger may have set
            // the flag between the final check above and the release; it
            // failed try_lock against us and was not rerun, so take the
            // slot again.
            if !slot.pending.load(Ordering::SeqCst) {
                return executed;
            }
        }
    }
}
