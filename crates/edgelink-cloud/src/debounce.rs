//! # Debounce Scheduler
//!
//! One pending timer slot per announcement kind. Arming a kind again before
//! its timer expires replaces the previous timer, so a burst of triggers
//! collapses into a single action fired one quiet period after the last one.
//!
//! ## Timeline
//! ```text
//!   schedule(B) ──┐
//!                 │ gen=1  (aborted)
//!   schedule(B) ──┼──┐
//!                    │ gen=2  (aborted)
//!   schedule(B) ─────┼──┐
//!                       │ gen=3
//!                       └──────────── delay ────────────► fire(B, gen=3)
//! ```
//!
//! ## Supersession
//! Re-arming aborts the previous task and bumps the kind's generation. A task
//! that already woke up and is waiting for the fire lock sees a stale
//! generation and does nothing, so a superseded timer never fires even if
//! the abort lands too late.
//!
//! ## Locks
//! `fire_lock` is held for the whole run of an action; `state` only while
//! the pending table is read or changed. [`DebounceScheduler::cancel`] takes
//! `fire_lock` after clearing the slot, which makes it wait for an action
//! that is already running. Actions must not call `cancel`.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use edgelink_core::AnnouncementKind;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{CloudError, CloudResult};

// =============================================================================
// State
// =============================================================================

struct PendingAnnouncement {
    generation: u64,
    due_at: Instant,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    generations: HashMap<AnnouncementKind, u64>,
    pending: HashMap<AnnouncementKind, PendingAnnouncement>,
}

impl SchedulerState {
    fn next_generation(&mut self, kind: AnnouncementKind) -> u64 {
        let generation = self.generations.entry(kind).or_insert(0);
        *generation += 1;
        *generation
    }
}

// =============================================================================
// DebounceScheduler
// =============================================================================

/// Per-kind debounce timers on a tokio runtime.
pub struct DebounceScheduler {
    runtime: Handle,
    fire_lock: Mutex<()>,
    state: Mutex<SchedulerState>,
}

impl DebounceScheduler {
    /// Creates a scheduler that spawns its timers on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            fire_lock: Mutex::new(()),
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Creates a scheduler on the runtime of the calling thread.
    ///
    /// ## Errors
    /// [`CloudError::ServiceUnavailable`] outside a tokio runtime.
    pub fn current() -> CloudResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CloudError::ServiceUnavailable(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(runtime))
    }

    /// Arms `kind` to run `action` once, `delay` from now, replacing any
    /// pending timer of the same kind.
    pub fn schedule<F>(self: &Arc<Self>, kind: AnnouncementKind, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        let generation = state.next_generation(kind);
        let due_at = Instant::now() + delay;

        let scheduler: Weak<Self> = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(due_at).await;
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.fire(kind, generation, action);
            }
        });

        let previous = state.pending.insert(
            kind,
            PendingAnnouncement {
                generation,
                due_at,
                task,
            },
        );
        drop(state);

        if let Some(previous) = previous {
            previous.task.abort();
            debug!(kind = %kind, generation, "Rescheduled pending announcement");
        } else {
            debug!(kind = %kind, generation, delay_ms = delay.as_millis() as u64, "Scheduled announcement");
        }
    }

    /// Cancels the pending timer of `kind` without firing it.
    ///
    /// Returns once any action of any kind that is already running has
    /// finished. Returns true if a timer was pending.
    pub fn cancel(&self, kind: AnnouncementKind) -> bool {
        let removed = {
            let mut state = self.state.lock();
            state.next_generation(kind);
            state.pending.remove(&kind)
        };
        let cancelled = removed.is_some();
        if let Some(pending) = removed {
            pending.task.abort();
            debug!(kind = %kind, generation = pending.generation, "Cancelled pending announcement");
        }
        self.wait_for_running_action();
        cancelled
    }

    /// Cancels every pending timer and waits for a running action.
    pub fn cancel_all(&self) {
        let removed: Vec<_> = {
            let mut state = self.state.lock();
            let kinds: Vec<_> = state.pending.keys().copied().collect();
            for kind in &kinds {
                state.next_generation(*kind);
            }
            state.pending.drain().collect()
        };
        for (kind, pending) in removed {
            pending.task.abort();
            debug!(kind = %kind, "Cancelled pending announcement");
        }
        self.wait_for_running_action();
    }

    /// Kinds with an armed timer, in declaration order.
    pub fn pending_kinds(&self) -> Vec<AnnouncementKind> {
        let mut kinds: Vec<_> = self.state.lock().pending.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn is_pending(&self, kind: AnnouncementKind) -> bool {
        self.state.lock().pending.contains_key(&kind)
    }

    /// Deadline of the pending timer for `kind`.
    pub fn due_at(&self, kind: AnnouncementKind) -> Option<Instant> {
        self.state.lock().pending.get(&kind).map(|p| p.due_at)
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn fire<F>(&self, kind: AnnouncementKind, generation: u64, action: F)
    where
        F: FnOnce(),
    {
        let _running = self.fire_lock.lock();
        {
            let mut state = self.state.lock();
            let current = state.pending.get(&kind).map(|p| p.generation);
            if current != Some(generation) {
                trace!(kind = %kind, generation, "Stale timer ignored");
                return;
            }
            state.pending.remove(&kind);
        }
        debug!(kind = %kind, generation, "Firing announcement");
        action();
    }

    fn wait_for_running_action(&self) {
        drop(self.fire_lock.lock());
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        for (_, pending) in self.state.get_mut().pending.drain() {
            pending.task.abort();
        }
    }
}
