// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The task lifecycle state machine.
//!
//! A single atomic word tracks the reference count and four lifecycle bits:
//!
//! - `RUNNING` — some thread is currently polling the task. Exactly one
//!   thread may hold this bit; it owns the task's stage.
//! - `QUEUED` — the task's header is linked into some queue (or about to
//!   be). A queued task is resumed by whoever pops it; waking it again is a
//!   no-op.
//! - `NOTIFIED` — the task was woken while `RUNNING`; the polling thread
//!   must reschedule it once the poll returns instead of letting it idle.
//! - `COMPLETE` — the future ran to completion; wakes are ignored.
//!
//! Transitions are small CAS loops; the orderings mirror the usual
//! acquire-on-take / release-on-publish protocol for task stages.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

const RUNNING: usize = 1 << 0;
const QUEUED: usize = 1 << 1;
const NOTIFIED: usize = 1 << 2;
const COMPLETE: usize = 1 << 3;

const REF_SHIFT: usize = 4;
const REF_ONE: usize = 1 << REF_SHIFT;

/// What the waker should do after a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeAction {
    /// The caller took responsibility for the task: push it onto its bound
    /// queue (or run it inline when unbound).
    Enqueue,
    /// Nothing to do; the task is queued, running (now notified) or done.
    None,
}

pub(crate) struct State(AtomicUsize);

impl State {
    /// A fresh task: one reference, idle.
    pub(crate) const fn new() -> Self {
        Self(AtomicUsize::new(REF_ONE))
    }

    pub(crate) fn clone_ref(&self) {
        let prev = self.0.fetch_add(REF_ONE, Ordering::Relaxed);
        debug_assert!(prev >> REF_SHIFT > 0, "cloned a dead task ref");
    }

    /// Drops one reference; returns `true` when this was the last one.
    pub(crate) fn drop_ref(&self) -> bool {
        let prev = self.0.fetch_sub(REF_ONE, Ordering::Release);
        debug_assert!(prev >> REF_SHIFT > 0, "dropped a dead task ref");
        if prev >> REF_SHIFT == 1 {
            core::sync::atomic::fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Marks a fresh or woken task as queued, claiming the right to push it.
    ///
    /// Returns [`WakeAction::Enqueue`] when the caller won the race and must
    /// enqueue the task.
    pub(crate) fn transition_to_queued(&self) -> WakeAction {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current & COMPLETE != 0 || current & QUEUED != 0 {
                return WakeAction::None;
            }
            if current & RUNNING != 0 {
                // The polling thread reschedules once it is done.
                self.0.fetch_or(NOTIFIED, Ordering::AcqRel);
                return WakeAction::None;
            }
            match self.0.compare_exchange_weak(
                current,
                current | QUEUED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return WakeAction::Enqueue,
                Err(actual) => current = actual,
            }
        }
    }

    /// Takes a queued task for polling. The caller must have popped the
    /// header from its queue, which makes it the only possible claimant.
    pub(crate) fn transition_to_running(&self) {
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                Some((s & !(QUEUED | NOTIFIED)) | RUNNING)
            })
            .unwrap();
        debug_assert!(prev & RUNNING == 0, "task polled on two threads");
        debug_assert!(prev & QUEUED != 0, "task polled without being queued");
    }

    /// Ends a poll that returned `Pending` without a deferred self-enqueue.
    ///
    /// Returns `true` when the task was notified during the poll and must be
    /// rescheduled by the caller (which then owns the `QUEUED` bit).
    pub(crate) fn transition_to_idle(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            debug_assert!(current & RUNNING != 0);
            let next = if current & NOTIFIED != 0 {
                (current & !(RUNNING | NOTIFIED)) | QUEUED
            } else {
                current & !RUNNING
            };
            match self.0.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current & NOTIFIED != 0,
                Err(actual) => current = actual,
            }
        }
    }

    /// Ends a poll that returned `Pending` with a deferred self-enqueue: the
    /// task stays claimed (`QUEUED`) and the caller pushes it.
    pub(crate) fn transition_to_requeued(&self) {
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                Some((s & !(RUNNING | NOTIFIED)) | QUEUED)
            })
            .unwrap();
        debug_assert!(prev & RUNNING != 0);
    }

    /// Ends a poll that returned `Ready`.
    pub(crate) fn transition_to_complete(&self) {
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                Some((s & !(RUNNING | NOTIFIED)) | COMPLETE)
            })
            .unwrap();
        debug_assert!(prev & RUNNING != 0);
        debug_assert!(prev & COMPLETE == 0, "task completed twice");
    }

    /// Sanity snapshot used when deallocating.
    pub(crate) fn can_deallocate(&self) -> bool {
        let s = self.0.load(Ordering::Acquire);
        s & (RUNNING | QUEUED) == 0
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.load(Ordering::Relaxed);
        f.debug_struct("State")
            .field("refs", &(s >> REF_SHIFT))
            .field("running", &(s & RUNNING != 0))
            .field("queued", &(s & QUEUED != 0))
            .field("notified", &(s & NOTIFIED != 0))
            .field("complete", &(s & COMPLETE != 0))
            .finish()
    }
}
