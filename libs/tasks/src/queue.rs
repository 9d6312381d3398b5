// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The awaitable task queue.
//!
//! A `TaskQueue` is a lock-free MPSC queue of suspended task headers.
//! Suspending onto a queue is the fundamental wait primitive of the runtime:
//! [`TaskQueue::enqueue_current`] parks the calling task's header on the
//! queue, and whichever thread pops the header resumes the task — queue
//! threads do this in a loop, coordination primitives (the resource
//! tracker's single-flight load, queue draining) do it explicitly through
//! [`TaskQueue::resume_all`] and [`TaskQueue::schedule_all_on`].

use crate::params::TaskParams;
use crate::raw::{self, TaskRef, current_header};
use crate::scheduler::TaskScheduler;
use core::pin::Pin;
use core::ptr::NonNull;
use core::sync::atomic::Ordering;
use core::task::{Context, Poll};
use glacier_queue::LinkedQueue;
use std::sync::Arc;

/// A multi-producer, single-consumer queue of suspended awaitables.
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<LinkedQueue<raw::Header>>,
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        // The stub is an inert task that never runs; the queue owns it.
        let stub = crate::task::allocate_stub();
        Self {
            inner: Arc::new(LinkedQueue::new_with_stub(stub)),
        }
    }

    /// `true` when no awaitable is currently linked (racy hint, used by the
    /// worker idle loops).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn push_task(&self, task: TaskRef) {
        self.inner.push_back(task);
    }

    pub(crate) fn pop_task(&self) -> Option<TaskRef> {
        self.inner.pop()
    }

    /// Pops every queued awaitable, in push order.
    pub(crate) fn drain(&self) -> Vec<TaskRef> {
        self.inner.consume().collect()
    }

    /// Suspends the calling task onto this queue.
    ///
    /// The task resumes once some thread pops its header and resumes it; the
    /// future resolves to the value of the header's result slot (set by
    /// queue-drain operations, null otherwise).
    ///
    /// # Panics
    ///
    /// Panics when polled outside a runtime task.
    pub fn enqueue_current(&self, params: TaskParams) -> EnqueueCurrent<'_> {
        EnqueueCurrent {
            queue: self,
            params,
            rebind: None,
            enqueued: false,
        }
    }

    /// Pops every queued awaitable and resumes each — on its bound
    /// scheduler, or inline on this thread when unbound. Returns how many
    /// awaitables were resumed.
    pub fn resume_all(&self) -> u32 {
        let mut resumed = 0;
        for task in self.inner.consume() {
            task.resume();
            resumed += 1;
        }
        resumed
    }

    /// Pops and resumes a single awaitable.
    pub fn resume_next(&self) -> bool {
        match self.pop_task() {
            Some(task) => {
                task.resume();
                true
            }
            None => false,
        }
    }

    /// Moves every queued awaitable onto `scheduler`'s queue, writing
    /// `result` into each awaitable's result slot first. Returns how many
    /// awaitables moved.
    ///
    /// The moved awaitables resume on the target scheduler's threads, in
    /// the order they were queued here.
    pub fn schedule_all_on(&self, scheduler: &TaskScheduler, result: *mut ()) -> u32 {
        let target = scheduler.queue();
        let mut moved = 0;
        for task in self.inner.consume() {
            debug_assert!(
                task.header().result.load(Ordering::Relaxed).is_null(),
                "queued awaitable already carries a result",
            );
            task.header().result.store(result, Ordering::Release);
            // Safety: we popped the header; the task is claimed and cannot
            // be touched by anyone else until it is pushed again.
            unsafe { task.header().bind(Some(target.clone())) };
            target.push_task(task);
            moved += 1;
        }
        moved
    }

}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("empty", &self.is_empty())
            .finish()
    }
}

/// Future returned by [`TaskQueue::enqueue_current`]; see there.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct EnqueueCurrent<'a> {
    queue: &'a TaskQueue,
    params: TaskParams,
    /// Scheduler to bind the task to before suspending (`await scheduler`
    /// semantics); `None` leaves the binding untouched.
    pub(crate) rebind: Option<TaskScheduler>,
    enqueued: bool,
}

impl Future for EnqueueCurrent<'_> {
    type Output = *mut ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);
        if this.enqueued {
            let header = current_header().expect("resumed outside a runtime task");
            // Safety: the header is the current task's; reading the result
            // slot after resumption is the receiving side of
            // `schedule_all_on`'s release store.
            let result = unsafe { header.as_ref() }
                .result
                .swap(core::ptr::null_mut(), Ordering::Acquire);
            return Poll::Ready(result);
        }

        let header: NonNull<raw::Header> = current_header()
            .expect("task queues may only be awaited from inside a runtime task");
        // Safety: we are the task currently being polled, which owns its
        // header's binding and deferred-suspension cells.
        unsafe {
            let header = header.as_ref();
            header.set_params(this.params);
            if let Some(scheduler) = this.rebind.take() {
                header.bind(Some(scheduler.queue().clone()));
            }
            header.set_pending_queue(this.queue.clone());
        }
        this.enqueued = true;
        Poll::Pending
    }
}
