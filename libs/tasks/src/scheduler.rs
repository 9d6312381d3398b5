// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::params::TaskParams;
use crate::queue::{EnqueueCurrent, TaskQueue};
use core::pin::Pin;
use core::task::{Context, Poll};

/// Binds awaits to a queue: `scheduler.schedule().await` suspends the
/// calling task, enqueues its awaitable on the wrapped queue and resumes it
/// on whichever thread drives that queue. This is how "move this task to
/// thread X" is expressed everywhere in the runtime.
#[derive(Clone, Debug)]
pub struct TaskScheduler {
    queue: TaskQueue,
}

impl TaskScheduler {
    #[must_use]
    pub fn new(queue: TaskQueue) -> Self {
        Self { queue }
    }

    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Moves the calling task onto this scheduler.
    pub fn schedule(&self) -> Schedule<'_> {
        self.schedule_with(TaskParams::unused())
    }

    /// Moves the calling task onto this scheduler with explicit awaitable
    /// parameters (e.g. a priority for priority-sorted queue threads).
    pub fn schedule_with(&self, params: TaskParams) -> Schedule<'_> {
        let mut inner = self.queue.enqueue_current(params);
        inner.rebind = Some(self.clone());
        Schedule { inner }
    }
}

/// Future returned by [`TaskScheduler::schedule`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Schedule<'a> {
    inner: EnqueueCurrent<'a>,
}

impl Future for Schedule<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: `inner` is structurally pinned.
        let inner = unsafe { self.map_unchecked_mut(|this| &mut this.inner) };
        inner.poll(cx).map(|_result| ())
    }
}
