// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::params::{AwaitModifier, TaskFlags, TaskParams};
use crate::raw::{RawTask, TaskRef};
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::pin::Pin;
use core::task::{Context, Poll};

/// A lazily-executed unit of work with a typed result.
///
/// Creating a task does not run anything: the future starts executing when
/// the task is awaited (it then runs inline as part of the awaiting task,
/// like any nested future) or when it is handed to the runtime through
/// [`utils::execute_task`], [`utils::schedule_task`] or one of the composite
/// awaits.
///
/// Tasks are move-only and may be awaited or scheduled exactly once.
///
/// [`utils::execute_task`]: crate::utils::execute_task
/// [`utils::schedule_task`]: crate::utils::schedule_task
#[must_use = "a task does nothing until awaited or scheduled"]
pub struct Task<T> {
    raw: Option<TaskRef>,
    _output: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Task<T> {
    /// Wraps a future into a task.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            raw: Some(RawTask::allocate(future)),
            _output: PhantomData,
        }
    }

    /// Attaches priority flags to the task's awaitable parameters; queue
    /// threads sorting by priority use them to order resumption.
    #[must_use]
    pub fn with_flags(self, flags: TaskFlags) -> Self {
        if let Some(raw) = &self.raw {
            raw.header().set_params(TaskParams {
                modifier: AwaitModifier::PriorityFlags,
                flags,
            });
        }
        self
    }
}

impl<T> Task<T> {
    /// `false` for a task that was already consumed by the runtime.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.raw.is_some()
    }

    pub(crate) fn into_raw(mut self) -> Option<TaskRef> {
        self.raw.take()
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);
        let raw = this
            .raw
            .as_ref()
            .expect("a task may only be awaited once");

        // Safety: awaiting a task makes the awaiting task the unique poller;
        // the raw task was never scheduled (the handle still owns it).
        let poll = unsafe { raw.poll(cx) };
        match poll {
            Poll::Ready(()) => {
                let mut output = MaybeUninit::<T>::uninit();
                // Safety: the poll above returned `Ready` on this thread and
                // `output` is the spawned future's output type.
                unsafe {
                    raw.take_output(output.as_mut_ptr().cast());
                }
                this.raw = None;
                // Safety: `take_output` initialized the slot.
                Poll::Ready(unsafe { output.assume_init() })
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> core::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task").field("valid", &self.valid()).finish()
    }
}

/// Allocates the inert stub task owned by every [`TaskQueue`].
///
/// [`TaskQueue`]: crate::TaskQueue
pub(crate) fn allocate_stub() -> TaskRef {
    RawTask::allocate(async {})
}
