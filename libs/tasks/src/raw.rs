// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The type-erased, reference-counted raw task.
//!
//! A spawned task is one heap allocation: the intrusive [`Header`] followed
//! by the future (or its output). The header *is* the awaitable node from
//! the data model — it carries the continuation (the vtable poll), the queue
//! links, the packed parameters and the result slot — so suspending a task
//! on a queue links its header directly, with no further allocation.
//!
//! Once spawned, tasks are pinned; the scheduler moves [`TaskRef`]s around
//! instead, which are just counted pointers to the header. The task is
//! deallocated when the last `TaskRef` drops. All spawned futures are
//! reached through the header's `VTable`, so the runtime is compiled once
//! regardless of how many distinct future types are spawned.

use crate::TaskQueue;
use crate::params::TaskParams;
use crate::state::{State, WakeAction};
use core::cell::{Cell, UnsafeCell};
use core::mem::ManuallyDrop;
use core::pin::Pin;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use glacier_queue::{Linked, Links};

pub(crate) struct Header {
    /// The task's lifecycle state; always safe to access.
    pub(crate) state: State,
    vtable: &'static VTable,
    /// Queue links; the header may be a member of at most one queue.
    links: Links<Header>,
    /// The awaitable parameters (modifier + flags), packed.
    params: AtomicU32,
    /// Result slot written by queue-drain operations and read back by the
    /// resumed awaitable.
    pub(crate) result: AtomicPtr<()>,
    /// The scheduler queue the task is bound to; wakes push the header
    /// there. Guarded by the state machine: written by the running task or
    /// by a thread holding the popped (queued, not running) header, read by
    /// wakers between suspension and wake.
    bound: UnsafeCell<Option<TaskQueue>>,
    /// Deferred self-suspension target set by leaf awaitables mid-poll and
    /// consumed by the executor once the poll returned.
    pending_queue: UnsafeCell<Option<TaskQueue>>,
    /// The tracing span associated with this task.
    span: tracing::Span,
}

struct VTable {
    /// Poll the future with the given context.
    poll: unsafe fn(NonNull<Header>, &mut Context<'_>) -> Poll<()>,
    /// Move the completed output into `dst` (a `*mut F::Output`).
    take_output: unsafe fn(NonNull<Header>, *mut ()),
    /// Drop the task and free its memory.
    deallocate: unsafe fn(NonNull<Header>),
}

/// The single allocation behind a task.
#[repr(C)]
pub(crate) struct RawTask<F: Future> {
    /// Must be the first field so header and task pointers are
    /// interchangeable.
    header: Header,
    stage: UnsafeCell<Stage<F>>,
}

/// The lifecycle stage of the future: the future itself, then its output.
enum Stage<F: Future> {
    Pending(F),
    Ready(F::Output),
    Consumed,
}

/// A counted, type-erased pointer to a spawned task.
pub(crate) struct TaskRef(NonNull<Header>);

// === impl RawTask ===

impl<F> RawTask<F>
where
    F: Future + Send + 'static,
    F::Output: Send,
{
    const VTABLE: VTable = VTable {
        poll: Self::poll_raw,
        take_output: Self::take_output_raw,
        deallocate: Self::deallocate_raw,
    };

    pub(crate) fn allocate(future: F) -> TaskRef {
        let span = tracing::trace_span!(
            "task",
            output = %core::any::type_name::<F::Output>(),
        );
        let task = Box::new(RawTask {
            header: Header {
                state: State::new(),
                vtable: &Self::VTABLE,
                links: Links::new(),
                params: AtomicU32::new(TaskParams::unused().pack()),
                result: AtomicPtr::new(core::ptr::null_mut()),
                bound: UnsafeCell::new(None),
                pending_queue: UnsafeCell::new(None),
                span,
            },
            stage: UnsafeCell::new(Stage::Pending(future)),
        });
        // Safety: `Box::into_raw` never returns null; the leading header
        // field makes the casts below valid.
        TaskRef(unsafe { NonNull::new_unchecked(Box::into_raw(task)).cast() })
    }

    unsafe fn poll_raw(ptr: NonNull<Header>, cx: &mut Context<'_>) -> Poll<()> {
        // Safety: the state machine guarantees a single poller, which has
        // exclusive access to the stage.
        unsafe {
            let this = ptr.cast::<RawTask<F>>().as_ref();
            let _entered = this.header.span.clone().entered();
            let stage = &mut *this.stage.get();
            match stage {
                Stage::Pending(future) => {
                    // Safety: the task allocation never moves.
                    let future = Pin::new_unchecked(future);
                    match future.poll(cx) {
                        Poll::Ready(output) => {
                            *stage = Stage::Ready(output);
                            Poll::Ready(())
                        }
                        Poll::Pending => Poll::Pending,
                    }
                }
                _ => Poll::Ready(()),
            }
        }
    }

    unsafe fn take_output_raw(ptr: NonNull<Header>, dst: *mut ()) {
        // Safety: called with the completion published (poll returned
        // `Ready` on this thread or was acquired through the state load),
        // and the single consumer of the output.
        unsafe {
            let this = ptr.cast::<RawTask<F>>().as_ref();
            let stage = &mut *this.stage.get();
            match core::mem::replace(stage, Stage::Consumed) {
                Stage::Ready(output) => dst.cast::<F::Output>().write(output),
                _ => unreachable!("task output taken before completion"),
            }
        }
    }

    unsafe fn deallocate_raw(ptr: NonNull<Header>) {
        debug_assert!(
            ptr.as_ref().state.can_deallocate(),
            "deallocating a task that is still queued or running",
        );
        // Safety: refcount reached zero, nothing references the allocation.
        drop(unsafe { Box::from_raw(ptr.cast::<RawTask<F>>().as_ptr()) });
    }
}

// === impl Header ===

impl Header {
    pub(crate) fn params(&self) -> TaskParams {
        TaskParams::unpack(self.params.load(Ordering::Acquire))
    }

    pub(crate) fn set_params(&self, params: TaskParams) {
        self.params.store(params.pack(), Ordering::Release);
    }

    /// Rebinds the task to a scheduler queue.
    ///
    /// # Safety
    ///
    /// The caller must own the task in the state-machine sense: either it is
    /// the thread currently polling it, or it holds the popped header of a
    /// queued task exclusively.
    pub(crate) unsafe fn bind(&self, queue: Option<TaskQueue>) {
        // Safety: ownership per the function contract; wakers only read
        // `bound` for suspensions registered after this write.
        unsafe { *self.bound.get() = queue }
    }

    /// # Safety
    ///
    /// See [`Header::bind`]; additionally the returned clone must not be
    /// used to race a concurrent rebind.
    pub(crate) unsafe fn bound(&self) -> Option<TaskQueue> {
        // Safety: per the function contract.
        unsafe { (*self.bound.get()).clone() }
    }

    /// Sets the deferred self-suspension target.
    ///
    /// # Safety
    ///
    /// May only be called by the task itself while being polled.
    pub(crate) unsafe fn set_pending_queue(&self, queue: TaskQueue) {
        // Safety: only the polling thread touches this cell.
        unsafe { *self.pending_queue.get() = Some(queue) }
    }

    /// # Safety
    ///
    /// May only be called by the executor that just finished polling.
    pub(crate) unsafe fn take_pending_queue(&self) -> Option<TaskQueue> {
        // Safety: only the polling thread touches this cell.
        unsafe { (*self.pending_queue.get()).take() }
    }
}

// Safety: spawned futures are required to be `Send`, and the header's
// shared fields are atomics or guarded by the state machine.
unsafe impl Send for Header {}
// Safety: see above.
unsafe impl Sync for Header {}

// Safety: headers are pinned for the lifetime of the allocation; `TaskRef`
// hands the queue a counted reference, so a queued task cannot be freed.
unsafe impl Linked for Header {
    type Handle = TaskRef;

    fn into_ptr(handle: TaskRef) -> NonNull<Header> {
        let ptr = handle.0;
        core::mem::forget(handle);
        ptr
    }

    unsafe fn from_ptr(ptr: NonNull<Header>) -> TaskRef {
        TaskRef(ptr)
    }

    unsafe fn links(target: NonNull<Header>) -> NonNull<Links<Header>> {
        // Safety: `target` points at a live header.
        let links = unsafe { &raw mut (*target.as_ptr()).links };
        // Safety: fields of a non-null struct pointer are non-null.
        unsafe { NonNull::new_unchecked(links) }
    }
}

// === impl TaskRef ===

impl TaskRef {
    pub(crate) fn header(&self) -> &Header {
        // Safety: a `TaskRef` holds a reference, the allocation is alive.
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn header_ptr(&self) -> NonNull<Header> {
        self.0
    }

    /// Polls the task's future with the given context.
    ///
    /// # Safety
    ///
    /// The caller must hold the `RUNNING` bit (top-level execution) or be
    /// the parent task awaiting this task inline, which makes it the unique
    /// poller by construction.
    pub(crate) unsafe fn poll(&self, cx: &mut Context<'_>) -> Poll<()> {
        let poll_fn = self.header().vtable.poll;
        // Safety: per the function contract.
        unsafe { poll_fn(self.0, cx) }
    }

    /// Moves the completed output into `dst`.
    ///
    /// # Safety
    ///
    /// The task must be complete, `dst` must point to a `F::Output` slot of
    /// the spawned future's type, and the output must not have been taken.
    pub(crate) unsafe fn take_output(&self, dst: *mut ()) {
        let take_fn = self.header().vtable.take_output;
        // Safety: per the function contract.
        unsafe { take_fn(self.0, dst) }
    }

    /// Wakes the task: claims the queued bit and resumes it on its bound
    /// queue, or inline on the calling thread when unbound.
    pub(crate) fn wake_by_ref(&self) {
        match self.header().state.transition_to_queued() {
            WakeAction::Enqueue => self.clone().resume(),
            WakeAction::None => {}
        }
    }

    /// Delivers a claimed (queued) task to where it runs next. Consumes the
    /// caller's reference: it is either handed to the queue or dropped after
    /// running inline.
    pub(crate) fn resume(self) {
        // Safety: the task is queued-but-unlinked; we hold it exclusively.
        let bound = unsafe { self.header().bound() };
        match bound {
            Some(queue) => queue.push_task(self),
            None => run_task(self),
        }
    }

    pub(crate) fn raw_waker(&self) -> RawWaker {
        RawWaker::new(self.0.as_ptr().cast(), &WAKER_VTABLE)
    }
}

impl Clone for TaskRef {
    fn clone(&self) -> Self {
        self.header().state.clone_ref();
        Self(self.0)
    }
}

impl Drop for TaskRef {
    fn drop(&mut self) {
        if self.header().state.drop_ref() {
            let deallocate = self.header().vtable.deallocate;
            // Safety: last reference gone; nothing can reach the task.
            unsafe { deallocate(self.0) }
        }
    }
}

impl core::fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRef")
            .field("addr", &self.0)
            .field("state", &self.header().state)
            .finish()
    }
}

// Safety: task futures are `Send` and the header is `Sync`.
unsafe impl Send for TaskRef {}
// Safety: see above.
unsafe impl Sync for TaskRef {}

// === waker plumbing ===

static WAKER_VTABLE: RawWakerVTable = RawWakerVTable::new(
    waker_clone,
    waker_wake,
    waker_wake_by_ref,
    waker_drop,
);

fn waker_clone(data: *const ()) -> RawWaker {
    // Safety: waker data is always a live header pointer.
    let header = unsafe { &*data.cast::<Header>() };
    header.state.clone_ref();
    RawWaker::new(data, &WAKER_VTABLE)
}

fn waker_wake(data: *const ()) {
    // Safety: the waker owns one reference; adopt and drop it after waking.
    let task = TaskRef(unsafe { NonNull::new_unchecked(data.cast_mut().cast()) });
    task.wake_by_ref();
}

fn waker_wake_by_ref(data: *const ()) {
    // Safety: waker data is always a live header pointer, and waking by ref
    // must not consume the waker's reference.
    let task = ManuallyDrop::new(TaskRef(unsafe {
        NonNull::new_unchecked(data.cast_mut().cast())
    }));
    task.wake_by_ref();
}

fn waker_drop(data: *const ()) {
    // Safety: the waker owns one reference.
    drop(TaskRef(unsafe {
        NonNull::new_unchecked(data.cast_mut().cast())
    }));
}

// === current-task context ===

std::thread_local! {
    static CURRENT_TASK: Cell<Option<NonNull<Header>>> = const { Cell::new(None) };
}

pub(crate) struct CurrentGuard {
    prev: Option<NonNull<Header>>,
}

impl CurrentGuard {
    pub(crate) fn enter(header: NonNull<Header>) -> Self {
        let prev = CURRENT_TASK.with(|c| c.replace(Some(header)));
        Self { prev }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|c| c.set(self.prev));
    }
}

/// The header of the task currently being polled on this thread, if any.
pub(crate) fn current_header() -> Option<NonNull<Header>> {
    CURRENT_TASK.with(Cell::get)
}

// === executor ===

/// Runs a claimed (queued) task on the calling thread until it completes or
/// suspends. This is the body of every queue consumer.
pub(crate) fn run_task(task: TaskRef) {
    task.header().state.transition_to_running();

    let raw = task.raw_waker();
    // Safety: the `ManuallyDrop` waker borrows the executor's reference for
    // the duration of the poll instead of owning one.
    let waker = ManuallyDrop::new(unsafe { Waker::from_raw(raw) });
    let mut cx = Context::from_waker(&waker);

    let guard = CurrentGuard::enter(task.header_ptr());
    // Safety: we hold the `RUNNING` bit.
    let poll = unsafe { task.poll(&mut cx) };
    drop(guard);

    match poll {
        Poll::Ready(()) => {
            // Safety: the poll has returned; we are the executor. A stale
            // deferred target can be left behind when a combinator completed
            // without resuming the suspending leaf; discard it.
            drop(unsafe { task.header().take_pending_queue() });
            task.header().state.transition_to_complete();
            drop(task);
        }
        Poll::Pending => {
            // Safety: the poll has returned; we are the executor.
            let deferred = unsafe { task.header().take_pending_queue() };
            if let Some(target) = deferred {
                // The task suspended onto a queue: hand our reference over
                // while still claimed, so a wake cannot double-enqueue it.
                task.header().state.transition_to_requeued();
                target.push_task(task);
            } else if task.header().state.transition_to_idle() {
                // Woken mid-poll; run it again.
                task.resume();
            } else {
                drop(task);
            }
        }
    }
}
