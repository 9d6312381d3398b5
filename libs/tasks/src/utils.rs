// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Composite awaitables and thread-boundary waits.
//!
//! Everything here composes the one primitive the runtime has — suspend
//! onto a queue — into the shapes the engine needs: detached execution,
//! fan-out with tracked completion, moving batches between schedulers,
//! draining foreign queues, and blocking an OS thread on task completion.

use crate::queue::TaskQueue;
use crate::raw::{TaskRef, current_header, run_task};
use crate::scheduler::TaskScheduler;
use crate::state::WakeAction;
use crate::sync::{ManualResetBarrier, ManualResetEvent};
use crate::task::Task;
use core::pin::Pin;
use core::sync::atomic::{AtomicU32, Ordering};
use core::task::{Context, Poll};
use std::sync::{Arc, Mutex};

/// The queue the calling task is currently bound to, if any.
fn current_bound() -> Option<TaskQueue> {
    let header = current_header()?;
    // Safety: we are the task currently being polled on this thread, which
    // owns its binding.
    unsafe { header.as_ref().bound() }
}

/// Starts a detached raw task: binds it, claims it and runs it inline on the
/// calling thread until its first suspension.
fn start_detached(raw: TaskRef, bind: Option<TaskQueue>) {
    // Safety: the task was never scheduled; we hold it exclusively.
    unsafe { raw.header().bind(bind) };
    let _action = raw.header().state.transition_to_queued();
    debug_assert_eq!(_action, WakeAction::Enqueue);
    run_task(raw);
}

/// Pushes a raw task onto a scheduler without running it inline.
fn start_scheduled(raw: TaskRef, scheduler: &TaskScheduler) {
    // Safety: the task was never scheduled; we hold it exclusively.
    unsafe { raw.header().bind(Some(scheduler.queue().clone())) };
    let _action = raw.header().state.transition_to_queued();
    debug_assert_eq!(_action, WakeAction::Enqueue);
    scheduler.queue().push_task(raw);
}

/// Runs `task` detached: it executes inline on the calling thread until its
/// first suspension and is forgotten. Returns whether the task was valid.
pub fn execute_task(task: Task<()>) -> bool {
    match task.into_raw() {
        Some(raw) => {
            start_detached(raw, current_bound());
            true
        }
        None => false,
    }
}

/// Runs every task detached; returns whether any task was valid.
pub fn execute_tasks(tasks: Vec<Task<()>>) -> bool {
    let mut any = false;
    for task in tasks {
        any |= execute_task(task);
    }
    any
}

/// Schedules `task` onto `scheduler` and forgets it.
pub fn schedule_task(task: Task<()>, scheduler: &TaskScheduler) -> bool {
    match task.into_raw() {
        Some(raw) => {
            start_scheduled(raw, scheduler);
            true
        }
        None => false,
    }
}

/// Schedules every task onto `scheduler`; returns whether any was valid.
pub fn schedule_tasks(tasks: Vec<Task<()>>, scheduler: &TaskScheduler) -> bool {
    let mut any = false;
    for task in tasks {
        any |= schedule_task(task, scheduler);
    }
    any
}

/// Moves all of `queue`'s awaitables onto `scheduler` without awaiting
/// anything. Returns whether any awaitable moved.
pub fn schedule_queue(queue: &TaskQueue, scheduler: &TaskScheduler) -> bool {
    queue.schedule_all_on(scheduler, core::ptr::null_mut()) > 0
}

/// Like [`schedule_queue`], but writes `result` into every moved
/// awaitable's result slot first.
pub fn schedule_queue_with_result(
    queue: &TaskQueue,
    result: *mut (),
    scheduler: &TaskScheduler,
) -> bool {
    queue.schedule_all_on(scheduler, result) > 0
}

// === fan-out ===

/// Runs all `tasks` concurrently and resolves once every one of them
/// completed; resolves to whether the span was non-empty.
///
/// Children start inline on the calling thread (each runs until its first
/// suspension) and completion is tracked by an atomic countdown initialized
/// to N+1: every child decrements once, the caller decrements once after
/// spawning, and whoever observes the final decrement resumes the caller.
/// If all children finish synchronously the caller never suspends.
pub fn await_tasks(tasks: Vec<Task<()>>) -> AwaitTasks {
    AwaitTasks {
        tasks: Some(tasks),
        running: None,
    }
}

/// Future returned by [`await_tasks`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct AwaitTasks {
    tasks: Option<Vec<Task<()>>>,
    running: Option<Arc<AtomicU32>>,
}

impl Future for AwaitTasks {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);

        if let Some(running) = &this.running {
            return if running.load(Ordering::Acquire) == 0 {
                Poll::Ready(true)
            } else {
                Poll::Pending
            };
        }

        let tasks = this.tasks.take().expect("polled after completion");
        if tasks.is_empty() {
            return Poll::Ready(false);
        }

        let count = u32::try_from(tasks.len()).unwrap();
        let running = Arc::new(AtomicU32::new(count + 1));
        let bind = current_bound();

        for task in tasks {
            let tracker = running.clone();
            let waker = cx.waker().clone();
            let tracked = Task::new(async move {
                task.await;
                if tracker.fetch_sub(1, Ordering::AcqRel) == 1 {
                    waker.wake();
                }
            });
            if let Some(raw) = tracked.into_raw() {
                start_detached(raw, bind.clone());
            }
        }

        this.running = Some(running.clone());
        if running.fetch_sub(1, Ordering::AcqRel) == 1 {
            Poll::Ready(true)
        } else {
            Poll::Pending
        }
    }
}

/// Runs `task`, then re-enters on `resumer` before resuming the caller.
pub async fn await_on(task: Task<()>, resumer: &TaskScheduler) {
    task.await;
    resumer.schedule().await;
}

/// Fans out `tasks`; the caller resumes on `resumer` once all finished.
///
/// An empty span completes synchronously without touching `resumer`.
pub async fn await_on_all(tasks: Vec<Task<()>>, resumer: &TaskScheduler) {
    if await_tasks(tasks).await {
        resumer.schedule().await;
    }
}

/// Moves to `scheduler`, then runs `task` there.
pub async fn await_scheduled(task: Task<()>, scheduler: &TaskScheduler) {
    scheduler.schedule().await;
    task.await;
}

/// Fans `tasks` out onto `scheduler` and resumes once all finished.
pub async fn await_scheduled_all(tasks: Vec<Task<()>>, scheduler: &TaskScheduler) {
    let scheduled: Vec<Task<()>> = tasks
        .into_iter()
        .map(|task| {
            let scheduler = scheduler.clone();
            Task::new(async move {
                scheduler.schedule().await;
                task.await;
            })
        })
        .collect();
    await_tasks(scheduled).await;
}

/// Runs `task` on `scheduler`, then re-enters on `resumer`.
pub async fn await_scheduled_on(
    task: Task<()>,
    scheduler: &TaskScheduler,
    resumer: &TaskScheduler,
) {
    await_scheduled(task, scheduler).await;
    resumer.schedule().await;
}

/// Fans `tasks` out onto `scheduler`, then re-enters on `resumer`.
pub async fn await_scheduled_all_on(
    tasks: Vec<Task<()>>,
    scheduler: &TaskScheduler,
    resumer: &TaskScheduler,
) {
    await_scheduled_all(tasks, scheduler).await;
    resumer.schedule().await;
}

// === queue draining ===

/// Drains `queue`'s awaitables onto `scheduler`, then suspends the caller
/// behind them: when the caller resumes, all drained work has at least
/// started on the target scheduler. Resolves to whether anything drained.
pub async fn await_scheduled_queue(queue: &TaskQueue, scheduler: &TaskScheduler) -> bool {
    await_scheduled_queue_with_result(queue, core::ptr::null_mut(), scheduler).await
}

/// Like [`await_scheduled_queue`], delivering `result` to every drained
/// awaitable's result slot.
pub async fn await_scheduled_queue_with_result(
    queue: &TaskQueue,
    result: *mut (),
    scheduler: &TaskScheduler,
) -> bool {
    if queue.is_empty() {
        return false;
    }

    queue.schedule_all_on(scheduler, result);
    // Enqueue ourselves behind the moved range; the target consumes in push
    // order, so by the time we resume every drained awaitable has started.
    scheduler.schedule().await;
    true
}

/// Drains `queue` onto `scheduler`, then re-enters on `resumer`.
pub async fn await_scheduled_queue_on(
    queue: &TaskQueue,
    scheduler: &TaskScheduler,
    resumer: &TaskScheduler,
) {
    await_scheduled_queue(queue, scheduler).await;
    resumer.schedule().await;
}

// === thread-boundary waits ===

/// Runs `task` detached; `event` is set when it completes.
pub fn manual_wait_for(event: Arc<ManualResetEvent>, task: Task<()>) {
    execute_task(Task::new(async move {
        task.await;
        event.set();
    }));
}

/// Runs every task detached; `barrier` releases once all completed. The
/// barrier is re-armed to the number of tasks first.
pub fn manual_wait_for_all(barrier: Arc<ManualResetBarrier>, tasks: Vec<Task<()>>) {
    barrier.reset(u32::try_from(tasks.len()).unwrap());
    for task in tasks {
        let barrier = barrier.clone();
        execute_task(Task::new(async move {
            task.await;
            barrier.set();
        }));
    }
}

/// Schedules `task` onto `scheduler`; `event` is set when it completes.
pub fn manual_wait_for_scheduled(
    event: Arc<ManualResetEvent>,
    task: Task<()>,
    scheduler: &TaskScheduler,
) {
    schedule_task(
        Task::new(async move {
            task.await;
            event.set();
        }),
        scheduler,
    );
}

/// Blocks the calling OS thread until `task` completed.
///
/// Only valid at top-level thread boundaries; the task executes inline on
/// the calling thread until its first suspension, then on whichever threads
/// its awaits resume it.
pub fn wait_for(task: Task<()>) {
    let event = Arc::new(ManualResetEvent::new());
    manual_wait_for(event.clone(), task);
    event.wait();
}

/// Blocks the calling OS thread until all `tasks` completed.
pub fn wait_for_all(tasks: Vec<Task<()>>) {
    let barrier = Arc::new(ManualResetBarrier::new(0));
    manual_wait_for_all(barrier.clone(), tasks);
    barrier.wait();
}

/// Schedules every task onto `scheduler`; `barrier` releases once all
/// completed.
pub fn manual_wait_for_scheduled_all(
    barrier: Arc<ManualResetBarrier>,
    tasks: Vec<Task<()>>,
    scheduler: &TaskScheduler,
) {
    barrier.reset(u32::try_from(tasks.len()).unwrap());
    for task in tasks {
        let barrier = barrier.clone();
        schedule_task(
            Task::new(async move {
                task.await;
                barrier.set();
            }),
            scheduler,
        );
    }
}

/// Blocks the calling OS thread until `task`, run on `scheduler`, completed.
pub fn wait_for_scheduled(task: Task<()>, scheduler: &TaskScheduler) {
    let event = Arc::new(ManualResetEvent::new());
    manual_wait_for_scheduled(event.clone(), task, scheduler);
    event.wait();
}

/// Blocks the calling OS thread until all `tasks`, run on `scheduler`,
/// completed.
pub fn wait_for_scheduled_all(tasks: Vec<Task<()>>, scheduler: &TaskScheduler) {
    let barrier = Arc::new(ManualResetBarrier::new(0));
    manual_wait_for_scheduled_all(barrier.clone(), tasks, scheduler);
    barrier.wait();
}

/// Blocks the calling OS thread until `task` completed, returning its
/// result.
pub fn wait_for_result<T: Send + 'static>(task: Task<T>) -> T {
    let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
    let event = Arc::new(ManualResetEvent::new());
    {
        let slot = slot.clone();
        let event = event.clone();
        execute_task(Task::new(async move {
            let value = task.await;
            *slot.lock().unwrap() = Some(value);
            event.set();
        }));
    }
    event.wait();
    let mut slot = slot.lock().unwrap();
    slot.take().expect("task completed without storing a result")
}
