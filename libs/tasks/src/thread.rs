// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Task worker threads.
//!
//! A worker owns an OS thread bound to a [`TaskQueue`] and runs one of four
//! routines, selected from its [`TaskThreadInfo`]:
//!
//! - **shared FIFO** — pop one awaitable, resume it, repeat; used by pool
//!   workers that share a queue.
//! - **exclusive FIFO** — detach the entire queued range and resume it in
//!   push order; used by dedicated single-consumer threads.
//! - **exclusive priority** — as above, but the detached range is stably
//!   sorted by the 4-bit priority in the awaitable parameters first (higher
//!   runs first).
//! - **custom** — a user callback invoked each iteration; used for non-task
//!   loops such as the AIO poll.
//!
//! Idle policy: an empty queue decrements a small busy-spin budget before
//! the thread yields to the OS scheduler; any work resets the budget.

use crate::queue::TaskQueue;
use crate::raw::run_task;
use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Iterations a worker busy-spins on an empty queue before yielding.
const BUSY_LOOP_COUNT: u32 = 200;

/// Worker routine selection and thread parameters.
pub struct TaskThreadInfo {
    /// This thread is the only consumer of its queue.
    pub exclusive_queue: bool,
    /// Sort each detached range by awaitable priority before resuming.
    /// Requires `exclusive_queue`.
    pub sort_by_priority: bool,
    /// Busy-wait on an empty queue (with the spin budget) instead of
    /// returning to the routine immediately.
    pub wait_on_queue: bool,
    /// A custom routine run instead of the task routines. The callback is
    /// invoked every iteration with the thread's queue and returns a status
    /// code (the thread's exit value).
    pub custom_procedure: Option<Box<dyn FnMut(&TaskQueue) -> u32 + Send>>,
    /// Stack size of the OS thread; `0` uses the platform default.
    pub stack_size: usize,
    /// Debug name of the OS thread; empty for unnamed.
    pub debug_name: String,
}

impl Default for TaskThreadInfo {
    fn default() -> Self {
        Self {
            exclusive_queue: false,
            sort_by_priority: false,
            wait_on_queue: true,
            custom_procedure: None,
            stack_size: 0,
            debug_name: String::new(),
        }
    }
}

impl core::fmt::Debug for TaskThreadInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskThreadInfo")
            .field("exclusive_queue", &self.exclusive_queue)
            .field("sort_by_priority", &self.sort_by_priority)
            .field("wait_on_queue", &self.wait_on_queue)
            .field("custom", &self.custom_procedure.is_some())
            .field("debug_name", &self.debug_name)
            .finish()
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Invalid = 0,
    Active = 1,
    Destroyed = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ThreadRequest {
    None = 0,
    Create = 1,
    Destroy = 2,
}

struct ThreadShared {
    state: AtomicU8,
    request: AtomicU8,
}

impl ThreadShared {
    fn state(&self) -> ThreadState {
        match self.state.load(Ordering::Acquire) {
            1 => ThreadState::Active,
            2 => ThreadState::Destroyed,
            _ => ThreadState::Invalid,
        }
    }

    fn request(&self) -> ThreadRequest {
        match self.request.load(Ordering::Acquire) {
            1 => ThreadRequest::Create,
            2 => ThreadRequest::Destroy,
            _ => ThreadRequest::None,
        }
    }
}

/// An OS worker thread driving a [`TaskQueue`].
///
/// Dropping the thread requests destruction, waits for the routine to
/// acknowledge and joins the OS thread.
pub struct TaskThread {
    shared: Arc<ThreadShared>,
    queue: TaskQueue,
    join: Option<std::thread::JoinHandle<u32>>,
    debug_name: String,
}

impl TaskThread {
    /// Spawns a worker. Returns `None` when the OS thread could not be
    /// created.
    #[must_use]
    pub fn create(queue: TaskQueue, info: TaskThreadInfo) -> Option<Self> {
        let shared = Arc::new(ThreadShared {
            state: AtomicU8::new(ThreadState::Invalid as u8),
            request: AtomicU8::new(ThreadRequest::Create as u8),
        });

        let mut builder = std::thread::Builder::new();
        if !info.debug_name.is_empty() {
            builder = builder.name(info.debug_name.clone());
        }
        if info.stack_size != 0 {
            builder = builder.stack_size(info.stack_size);
        }

        let debug_name = info.debug_name.clone();
        let routine_shared = shared.clone();
        let routine_queue = queue.clone();
        let spawned = builder.spawn(move || thread_routine(routine_shared, routine_queue, info));

        match spawned {
            Ok(join) => Some(Self {
                shared,
                queue,
                join: Some(join),
                debug_name,
            }),
            Err(err) => {
                tracing::error!(?err, name = %debug_name, "failed to create task thread");
                None
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> ThreadState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state() == ThreadState::Active
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.is_running() && !self.queue.is_empty()
    }

    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    #[must_use]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl Drop for TaskThread {
    fn drop(&mut self) {
        // Wait for the thread to acknowledge any pending request first.
        while self.shared.request() != ThreadRequest::None {
            if self.shared.state() == ThreadState::Destroyed {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        self.shared
            .request
            .store(ThreadRequest::Destroy as u8, Ordering::Release);
        while self.shared.state() != ThreadState::Destroyed {
            // A panicked routine never reaches `Destroyed`; the join handle
            // settles either way.
            if self.join.as_ref().is_some_and(|join| join.is_finished()) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        if let Some(join) = self.join.take() {
            match join.join() {
                Ok(result) => {
                    tracing::debug!(name = %self.debug_name, result, "task thread joined");
                }
                Err(_) => {
                    tracing::error!(name = %self.debug_name, "task thread panicked");
                }
            }
        }
    }
}

impl core::fmt::Debug for TaskThread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskThread")
            .field("name", &self.debug_name)
            .field("state", &self.state())
            .finish()
    }
}

fn thread_routine(shared: Arc<ThreadShared>, queue: TaskQueue, mut info: TaskThreadInfo) -> u32 {
    debug_assert_eq!(shared.request(), ThreadRequest::Create);
    shared
        .state
        .store(ThreadState::Active as u8, Ordering::Release);
    shared
        .request
        .store(ThreadRequest::None as u8, Ordering::Release);

    let _span = tracing::debug_span!("task thread", name = %info.debug_name).entered();
    tracing::debug!("task thread started");

    let busy_wait = info.custom_procedure.is_none() && info.wait_on_queue;
    let mut busy_loop = BUSY_LOOP_COUNT;
    let mut result = 0;

    while shared.request() != ThreadRequest::Destroy {
        if busy_wait {
            if queue.is_empty() {
                if busy_loop > 0 {
                    busy_loop -= 1;
                } else {
                    std::thread::yield_now();
                }
                continue;
            }
            busy_loop = BUSY_LOOP_COUNT;
        }

        result = if let Some(custom) = info.custom_procedure.as_mut() {
            custom(&queue)
        } else if info.exclusive_queue {
            if info.sort_by_priority {
                exclusive_sorted_routine(&queue)
            } else {
                exclusive_fifo_routine(&queue)
            }
        } else {
            shared_routine(&queue)
        };
    }

    tracing::debug!("task thread stopping");
    shared
        .state
        .store(ThreadState::Destroyed as u8, Ordering::Release);
    result
}

/// Resume a single awaitable; pool workers sharing one queue.
fn shared_routine(queue: &TaskQueue) -> u32 {
    if let Some(task) = queue.pop_task() {
        run_task(task);
    }
    0
}

/// Detach the full range and resume it in push order.
fn exclusive_fifo_routine(queue: &TaskQueue) -> u32 {
    for task in queue.drain() {
        run_task(task);
    }
    0
}

/// Detach the full range, stably sort it by priority (higher first), then
/// resume.
fn exclusive_sorted_routine(queue: &TaskQueue) -> u32 {
    let mut batch = queue.drain();
    sort_batch(&mut batch);
    for task in batch {
        run_task(task);
    }
    0
}

fn sort_batch(batch: &mut [crate::raw::TaskRef]) {
    batch.sort_by_key(|task| core::cmp::Reverse(task.header().params().sort_priority()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TaskParams;
    use crate::raw::TaskRef;

    fn inert_with_priority(priority: u8) -> TaskRef {
        let task = crate::task::allocate_stub();
        task.header().set_params(TaskParams::priority(priority));
        task
    }

    #[test]
    fn batch_sort_is_stable_and_descending() {
        let priorities = [1u8, 3, 2, 3, 1];
        let mut batch: Vec<TaskRef> =
            priorities.iter().map(|p| inert_with_priority(*p)).collect();
        let tags: Vec<*const ()> = batch
            .iter()
            .map(|t| t.header_ptr().as_ptr().cast_const().cast())
            .collect();

        sort_batch(&mut batch);

        let sorted: Vec<u8> = batch
            .iter()
            .map(|t| t.header().params().sort_priority())
            .collect();
        assert_eq!(sorted, vec![3, 3, 2, 1, 1]);

        // Stability: equal priorities keep their original relative order.
        let pos = |ptr: *const ()| {
            batch
                .iter()
                .position(|t| core::ptr::eq(t.header_ptr().as_ptr().cast_const().cast(), ptr))
                .unwrap()
        };
        assert!(pos(tags[1]) < pos(tags[3]), "first `3` stays before second");
        assert!(pos(tags[0]) < pos(tags[4]), "first `1` stays before second");
    }
}
