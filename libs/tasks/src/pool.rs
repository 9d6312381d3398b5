// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The task thread pool.
//!
//! A pool owns a fixed set of managed workers sharing one queue, plus — when
//! created with an AIO port — one dedicated worker per port slot running the
//! AIO poll routine. On-demand workers and user-attached threads can be
//! added and removed by name.
//!
//! Destruction order is user-attached threads, on-demand threads, then the
//! managed workers.

use crate::queue::TaskQueue;
use crate::scheduler::TaskScheduler;
use crate::thread::{TaskThread, TaskThreadInfo};
use glacier_aio::{AioPort, ProcessEventsInfo};
use glacier_collections::HashMap;
use glacier_mem::AllocRef;
use glacier_util::hash_str;

/// Creation parameters of a [`TaskThreadPool`].
pub struct TaskThreadPoolCreateInfo {
    /// Number of managed workers sharing the pool queue.
    pub thread_count: u32,
    /// When set, the pool additionally spawns one dedicated worker per AIO
    /// port slot running the port's poll routine.
    pub aioport: Option<AioPort>,
    /// Debug-name template of managed workers; `{}` is replaced with the
    /// worker index.
    pub debug_name_format: String,
}

impl Default for TaskThreadPoolCreateInfo {
    fn default() -> Self {
        Self {
            thread_count: 2,
            aioport: None,
            debug_name_format: String::from("glacier-worker-{}"),
        }
    }
}

/// A pool of task worker threads sharing one queue.
pub struct TaskThreadPool {
    queue: TaskQueue,
    managed: Vec<TaskThread>,
    created: HashMap<TaskThread>,
    attached: HashMap<TaskThread>,
}

impl TaskThreadPool {
    /// Spawns the pool. Workers that fail to spawn are skipped (and logged
    /// by [`TaskThread::create`]).
    #[must_use]
    pub fn create(alloc: AllocRef, queue: TaskQueue, info: TaskThreadPoolCreateInfo) -> Self {
        let mut managed = Vec::with_capacity(info.thread_count as usize);

        for index in 0..info.thread_count {
            let debug_name = info
                .debug_name_format
                .replacen("{}", &index.to_string(), 1);
            let thread_info = TaskThreadInfo {
                debug_name,
                ..TaskThreadInfo::default()
            };
            if let Some(thread) = TaskThread::create(queue.clone(), thread_info) {
                managed.push(thread);
            }
        }

        // One additional worker per AIO port slot, running the poll routine.
        if let Some(port) = &info.aioport {
            for index in 0..port.worker_limit() {
                let port = port.clone();
                let thread_info = TaskThreadInfo {
                    exclusive_queue: true,
                    wait_on_queue: false,
                    custom_procedure: Some(Box::new(move |_queue: &TaskQueue| {
                        port.process_events(ProcessEventsInfo {
                            timeout_ms: 250,
                            events_max: 4,
                        })
                    })),
                    debug_name: format!("glacier-aio-{index}"),
                    ..TaskThreadInfo::default()
                };
                if let Some(thread) = TaskThread::create(queue.clone(), thread_info) {
                    managed.push(thread);
                }
            }
        }

        tracing::debug!(workers = managed.len(), "task thread pool created");

        Self {
            queue,
            managed,
            created: HashMap::new(alloc.clone()),
            attached: HashMap::new(alloc),
        }
    }

    /// The shared queue of the managed workers.
    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// A scheduler targeting the managed queue.
    #[must_use]
    pub fn scheduler(&self) -> TaskScheduler {
        TaskScheduler::new(self.queue.clone())
    }

    #[must_use]
    pub fn thread_count(&self) -> u32 {
        self.managed.len() as u32
    }

    #[must_use]
    pub fn managed_thread_count(&self) -> u32 {
        self.managed.len() as u32 + self.created.count()
    }

    /// Creates a named on-demand worker with its own dedicated queue role.
    ///
    /// # Panics
    ///
    /// Panics when a worker with this name already exists.
    pub fn create_thread(&mut self, name: &str) -> &TaskThread {
        let key = hash_str(name);
        assert!(
            !self.created.contains(key),
            "a pool thread named '{name}' already exists",
        );

        let thread_info = TaskThreadInfo {
            debug_name: name.to_owned(),
            ..TaskThreadInfo::default()
        };
        let thread = TaskThread::create(self.queue.clone(), thread_info)
            .expect("failed to spawn on-demand pool thread");
        self.created.set(key, thread);
        self.created.get(key).unwrap()
    }

    #[must_use]
    pub fn find_thread(&self, name: &str) -> Option<&TaskThread> {
        self.created.get(hash_str(name))
    }

    /// Destroys a named on-demand worker; `true` when it existed.
    pub fn destroy_thread(&mut self, name: &str) -> bool {
        self.created.remove(hash_str(name)).is_some()
    }

    /// Attaches a user-owned thread under a name.
    ///
    /// # Panics
    ///
    /// Panics when a thread with this name is already attached.
    pub fn attach_thread(&mut self, name: &str, thread: TaskThread) -> &TaskThread {
        let key = hash_str(name);
        assert!(
            !self.attached.contains(key),
            "a user thread named '{name}' is already attached",
        );
        self.attached.set(key, thread);
        self.attached.get(key).unwrap()
    }

    /// Detaches a user thread, handing ownership back to the caller.
    pub fn detach_thread(&mut self, name: &str) -> Option<TaskThread> {
        self.attached.remove(hash_str(name))
    }

    /// An estimate of queued-but-unstarted work on the managed queue.
    #[must_use]
    pub fn estimated_task_count(&self) -> u32 {
        u32::from(!self.queue.is_empty())
    }
}

impl Drop for TaskThreadPool {
    fn drop(&mut self) {
        // Drain user threads, then on-demand threads, then managed workers.
        self.attached.clear();
        self.created.clear();
        self.managed.clear();
    }
}

impl core::fmt::Debug for TaskThreadPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskThreadPool")
            .field("managed", &self.managed.len())
            .field("created", &self.created.count())
            .field("attached", &self.attached.count())
            .finish()
    }
}
