// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use glacier_mem::AllocRef;
use glacier_tasks::sync::ManualResetEvent;
use glacier_tasks::utils::{
    await_on_all, await_scheduled_queue, await_tasks, execute_task, schedule_task, wait_for,
    wait_for_result,
};
use glacier_tasks::{
    Task, TaskFlags, TaskQueue, TaskScheduler, TaskThread, TaskThreadInfo, TaskThreadPool,
    TaskThreadPoolCreateInfo,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}

fn pool(threads: u32) -> TaskThreadPool {
    TaskThreadPool::create(
        AllocRef::host(),
        TaskQueue::new(),
        TaskThreadPoolCreateInfo {
            thread_count: threads,
            aioport: None,
            debug_name_format: String::from("test-worker-{}"),
        },
    )
}

fn current_thread_name() -> String {
    std::thread::current().name().unwrap_or("").to_owned()
}

#[test]
fn scheduled_task_runs_on_pool_worker() {
    init_tracing();
    let pool = pool(2);
    let scheduler = pool.scheduler();

    let ran_on = Arc::new(Mutex::new(String::new()));
    let event = Arc::new(ManualResetEvent::new());

    let task = Task::new({
        let ran_on = ran_on.clone();
        let event = event.clone();
        async move {
            *ran_on.lock().unwrap() = current_thread_name();
            event.set();
        }
    });
    assert!(schedule_task(task, &scheduler));

    assert!(event.wait_timeout(Duration::from_secs(5)));
    assert!(ran_on.lock().unwrap().starts_with("test-worker-"));
}

#[test]
fn await_scheduler_moves_task_to_its_thread() {
    // A dedicated exclusive thread with its own queue.
    let queue = TaskQueue::new();
    let thread = TaskThread::create(
        queue.clone(),
        TaskThreadInfo {
            exclusive_queue: true,
            debug_name: String::from("solo-worker"),
            ..TaskThreadInfo::default()
        },
    )
    .unwrap();
    let scheduler = TaskScheduler::new(queue);

    let observed = wait_for_result(Task::new(async move {
        let before = current_thread_name();
        scheduler.schedule().await;
        (before, current_thread_name())
    }));

    assert_ne!(observed.0, "solo-worker");
    assert_eq!(observed.1, "solo-worker");
    drop(thread);
}

#[test]
fn fan_out_sets_all_bits_and_resumes_on_resumer() {
    let pool = pool(3);
    let scheduler = pool.scheduler();

    // The resumer is a separate dedicated thread so resumption is
    // observable by thread name.
    let resumer_queue = TaskQueue::new();
    let resumer_thread = TaskThread::create(
        resumer_queue.clone(),
        TaskThreadInfo {
            exclusive_queue: true,
            debug_name: String::from("resumer"),
            ..TaskThreadInfo::default()
        },
    )
    .unwrap();
    let resumer = TaskScheduler::new(resumer_queue);

    const N: u32 = 8;
    let bits = Arc::new(AtomicU32::new(0));

    let outcome = wait_for_result(Task::new({
        let bits = bits.clone();
        async move {
            let children: Vec<Task<()>> = (0..N)
                .map(|i| {
                    let bits = bits.clone();
                    let scheduler = scheduler.clone();
                    Task::new(async move {
                        // Hop to the pool so children really run in parallel.
                        scheduler.schedule().await;
                        bits.fetch_or(1 << i, Ordering::AcqRel);
                    })
                })
                .collect();

            await_on_all(children, &resumer).await;
            (bits.load(Ordering::Acquire), current_thread_name())
        }
    }));

    assert_eq!(outcome.0, (1 << N) - 1, "all children ran");
    assert_eq!(outcome.1, "resumer", "caller resumed on the resumer thread");
    drop(resumer_thread);
}

#[test]
fn empty_fan_out_completes_synchronously() {
    // No worker threads exist at all: if the empty span suspended anywhere,
    // this would deadlock instead of completing.
    let orphan_queue = TaskQueue::new();
    let orphan = TaskScheduler::new(orphan_queue);

    let started = Instant::now();
    wait_for(Task::new(async move {
        await_on_all(Vec::new(), &orphan).await;
    }));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn synchronous_children_skip_suspension() {
    // Both children complete without suspending, so the caller must not
    // re-enter any scheduler — again provable by the absence of workers.
    let counter = Arc::new(AtomicU32::new(0));

    let any = wait_for_result(Task::new({
        let counter = counter.clone();
        async move {
            let c1 = counter.clone();
            let c2 = counter.clone();
            let children = vec![
                Task::new(async move {
                    c1.fetch_add(1, Ordering::Relaxed);
                }),
                Task::new(async move {
                    c2.fetch_add(1, Ordering::Relaxed);
                }),
            ];
            await_tasks(children).await
        }
    }));

    assert!(any);
    assert_eq!(counter.load(Ordering::Relaxed), 2);
}

#[test]
fn priority_thread_resumes_higher_priorities_first() {
    init_tracing();
    let queue = TaskQueue::new();
    let scheduler = TaskScheduler::new(queue.clone());
    let order = Arc::new(Mutex::new(Vec::new()));

    // Push the whole batch before the consumer thread exists, so the first
    // detached range contains all five awaitables.
    for priority in [2u8, 2, 4, 1, 4] {
        let order = order.clone();
        let task = Task::new(async move {
            order.lock().unwrap().push(priority);
        })
        .with_flags(TaskFlags::with_priority(priority));
        assert!(schedule_task(task, &scheduler));
    }

    let thread = TaskThread::create(
        queue,
        TaskThreadInfo {
            exclusive_queue: true,
            sort_by_priority: true,
            debug_name: String::from("priority-worker"),
            ..TaskThreadInfo::default()
        },
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while order.lock().unwrap().len() < 5 {
        assert!(Instant::now() < deadline, "priority batch never ran");
        std::thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(*order.lock().unwrap(), vec![4, 4, 2, 2, 1]);
    drop(thread);
}

#[test]
fn draining_a_queue_starts_all_work_before_resuming() {
    // One pool worker makes the target queue's execution order strict.
    let pool = pool(1);
    let scheduler = pool.scheduler();

    let custom = TaskQueue::new();
    let custom_scheduler = TaskScheduler::new(custom.clone());
    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    // Three tasks suspend onto the custom queue; nothing drives it.
    for i in 0..3 {
        let order = order.clone();
        let custom_scheduler = custom_scheduler.clone();
        assert!(execute_task(Task::new(async move {
            custom_scheduler.schedule().await;
            order.lock().unwrap().push(format!("work-{i}"));
        })));
    }
    assert!(!custom.is_empty());

    let drained = wait_for_result(Task::new({
        let order = order.clone();
        async move {
            let drained = await_scheduled_queue(&custom, &scheduler).await;
            order.lock().unwrap().push(String::from("done"));
            drained
        }
    }));

    assert!(drained);
    let order = order.lock().unwrap();
    assert_eq!(*order, vec!["work-0", "work-1", "work-2", "done"]);
}

#[test]
fn wait_for_result_returns_the_task_output() {
    let pool = pool(2);
    let scheduler = pool.scheduler();

    let value = wait_for_result(Task::new(async move {
        scheduler.schedule().await;
        6 * 7
    }));
    assert_eq!(value, 42);
}
