// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use futures::future::BoxFuture;
use glacier_mem::AllocRef;
use glacier_resources::{
    Data, FileSystemWriter, ProviderResult, RecordPtr, ResourceFlags, ResourceHandle,
    ResourcePart, ResourceProvider, ResourceRecord, ResourceStatus, ResourceTracker,
    ResourceTrackerCreateInfo, Uri, resolve_dynlib_path,
};
use glacier_tasks::utils::{wait_for_all, wait_for_result};
use glacier_tasks::{Task, TaskQueue, TaskThreadPool, TaskThreadPoolCreateInfo};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// A provider with a configurable load delay, counting loads and unloads.
struct CountingProvider {
    records: Vec<Box<ResourceRecord>>,
    payload: Vec<u8>,
    load_delay: Duration,
    loads: Arc<AtomicU32>,
    unloads: Arc<AtomicU32>,
}

impl CountingProvider {
    fn new(names: &[&str], payload: Vec<u8>, load_delay: Duration) -> Self {
        let records = names
            .iter()
            .map(|name| {
                ResourceRecord::new(glacier_resources::ResourceDesc {
                    uri: Uri::from_parts("file", "counting", name),
                    name: (*name).to_owned(),
                    origin: format!("mem://{name}"),
                    flags: ResourceFlags::empty(),
                })
            })
            .collect();
        Self {
            records,
            payload,
            load_delay,
            loads: Arc::new(AtomicU32::new(0)),
            unloads: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl ResourceProvider for CountingProvider {
    fn scheme(&self) -> &str {
        "file"
    }

    fn hostname(&self) -> &str {
        "counting"
    }

    fn refresh(&mut self, out: &mut Vec<RecordPtr>) -> ProviderResult {
        self.collect(out);
        ProviderResult::Success
    }

    fn collect(&self, out: &mut Vec<RecordPtr>) -> u32 {
        out.extend(self.records.iter().map(|r| RecordPtr::from_ref(r)));
        self.records.len() as u32
    }

    fn find_resource(&self, uri: &Uri) -> Option<RecordPtr> {
        self.records
            .iter()
            .find(|r| r.name() == uri.path() && uri.host() == "counting")
            .map(|r| RecordPtr::from_ref(r))
    }

    fn load_resource<'a>(
        &'a self,
        _handle: &'a ResourceHandle,
        part: ResourcePart,
    ) -> BoxFuture<'a, Result<Data, glacier_resources::ResourceError>> {
        Box::pin(async move {
            assert_eq!(part, ResourcePart::Data);
            self.loads.fetch_add(1, Ordering::AcqRel);
            if !self.load_delay.is_zero() {
                std::thread::sleep(self.load_delay);
            }
            Ok(Data::from_bytes(&self.payload))
        })
    }

    fn unload_resource(&self, _record: &ResourceRecord) {
        self.unloads.fetch_add(1, Ordering::AcqRel);
    }
}

fn pool(threads: u32) -> TaskThreadPool {
    TaskThreadPool::create(
        AllocRef::host(),
        TaskQueue::new(),
        TaskThreadPoolCreateInfo {
            thread_count: threads,
            aioport: None,
            debug_name_format: String::from("tracker-test-{}"),
        },
    )
}

fn tracker_with(provider: CountingProvider) -> (ResourceTracker, Arc<AtomicU32>, Arc<AtomicU32>) {
    let loads = provider.loads.clone();
    let unloads = provider.unloads.clone();
    let mut tracker = ResourceTracker::new(
        AllocRef::host(),
        ResourceTrackerCreateInfo {
            predicted_resource_count: 64,
        },
    );
    tracker.attach_provider(Box::new(provider));
    tracker.sync_resources();
    (tracker, loads, unloads)
}

#[test]
fn sixteen_racing_loaders_invoke_the_provider_once() {
    const RACERS: u32 = 16;

    let provider = CountingProvider::new(
        &["big.bin"],
        vec![0u8; 1 << 20],
        Duration::from_millis(50),
    );
    let (tracker, loads, _unloads) = tracker_with(provider);
    let tracker = Arc::new(tracker);

    let pool = pool(8);
    let scheduler = pool.scheduler();

    let handle = tracker.find_resource(&Uri::urn("big.bin")).unwrap();
    let seen: Arc<std::sync::Mutex<Vec<(ResourceStatus, usize, usize)>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));

    let tasks: Vec<Task<()>> = (0..RACERS)
        .map(|_| {
            let tracker = tracker.clone();
            let handle = handle.clone();
            let seen = seen.clone();
            let scheduler = scheduler.clone();
            Task::new(async move {
                scheduler.schedule().await;
                let result = tracker.load_resource(&handle).await;
                let bytes = result.bytes();
                seen.lock()
                    .unwrap()
                    .push((result.status, bytes.as_ptr() as usize, bytes.len()));
            })
        })
        .collect();

    wait_for_all(tasks);

    assert_eq!(loads.load(Ordering::Acquire), 1, "single-flight violated");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), RACERS as usize);
    let (status, ptr, len) = seen[0];
    assert_eq!(status, ResourceStatus::Loaded);
    assert_eq!(len, 1 << 20);
    for entry in seen.iter() {
        assert_eq!(*entry, (status, ptr, len), "all callers share one result");
    }

    // The loader swapped in the terminal marker; racers that arrived after
    // the swap may have nudged it by their own increment.
    let request_count = handle.record().request_count();
    assert!(
        (i16::MIN..i16::MIN + RACERS as i16).contains(&request_count),
        "terminal request marker expected, got {request_count}",
    );
}

#[test]
fn reloading_after_last_release_invokes_the_provider_again() {
    let provider = CountingProvider::new(&["tex.png"], b"pixels".to_vec(), Duration::ZERO);
    let (tracker, loads, unloads) = tracker_with(provider);
    let tracker = Arc::new(tracker);

    {
        let handle = tracker.find_resource(&Uri::urn("tex.png")).unwrap();
        let copy_a = handle.clone();
        let copy_b = handle.clone();

        let status = {
            let tracker = tracker.clone();
            let handle = handle.clone();
            wait_for_result(Task::new(async move {
                tracker.load_resource(&handle).await.status
            }))
        };
        assert_eq!(status, ResourceStatus::Loaded);
        assert_eq!(loads.load(Ordering::Acquire), 1);

        drop(copy_a);
        drop(copy_b);
        assert_eq!(unloads.load(Ordering::Acquire), 0, "handles still alive");
    }

    // All handles dropped (the load result's handle too): unload ran once.
    assert_eq!(unloads.load(Ordering::Acquire), 1);

    // A fresh find + load hits the provider again.
    let handle = tracker.find_resource(&Uri::urn("tex.png")).unwrap();
    assert_eq!(handle.status(), ResourceStatus::Available);
    let status = {
        let tracker = tracker.clone();
        let handle = handle.clone();
        wait_for_result(Task::new(async move {
            tracker.load_resource(&handle).await.status
        }))
    };
    assert_eq!(status, ResourceStatus::Loaded);
    assert_eq!(loads.load(Ordering::Acquire), 2);
}

#[test]
fn loading_a_loaded_resource_completes_synchronously() {
    let provider = CountingProvider::new(&["cfg.json"], b"{}".to_vec(), Duration::ZERO);
    let (tracker, loads, _unloads) = tracker_with(provider);
    let tracker = Arc::new(tracker);

    // No workers anywhere: if the second load suspended on the waiter
    // queue, nothing would ever resume it and the wait below would hang.
    let handle = tracker.find_resource(&Uri::urn("cfg.json")).unwrap();
    let statuses = {
        let tracker = tracker.clone();
        let handle = handle.clone();
        wait_for_result(Task::new(async move {
            let first = tracker.load_resource(&handle).await.status;
            let second = tracker.load_resource(&handle).await.status;
            (first, second)
        }))
    };

    assert_eq!(statuses, (ResourceStatus::Loaded, ResourceStatus::Loaded));
    assert_eq!(loads.load(Ordering::Acquire), 1);
}

#[test]
fn handle_copies_unload_exactly_once_after_last_drop() {
    let provider = CountingProvider::new(&["mesh.bin"], b"mesh".to_vec(), Duration::ZERO);
    let (tracker, _loads, unloads) = tracker_with(provider);

    let handle = tracker.find_resource(&Uri::urn("mesh.bin")).unwrap();
    let copy_a = handle.clone();
    let copy_b = handle.clone();

    drop(handle);
    drop(copy_a);
    assert_eq!(unloads.load(Ordering::Acquire), 0);
    drop(copy_b);
    assert_eq!(unloads.load(Ordering::Acquire), 1);
}

#[test]
fn urns_match_by_name_and_uris_by_provider() {
    let provider = CountingProvider::new(&["a/b.bin"], b"ab".to_vec(), Duration::ZERO);
    let (tracker, _loads, _unloads) = tracker_with(provider);

    let by_urn = tracker.find_resource(&Uri::urn("a/b.bin"));
    assert!(by_urn.is_some());

    let by_uri = tracker.find_resource(&Uri::parse("file://counting/a/b.bin").unwrap());
    assert!(by_uri.is_some());

    let wrong_host = tracker.find_resource(&Uri::parse("file://elsewhere/a/b.bin").unwrap());
    assert!(wrong_host.is_none());

    assert!(tracker.find_resource(&Uri::urn("missing")).is_none());
}

#[test]
fn dynlib_names_resolve_through_urns() {
    let names = if cfg!(windows) {
        ["render.dll"]
    } else {
        ["librender.so"]
    };
    let provider = CountingProvider::new(&names, Vec::new(), Duration::ZERO);
    let (tracker, _loads, _unloads) = tracker_with(provider);

    let resolved = resolve_dynlib_path(&tracker, "render");
    assert_eq!(resolved, format!("mem://{}", names[0]));

    let unresolved = resolve_dynlib_path(&tracker, "missing");
    assert!(unresolved.contains("missing"));
}

#[test]
fn writers_create_and_write_resources() {
    let dir = tempfile::tempdir().unwrap();
    let alloc = AllocRef::host();

    let mut tracker = ResourceTracker::new(alloc.clone(), ResourceTrackerCreateInfo::default());
    tracker.attach_writer(Box::new(FileSystemWriter::new(
        alloc,
        "out",
        dir.path().to_owned(),
    )));
    tracker.sync_resources();

    let uri = Uri::from_parts("file", "out", "packs/data.hsc");
    let written = futures::executor::block_on(async {
        tracker.write_resource(&uri, b"hailstorm", 0).await
    })
    .unwrap();
    assert!(written);

    let on_disk = std::fs::read(dir.path().join("packs/data.hsc")).unwrap();
    assert_eq!(on_disk, b"hailstorm");

    // Unknown scheme/host finds no writer.
    let err = futures::executor::block_on(async {
        tracker
            .write_resource(&Uri::from_parts("file", "elsewhere", "x"), b"x", 0)
            .await
    })
    .unwrap_err();
    assert_eq!(
        err,
        glacier_resources::ResourceError::FailedToFindValidResourceWriter,
    );
}
