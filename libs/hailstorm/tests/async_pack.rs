// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end packaging: loose files on disk, read concurrently through the
//! resource tracker and the AIO port, streamed into a package file, parsed
//! back and verified byte for byte.

use glacier_aio::{AioPort, AioPortInfo};
use glacier_hailstorm::{
    AsyncWriteStream, CHUNK_TYPE_DATA, CHUNK_TYPE_METADATA, ChunkRef, HailstormChunk,
    HailstormWriteData, HailstormWriteParams, WriteDataInfo, parse, write_cluster,
};
use glacier_mem::AllocRef;
use glacier_resources::{
    FileSystemProvider, ResourceHandle, ResourceStatus, ResourceTracker,
    ResourceTrackerCreateInfo, Uri,
};
use glacier_tasks::sync::ManualResetBarrier;
use glacier_tasks::utils::schedule_task;
use glacier_tasks::{Task, TaskQueue, TaskScheduler, TaskThreadPool, TaskThreadPoolCreateInfo};
use std::fs::File;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

struct AioPackStream {
    output: std::path::PathBuf,
    file: Option<Arc<File>>,
    port: AioPort,
    scheduler: TaskScheduler,
    tracker: Arc<ResourceTracker>,
    handles: Arc<Vec<ResourceHandle>>,
    metadata: Arc<Vec<Vec<u8>>>,
    /// One slot per issued write, released as the writes finish.
    pending_writes: Arc<ManualResetBarrier>,
    failed: Arc<AtomicBool>,
}

impl AioPackStream {
    fn spawn_write(&self, bytes: Arc<Vec<u8>>, offset: u64) {
        self.pending_writes.add(1);
        let file = self.file.clone().unwrap();
        let port = self.port.clone();
        let pending = self.pending_writes.clone();
        let failed = self.failed.clone();
        schedule_task(
            Task::new(async move {
                if glacier_aio::write_at(&port, &file, offset, &bytes).await.is_err() {
                    failed.store(true, Ordering::Release);
                }
                pending.set();
            }),
            &self.scheduler,
        );
    }
}

impl AsyncWriteStream for AioPackStream {
    fn open(&mut self, total_size: u64) -> bool {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.output)
            .unwrap();
        file.set_len(total_size).unwrap();
        self.file = Some(Arc::new(file));
        true
    }

    fn write_header(&mut self, bytes: &[u8], offset: u64) -> bool {
        self.spawn_write(Arc::new(bytes.to_vec()), offset);
        true
    }

    fn write_metadata(&mut self, meta_index: u32, offset: u64) -> bool {
        let blob = self.metadata[meta_index as usize].clone();
        self.spawn_write(Arc::new(blob), offset);
        true
    }

    fn write_resource(&mut self, resource_index: u32, offset: u64) -> bool {
        self.pending_writes.add(1);
        let file = self.file.clone().unwrap();
        let port = self.port.clone();
        let tracker = self.tracker.clone();
        let handles = self.handles.clone();
        let pending = self.pending_writes.clone();
        let failed = self.failed.clone();
        schedule_task(
            Task::new(async move {
                let handle = &handles[resource_index as usize];
                let loaded = tracker.load_resource(handle).await;
                if loaded.status == ResourceStatus::Loaded {
                    if glacier_aio::write_at(&port, &file, offset, loaded.bytes())
                        .await
                        .is_err()
                    {
                        failed.store(true, Ordering::Release);
                    }
                } else {
                    failed.store(true, Ordering::Release);
                }
                pending.set();
            }),
            &self.scheduler,
        );
        true
    }

    fn close(&mut self) -> bool {
        self.pending_writes.wait();
        !self.failed.load(Ordering::Acquire)
    }
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    File::create(path).unwrap().write_all(bytes).unwrap();
}

#[test]
fn packs_three_loose_files_and_reads_them_back() {
    let alloc = AllocRef::host();
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let output = out.path().join("bundle.hsc");

    // Three loose files of sizes 3, 17 and 4096 bytes.
    let payloads: Vec<Vec<u8>> = vec![
        vec![0x11; 3],
        (0..17u8).collect(),
        (0..=255u8).cycle().take(4096).collect(),
    ];
    write_file(&dir.path().join("tiny.bin"), &payloads[0]);
    write_file(&dir.path().join("maps/mid.bin"), &payloads[1]);
    write_file(&dir.path().join("maps/page.bin"), &payloads[2]);

    // Runtime: pool + AIO port driving both reads and writes.
    let port = AioPort::open(alloc.clone(), AioPortInfo { worker_limit: 2 });
    let queue = TaskQueue::new();
    let scheduler = TaskScheduler::new(queue.clone());
    let pool = TaskThreadPool::create(
        alloc.clone(),
        queue,
        TaskThreadPoolCreateInfo {
            thread_count: 4,
            aioport: Some(port.clone()),
            debug_name_format: String::from("pack-test-{}"),
        },
    );

    let mut tracker = ResourceTracker::new(alloc.clone(), ResourceTrackerCreateInfo::default());
    tracker.attach_provider(Box::new(FileSystemProvider::new(
        alloc.clone(),
        vec![dir.path().to_owned()],
        Some(port.clone()),
    )));
    tracker.sync_resources();

    let names = ["tiny.bin", "maps/mid.bin", "maps/page.bin"];
    let handles: Vec<ResourceHandle> = names
        .iter()
        .map(|name| tracker.find_resource(&Uri::urn(name)).unwrap())
        .collect();
    let tracker = Arc::new(tracker);

    // Metadata: one empty blob shared by all three resources.
    let empty_meta = glacier_resources::MutableMetadata::new(alloc.clone())
        .save(alloc.clone())
        .as_slice()
        .to_vec();
    let metadata = Arc::new(vec![empty_meta]);
    let metadata_refs: Vec<&[u8]> = metadata.iter().map(Vec::as_slice).collect();

    let data_infos: Vec<WriteDataInfo> = payloads
        .iter()
        .map(|p| WriteDataInfo {
            size: p.len() as u64,
            align: 8,
        })
        .collect();

    let write_data = HailstormWriteData {
        paths: &names,
        data: &data_infos,
        metadata: &metadata_refs,
        metadata_mapping: &[0, 0, 0],
        custom_values: [0, 1],
    };

    let mut params = HailstormWriteParams {
        initial_chunks: vec![
            HailstormChunk::new(16 << 20, 8, CHUNK_TYPE_DATA, 3, 42),
            HailstormChunk::new(2 << 20, 8, CHUNK_TYPE_METADATA, 3, 24),
        ],
        select_chunk: Box::new(|_m, _d, chunks, _s, _c| {
            let mut selection = ChunkRef {
                meta_chunk: u16::MAX,
                data_chunk: u16::MAX,
            };
            for (index, chunk) in chunks.iter().enumerate().rev() {
                if chunk.kind == CHUNK_TYPE_METADATA && selection.meta_chunk == u16::MAX {
                    selection.meta_chunk = index as u16;
                } else if chunk.kind == CHUNK_TYPE_DATA && selection.data_chunk == u16::MAX {
                    selection.data_chunk = index as u16;
                }
            }
            selection
        }),
        create_chunk: Box::new(|_m, data, mut base| {
            if data.size > base.size {
                base.size = data.size + u64::from(base.align);
            }
            base
        }),
    };

    let mut stream = AioPackStream {
        output: output.clone(),
        file: None,
        port: port.clone(),
        scheduler,
        tracker,
        handles: Arc::new(handles),
        metadata: metadata.clone(),
        pending_writes: Arc::new(ManualResetBarrier::new(0)),
        failed: Arc::new(AtomicBool::new(false)),
    };

    write_cluster(&mut params, &write_data, &mut stream).unwrap();

    // Shut the runtime down (pool drains its AIO workers, then the port).
    drop(pool);
    port.close();

    // Read the package back and verify every placement.
    let image = std::fs::read(&output).unwrap();
    let pack = parse(&image).unwrap();

    assert_eq!(pack.header.chunk_count, 2);
    assert_eq!(pack.header.resource_count, 3);
    assert_eq!(pack.header.total_size, image.len() as u64);

    for (index, name) in names.iter().enumerate() {
        let index = index as u32;
        assert_eq!(pack.resource_path(index), Some(*name));
        assert_eq!(pack.resources[index as usize].data_chunk, 0);
        assert_eq!(pack.resources[index as usize].meta_chunk, 1);

        let range = pack.resource_data_range(index).unwrap();
        assert_eq!(&image[range], payloads[index as usize].as_slice());
    }

    // The shared metadata blob parses as (empty) metadata.
    let meta_range = pack.resource_meta_range(2).unwrap();
    let loaded = glacier_resources::meta_load(&image[meta_range]).unwrap();
    assert!(loaded.is_empty());
}
