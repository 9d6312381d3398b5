// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The AIO-backed write stream of the packer.
//!
//! Every write the layout pass issues becomes a task scheduled onto the
//! pool: header and metadata writes go straight to the AIO port, resource
//! writes first load the resource through the tracker (single-flight,
//! concurrent with every other write) and then stream its bytes out.
//! Completion is tracked with a counting barrier — one slot armed per
//! issued write, one signal per finished write — so `close` blocks on the
//! barrier until the pool drained everything. Offsets were all computed by
//! the layout pass, so completion order does not matter.

use glacier_aio::AioPort;
use glacier_hailstorm::AsyncWriteStream;
use glacier_resources::{ResourceHandle, ResourceStatus, ResourceTracker};
use glacier_tasks::sync::ManualResetBarrier;
use glacier_tasks::utils::schedule_task;
use glacier_tasks::{Task, TaskScheduler};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct PackWriteStream {
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

impl PackWriteStream {
    pub fn new(
        output: &Path,
        port: AioPort,
        scheduler: TaskScheduler,
        tracker: Arc<ResourceTracker>,
        handles: Arc<Vec<ResourceHandle>>,
        metadata: Arc<Vec<Vec<u8>>>,
    ) -> Self {
        Self {
            output: output.to_owned(),
            file: None,
            port,
            scheduler,
            tracker,
            handles,
            metadata,
            pending_writes: Arc::new(ManualResetBarrier::new(0)),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_write(&self, bytes: Arc<Vec<u8>>, offset: u64) {
        self.pending_writes.add(1);
        let file = self.file.clone().expect("stream was not opened");
        let port = self.port.clone();
        let pending = self.pending_writes.clone();
        let failed = self.failed.clone();

        schedule_task(
            Task::new(async move {
                let result = glacier_aio::write_at(&port, &file, offset, &bytes).await;
                if let Err(err) = result {
                    tracing::error!(%err, offset, "package write failed");
                    failed.store(true, Ordering::Release);
                }
                pending.set();
            }),
            &self.scheduler,
        );
    }
}

impl AsyncWriteStream for PackWriteStream {
    fn open(&mut self, total_size: u64) -> bool {
        let file = match std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.output)
        {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(%err, path = %self.output.display(), "failed to open output");
                return false;
            }
        };
        if let Err(err) = file.set_len(total_size) {
            tracing::error!(%err, total_size, "failed to resize output");
            return false;
        }
        self.file = Some(Arc::new(file));
        true
    }

    fn write_header(&mut self, bytes: &[u8], offset: u64) -> bool {
        // The slice is only valid for this call; the write task owns a copy.
        self.spawn_write(Arc::new(bytes.to_vec()), offset);
        true
    }

    fn write_metadata(&mut self, meta_index: u32, offset: u64) -> bool {
        self.pending_writes.add(1);
        let file = self.file.clone().expect("stream was not opened");
        let port = self.port.clone();
        let metadata = self.metadata.clone();
        let pending = self.pending_writes.clone();
        let failed = self.failed.clone();

        schedule_task(
            Task::new(async move {
                let blob = &metadata[meta_index as usize];
                let result = glacier_aio::write_at(&port, &file, offset, blob).await;
                if let Err(err) = result {
                    tracing::error!(%err, meta_index, offset, "metadata write failed");
                    failed.store(true, Ordering::Release);
                }
                pending.set();
            }),
            &self.scheduler,
        );
        true
    }

    fn write_resource(&mut self, resource_index: u32, offset: u64) -> bool {
        self.pending_writes.add(1);
        let file = self.file.clone().expect("stream was not opened");
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
                    let result =
                        glacier_aio::write_at(&port, &file, offset, loaded.bytes()).await;
                    if let Err(err) = result {
                        tracing::error!(
                            %err,
                            resource = handle.name(),
                            offset,
                            "resource write failed",
                        );
                        failed.store(true, Ordering::Release);
                    }
                    // Loading interest ends here; the bytes are reclaimed
                    // when the last handle drops.
                    let _released = tracker.unload_resource(handle).await;
                } else {
                    tracing::error!(resource = handle.name(), "resource failed to load");
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
