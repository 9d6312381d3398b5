// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `hsc-packer` — packs loose resources into a Hailstorm archive.
//!
//! Resources come either from explicit input files or from the include
//! directories (optionally filtered by configuration files); everything is
//! read concurrently through the task pool and the AIO port and streamed
//! into a single output file with deterministic chunk placement.

mod aiostream;
mod config;

use crate::aiostream::PackWriteStream;
use crate::config::Config;
use anyhow::{Context as _, bail};
use clap::Parser;
use glacier_aio::{AioPort, AioPortInfo};
use glacier_hailstorm::{
    CHUNK_TYPE_DATA, CHUNK_TYPE_METADATA, ChunkRef, HailstormChunk, HailstormWriteData,
    HailstormWriteParams, WriteDataInfo, write_cluster,
};
use glacier_mem::AllocRef;
use glacier_resources::{
    FileSystemProvider, FilesProvider, ResourceFileEntry, ResourceFilter, ResourceHandle,
    ResourceTracker, ResourceTrackerCreateInfo, resource_meta,
};
use glacier_tasks::platform::Platform;
use glacier_tasks::sync::ManualResetBarrier;
use glacier_tasks::utils::{schedule_task, wait_for_result};
use glacier_tasks::{
    Task, TaskQueue, TaskScheduler, TaskThreadPool, TaskThreadPoolCreateInfo,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Create a Hailstorm pack file from the given input directories and
/// configuration files.
#[derive(Debug, Parser)]
#[command(name = "hsc-packer", version)]
struct Cli {
    /// Output archive path.
    #[arg(short, long)]
    output: PathBuf,

    /// Directories searched for loose resources.
    #[arg(short, long = "include")]
    include: Vec<PathBuf>,

    /// Configuration file(s) with more detailed generation requirements.
    #[arg(short, long = "config")]
    config: Vec<PathBuf>,

    /// Detailed logging.
    #[arg(short, long)]
    verbose: bool,

    /// Input files to be stored in the pack (overrides directory scan).
    inputs: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "packing failed");
            ExitCode::FAILURE
        }
    }
}

struct Runtime {
    #[expect(dead_code, reason = "owns the process platform lifecycle")]
    platform: Platform,
    alloc: AllocRef,
    scheduler: TaskScheduler,
    pool: Option<TaskThreadPool>,
    aioport: AioPort,
}

impl Runtime {
    fn bring_up() -> anyhow::Result<Self> {
        let alloc = AllocRef::host();
        let platform = Platform::initialize(alloc.clone())
            .context("platform is already initialized")?;

        let queue = TaskQueue::new();
        let scheduler = TaskScheduler::new(queue.clone());
        let aioport = AioPort::open(alloc.clone(), AioPortInfo { worker_limit: 4 });
        let pool = platform.threads().create_thread_pool(
            queue,
            TaskThreadPoolCreateInfo {
                thread_count: 8,
                aioport: Some(aioport.clone()),
                debug_name_format: String::from("hsc-packer-{}"),
            },
        );

        Ok(Self {
            platform,
            alloc,
            scheduler,
            pool: Some(pool),
            aioport,
        })
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // The pool's dedicated AIO workers drive the port; drain them first,
        // then close the port.
        self.pool.take();
        self.aioport.close();
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let runtime = Runtime::bring_up()?;

    let mut tracker = ResourceTracker::new(
        runtime.alloc.clone(),
        ResourceTrackerCreateInfo {
            predicted_resource_count: 1_000_000,
        },
    );

    let filter_extensions = load_filter_extensions(&cli)?;

    if cli.inputs.is_empty() {
        if cli.include.is_empty() {
            bail!("no inputs and no include directories were provided");
        }
        tracker.attach_provider(Box::new(FileSystemProvider::new(
            runtime.alloc.clone(),
            cli.include.clone(),
            Some(runtime.aioport.clone()),
        )));
    } else {
        let files = cli
            .inputs
            .iter()
            .map(|path| ResourceFileEntry { path: path.clone() })
            .collect();
        tracker.attach_provider(Box::new(FilesProvider::new(
            runtime.alloc.clone(),
            files,
            Some(runtime.aioport.clone()),
        )));
    }

    tracker.sync_resources();

    // Select the resources to pack.
    let extension_refs: Vec<&str> = filter_extensions.iter().map(String::as_str).collect();
    let filter = ResourceFilter {
        extensions: (!extension_refs.is_empty()).then_some(extension_refs.as_slice()),
        ..ResourceFilter::default()
    };
    let mut uris = Vec::new();
    tracker.filter_resource_uris(&filter, &mut uris);
    if uris.is_empty() {
        bail!("no files were found in the included directories");
    }
    tracing::info!(resources = uris.len(), output = %cli.output.display(), "packing");

    let handles: Vec<ResourceHandle> = uris
        .iter()
        .filter_map(|uri| tracker.find_resource(uri))
        .collect();
    anyhow::ensure!(handles.len() == uris.len(), "resource lookup went stale");

    create_package(&cli, &runtime, tracker, handles)
}

fn load_filter_extensions(cli: &Cli) -> anyhow::Result<Vec<String>> {
    let mut extensions = Vec::new();
    for path in &cli.config {
        if !path.is_file() {
            tracing::error!(config = %path.display(), "config file does not exist, skipping");
            continue;
        }
        let config = Config::load(path)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        match config.get_string_array("filter.extensions") {
            Ok(mut parsed) => extensions.append(&mut parsed),
            Err(err) => {
                tracing::debug!(config = %path.display(), %err, "no extension filter");
            }
        }
    }

    if !cli.config.is_empty() && extensions.is_empty() {
        bail!("no valid configuration files were provided");
    }
    Ok(extensions)
}

fn create_package(
    cli: &Cli,
    runtime: &Runtime,
    tracker: ResourceTracker,
    handles: Vec<ResourceHandle>,
) -> anyhow::Result<()> {
    let count = handles.len();
    let tracker = Arc::new(tracker);
    let handles = Arc::new(handles);

    // Metadata blobs, one per resource (identity mapping).
    let mut metadata = Vec::with_capacity(count);
    for handle in handles.iter() {
        let blob = {
            let handle = handle.clone();
            wait_for_result(Task::new(async move {
                resource_meta(&handle).await.map(|data| {
                    // Safety: the handle (and with it the provider-owned
                    // blob) outlives this copy.
                    unsafe { data.as_slice() }.to_vec()
                })
            }))
        }
        .with_context(|| format!("failed to load metadata for '{}'", handle.name()))?;
        metadata.push(blob);
    }
    let metadata = Arc::new(metadata);

    // Resource sizes, probed concurrently on the pool; the barrier releases
    // once every probe task signalled.
    let sizes: Arc<Vec<AtomicU64>> = Arc::new((0..count).map(|_| AtomicU64::new(0)).collect());
    let probed = Arc::new(ManualResetBarrier::new(count as u32));
    for (index, handle) in handles.iter().enumerate() {
        let origin = handle.origin().to_owned();
        let sizes = sizes.clone();
        let probed = probed.clone();
        schedule_task(
            Task::new(async move {
                let size = std::fs::metadata(&origin).map(|m| m.len()).unwrap_or(0);
                sizes[index].store(size, Ordering::Release);
                probed.set();
            }),
            &runtime.scheduler,
        );
    }
    probed.wait();

    let paths: Vec<String> = handles.iter().map(|h| h.name().to_owned()).collect();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let metadata_refs: Vec<&[u8]> = metadata.iter().map(Vec::as_slice).collect();
    let data_infos: Vec<WriteDataInfo> = sizes
        .iter()
        .map(|size| WriteDataInfo {
            size: size.load(Ordering::Acquire),
            align: 8,
        })
        .collect();
    let mapping: Vec<u32> = (0..count as u32).collect();

    let write_data = HailstormWriteData {
        paths: &path_refs,
        data: &data_infos,
        metadata: &metadata_refs,
        metadata_mapping: &mapping,
        custom_values: [0, 1],
    };

    let mut params = HailstormWriteParams {
        initial_chunks: vec![
            HailstormChunk::new(16 << 20, 8, CHUNK_TYPE_DATA, 3, 42),
            HailstormChunk::new(2 << 20, 8, CHUNK_TYPE_METADATA, 3, 24),
        ],
        select_chunk: Box::new(select_chunk_loose_resource),
        create_chunk: Box::new(create_chunk_loose_resource),
    };

    let mut stream = PackWriteStream::new(
        &cli.output,
        runtime.aioport.clone(),
        runtime.scheduler.clone(),
        tracker,
        handles,
        metadata.clone(),
    );

    write_cluster(&mut params, &write_data, &mut stream)
        .context("failed to write the hailstorm package")?;
    tracing::info!(output = %cli.output.display(), "package written");
    Ok(())
}

/// Picks the most recently added chunk of each type.
fn select_chunk_loose_resource(
    _meta: &[u8],
    _data: WriteDataInfo,
    chunks: &[HailstormChunk],
    _partial_start: u32,
    _partial_count: u32,
) -> ChunkRef {
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
        if selection.meta_chunk != u16::MAX && selection.data_chunk != u16::MAX {
            break;
        }
    }
    selection
}

/// Grows the proposed chunk when the resource would not fit.
fn create_chunk_loose_resource(
    _meta: &[u8],
    data: WriteDataInfo,
    mut base_chunk: HailstormChunk,
) -> HailstormChunk {
    if data.size > base_chunk.size {
        base_chunk.size = data.size + u64::from(base_chunk.align);
    }
    base_chunk
}
