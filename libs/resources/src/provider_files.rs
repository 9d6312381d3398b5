// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A provider over an explicit list of files — the loose-resource semantics
//! of the filesystem provider without any directory walking.

use crate::provider::{ProviderResult, RecordPtr, ResourceFilter, ResourcePart, ResourceProvider};
use crate::provider_fs::{
    empty_meta_blob, load_meta_blob, read_file_async, sidecar_for,
};
use crate::record::{Data, ResourceDesc, ResourceFlags, ResourceHandle, ResourceRecord};
use crate::uri::{SCHEME_FILE, Uri};
use crate::ResourceError;
use futures::future::BoxFuture;
use glacier_aio::AioPort;
use glacier_mem::AllocRef;
use std::path::PathBuf;

/// One explicit input of a [`FilesProvider`].
#[derive(Debug, Clone)]
pub struct ResourceFileEntry {
    pub path: String,
}

struct FileEntry {
    record: Box<ResourceRecord>,
    data_path: PathBuf,
    meta_path: Option<PathBuf>,
}

/// A provider serving an explicit file list.
pub struct FilesProvider {
    alloc: AllocRef,
    inputs: Vec<ResourceFileEntry>,
    aioport: Option<AioPort>,
    entries: Vec<FileEntry>,
}

impl FilesProvider {
    #[must_use]
    pub fn new(alloc: AllocRef, inputs: Vec<ResourceFileEntry>, aioport: Option<AioPort>) -> Self {
        Self {
            alloc,
            inputs,
            aioport,
            entries: Vec::new(),
        }
    }

    fn entry_for(&self, record: &ResourceRecord) -> Option<&FileEntry> {
        self.entries
            .iter()
            .find(|entry| core::ptr::eq(entry.record.as_ref(), record))
    }
}

impl ResourceProvider for FilesProvider {
    fn scheme(&self) -> &str {
        SCHEME_FILE
    }

    fn refresh(&mut self, out: &mut Vec<RecordPtr>) -> ProviderResult {
        self.entries.clear();

        for input in &self.inputs {
            let data_path = PathBuf::from(&input.path);
            if !data_path.is_file() {
                tracing::warn!(path = %input.path, "input file does not exist");
                continue;
            }
            let Some(name) = data_path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_owned)
            else {
                continue;
            };

            let record = ResourceRecord::new(ResourceDesc {
                uri: Uri::from_parts(SCHEME_FILE, "", &name),
                name,
                origin: data_path.display().to_string(),
                flags: ResourceFlags::empty(),
            });
            let meta_path = sidecar_for(&data_path);
            self.entries.push(FileEntry {
                record,
                data_path,
                meta_path,
            });
        }

        self.collect(out);
        tracing::debug!(resources = self.entries.len(), "files provider refreshed");
        ProviderResult::Success
    }

    fn collect(&self, out: &mut Vec<RecordPtr>) -> u32 {
        out.extend(
            self.entries
                .iter()
                .map(|entry| RecordPtr::from_ref(entry.record.as_ref())),
        );
        self.entries.len() as u32
    }

    fn find_resource(&self, uri: &Uri) -> Option<RecordPtr> {
        if uri.scheme() != SCHEME_FILE {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| entry.record.name() == uri.path())
            .map(|entry| RecordPtr::from_ref(entry.record.as_ref()))
    }

    fn load_resource<'a>(
        &'a self,
        handle: &'a ResourceHandle,
        part: ResourcePart,
    ) -> BoxFuture<'a, Result<Data, ResourceError>> {
        Box::pin(async move {
            let record = handle.record();
            let entry = self.entry_for(record).ok_or(ResourceError::NotFound)?;

            match part {
                ResourcePart::Meta => {
                    let blob = record.meta_blob_or_init(|| {
                        entry
                            .meta_path
                            .as_deref()
                            .and_then(|path| load_meta_blob(&self.alloc, path).ok())
                            .unwrap_or_else(|| empty_meta_blob(&self.alloc))
                    });
                    Ok(Data::from_bytes(blob))
                }
                ResourcePart::Data => {
                    let buffer =
                        read_file_async(&self.alloc, &entry.data_path, self.aioport.as_ref())
                            .await?;
                    // Safety: data loads are driven by the tracker's
                    // single-flight protocol; we are the unique loader.
                    Ok(unsafe { record.publish_cache(buffer) })
                }
            }
        })
    }

    fn unload_resource(&self, record: &ResourceRecord) {
        tracing::trace!(resource = record.name(), "unload");
        // Safety: called from the last handle's drop, per the trait
        // contract.
        unsafe { record.clear_cache() };
    }

    fn filter_uris(&self, filter: &ResourceFilter<'_>, out: &mut Vec<Uri>) -> u32 {
        let mut collected = 0;
        for entry in &self.entries {
            if filter.allows_path(entry.record.name()) {
                out.push(entry.record.uri().clone());
                collected += 1;
            }
        }
        collected
    }
}
