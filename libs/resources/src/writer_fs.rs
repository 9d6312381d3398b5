// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A filesystem-backed resource writer: a provider that also accepts new
//! resources, materializing them as files under a base directory.

use crate::provider::{
    ProviderResult, RecordPtr, ResourceCreationFlags, ResourcePart, ResourceProvider,
    ResourceWriter,
};
use crate::provider_fs::{empty_meta_blob, read_file_async};
use crate::record::{Data, ResourceDesc, ResourceFlags, ResourceHandle, ResourceRecord};
use crate::uri::{SCHEME_FILE, Uri};
use crate::ResourceError;
use futures::future::BoxFuture;
use glacier_mem::AllocRef;
use std::path::PathBuf;
use std::sync::Mutex;

struct WriterEntry {
    record: Box<ResourceRecord>,
    path: PathBuf,
}

/// A writer creating resources as files under one base directory.
///
/// New records may be inserted while loads of other resources are running;
/// the entry table is synchronized internally.
pub struct FileSystemWriter {
    alloc: AllocRef,
    hostname: String,
    base_path: PathBuf,
    entries: Mutex<Vec<WriterEntry>>,
}

impl FileSystemWriter {
    #[must_use]
    pub fn new(alloc: AllocRef, hostname: impl Into<String>, base_path: PathBuf) -> Self {
        Self {
            alloc,
            hostname: hostname.into(),
            base_path,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn record_for(&self, uri: &Uri) -> Option<RecordPtr> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|entry| entry.record.name() == uri.path())
            .map(|entry| RecordPtr::from_ref(entry.record.as_ref()))
    }

    fn path_for(&self, record: &ResourceRecord) -> Option<PathBuf> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|entry| core::ptr::eq(entry.record.as_ref(), record))
            .map(|entry| entry.path.clone())
    }
}

impl ResourceProvider for FileSystemWriter {
    fn scheme(&self) -> &str {
        SCHEME_FILE
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn refresh(&mut self, _out: &mut Vec<RecordPtr>) -> ProviderResult {
        // Writers start empty; resources appear through `create_resource`.
        ProviderResult::Skipped
    }

    fn collect(&self, out: &mut Vec<RecordPtr>) -> u32 {
        let entries = self.entries.lock().unwrap();
        out.extend(
            entries
                .iter()
                .map(|entry| RecordPtr::from_ref(entry.record.as_ref())),
        );
        entries.len() as u32
    }

    fn find_resource(&self, uri: &Uri) -> Option<RecordPtr> {
        (uri.scheme() == SCHEME_FILE && uri.host() == self.hostname)
            .then(|| self.record_for(uri))
            .flatten()
    }

    fn load_resource<'a>(
        &'a self,
        handle: &'a ResourceHandle,
        part: ResourcePart,
    ) -> BoxFuture<'a, Result<Data, ResourceError>> {
        Box::pin(async move {
            let record = handle.record();
            match part {
                ResourcePart::Meta => {
                    let blob = record.meta_blob_or_init(|| empty_meta_blob(&self.alloc));
                    Ok(Data::from_bytes(blob))
                }
                ResourcePart::Data => {
                    let path = self.path_for(record).ok_or(ResourceError::NotFound)?;
                    let buffer = read_file_async(&self.alloc, &path, None).await?;
                    // Safety: data loads are driven by the tracker's
                    // single-flight protocol; we are the unique loader.
                    Ok(unsafe { record.publish_cache(buffer) })
                }
            }
        })
    }

    fn unload_resource(&self, record: &ResourceRecord) {
        // Safety: called from the last handle's drop, per the trait
        // contract.
        unsafe { record.clear_cache() };
    }
}

impl ResourceWriter for FileSystemWriter {
    fn create_resource<'a>(
        &'a self,
        uri: &'a Uri,
        flags: ResourceCreationFlags,
    ) -> BoxFuture<'a, Result<RecordPtr, ResourceError>> {
        Box::pin(async move {
            if uri.scheme() != SCHEME_FILE || uri.path().is_empty() {
                return Err(ResourceError::InvalidArgument);
            }
            if let Some(existing) = self.record_for(uri) {
                if !flags.contains(ResourceCreationFlags::OVERWRITE) {
                    return Err(ResourceError::InvalidArgument);
                }
                return Ok(existing);
            }

            let path = self.base_path.join(uri.path());
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            drop(std::fs::File::create(&path)?);

            let record = ResourceRecord::new(ResourceDesc {
                uri: uri.clone(),
                name: uri.path().to_owned(),
                origin: path.display().to_string(),
                flags: ResourceFlags::RUNTIME_CREATED,
            });
            let ptr = RecordPtr::from_ref(record.as_ref());

            self.entries.lock().unwrap().push(WriterEntry { record, path });
            tracing::debug!(uri = %uri, "created resource");
            Ok(ptr)
        })
    }

    fn write_resource<'a>(
        &'a self,
        handle: &'a ResourceHandle,
        data: &'a [u8],
        offset: u64,
    ) -> BoxFuture<'a, Result<bool, ResourceError>> {
        Box::pin(async move {
            let path = self
                .path_for(handle.record())
                .ok_or(ResourceError::NotFound)?;
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            write_at(&file, data, offset)?;
            Ok(true)
        })
    }
}

// Positioned write without moving the file cursor.
#[cfg(unix)]
fn write_at(file: &std::fs::File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_at(file: &std::fs::File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut done = 0;
    while done < data.len() {
        match file.seek_write(&data[done..], offset + done as u64)? {
            0 => return Err(std::io::ErrorKind::WriteZero.into()),
            n => done += n,
        }
    }
    Ok(())
}
