// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The filesystem resource provider.
//!
//! Recursively scans one or more base directories for *loose resources*: a
//! raw file, or a pair `(X, X.isrm)` where the sidecar carries the
//! resource's metadata. A sidecar may declare additional associated files
//! (`resource.paths` string array, with per-file flags in
//! `resource.paths.flags`); a resource whose declared files are missing
//! fails enumeration and is skipped.
//!
//! Data loads go through the AIO port when one is attached, so a load
//! suspends the calling task until the port's workers finished the read.

use crate::meta::{MutableMetadata, meta_from_json, meta_load};
use crate::provider::{ProviderResult, RecordPtr, ResourceFilter, ResourcePart, ResourceProvider};
use crate::record::{Data, ResourceDesc, ResourceFlags, ResourceHandle, ResourceRecord};
use crate::uri::{SCHEME_FILE, Uri};
use crate::ResourceError;
use futures::future::BoxFuture;
use glacier_aio::AioPort;
use glacier_collections::{Buffer, HashMap};
use glacier_mem::{AllocInfo, AllocRef};
use glacier_util::hash_str;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Extension of metadata sidecar files.
pub(crate) const SIDECAR_EXTENSION: &str = "isrm";

pub(crate) struct LooseEntry {
    pub(crate) record: Box<ResourceRecord>,
    pub(crate) data_path: PathBuf,
    pub(crate) meta_path: Option<PathBuf>,
}

/// A provider scanning directories for loose resources; see the
/// [module docs](self).
pub struct FileSystemProvider {
    alloc: AllocRef,
    base_paths: Vec<PathBuf>,
    aioport: Option<AioPort>,
    entries: Vec<LooseEntry>,
    /// name hash -> index into `entries`
    lookup: HashMap<u32>,
}

impl FileSystemProvider {
    #[must_use]
    pub fn new(alloc: AllocRef, base_paths: Vec<PathBuf>, aioport: Option<AioPort>) -> Self {
        Self {
            lookup: HashMap::new(alloc.clone()),
            alloc,
            base_paths,
            aioport,
            entries: Vec::new(),
        }
    }

    fn entry_for(&self, record: &ResourceRecord) -> Option<&LooseEntry> {
        self.lookup
            .find_all(hash_str(record.name()))
            .find_map(|&index| {
                let entry = &self.entries[index as usize];
                core::ptr::eq(entry.record.as_ref(), record).then_some(entry)
            })
    }

    fn find_by_name(&self, name: &str) -> Option<RecordPtr> {
        self.lookup.find_all(hash_str(name)).find_map(|&index| {
            let entry = &self.entries[index as usize];
            (entry.record.name() == name).then(|| RecordPtr::from_ref(entry.record.as_ref()))
        })
    }

    fn scan_directory(&mut self, base: &Path, dir: &Path) {
        let Ok(read_dir) = std::fs::read_dir(dir) else {
            tracing::warn!(path = %dir.display(), "failed to read resource directory");
            return;
        };

        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.scan_directory(base, &path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some(SIDECAR_EXTENSION) {
                continue;
            }
            if let Err(err) = self.add_loose_resource(base, &path) {
                tracing::warn!(
                    path = %path.display(),
                    ?err,
                    "skipping loose resource that failed enumeration",
                );
            }
        }
    }

    fn add_loose_resource(&mut self, base: &Path, path: &Path) -> Result<(), ResourceError> {
        let name = relative_name(base, path).ok_or(ResourceError::InvalidArgument)?;
        let meta_path = sidecar_for(path);

        // A sidecar may declare associated files; all of them must exist.
        if let Some(meta_path) = &meta_path {
            let blob = load_meta_blob(&self.alloc, meta_path)?;
            let loaded = meta_load(blob.as_slice())?;
            let mut declared = Vec::new();
            if loaded.read_string_array("resource.paths", &mut declared) {
                let dir = path.parent().unwrap_or(base);
                for declared_path in declared {
                    if !dir.join(declared_path).is_file() {
                        tracing::warn!(
                            resource = name,
                            missing = declared_path,
                            "sidecar declares a missing associated file",
                        );
                        return Err(ResourceError::NotFound);
                    }
                }
            }
        }

        let record = ResourceRecord::new(ResourceDesc {
            uri: Uri::from_parts(SCHEME_FILE, self.hostname(), &name),
            name: name.clone(),
            origin: path.display().to_string(),
            flags: ResourceFlags::empty(),
        });

        self.lookup
            .insert_multi(hash_str(&name), self.entries.len() as u32);
        self.entries.push(LooseEntry {
            record,
            data_path: path.to_owned(),
            meta_path,
        });
        Ok(())
    }
}

impl ResourceProvider for FileSystemProvider {
    fn scheme(&self) -> &str {
        SCHEME_FILE
    }

    fn refresh(&mut self, out: &mut Vec<RecordPtr>) -> ProviderResult {
        self.entries.clear();
        self.lookup.clear();

        let bases = self.base_paths.clone();
        for base in &bases {
            if !base.is_dir() {
                tracing::warn!(path = %base.display(), "resource base path is not a directory");
                return ProviderResult::Failure;
            }
            self.scan_directory(base, base);
        }

        self.collect(out);
        tracing::debug!(resources = self.entries.len(), "filesystem provider refreshed");
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
        (uri.scheme() == SCHEME_FILE && uri.host() == self.hostname())
            .then(|| self.find_by_name(uri.path()))
            .flatten()
    }

    fn resolve_relative(&self, uri: &Uri, base: &ResourceHandle) -> Option<RecordPtr> {
        let base_dir = match base.name().rsplit_once('/') {
            Some((dir, _file)) => dir,
            None => "",
        };
        let name = if base_dir.is_empty() {
            uri.path().to_owned()
        } else {
            format!("{base_dir}/{}", uri.path())
        };
        self.find_by_name(&name)
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

// === shared loose-file helpers (also used by the files provider) ===

/// The sidecar path of a data file: `X.isrm` appended to the full name,
/// falling back to replacing the extension.
pub(crate) fn sidecar_for(path: &Path) -> Option<PathBuf> {
    let mut appended = path.as_os_str().to_owned();
    appended.push(".");
    appended.push(SIDECAR_EXTENSION);
    let appended = PathBuf::from(appended);
    if appended.is_file() {
        return Some(appended);
    }

    let replaced = path.with_extension(SIDECAR_EXTENSION);
    replaced.is_file().then_some(replaced)
}

/// Loads a sidecar file into a serialized metadata blob: binary blobs pass
/// through, JSON documents are deserialized and re-serialized.
pub(crate) fn load_meta_blob(alloc: &AllocRef, path: &Path) -> Result<Buffer, ResourceError> {
    let bytes = std::fs::read(path)?;
    if bytes.starts_with(&crate::meta::META_MAGIC) {
        let mut blob = Buffer::with_align(alloc.clone(), 8);
        blob.append_aligned(&bytes, 8);
        return Ok(blob);
    }

    let text = core::str::from_utf8(&bytes).map_err(|_| ResourceError::InvalidMetadata)?;
    let meta = meta_from_json(alloc.clone(), text)?;
    Ok(meta.save(alloc.clone()))
}

/// An empty serialized metadata blob, for resources without a sidecar.
pub(crate) fn empty_meta_blob(alloc: &AllocRef) -> Buffer {
    MutableMetadata::new(alloc.clone()).save(alloc.clone())
}

/// Reads a whole file into an aligned buffer, through the AIO port when one
/// is available.
pub(crate) async fn read_file_async(
    alloc: &AllocRef,
    path: &Path,
    aioport: Option<&AioPort>,
) -> Result<Buffer, ResourceError> {
    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len() as usize;

    let mut buffer = Buffer::with_align(alloc.clone(), 8);
    buffer.append_reserve(AllocInfo::new(size, 8));

    match aioport {
        Some(port) if !port.is_closed() => {
            let read =
                glacier_aio::read_at(port, &file, 0, buffer.slice_mut(0, size)).await?;
            if read != size {
                return Err(ResourceError::LoadFailed(
                    std::io::ErrorKind::UnexpectedEof,
                ));
            }
        }
        _ => {
            file.read_exact(buffer.slice_mut(0, size))?;
        }
    }

    Ok(buffer)
}

pub(crate) fn relative_name(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let mut name = String::new();
    for component in relative.components() {
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(component.as_os_str().to_str()?);
    }
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, bytes: &[u8]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::File::create(path).unwrap().write_all(bytes).unwrap();
    }

    #[test]
    fn enumerates_loose_resources_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("maps/town.tmx"), b"town");
        write_file(
            &dir.path().join("maps/town.tmx.isrm"),
            br#"{"baked": true}"#,
        );
        write_file(&dir.path().join("atlas.png"), b"png");

        let mut provider =
            FileSystemProvider::new(AllocRef::host(), vec![dir.path().to_owned()], None);
        let mut records = Vec::new();
        assert_eq!(provider.refresh(&mut records), ProviderResult::Success);
        assert_eq!(records.len(), 2);

        let mut names: Vec<&str> = records.iter().map(|r| r.record().name()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["atlas.png", "maps/town.tmx"]);

        let uri = Uri::parse("file:///maps/town.tmx").unwrap();
        let found = provider.find_resource(&uri).unwrap();
        assert_eq!(found.record().name(), "maps/town.tmx");
        assert!(provider
            .find_resource(&Uri::parse("file:///maps/missing.tmx").unwrap())
            .is_none());
    }

    #[test]
    fn missing_declared_files_fail_enumeration() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("model.bin"), b"model");
        write_file(
            &dir.path().join("model.bin.isrm"),
            br#"{"resource": {"paths": ["model.skeleton"]}}"#,
        );

        let mut provider =
            FileSystemProvider::new(AllocRef::host(), vec![dir.path().to_owned()], None);
        let mut records = Vec::new();
        provider.refresh(&mut records);
        assert!(records.is_empty(), "resource with missing files is skipped");

        // Providing the declared file makes enumeration succeed.
        write_file(&dir.path().join("model.skeleton"), b"bones");
        records.clear();
        provider.refresh(&mut records);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn filter_uris_honors_extensions() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.tmx"), b"a");
        write_file(&dir.path().join("b.png"), b"b");

        let mut provider =
            FileSystemProvider::new(AllocRef::host(), vec![dir.path().to_owned()], None);
        let mut records = Vec::new();
        provider.refresh(&mut records);

        let extensions = ["tmx"];
        let filter = ResourceFilter {
            extensions: Some(&extensions),
            ..ResourceFilter::default()
        };
        let mut uris = Vec::new();
        assert_eq!(provider.filter_uris(&filter, &mut uris), 1);
        assert_eq!(uris[0].path(), "a.tmx");
    }
}
