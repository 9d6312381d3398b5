// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The resource tracker: provider registry, URI resolution and single-flight
//! load coordination.

use crate::provider::{
    ProviderResult, RecordPtr, ResourceCreationFlags, ResourceFilter, ResourcePart,
    ResourceProvider, ResourceWriter,
};
use crate::record::{Data, ResourceHandle, ResourceStatus};
use crate::uri::{SCHEME_DYNLIB, Uri};
use crate::ResourceError;
use core::ptr::NonNull;
use core::sync::atomic::Ordering;
use glacier_collections::HashMap;
use glacier_mem::{AllocRef, ProxyAllocator};
use glacier_tasks::TaskParams;
use glacier_util::hash_str;

/// Creation parameters of a [`ResourceTracker`].
#[derive(Debug, Clone, Copy)]
pub struct ResourceTrackerCreateInfo {
    /// Sizing hint for the name map.
    pub predicted_resource_count: u32,
}

impl Default for ResourceTrackerCreateInfo {
    fn default() -> Self {
        Self {
            predicted_resource_count: 1024,
        }
    }
}

/// Outcome of a tracker load/release operation.
#[derive(Debug, Clone)]
pub struct ResourceResult {
    pub status: ResourceStatus,
    pub resource: ResourceHandle,
    pub data: Data,
}

impl ResourceResult {
    /// The loaded bytes; empty unless `status` is `Loaded`.
    ///
    /// The returned slice borrows this result, whose handle keeps the cache
    /// alive.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        // Safety: `self.resource` holds a handle, so the cache outlives the
        // borrow handed out here.
        unsafe { self.data.as_slice() }
    }
}

/// The registry of providers plus the load coordinator; see the
/// [crate docs](crate).
pub struct ResourceTracker {
    #[expect(dead_code, reason = "owns the attribution allocator of the maps")]
    alloc: AllocRef,
    info: ResourceTrackerCreateInfo,
    /// name hash -> record, multi-map across all providers.
    resources: HashMap<RecordPtr>,
    providers: Vec<Box<dyn ResourceProvider>>,
    writers: Vec<Box<dyn ResourceWriter>>,
}

impl ResourceTracker {
    #[must_use]
    pub fn new(alloc: AllocRef, info: ResourceTrackerCreateInfo) -> Self {
        assert!(
            info.predicted_resource_count > 0,
            "'predicted_resource_count' needs to be a positive integer",
        );
        let map_alloc = AllocRef::new(ProxyAllocator::new(alloc.clone(), "resource-tracker"));
        let mut resources = HashMap::new(map_alloc);
        resources.reserve(info.predicted_resource_count);
        Self {
            alloc,
            info,
            resources,
            providers: Vec::new(),
            writers: Vec::new(),
        }
    }

    /// Attaches a provider. Call [`sync_resources`](Self::sync_resources)
    /// after all attaches.
    pub fn attach_provider(&mut self, provider: Box<dyn ResourceProvider>) {
        self.providers.push(provider);
    }

    /// Attaches a writer, which also acts as a provider.
    pub fn attach_writer(&mut self, writer: Box<dyn ResourceWriter>) {
        self.writers.push(writer);
    }

    /// Asks every provider to enumerate its resources and indexes them by
    /// name.
    pub fn sync_resources(&mut self) {
        let mut records = Vec::new();
        for provider in &mut self.providers {
            records.clear();
            sync_provider(
                &mut records,
                provider.as_mut(),
                &mut self.resources,
                self.info.predicted_resource_count,
            );
        }
        for writer in &mut self.writers {
            records.clear();
            sync_provider(
                &mut records,
                writer.as_mut(),
                &mut self.resources,
                self.info.predicted_resource_count,
            );
        }
    }

    /// Resolves a URI to a handle: URNs match by name across providers,
    /// anything else is resolved by the providers of the URI's scheme.
    #[must_use]
    pub fn find_resource(&self, uri: &Uri) -> Option<ResourceHandle> {
        if uri.is_urn() {
            self.find_resource_by_urn(uri)
        } else {
            self.find_resource_by_uri(uri)
        }
    }

    /// Resolves a relative URI through the provider owning `handle`.
    #[must_use]
    pub fn find_resource_relative(
        &self,
        uri: &Uri,
        handle: &ResourceHandle,
    ) -> Option<ResourceHandle> {
        let provider = handle.record().provider()?;
        let record = provider.resolve_relative(uri, handle)?;
        Some(record.handle())
    }

    /// Collects the URIs of all resources passing `filter`.
    pub fn filter_resource_uris(&self, filter: &ResourceFilter<'_>, out: &mut Vec<Uri>) -> u32 {
        let mut collected = 0;
        for provider in self.all_providers() {
            let scheme_allowed = filter.allows_scheme(provider.scheme());
            let hostname_allowed = filter.allows_hostname(provider.hostname());
            if !scheme_allowed || !hostname_allowed {
                tracing::debug!(
                    scheme = provider.scheme(),
                    hostname = provider.hostname(),
                    scheme_allowed,
                    hostname_allowed,
                    "provider was filtered out",
                );
                continue;
            }
            collected += provider.filter_uris(filter, out);
        }
        collected
    }

    /// Loads a resource's bytes, single-flight.
    ///
    /// Exactly one caller drives the provider load; every concurrent caller
    /// suspends on the resource's waiter queue and resumes with the shared
    /// outcome. Loading an already-loaded resource completes without
    /// suspending.
    pub async fn load_resource(&self, handle: &ResourceHandle) -> ResourceResult {
        let record = handle.record();

        // Request-count protocol: the caller that moves the count off zero
        // becomes the loader; negative counts mark a terminally-loaded
        // resource.
        let prev = record.reqcount().fetch_add(1, Ordering::AcqRel);

        if prev < 0 {
            // Terminal: cached state is final, no coordination needed.
            return result_of(record, handle);
        }

        if prev > 0 {
            if record.status() == ResourceStatus::Loaded {
                return result_of(record, handle);
            }
            // Someone else is loading: suspend on the waiter queue until the
            // loader resumes us (always after the final status was set).
            record
                .waiters()
                .enqueue_current(TaskParams::unused())
                .await;
            debug_assert!(matches!(
                record.status(),
                ResourceStatus::Loaded | ResourceStatus::Invalid,
            ));
            return result_of(record, handle);
        }

        // We are the loader.
        record.set_status(ResourceStatus::Loading);
        let provider = record
            .provider()
            .expect("resource record without a provider");
        let loaded = provider.load_resource(handle, ResourcePart::Data).await;

        match loaded {
            Ok(data) => {
                // Safety: loader exclusivity is exactly what the protocol
                // above established.
                unsafe { record.set_last_data(data) };
                record.set_status(ResourceStatus::Loaded);
            }
            Err(err) => {
                tracing::error!(
                    resource = record.origin(),
                    %err,
                    "failed to load resource",
                );
                record.set_status(ResourceStatus::Invalid);
            }
        }

        // Swap in the terminal marker and resume every waiter that requested
        // the load before the swap. Their queue nodes may still be in
        // flight, so keep draining until the expected number resumed.
        let awaiting = i32::from(record.reqcount().swap(i16::MIN, Ordering::AcqRel));
        let mut processed = 1;
        while processed < awaiting {
            processed += record.waiters().resume_all() as i32;
            if processed < awaiting {
                std::thread::yield_now();
            }
        }

        result_of(record, handle)
    }

    /// Releases interest in a loaded resource; the cache itself is dropped
    /// when the last handle goes away.
    pub async fn release_resource(&self, handle: &ResourceHandle) -> ResourceResult {
        result_of(handle.record(), handle)
    }

    /// Hints that a resource's bytes are no longer needed. Unloading is
    /// lazy: the state snapshot is returned and the cache is reclaimed when
    /// the last handle drops.
    pub async fn unload_resource(&self, handle: &ResourceHandle) -> ResourceResult {
        result_of(handle.record(), handle)
    }

    /// Creates a new resource through the writer matching the URI's scheme
    /// and host, inserting it into the name map.
    ///
    /// # Errors
    ///
    /// Fails with [`ResourceError::FailedToFindValidResourceWriter`] when no
    /// attached writer matches.
    pub async fn create_resource(&mut self, uri: &Uri) -> Result<ResourceHandle, ResourceError> {
        let mut selected: Option<usize> = None;
        for (index, writer) in self.writers.iter().enumerate() {
            if writer.scheme() == uri.scheme() && writer.hostname() == uri.host() {
                // Last match wins under multiple matching writers.
                selected = Some(index);
            }
        }
        let Some(index) = selected else {
            return Err(ResourceError::FailedToFindValidResourceWriter);
        };
        let writer = &self.writers[index];
        let provider_ptr: NonNull<dyn ResourceProvider> =
            NonNull::from(&**writer as &dyn ResourceProvider);

        if let Some(existing) = writer.find_resource(uri) {
            return Ok(existing.handle());
        }

        let record = writer
            .create_resource(uri, ResourceCreationFlags::OVERWRITE)
            .await?;
        // Safety: the record was just created, no handle exists yet, and the
        // writer outlives the tracker's handles.
        unsafe { record.record().stamp_provider(provider_ptr) };
        self.resources
            .insert_multi(hash_str(record.record().name()), record);
        Ok(record.handle())
    }

    /// Creates (or finds) the resource for `uri` and writes `data` at
    /// `offset` through its writer.
    pub async fn write_resource(
        &mut self,
        uri: &Uri,
        data: &[u8],
        offset: u64,
    ) -> Result<bool, ResourceError> {
        let handle = self.create_resource(uri).await?;
        self.write_resource_handle(&handle, data, offset).await
    }

    /// Writes `data` into an existing resource at `offset`.
    pub async fn write_resource_handle(
        &self,
        handle: &ResourceHandle,
        data: &[u8],
        offset: u64,
    ) -> Result<bool, ResourceError> {
        let provider = handle
            .record()
            .provider()
            .ok_or(ResourceError::InvalidArgument)?;
        let provider_data = NonNull::from(provider).cast::<()>();

        for writer in &self.writers {
            let writer_data =
                NonNull::from(&**writer as &dyn ResourceProvider).cast::<()>();
            if writer_data == provider_data {
                return writer.write_resource(handle, data, offset).await;
            }
        }
        Err(ResourceError::FailedToFindValidResourceWriter)
    }

    fn all_providers(&self) -> impl Iterator<Item = &dyn ResourceProvider> {
        self.providers
            .iter()
            .map(|p| p.as_ref())
            .chain(self.writers.iter().map(|w| &**w as &dyn ResourceProvider))
    }

    fn find_resource_by_urn(&self, uri: &Uri) -> Option<ResourceHandle> {
        debug_assert!(uri.is_urn());
        // Just grab the first for now.
        let record = self.resources.get(hash_str(uri.path()))?;
        Some(record.handle())
    }

    fn find_resource_by_uri(&self, uri: &Uri) -> Option<ResourceHandle> {
        for provider in self.all_providers() {
            if provider.scheme() != uri.scheme() {
                continue;
            }
            if let Some(record) = provider.find_resource(uri) {
                return Some(record.handle());
            }
        }
        None
    }
}

impl core::fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("resources", &self.resources.count())
            .field("providers", &self.providers.len())
            .field("writers", &self.writers.len())
            .finish()
    }
}

fn sync_provider(
    records: &mut Vec<RecordPtr>,
    provider: &mut (dyn ResourceProvider + 'static),
    resources: &mut HashMap<RecordPtr>,
    predicted: u32,
) {
    let provider_ptr: NonNull<dyn ResourceProvider> = NonNull::from(&mut *provider);
    let result = provider.refresh(records);
    if result == ProviderResult::Failure {
        tracing::warn!(
            scheme = provider.scheme(),
            "failed to refresh resource provider",
        );
        return;
    }

    let new_count = resources.count() + records.len() as u32;
    if new_count > predicted {
        tracing::warn!(
            new_count,
            predicted,
            "resource count exceeded the predicted capacity",
        );
    }
    resources.reserve(new_count);

    for record in records.iter() {
        // Safety: records were just enumerated, no handle exists yet, and
        // the provider boxes are heap-pinned for the tracker's lifetime.
        unsafe { record.record().stamp_provider(provider_ptr) };
        resources.insert_multi(hash_str(record.record().name()), *record);
    }
}

fn result_of(record: &crate::record::ResourceRecord, handle: &ResourceHandle) -> ResourceResult {
    ResourceResult {
        status: record.status(),
        resource: handle.clone(),
        data: record.last_data(),
    }
}

/// Loads the serialized metadata blob of a resource through its provider.
pub async fn resource_meta(handle: &ResourceHandle) -> Result<Data, ResourceError> {
    let provider = handle
        .record()
        .provider()
        .ok_or(ResourceError::InvalidArgument)?;
    provider.load_resource(handle, ResourcePart::Meta).await
}

/// Resolves a dynamic-library name to a load path: first as a `dynlib:` URI,
/// then as an URN with the platform file name, finally falling back to the
/// platform file name itself.
#[must_use]
pub fn resolve_dynlib_path(tracker: &ResourceTracker, name: &str) -> String {
    let dynlib_uri = Uri::from_parts(SCHEME_DYNLIB, "", name);
    if let Some(resource) = tracker.find_resource(&dynlib_uri) {
        return resource.origin().to_owned();
    }

    let file_name = if name.contains('.') {
        name.to_owned()
    } else if cfg!(windows) {
        format!("{name}.dll")
    } else {
        format!("lib{name}.so")
    };

    if let Some(resource) = tracker.find_resource(&Uri::urn(&file_name)) {
        return resource.origin().to_owned();
    }

    file_name
}
