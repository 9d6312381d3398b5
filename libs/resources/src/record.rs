// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Resource records and shared handles.
//!
//! Every enumerated resource is backed by one heap-pinned
//! [`ResourceRecord`]: the immutable descriptor plus the mutable cache state
//! (reference count, request count, status, cached bytes, waiter queue).
//! The record is owned by its provider and outlives every handle; only the
//! cache state resets when the last handle drops.

use crate::provider::ResourceProvider;
use crate::uri::Uri;
use bitflags::bitflags;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicI16, AtomicU8, AtomicU16, Ordering};
use glacier_collections::Buffer;
use glacier_tasks::TaskQueue;
use std::sync::OnceLock;

bitflags! {
    /// Flags attached to a resource descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResourceFlags: u32 {
        /// The resource went through an asset bake step.
        const BAKED = 1 << 0;
        /// The resource was declared by a sidecar rather than found on disk.
        const EXTRA = 1 << 1;
        /// The resource was created through a writer at runtime.
        const RUNTIME_CREATED = 1 << 2;
    }
}

/// Load progress of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResourceStatus {
    Available = 0,
    Loading = 1,
    Loaded = 2,
    Unloading = 3,
    Invalid = 4,
}

/// A view of loaded resource bytes.
///
/// `Data` does not own anything; the bytes belong to the resource's cache
/// and stay valid while a handle keeps the resource loaded.
#[derive(Debug, Clone, Copy)]
pub struct Data {
    ptr: *const u8,
    size: usize,
}

impl Data {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            ptr: core::ptr::null(),
            size: 0,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ptr.is_null() || self.size == 0
    }

    /// The viewed bytes.
    ///
    /// # Safety
    ///
    /// The cache the view points into must still be alive, i.e. the caller
    /// holds a handle to the resource and its status is `Loaded`.
    #[must_use]
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.is_empty() {
            return &[];
        }
        // Safety: per the function contract.
        unsafe { core::slice::from_raw_parts(self.ptr, self.size) }
    }

    pub(crate) fn from_buffer(buffer: &Buffer) -> Self {
        Self {
            ptr: buffer.as_slice().as_ptr(),
            size: buffer.len(),
        }
    }

    /// A view of caller-managed bytes; the caller vouches for their
    /// lifetime (see [`Data::as_slice`]).
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            size: bytes.len(),
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Self::empty()
    }
}

// Safety: `Data` is a read-only view; validity is governed by the handle
// lifecycle documented on `as_slice`.
unsafe impl Send for Data {}
// Safety: see above.
unsafe impl Sync for Data {}

/// The immutable descriptor of a resource.
#[derive(Debug)]
pub struct ResourceDesc {
    pub uri: Uri,
    /// The lookup name (a relative path).
    pub name: String,
    /// Implementation-defined origin string (usually the on-disk path).
    pub origin: String,
    pub flags: ResourceFlags,
}

/// A resource descriptor plus its cache state.
///
/// Records are heap-pinned inside their provider; raw pointers into them
/// stay stable for the provider's lifetime.
pub struct ResourceRecord {
    desc: ResourceDesc,
    /// Back reference to the owning provider; stamped by the tracker during
    /// `sync_resources` before any handle exists.
    provider: UnsafeCell<Option<NonNull<dyn ResourceProvider>>>,
    refcount: AtomicU16,
    reqcount: AtomicI16,
    status: AtomicU8,
    /// The published view of the cached bytes.
    last_data: UnsafeCell<Data>,
    /// Owned storage behind `last_data`; written by the single-flight
    /// loader, cleared on last release.
    cache: UnsafeCell<Option<Buffer>>,
    /// Serialized metadata blob, materialized at most once.
    meta: OnceLock<Buffer>,
    /// Tasks suspended on this resource's load.
    waiters: TaskQueue,
}

impl ResourceRecord {
    #[must_use]
    pub fn new(desc: ResourceDesc) -> Box<Self> {
        Box::new(Self {
            desc,
            provider: UnsafeCell::new(None),
            refcount: AtomicU16::new(0),
            reqcount: AtomicI16::new(0),
            status: AtomicU8::new(ResourceStatus::Available as u8),
            last_data: UnsafeCell::new(Data::empty()),
            cache: UnsafeCell::new(None),
            meta: OnceLock::new(),
            waiters: TaskQueue::new(),
        })
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.desc.uri
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.desc.origin
    }

    #[must_use]
    pub fn flags(&self) -> ResourceFlags {
        self.desc.flags
    }

    #[must_use]
    pub fn status(&self) -> ResourceStatus {
        match self.status.load(Ordering::Acquire) {
            1 => ResourceStatus::Loading,
            2 => ResourceStatus::Loaded,
            3 => ResourceStatus::Unloading,
            4 => ResourceStatus::Invalid,
            _ => ResourceStatus::Available,
        }
    }

    pub(crate) fn set_status(&self, status: ResourceStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn reqcount(&self) -> &AtomicI16 {
        &self.reqcount
    }

    /// The current request count of the single-flight protocol. Negative
    /// values mark a terminally-loaded resource.
    #[must_use]
    pub fn request_count(&self) -> i16 {
        self.reqcount.load(Ordering::Relaxed)
    }

    /// Publishes the data view without touching the owned cache (for
    /// providers that manage their own storage).
    ///
    /// # Safety
    ///
    /// Only the single-flight loader may call this, before publishing
    /// `ResourceStatus::Loaded`.
    pub(crate) unsafe fn set_last_data(&self, data: Data) {
        // Safety: loader exclusivity per the function contract.
        unsafe { *self.last_data.get() = data }
    }

    pub(crate) fn waiters(&self) -> &TaskQueue {
        &self.waiters
    }

    #[must_use]
    pub fn last_data(&self) -> Data {
        // Safety: the data view is written before `Loaded` is published and
        // only read back by callers that observed the status.
        unsafe { *self.last_data.get() }
    }

    /// Publishes loaded bytes.
    ///
    /// # Safety
    ///
    /// Only the single-flight loader may call this, before publishing
    /// `ResourceStatus::Loaded`.
    pub unsafe fn publish_cache(&self, bytes: Buffer) -> Data {
        // Safety: loader exclusivity per the function contract.
        unsafe {
            *self.cache.get() = Some(bytes);
            let data = Data::from_buffer((*self.cache.get()).as_ref().unwrap());
            *self.last_data.get() = data;
            data
        }
    }

    /// Drops the cached bytes of this record.
    ///
    /// # Safety
    ///
    /// Only the owning provider's `unload_resource` may call this, and only
    /// while no handle to the record exists (the tracker guarantees this by
    /// unloading from the last handle's drop).
    pub unsafe fn clear_cache(&self) {
        // Safety: exclusivity per the function contract.
        unsafe {
            *self.last_data.get() = Data::empty();
            *self.cache.get() = None;
        }
    }

    /// The serialized metadata blob of this resource, if materialized.
    #[must_use]
    pub fn meta_blob(&self) -> Option<&[u8]> {
        self.meta.get().map(Buffer::as_slice)
    }

    /// Materializes the metadata blob at most once.
    pub fn meta_blob_or_init(&self, init: impl FnOnce() -> Buffer) -> &[u8] {
        self.meta.get_or_init(init).as_slice()
    }

    /// Stamps the provider back reference. Called by the tracker during
    /// `sync_resources`, before any handle to this record exists.
    ///
    /// # Safety
    ///
    /// `provider` must outlive every handle to this record, and no handle
    /// may exist yet.
    pub(crate) unsafe fn stamp_provider(&self, provider: NonNull<dyn ResourceProvider>) {
        // Safety: pre-publication exclusivity per the function contract.
        unsafe { *self.provider.get() = Some(provider) }
    }

    pub(crate) fn provider(&self) -> Option<&dyn ResourceProvider> {
        // Safety: the provider pointer is stamped before handles exist and
        // the provider outlives all handles.
        unsafe { (*self.provider.get()).map(|p| p.as_ref()) }
    }

    fn acquire(&self) -> u16 {
        self.refcount.fetch_add(1, Ordering::Relaxed)
    }

    fn release(&self) -> u16 {
        self.refcount.fetch_sub(1, Ordering::Release)
    }
}

impl core::fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResourceRecord")
            .field("uri", &self.desc.uri)
            .field("status", &self.status())
            .field("refcount", &self.refcount.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// Safety: all mutable state is atomic or guarded by the load/release
// protocol documented on the accessors.
unsafe impl Send for ResourceRecord {}
// Safety: see above.
unsafe impl Sync for ResourceRecord {}

/// A shared owning reference to a resource.
///
/// Copying increments the resource's reference count; dropping the last
/// handle resets the cache state and asks the provider to unload any cached
/// bytes. The descriptor itself stays alive (it belongs to the provider).
pub struct ResourceHandle {
    record: NonNull<ResourceRecord>,
}

impl ResourceHandle {
    pub(crate) fn from_record(record: NonNull<ResourceRecord>) -> Self {
        // Safety: records are alive for the provider's lifetime.
        unsafe { record.as_ref() }.acquire();
        Self { record }
    }

    #[must_use]
    pub fn record(&self) -> &ResourceRecord {
        // Safety: the handle holds a reference; the record is alive.
        unsafe { self.record.as_ref() }
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        self.record().uri()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.record().name()
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        self.record().origin()
    }

    #[must_use]
    pub fn flags(&self) -> ResourceFlags {
        self.record().flags()
    }

    #[must_use]
    pub fn status(&self) -> ResourceStatus {
        self.record().status()
    }
}

impl Clone for ResourceHandle {
    fn clone(&self) -> Self {
        Self::from_record(self.record)
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        let record = self.record();
        let prev = record.release();
        debug_assert!(prev > 0, "resource refcount underflow");
        if prev == 1 {
            core::sync::atomic::fence(Ordering::Acquire);
            // Last reference: reset the coordination state and let the
            // provider drop whatever it still caches for this resource.
            record.reqcount.store(0, Ordering::Relaxed);
            record.set_status(ResourceStatus::Available);
            if let Some(provider) = record.provider() {
                provider.unload_resource(record);
            }
        }
    }
}

impl core::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("uri", self.uri())
            .field("status", &self.status())
            .finish()
    }
}

// Safety: the record is `Sync`; the handle is a counted pointer to it.
unsafe impl Send for ResourceHandle {}
// Safety: see above.
unsafe impl Sync for ResourceHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Box<ResourceRecord> {
        ResourceRecord::new(ResourceDesc {
            uri: Uri::parse("file:///a/b.bin").unwrap(),
            name: String::from("a/b.bin"),
            origin: String::from("/packs/a/b.bin"),
            flags: ResourceFlags::empty(),
        })
    }

    #[test]
    fn handles_count_references() {
        let record = record();
        let ptr = NonNull::from(record.as_ref());

        let first = ResourceHandle::from_record(ptr);
        let second = first.clone();
        assert_eq!(record.refcount.load(Ordering::Relaxed), 2);

        drop(first);
        assert_eq!(record.refcount.load(Ordering::Relaxed), 1);
        drop(second);
        assert_eq!(record.refcount.load(Ordering::Relaxed), 0);
        assert_eq!(record.status(), ResourceStatus::Available);
    }
}
