// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Provider interfaces.
//!
//! A provider covers one URI scheme: it enumerates resources, resolves URIs
//! to records and materializes resource bytes on demand. A writer is a
//! provider that additionally accepts new resources.

use crate::record::{Data, ResourceHandle, ResourceRecord};
use crate::uri::Uri;
use crate::ResourceError;
use bitflags::bitflags;
use core::ptr::NonNull;
use futures::future::BoxFuture;

/// A stable pointer to a provider-owned [`ResourceRecord`].
#[derive(Debug, Clone, Copy)]
pub struct RecordPtr(pub NonNull<ResourceRecord>);

impl RecordPtr {
    #[must_use]
    pub fn from_ref(record: &ResourceRecord) -> Self {
        Self(NonNull::from(record))
    }

    /// Promotes the pointer to a counted handle.
    #[must_use]
    pub fn handle(self) -> ResourceHandle {
        ResourceHandle::from_record(self.0)
    }

    #[must_use]
    pub fn record(&self) -> &ResourceRecord {
        // Safety: record pointers are only produced for live, heap-pinned
        // records owned by an attached provider.
        unsafe { self.0.as_ref() }
    }
}

// Safety: records are `Sync`; the pointer is a view into one.
unsafe impl Send for RecordPtr {}
// Safety: see above.
unsafe impl Sync for RecordPtr {}

/// Outcome of a provider refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderResult {
    Skipped,
    Success,
    Failure,
}

/// Which part of a resource a load refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePart {
    /// The resource bytes themselves.
    Data,
    /// The serialized metadata blob.
    Meta,
}

bitflags! {
    /// Flags of [`ResourceWriter::create_resource`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResourceCreationFlags: u32 {
        /// Replace existing on-disk content.
        const OVERWRITE = 1 << 0;
    }
}

/// Filters providers and resources during URI collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceFilter<'a> {
    /// Allowed schemes; `None` allows all.
    pub schemes: Option<&'a [&'a str]>,
    /// Allowed hostnames; `None` allows all.
    pub hostnames: Option<&'a [&'a str]>,
    /// Allowed path extensions (without the dot); `None` allows all.
    pub extensions: Option<&'a [&'a str]>,
}

impl ResourceFilter<'_> {
    #[must_use]
    pub fn allows_scheme(&self, scheme: &str) -> bool {
        self.schemes.is_none_or(|allowed| allowed.contains(&scheme))
    }

    #[must_use]
    pub fn allows_hostname(&self, hostname: &str) -> bool {
        self.hostnames
            .is_none_or(|allowed| allowed.contains(&hostname))
    }

    #[must_use]
    pub fn allows_path(&self, path: &str) -> bool {
        self.extensions.is_none_or(|allowed| {
            path.rsplit_once('.')
                .is_some_and(|(_, ext)| allowed.contains(&ext))
        })
    }
}

/// A resource provider for one URI scheme.
pub trait ResourceProvider: Send + Sync {
    /// The URI scheme this provider covers.
    fn scheme(&self) -> &str;

    /// The hostname this provider answers for; empty matches host-less URIs.
    fn hostname(&self) -> &str {
        ""
    }

    /// Re-enumerates the provider's resources, appending every record to
    /// `out`. Called by the tracker after attach.
    fn refresh(&mut self, out: &mut Vec<RecordPtr>) -> ProviderResult;

    /// Appends all currently known records to `out`, returning the count.
    fn collect(&self, out: &mut Vec<RecordPtr>) -> u32;

    /// Resolves a URI of this provider's scheme to a record.
    fn find_resource(&self, uri: &Uri) -> Option<RecordPtr>;

    /// Resolves a relative URI against a resource owned by this provider.
    fn resolve_relative(&self, _uri: &Uri, _base: &ResourceHandle) -> Option<RecordPtr> {
        None
    }

    /// Materializes one part of a resource.
    ///
    /// The returned data points into provider-owned storage that stays valid
    /// until [`unload_resource`](Self::unload_resource) runs for the record.
    fn load_resource<'a>(
        &'a self,
        handle: &'a ResourceHandle,
        part: ResourcePart,
    ) -> BoxFuture<'a, Result<Data, ResourceError>>;

    /// Drops cached bytes for a record whose last handle was released.
    fn unload_resource(&self, record: &ResourceRecord);

    /// Appends the URIs of resources passing `filter`, returning the count.
    fn filter_uris(&self, _filter: &ResourceFilter<'_>, _out: &mut Vec<Uri>) -> u32 {
        0
    }
}

/// A provider that also accepts new resources.
pub trait ResourceWriter: ResourceProvider {
    /// Creates a new (empty) resource for `uri`.
    fn create_resource<'a>(
        &'a self,
        uri: &'a Uri,
        flags: ResourceCreationFlags,
    ) -> BoxFuture<'a, Result<RecordPtr, ResourceError>>;

    /// Writes `data` into the resource at `offset`; resolves to `true` on
    /// success.
    fn write_resource<'a>(
        &'a self,
        handle: &'a ResourceHandle,
        data: &'a [u8],
        offset: u64,
    ) -> BoxFuture<'a, Result<bool, ResourceError>>;
}
