// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The resource system: a content-addressed registry over pluggable
//! providers.
//!
//! Providers enumerate the resources of one URI scheme; the
//! [`ResourceTracker`] indexes them by name, resolves URIs to shared
//! [`ResourceHandle`]s and coordinates loading. Loads are *single-flight*:
//! under concurrent demand for the same resource exactly one task drives the
//! provider load while every other caller suspends on the resource's waiter
//! queue and resumes with the shared result. Cached bytes live until the
//! last handle drops, which lazily unloads the resource through its
//! provider.

mod meta;
mod provider;
mod provider_files;
mod provider_fs;
mod record;
mod tracker;
mod uri;
mod writer_fs;

pub use meta::{META_MAGIC, Metadata, MutableMetadata, meta_from_json, meta_load};
pub use provider::{
    ProviderResult, RecordPtr, ResourceCreationFlags, ResourceFilter, ResourcePart,
    ResourceProvider, ResourceWriter,
};
pub use provider_files::{FilesProvider, ResourceFileEntry};
pub use provider_fs::FileSystemProvider;
pub use record::{Data, ResourceDesc, ResourceFlags, ResourceHandle, ResourceRecord, ResourceStatus};
pub use tracker::{
    ResourceResult, ResourceTracker, ResourceTrackerCreateInfo, resolve_dynlib_path,
    resource_meta,
};
pub use uri::{SCHEME_DIR, SCHEME_DYNLIB, SCHEME_FILE, SCHEME_URN, Uri};
pub use writer_fs::FileSystemWriter;

use core::error::Error;
use core::fmt;

/// Errors of the resource system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A precondition was not met; never auto-recovered.
    InvalidArgument,
    /// The URI did not resolve to a known resource.
    NotFound,
    /// No attached writer covers the URI's scheme and host.
    FailedToFindValidResourceWriter,
    /// The provider failed to materialize the resource bytes.
    LoadFailed(std::io::ErrorKind),
    /// The serialized metadata blob is malformed.
    InvalidMetadata,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::NotFound => f.write_str("resource not found"),
            Self::FailedToFindValidResourceWriter => {
                f.write_str("no resource writer matches the uri")
            }
            Self::LoadFailed(kind) => write!(f, "resource load failed: {kind}"),
            Self::InvalidMetadata => f.write_str("invalid metadata blob"),
        }
    }
}

impl Error for ResourceError {}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        Self::LoadFailed(err.kind())
    }
}

impl From<glacier_aio::AioError> for ResourceError {
    fn from(err: glacier_aio::AioError) -> Self {
        match err {
            glacier_aio::AioError::PortClosed => Self::LoadFailed(std::io::ErrorKind::BrokenPipe),
            glacier_aio::AioError::Failed(kind) => Self::LoadFailed(kind),
        }
    }
}
