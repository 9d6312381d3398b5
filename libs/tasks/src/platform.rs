// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The process-wide platform context.
//!
//! Platform services (thread creation, storage paths) hang off an explicit
//! [`Platform`] object instead of process singletons. Initialization is a
//! process-wide lifecycle: exactly one `Platform` may exist at a time, and
//! re-initializing before shutdown is a caller bug surfaced as
//! [`PlatformError::AlreadyInitialized`].

use crate::pool::{TaskThreadPool, TaskThreadPoolCreateInfo};
use crate::queue::TaskQueue;
use crate::thread::{TaskThread, TaskThreadInfo};
use core::error::Error;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use glacier_mem::AllocRef;
use std::path::PathBuf;
use std::time::Duration;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Platform-layer errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    /// `Platform::initialize` was called while a context already exists.
    AlreadyInitialized,
    /// The requested capability is not available in this build.
    FeatureNotAvailable,
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => f.write_str("platform is already initialized"),
            Self::FeatureNotAvailable => f.write_str("platform feature is not available"),
        }
    }
}

impl Error for PlatformError {}

/// Platform capabilities that can be queried from a [`Platform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFeature {
    Core,
    Threads,
    Storage,
    /// Rendering surfaces live outside this toolkit.
    Render,
}

/// A queried capability.
pub enum PlatformApi<'a> {
    Core(&'a Platform),
    Threads(&'a ThreadsApi),
    Storage(&'a StorageApi),
}

/// The explicit process-wide platform context.
pub struct Platform {
    threads: ThreadsApi,
    storage: StorageApi,
}

impl Platform {
    /// Creates the process platform context.
    ///
    /// # Errors
    ///
    /// Fails with [`PlatformError::AlreadyInitialized`] when another context
    /// is still alive.
    pub fn initialize(alloc: AllocRef) -> Result<Self, PlatformError> {
        if INITIALIZED.swap(true, Ordering::AcqRel) {
            return Err(PlatformError::AlreadyInitialized);
        }
        tracing::debug!("platform initialized");
        Ok(Self {
            threads: ThreadsApi { alloc },
            storage: StorageApi { _priv: () },
        })
    }

    /// Queries a platform capability.
    ///
    /// # Errors
    ///
    /// Fails with [`PlatformError::FeatureNotAvailable`] for capabilities
    /// this toolkit does not carry.
    pub fn query_api(&self, feature: PlatformFeature) -> Result<PlatformApi<'_>, PlatformError> {
        match feature {
            PlatformFeature::Core => Ok(PlatformApi::Core(self)),
            PlatformFeature::Threads => Ok(PlatformApi::Threads(&self.threads)),
            PlatformFeature::Storage => Ok(PlatformApi::Storage(&self.storage)),
            PlatformFeature::Render => Err(PlatformError::FeatureNotAvailable),
        }
    }

    #[must_use]
    pub fn threads(&self) -> &ThreadsApi {
        &self.threads
    }

    #[must_use]
    pub fn storage(&self) -> &StorageApi {
        &self.storage
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        INITIALIZED.store(false, Ordering::Release);
        tracing::debug!("platform shut down");
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

/// Thread services of the platform.
pub struct ThreadsApi {
    alloc: AllocRef,
}

impl ThreadsApi {
    /// See [`TaskThread::create`].
    #[must_use]
    pub fn create_thread(&self, queue: TaskQueue, info: TaskThreadInfo) -> Option<TaskThread> {
        TaskThread::create(queue, info)
    }

    /// See [`TaskThreadPool::create`].
    #[must_use]
    pub fn create_thread_pool(
        &self,
        queue: TaskQueue,
        info: TaskThreadPoolCreateInfo,
    ) -> TaskThreadPool {
        TaskThreadPool::create(self.alloc.clone(), queue, info)
    }
}

/// Storage paths of the platform.
pub struct StorageApi {
    _priv: (),
}

impl StorageApi {
    /// The process working directory.
    ///
    /// # Errors
    ///
    /// Fails with [`PlatformError::FeatureNotAvailable`] when the working
    /// directory cannot be resolved.
    pub fn working_dir(&self) -> Result<PathBuf, PlatformError> {
        std::env::current_dir().map_err(|_| PlatformError::FeatureNotAvailable)
    }
}

/// Utilities for the calling OS thread.
pub mod current_thread {
    use super::Duration;

    pub fn sleep(duration: Duration) {
        std::thread::sleep(duration);
    }

    pub fn yield_now() {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_is_exclusive() {
        let platform = Platform::initialize(AllocRef::host()).unwrap();
        assert_eq!(
            Platform::initialize(AllocRef::host()).unwrap_err(),
            PlatformError::AlreadyInitialized,
        );
        assert!(matches!(
            platform.query_api(PlatformFeature::Threads),
            Ok(PlatformApi::Threads(_)),
        ));
        assert_eq!(
            platform.query_api(PlatformFeature::Render).err(),
            Some(PlatformError::FeatureNotAvailable),
        );

        drop(platform);
        let again = Platform::initialize(AllocRef::host()).unwrap();
        drop(again);
    }
}
