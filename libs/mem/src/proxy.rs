// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{Alloc, AllocError, AllocInfo, AllocRef, Allocation};
use core::sync::atomic::{AtomicUsize, Ordering};

/// An attribution wrapper around another allocator.
///
/// Forwards every request to its parent and tags the traffic with a name, so
/// per-subsystem memory usage shows up in trace output and in the live
/// counters.
#[derive(Debug)]
pub struct ProxyAllocator {
    parent: AllocRef,
    name: &'static str,
    allocation_count: AtomicUsize,
    allocated_bytes: AtomicUsize,
}

impl ProxyAllocator {
    #[must_use]
    pub fn new(parent: AllocRef, name: &'static str) -> Self {
        Self {
            parent,
            name,
            allocation_count: AtomicUsize::new(0),
            allocated_bytes: AtomicUsize::new(0),
        }
    }

    /// Number of live allocations made through this proxy.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }

    /// Number of live bytes allocated through this proxy.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Relaxed)
    }
}

impl Alloc for ProxyAllocator {
    fn name(&self) -> &str {
        self.name
    }

    fn allocate(&self, info: AllocInfo) -> Result<Allocation, AllocError> {
        let allocation = self.parent.allocate(info)?;
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        self.allocated_bytes
            .fetch_add(allocation.size, Ordering::Relaxed);
        tracing::trace!(
            allocator = self.name,
            size = allocation.size,
            align = allocation.align,
            "allocate",
        );
        Ok(allocation)
    }

    unsafe fn deallocate(&self, allocation: Allocation) {
        self.allocation_count.fetch_sub(1, Ordering::Relaxed);
        self.allocated_bytes
            .fetch_sub(allocation.size, Ordering::Relaxed);
        tracing::trace!(
            allocator = self.name,
            size = allocation.size,
            "deallocate",
        );
        // Safety: the caller guarantees the allocation came from us, and we
        // hand out blocks of our parent unmodified.
        unsafe { self.parent.deallocate(allocation) }
    }
}

impl Drop for ProxyAllocator {
    fn drop(&mut self) {
        let live = self.allocation_count.load(Ordering::Relaxed);
        if live != 0 {
            tracing::warn!(
                allocator = self.name,
                live_allocations = live,
                live_bytes = self.allocated_bytes.load(Ordering::Relaxed),
                "proxy allocator dropped with live allocations",
            );
        }
    }
}
