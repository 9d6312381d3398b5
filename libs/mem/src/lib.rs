// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The allocator model of the runtime.
//!
//! Nothing in this workspace allocates through a hidden global: every
//! component is handed an [`AllocRef`] explicitly and routes its heap traffic
//! through it. Four allocators cover the needs of the engine core:
//!
//! - [`HostAllocator`] — OS-backed, the root of every allocator tree.
//! - [`ProxyAllocator`] — wraps another allocator and tags its traffic with a
//!   name so allocations can be attributed per subsystem.
//! - [`ForwardAllocator`] — services small requests from fixed-size bump
//!   buckets; individual frees are no-ops, everything is released wholesale
//!   when the allocator is dropped.
//! - [`NullAllocator`] — rejects every request; used to prove a code path
//!   never allocates.
//!
//! Memory returned from allocator A must be freed to A. Containers built on
//! top of this (see `glacier-collections`) keep their allocator handle for
//! exactly that reason.

mod forward;
mod host;
mod null;
mod proxy;

pub use forward::ForwardAllocator;
pub use host::HostAllocator;
pub use null::NullAllocator;
pub use proxy::ProxyAllocator;

use core::alloc::Layout;
use core::error::Error;
use core::fmt;
use core::ptr::NonNull;
use std::sync::Arc;

/// A size + alignment request, the argument of every allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocInfo {
    pub size: usize,
    pub align: usize,
}

impl AllocInfo {
    #[must_use]
    pub const fn new(size: usize, align: usize) -> Self {
        Self { size, align }
    }

    /// The allocation request for a single `T`.
    #[must_use]
    pub const fn of<T>() -> Self {
        Self {
            size: size_of::<T>(),
            align: align_of::<T>(),
        }
    }

    /// The allocation request for `count` consecutive `T`s.
    #[must_use]
    pub const fn array_of<T>(count: usize) -> Self {
        Self {
            size: size_of::<T>() * count,
            align: align_of::<T>(),
        }
    }

    pub(crate) fn layout(self) -> Result<Layout, AllocError> {
        Layout::from_size_align(self.size, self.align.max(1)).map_err(|_| AllocError)
    }
}

/// A block of memory handed out by an [`Alloc`] implementation.
///
/// Carries the size and alignment it was requested with, so the allocator can
/// reconstruct the layout on free.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    pub ptr: NonNull<u8>,
    pub size: usize,
    pub align: usize,
}

impl Allocation {
    #[must_use]
    pub fn info(&self) -> AllocInfo {
        AllocInfo::new(self.size, self.align)
    }
}

// Safety: an `Allocation` is a description of a memory block, not an access
// path into it; whoever holds it owns the block.
unsafe impl Send for Allocation {}
// Safety: see above.
unsafe impl Sync for Allocation {}

/// The error returned when an allocator cannot satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("memory allocation failed")
    }
}

impl Error for AllocError {}

/// An allocator. See the [module documentation](crate) for the model.
pub trait Alloc: Send + Sync {
    /// The attribution name of this allocator, used in trace output.
    fn name(&self) -> &str;

    /// Allocates a block of memory satisfying `info`.
    ///
    /// The returned block is at least `info.size` bytes large and aligned to
    /// `info.align`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] when the request cannot be satisfied.
    fn allocate(&self, info: AllocInfo) -> Result<Allocation, AllocError>;

    /// Returns a block of memory to the allocator.
    ///
    /// # Safety
    ///
    /// `allocation` must have been returned by `allocate` on *this* allocator
    /// and must not have been deallocated before.
    unsafe fn deallocate(&self, allocation: Allocation);
}

/// A cheap, clonable handle to an allocator.
///
/// This is what gets passed around: components store an `AllocRef` and the
/// allocator itself outlives everything allocated from it.
#[derive(Clone)]
pub struct AllocRef(Arc<dyn Alloc>);

impl AllocRef {
    pub fn new(alloc: impl Alloc + 'static) -> Self {
        Self(Arc::new(alloc))
    }

    /// A host-backed allocator handle, the usual root of an allocator tree.
    #[must_use]
    pub fn host() -> Self {
        Self::new(HostAllocator::new())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// See [`Alloc::allocate`].
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] when the request cannot be satisfied.
    pub fn allocate(&self, info: AllocInfo) -> Result<Allocation, AllocError> {
        self.0.allocate(info)
    }

    /// See [`Alloc::deallocate`].
    ///
    /// # Safety
    ///
    /// `allocation` must have been returned by `allocate` on this handle (or
    /// a clone of it) and must not have been deallocated before.
    pub unsafe fn deallocate(&self, allocation: Allocation) {
        // Safety: forwarded verbatim; see the function contract.
        unsafe { self.0.deallocate(allocation) }
    }
}

impl fmt::Debug for AllocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AllocRef").field(&self.0.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_roundtrip() {
        let alloc = AllocRef::host();
        let block = alloc.allocate(AllocInfo::new(64, 16)).unwrap();
        assert!(block.size >= 64);
        assert_eq!(block.ptr.as_ptr() as usize % 16, 0);
        // Safety: `block` was just allocated from `alloc`.
        unsafe { alloc.deallocate(block) };
    }

    #[test]
    fn null_allocator_rejects() {
        let alloc = AllocRef::new(NullAllocator);
        assert_eq!(alloc.allocate(AllocInfo::of::<u64>()), Err(AllocError));
    }

    #[test]
    fn proxy_attributes_allocations() {
        let proxy = ProxyAllocator::new(AllocRef::host(), "tracker");
        assert_eq!(proxy.allocation_count(), 0);

        let alloc = AllocRef::new(proxy);
        let a = alloc.allocate(AllocInfo::new(8, 8)).unwrap();
        let b = alloc.allocate(AllocInfo::new(24, 8)).unwrap();
        assert_eq!(alloc.name(), "tracker");

        // Safety: both blocks came from `alloc`.
        unsafe {
            alloc.deallocate(a);
            alloc.deallocate(b);
        }
    }

    #[test]
    fn forward_buckets_are_reused() {
        let fwd = ForwardAllocator::new(AllocRef::host(), 1024);
        let alloc = AllocRef::new(fwd);

        let first = alloc.allocate(AllocInfo::new(100, 8)).unwrap();
        let second = alloc.allocate(AllocInfo::new(100, 8)).unwrap();

        // Both must come out of the same 1 KiB bucket.
        let distance = (second.ptr.as_ptr() as usize).abs_diff(first.ptr.as_ptr() as usize);
        assert!(distance < 1024);

        // Frees are no-ops; memory is reclaimed when the allocator drops.
        // Safety: both blocks came from `alloc`.
        unsafe {
            alloc.deallocate(first);
            alloc.deallocate(second);
        }
    }

    #[test]
    fn forward_oversized_goes_to_parent() {
        let alloc = AllocRef::new(ForwardAllocator::new(AllocRef::host(), 256));
        let big = alloc.allocate(AllocInfo::new(4096, 8)).unwrap();
        assert_eq!(big.size, 4096);
        // Safety: `big` came from `alloc`.
        unsafe { alloc.deallocate(big) };
    }
}
