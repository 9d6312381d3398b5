// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{Alloc, AllocError, AllocInfo, AllocRef, Allocation};
use std::sync::Mutex;

/// A bump allocator over fixed-size buckets.
///
/// Requests that fit into the configured bucket size are carved out of the
/// current bucket with pointer arithmetic only; a fresh bucket is fetched
/// from the parent when the current one runs out. Oversized requests go to
/// the parent directly. [`Alloc::deallocate`] is a no-op — all buckets are
/// returned to the parent at once when the `ForwardAllocator` is dropped,
/// which is the intended usage: short-lived batches of small allocations.
pub struct ForwardAllocator {
    parent: AllocRef,
    bucket_size: usize,
    state: Mutex<State>,
}

struct State {
    buckets: Vec<Allocation>,
    /// Bytes used in the most recent bucket.
    used: usize,
    /// Oversized blocks handed through to the parent.
    direct: Vec<Allocation>,
}

impl ForwardAllocator {
    #[must_use]
    pub fn new(parent: AllocRef, bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be non-zero");
        Self {
            parent,
            bucket_size,
            state: Mutex::new(State {
                buckets: Vec::new(),
                used: 0,
                direct: Vec::new(),
            }),
        }
    }

    /// Number of buckets currently fetched from the parent.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.state.lock().unwrap().buckets.len()
    }
}

impl Alloc for ForwardAllocator {
    fn name(&self) -> &str {
        "forward"
    }

    fn allocate(&self, info: AllocInfo) -> Result<Allocation, AllocError> {
        let align = info.align.max(1);
        if info.size + align > self.bucket_size {
            let allocation = self.parent.allocate(info)?;
            self.state.lock().unwrap().direct.push(allocation);
            return Ok(allocation);
        }

        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(bucket) = state.buckets.last() {
                let base = bucket.ptr.as_ptr() as usize;
                let offset = (base + state.used).next_multiple_of(align) - base;
                if offset + info.size <= bucket.size {
                    let bucket_ptr = bucket.ptr;
                    state.used = offset + info.size;
                    // Safety: `offset` stays within the bucket, so the
                    // resulting pointer is non-null and in bounds.
                    let ptr = unsafe { bucket_ptr.add(offset) };
                    return Ok(Allocation {
                        ptr,
                        size: info.size,
                        align,
                    });
                }
            }

            let bucket = self
                .parent
                .allocate(AllocInfo::new(self.bucket_size, align_of::<usize>()))?;
            state.buckets.push(bucket);
            state.used = 0;
        }
    }

    unsafe fn deallocate(&self, _allocation: Allocation) {
        // Bump-allocated blocks are freed wholesale on drop. Oversized blocks
        // are tracked in `direct` and freed there too; freeing them twice is
        // avoided by the parent never seeing them from here.
    }
}

impl Drop for ForwardAllocator {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap();
        for bucket in state.buckets.drain(..) {
            // Safety: every bucket was allocated from the parent.
            unsafe { self.parent.deallocate(bucket) };
        }
        for block in state.direct.drain(..) {
            // Safety: every direct block was allocated from the parent.
            unsafe { self.parent.deallocate(block) };
        }
    }
}

impl core::fmt::Debug for ForwardAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ForwardAllocator")
            .field("bucket_size", &self.bucket_size)
            .finish_non_exhaustive()
    }
}
