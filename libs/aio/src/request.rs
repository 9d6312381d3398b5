// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;
use glacier_queue::{Linked, Links};
use std::fs::File;

/// Completion callback of an [`AioRequest`].
///
/// Invoked on one of the port's worker threads once the operation finished
/// (successfully or not). `bytes` is the number of bytes transferred.
pub type AioCallback = fn(result: AioResult, bytes: usize, userdata: *mut ());

/// Outcome of a completed request, handed to the [`AioCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioResult {
    Success,
    Error(std::io::ErrorKind),
}

/// Status returned when submitting a request to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioStatus {
    /// The operation finished synchronously; the callback will not fire.
    Completed,
    /// The operation was queued; the callback fires on a port worker.
    Pending,
    /// The operation could not be submitted.
    Error,
}

/// An intrusive I/O request record.
///
/// The record lives inside the suspended frame that waits for the I/O (or in
/// any other location that outlives the operation); the port links it into
/// its submission queue without allocating. Once submitted, the record and
/// everything its operation references (file, buffers) must stay in place
/// until the callback has run.
pub struct AioRequest {
    pub(crate) links: Links<AioRequest>,
    pub(crate) callback: Option<AioCallback>,
    pub(crate) userdata: *mut (),
    pub(crate) op: UnsafeCell<Option<AioOp>>,
    /// Set only for the stub node owned by the port's queue.
    pub(crate) owned_stub: bool,
}

pub(crate) enum AioOp {
    Read {
        file: NonNull<File>,
        offset: u64,
        buf: NonNull<u8>,
        len: usize,
    },
    Write {
        file: NonNull<File>,
        offset: u64,
        data: NonNull<u8>,
        len: usize,
    },
}

impl AioRequest {
    #[must_use]
    pub fn new(callback: AioCallback, userdata: *mut ()) -> Self {
        Self {
            links: Links::new(),
            callback: Some(callback),
            userdata,
            op: UnsafeCell::new(None),
            owned_stub: false,
        }
    }

    pub(crate) fn new_stub() -> Self {
        Self {
            links: Links::new(),
            callback: None,
            userdata: core::ptr::null_mut(),
            op: UnsafeCell::new(None),
            owned_stub: true,
        }
    }
}

impl fmt::Debug for AioRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AioRequest")
            .field("userdata", &self.userdata)
            .field("owned_stub", &self.owned_stub)
            .finish_non_exhaustive()
    }
}

// Safety: a request travels to a worker thread together with the raw
// pointers of its operation; the submission contract (see `port::submit`)
// requires those to stay valid and unaliased until completion.
unsafe impl Send for AioRequest {}
// Safety: see above; the port only touches a request from one worker.
unsafe impl Sync for AioRequest {}

/// Queue handle for submitted requests.
///
/// Requests are borrowed from the submitter's frame, except for the port's
/// stub node, which the queue owns and frees on drop.
pub struct RequestHandle(pub(crate) NonNull<AioRequest>);

impl Drop for RequestHandle {
    fn drop(&mut self) {
        // Safety: the pointer is valid: it either borrows a live frame or
        // owns the boxed stub.
        if unsafe { self.0.as_ref() }.owned_stub {
            // Safety: stub nodes are created via `Box::into_raw` in
            // `AioPort::open` and only released here.
            drop(unsafe { Box::from_raw(self.0.as_ptr()) });
        }
    }
}

// Safety: `AioRequest` is `Send`; the handle is just a pointer to one.
unsafe impl Send for RequestHandle {}

// Safety: requests are pinned for as long as they are linked — submitters
// may not move or free a request until its callback ran, and the stub is
// boxed.
unsafe impl Linked for AioRequest {
    type Handle = RequestHandle;

    fn into_ptr(handle: RequestHandle) -> NonNull<AioRequest> {
        let ptr = handle.0;
        core::mem::forget(handle);
        ptr
    }

    unsafe fn from_ptr(ptr: NonNull<AioRequest>) -> RequestHandle {
        RequestHandle(ptr)
    }

    unsafe fn links(target: NonNull<AioRequest>) -> NonNull<Links<AioRequest>> {
        // Safety: `target` points at a live request.
        let links = unsafe { &raw mut (*target.as_ptr()).links };
        // Safety: fields of a non-null struct pointer are non-null.
        unsafe { NonNull::new_unchecked(links) }
    }
}
