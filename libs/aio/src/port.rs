// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::request::{AioOp, AioRequest, AioResult, AioStatus, RequestHandle};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};
use glacier_mem::AllocRef;
use glacier_queue::LinkedQueue;
use std::fs::File;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Creation parameters of an [`AioPort`].
#[derive(Debug, Clone, Copy)]
pub struct AioPortInfo {
    /// How many worker threads will drive [`AioPort::process_events`]. The
    /// thread pool spawns one dedicated worker per slot.
    pub worker_limit: u32,
}

/// Parameters of one [`AioPort::process_events`] call.
#[derive(Debug, Clone, Copy)]
pub struct ProcessEventsInfo {
    /// How long to sleep waiting for a submission before giving up.
    pub timeout_ms: u32,
    /// Upper bound of events processed in this call.
    pub events_max: u32,
}

/// A completion port for file I/O.
///
/// Cloning the handle shares the port. See the [module docs](crate) for the
/// lifecycle rules.
#[derive(Clone)]
pub struct AioPort {
    inner: Arc<PortInner>,
}

struct PortInner {
    /// Kept for attribution; submissions themselves are intrusive and do not
    /// allocate.
    #[expect(dead_code, reason = "owned so the allocator outlives the port")]
    alloc: AllocRef,
    worker_limit: u32,
    submissions: LinkedQueue<AioRequest>,
    closed: AtomicBool,
    signal: Mutex<u64>,
    signal_cv: Condvar,
}

impl AioPort {
    /// Opens a new port.
    #[must_use]
    pub fn open(alloc: AllocRef, info: AioPortInfo) -> Self {
        let stub = Box::new(AioRequest::new_stub());
        // Safety: `Box::into_raw` never returns null.
        let stub = RequestHandle(unsafe { NonNull::new_unchecked(Box::into_raw(stub)) });
        Self {
            inner: Arc::new(PortInner {
                alloc,
                worker_limit: info.worker_limit,
                submissions: LinkedQueue::new_with_stub(stub),
                closed: AtomicBool::new(false),
                signal: Mutex::new(0),
                signal_cv: Condvar::new(),
            }),
        }
    }

    /// The number of dedicated workers this port expects.
    #[must_use]
    pub fn worker_limit(&self) -> u32 {
        self.inner.worker_limit
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes the port.
    ///
    /// Workers blocked in [`process_events`](Self::process_events) wake up
    /// and return; later submissions fail with [`AioStatus::Error`].
    /// Requests already queued still run to completion — close the port
    /// before tearing down the pool that drives it, not before the requests
    /// finished.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut generation = self.inner.signal.lock().unwrap();
        *generation += 1;
        self.inner.signal_cv.notify_all();
        drop(generation);
        tracing::debug!("aio port closed");
    }

    /// Submits a read request.
    ///
    /// # Safety
    ///
    /// `request`, `file` and `buf` must stay valid and in place until the
    /// request's callback has been invoked, and `buf` must not be accessed
    /// in the meantime.
    pub unsafe fn submit_read(
        &self,
        request: NonNull<AioRequest>,
        file: &File,
        offset: u64,
        buf: NonNull<u8>,
        len: usize,
    ) -> AioStatus {
        let op = AioOp::Read {
            file: NonNull::from(file),
            offset,
            buf,
            len,
        };
        // Safety: forwarded caller contract.
        unsafe { self.submit(request, op) }
    }

    /// Submits a write request.
    ///
    /// # Safety
    ///
    /// `request`, `file` and `data` must stay valid and in place until the
    /// request's callback has been invoked.
    pub unsafe fn submit_write(
        &self,
        request: NonNull<AioRequest>,
        file: &File,
        offset: u64,
        data: NonNull<u8>,
        len: usize,
    ) -> AioStatus {
        let op = AioOp::Write {
            file: NonNull::from(file),
            offset,
            data,
            len,
        };
        // Safety: forwarded caller contract.
        unsafe { self.submit(request, op) }
    }

    unsafe fn submit(&self, request: NonNull<AioRequest>, op: AioOp) -> AioStatus {
        if self.is_closed() {
            return AioStatus::Error;
        }

        // Safety: the caller guarantees the request is live and not yet
        // submitted, so we are the only accessor of its `op` cell.
        unsafe {
            *request.as_ref().op.get() = Some(op);
        }

        self.inner.submissions.push_back(RequestHandle(request));

        let mut generation = self.inner.signal.lock().unwrap();
        *generation += 1;
        self.inner.signal_cv.notify_one();
        drop(generation);

        AioStatus::Pending
    }

    /// Drives the port: pops up to `info.events_max` submissions, performs
    /// their file operations on the calling thread and invokes their
    /// callbacks. Sleeps up to `info.timeout_ms` when there is nothing to
    /// do. Returns the number of completed events.
    ///
    /// This is the body of the pool's dedicated AIO worker routine.
    pub fn process_events(&self, info: ProcessEventsInfo) -> u32 {
        let mut processed = 0;

        while processed < info.events_max {
            let Some(handle) = self.inner.submissions.pop() else {
                if processed > 0 || self.is_closed() {
                    break;
                }
                // Nothing queued: sleep until a submission or close signal.
                let generation = self.inner.signal.lock().unwrap();
                let seen = *generation;
                let _unused = self
                    .inner
                    .signal_cv
                    .wait_timeout_while(
                        generation,
                        Duration::from_millis(u64::from(info.timeout_ms)),
                        |now| *now == seen && !self.is_closed(),
                    )
                    .unwrap();
                if self.inner.submissions.is_empty() {
                    break;
                }
                continue;
            };

            let request = handle.0;
            // The handle only borrows the request; forget it so the request
            // is not treated as a stub by mistake.
            core::mem::forget(handle);

            // Safety: once popped, this worker is the only accessor of the
            // request until its callback ran.
            let op = unsafe { (*request.as_ref().op.get()).take() };
            let op = op.expect("submitted request without an operation");

            let (result, bytes) = perform(op);
            // Safety: the submitter keeps the request alive until the
            // callback has been invoked, which happens right here.
            let request = unsafe { request.as_ref() };
            if let Some(callback) = request.callback {
                callback(result, bytes, request.userdata);
            }
            processed += 1;
        }

        processed
    }
}

impl core::fmt::Debug for AioPort {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AioPort")
            .field("worker_limit", &self.inner.worker_limit)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn perform(op: AioOp) -> (AioResult, usize) {
    match op {
        AioOp::Read {
            file,
            offset,
            buf,
            len,
        } => {
            // Safety: the submitter guarantees file and buffer stay valid
            // until the callback ran.
            let file = unsafe { file.as_ref() };
            let buf = unsafe { core::slice::from_raw_parts_mut(buf.as_ptr(), len) };
            match read_exact_at(file, buf, offset) {
                Ok(read) => (AioResult::Success, read),
                Err(err) => {
                    tracing::warn!(?err, offset, len, "aio read failed");
                    (AioResult::Error(err.kind()), 0)
                }
            }
        }
        AioOp::Write {
            file,
            offset,
            data,
            len,
        } => {
            // Safety: see above.
            let file = unsafe { file.as_ref() };
            let data = unsafe { core::slice::from_raw_parts(data.as_ptr(), len) };
            match write_all_at(file, data, offset) {
                Ok(()) => (AioResult::Success, len),
                Err(err) => {
                    tracing::warn!(?err, offset, len, "aio write failed");
                    (AioResult::Error(err.kind()), 0)
                }
            }
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
            use std::os::unix::fs::FileExt;
            let mut done = 0;
            while done < buf.len() {
                match file.read_at(&mut buf[done..], offset + done as u64)? {
                    0 => break,
                    n => done += n,
                }
            }
            Ok(done)
        }

        fn write_all_at(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
            use std::os::unix::fs::FileExt;
            file.write_all_at(data, offset)
        }
    } else if #[cfg(windows)] {
        fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
            use std::os::windows::fs::FileExt;
            let mut done = 0;
            while done < buf.len() {
                match file.seek_read(&mut buf[done..], offset + done as u64)? {
                    0 => break,
                    n => done += n,
                }
            }
            Ok(done)
        }

        fn write_all_at(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
            use std::os::windows::fs::FileExt;
            let mut done = 0;
            while done < data.len() {
                match file.seek_write(&data[done..], offset + done as u64)? {
                    0 => return Err(std::io::ErrorKind::WriteZero.into()),
                    n => done += n,
                }
            }
            Ok(())
        }
    } else {
        compile_error!("unsupported platform for aio");
    }
}
