// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Awaitable file operations.
//!
//! These futures embed an [`AioRequest`] in their own frame and submit it on
//! first poll; the canonical completion callback stores the result and wakes
//! the awaiting task. Dropping a future whose request is still in flight
//! blocks until the port finished it — a submitted request references the
//! future's own memory and must not outlive it.

use crate::request::{AioRequest, AioResult};
use crate::{AioError, AioPort, AioStatus};
use core::marker::PhantomPinned;
use core::pin::Pin;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll, Waker};
use std::fs::File;
use std::sync::Mutex;

/// Reads `buf.len()` bytes from `file` at `offset` through `port`.
///
/// Resolves to the number of bytes actually read (short at end of file).
pub fn read_at<'a>(port: &'a AioPort, file: &'a File, offset: u64, buf: &'a mut [u8]) -> AioRead<'a> {
    AioRead {
        io: AioIo::new(port, file, offset),
        buf,
    }
}

/// Writes all of `data` into `file` at `offset` through `port`.
pub fn write_at<'a>(port: &'a AioPort, file: &'a File, offset: u64, data: &'a [u8]) -> AioWrite<'a> {
    AioWrite {
        io: AioIo::new(port, file, offset),
        data,
    }
}

struct Completion {
    done: AtomicBool,
    result: Mutex<CompletionState>,
}

struct CompletionState {
    waker: Option<Waker>,
    outcome: Option<(AioResult, usize)>,
}

/// State shared by the read and write futures.
struct AioIo<'a> {
    port: &'a AioPort,
    file: &'a File,
    offset: u64,
    request: Option<AioRequest>,
    completion: Completion,
    submitted: bool,
    _pin: PhantomPinned,
}

impl<'a> AioIo<'a> {
    fn new(port: &'a AioPort, file: &'a File, offset: u64) -> Self {
        Self {
            port,
            file,
            offset,
            request: None,
            completion: Completion {
                done: AtomicBool::new(false),
                result: Mutex::new(CompletionState {
                    waker: None,
                    outcome: None,
                }),
            },
            submitted: false,
            _pin: PhantomPinned,
        }
    }

    /// The canonical completion callback: store the outcome, then resume the
    /// awaiting task.
    fn on_complete(result: AioResult, bytes: usize, userdata: *mut ()) {
        // Safety: `userdata` is the `Completion` embedded in a pinned,
        // not-yet-dropped future (the future blocks in drop until `done`).
        let completion = unsafe { &*userdata.cast::<Completion>() };
        let waker = {
            let mut state = completion.result.lock().unwrap();
            state.outcome = Some((result, bytes));
            state.waker.take()
        };
        completion.done.store(true, Ordering::Release);
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Polls the shared state; `submit` performs the first submission.
    ///
    /// # Safety
    ///
    /// `self` must be pinned and `submit` must reference only memory that
    /// outlives the request (enforced by the future's drop behaviour).
    unsafe fn poll_io(
        &mut self,
        cx: &mut Context<'_>,
        submit: impl FnOnce(&AioPort, &File, u64, NonNull<AioRequest>) -> AioStatus,
    ) -> Poll<Result<usize, AioError>> {
        if !self.submitted {
            {
                let mut state = self.completion.result.lock().unwrap();
                state.waker = Some(cx.waker().clone());
            }
            self.request = Some(AioRequest::new(
                Self::on_complete,
                (&raw mut self.completion).cast::<()>(),
            ));
            let request = NonNull::from(self.request.as_mut().unwrap());
            self.submitted = true;

            match submit(self.port, self.file, self.offset, request) {
                AioStatus::Pending => return Poll::Pending,
                AioStatus::Completed => {
                    // Synchronous completion: the callback already ran.
                }
                AioStatus::Error => {
                    self.submitted = false;
                    self.request = None;
                    return Poll::Ready(Err(AioError::PortClosed));
                }
            }
        }

        if self.completion.done.load(Ordering::Acquire) {
            let state = self.completion.result.lock().unwrap();
            let (result, bytes) = state.outcome.expect("completed request without outcome");
            return match result {
                AioResult::Success => Poll::Ready(Ok(bytes)),
                AioResult::Error(kind) => Poll::Ready(Err(AioError::Failed(kind))),
            };
        }

        let mut state = self.completion.result.lock().unwrap();
        // Re-check under the lock: the callback may have fired between the
        // `done` load and taking the lock.
        if self.completion.done.load(Ordering::Acquire) {
            drop(state);
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for AioIo<'_> {
    fn drop(&mut self) {
        if self.submitted && !self.completion.done.load(Ordering::Acquire) {
            // The port still references this frame; requests cannot be
            // cancelled, so wait for the worker to finish it.
            while !self.completion.done.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
        }
    }
}

/// Future returned by [`read_at`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct AioRead<'a> {
    io: AioIo<'a>,
    buf: &'a mut [u8],
}

impl Future for AioRead<'_> {
    type Output = Result<usize, AioError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: we never move out of the pinned future; `io` and `buf`
        // stay in place until drop, and drop waits for completion.
        let this = unsafe { self.get_unchecked_mut() };
        let (buf_ptr, buf_len) = (this.buf.as_mut_ptr(), this.buf.len());
        // Safety: see above; the buffer outlives the request.
        unsafe {
            this.io.poll_io(cx, |port, file, offset, request| {
                port.submit_read(request, file, offset, NonNull::new_unchecked(buf_ptr), buf_len)
            })
        }
    }
}

/// Future returned by [`write_at`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct AioWrite<'a> {
    io: AioIo<'a>,
    data: &'a [u8],
}

impl Future for AioWrite<'_> {
    type Output = Result<usize, AioError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: we never move out of the pinned future.
        let this = unsafe { self.get_unchecked_mut() };
        let (data_ptr, data_len) = (this.data.as_ptr(), this.data.len());
        // Safety: the data slice outlives the request.
        unsafe {
            this.io.poll_io(cx, |port, file, offset, request| {
                port.submit_write(
                    request,
                    file,
                    offset,
                    NonNull::new_unchecked(data_ptr.cast_mut()),
                    data_len,
                )
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AioPortInfo, ProcessEventsInfo};
    use glacier_mem::AllocRef;
    use std::io::Write as _;
    use std::sync::Arc;
    use std::task::Wake;

    struct Flag;
    impl Wake for Flag {
        fn wake(self: Arc<Self>) {}
    }

    fn drive<F: Future>(port: &AioPort, mut fut: Pin<&mut F>) -> F::Output {
        let waker = Waker::from(Arc::new(Flag));
        let mut cx = Context::from_waker(&waker);
        loop {
            if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
                return out;
            }
            port.process_events(ProcessEventsInfo {
                timeout_ms: 50,
                events_max: 4,
            });
        }
    }

    #[test]
    fn read_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0u8; 16])
            .unwrap();

        let port = AioPort::open(AllocRef::host(), AioPortInfo { worker_limit: 1 });

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        let payload = *b"hailstorm-chunk!";
        let mut write = core::pin::pin!(write_at(&port, &file, 4, &payload));
        assert_eq!(drive(&port, write.as_mut()).unwrap(), payload.len());

        let mut buf = [0u8; 16];
        {
            let mut read = core::pin::pin!(read_at(&port, &file, 4, &mut buf));
            assert_eq!(drive(&port, read.as_mut()).unwrap(), 16);
        }
        assert_eq!(&buf, &payload);

        port.close();
    }

    #[test]
    fn submitting_to_closed_port_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::File::create(&path).unwrap();

        let port = AioPort::open(AllocRef::host(), AioPortInfo { worker_limit: 1 });
        port.close();

        let file = std::fs::File::open(&path).unwrap();
        let mut buf = [0u8; 4];
        let mut read = core::pin::pin!(read_at(&port, &file, 0, &mut buf));
        assert_eq!(
            drive(&port, read.as_mut()),
            Err(AioError::PortClosed),
        );
    }
}
