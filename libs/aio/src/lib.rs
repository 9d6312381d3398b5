// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Completion-port style asynchronous file I/O.
//!
//! An [`AioPort`] multiplexes file read/write requests onto a small set of
//! worker threads. Submitting an operation associates an intrusive
//! [`AioRequest`] (callback + userdata) with the port; a worker driving
//! [`AioPort::process_events`] performs the positioned I/O and invokes the
//! callback on its own thread. The canonical callback resumes an awaiting
//! task — that wiring lives in the [`fs`] futures, which is what the rest of
//! the engine uses.
//!
//! Shutdown order is port first, then the thread pool driving it: closing
//! the port wakes all workers and makes further submissions fail, while
//! requests already queued still run to completion (requests cannot be
//! cancelled).

mod fs;
mod port;
mod request;

pub use fs::{AioRead, AioWrite, read_at, write_at};
pub use port::{AioPort, AioPortInfo, ProcessEventsInfo};
pub use request::{AioCallback, AioRequest, AioResult, AioStatus};

use core::error::Error;
use core::fmt;

/// Errors surfaced by the I/O futures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioError {
    /// The port was closed before the request could be submitted.
    PortClosed,
    /// The underlying OS operation failed.
    Failed(std::io::ErrorKind),
}

impl fmt::Display for AioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortClosed => f.write_str("aio port is closed"),
            Self::Failed(kind) => write!(f, "aio operation failed: {kind}"),
        }
    }
}

impl Error for AioError {}
