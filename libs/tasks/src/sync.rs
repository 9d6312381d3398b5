// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Blocking synchronization at OS-thread boundaries.
//!
//! Tasks never block; these primitives exist for the edges of the system
//! where a plain OS thread has to wait for task work to finish (see
//! [`utils::wait_for`](crate::utils::wait_for)).

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A manually-reset event: once set it stays signalled until reset.
#[derive(Debug, Default)]
pub struct ManualResetEvent {
    signalled: Mutex<bool>,
    cv: Condvar,
}

impl ManualResetEvent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        *signalled = true;
        self.cv.notify_all();
    }

    pub fn reset(&self) {
        *self.signalled.lock().unwrap() = false;
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.signalled.lock().unwrap()
    }

    /// Blocks the calling OS thread until the event is set.
    pub fn wait(&self) {
        let guard = self.signalled.lock().unwrap();
        let _guard = self.cv.wait_while(guard, |signalled| !*signalled).unwrap();
    }

    /// Blocks until the event is set or `timeout` elapsed; `true` when set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.signalled.lock().unwrap();
        let (guard, _result) = self
            .cv
            .wait_timeout_while(guard, timeout, |signalled| !*signalled)
            .unwrap();
        *guard
    }
}

/// A counting barrier: armed with an expected count, each [`set`] consumes
/// one slot, waiters release once the count reaches zero.
///
/// [`set`]: ManualResetBarrier::set
#[derive(Debug, Default)]
pub struct ManualResetBarrier {
    remaining: Mutex<u32>,
    cv: Condvar,
}

impl ManualResetBarrier {
    #[must_use]
    pub fn new(expected: u32) -> Self {
        Self {
            remaining: Mutex::new(expected),
            cv: Condvar::new(),
        }
    }

    /// Re-arms the barrier for `expected` signals.
    pub fn reset(&self, expected: u32) {
        *self.remaining.lock().unwrap() = expected;
    }

    /// Arms `count` additional slots.
    ///
    /// For issuers that discover their work incrementally: arm one slot per
    /// unit of work *before* starting it, then [`wait`](Self::wait) once
    /// everything has been issued.
    pub fn add(&self, count: u32) {
        *self.remaining.lock().unwrap() += count;
    }

    /// Consumes one slot.
    pub fn set(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        debug_assert!(*remaining > 0, "barrier signalled more often than armed");
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.cv.notify_all();
        }
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.remaining.lock().unwrap() == 0
    }

    /// Blocks the calling OS thread until all expected signals arrived.
    pub fn wait(&self) {
        let guard = self.remaining.lock().unwrap();
        let _guard = self.cv.wait_while(guard, |remaining| *remaining > 0).unwrap();
    }

    /// Blocks until released or `timeout` elapsed; `true` when released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.remaining.lock().unwrap();
        let (guard, _result) = self
            .cv
            .wait_timeout_while(guard, timeout, |remaining| *remaining > 0)
            .unwrap();
        *guard == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn event_set_releases_waiter() {
        let event = Arc::new(ManualResetEvent::new());
        let handle = std::thread::spawn({
            let event = event.clone();
            move || {
                std::thread::sleep(Duration::from_millis(10));
                event.set();
            }
        });
        event.wait();
        assert!(event.is_set());
        handle.join().unwrap();

        event.reset();
        assert!(!event.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn barrier_counts_down() {
        let barrier = Arc::new(ManualResetBarrier::new(3));
        for _ in 0..3 {
            let barrier = barrier.clone();
            std::thread::spawn(move || barrier.set());
        }
        barrier.wait();
        assert!(barrier.is_set());
    }

    #[test]
    fn barrier_arms_incrementally() {
        let barrier = Arc::new(ManualResetBarrier::new(0));
        for _ in 0..4 {
            barrier.add(1);
            let barrier = barrier.clone();
            std::thread::spawn(move || barrier.set());
        }
        barrier.wait();
        assert!(barrier.is_set());
    }
}
