// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Spin policy and field padding for the queue's hot ends.

/// Doubling spin-wait for the queue's two short contention windows:
///
/// - a producer swapped the head but has not yet stored the previous node's
///   `next` pointer (the *inconsistent* state the consumer observes), or
/// - another thread still holds the consumer side.
///
/// Both windows close within a handful of instructions on the other thread,
/// so the wait starts at a single pause and doubles; the cap keeps even a
/// descheduled producer from costing the consumer more than a fraction of a
/// scheduler quantum per retry.
#[derive(Debug)]
pub(crate) struct LinkSpinWait {
    spins: u32,
}

impl LinkSpinWait {
    const MAX_SPINS: u32 = 1 << 6;

    pub(crate) const fn new() -> Self {
        Self { spins: 1 }
    }

    pub(crate) fn spin(&mut self) {
        for _ in 0..self.spins {
            // In tests, especially under loom, the other thread only makes
            // progress if we yield back to the runtime.
            // See https://github.com/tokio-rs/loom/issues/162#issuecomment-665128979
            #[cfg(any(test, loom))]
            std::thread::yield_now();

            core::hint::spin_loop();
        }
        self.spins = (self.spins * 2).min(Self::MAX_SPINS);
    }
}

/// Keeps the queue's producer end (`head`), consumer end (`tail`) and the
/// consumer lock on separate cache lines, so producers hammering the head
/// with swaps never invalidate the line the consumer walks.
///
/// 128 bytes covers the adjacent-line prefetcher pairing on the x86-64 and
/// the big-core aarch64 parts this engine targets; everything else gets a
/// plain 64-byte line.
#[cfg_attr(
    any(target_arch = "x86_64", target_arch = "aarch64"),
    repr(align(128))
)]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    repr(align(64))
)]
#[derive(Debug, Default)]
pub(crate) struct LinePadded<T>(pub(crate) T);

impl<T> core::ops::Deref for LinePadded<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn padded_fields_never_share_a_line() {
        struct Ends {
            head: LinePadded<u64>,
            tail: LinePadded<u64>,
        }

        let ends = Ends {
            head: LinePadded(0),
            tail: LinePadded(0),
        };
        let head = core::ptr::from_ref(&ends.head.0) as usize;
        let tail = core::ptr::from_ref(&ends.tail.0) as usize;
        assert!(head.abs_diff(tail) >= 64);
    }

    #[test]
    fn spin_wait_doubles_up_to_the_cap() {
        let mut wait = LinkSpinWait::new();
        assert_eq!(wait.spins, 1);
        for _ in 0..16 {
            wait.spin();
        }
        assert_eq!(wait.spins, LinkSpinWait::MAX_SPINS);
    }
}
