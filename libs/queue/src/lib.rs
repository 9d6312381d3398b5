// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A multi-producer, single-consumer queue of intrusively linked nodes.
//!
//! This is the wait primitive underneath the task runtime: suspended tasks,
//! load waiters and I/O submissions are all nodes pushed onto one of these
//! queues and popped by whichever thread drives the queue. The queue is the
//! classic [Vyukov intrusive MPSC][vyukov] with a stub node: producers
//! [`push_back`] with a single atomic swap plus a store, the consumer [`pop`]s
//! one node or [`consume`]s everything currently linked.
//!
//! A producer publishes a node in two steps (swap the head, then write the
//! previous node's `next` pointer). A consumer that observes the gap between
//! the two steps sees an *inconsistent* queue and must briefly wait for the
//! producer to finish its second store; [`LinkedQueue::pop`] spins with an
//! exponential backoff, [`LinkedQueue::try_pop`] surfaces the state as an
//! error instead.
//!
//! [vyukov]: http://www.1024cores.net/home/lock-free-algorithms/queues/intrusive-mpsc-node-based-queue
//! [`push_back`]: LinkedQueue::push_back
//! [`pop`]: LinkedQueue::pop
//! [`consume`]: LinkedQueue::consume

mod loom;
mod spin;

use crate::loom::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicPtr, Ordering},
};
use crate::spin::{LinePadded, LinkSpinWait};
use core::{
    fmt,
    marker::PhantomPinned,
    ptr::{self, NonNull},
};

/// Trait implemented by types which can be members of an intrusive linked
/// MPSC queue.
///
/// In order to be part of the queue, a type must contain a [`Links`] value
/// that stores the pointers to other nodes in the queue, and must be able to
/// convert between an owning handle and a raw pointer.
///
/// # Safety
///
/// This is unsafe to implement because it's the implementation's
/// responsibility to ensure that types implementing this trait are valid
/// intrusive collection nodes. In particular:
///
/// - Implementations **must** ensure that implementors are pinned in memory
///   while they are in a queue. While a given `Linked` type is in a queue, it
///   may not be deallocated or moved to a different memory location.
/// - The type implementing this trait **must not** implement [`Unpin`].
/// - Additional safety requirements for individual methods on this trait are
///   documented on those methods.
pub unsafe trait Linked {
    /// The handle owning nodes in the queue.
    ///
    /// This type must have ownership over a `Self`-typed value. When a
    /// `Handle` is dropped, it should drop the corresponding `Linked` type.
    type Handle;

    /// Convert a [`Self::Handle`] to a raw pointer to `Self`, taking
    /// ownership of it in the process.
    fn into_ptr(handle: Self::Handle) -> NonNull<Self>;

    /// Convert a raw pointer back into an owning [`Self::Handle`].
    ///
    /// # Safety
    ///
    /// The pointer must point to a valid instance of `Self` that was
    /// previously turned into a raw pointer by [`Linked::into_ptr`].
    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle;

    /// Return the links of the node pointed to by `ptr`.
    ///
    /// # Safety
    ///
    /// The pointer must point to a valid instance of `Self`.
    unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<Self>>
    where
        Self: Sized;
}

/// Links to other nodes in a [`LinkedQueue`].
///
/// In order to be part of a [`LinkedQueue`], a type must contain an instance
/// of this type, and must implement the [`Linked`] trait for `Links<Self>`.
pub struct Links<T> {
    /// The next node in the queue.
    next: AtomicPtr<T>,

    /// Is this the stub node?
    ///
    /// Used for debug mode consistency checking only.
    #[cfg(debug_assertions)]
    is_stub: AtomicBool,

    /// Linked list links must always be `!Unpin`, in order to ensure that
    /// they never receive LLVM `noalias` annotations; see also
    /// <https://github.com/rust-lang/rust/issues/63818>.
    _unpin: PhantomPinned,
}

/// A multi-producer, single-consumer queue of intrusively linked nodes.
///
/// See the [module documentation](crate) for details.
pub struct LinkedQueue<T: Linked> {
    /// The head of the queue (the producer side). This is accessed in both
    /// `push_back` and `pop`.
    head: LinePadded<AtomicPtr<T>>,

    /// The tail of the queue (the consumer side). Accessed only when popping.
    tail: LinePadded<UnsafeCell<*mut T>>,

    /// Does a consumer handle to the queue exist? If not, it is safe to
    /// create a new consumer.
    has_consumer: LinePadded<AtomicBool>,

    stub: NonNull<T>,
}

/// A handle that holds the exclusive right to pop elements from a
/// [`LinkedQueue`], created by [`LinkedQueue::consume`].
///
/// Holding a `Consumer` amortizes the consumer-exclusion check over a whole
/// batch of pops; it also implements [`Iterator`], draining the queue.
pub struct Consumer<'q, T: Linked> {
    q: &'q LinkedQueue<T>,
}

/// Errors returned by [`LinkedQueue::try_pop`].
#[derive(Debug, Eq, PartialEq)]
pub enum TryPopError {
    /// No element was popped because the queue was empty.
    Empty,

    /// A producer is between its two publication steps; the queue is in an
    /// inconsistent state.
    ///
    /// Since inconsistent states are very short-lived, the caller may want to
    /// retry immediately.
    Inconsistent,

    /// Another thread is currently popping or owns a [`Consumer`] handle.
    Busy,
}

// === impl LinkedQueue ===

impl<T: Linked> LinkedQueue<T> {
    /// Returns a new `LinkedQueue` with the provided stub node.
    #[must_use]
    pub fn new_with_stub(stub: T::Handle) -> Self {
        let stub = T::into_ptr(stub);

        // In debug mode, set the stub flag for consistency checking.
        // Safety: `into_ptr` returned a valid node pointer.
        #[cfg(debug_assertions)]
        unsafe {
            links(stub).is_stub.store(true, Ordering::Release);
        }
        let ptr = stub.as_ptr();

        Self {
            head: LinePadded(AtomicPtr::new(ptr)),
            tail: LinePadded(UnsafeCell::new(ptr)),
            has_consumer: LinePadded(AtomicBool::new(false)),
            stub,
        }
    }

    /// Returns `true` if no real node is currently linked into the queue.
    ///
    /// This is inherently racy in the presence of concurrent producers and
    /// may only be used as a hint (the idle check of the worker loops).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.stub.as_ptr()
    }

    /// Push a node onto the back of the queue.
    ///
    /// This takes ownership of the [`Handle`] and (conceptually) assigns
    /// ownership of the node to the queue while it remains enqueued. This
    /// method never waits; producers complete with one swap and one store.
    ///
    /// [`Handle`]: Linked::Handle
    pub fn push_back(&self, element: T::Handle) {
        let ptr = T::into_ptr(element);

        #[cfg(debug_assertions)]
        // Safety: `into_ptr` returned a valid node pointer.
        debug_assert!(!unsafe { T::links(ptr).as_ref() }.is_stub());

        self.push_back_inner(ptr);
    }

    #[inline]
    fn push_back_inner(&self, ptr: NonNull<T>) {
        // Safety: the caller hands us a valid node pointer.
        unsafe { links(ptr).next.store(ptr::null_mut(), Ordering::Relaxed) };

        let ptr = ptr.as_ptr();
        let prev = self.head.swap(ptr, Ordering::AcqRel);
        // Safety: in release mode, we don't null check `prev`. This is
        // because no pointer in the list should ever be a null pointer, due
        // to the presence of the stub node.
        unsafe {
            links(non_null(prev)).next.store(ptr, Ordering::Release);
        }
    }

    /// Try to pop a node from the queue, without waiting if the queue is in
    /// an inconsistent state or another consumer holds the queue.
    ///
    /// # Errors
    ///
    /// - [`TryPopError::Empty`] if there are no elements in the queue
    /// - [`TryPopError::Inconsistent`] if the queue is currently in an
    ///   inconsistent state
    /// - [`TryPopError::Busy`] if another thread is currently popping
    pub fn try_pop(&self) -> Result<T::Handle, TryPopError> {
        if self
            .has_consumer
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TryPopError::Busy);
        }

        // Safety: the `has_consumer` flag ensures mutual exclusion of
        // consumers.
        let res = unsafe { self.try_pop_unchecked() };

        self.has_consumer.store(false, Ordering::Release);
        res
    }

    /// Pop a node from the queue.
    ///
    /// This method will wait by spinning with an exponential backoff if the
    /// queue is in an inconsistent state or another thread is popping.
    ///
    /// # Returns
    ///
    /// - `Some(`[`T::Handle`]`)` if an element was successfully popped
    /// - `None` if the queue is empty
    pub fn pop(&self) -> Option<T::Handle> {
        let mut boff = LinkSpinWait::new();
        loop {
            match self.try_pop() {
                Ok(val) => return Some(val),
                Err(TryPopError::Empty) => return None,
                Err(_) => boff.spin(),
            }
        }
    }

    /// Returns a [`Consumer`] handle that reserves the exclusive right to pop
    /// nodes from the queue until it is dropped.
    ///
    /// If another thread is popping, this method spins until the queue is no
    /// longer busy.
    pub fn consume(&self) -> Consumer<'_, T> {
        let mut boff = LinkSpinWait::new();
        while self
            .has_consumer
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            while self.has_consumer.load(Ordering::Relaxed) {
                boff.spin();
            }
        }
        Consumer { q: self }
    }

    /// Try to pop a node without checking if another consumer exists.
    ///
    /// # Errors
    ///
    /// Returns [`TryPopError::Empty`] or [`TryPopError::Inconsistent`]; never
    /// [`TryPopError::Busy`].
    ///
    /// # Safety
    ///
    /// This is a multi-producer, *single-consumer* queue. Only one thread may
    /// call `try_pop_unchecked` at a time!
    pub unsafe fn try_pop_unchecked(&self) -> Result<T::Handle, TryPopError> {
        // Safety: the caller guarantees consumer exclusivity, and all node
        // pointers reachable through the queue were produced by `into_ptr`.
        unsafe {
            self.tail.with_mut(|tail| {
                let mut tail_node = NonNull::new(*tail).ok_or(TryPopError::Empty)?;
                let mut next = links(tail_node).next.load(Ordering::Acquire);

                if tail_node == self.stub {
                    #[cfg(debug_assertions)]
                    debug_assert!(links(tail_node).is_stub());
                    let next_node = NonNull::new(next).ok_or(TryPopError::Empty)?;

                    *tail = next;
                    tail_node = next_node;
                    next = links(next_node).next.load(Ordering::Acquire);
                }

                if !next.is_null() {
                    *tail = next;
                    return Ok(T::from_ptr(tail_node));
                }

                let head = self.head.load(Ordering::Acquire);

                if tail_node.as_ptr() != head {
                    // A producer swapped the head but has not yet linked the
                    // previous head; wait for the missing `next` store.
                    return Err(TryPopError::Inconsistent);
                }

                self.push_back_inner(self.stub);

                next = links(tail_node).next.load(Ordering::Acquire);
                if next.is_null() {
                    return Err(TryPopError::Empty);
                }

                *tail = next;

                #[cfg(debug_assertions)]
                debug_assert!(!links(tail_node).is_stub());

                Ok(T::from_ptr(tail_node))
            })
        }
    }

    /// Pop a node, spinning through inconsistent states, without checking
    /// whether another consumer exists.
    ///
    /// # Safety
    ///
    /// Only one thread may call `pop_unchecked` at a time!
    pub unsafe fn pop_unchecked(&self) -> Option<T::Handle> {
        let mut boff = LinkSpinWait::new();
        loop {
            // Safety: the caller guarantees consumer exclusivity.
            match unsafe { self.try_pop_unchecked() } {
                Ok(val) => return Some(val),
                Err(TryPopError::Empty) => return None,
                Err(TryPopError::Inconsistent) => boff.spin(),
                Err(TryPopError::Busy) => {
                    unreachable!("try_pop_unchecked never returns `Busy`!")
                }
            }
        }
    }
}

impl<T: Linked> Drop for LinkedQueue<T> {
    fn drop(&mut self) {
        // Safety: because `Drop` is called with `&mut self`, we have
        // exclusive ownership over the queue, so it's always okay to touch
        // the tail cell.
        let mut current = self.tail.with_mut(|tail| unsafe { *tail });
        while let Some(node) = NonNull::new(current) {
            // Safety: nodes reachable through the queue are valid; they were
            // produced by `into_ptr` (or are the stub, which we skip).
            unsafe {
                let links = links(node);
                let next = links.next.load(Ordering::Relaxed);

                // Skip dropping the stub node here; it would be dropped a
                // second time below.
                if node != self.stub {
                    #[cfg(debug_assertions)]
                    debug_assert!(!links.is_stub(), "stub: {:p}, node: {node:p}", self.stub);
                    drop(T::from_ptr(node));
                } else {
                    #[cfg(debug_assertions)]
                    debug_assert!(links.is_stub());
                }

                current = next;
            }
        }

        // Safety: the stub was produced by `into_ptr` in `new_with_stub` and
        // is owned by the queue.
        unsafe {
            drop(T::from_ptr(self.stub));
        }
    }
}

impl<T> fmt::Debug for LinkedQueue<T>
where
    T: Linked,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            head,
            tail: _,
            has_consumer,
            stub,
        } = self;
        f.debug_struct("LinkedQueue")
            .field("head", &format_args!("{:p}", head.load(Ordering::Acquire)))
            // only the consumer may load the tail; trying to print it here
            // could be racy.
            .field("tail", &format_args!("..."))
            .field("has_consumer", &has_consumer.load(Ordering::Acquire))
            .field("stub", stub)
            .finish()
    }
}

// Safety: the queue owns the nodes pushed into it; moving the queue between
// threads moves that ownership with it.
unsafe impl<T> Send for LinkedQueue<T>
where
    T: Send + Linked,
    T::Handle: Send,
{
}
// Safety: producers only touch the atomics; the consumer side is made
// exclusive through `has_consumer`.
unsafe impl<T: Send + Linked> Sync for LinkedQueue<T> {}

// === impl Consumer ===

impl<T: Send + Linked> Consumer<'_, T> {
    /// Pop a node from the queue, spinning through inconsistent states.
    #[inline]
    pub fn pop(&self) -> Option<T::Handle> {
        debug_assert!(self.q.has_consumer.load(Ordering::Acquire));
        // Safety: we have reserved exclusive access to the queue.
        unsafe { self.q.pop_unchecked() }
    }

    /// Try to pop a node without waiting through inconsistent states.
    ///
    /// # Errors
    ///
    /// Returns [`TryPopError::Empty`] or [`TryPopError::Inconsistent`].
    #[inline]
    pub fn try_pop(&self) -> Result<T::Handle, TryPopError> {
        debug_assert!(self.q.has_consumer.load(Ordering::Acquire));
        // Safety: we have reserved exclusive access to the queue.
        unsafe { self.q.try_pop_unchecked() }
    }
}

impl<T: Linked> Drop for Consumer<'_, T> {
    fn drop(&mut self) {
        self.q.has_consumer.store(false, Ordering::Release);
    }
}

impl<T> Iterator for Consumer<'_, T>
where
    T: Send + Linked,
{
    type Item = T::Handle;

    fn next(&mut self) -> Option<Self::Item> {
        self.pop()
    }
}

impl<T> fmt::Debug for Consumer<'_, T>
where
    T: Linked,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").field("q", &self.q).finish()
    }
}

// === impl Links ===

impl<T> Links<T> {
    /// Returns a new set of `Links` for a [`LinkedQueue`].
    #[cfg(not(loom))]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            _unpin: PhantomPinned,
            #[cfg(debug_assertions)]
            is_stub: AtomicBool::new(false),
        }
    }

    /// Returns a new set of `Links` for a [`LinkedQueue`].
    #[cfg(loom)]
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            _unpin: PhantomPinned,
            #[cfg(debug_assertions)]
            is_stub: AtomicBool::new(false),
        }
    }

    #[cfg(debug_assertions)]
    fn is_stub(&self) -> bool {
        self.is_stub.load(Ordering::Acquire)
    }
}

impl<T> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Links");
        s.field("next", &self.next.load(Ordering::Acquire));
        #[cfg(debug_assertions)]
        s.field("is_stub", &self.is_stub.load(Ordering::Acquire));
        s.finish_non_exhaustive()
    }
}

/// Just a little helper so we don't have to add `.as_ref()` noise everywhere...
#[inline(always)]
unsafe fn links<'a, T: Linked>(ptr: NonNull<T>) -> &'a Links<T> {
    // Safety: caller has to ensure that the pointer is valid.
    unsafe { T::links(ptr).as_ref() }
}

/// Helper to construct a `NonNull<T>` from a raw pointer to `T`, with null
/// checks elided in release mode.
#[cfg(debug_assertions)]
#[track_caller]
#[inline(always)]
unsafe fn non_null<T>(ptr: *mut T) -> NonNull<T> {
    NonNull::new(ptr).expect(
        "/!\\ constructed a `NonNull` from a null pointer! /!\\ \n\
        in release mode, this would have called `NonNull::new_unchecked`, \
        violating the `NonNull` invariant!",
    )
}

/// Helper to construct a `NonNull<T>` from a raw pointer to `T`, with null
/// checks elided in release mode.
///
/// This is the release mode version.
#[cfg(not(debug_assertions))]
#[inline(always)]
unsafe fn non_null<T>(ptr: *mut T) -> NonNull<T> {
    // Safety: caller has to ensure that the pointer is valid.
    unsafe { NonNull::new_unchecked(ptr) }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Entry {
        links: Links<Entry>,
        val: i32,
    }

    impl PartialEq for Entry {
        fn eq(&self, other: &Self) -> bool {
            self.val == other.val
        }
    }

    impl Entry {
        fn new(val: i32) -> Pin<Box<Self>> {
            Box::pin(Self {
                val,
                ..Self::default()
            })
        }
    }

    // Safety: entries are owned by `Pin<Box<..>>`, so they are pinned for as
    // long as they are linked into a queue.
    unsafe impl Linked for Entry {
        type Handle = Pin<Box<Self>>;

        fn into_ptr(handle: Pin<Box<Entry>>) -> NonNull<Entry> {
            // Safety: we never move out of the pinned box; the pointer is
            // only used to re-materialize the box in `from_ptr`.
            unsafe { NonNull::from(Box::leak(Pin::into_inner_unchecked(handle))) }
        }

        unsafe fn from_ptr(ptr: NonNull<Entry>) -> Pin<Box<Entry>> {
            // Safety: `ptr` was produced by `into_ptr` from a pinned box.
            unsafe { Pin::new_unchecked(Box::from_raw(ptr.as_ptr())) }
        }

        unsafe fn links(target: NonNull<Entry>) -> NonNull<Links<Entry>> {
            // Safety: `target` points at a live `Entry`; `addr_of_mut` avoids
            // materializing a reference.
            let links = unsafe { &raw mut (*target.as_ptr()).links };
            // Safety: fields of a non-null struct pointer are non-null.
            unsafe { NonNull::new_unchecked(links) }
        }
    }

    fn new_queue() -> LinkedQueue<Entry> {
        LinkedQueue::new_with_stub(Entry::new(0))
    }

    #[test]
    fn push_pop_fifo() {
        let q = new_queue();
        assert!(q.is_empty());

        for i in 1..=4 {
            q.push_back(Entry::new(i));
        }
        assert!(!q.is_empty());

        for i in 1..=4 {
            assert_eq!(q.pop().unwrap().val, i);
        }
        assert!(q.pop().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn consume_drains_in_order() {
        let q = new_queue();
        for i in 0..10 {
            q.push_back(Entry::new(i));
        }

        let seen: Vec<i32> = q.consume().map(|e| e.val).collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn consumer_excludes_other_poppers() {
        let q = new_queue();
        q.push_back(Entry::new(1));

        let consumer = q.consume();
        assert_eq!(q.try_pop(), Err(TryPopError::Busy));
        assert_eq!(consumer.pop().unwrap().val, 1);
        drop(consumer);

        assert_eq!(q.try_pop(), Err(TryPopError::Empty));
    }

    #[test]
    fn multi_producer_single_consumer() {
        const THREADS: i32 = 4;
        const MSGS: i32 = 100;

        crate::loom::model(|| {
            let q = Arc::new(new_queue());

            let producers: Vec<_> = (0..THREADS)
                .map(|t| {
                    let q = q.clone();
                    crate::loom::thread::spawn(move || {
                        for i in 0..MSGS {
                            q.push_back(Entry::new(t * MSGS + i));
                        }
                    })
                })
                .collect();

            let mut seen = Vec::new();
            while seen.len() < (THREADS * MSGS) as usize {
                if let Some(entry) = q.pop() {
                    seen.push(entry.val);
                } else {
                    crate::loom::thread::yield_now();
                }
            }

            for p in producers {
                p.join().unwrap();
            }

            // Per-producer order must be preserved even though the
            // interleaving is arbitrary.
            for t in 0..THREADS {
                let per: Vec<i32> = seen
                    .iter()
                    .copied()
                    .filter(|v| v / MSGS == t)
                    .collect();
                assert_eq!(per, (t * MSGS..(t + 1) * MSGS).collect::<Vec<_>>());
            }
        });
    }

    #[test]
    fn dropping_queue_drops_nodes() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DROPS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Default)]
        struct Counted {
            links: Links<Counted>,
            counted: bool,
        }

        impl Drop for Counted {
            fn drop(&mut self) {
                if self.counted {
                    DROPS.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        // Safety: same reasoning as for `Entry` above.
        unsafe impl Linked for Counted {
            type Handle = Pin<Box<Self>>;

            fn into_ptr(handle: Pin<Box<Counted>>) -> NonNull<Counted> {
                // Safety: see `Entry::into_ptr`.
                unsafe { NonNull::from(Box::leak(Pin::into_inner_unchecked(handle))) }
            }

            unsafe fn from_ptr(ptr: NonNull<Counted>) -> Pin<Box<Counted>> {
                // Safety: see `Entry::from_ptr`.
                unsafe { Pin::new_unchecked(Box::from_raw(ptr.as_ptr())) }
            }

            unsafe fn links(target: NonNull<Counted>) -> NonNull<Links<Counted>> {
                // Safety: see `Entry::links`.
                let links = unsafe { &raw mut (*target.as_ptr()).links };
                // Safety: fields of a non-null struct pointer are non-null.
                unsafe { NonNull::new_unchecked(links) }
            }
        }

        {
            let q: LinkedQueue<Counted> = LinkedQueue::new_with_stub(Box::pin(Counted::default()));
            for _ in 0..3 {
                q.push_back(Box::pin(Counted {
                    links: Links::new(),
                    counted: true,
                }));
            }
            // Pop one, leave two linked.
            assert!(q.pop().is_some());
        }

        assert_eq!(DROPS.load(Ordering::Relaxed), 3);
    }
}

#[cfg(all(loom, test))]
mod loom_tests {
    use super::*;
    use crate::loom::{self, thread};
    use std::boxed::Box;
    use std::pin::Pin;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Entry {
        links: Links<Entry>,
        val: i32,
    }

    // Safety: entries are owned by `Pin<Box<..>>`; see the unit tests.
    unsafe impl Linked for Entry {
        type Handle = Pin<Box<Self>>;

        fn into_ptr(handle: Pin<Box<Entry>>) -> NonNull<Entry> {
            // Safety: we never move out of the pinned box.
            unsafe { NonNull::from(Box::leak(Pin::into_inner_unchecked(handle))) }
        }

        unsafe fn from_ptr(ptr: NonNull<Entry>) -> Pin<Box<Entry>> {
            // Safety: `ptr` was produced by `into_ptr`.
            unsafe { Pin::new_unchecked(Box::from_raw(ptr.as_ptr())) }
        }

        unsafe fn links(target: NonNull<Entry>) -> NonNull<Links<Entry>> {
            // Safety: `target` points at a live `Entry`.
            let links = unsafe { &raw mut (*target.as_ptr()).links };
            // Safety: fields of a non-null struct pointer are non-null.
            unsafe { NonNull::new_unchecked(links) }
        }
    }

    fn entry(val: i32) -> Pin<Box<Entry>> {
        Box::pin(Entry {
            val,
            ..Entry::default()
        })
    }

    #[test]
    fn two_producers_one_consumer() {
        const THREADS: i32 = 2;
        const MSGS: i32 = 2;

        loom::model(|| {
            let q = Arc::new(LinkedQueue::<Entry>::new_with_stub(entry(666)));

            let producers: Vec<_> = (0..THREADS)
                .map(|t| {
                    let q = q.clone();
                    thread::spawn(move || {
                        for i in 0..MSGS {
                            q.push_back(entry(t * 10 + i));
                        }
                    })
                })
                .collect();

            let mut popped = 0;
            while popped < THREADS * MSGS {
                match q.try_pop() {
                    Ok(_) => popped += 1,
                    Err(TryPopError::Busy) => {
                        panic!("single consumer must never observe Busy")
                    }
                    Err(_) => thread::yield_now(),
                }
            }

            for p in producers {
                p.join().unwrap();
            }
        });
    }
}
