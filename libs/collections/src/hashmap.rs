// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::Array;
use core::fmt;
use glacier_mem::AllocRef;

/// Sentinel for an empty bucket head.
pub const EMPTY_BUCKET: u32 = u32::MAX;

/// One chain record of a [`HashMap`], parallel to the dense value array.
///
/// Serialized verbatim by the metadata codec; keep the layout stable.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
    pub hash: u64,
    /// Index of the next entry in the same bucket chain, `-1` ends the chain.
    pub next: i32,
}

/// A hash map keyed by pre-computed 64-bit hashes.
///
/// Three flat arrays: `buckets` holds chain heads (indices into `entries`,
/// [`EMPTY_BUCKET`] when unused), `entries` holds `{hash, next}` chain
/// records and `values` the payloads, dense and parallel to `entries`.
///
/// The map doubles as a multi-map: [`insert_multi`] always appends, and
/// [`find_all`] walks every value stored under a hash in insertion order.
///
/// [`insert_multi`]: HashMap::insert_multi
/// [`find_all`]: HashMap::find_all
pub struct HashMap<V> {
    buckets: Array<u32>,
    entries: Array<HashEntry>,
    values: Array<V>,
}

impl<V> HashMap<V> {
    #[must_use]
    pub fn new(alloc: AllocRef) -> Self {
        Self {
            buckets: Array::new(alloc.clone()),
            entries: Array::new(alloc.clone()),
            values: Array::new(alloc),
        }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.buckets.len()
    }

    /// Grows the bucket array so `count` entries fit without rehashing.
    pub fn reserve(&mut self, count: u32) {
        let needed = bucket_count_for(count);
        if needed > self.buckets.len() {
            self.rehash(needed);
        }
        self.entries.reserve(count.saturating_sub(self.entries.len()));
        self.values.reserve(count.saturating_sub(self.values.len()));
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.entries.clear();
        self.values.clear();
    }

    /// Returns the first value stored under `hash`.
    #[must_use]
    pub fn get(&self, hash: u64) -> Option<&V> {
        self.find_first(hash).map(|i| &self.values[i as usize])
    }

    #[must_use]
    pub fn get_mut(&mut self, hash: u64) -> Option<&mut V> {
        self.find_first(hash)
            .map(|i| &mut self.values[i as usize])
    }

    #[must_use]
    pub fn contains(&self, hash: u64) -> bool {
        self.find_first(hash).is_some()
    }

    /// Stores `value` under `hash`, replacing the first value already stored
    /// under that hash. The replaced value is dropped exactly once.
    pub fn set(&mut self, hash: u64, value: V) {
        if let Some(i) = self.find_first(hash) {
            self.values[i as usize] = value;
        } else {
            self.insert_multi(hash, value);
        }
    }

    /// Appends `value` under `hash` without replacing existing values.
    pub fn insert_multi(&mut self, hash: u64, value: V) {
        if self.needs_grow() {
            let target = bucket_count_for(self.count() + 1);
            self.rehash(target.max(self.buckets.len() * 2));
        }

        let index = self.entries.len();
        self.entries.push_back(HashEntry { hash, next: -1 });
        self.values.push_back(value);
        self.link_at_tail(index);
    }

    /// Removes the first value stored under `hash`.
    pub fn remove(&mut self, hash: u64) -> Option<V> {
        let index = self.find_first(hash)?;
        Some(self.remove_at(index))
    }

    /// Index of the first entry with `hash`, chain order.
    #[must_use]
    pub fn find_first(&self, hash: u64) -> Option<u32> {
        if self.buckets.is_empty() {
            return None;
        }
        let mut at = self.buckets[self.bucket_of(hash) as usize];
        while at != EMPTY_BUCKET {
            let entry = self.entries[at as usize];
            if entry.hash == hash {
                return Some(at);
            }
            at = next_to_index(entry.next);
        }
        None
    }

    /// Index of the next entry with the same hash as the entry at `index`.
    #[must_use]
    pub fn find_next(&self, index: u32) -> Option<u32> {
        let hash = self.entries[index as usize].hash;
        let mut at = next_to_index(self.entries[index as usize].next);
        while at != EMPTY_BUCKET {
            let entry = self.entries[at as usize];
            if entry.hash == hash {
                return Some(at);
            }
            at = next_to_index(entry.next);
        }
        None
    }

    /// All values stored under `hash`, in insertion order.
    pub fn find_all(&self, hash: u64) -> FindAll<'_, V> {
        FindAll {
            map: self,
            at: self.find_first(hash),
        }
    }

    #[must_use]
    pub fn value_at(&self, index: u32) -> &V {
        &self.values[index as usize]
    }

    /// Iterates `(hash, &value)` pairs in dense storage order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.entries
            .as_slice()
            .iter()
            .zip(self.values.as_slice())
            .map(|(e, v)| (e.hash, v))
    }

    pub fn values(&self) -> core::slice::Iter<'_, V> {
        self.values.as_slice().iter()
    }

    // --- raw storage access, used by the metadata codec ---

    #[must_use]
    pub fn raw_buckets(&self) -> &[u32] {
        self.buckets.as_slice()
    }

    #[must_use]
    pub fn raw_entries(&self) -> &[HashEntry] {
        self.entries.as_slice()
    }

    #[must_use]
    pub fn raw_values(&self) -> &[V] {
        self.values.as_slice()
    }

    // --- internals ---

    fn bucket_of(&self, hash: u64) -> u32 {
        debug_assert!(self.buckets.len().is_power_of_two());
        (hash & u64::from(self.buckets.len() - 1)) as u32
    }

    fn needs_grow(&self) -> bool {
        let cap = self.buckets.len();
        cap == 0 || self.count() + 1 > cap - cap / 4
    }

    fn link_at_tail(&mut self, index: u32) {
        let bucket = self.bucket_of(self.entries[index as usize].hash) as usize;
        let head = self.buckets[bucket];
        if head == EMPTY_BUCKET {
            self.buckets[bucket] = index;
            return;
        }
        let mut at = head;
        loop {
            let next = self.entries[at as usize].next;
            if next < 0 {
                self.entries[at as usize].next = index as i32;
                return;
            }
            at = next as u32;
        }
    }

    fn unlink(&mut self, index: u32) {
        let entry = self.entries[index as usize];
        let bucket = self.bucket_of(entry.hash) as usize;
        if self.buckets[bucket] == index {
            self.buckets[bucket] = next_to_index(entry.next);
            return;
        }
        let mut at = self.buckets[bucket];
        loop {
            let next = self.entries[at as usize].next;
            debug_assert!(next >= 0, "entry missing from its bucket chain");
            if next as u32 == index {
                self.entries[at as usize].next = entry.next;
                return;
            }
            at = next as u32;
        }
    }

    fn remove_at(&mut self, index: u32) -> V {
        self.unlink(index);

        let last = self.entries.len() - 1;
        if index != last {
            // The last entry is about to move into `index`; repoint whatever
            // references it.
            let moved = self.entries[last as usize];
            let bucket = self.bucket_of(moved.hash) as usize;
            if self.buckets[bucket] == last {
                self.buckets[bucket] = index;
            } else {
                let mut at = self.buckets[bucket];
                loop {
                    let next = self.entries[at as usize].next;
                    debug_assert!(next >= 0, "entry missing from its bucket chain");
                    if next as u32 == last {
                        self.entries[at as usize].next = index as i32;
                        break;
                    }
                    at = next as u32;
                }
            }
        }

        self.entries.swap_remove(index);
        self.values.swap_remove(index)
    }

    fn rehash(&mut self, bucket_count: u32) {
        debug_assert!(bucket_count.is_power_of_two());
        self.buckets.clear();
        self.buckets.reserve(bucket_count);
        for _ in 0..bucket_count {
            self.buckets.push_back(EMPTY_BUCKET);
        }
        for i in 0..self.entries.len() {
            self.entries[i as usize].next = -1;
        }
        for i in 0..self.entries.len() {
            self.link_at_tail(i);
        }
    }
}

impl<V: Copy> HashMap<V> {
    /// Rebuilds a map from serialized raw storage.
    ///
    /// Used by the metadata codec when an immutable view needs to become
    /// owned again. `buckets.len()` must be zero or a power of two and every
    /// index in `buckets`/`entries` must be in range.
    #[must_use]
    pub fn from_raw_parts(
        alloc: AllocRef,
        buckets: &[u32],
        entries: &[HashEntry],
        values: &[V],
    ) -> Self {
        assert_eq!(entries.len(), values.len());
        assert!(buckets.is_empty() || buckets.len().is_power_of_two());

        let mut map = Self::new(alloc);
        map.buckets.extend_from_slice(buckets);
        map.entries.extend_from_slice(entries);
        map.values.extend_from_slice(values);
        map
    }
}

impl<V: fmt::Debug> fmt::Debug for HashMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Iterator over every value stored under one hash, see [`HashMap::find_all`].
pub struct FindAll<'a, V> {
    map: &'a HashMap<V>,
    at: Option<u32>,
}

impl<'a, V> Iterator for FindAll<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.at?;
        self.at = self.map.find_next(index);
        Some(&self.map.values[index as usize])
    }
}

fn next_to_index(next: i32) -> u32 {
    if next < 0 { EMPTY_BUCKET } else { next as u32 }
}

fn bucket_count_for(count: u32) -> u32 {
    // Load factor 3/4.
    (count + count / 3 + 1).next_power_of_two().max(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn map() -> HashMap<i32> {
        HashMap::new(AllocRef::host())
    }

    #[test]
    fn set_get_remove() {
        let mut m = map();
        for i in 0..1000u64 {
            m.set(i, i as i32);
        }
        assert_eq!(m.count(), 1000);
        for i in 0..1000u64 {
            assert_eq!(m.get(i), Some(&(i as i32)));
        }
        for i in (0..1000u64).step_by(2) {
            assert_eq!(m.remove(i), Some(i as i32));
        }
        assert_eq!(m.count(), 500);
        for i in 0..1000u64 {
            assert_eq!(m.get(i).is_some(), i % 2 == 1);
        }
    }

    #[test]
    fn set_replaces_in_place() {
        let mut m = map();
        m.set(7, 1);
        m.set(7, 2);
        assert_eq!(m.count(), 1);
        assert_eq!(m.get(7), Some(&2));
    }

    #[test]
    fn replacing_drops_prior_value_exactly_once() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked(#[expect(dead_code, reason = "payload only")] i32);
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut m: HashMap<Tracked> = HashMap::new(AllocRef::host());
        m.set(42, Tracked(1));
        assert_eq!(DROPS.load(Ordering::Relaxed), 0);
        m.set(42, Tracked(2));
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
        drop(m);
        assert_eq!(DROPS.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn multi_insert_preserves_order() {
        let mut m = map();
        m.insert_multi(5, 10);
        m.insert_multi(5, 11);
        m.insert_multi(9, 90);
        m.insert_multi(5, 12);

        let all: Vec<i32> = m.find_all(5).copied().collect();
        assert_eq!(all, vec![10, 11, 12]);
        assert_eq!(m.find_all(9).count(), 1);
        assert_eq!(m.find_all(1234).count(), 0);
    }

    #[test]
    fn multi_order_survives_rehash() {
        let mut m = map();
        for i in 0..4 {
            m.insert_multi(77, i);
        }
        // Force several rehashes.
        for i in 0..500u64 {
            m.insert_multi(i, 0);
        }
        let all: Vec<i32> = m.find_all(77).copied().collect();
        assert_eq!(all, vec![0, 1, 2, 3]);
    }

    #[test]
    fn raw_parts_roundtrip() {
        let mut m = map();
        for i in 0..50u64 {
            m.set(i * 3, i as i32);
        }

        let rebuilt = HashMap::from_raw_parts(
            AllocRef::host(),
            m.raw_buckets(),
            m.raw_entries(),
            m.raw_values(),
        );
        for i in 0..50u64 {
            assert_eq!(rebuilt.get(i * 3), m.get(i * 3));
        }
    }
}
