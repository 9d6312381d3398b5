// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The resource metadata codec.
//!
//! Metadata is a typed key-value map: keys are stable 64-bit string hashes,
//! values are booleans, 32-bit integers, floats, strings, or arrays of each.
//! The serialized form is little-endian: a 4-byte magic, six `u32`s (bucket
//! capacity, entry count, and the offsets of the bucket array, the entry
//! array, the value array and the data blob), then the regions themselves.
//! The bucket/entry regions are the map's hash storage serialized verbatim,
//! so [`meta_load`] indexes the blob in place without building anything;
//! mutation goes through [`MutableMetadata`], which owns its storage.
//!
//! Sidecar metadata files may also be JSON; [`meta_from_json`] flattens
//! nested objects into dot-separated keys.

use crate::ResourceError;
use glacier_collections::{Buffer, EMPTY_BUCKET, HashMap};
use glacier_mem::{AllocInfo, AllocRef};
use glacier_util::{align_up, hash_str};

/// Magic header of a serialized metadata blob.
pub const META_MAGIC: [u8; 4] = *b"GLMD";

const HEADER_SIZE: usize = 28;
const ENTRY_SIZE: usize = 16;
const VALUE_SIZE: usize = 16;

const KIND_BOOL: u8 = 1;
const KIND_INT: u8 = 2;
const KIND_FLOAT: u8 = 3;
const KIND_STRING: u8 = 4;

/// One serialized value record: type tag, array count (0 for scalars) and
/// the inline value or packed `(offset, size)` of out-of-line storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MetaValue {
    kind: u8,
    count: u16,
    value: u64,
}

impl MetaValue {
    fn offset(&self) -> usize {
        (self.value & 0xffff_ffff) as usize
    }

    fn size(&self) -> usize {
        (self.value >> 32) as usize
    }

    fn from_region(kind: u8, count: u16, offset: usize, size: usize) -> Self {
        Self {
            kind,
            count,
            value: (offset as u64) | ((size as u64) << 32),
        }
    }
}

// === immutable view ===

/// A zero-copy view over a serialized metadata blob.
#[derive(Debug, Clone, Copy)]
pub struct Metadata<'a> {
    bytes: &'a [u8],
    capacity: u32,
    count: u32,
    hashes_offset: u32,
    entries_offset: u32,
    values_offset: u32,
    data_offset: u32,
}

/// Parses a serialized metadata blob into a [`Metadata`] view.
///
/// # Errors
///
/// Fails with [`ResourceError::InvalidMetadata`] when the magic or the
/// region table is malformed.
pub fn meta_load(bytes: &[u8]) -> Result<Metadata<'_>, ResourceError> {
    if bytes.len() < HEADER_SIZE || bytes[..4] != META_MAGIC {
        return Err(ResourceError::InvalidMetadata);
    }

    let word = |at: usize| -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    };

    let meta = Metadata {
        bytes,
        capacity: word(4),
        count: word(8),
        hashes_offset: word(12),
        entries_offset: word(16),
        values_offset: word(20),
        data_offset: word(24),
    };

    let hashes_end = meta.hashes_offset as usize + meta.capacity as usize * 4;
    let entries_end = meta.entries_offset as usize + meta.count as usize * ENTRY_SIZE;
    let values_end = meta.values_offset as usize + meta.count as usize * VALUE_SIZE;
    if hashes_end > bytes.len()
        || entries_end > bytes.len()
        || values_end > bytes.len()
        || meta.data_offset as usize > bytes.len()
        || (meta.capacity != 0 && !meta.capacity.is_power_of_two())
    {
        return Err(ResourceError::InvalidMetadata);
    }

    Ok(meta)
}

impl<'a> Metadata<'a> {
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.find(hash_str(key)).is_some()
    }

    #[must_use]
    pub fn read_bool(&self, key: &str) -> Option<bool> {
        let value = self.typed_scalar(key, KIND_BOOL)?;
        Some(value.value != 0)
    }

    #[must_use]
    pub fn read_int32(&self, key: &str) -> Option<i32> {
        let value = self.typed_scalar(key, KIND_INT)?;
        Some(value.value as u32 as i32)
    }

    #[must_use]
    pub fn read_float(&self, key: &str) -> Option<f32> {
        let value = self.typed_scalar(key, KIND_FLOAT)?;
        Some(f32::from_bits(value.value as u32))
    }

    #[must_use]
    pub fn read_string(&self, key: &str) -> Option<&'a str> {
        let value = self.typed_scalar(key, KIND_STRING)?;
        self.str_at(value.offset(), value.size())
    }

    /// Appends the array stored under `key`; `true` when the key exists with
    /// the right type.
    pub fn read_bool_array(&self, key: &str, out: &mut Vec<bool>) -> bool {
        let Some(value) = self.typed_array(key, KIND_BOOL) else {
            return false;
        };
        let Some(region) = self.region(value.offset(), value.count as usize) else {
            return false;
        };
        out.extend(region.iter().map(|b| *b != 0));
        true
    }

    pub fn read_int32_array(&self, key: &str, out: &mut Vec<i32>) -> bool {
        let Some(value) = self.typed_array(key, KIND_INT) else {
            return false;
        };
        let Some(region) = self.region(value.offset(), value.count as usize * 4) else {
            return false;
        };
        out.extend(
            region
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes(c.try_into().unwrap())),
        );
        true
    }

    pub fn read_float_array(&self, key: &str, out: &mut Vec<f32>) -> bool {
        let Some(value) = self.typed_array(key, KIND_FLOAT) else {
            return false;
        };
        let Some(region) = self.region(value.offset(), value.count as usize * 4) else {
            return false;
        };
        out.extend(
            region
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap())),
        );
        true
    }

    pub fn read_string_array(&self, key: &str, out: &mut Vec<&'a str>) -> bool {
        let Some(value) = self.typed_array(key, KIND_STRING) else {
            return false;
        };
        let Some(table) = self.region(value.offset(), value.count as usize * 8) else {
            return false;
        };
        for pair in table.chunks_exact(8) {
            let offset = u32::from_le_bytes(pair[..4].try_into().unwrap()) as usize;
            let size = u32::from_le_bytes(pair[4..].try_into().unwrap()) as usize;
            match self.str_at(offset, size) {
                Some(s) => out.push(s),
                None => return false,
            }
        }
        true
    }

    /// Deserializes the view into an owned, mutable form.
    #[must_use]
    pub fn to_mutable(&self, alloc: AllocRef) -> MutableMetadata {
        let mut out = MutableMetadata::new(alloc);
        for index in 0..self.count {
            let (hash, _next) = self.entry(index);
            let value = self.value(index);
            out.copy_in(hash, value, self);
        }
        out
    }

    // --- raw region access ---

    fn word(&self, at: usize) -> u32 {
        u32::from_le_bytes(self.bytes[at..at + 4].try_into().unwrap())
    }

    fn bucket(&self, index: u32) -> u32 {
        self.word(self.hashes_offset as usize + index as usize * 4)
    }

    fn entry(&self, index: u32) -> (u64, i32) {
        let at = self.entries_offset as usize + index as usize * ENTRY_SIZE;
        let hash = u64::from_le_bytes(self.bytes[at..at + 8].try_into().unwrap());
        let next = i32::from_le_bytes(self.bytes[at + 8..at + 12].try_into().unwrap());
        (hash, next)
    }

    fn value(&self, index: u32) -> MetaValue {
        let at = self.values_offset as usize + index as usize * VALUE_SIZE;
        MetaValue {
            kind: self.bytes[at],
            count: u16::from_le_bytes(self.bytes[at + 2..at + 4].try_into().unwrap()),
            value: u64::from_le_bytes(self.bytes[at + 8..at + 16].try_into().unwrap()),
        }
    }

    fn find(&self, hash: u64) -> Option<u32> {
        if self.capacity == 0 {
            return None;
        }
        let mut at = self.bucket((hash & u64::from(self.capacity - 1)) as u32);
        while at != EMPTY_BUCKET {
            let (entry_hash, next) = self.entry(at);
            if entry_hash == hash {
                return Some(at);
            }
            at = if next < 0 { EMPTY_BUCKET } else { next as u32 };
        }
        None
    }

    fn typed_scalar(&self, key: &str, kind: u8) -> Option<MetaValue> {
        let value = self.value(self.find(hash_str(key))?);
        (value.kind == kind && value.count == 0).then_some(value)
    }

    fn typed_array(&self, key: &str, kind: u8) -> Option<MetaValue> {
        let value = self.value(self.find(hash_str(key))?);
        (value.kind == kind && value.count != 0).then_some(value)
    }

    fn region(&self, offset: usize, size: usize) -> Option<&'a [u8]> {
        let start = self.data_offset as usize + offset;
        self.bytes.get(start..start + size)
    }

    fn str_at(&self, offset: usize, size: usize) -> Option<&'a str> {
        core::str::from_utf8(self.region(offset, size)?).ok()
    }
}

// === mutable form ===

/// An owned, mutable metadata map; see the [module docs](self).
pub struct MutableMetadata {
    entries: HashMap<MetaValue>,
    data: Buffer,
}

impl MutableMetadata {
    #[must_use]
    pub fn new(alloc: AllocRef) -> Self {
        Self {
            entries: HashMap::new(alloc.clone()),
            data: Buffer::with_align(alloc, 8),
        }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.entries.count()
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.entries.set(
            hash_str(key),
            MetaValue {
                kind: KIND_BOOL,
                count: 0,
                value: u64::from(value),
            },
        );
    }

    pub fn set_int32(&mut self, key: &str, value: i32) {
        self.entries.set(
            hash_str(key),
            MetaValue {
                kind: KIND_INT,
                count: 0,
                value: u64::from(value as u32),
            },
        );
    }

    pub fn set_float(&mut self, key: &str, value: f32) {
        self.entries.set(
            hash_str(key),
            MetaValue {
                kind: KIND_FLOAT,
                count: 0,
                value: u64::from(value.to_bits()),
            },
        );
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        let offset = self.data.append_aligned(value.as_bytes(), 4);
        self.entries.set(
            hash_str(key),
            MetaValue::from_region(KIND_STRING, 0, offset, value.len()),
        );
    }

    pub fn set_bool_array(&mut self, key: &str, values: &[bool]) {
        if values.is_empty() {
            return;
        }
        let bytes: Vec<u8> = values.iter().map(|b| u8::from(*b)).collect();
        let offset = self.data.append_aligned(&bytes, 4);
        self.entries.set(
            hash_str(key),
            MetaValue::from_region(KIND_BOOL, values.len() as u16, offset, bytes.len()),
        );
    }

    pub fn set_int32_array(&mut self, key: &str, values: &[i32]) {
        if values.is_empty() {
            return;
        }
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let offset = self.data.append_aligned(&bytes, 4);
        self.entries.set(
            hash_str(key),
            MetaValue::from_region(KIND_INT, values.len() as u16, offset, bytes.len()),
        );
    }

    pub fn set_float_array(&mut self, key: &str, values: &[f32]) {
        if values.is_empty() {
            return;
        }
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        let offset = self.data.append_aligned(&bytes, 4);
        self.entries.set(
            hash_str(key),
            MetaValue::from_region(KIND_FLOAT, values.len() as u16, offset, bytes.len()),
        );
    }

    pub fn set_string_array(&mut self, key: &str, values: &[&str]) {
        if values.is_empty() {
            return;
        }
        // Layout: count pairs of (offset, size), then the string bytes.
        let table_size = values.len() * 8;
        let table_offset = self.data.append_reserve(AllocInfo::new(table_size, 4));
        let mut entries = Vec::with_capacity(values.len());
        for value in values {
            let offset = self.data.append(value.as_bytes());
            entries.push((offset as u32, value.len() as u32));
        }
        let table = self.data.slice_mut(table_offset, table_size);
        for (index, (offset, size)) in entries.iter().enumerate() {
            table[index * 8..index * 8 + 4].copy_from_slice(&offset.to_le_bytes());
            table[index * 8 + 4..index * 8 + 8].copy_from_slice(&size.to_le_bytes());
        }
        self.entries.set(
            hash_str(key),
            MetaValue::from_region(KIND_STRING, values.len() as u16, table_offset, table_size),
        );
    }

    /// Serializes the map into a blob parseable by [`meta_load`].
    #[must_use]
    pub fn save(&self, alloc: AllocRef) -> Buffer {
        let buckets = self.entries.raw_buckets();
        let entries = self.entries.raw_entries();
        let values = self.entries.raw_values();

        let hashes_offset = HEADER_SIZE;
        let entries_offset =
            align_up((hashes_offset + buckets.len() * 4) as u64, 8) as usize;
        let values_offset = entries_offset + entries.len() * ENTRY_SIZE;
        let data_offset = align_up((values_offset + values.len() * VALUE_SIZE) as u64, 8) as usize;
        let total = data_offset + self.data.len();

        let mut out = Buffer::with_align(alloc, 8);
        out.append_reserve(AllocInfo::new(total, 8));
        let bytes = out.as_mut_slice();

        bytes[..4].copy_from_slice(&META_MAGIC);
        let header = [
            buckets.len() as u32,
            entries.len() as u32,
            hashes_offset as u32,
            entries_offset as u32,
            values_offset as u32,
            data_offset as u32,
        ];
        for (index, word) in header.iter().enumerate() {
            let at = 4 + index * 4;
            bytes[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }

        for (index, bucket) in buckets.iter().enumerate() {
            let at = hashes_offset + index * 4;
            bytes[at..at + 4].copy_from_slice(&bucket.to_le_bytes());
        }
        for (index, entry) in entries.iter().enumerate() {
            let at = entries_offset + index * ENTRY_SIZE;
            bytes[at..at + 8].copy_from_slice(&entry.hash.to_le_bytes());
            bytes[at + 8..at + 12].copy_from_slice(&entry.next.to_le_bytes());
        }
        for (index, value) in values.iter().enumerate() {
            let at = values_offset + index * VALUE_SIZE;
            bytes[at] = value.kind;
            bytes[at + 2..at + 4].copy_from_slice(&value.count.to_le_bytes());
            bytes[at + 8..at + 16].copy_from_slice(&value.value.to_le_bytes());
        }
        bytes[data_offset..].copy_from_slice(self.data.as_slice());

        out
    }

    /// Copies one serialized entry from a loaded view (used by
    /// [`Metadata::to_mutable`]).
    fn copy_in(&mut self, hash: u64, value: MetaValue, source: &Metadata<'_>) {
        if value.count == 0 {
            match value.kind {
                KIND_STRING => {
                    if let Some(s) = source.str_at(value.offset(), value.size()) {
                        let offset = self.data.append_aligned(s.as_bytes(), 4);
                        self.entries.set(
                            hash,
                            MetaValue::from_region(KIND_STRING, 0, offset, s.len()),
                        );
                    }
                }
                _ => self.entries.set(hash, value),
            }
            return;
        }

        match value.kind {
            KIND_STRING => {
                let mut strings = Vec::new();
                let table_size = value.count as usize * 8;
                if let Some(table) = source.region(value.offset(), table_size) {
                    for pair in table.chunks_exact(8) {
                        let offset = u32::from_le_bytes(pair[..4].try_into().unwrap()) as usize;
                        let size = u32::from_le_bytes(pair[4..].try_into().unwrap()) as usize;
                        if let Some(s) = source.str_at(offset, size) {
                            strings.push(s);
                        }
                    }
                }
                let owned: Vec<&str> = strings;
                self.set_string_array_hashed(hash, &owned);
            }
            _ => {
                if let Some(region) = source.region(value.offset(), value.size()) {
                    let offset = self.data.append_aligned(region, 4);
                    self.entries.set(
                        hash,
                        MetaValue::from_region(value.kind, value.count, offset, region.len()),
                    );
                }
            }
        }
    }

    fn set_string_array_hashed(&mut self, hash: u64, values: &[&str]) {
        if values.is_empty() {
            return;
        }
        let table_size = values.len() * 8;
        let table_offset = self.data.append_reserve(AllocInfo::new(table_size, 4));
        let mut entries = Vec::with_capacity(values.len());
        for value in values {
            let offset = self.data.append(value.as_bytes());
            entries.push((offset as u32, value.len() as u32));
        }
        let table = self.data.slice_mut(table_offset, table_size);
        for (index, (offset, size)) in entries.iter().enumerate() {
            table[index * 8..index * 8 + 4].copy_from_slice(&offset.to_le_bytes());
            table[index * 8 + 4..index * 8 + 8].copy_from_slice(&size.to_le_bytes());
        }
        self.entries.set(
            hash,
            MetaValue::from_region(KIND_STRING, values.len() as u16, table_offset, table_size),
        );
    }
}

impl core::fmt::Debug for MutableMetadata {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MutableMetadata")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

/// Builds metadata from a JSON document.
///
/// Nested objects flatten into dot-separated keys; arrays take the type of
/// their first element.
///
/// # Errors
///
/// Fails with [`ResourceError::InvalidMetadata`] on malformed JSON or
/// documents that are not an object.
pub fn meta_from_json(alloc: AllocRef, json: &str) -> Result<MutableMetadata, ResourceError> {
    let document: serde_json::Value =
        serde_json::from_str(json).map_err(|_| ResourceError::InvalidMetadata)?;
    let serde_json::Value::Object(object) = document else {
        return Err(ResourceError::InvalidMetadata);
    };

    let mut meta = MutableMetadata::new(alloc);
    flatten_object(&object, "", &mut meta);
    Ok(meta)
}

fn flatten_object(
    object: &serde_json::Map<String, serde_json::Value>,
    prefix: &str,
    meta: &mut MutableMetadata,
) {
    for (name, value) in object {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        match value {
            serde_json::Value::Object(inner) => flatten_object(inner, &key, meta),
            serde_json::Value::Bool(b) => meta.set_bool(&key, *b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    meta.set_int32(&key, i as i32);
                } else if let Some(f) = n.as_f64() {
                    meta.set_float(&key, f as f32);
                }
            }
            serde_json::Value::String(s) => meta.set_string(&key, s),
            serde_json::Value::Array(values) => flatten_array(&key, values, meta),
            serde_json::Value::Null => {}
        }
    }
}

fn flatten_array(key: &str, values: &[serde_json::Value], meta: &mut MutableMetadata) {
    let Some(first) = values.first() else {
        return;
    };

    match first {
        serde_json::Value::Bool(_) => {
            let collected: Vec<bool> = values.iter().filter_map(|v| v.as_bool()).collect();
            meta.set_bool_array(key, &collected);
        }
        serde_json::Value::Number(n) if n.as_i64().is_some() => {
            let collected: Vec<i32> = values
                .iter()
                .filter_map(|v| v.as_i64())
                .map(|v| v as i32)
                .collect();
            meta.set_int32_array(key, &collected);
        }
        serde_json::Value::Number(_) => {
            let collected: Vec<f32> = values
                .iter()
                .filter_map(|v| v.as_f64())
                .map(|v| v as f32)
                .collect();
            meta.set_float_array(key, &collected);
        }
        serde_json::Value::String(_) => {
            let collected: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
            meta.set_string_array(key, &collected);
        }
        _ => {
            tracing::warn!(key, "unsupported metadata array element type");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::const_assert_eq!(core::mem::size_of::<MetaValue>(), 16);

    #[test]
    fn scalar_and_array_roundtrip() {
        let alloc = AllocRef::host();
        let mut meta = MutableMetadata::new(alloc.clone());
        meta.set_bool("a", true);
        meta.set_int32("b", -1);
        meta.set_string_array("c", &["x", "yy", "zzz"]);

        let blob = meta.save(alloc);
        let loaded = meta_load(blob.as_slice()).unwrap();

        assert_eq!(loaded.read_bool("a"), Some(true));
        assert_eq!(loaded.read_int32("b"), Some(-1));

        let mut strings = Vec::new();
        assert!(loaded.read_string_array("c", &mut strings));
        assert_eq!(strings, vec!["x", "yy", "zzz"]);

        assert_eq!(loaded.read_bool("missing"), None);
        assert_eq!(loaded.read_int32("a"), None, "type mismatch is rejected");
    }

    #[test]
    fn floats_strings_and_numeric_arrays() {
        let alloc = AllocRef::host();
        let mut meta = MutableMetadata::new(alloc.clone());
        meta.set_float("scale", 2.5);
        meta.set_string("entry", "tilemap.tmx");
        meta.set_int32_array("sizes", &[3, 17, 4096]);
        meta.set_float_array("weights", &[0.25, 0.75]);
        meta.set_bool_array("mask", &[true, false, true]);

        let blob = meta.save(alloc);
        let loaded = meta_load(blob.as_slice()).unwrap();

        assert_eq!(loaded.read_float("scale"), Some(2.5));
        assert_eq!(loaded.read_string("entry"), Some("tilemap.tmx"));

        let mut ints = Vec::new();
        assert!(loaded.read_int32_array("sizes", &mut ints));
        assert_eq!(ints, vec![3, 17, 4096]);

        let mut floats = Vec::new();
        assert!(loaded.read_float_array("weights", &mut floats));
        assert_eq!(floats, vec![0.25, 0.75]);

        let mut bools = Vec::new();
        assert!(loaded.read_bool_array("mask", &mut bools));
        assert_eq!(bools, vec![true, false, true]);
    }

    #[test]
    fn replacing_a_key_keeps_the_last_value() {
        let alloc = AllocRef::host();
        let mut meta = MutableMetadata::new(alloc.clone());
        meta.set_int32("a", 1);
        meta.set_int32("a", 2);
        assert_eq!(meta.count(), 1);

        let blob = meta.save(alloc);
        assert_eq!(meta_load(blob.as_slice()).unwrap().read_int32("a"), Some(2));
    }

    #[test]
    fn to_mutable_preserves_entries() {
        let alloc = AllocRef::host();
        let mut meta = MutableMetadata::new(alloc.clone());
        meta.set_string("name", "cotton");
        meta.set_int32_array("sizes", &[1, 2, 3]);
        meta.set_string_array("paths", &["a.png", "b.png"]);

        let blob = meta.save(alloc.clone());
        let loaded = meta_load(blob.as_slice()).unwrap();
        let copied = loaded.to_mutable(alloc.clone());
        let blob2 = copied.save(alloc);
        let reloaded = meta_load(blob2.as_slice()).unwrap();

        assert_eq!(reloaded.read_string("name"), Some("cotton"));
        let mut sizes = Vec::new();
        assert!(reloaded.read_int32_array("sizes", &mut sizes));
        assert_eq!(sizes, vec![1, 2, 3]);
        let mut paths = Vec::new();
        assert!(reloaded.read_string_array("paths", &mut paths));
        assert_eq!(paths, vec!["a.png", "b.png"]);
    }

    #[test]
    fn json_objects_flatten_to_dot_keys() {
        let alloc = AllocRef::host();
        let json = r#"{
            "resource": {
                "paths": ["extra/a.bin", "extra/b.bin"],
                "flags": [1, 1]
            },
            "baked": true,
            "scale": 0.5,
            "label": "terrain"
        }"#;
        let meta = meta_from_json(alloc.clone(), json).unwrap();
        let blob = meta.save(alloc);
        let loaded = meta_load(blob.as_slice()).unwrap();

        assert_eq!(loaded.read_bool("baked"), Some(true));
        assert_eq!(loaded.read_float("scale"), Some(0.5));
        assert_eq!(loaded.read_string("label"), Some("terrain"));

        let mut paths = Vec::new();
        assert!(loaded.read_string_array("resource.paths", &mut paths));
        assert_eq!(paths, vec!["extra/a.bin", "extra/b.bin"]);

        let mut flags = Vec::new();
        assert!(loaded.read_int32_array("resource.flags", &mut flags));
        assert_eq!(flags, vec![1, 1]);
    }

    #[test]
    fn malformed_blobs_are_rejected()  {
        assert_eq!(
            meta_load(b"nope").unwrap_err(),
            ResourceError::InvalidMetadata,
        );
        assert_eq!(
            meta_load(b"GLMDxxxxxxxxxxxxxxxxxxxxxxxx").unwrap_err(),
            ResourceError::InvalidMetadata,
        );
    }
}
