// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! On-disk structures of a Hailstorm package and the reader.

use core::error::Error;
use core::fmt;
use glacier_util::align_up;

/// Magic bytes opening every Hailstorm package.
pub const HAILSTORM_MAGIC: [u8; 4] = *b"HSC0";
pub const HAILSTORM_VERSION_V1: u32 = 1;

/// Serialized size of [`HailstormHeader`].
pub const HEADER_SIZE: usize = 40;
/// Serialized size of one chunk table entry.
pub const CHUNK_ENTRY_SIZE: usize = 24;
/// Serialized size of one resource table entry.
pub const RESOURCE_ENTRY_SIZE: usize = 32;

/// Chunk type tag: the chunk holds metadata blobs.
pub const CHUNK_TYPE_METADATA: u8 = 1;
/// Chunk type tag: the chunk holds resource data.
pub const CHUNK_TYPE_DATA: u8 = 2;

/// The fixed package header.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HailstormHeader {
    pub magic: [u8; 4],
    pub version: u32,
    /// Total size of the package file in bytes.
    pub total_size: u64,
    /// Size of the header region (header + tables + path blob, aligned).
    pub header_size: u32,
    pub chunk_count: u32,
    pub resource_count: u32,
    /// Application-defined values carried verbatim.
    pub custom_values: [u32; 2],
    reserved: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<HailstormHeader>(), HEADER_SIZE);

/// One logical partition of the package.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HailstormChunk {
    /// Payload size of this chunk in bytes.
    pub size: u64,
    /// Alignment of the chunk payload within the file.
    pub align: u32,
    /// [`CHUNK_TYPE_METADATA`] or [`CHUNK_TYPE_DATA`].
    pub kind: u8,
    /// Application persistence class, carried verbatim.
    pub persistence: u8,
    reserved: u16,
    /// Application-defined tag carried verbatim.
    pub app_custom_value: u32,
    reserved2: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<HailstormChunk>(), CHUNK_ENTRY_SIZE);

impl HailstormChunk {
    #[must_use]
    pub fn new(size: u64, align: u32, kind: u8, persistence: u8, app_custom_value: u32) -> Self {
        Self {
            size,
            align,
            kind,
            persistence,
            reserved: 0,
            app_custom_value,
            reserved2: 0,
        }
    }
}

/// One resource table entry; offsets are relative to the owning chunk's
/// payload start.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HailstormResource {
    pub path_offset: u32,
    pub path_size: u32,
    pub meta_chunk: u16,
    pub data_chunk: u16,
    pub meta_offset: u32,
    pub meta_size: u32,
    pub data_offset: u32,
    pub data_size: u32,
    pub align: u32,
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<HailstormResource>(),
    RESOURCE_ENTRY_SIZE
);

/// Errors of [`parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackError {
    InvalidMagic,
    UnsupportedVersion,
    Truncated,
    Malformed,
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::InvalidMagic => "not a hailstorm package",
            Self::UnsupportedVersion => "unsupported package version",
            Self::Truncated => "package data is truncated",
            Self::Malformed => "package tables are malformed",
        };
        f.write_str(message)
    }
}

impl Error for PackError {}

/// A parsed package: the header, both tables and the path blob.
#[derive(Debug, Clone)]
pub struct HailstormPack {
    pub header: HailstormHeader,
    pub chunks: Vec<HailstormChunk>,
    pub resources: Vec<HailstormResource>,
    pub paths: Vec<u8>,
}

impl HailstormPack {
    /// The path of resource `index`.
    #[must_use]
    pub fn resource_path(&self, index: u32) -> Option<&str> {
        let resource = self.resources.get(index as usize)?;
        let start = resource.path_offset as usize;
        let end = start + resource.path_size as usize;
        core::str::from_utf8(self.paths.get(start..end)?).ok()
    }

    /// Absolute file offsets of every chunk payload, derived from the
    /// header size and the chunk alignments (payloads are laid out in chunk
    /// index order).
    #[must_use]
    pub fn chunk_offsets(&self) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(self.chunks.len());
        let mut cursor = u64::from(self.header.header_size);
        for chunk in &self.chunks {
            cursor = align_up(cursor, u64::from(chunk.align.max(1)));
            offsets.push(cursor);
            cursor += chunk.size;
        }
        offsets
    }

    /// Absolute file range of resource `index`'s data payload.
    #[must_use]
    pub fn resource_data_range(&self, index: u32) -> Option<core::ops::Range<usize>> {
        let resource = self.resources.get(index as usize)?;
        let chunk_offset = *self.chunk_offsets().get(resource.data_chunk as usize)?;
        let start = chunk_offset as usize + resource.data_offset as usize;
        Some(start..start + resource.data_size as usize)
    }

    /// Absolute file range of resource `index`'s metadata blob.
    #[must_use]
    pub fn resource_meta_range(&self, index: u32) -> Option<core::ops::Range<usize>> {
        let resource = self.resources.get(index as usize)?;
        let chunk_offset = *self.chunk_offsets().get(resource.meta_chunk as usize)?;
        let start = chunk_offset as usize + resource.meta_offset as usize;
        Some(start..start + resource.meta_size as usize)
    }
}

/// Parses a package header region.
///
/// `bytes` needs to cover at least the header region; payload access goes
/// through the offsets of the returned [`HailstormPack`].
///
/// # Errors
///
/// See [`PackError`].
pub fn parse(bytes: &[u8]) -> Result<HailstormPack, PackError> {
    if bytes.len() < HEADER_SIZE {
        return Err(PackError::Truncated);
    }
    if bytes[..4] != HAILSTORM_MAGIC {
        return Err(PackError::InvalidMagic);
    }

    let word = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
    let dword = |at: usize| u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());

    let header = HailstormHeader {
        magic: HAILSTORM_MAGIC,
        version: word(4),
        total_size: dword(8),
        header_size: word(16),
        chunk_count: word(20),
        resource_count: word(24),
        custom_values: [word(28), word(32)],
        reserved: 0,
    };
    if header.version != HAILSTORM_VERSION_V1 {
        return Err(PackError::UnsupportedVersion);
    }

    let chunks_at = HEADER_SIZE;
    let resources_at = chunks_at + header.chunk_count as usize * CHUNK_ENTRY_SIZE;
    let paths_at = resources_at + header.resource_count as usize * RESOURCE_ENTRY_SIZE;
    if paths_at > header.header_size as usize || header.header_size as usize > bytes.len() {
        return Err(PackError::Truncated);
    }

    let mut chunks = Vec::with_capacity(header.chunk_count as usize);
    for index in 0..header.chunk_count as usize {
        let at = chunks_at + index * CHUNK_ENTRY_SIZE;
        chunks.push(HailstormChunk {
            size: dword(at),
            align: word(at + 8),
            kind: bytes[at + 12],
            persistence: bytes[at + 13],
            reserved: 0,
            app_custom_value: word(at + 16),
            reserved2: 0,
        });
    }

    let mut resources = Vec::with_capacity(header.resource_count as usize);
    for index in 0..header.resource_count as usize {
        let at = resources_at + index * RESOURCE_ENTRY_SIZE;
        let resource = HailstormResource {
            path_offset: word(at),
            path_size: word(at + 4),
            meta_chunk: u16::from_le_bytes(bytes[at + 8..at + 10].try_into().unwrap()),
            data_chunk: u16::from_le_bytes(bytes[at + 10..at + 12].try_into().unwrap()),
            meta_offset: word(at + 12),
            meta_size: word(at + 16),
            data_offset: word(at + 20),
            data_size: word(at + 24),
            align: word(at + 28),
        };
        if resource.meta_chunk as usize >= chunks.len()
            || resource.data_chunk as usize >= chunks.len()
        {
            return Err(PackError::Malformed);
        }
        resources.push(resource);
    }

    let paths = bytes[paths_at..header.header_size as usize].to_vec();

    Ok(HailstormPack {
        header,
        chunks,
        resources,
        paths,
    })
}

pub(crate) fn serialize_header_region(
    header: &HailstormHeader,
    chunks: &[HailstormChunk],
    resources: &[HailstormResource],
    paths: &[u8],
) -> Vec<u8> {
    let mut out = vec![0u8; header.header_size as usize];

    out[..4].copy_from_slice(&header.magic);
    out[4..8].copy_from_slice(&header.version.to_le_bytes());
    out[8..16].copy_from_slice(&header.total_size.to_le_bytes());
    out[16..20].copy_from_slice(&header.header_size.to_le_bytes());
    out[20..24].copy_from_slice(&header.chunk_count.to_le_bytes());
    out[24..28].copy_from_slice(&header.resource_count.to_le_bytes());
    out[28..32].copy_from_slice(&header.custom_values[0].to_le_bytes());
    out[32..36].copy_from_slice(&header.custom_values[1].to_le_bytes());

    let mut at = HEADER_SIZE;
    for chunk in chunks {
        out[at..at + 8].copy_from_slice(&chunk.size.to_le_bytes());
        out[at + 8..at + 12].copy_from_slice(&chunk.align.to_le_bytes());
        out[at + 12] = chunk.kind;
        out[at + 13] = chunk.persistence;
        out[at + 16..at + 20].copy_from_slice(&chunk.app_custom_value.to_le_bytes());
        at += CHUNK_ENTRY_SIZE;
    }

    for resource in resources {
        out[at..at + 4].copy_from_slice(&resource.path_offset.to_le_bytes());
        out[at + 4..at + 8].copy_from_slice(&resource.path_size.to_le_bytes());
        out[at + 8..at + 10].copy_from_slice(&resource.meta_chunk.to_le_bytes());
        out[at + 10..at + 12].copy_from_slice(&resource.data_chunk.to_le_bytes());
        out[at + 12..at + 16].copy_from_slice(&resource.meta_offset.to_le_bytes());
        out[at + 16..at + 20].copy_from_slice(&resource.meta_size.to_le_bytes());
        out[at + 20..at + 24].copy_from_slice(&resource.data_offset.to_le_bytes());
        out[at + 24..at + 28].copy_from_slice(&resource.data_size.to_le_bytes());
        out[at + 28..at + 32].copy_from_slice(&resource.align.to_le_bytes());
        at += RESOURCE_ENTRY_SIZE;
    }

    out[at..at + paths.len()].copy_from_slice(paths);
    out
}

impl HailstormHeader {
    pub(crate) fn new(
        total_size: u64,
        header_size: u32,
        chunk_count: u32,
        resource_count: u32,
        custom_values: [u32; 2],
    ) -> Self {
        Self {
            magic: HAILSTORM_MAGIC,
            version: HAILSTORM_VERSION_V1,
            total_size,
            header_size,
            chunk_count,
            resource_count,
            custom_values,
            reserved: 0,
        }
    }
}
