// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The Hailstorm package format: a chunked archive of resources.
//!
//! On disk (little-endian): a fixed header, a chunk table, a resource
//! table, a contiguous UTF-8 path blob, then the chunk payloads in chunk
//! index order, each aligned to its chunk's alignment. Chunks are logical
//! partitions — type 1 holds metadata blobs, type 2 resource data — and
//! every resource records its `(chunk, offset, size)` placement for both,
//! so payload writes can land in any order.
//!
//! [`write_cluster`] performs the synchronous layout pass and drives an
//! [`AsyncWriteStream`] for the I/O; [`parse`] reads a package back.

mod format;
mod write;

pub use format::{
    CHUNK_ENTRY_SIZE, CHUNK_TYPE_DATA, CHUNK_TYPE_METADATA, HAILSTORM_MAGIC,
    HAILSTORM_VERSION_V1, HEADER_SIZE, HailstormChunk, HailstormHeader, HailstormPack,
    HailstormResource, PackError, RESOURCE_ENTRY_SIZE, parse,
};
pub use write::{
    AsyncWriteStream, ChunkRef, HailstormWriteData, HailstormWriteParams, WriteDataInfo,
    WriteError, write_cluster,
};
