// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The package writer: a synchronous layout pass followed by a streamed,
//! order-independent write pass.
//!
//! Layout walks the resources in input order, letting the caller's chunk
//! callbacks pick (and grow) chunks, and computes every placement up front.
//! The write pass then only *issues* writes — header, one per metadata
//! blob, one per resource — through an [`AsyncWriteStream`]; since all file
//! offsets are pre-computed, the stream may complete them in any order, and
//! [`AsyncWriteStream::close`] is where completion of all issued writes is
//! awaited.

use crate::format::{
    CHUNK_ENTRY_SIZE, CHUNK_TYPE_DATA, CHUNK_TYPE_METADATA, HEADER_SIZE, HailstormChunk,
    HailstormHeader, HailstormResource, RESOURCE_ENTRY_SIZE, serialize_header_region,
};
use core::error::Error;
use core::fmt;
use glacier_util::align_up;

/// Size and alignment of one resource's data, known before the bytes are.
#[derive(Debug, Clone, Copy)]
pub struct WriteDataInfo {
    pub size: u64,
    pub align: u32,
}

/// A chunk pair picked by the selector callback.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRef {
    pub meta_chunk: u16,
    pub data_chunk: u16,
}

/// Everything the layout pass needs to know about the input resources.
pub struct HailstormWriteData<'a> {
    /// Resource paths, stored in the package's path blob.
    pub paths: &'a [&'a str],
    /// Per-resource data size and alignment.
    pub data: &'a [WriteDataInfo],
    /// Serialized metadata blobs; resources map into this table.
    pub metadata: &'a [&'a [u8]],
    /// `metadata_mapping[resource] == metadata index`; blobs may be shared.
    pub metadata_mapping: &'a [u32],
    /// Application values stored in the header.
    pub custom_values: [u32; 2],
}

/// Chunk policy callbacks and the seed chunk list.
pub struct HailstormWriteParams<'cb> {
    /// Caller-supplied starting chunks (e.g. one data and one metadata
    /// chunk).
    pub initial_chunks: Vec<HailstormChunk>,
    /// Picks the `(meta_chunk, data_chunk)` pair for a resource.
    #[expect(clippy::type_complexity, reason = "mirrors the callback shape of the format api")]
    pub select_chunk: Box<
        dyn FnMut(&[u8], WriteDataInfo, &[HailstormChunk], u32, u32) -> ChunkRef + 'cb,
    >,
    /// Proposes a fresh chunk, given the chunk the resource failed to fit
    /// into.
    pub create_chunk:
        Box<dyn FnMut(&[u8], WriteDataInfo, HailstormChunk) -> HailstormChunk + 'cb>,
}

/// The I/O port of [`write_cluster`].
///
/// Implementations usually schedule asynchronous writes and return
/// immediately; slices handed to [`write_header`](Self::write_header) are
/// only valid for the duration of the call, so asynchronous streams copy
/// them. Metadata and resource payloads are referenced by index — the
/// stream owns (or can load) those bytes itself.
pub trait AsyncWriteStream {
    /// Prepares the output for `total_size` bytes (truncate + resize).
    fn open(&mut self, total_size: u64) -> bool;

    /// Issues the header-region write at `offset` (always 0).
    fn write_header(&mut self, bytes: &[u8], offset: u64) -> bool;

    /// Issues the write of metadata blob `meta_index` at `offset`.
    fn write_metadata(&mut self, meta_index: u32, offset: u64) -> bool;

    /// Issues the write of resource `resource_index`'s bytes at `offset`.
    fn write_resource(&mut self, resource_index: u32, offset: u64) -> bool;

    /// Awaits completion of every issued write.
    fn close(&mut self) -> bool;
}

/// Errors of [`write_cluster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// The input tables disagree on the resource count.
    InvalidArguments,
    /// The selector returned a chunk that does not exist or has the wrong
    /// type, and creating a fresh chunk did not resolve it.
    NoValidChunk,
    /// The stream rejected an operation; the package on disk is left
    /// partially written.
    StreamFailed,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::InvalidArguments => "inconsistent write data tables",
            Self::NoValidChunk => "no valid chunk for a resource",
            Self::StreamFailed => "the write stream failed",
        };
        f.write_str(message)
    }
}

impl Error for WriteError {}

struct Layout {
    chunks: Vec<HailstormChunk>,
    /// Bytes used per chunk.
    fills: Vec<u64>,
    resources: Vec<HailstormResource>,
    /// Placement per metadata blob (chunk, offset); blobs shared by several
    /// resources are placed and written once.
    meta_placements: Vec<Option<(u16, u32)>>,
    paths: Vec<u8>,
}

/// Writes a package: layout first, then the streamed write pass.
///
/// # Errors
///
/// See [`WriteError`]; a failed stream leaves a partial file behind.
pub fn write_cluster(
    params: &mut HailstormWriteParams<'_>,
    data: &HailstormWriteData<'_>,
    stream: &mut dyn AsyncWriteStream,
) -> Result<(), WriteError> {
    let layout = compute_layout(params, data)?;

    let header_region_size = HEADER_SIZE
        + layout.chunks.len() * CHUNK_ENTRY_SIZE
        + layout.resources.len() * RESOURCE_ENTRY_SIZE
        + layout.paths.len();
    let header_size = align_up(header_region_size as u64, 8) as u32;

    // Chunk payload file offsets, in chunk index order.
    let mut chunk_offsets = Vec::with_capacity(layout.chunks.len());
    let mut cursor = u64::from(header_size);
    for (index, chunk) in layout.chunks.iter().enumerate() {
        cursor = align_up(cursor, u64::from(chunk.align.max(1)));
        chunk_offsets.push(cursor);
        cursor += layout.fills[index];
    }
    let total_size = cursor;

    // Final chunk table: declared sizes shrink to the used payload.
    let mut chunks = layout.chunks.clone();
    for (chunk, fill) in chunks.iter_mut().zip(&layout.fills) {
        chunk.size = *fill;
    }

    let header = HailstormHeader::new(
        total_size,
        header_size,
        chunks.len() as u32,
        layout.resources.len() as u32,
        data.custom_values,
    );
    let header_bytes =
        serialize_header_region(&header, &chunks, &layout.resources, &layout.paths);

    tracing::debug!(
        resources = layout.resources.len(),
        chunks = chunks.len(),
        total_size,
        "hailstorm layout computed",
    );

    if !stream.open(total_size) {
        return Err(WriteError::StreamFailed);
    }
    if !stream.write_header(&header_bytes, 0) {
        return Err(WriteError::StreamFailed);
    }

    for (meta_index, placement) in layout.meta_placements.iter().enumerate() {
        let Some((chunk, offset)) = placement else {
            continue;
        };
        let at = chunk_offsets[*chunk as usize] + u64::from(*offset);
        if !stream.write_metadata(meta_index as u32, at) {
            return Err(WriteError::StreamFailed);
        }
    }

    for (resource_index, resource) in layout.resources.iter().enumerate() {
        let at = chunk_offsets[resource.data_chunk as usize] + u64::from(resource.data_offset);
        if !stream.write_resource(resource_index as u32, at) {
            return Err(WriteError::StreamFailed);
        }
    }

    if !stream.close() {
        return Err(WriteError::StreamFailed);
    }
    Ok(())
}

fn compute_layout(
    params: &mut HailstormWriteParams<'_>,
    data: &HailstormWriteData<'_>,
) -> Result<Layout, WriteError> {
    let count = data.paths.len();
    if data.data.len() != count
        || data.metadata_mapping.len() != count
        || params.initial_chunks.is_empty()
    {
        return Err(WriteError::InvalidArguments);
    }

    let mut layout = Layout {
        fills: vec![0; params.initial_chunks.len()],
        chunks: params.initial_chunks.clone(),
        resources: Vec::with_capacity(count),
        meta_placements: vec![None; data.metadata.len()],
        paths: Vec::new(),
    };

    for index in 0..count {
        let meta_index = *data
            .metadata_mapping
            .get(index)
            .ok_or(WriteError::InvalidArguments)? as usize;
        let meta = *data
            .metadata
            .get(meta_index)
            .ok_or(WriteError::InvalidArguments)?;
        let info = data.data[index];

        // A few attempts: the initial selection, then again after a fresh
        // chunk was materialized (data and metadata may each need one).
        let mut placed = None;
        for _attempt in 0..3 {
            let selection = (params.select_chunk)(
                meta,
                info,
                &layout.chunks,
                0,
                layout.chunks.len() as u32,
            );
            let meta_chunk = selection.meta_chunk as usize;
            let data_chunk = selection.data_chunk as usize;

            let valid = layout
                .chunks
                .get(meta_chunk)
                .is_some_and(|c| c.kind == CHUNK_TYPE_METADATA)
                && layout
                    .chunks
                    .get(data_chunk)
                    .is_some_and(|c| c.kind == CHUNK_TYPE_DATA);
            if !valid {
                return Err(WriteError::NoValidChunk);
            }

            let data_at = align_up(layout.fills[data_chunk], u64::from(info.align.max(1)));
            if data_at + info.size > layout.chunks[data_chunk].size {
                // Grow the candidate: materialize a fresh chunk proposed by
                // the caller and re-select.
                let mut base = layout.chunks[data_chunk];
                if info.size > base.size {
                    base.size = info.size + u64::from(base.align);
                }
                let fresh = (params.create_chunk)(meta, info, base);
                layout.chunks.push(fresh);
                layout.fills.push(0);
                continue;
            }

            let meta_at = match layout.meta_placements[meta_index] {
                Some((chunk, offset)) => {
                    // The blob is already placed; reuse it regardless of the
                    // chunk selected for this resource.
                    (chunk, offset)
                }
                None => {
                    let at = align_up(layout.fills[meta_chunk], 8);
                    if at + meta.len() as u64 > layout.chunks[meta_chunk].size {
                        let base = layout.chunks[meta_chunk];
                        let fresh = (params.create_chunk)(meta, info, base);
                        layout.chunks.push(fresh);
                        layout.fills.push(0);
                        continue;
                    }
                    layout.fills[meta_chunk] = at + meta.len() as u64;
                    let placement = (selection.meta_chunk, at as u32);
                    layout.meta_placements[meta_index] = Some(placement);
                    placement
                }
            };

            layout.fills[data_chunk] = data_at + info.size;

            let path = data.paths[index];
            let path_offset = layout.paths.len() as u32;
            layout.paths.extend_from_slice(path.as_bytes());

            layout.resources.push(HailstormResource {
                path_offset,
                path_size: path.len() as u32,
                meta_chunk: meta_at.0,
                data_chunk: selection.data_chunk,
                meta_offset: meta_at.1,
                meta_size: meta.len() as u32,
                data_offset: data_at as u32,
                data_size: info.size as u32,
                align: info.align,
            });
            placed = Some(());
            break;
        }

        if placed.is_none() {
            return Err(WriteError::NoValidChunk);
        }
    }

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::parse;

    /// A stream writing straight into a memory image.
    struct MemoryStream<'a> {
        image: Vec<u8>,
        metadata: &'a [&'a [u8]],
        payloads: &'a [Vec<u8>],
    }

    impl AsyncWriteStream for MemoryStream<'_> {
        fn open(&mut self, total_size: u64) -> bool {
            self.image = vec![0; total_size as usize];
            true
        }

        fn write_header(&mut self, bytes: &[u8], offset: u64) -> bool {
            let at = offset as usize;
            self.image[at..at + bytes.len()].copy_from_slice(bytes);
            true
        }

        fn write_metadata(&mut self, meta_index: u32, offset: u64) -> bool {
            let blob = self.metadata[meta_index as usize];
            let at = offset as usize;
            self.image[at..at + blob.len()].copy_from_slice(blob);
            true
        }

        fn write_resource(&mut self, resource_index: u32, offset: u64) -> bool {
            let payload = &self.payloads[resource_index as usize];
            let at = offset as usize;
            self.image[at..at + payload.len()].copy_from_slice(payload);
            true
        }

        fn close(&mut self) -> bool {
            true
        }
    }

    fn default_params() -> HailstormWriteParams<'static> {
        HailstormWriteParams {
            initial_chunks: vec![
                HailstormChunk::new(16 << 20, 8, CHUNK_TYPE_DATA, 3, 42),
                HailstormChunk::new(2 << 20, 8, CHUNK_TYPE_METADATA, 3, 24),
            ],
            select_chunk: Box::new(|_meta, _data, chunks, _start, _count| {
                // Last matching chunk of each type wins.
                let mut selection = ChunkRef {
                    meta_chunk: u16::MAX,
                    data_chunk: u16::MAX,
                };
                for (index, chunk) in chunks.iter().enumerate().rev() {
                    if chunk.kind == CHUNK_TYPE_METADATA && selection.meta_chunk == u16::MAX {
                        selection.meta_chunk = index as u16;
                    } else if chunk.kind == CHUNK_TYPE_DATA && selection.data_chunk == u16::MAX {
                        selection.data_chunk = index as u16;
                    }
                }
                selection
            }),
            create_chunk: Box::new(|_meta, data, mut base| {
                if data.size > base.size {
                    base.size = data.size + u64::from(base.align);
                }
                base
            }),
        }
    }

    fn meta_blob(tag: u8) -> Vec<u8> {
        // Payload content does not matter to the writer.
        vec![tag; 28]
    }

    #[test]
    fn three_files_roundtrip_through_the_package() {
        let payloads: Vec<Vec<u8>> = vec![vec![0xaa; 3], vec![0xbb; 17], vec![0xcc; 4096]];
        let blobs: Vec<Vec<u8>> = (0..3).map(meta_blob).collect();
        let metadata: Vec<&[u8]> = blobs.iter().map(Vec::as_slice).collect();
        let data_infos: Vec<WriteDataInfo> = payloads
            .iter()
            .map(|p| WriteDataInfo {
                size: p.len() as u64,
                align: 8,
            })
            .collect();

        let write_data = HailstormWriteData {
            paths: &["a.bin", "dir/b.bin", "dir/c.bin"],
            data: &data_infos,
            metadata: &metadata,
            metadata_mapping: &[0, 1, 2],
            custom_values: [7, 9],
        };

        let mut stream = MemoryStream {
            image: Vec::new(),
            metadata: &metadata,
            payloads: &payloads,
        };
        write_cluster(&mut default_params(), &write_data, &mut stream).unwrap();

        let pack = parse(&stream.image).unwrap();
        assert_eq!(pack.header.chunk_count, 2);
        assert_eq!(pack.header.resource_count, 3);
        assert_eq!(pack.header.custom_values, [7, 9]);
        assert_eq!(pack.header.total_size, stream.image.len() as u64);

        // All data lands in chunk 0 (type 2), all metadata in chunk 1.
        for resource in &pack.resources {
            assert_eq!(resource.data_chunk, 0);
            assert_eq!(resource.meta_chunk, 1);
        }
        assert_eq!(pack.chunks[0].kind, CHUNK_TYPE_DATA);
        assert_eq!(pack.chunks[1].kind, CHUNK_TYPE_METADATA);

        assert_eq!(pack.resource_path(0), Some("a.bin"));
        assert_eq!(pack.resource_path(2), Some("dir/c.bin"));

        for index in 0..3 {
            let range = pack.resource_data_range(index).unwrap();
            assert_eq!(&stream.image[range], payloads[index as usize].as_slice());
            let meta_range = pack.resource_meta_range(index).unwrap();
            assert_eq!(&stream.image[meta_range], blobs[index as usize].as_slice());
        }
    }

    #[test]
    fn placements_never_overlap_within_a_chunk() {
        let payloads: Vec<Vec<u8>> = (0..32).map(|i| vec![i as u8; (i * 37 + 3) % 513]).collect();
        let blobs: Vec<Vec<u8>> = (0..32).map(|i| meta_blob(i as u8)).collect();
        let metadata: Vec<&[u8]> = blobs.iter().map(Vec::as_slice).collect();
        let paths: Vec<String> = (0..32).map(|i| format!("res/{i}.bin")).collect();
        let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let data_infos: Vec<WriteDataInfo> = payloads
            .iter()
            .map(|p| WriteDataInfo {
                size: p.len() as u64,
                align: 16,
            })
            .collect();
        let mapping: Vec<u32> = (0..32).collect();

        let write_data = HailstormWriteData {
            paths: &path_refs,
            data: &data_infos,
            metadata: &metadata,
            metadata_mapping: &mapping,
            custom_values: [0, 0],
        };

        let mut stream = MemoryStream {
            image: Vec::new(),
            metadata: &metadata,
            payloads: &payloads,
        };
        write_cluster(&mut default_params(), &write_data, &mut stream).unwrap();
        let pack = parse(&stream.image).unwrap();

        let mut regions: Vec<(u16, u64, u64)> = Vec::new();
        for resource in &pack.resources {
            regions.push((
                resource.data_chunk,
                u64::from(resource.data_offset),
                u64::from(resource.data_size),
            ));
            regions.push((
                resource.meta_chunk,
                u64::from(resource.meta_offset),
                u64::from(resource.meta_size),
            ));
        }
        regions.sort_unstable();
        for pair in regions.windows(2) {
            let (chunk_a, off_a, size_a) = pair[0];
            let (chunk_b, off_b, _) = pair[1];
            if chunk_a == chunk_b {
                assert!(
                    off_a + size_a <= off_b,
                    "overlapping placements: {pair:?}",
                );
            }
        }

        // Alignment is honored.
        for resource in &pack.resources {
            assert_eq!(u64::from(resource.data_offset) % 16, 0);
        }
    }

    #[test]
    fn oversized_resources_grow_into_fresh_chunks() {
        // A data chunk too small for the second resource forces the writer
        // to materialize a grown chunk through the create callback.
        let payloads: Vec<Vec<u8>> = vec![vec![1; 64], vec![2; 1024]];
        let blobs: Vec<Vec<u8>> = vec![meta_blob(0)];
        let metadata: Vec<&[u8]> = blobs.iter().map(Vec::as_slice).collect();
        let data_infos: Vec<WriteDataInfo> = payloads
            .iter()
            .map(|p| WriteDataInfo {
                size: p.len() as u64,
                align: 8,
            })
            .collect();

        let mut params = default_params();
        params.initial_chunks[0] = HailstormChunk::new(128, 8, CHUNK_TYPE_DATA, 3, 42);

        let write_data = HailstormWriteData {
            paths: &["small.bin", "large.bin"],
            data: &data_infos,
            metadata: &metadata,
            metadata_mapping: &[0, 0],
            custom_values: [0, 0],
        };

        let mut stream = MemoryStream {
            image: Vec::new(),
            metadata: &metadata,
            payloads: &payloads,
        };
        write_cluster(&mut params, &write_data, &mut stream).unwrap();
        let pack = parse(&stream.image).unwrap();

        assert_eq!(pack.header.chunk_count, 3, "a fresh data chunk appeared");
        assert_eq!(pack.resources[0].data_chunk, 0);
        assert_eq!(pack.resources[1].data_chunk, 2);

        // The shared metadata blob was placed exactly once.
        assert_eq!(
            (pack.resources[0].meta_chunk, pack.resources[0].meta_offset),
            (pack.resources[1].meta_chunk, pack.resources[1].meta_offset),
        );

        let range = pack.resource_data_range(1).unwrap();
        assert_eq!(&stream.image[range], payloads[1].as_slice());
    }
}
