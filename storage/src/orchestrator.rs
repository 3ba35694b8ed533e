// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! C4: the upload orchestrator. Glues the frame encoder to the part
//! uploader and decides, per spec.md §4.4's decision table, between a
//! framed compressed upload, a parallel range-read multipart put, or a
//! plain single-shot put.

use std::io::Read;

use crate::backend::ObjectStore;
use crate::compress::{Algorithm, CompressionConfig};
use crate::encoder::{EncoderConfig, FrameEncoder};
use crate::error::Result;
use crate::frame::FrameTable;
use crate::io_ext::ReadAt;
use crate::taskgroup::TaskGroup;
use crate::uploader::{PartUploaderConfig, UploadSession};

#[derive(Clone, Copy, Debug)]
pub struct StoreOptions {
    pub compression: CompressionConfig,
    pub chunk_size: u32,
    pub target_frame_size: u32,
    pub target_part_size: u32,
    pub max_concurrency: Option<usize>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            compression: CompressionConfig::default(),
            chunk_size: 2 * 1024 * 1024,
            target_frame_size: 4 * 1024 * 1024,
            target_part_size: 50 * 1024 * 1024,
            max_concurrency: None,
        }
    }
}

/// `Store`'s return value: `Some(table)` only when framed compression
/// ran; the other two upload strategies return `None` (spec.md §4.4).
pub type StoreOutcome = Option<FrameTable>;

/// Upload a streaming reader. Chooses between C2+C3 (when compression
/// is requested), parallel range-read multipart (when the input
/// supports positional reads and is large enough), or a single-shot
/// `Put`.
pub fn store(
    store: &dyn ObjectStore,
    path: &str,
    reader: &mut dyn Read,
    size: Option<u64>,
    opts: StoreOptions,
) -> Result<StoreOutcome> {
    if opts.compression.algorithm != Algorithm::None {
        return store_framed(store, path, reader, opts).map(Some);
    }

    // A streaming-only `&mut dyn Read` cannot service positional reads,
    // so the parallel range-read path (spec.md §4.4.1) never applies
    // here regardless of `size` — callers wanting it call
    // `store_random_access` directly with a `ReadAt` source.
    let _ = size;
    store.put(path, reader)?;
    Ok(None)
}

fn store_framed(
    store: &dyn ObjectStore,
    path: &str,
    reader: &mut dyn Read,
    opts: StoreOptions,
) -> Result<FrameTable> {
    let session = UploadSession::start(
        store,
        path,
        PartUploaderConfig {
            target_part_size: opts.target_part_size,
            max_concurrency: opts.max_concurrency,
        },
    )?;

    let mut encoder = FrameEncoder::new(
        EncoderConfig {
            compression: opts.compression,
            chunk_size: opts.chunk_size,
            target_frame_size: opts.target_frame_size,
        },
        session,
    )?;

    let mut buf = vec![0u8; opts.chunk_size.max(4096) as usize];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        encoder.write(&buf[..n])?;
    }

    let (mut session, table) = encoder.close()?;
    session.ensure_at_least_one_part();
    session.complete()?;
    Ok(table)
}

/// §4.4.1: parallel range-read multipart put for a random-access,
/// uncompressed input larger than one part.
pub fn store_random_access(
    store: &dyn ObjectStore,
    path: &str,
    input: &dyn ReadAt,
    size: u64,
    opts: StoreOptions,
) -> Result<StoreOutcome> {
    let part_size = opts.target_part_size as u64;
    let num_parts = if size == 0 { 1 } else { (size + part_size - 1) / part_size };

    let upload = store.start_multipart_upload(path)?;
    let driver_cap = upload.max_concurrency();
    let cap = opts.max_concurrency.unwrap_or(if driver_cap == 0 || driver_cap == usize::MAX {
        4
    } else {
        driver_cap
    });
    let group = TaskGroup::new(cap);
    let upload = std::sync::Arc::from(upload);

    // Reads happen sequentially on the dispatcher to avoid duplicating
    // an open file handle's internal cursor state; only the uploads run
    // concurrently (spec.md §4.4.1).
    for part_number in 1..=num_parts {
        let offset = (part_number - 1) * part_size;
        let len = if size == 0 {
            0
        } else {
            part_size.min(size - offset)
        };
        let mut part_buf = vec![0u8; len as usize];
        let mut filled = 0usize;
        while filled < part_buf.len() {
            let n = input.read_at(&mut part_buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        part_buf.truncate(filled);

        if group.is_cancelled() {
            break;
        }
        let upload: std::sync::Arc<dyn crate::backend::MultipartUpload> = upload.clone();
        group.spawn(move || {
            upload
                .upload_part(part_number, &part_buf)
                .map_err(|e| crate::error::StoreError::UploadFailed {
                    part: part_number,
                    source: Box::new(e),
                })
        });
    }

    let join_result = group.join();
    let result = match join_result {
        Ok(()) => upload
            .complete()
            .map_err(|e| crate::error::StoreError::CompleteFailed { source: Box::new(e) }),
        Err(e) => Err(e),
    };
    upload.cleanup();
    result.map(|_| None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use std::io::Cursor;

    #[test]
    fn no_compression_small_input_uses_single_shot_put() {
        let backend = MemoryBackend::new();
        let mut reader = Cursor::new(b"hello world".to_vec());
        let outcome = store(&backend, "o", &mut reader, Some(11), StoreOptions::default()).unwrap();
        assert!(outcome.is_none());
        assert_eq!(backend.size("o").unwrap(), 11);
    }

    #[test]
    #[cfg(feature = "compress-zstd")]
    fn compression_requested_returns_frame_table() {
        let backend = MemoryBackend::new();
        let mut reader = Cursor::new(vec![1u8; 10_000]);
        let opts = StoreOptions {
            compression: CompressionConfig {
                algorithm: Algorithm::Zstd,
                level: 1,
                concurrency: 0,
            },
            chunk_size: 1024,
            target_frame_size: 2048,
            target_part_size: 4096,
            max_concurrency: Some(2),
        };
        let table = store(&backend, "o", &mut reader, Some(10_000), opts).unwrap().unwrap();
        assert_eq!(table.total_uncompressed_size(), 10_000);
        assert!(backend.size("o").unwrap() > 0);
    }

    struct SliceReadAt(Vec<u8>);
    impl ReadAt for SliceReadAt {
        fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
            let offset = offset as usize;
            if offset >= self.0.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.0.len() - offset);
            buf[..n].copy_from_slice(&self.0[offset..offset + n]);
            Ok(n)
        }
    }

    #[test]
    fn parallel_range_read_multipart_reassembles_correctly() {
        let backend = MemoryBackend::new();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 256) as u8).collect();
        let input = SliceReadAt(data.clone());
        let opts = StoreOptions {
            target_part_size: 64 * 1024,
            max_concurrency: Some(4),
            ..StoreOptions::default()
        };
        let outcome = store_random_access(&backend, "o", &input, data.len() as u64, opts).unwrap();
        assert!(outcome.is_none());

        let mut reader = backend.range_get("o", 0, data.len() as u64).unwrap();
        let mut got = Vec::new();
        reader.read_to_end(&mut got).unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn zero_byte_random_access_emits_one_part() {
        let backend = MemoryBackend::new();
        let input = SliceReadAt(Vec::new());
        let outcome = store_random_access(&backend, "o", &input, 0, StoreOptions::default()).unwrap();
        assert!(outcome.is_none());
        assert_eq!(backend.size("o").unwrap(), 0);
    }
}
