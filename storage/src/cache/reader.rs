// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! C5: the cached seekable reader. Every read is one chunk, block
//! aligned; a hit is served straight off disk, a miss falls through to
//! the remote object (decompressing a frame first if the object is
//! stored compressed) and schedules the cache-write protocol
//! (`cache::lock`) in the background so the caller never waits on it.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use crate::backend::ObjectStore;
use crate::cache::lock::write_cache_file;
use crate::compress::decompress_frame;
use crate::error::{Result, StoreError};
use crate::frame::FrameTable;
use crate::io_ext::ReadAt;

/// A remote source that can also report its total size, layered either
/// directly over an `ObjectStore` object or (once compressed) combined
/// with a [`FrameTable`].
pub trait RemoteSeekable: ReadAt {
    fn size(&self) -> io::Result<u64>;
}

/// Adapts one `ObjectStore` object into a [`RemoteSeekable`]. When the
/// object is framed/compressed, `read_at` here is only ever asked for
/// whole-frame byte ranges by [`CachedReader`]; when it isn't, it's
/// asked for chunk-aligned ranges directly.
pub struct ObjectRemote<'a> {
    store: &'a dyn ObjectStore,
    path: String,
}

impl<'a> ObjectRemote<'a> {
    pub fn new(store: &'a dyn ObjectStore, path: impl Into<String>) -> Self {
        ObjectRemote {
            store,
            path: path.into(),
        }
    }
}

fn to_io_error(e: StoreError) -> io::Error {
    match e {
        StoreError::Codec(inner) => inner,
        other => store_utils::eio!(other.to_string()),
    }
}

impl ReadAt for ObjectRemote<'_> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut reader = self
            .store
            .range_get(&self.path, offset, buf.len() as u64)
            .map_err(to_io_error)?;
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl RemoteSeekable for ObjectRemote<'_> {
    fn size(&self) -> io::Result<u64> {
        self.store.size(&self.path).map_err(to_io_error)
    }
}

/// A seekable, chunk-cached view of a remote object. `frame_table` is
/// `Some` when the remote bytes are compressed frames rather than raw
/// uncompressed content.
pub struct CachedReader<R: RemoteSeekable> {
    remote: R,
    cache_root: PathBuf,
    chunk_size: u32,
    frame_table: Option<FrameTable>,
}

impl<R: RemoteSeekable> CachedReader<R> {
    pub fn new(remote: R, cache_root: impl Into<PathBuf>, chunk_size: u32) -> Self {
        CachedReader {
            remote,
            cache_root: cache_root.into(),
            chunk_size,
            frame_table: None,
        }
    }

    pub fn with_frame_table(mut self, table: FrameTable) -> Self {
        self.frame_table = Some(table);
        self
    }

    fn validate(&self, buf: &[u8], offset: u64) -> Result<()> {
        if buf.is_empty() {
            return Err(StoreError::BufferTooSmall);
        }
        if buf.len() > self.chunk_size as usize {
            return Err(StoreError::BufferTooLarge {
                len: buf.len(),
                chunk_size: self.chunk_size,
            });
        }
        if offset % self.chunk_size as u64 != 0 {
            return Err(StoreError::OffsetUnaligned {
                offset,
                chunk_size: self.chunk_size,
            });
        }
        if (offset % self.chunk_size as u64) + buf.len() as u64 > self.chunk_size as u64 {
            return Err(StoreError::SpansMultipleChunks {
                offset,
                len: buf.len(),
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }

    fn chunk_path(&self, index: u64) -> PathBuf {
        self.cache_root.join(format!("{:012}-{}.bin", index, self.chunk_size))
    }

    /// Read exactly one chunk-aligned block. A cache hit is served
    /// straight off disk; a miss reads through to the remote, schedules
    /// a background cache write, and returns the freshly fetched bytes.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.validate(buf, offset)?;

        let index = offset / self.chunk_size as u64;
        let chunk_path = self.chunk_path(index);

        if let Ok(file) = File::open(&chunk_path) {
            if let Ok(n) = file.read_at(buf, 0) {
                return Ok(n);
            }
        }

        let n = match &self.frame_table {
            None => self.remote.read_at(buf, offset)?,
            Some(table) => self.read_compressed(table, buf, offset)?,
        };

        if n > 0 {
            let data = buf[..n].to_vec();
            std::thread::spawn(move || write_cache_file(&chunk_path, &data));
        }
        Ok(n)
    }

    fn read_compressed(&self, table: &FrameTable, buf: &mut [u8], offset: u64) -> Result<usize> {
        let (u_start, u_size, c_start, c_size) = table.locate(offset, buf.len() as u64)?;

        let mut frame_bytes = vec![0u8; c_size as usize];
        let mut filled = 0usize;
        while filled < frame_bytes.len() {
            let n = self.remote.read_at(&mut frame_bytes[filled..], c_start + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        frame_bytes.truncate(filled);

        let decompressed = decompress_frame(table.compression, &frame_bytes, u_size, self.chunk_size)?;
        let local_offset = (offset - u_start) as usize;
        let n = buf.len().min(decompressed.len().saturating_sub(local_offset));
        buf[..n].copy_from_slice(&decompressed[local_offset..local_offset + n]);
        Ok(n)
    }

    /// Total uncompressed size of the object, served from a cached
    /// `size.txt` when present and persisted to one on a remote lookup.
    pub fn size(&self) -> Result<u64> {
        let size_path = self.cache_root.join("size.txt");
        if let Ok(contents) = std::fs::read_to_string(&size_path) {
            if let Ok(n) = contents.trim().parse::<u64>() {
                return Ok(n);
            }
        }

        let size = match &self.frame_table {
            Some(table) => table.total_uncompressed_size(),
            None => self.remote.size()?,
        };
        let bytes = size.to_string().into_bytes();
        std::thread::spawn(move || write_cache_file(&size_path, &bytes));
        Ok(size)
    }
}
