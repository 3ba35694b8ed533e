// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Per-frame compressors (C2 support). A frame's compressed buffer is
//! shared between the encoder's thread and the codec's own worker
//! threads (zstd with `CompressionConcurrency > 0`), so all access to
//! it goes through the guarded operations on [`SharedBuf`], matching
//! the mutable-buffer discipline spec.md §5 requires.

use std::io::{self, Write};
#[cfg(feature = "compress-lz4")]
use std::os::raw::c_int;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Compression type tag carried on the frame table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    None,
    Zstd,
    Lz4,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::None
    }
}

/// Codec knobs, passed through to the underlying library unchanged.
#[derive(Clone, Copy, Debug)]
pub struct CompressionConfig {
    pub algorithm: Algorithm,
    pub level: i32,
    /// 0 = codec default, N>0 = that many internal worker threads.
    pub concurrency: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            algorithm: Algorithm::None,
            level: 0,
            concurrency: 0,
        }
    }
}

/// A `Vec<u8>` guarded by a mutex so codec worker threads and the
/// encoder's own thread can both append/read it safely.
#[derive(Clone)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn new() -> Self {
        SharedBuf(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    /// Detach the accumulated bytes, leaving an empty buffer behind.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One frame's worth of compressor state. A fresh instance is created
/// after every `end_frame`; see `FrameEncoder::close_frame`.
pub trait FrameCompressor: Send {
    /// Feed raw bytes belonging to the current (still-open) chunk.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    /// The current chunk is complete: flush whatever is needed so that
    /// `len()` reflects committed output.
    fn end_chunk(&mut self) -> io::Result<()>;
    /// Bytes committed to the frame's compressed buffer so far.
    fn len(&self) -> usize;
    /// Finalize the frame, returning its compressed bytes.
    fn finish(self: Box<Self>) -> io::Result<Vec<u8>>;
}

/// Build a compressor for `cfg.algorithm`. Fails with
/// `UnsupportedCompression` when the requested algorithm's codec was not
/// compiled into this build (its `compress-zstd`/`compress-lz4` feature
/// is disabled), mirroring spec.md §6's boundary error kind.
pub fn new_compressor(cfg: CompressionConfig) -> Result<Box<dyn FrameCompressor>, StoreError> {
    match cfg.algorithm {
        Algorithm::None => Ok(Box::new(NoneCompressor {
            buf: SharedBuf::new(),
        })),
        Algorithm::Zstd => {
            #[cfg(feature = "compress-zstd")]
            {
                Ok(Box::new(ZstdCompressor::new(cfg)))
            }
            #[cfg(not(feature = "compress-zstd"))]
            {
                Err(StoreError::UnsupportedCompression(Algorithm::Zstd))
            }
        }
        Algorithm::Lz4 => {
            #[cfg(feature = "compress-lz4")]
            {
                Ok(Box::new(Lz4Compressor::new(cfg)))
            }
            #[cfg(not(feature = "compress-lz4"))]
            {
                Err(StoreError::UnsupportedCompression(Algorithm::Lz4))
            }
        }
    }
}

struct NoneCompressor {
    buf: SharedBuf,
}

impl FrameCompressor for NoneCompressor {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.buf.write_all(data)
    }

    fn end_chunk(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn finish(self: Box<Self>) -> io::Result<Vec<u8>> {
        Ok(self.buf.take())
    }
}

#[cfg(feature = "compress-zstd")]
struct ZstdCompressor {
    inner: Option<zstd::stream::write::Encoder<'static, SharedBuf>>,
    buf: SharedBuf,
}

#[cfg(feature = "compress-zstd")]
impl ZstdCompressor {
    fn new(cfg: CompressionConfig) -> Self {
        let buf = SharedBuf::new();
        let mut encoder =
            zstd::stream::write::Encoder::new(buf.clone(), cfg.level).expect("zstd encoder init");
        if cfg.concurrency > 0 {
            // Best-effort: only takes effect when the zstd crate was built
            // with multithreading support.
            let _ = encoder.multithread(cfg.concurrency);
        }
        ZstdCompressor {
            inner: Some(encoder),
            buf,
        }
    }
}

#[cfg(feature = "compress-zstd")]
impl FrameCompressor for ZstdCompressor {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.as_mut().unwrap().write_all(data)
    }

    fn end_chunk(&mut self) -> io::Result<()> {
        self.inner.as_mut().unwrap().flush()
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn finish(mut self: Box<Self>) -> io::Result<Vec<u8>> {
        self.inner.take().unwrap().finish()?;
        Ok(self.buf.take())
    }
}

/// LZ4 frames are not the canonical `.lz4` container format; each frame
/// is this crate's own sequence of `(u32 length, compressed block)`
/// records, one per uncompressed chunk, which is all the self-contained
/// decodability spec.md requires.
#[cfg(feature = "compress-lz4")]
struct Lz4Compressor {
    level: i32,
    raw: Vec<u8>,
    buf: SharedBuf,
}

#[cfg(feature = "compress-lz4")]
impl Lz4Compressor {
    fn new(cfg: CompressionConfig) -> Self {
        Lz4Compressor {
            level: cfg.level,
            raw: Vec::new(),
            buf: SharedBuf::new(),
        }
    }
}

#[cfg(feature = "compress-lz4")]
impl FrameCompressor for Lz4Compressor {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.raw.extend_from_slice(data);
        Ok(())
    }

    fn end_chunk(&mut self) -> io::Result<()> {
        if self.raw.is_empty() {
            return Ok(());
        }
        let compressed = lz4_compress_block(self.level, &self.raw)?;
        self.buf.write_all(&(compressed.len() as u32).to_le_bytes())?;
        self.buf.write_all(&compressed)?;
        self.raw.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn finish(mut self: Box<Self>) -> io::Result<Vec<u8>> {
        self.end_chunk()?;
        Ok(self.buf.take())
    }
}

#[cfg(feature = "compress-lz4")]
fn lz4_compress_block(level: i32, src: &[u8]) -> io::Result<Vec<u8>> {
    unsafe {
        let bound = lz4_sys::LZ4_compressBound(src.len() as c_int);
        if bound <= 0 {
            return Err(store_utils::einval!("lz4: input too large"));
        }
        let mut dst = vec![0u8; bound as usize];
        let acceleration = if level > 0 { level } else { 1 };
        let written = lz4_sys::LZ4_compress_fast(
            src.as_ptr() as *const std::os::raw::c_char,
            dst.as_mut_ptr() as *mut std::os::raw::c_char,
            src.len() as c_int,
            dst.len() as c_int,
            acceleration,
        );
        if written <= 0 && !src.is_empty() {
            return Err(store_utils::eio!("lz4 compression failed"));
        }
        dst.truncate(written as usize);
        Ok(dst)
    }
}

#[cfg(feature = "compress-lz4")]
fn lz4_decompress_block(src: &[u8], expected_len: usize) -> io::Result<Vec<u8>> {
    if expected_len == 0 {
        return Ok(Vec::new());
    }
    unsafe {
        let mut dst = vec![0u8; expected_len];
        let written = lz4_sys::LZ4_decompress_safe(
            src.as_ptr() as *const std::os::raw::c_char,
            dst.as_mut_ptr() as *mut std::os::raw::c_char,
            src.len() as c_int,
            dst.len() as c_int,
        );
        if written < 0 || written as usize != expected_len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"));
        }
        Ok(dst)
    }
}

/// Decompress one complete frame buffer produced by [`new_compressor`].
/// `chunk_size` is needed to split an LZ4 frame back into its per-chunk
/// blocks; `uncompressed_len` is the frame's `U` from the frame table.
pub fn decompress_frame(
    algorithm: Algorithm,
    compressed: &[u8],
    uncompressed_len: u32,
    chunk_size: u32,
) -> Result<Vec<u8>, StoreError> {
    match algorithm {
        Algorithm::None => Ok(compressed.to_vec()),
        Algorithm::Zstd => {
            #[cfg(feature = "compress-zstd")]
            {
                let mut out = Vec::with_capacity(uncompressed_len as usize);
                zstd::stream::copy_decode(compressed, &mut out).map_err(StoreError::Codec)?;
                Ok(out)
            }
            #[cfg(not(feature = "compress-zstd"))]
            {
                Err(StoreError::UnsupportedCompression(Algorithm::Zstd))
            }
        }
        Algorithm::Lz4 => {
            #[cfg(feature = "compress-lz4")]
            {
                let mut out = Vec::with_capacity(uncompressed_len as usize);
                let mut remaining = uncompressed_len as usize;
                let mut cursor = 0usize;
                while remaining > 0 {
                    if cursor + 4 > compressed.len() {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated lz4 frame").into());
                    }
                    let block_len =
                        u32::from_le_bytes(compressed[cursor..cursor + 4].try_into().unwrap()) as usize;
                    cursor += 4;
                    if cursor + block_len > compressed.len() {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated lz4 block").into());
                    }
                    let chunk_out_len = remaining.min(chunk_size as usize);
                    let block = lz4_decompress_block(&compressed[cursor..cursor + block_len], chunk_out_len)?;
                    out.extend_from_slice(&block);
                    cursor += block_len;
                    remaining -= chunk_out_len;
                }
                Ok(out)
            }
            #[cfg(not(feature = "compress-lz4"))]
            {
                Err(StoreError::UnsupportedCompression(Algorithm::Lz4))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(algorithm: Algorithm, chunk_size: u32, data: &[u8]) {
        let cfg = CompressionConfig {
            algorithm,
            level: 1,
            concurrency: 0,
        };
        let mut compressor = new_compressor(cfg).unwrap();
        for chunk in data.chunks(chunk_size as usize) {
            compressor.write(chunk).unwrap();
            compressor.end_chunk().unwrap();
        }
        let compressed = compressor.finish().unwrap();
        let out = decompress_frame(algorithm, &compressed, data.len() as u32, chunk_size).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn none_roundtrips() {
        roundtrip(Algorithm::None, 64, b"hello hello hello world world world");
    }

    #[test]
    #[cfg(feature = "compress-zstd")]
    fn zstd_roundtrips() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        roundtrip(Algorithm::Zstd, 1024, &data);
    }

    #[test]
    #[cfg(feature = "compress-lz4")]
    fn lz4_roundtrips() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 17) as u8).collect();
        roundtrip(Algorithm::Lz4, 1024, &data);
    }

    #[test]
    #[cfg(feature = "compress-lz4")]
    fn lz4_roundtrips_uneven_chunks() {
        let data = b"a short message that does not divide evenly".to_vec();
        roundtrip(Algorithm::Lz4, 7, &data);
    }

    #[test]
    #[cfg(not(feature = "compress-zstd"))]
    fn zstd_without_feature_is_unsupported() {
        let cfg = CompressionConfig { algorithm: Algorithm::Zstd, level: 1, concurrency: 0 };
        assert!(matches!(new_compressor(cfg), Err(StoreError::UnsupportedCompression(Algorithm::Zstd))));
    }
}
