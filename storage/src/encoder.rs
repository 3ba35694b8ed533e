// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! C2: the streaming frame encoder. Partitions the input into
//! `chunk_size`-aligned chunks, groups whole chunks into frames once a
//! frame's compressed size reaches `target_frame_size`, and publishes
//! each completed frame to a [`FrameSink`].

use crate::compress::{self, CompressionConfig, FrameCompressor};
use crate::error::{Result, StoreError};
use crate::frame::FrameTable;

/// Receives completed, compressed frame buffers as the encoder produces
/// them. `last` is true only for the final frame of the object.
pub trait FrameSink {
    fn handle_frame(&mut self, buffer: Vec<u8>, last: bool) -> Result<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct EncoderConfig {
    pub compression: CompressionConfig,
    pub chunk_size: u32,
    pub target_frame_size: u32,
}

pub struct FrameEncoder<S: FrameSink> {
    config: EncoderConfig,
    sink: S,
    table: FrameTable,
    compressor: Option<Box<dyn FrameCompressor>>,
    bytes_in_chunk: u32,
    frame_uncompressed_size: u32,
    poisoned: bool,
    closed: bool,
}

impl<S: FrameSink> FrameEncoder<S> {
    pub fn new(config: EncoderConfig, sink: S) -> Result<Self> {
        let compressor = compress::new_compressor(config.compression)?;
        Ok(FrameEncoder {
            table: FrameTable::new(config.compression.algorithm),
            config,
            sink,
            compressor: Some(compressor),
            bytes_in_chunk: 0,
            frame_uncompressed_size: 0,
            poisoned: false,
            closed: false,
        })
    }

    /// Write bytes into the current frame, closing frames along the way
    /// as chunk and target-size boundaries are crossed.
    pub fn write(&mut self, mut data: &[u8]) -> Result<usize> {
        if self.poisoned {
            return Err(StoreError::EncoderPoisoned);
        }

        let mut written = 0usize;
        while !data.is_empty() {
            let remaining_in_chunk = (self.config.chunk_size - self.bytes_in_chunk) as usize;
            let take = remaining_in_chunk.min(data.len());
            let (slice, rest) = data.split_at(take);

            if let Err(e) = self.compressor.as_mut().unwrap().write(slice) {
                self.poisoned = true;
                return Err(e.into());
            }

            written += take;
            self.bytes_in_chunk += take as u32;
            self.frame_uncompressed_size += take as u32;
            data = rest;

            if self.bytes_in_chunk == self.config.chunk_size {
                self.bytes_in_chunk = 0;
                if let Err(e) = self.compressor.as_mut().unwrap().end_chunk() {
                    self.poisoned = true;
                    return Err(e.into());
                }
                if self.compressor.as_ref().unwrap().len() as u32 >= self.config.target_frame_size {
                    self.close_frame(false)?;
                }
            }
        }
        Ok(written)
    }

    fn close_frame(&mut self, last: bool) -> Result<()> {
        // Flush any partial last chunk so its bytes are committed.
        if self.bytes_in_chunk > 0 {
            if let Err(e) = self.compressor.as_mut().unwrap().end_chunk() {
                self.poisoned = true;
                return Err(e.into());
            }
            self.bytes_in_chunk = 0;
        }

        if self.frame_uncompressed_size == 0 {
            // Nothing was written into this frame; don't publish an
            // empty frame (spec.md §4.2 step 5).
            if last {
                self.closed = true;
            }
            return Ok(());
        }

        let finished = self.compressor.take().unwrap();
        let buffer = match finished.finish() {
            Ok(b) => b,
            Err(e) => {
                self.poisoned = true;
                return Err(e.into());
            }
        };

        self.table.push(self.frame_uncompressed_size, buffer.len() as u32);
        self.sink.handle_frame(buffer, last)?;

        self.frame_uncompressed_size = 0;
        if !last {
            self.compressor = Some(compress::new_compressor(self.config.compression)?);
        }
        if last {
            self.closed = true;
        }
        Ok(())
    }

    /// No more data. Closes the current frame (marking it `last`) and
    /// returns the frozen frame table, along with the sink so the
    /// caller can finish whatever session it represents (e.g.
    /// [`crate::uploader::UploadSession::complete`]).
    pub fn close(mut self) -> Result<(S, FrameTable)> {
        if !self.closed {
            self.close_frame(true)?;
        }
        Ok((self.sink, self.table))
    }
}
