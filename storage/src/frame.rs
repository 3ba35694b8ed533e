// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! C1: the frame table. A compact, append-only mapping from
//! uncompressed offset/length to compressed offset/length, frozen once
//! the producing [`crate::encoder::FrameEncoder`] is closed.

use serde::{Deserialize, Serialize};

use crate::compress::Algorithm;
use crate::error::{Result, StoreError};

/// One frame's uncompressed (`U`) and compressed (`C`) byte lengths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub uncompressed_size: u32,
    pub compressed_size: u32,
}

/// Where the first frame begins within its containing object, allowing
/// a framed region to be embedded inside a larger file. Always `{0, 0}`
/// in this implementation; see SPEC_FULL.md §12.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAt {
    pub uncompressed: u64,
    pub compressed: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameTable {
    pub compression: Algorithm,
    pub start_at: StartAt,
    frames: Vec<FrameInfo>,
}

impl FrameTable {
    pub fn new(compression: Algorithm) -> Self {
        FrameTable {
            compression,
            start_at: StartAt::default(),
            frames: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, uncompressed_size: u32, compressed_size: u32) {
        self.frames.push(FrameInfo {
            uncompressed_size,
            compressed_size,
        });
    }

    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn total_uncompressed_size(&self) -> u64 {
        self.frames.iter().map(|f| f.uncompressed_size as u64).sum()
    }

    pub fn total_compressed_size(&self) -> u64 {
        self.frames.iter().map(|f| f.compressed_size as u64).sum()
    }

    /// Given an uncompressed `{start, length}`, return the compressed
    /// `(offset, size)` of the single frame that fully contains it.
    pub fn frame_for(&self, start: u64, length: u64) -> Result<(u64, u32)> {
        let (_, _, c_start, c_size) = self.locate(start, length)?;
        Ok((c_start, c_size))
    }

    /// Like [`Self::frame_for`], but also returns the frame's
    /// uncompressed bounds `(u_start, u_size)`, needed to find `start`'s
    /// byte offset within the decompressed frame.
    pub fn locate(&self, start: u64, length: u64) -> Result<(u64, u32, u64, u32)> {
        let total = self.total_uncompressed_size();
        if start >= total {
            return Err(StoreError::OutOfRange);
        }

        let mut cum_u = self.start_at.uncompressed;
        let mut cum_c = self.start_at.compressed;
        for frame in &self.frames {
            let frame_end = cum_u + frame.uncompressed_size as u64;
            if start >= cum_u && start < frame_end {
                if start + length > frame_end {
                    return Err(StoreError::RangeSpansFrames);
                }
                return Ok((cum_u, frame.uncompressed_size, cum_c, frame.compressed_size));
            }
            cum_u = frame_end;
            cum_c += frame.compressed_size as u64;
        }
        Err(StoreError::OutOfRange)
    }

    /// Invoke `f(offset, frame_size)` for every frame overlapping
    /// `[start, start + length)`, in order. `f` returning an error
    /// aborts iteration and that error is returned.
    pub fn range<F>(&self, start: u64, length: u64, mut f: F) -> Result<()>
    where
        F: FnMut(u64, u32) -> Result<()>,
    {
        let end = start + length;
        let mut cum_u = self.start_at.uncompressed;
        let mut cum_c = self.start_at.compressed;
        for frame in &self.frames {
            let frame_end = cum_u + frame.uncompressed_size as u64;
            if frame_end > start && cum_u < end {
                f(cum_c, frame.compressed_size)?;
            }
            cum_u = frame_end;
            cum_c += frame.compressed_size as u64;
        }
        Ok(())
    }
}
