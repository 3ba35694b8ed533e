// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Error kinds surfaced at the crate boundary (spec.md §6).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object does not exist: {0}")]
    ObjectNotExist(String),

    #[error("read buffer is empty")]
    BufferTooSmall,

    #[error("read buffer ({len}) is larger than the chunk size ({chunk_size})")]
    BufferTooLarge { len: usize, chunk_size: u32 },

    #[error("offset {offset} is not aligned to chunk size {chunk_size}")]
    OffsetUnaligned { offset: u64, chunk_size: u32 },

    #[error("read of length {len} at offset {offset} spans multiple chunks of size {chunk_size}")]
    SpansMultipleChunks { offset: u64, len: usize, chunk_size: u32 },

    #[error("unsupported compression type: {0:?}")]
    UnsupportedCompression(crate::compress::Algorithm),

    #[error("requested range spans more than one frame")]
    RangeSpansFrames,

    #[error("requested range is past the end of the object")]
    OutOfRange,

    #[error("uploading part {part} failed: {source}")]
    UploadFailed {
        part: u64,
        #[source]
        source: Box<StoreError>,
    },

    #[error("completing the multipart upload failed: {source}")]
    CompleteFailed {
        #[source]
        source: Box<StoreError>,
    },

    #[error("the frame encoder has been poisoned by a previous error")]
    EncoderPoisoned,

    #[error(transparent)]
    Codec(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
