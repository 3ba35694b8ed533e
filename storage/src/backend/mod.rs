// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! The object-store capability set the core consumes (spec.md §6). The
//! driver itself — AWS, GCP, or a local filesystem — is out of scope;
//! this module only defines the traits, plus two small test doubles
//! (`localfs`, `memory`) that stand in for a real driver the way
//! nydus-rs's own `backend-localfs` feature stands in for a real RAFS
//! blob backend.

use std::io::Read;

use crate::error::Result;

#[cfg(feature = "backend-localfs")]
pub mod localfs;

#[cfg(feature = "backend-memory")]
pub mod memory;

/// Atomic single-shot upload, HTTP-range-style read, size lookup, and
/// multipart session bootstrap.
pub trait ObjectStore: Send + Sync {
    fn put(&self, path: &str, reader: &mut dyn Read) -> Result<()>;

    fn range_get(&self, path: &str, offset: u64, length: u64) -> Result<Box<dyn Read + Send>>;

    fn size(&self, path: &str) -> Result<u64>;

    fn delete_with_prefix(&self, prefix: &str) -> Result<()>;

    /// Begin a remote multipart session. The driver-recommended
    /// concurrency cap is exposed via `MultipartUpload::max_concurrency`.
    fn start_multipart_upload(&self, path: &str) -> Result<Box<dyn MultipartUpload>>;
}

/// One remote multipart session. `cleanup` must be invoked on every
/// exit path (success, failure, or cancellation) to release whatever
/// per-session resources the driver holds; callers do this through
/// [`crate::uploader::UploadSession`], never directly.
pub trait MultipartUpload: Send + Sync {
    fn max_concurrency(&self) -> usize;

    /// Transmit one part, which is the byte-wise concatenation of the
    /// frames the caller already coalesced.
    fn upload_part(&self, part_number: u64, data: &[u8]) -> Result<()>;

    /// Finalize the upload; the object becomes visible at its path.
    fn complete(&self) -> Result<()>;

    /// Release per-session resources. Idempotent.
    fn cleanup(&self);
}
