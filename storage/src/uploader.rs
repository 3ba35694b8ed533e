// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! C3: the part uploader. Coalesces completed frame buffers into parts
//! of at least `target_part_size`, dispatches them to the remote
//! object store under a bounded-concurrency [`TaskGroup`], and finally
//! completes the multipart upload once every part has landed.

use std::sync::Arc;

use crate::backend::{MultipartUpload, ObjectStore};
use crate::encoder::FrameSink;
use crate::error::{Result, StoreError};
use crate::taskgroup::TaskGroup;

#[derive(Clone, Copy, Debug)]
pub struct PartUploaderConfig {
    pub target_part_size: u32,
    /// `None` defers to the driver-recommended concurrency from
    /// `MultipartUpload::max_concurrency`.
    pub max_concurrency: Option<usize>,
}

/// One remote multipart session, from `start` to `complete`/abort.
pub struct UploadSession {
    upload: Arc<dyn MultipartUpload>,
    target_part_size: u32,
    buffered: Vec<Vec<u8>>,
    buffered_bytes: u32,
    next_part_number: u64,
    group: TaskGroup,
}

const DEFAULT_CONCURRENCY: usize = 4;

impl UploadSession {
    pub fn start(store: &dyn ObjectStore, path: &str, cfg: PartUploaderConfig) -> Result<Self> {
        let upload: Arc<dyn MultipartUpload> = Arc::from(store.start_multipart_upload(path)?);
        let driver_cap = upload.max_concurrency();
        let cap = cfg
            .max_concurrency
            .unwrap_or(if driver_cap == 0 || driver_cap == usize::MAX {
                DEFAULT_CONCURRENCY
            } else {
                driver_cap
            });
        Ok(UploadSession {
            upload,
            target_part_size: cfg.target_part_size,
            buffered: Vec::new(),
            buffered_bytes: 0,
            next_part_number: 1,
            group: TaskGroup::new(cap),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.group.is_cancelled()
    }

    fn dispatch_part(&mut self) {
        let frames = std::mem::take(&mut self.buffered);
        self.buffered_bytes = 0;
        let part_number = self.next_part_number;
        self.next_part_number += 1;

        if self.group.is_cancelled() {
            return;
        }

        let upload = self.upload.clone();
        self.group.spawn(move || {
            let data: Vec<u8> = frames.concat();
            upload.upload_part(part_number, &data).map_err(|e| StoreError::UploadFailed {
                part: part_number,
                source: Box::new(e),
            })
        });
    }

    /// spec.md's reference policy always emits at least one part, even
    /// for a zero-byte object whose encoder never publishes a frame.
    /// Call this after the encoder closes if no part was ever
    /// dispatched.
    pub fn ensure_at_least_one_part(&mut self) {
        if self.next_part_number == 1 {
            self.dispatch_part();
        }
    }

    /// Await all outstanding part uploads and, if every one succeeded,
    /// complete the multipart upload. On any failure the session is
    /// abandoned and `CompleteUpload` is never issued.
    pub fn complete(self) -> Result<()> {
        let join_result = self.group.join();
        let result = match join_result {
            Ok(()) => self
                .upload
                .complete()
                .map_err(|e| StoreError::CompleteFailed { source: Box::new(e) }),
            Err(e) => Err(e),
        };
        self.upload.cleanup();
        result
    }
}

impl FrameSink for UploadSession {
    fn handle_frame(&mut self, buffer: Vec<u8>, last: bool) -> Result<()> {
        self.buffered_bytes += buffer.len() as u32;
        self.buffered.push(buffer);
        if self.buffered_bytes >= self.target_part_size || last {
            self.dispatch_part();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::compress::{Algorithm, CompressionConfig};
    use crate::encoder::{EncoderConfig, FrameEncoder};

    #[test]
    fn coalesces_frames_into_parts_and_completes() {
        let backend = MemoryBackend::new();
        let session = UploadSession::start(
            &backend,
            "obj.bin",
            PartUploaderConfig {
                target_part_size: 20,
                max_concurrency: Some(2),
            },
        )
        .unwrap();

        let mut encoder = FrameEncoder::new(
            EncoderConfig {
                compression: CompressionConfig {
                    algorithm: Algorithm::None,
                    level: 0,
                    concurrency: 0,
                },
                chunk_size: 8,
                target_frame_size: 8,
            },
            session,
        )
        .unwrap();

        let data = vec![9u8; 64];
        encoder.write(&data).unwrap();
        let (session, table) = encoder.close().unwrap();
        assert_eq!(table.total_uncompressed_size(), 64);
        session.complete().unwrap();

        assert_eq!(backend.size("obj.bin").unwrap(), 64);
    }

    #[test]
    fn zero_byte_object_still_emits_one_part() {
        let backend = MemoryBackend::new();
        let mut session = UploadSession::start(
            &backend,
            "empty.bin",
            PartUploaderConfig {
                target_part_size: 1024,
                max_concurrency: Some(1),
            },
        )
        .unwrap();
        session.ensure_at_least_one_part();
        session.complete().unwrap();
        assert_eq!(backend.size("empty.bin").unwrap(), 0);
    }

    struct FailingStore;

    impl ObjectStore for FailingStore {
        fn put(&self, _: &str, _: &mut dyn std::io::Read) -> Result<()> {
            unimplemented!()
        }
        fn range_get(&self, _: &str, _: u64, _: u64) -> Result<Box<dyn std::io::Read + Send>> {
            unimplemented!()
        }
        fn size(&self, _: &str) -> Result<u64> {
            unimplemented!()
        }
        fn delete_with_prefix(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        fn start_multipart_upload(&self, _: &str) -> Result<Box<dyn MultipartUpload>> {
            Ok(Box::new(AlwaysFailsUpload))
        }
    }

    struct AlwaysFailsUpload;
    impl MultipartUpload for AlwaysFailsUpload {
        fn max_concurrency(&self) -> usize {
            2
        }
        fn upload_part(&self, part_number: u64, _: &[u8]) -> Result<()> {
            Err(StoreError::UploadFailed {
                part: part_number,
                source: Box::new(StoreError::OutOfRange),
            })
        }
        fn complete(&self) -> Result<()> {
            panic!("complete must never be called after a part failure");
        }
        fn cleanup(&self) {}
    }

    #[test]
    fn a_failed_part_aborts_the_session_without_completing() {
        let store = FailingStore;
        let mut session = UploadSession::start(
            &store,
            "obj.bin",
            PartUploaderConfig {
                target_part_size: 1,
                max_concurrency: Some(2),
            },
        )
        .unwrap();
        session.handle_frame(vec![1, 2, 3], true).unwrap();
        let err = session.complete().unwrap_err();
        assert!(matches!(err, StoreError::UploadFailed { .. }));
    }
}
