// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! A local-filesystem object store. Not a production driver — spec.md
//! §1 explicitly keeps real drivers out of scope — but a concrete
//! stand-in the testable properties in spec.md §8 can run against,
//! mirroring nydus-rs's own `backend-localfs` Cargo feature.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::backend::{MultipartUpload, ObjectStore};
use crate::error::{Result, StoreError};

pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFsBackend { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl ObjectStore for LocalFsBackend {
    fn put(&self, path: &str, reader: &mut dyn Read) -> Result<()> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&full)?;
        std::io::copy(reader, &mut file)?;
        Ok(())
    }

    fn range_get(&self, path: &str, offset: u64, length: u64) -> Result<Box<dyn Read + Send>> {
        let full = self.full_path(path);
        let mut file = File::open(&full).map_err(|_| StoreError::ObjectNotExist(path.to_string()))?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(Box::new(file.take(length)))
    }

    fn size(&self, path: &str) -> Result<u64> {
        let full = self.full_path(path);
        let meta = fs::metadata(&full).map_err(|_| StoreError::ObjectNotExist(path.to_string()))?;
        Ok(meta.len())
    }

    fn delete_with_prefix(&self, prefix: &str) -> Result<()> {
        let full = self.full_path(prefix);
        if full.is_dir() {
            fs::remove_dir_all(&full)?;
            return Ok(());
        }
        if let Some(parent) = full.parent() {
            if parent.is_dir() {
                for entry in fs::read_dir(parent)? {
                    let entry = entry?;
                    if entry.path().starts_with(&full) {
                        fs::remove_file(entry.path())?;
                    }
                }
            }
        }
        Ok(())
    }

    fn start_multipart_upload(&self, path: &str) -> Result<Box<dyn MultipartUpload>> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(LocalMultipart {
            dest: full,
            parts: Mutex::new(HashMap::new()),
        }))
    }
}

struct LocalMultipart {
    dest: PathBuf,
    parts: Mutex<HashMap<u64, Vec<u8>>>,
}

impl MultipartUpload for LocalMultipart {
    fn max_concurrency(&self) -> usize {
        // A driver-recommended cap; the local stand-in imposes none of
        // its own and lets the caller's configured cap win.
        usize::MAX
    }

    fn upload_part(&self, part_number: u64, data: &[u8]) -> Result<()> {
        self.parts.lock().unwrap().insert(part_number, data.to_vec());
        Ok(())
    }

    fn complete(&self) -> Result<()> {
        let parts = self.parts.lock().unwrap();
        let mut numbers: Vec<&u64> = parts.keys().collect();
        numbers.sort();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.dest)?;
        for n in numbers {
            file.write_all(&parts[n])?;
        }
        Ok(())
    }

    fn cleanup(&self) {
        self.parts.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn put_then_range_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(dir.path());
        backend.put("obj.bin", &mut Cursor::new(b"hello world".to_vec())).unwrap();
        assert_eq!(backend.size("obj.bin").unwrap(), 11);

        let mut reader = backend.range_get("obj.bin", 6, 5).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"world");
    }

    #[test]
    fn missing_object_is_object_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(dir.path());
        assert!(matches!(backend.size("nope"), Err(StoreError::ObjectNotExist(_))));
    }

    #[test]
    fn multipart_assembles_parts_in_number_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(dir.path());
        let upload = backend.start_multipart_upload("obj.bin").unwrap();
        upload.upload_part(2, b"world").unwrap();
        upload.upload_part(1, b"hello ").unwrap();
        upload.complete().unwrap();
        upload.cleanup();

        let mut reader = backend.range_get("obj.bin", 0, 11).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello world");
    }
}
