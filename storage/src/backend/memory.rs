// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! An in-process object store backed by a `HashMap`, for fast unit
//! tests of the encoder/uploader pipeline that don't need real file
//! I/O.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

use crate::backend::{MultipartUpload, ObjectStore};
use crate::error::{Result, StoreError};

#[derive(Default)]
pub struct MemoryBackend {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }
}

impl ObjectStore for MemoryBackend {
    fn put(&self, path: &str, reader: &mut dyn Read) -> Result<()> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        self.objects.lock().unwrap().insert(path.to_string(), buf);
        Ok(())
    }

    fn range_get(&self, path: &str, offset: u64, length: u64) -> Result<Box<dyn Read + Send>> {
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(path)
            .ok_or_else(|| StoreError::ObjectNotExist(path.to_string()))?;
        let start = offset as usize;
        let end = (start + length as usize).min(data.len());
        let slice = if start < data.len() { data[start..end].to_vec() } else { Vec::new() };
        Ok(Box::new(Cursor::new(slice)))
    }

    fn size(&self, path: &str) -> Result<u64> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .map(|d| d.len() as u64)
            .ok_or_else(|| StoreError::ObjectNotExist(path.to_string()))
    }

    fn delete_with_prefix(&self, prefix: &str) -> Result<()> {
        self.objects.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    fn start_multipart_upload(&self, path: &str) -> Result<Box<dyn MultipartUpload>> {
        Ok(Box::new(MemoryMultipart {
            dest: path.to_string(),
            parts: Mutex::new(HashMap::new()),
            objects: self.objects.clone(),
        }))
    }
}

struct MemoryMultipart {
    dest: String,
    parts: Mutex<HashMap<u64, Vec<u8>>>,
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MultipartUpload for MemoryMultipart {
    fn max_concurrency(&self) -> usize {
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
        let mut assembled = Vec::new();
        for n in numbers {
            assembled.extend_from_slice(&parts[n]);
        }
        self.objects.lock().unwrap().insert(self.dest.clone(), assembled);
        Ok(())
    }

    fn cleanup(&self) {
        self.parts.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_assembles_in_order() {
        let backend = MemoryBackend::new();
        let upload = backend.start_multipart_upload("o").unwrap();
        upload.upload_part(2, b"world").unwrap();
        upload.upload_part(1, b"hello ").unwrap();
        upload.complete().unwrap();
        upload.cleanup();

        let mut reader = backend.range_get("o", 0, 11).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello world");
    }
}
