// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! C6: the cached blob. Write-through/read-through caching for small
//! whole-object blobs, gated end-to-end by an injected [`FeatureFlags`]
//! capability — when the flag is off the remote is authoritative in
//! both directions and the cache is never touched.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crate::backend::ObjectStore;
use crate::cache::lock::write_cache_file;
use crate::error::Result;

const BLOB_CACHE_FLAG: &str = "blob_cache";

/// An injected capability the core queries per operation; it never
/// reads configuration or the environment directly.
pub trait FeatureFlags: Send + Sync {
    fn enabled(&self, name: &str) -> bool;
}

/// A flag fixed at construction, for tests and simple embedders.
pub struct StaticFlags(bool);

impl StaticFlags {
    pub fn new(enabled: bool) -> Self {
        StaticFlags(enabled)
    }
}

impl FeatureFlags for StaticFlags {
    fn enabled(&self, _name: &str) -> bool {
        self.0
    }
}

fn cache_file_name(path: &str) -> String {
    path.replace('/', "_")
}

pub struct CachedBlob<'a> {
    store: &'a dyn ObjectStore,
    cache_root: PathBuf,
    flags: &'a dyn FeatureFlags,
}

impl<'a> CachedBlob<'a> {
    pub fn new(store: &'a dyn ObjectStore, cache_root: impl Into<PathBuf>, flags: &'a dyn FeatureFlags) -> Self {
        CachedBlob {
            store,
            cache_root: cache_root.into(),
            flags,
        }
    }

    fn cache_path(&self, path: &str) -> PathBuf {
        self.cache_root.join(cache_file_name(path))
    }

    fn cache_enabled(&self) -> bool {
        self.flags.enabled(BLOB_CACHE_FLAG)
    }

    /// Write-through: upload to remote, then spool the same bytes
    /// through the cache-write protocol. The returned handle lets a
    /// caller await the cache write without blocking the upload on it.
    pub fn store_blob(&self, path: &str, reader: &mut dyn Read) -> Result<JoinHandle<()>> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.store.put(path, &mut bytes.as_slice())?;

        if !self.cache_enabled() {
            return Ok(thread::spawn(|| {}));
        }
        let cache_path = self.cache_path(path);
        Ok(thread::spawn(move || write_cache_file(&cache_path, &bytes)))
    }

    /// Read-through: serve from the cache file if present, else fetch
    /// the whole object from remote and asynchronously cache it.
    pub fn get_blob(&self, path: &str) -> Result<Vec<u8>> {
        if self.cache_enabled() {
            if let Ok(bytes) = fs::read(self.cache_path(path)) {
                return Ok(bytes);
            }
        }

        let size = self.store.size(path)?;
        let mut reader = self.store.range_get(path, 0, size)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        if self.cache_enabled() {
            let cache_path = self.cache_path(path);
            let data = bytes.clone();
            thread::spawn(move || write_cache_file(&cache_path, &data));
        }
        Ok(bytes)
    }

    /// Read-through, writing straight into `dest` instead of returning
    /// an owned buffer.
    pub fn copy_blob(&self, path: &str, dest: &mut dyn Write) -> Result<u64> {
        let bytes = self.get_blob(path)?;
        dest.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }
}
