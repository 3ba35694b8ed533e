// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! The cache-write protocol (spec.md §4.5.1): an advisory file lock
//! bounds wasted work under a thundering herd, and a temp-file +
//! move-without-replace pattern means concurrent readers only ever see
//! "absent" or "complete", never a torn write.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use uuid::Uuid;

const CHUNK_FILE_MODE: u32 = 0o644;

pub enum LockError {
    AlreadyHeld,
    Other(io::Error),
}

/// An advisory, exclusive, non-blocking lock on a lock file. Released
/// on drop.
pub struct FileLock {
    _file: File,
}

pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    target.with_file_name(name)
}

fn try_lock_exclusive(path: &Path) -> Result<FileLock, LockError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(LockError::Other)?;
    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(FileLock { _file: file }),
        Err(Errno::EWOULDBLOCK) => Err(LockError::AlreadyHeld),
        Err(e) => Err(LockError::Other(store_utils::eio!(format!("flock {:?}: {}", path, e)))),
    }
}

/// Move `src` to `dst`, failing (and leaving `dst` untouched) if `dst`
/// already exists, rather than silently overwriting it. Implemented as
/// `link` + `unlink`, the portable construction under NFS (spec.md §9).
/// Returns `true` if `dst` was created by this call.
fn move_without_replace(src: &Path, dst: &Path) -> io::Result<bool> {
    match fs::hard_link(src, dst) {
        Ok(()) => {
            let _ = fs::remove_file(src);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(src);
            Ok(false)
        }
        Err(e) => {
            let _ = fs::remove_file(src);
            Err(e)
        }
    }
}

fn write_temp_file(dir: &Path, prefix: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(".temp.{}.{}", prefix, Uuid::new_v4()));
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(CHUNK_FILE_MODE)
        .open(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(tmp_path)
}

/// Fire-and-forget cache write: lock, write a temp file, rename it into
/// place without replacing an existing destination, unlock. All
/// failures (lock contention, I/O errors) are logged and swallowed —
/// spec.md §7 treats cache-write failure as never surfaced to the
/// caller.
pub fn write_cache_file(final_path: &Path, bytes: &[u8]) {
    let lock_path = lock_path_for(final_path);
    let lock = match try_lock_exclusive(&lock_path) {
        Ok(lock) => lock,
        Err(LockError::AlreadyHeld) => {
            log::trace!("cache write for {:?} skipped: lock already held", final_path);
            return;
        }
        Err(LockError::Other(e)) => {
            log::warn!("cache write for {:?} skipped: lock error: {}", final_path, e);
            return;
        }
    };

    let dir = final_path.parent().unwrap_or_else(|| Path::new("."));
    let prefix = final_path.file_name().unwrap_or_default().to_string_lossy().into_owned();

    let result = write_temp_file(dir, &prefix, bytes).and_then(|tmp| move_without_replace(&tmp, final_path));

    match result {
        Ok(true) => log::trace!("cache write for {:?} committed", final_path),
        Ok(false) => log::trace!("cache write for {:?} raced a concurrent writer; discarded", final_path),
        Err(e) => log::warn!("cache write for {:?} failed: {}", final_path, e),
    }

    drop(lock);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_cache_file_creates_the_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("000000000000-2097152.bin");
        write_cache_file(&dst, b"hello");
        assert_eq!(fs::read(&dst).unwrap(), b"hello");
    }

    #[test]
    fn second_write_never_clobbers_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("000000000000-2097152.bin");
        write_cache_file(&dst, b"first");
        write_cache_file(&dst, b"second-and-different-length");
        // move-without-replace means whichever wrote first wins.
        assert_eq!(fs::read(&dst).unwrap(), b"first");
    }

    #[test]
    fn move_without_replace_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("chunk.bin");
        let src1 = dir.path().join("src1");
        let src2 = dir.path().join("src2");
        fs::write(&src1, b"one").unwrap();
        fs::write(&src2, b"two").unwrap();

        assert!(move_without_replace(&src1, &dst).unwrap());
        assert!(!move_without_replace(&src2, &dst).unwrap());
        assert_eq!(fs::read(&dst).unwrap(), b"one");
        assert!(!src2.exists());
    }

    #[test]
    fn concurrent_lock_attempt_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("chunk.bin");
        let lock_path = lock_path_for(&target);
        let _held = try_lock_exclusive(&lock_path).ok().unwrap();
        assert!(matches!(try_lock_exclusive(&lock_path), Err(LockError::AlreadyHeld)));
    }
}
