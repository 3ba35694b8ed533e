// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Small ambient helpers shared by the storage crate: logging setup and
//! macros for building `std::io::Error`s at internal filesystem call
//! sites, in the style of nydus-rs's own `nydus-utils`.

use std::path::Path;

use flexi_logger::{Duplicate, FileSpec, Logger, WriteMode};
use log::LevelFilter;

/// Initialize the global logger. Call once from a binary or test harness;
/// the `storage` crate itself never calls this, it only uses the `log`
/// facade.
pub fn setup_logging(level: LevelFilter, log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut logger = Logger::try_with_env_or_str(level.to_string())?.duplicate_to_stderr(Duplicate::Warn);

    if let Some(path) = log_file {
        let spec = FileSpec::try_from(path)?;
        logger = logger.log_to_file(spec).write_mode(WriteMode::BufferAndFlush);
    }

    logger.start()?;
    Ok(())
}

/// Build an `io::Error` with `InvalidInput`, mirroring nydus's `einval!()`.
#[macro_export]
macro_rules! einval {
    ($msg:expr) => {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, $msg)
    };
    () => {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid argument")
    };
}

/// Build an `io::Error` with `Other`, mirroring nydus's `eio!()`.
#[macro_export]
macro_rules! eio {
    ($msg:expr) => {
        std::io::Error::new(std::io::ErrorKind::Other, $msg)
    };
    () => {
        std::io::Error::new(std::io::ErrorKind::Other, "I/O error")
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn einval_sets_invalid_input_kind() {
        let e: std::io::Error = einval!("bad offset");
        assert_eq!(e.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn eio_sets_other_kind() {
        let e: std::io::Error = eio!("flock failed");
        assert_eq!(e.kind(), std::io::ErrorKind::Other);
    }
}
