// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! A streaming storage layer: uploads large opaque artifacts to a
//! remote object store, optionally compressing them into independently
//! decodable frames (C1/C2), coalescing the result into multipart
//! upload parts (C3) under an upload orchestrator (C4), and serves
//! random-access reads of the original content back out through a
//! block-aligned local disk cache (C5/C6).

pub mod backend;
pub mod cache;
pub mod compress;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod io_ext;
pub mod orchestrator;
pub mod taskgroup;
pub mod uploader;

pub use backend::{MultipartUpload, ObjectStore};
pub use cache::{CachedBlob, CachedReader, FeatureFlags, ObjectRemote, RemoteSeekable, StaticFlags};
pub use compress::{Algorithm, CompressionConfig};
pub use error::{Result, StoreError};
pub use frame::{FrameInfo, FrameTable};
pub use io_ext::ReadAt;
pub use orchestrator::{store, store_random_access, StoreOptions, StoreOutcome};
