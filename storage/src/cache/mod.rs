// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! The on-disk chunk/blob cache (spec.md §4.5-4.6): a write protocol
//! shared by both consumers, a chunk-aligned seekable reader (C5), and
//! a whole-object blob cache (C6).

pub mod blob;
pub mod lock;
pub mod reader;

pub use blob::{CachedBlob, FeatureFlags, StaticFlags};
pub use reader::{CachedReader, ObjectRemote, RemoteSeekable};
