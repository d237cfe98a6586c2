// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FuseMod Core: the in-memory directory tree
//!
//! The tree is mutated by control-channel commands and queried by the
//! kernel bridge. It carries no locking of its own; callers share it behind
//! a single mutex.

pub mod error;
pub mod tree;
pub mod types;

// Re-export key types
pub use error::{FsError, FsResult};
pub use tree::Tree;
pub use types::*;
