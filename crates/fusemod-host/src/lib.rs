// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FuseMod host
//!
//! Serves an in-memory tree to the kernel through FUSE while a controller
//! edits the tree over a pair of named pipes. Kernel writes are forwarded to
//! the controller as notification frames.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod handlers;
pub mod logging;
pub mod notify;
pub mod pipes;
pub mod shutdown;

#[cfg(all(feature = "fuse", target_os = "linux"))]
pub mod adapter;

pub use config::{load_config, HostConfig};
pub use context::FuseModContext;
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use shutdown::ShutdownReason;
