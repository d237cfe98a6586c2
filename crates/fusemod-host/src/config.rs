// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host configuration, loaded from JSON

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Filesystem name shown in the mount table
    pub fs_name: String,
    pub allow_other: bool,
    pub allow_root: bool,
    pub auto_unmount: bool,
    /// Kernel attribute cache TTL
    pub attr_ttl_ms: u64,
    /// Kernel directory entry cache TTL
    pub entry_ttl_ms: u64,
    /// Permission bits for newly created control FIFOs
    pub fifo_mode: u32,
    /// Send SIGTERM to the whole process group after a fatal protocol error
    pub kill_process_group_on_fatal: bool,
    /// Extra mount options passed through verbatim
    pub mount_options: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            fs_name: "fusemod".to_string(),
            allow_other: false,
            allow_root: false,
            auto_unmount: false,
            attr_ttl_ms: 1000,
            entry_ttl_ms: 1000,
            fifo_mode: 0o666,
            kill_process_group_on_fatal: true,
            mount_options: Vec::new(),
        }
    }
}

impl HostConfig {
    pub fn attr_ttl(&self) -> Duration {
        Duration::from_millis(self.attr_ttl_ms)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_millis(self.entry_ttl_ms)
    }

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    pub fn fuse_mount_options(&self) -> Vec<fuser::MountOption> {
        let mut options = vec![
            fuser::MountOption::FSName(self.fs_name.clone()),
            fuser::MountOption::Subtype("fusemod".to_string()),
        ];
        if self.allow_other {
            options.push(fuser::MountOption::AllowOther);
        }
        if self.allow_root {
            options.push(fuser::MountOption::AllowRoot);
        }
        if self.auto_unmount {
            options.push(fuser::MountOption::AutoUnmount);
        }
        options.extend(self.mount_options.iter().cloned().map(fuser::MountOption::CUSTOM));
        options
    }
}

/// Read the configuration file, or fall back to defaults when none is given.
pub fn load_config(config_path: Option<&Path>) -> Result<HostConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            let config: HostConfig = serde_json::from_str(&content)
                .with_context(|| format!("invalid config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(HostConfig::default()),
    }
}
