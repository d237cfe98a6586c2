// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FuseMod host: an in-memory FUSE filesystem driven over named pipes
//!
//! Opens the control pipes, mounts the tree (Linux with the `fuse` feature)
//! and runs the command dispatcher until the controller hangs up, a fatal
//! protocol error occurs, the filesystem is unmounted, or a signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use fusemod_core::Tree;
use fusemod_host::logging::{init_logging, CliLogLevel};
use fusemod_host::pipes::open_control_pipes;
use fusemod_host::shutdown::terminate_process_group;
use fusemod_host::{load_config, Dispatcher, FuseModContext, HostConfig, ShutdownReason};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mount an in-memory filesystem controlled through a pair of named pipes"
)]
struct Args {
    /// Named pipe the controller writes commands into (created if missing)
    pipe_in: PathBuf,

    /// Named pipe responses and write notifications are sent on (created if missing)
    pipe_out: PathBuf,

    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Allow root to access the filesystem
    #[arg(long)]
    allow_root: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,

    /// Extra mount option, passed through verbatim (repeatable)
    #[arg(short = 'o', value_name = "OPTION")]
    options: Vec<String>,

    /// Log verbosity; RUST_LOG overrides it
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Do not signal the process group after a fatal protocol error
    #[arg(long)]
    no_kill_process_group: bool,
}

fn apply_overrides(config: &mut HostConfig, args: &Args) {
    config.allow_other |= args.allow_other;
    config.allow_root |= args.allow_root;
    config.auto_unmount |= args.auto_unmount;
    config.mount_options.extend(args.options.iter().cloned());
    if args.no_kill_process_group {
        config.kill_process_group_on_fatal = false;
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.log_level)?;

    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    info!("Starting FuseMod host");
    info!("Mount point: {}", args.mount_point.display());
    info!("Configuration loaded: {:?}", config);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<ShutdownReason>();
    {
        let tx = shutdown_tx.clone();
        ctrlc::set_handler(move || {
            let _ = tx.send(ShutdownReason::Signal);
        })
        .context("failed to install signal handler")?;
    }

    let (inbound, outbound) = open_control_pipes(&args.pipe_in, &args.pipe_out, config.fifo_mode)?;
    info!("Controller connected");

    let ctx = Arc::new(FuseModContext::new(Tree::new(), outbound));

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    let session = {
        let filesystem = fusemod_host::adapter::FuseModFs::new(
            Arc::clone(&ctx),
            &config,
            Some(shutdown_tx.clone()),
        );
        info!("Mounting filesystem...");
        fuser::spawn_mount2(filesystem, &args.mount_point, &config.fuse_mount_options())
            .with_context(|| format!("failed to mount at {}", args.mount_point.display()))?
    };

    #[cfg(not(all(feature = "fuse", target_os = "linux")))]
    warn!("FUSE support not compiled in; serving the control channel only");

    let dispatcher = Dispatcher::new(Arc::clone(&ctx), inbound);
    {
        let tx = shutdown_tx.clone();
        thread::Builder::new()
            .name("fusemod-dispatch".to_string())
            .spawn(move || {
                let _ = tx.send(dispatcher.run().into());
            })
            .context("failed to start dispatcher thread")?;
    }
    drop(shutdown_tx);

    let reason = shutdown_rx.recv().unwrap_or(ShutdownReason::InboundClosed);
    match reason {
        ShutdownReason::Fatal(code) => error!(?code, "fatal control channel error; shutting down"),
        other => info!(reason = ?other, "shutting down"),
    }

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    {
        info!("Unmounting {}", args.mount_point.display());
        drop(session);
    }
    ctx.close_outbound();

    if reason.is_failure() && config.kill_process_group_on_fatal {
        warn!("Signalling process group");
        if let Err(err) = terminate_process_group() {
            warn!(error = %err, "failed to signal process group");
        }
    }

    Ok(ExitCode::from(reason.exit_code() as u8))
}
