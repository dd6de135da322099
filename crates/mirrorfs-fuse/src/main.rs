//! mirrormount - Mirror a directory tree at another location via FUSE.
//!
//! Usage: mirrormount <ROOT_DIR> <MNT_DIR>

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::select;
use mirrorfs::MirrorFs;
use mirrorfs_fuse::{MirrorFuse, MountConfig, spawn_mount};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mirrormount")]
#[command(about = "Mirror a directory tree at another location via FUSE")]
#[command(version)]
struct Cli {
    /// Directory whose contents are exposed
    root: PathBuf,

    /// Mountpoint for the mirror
    mount: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Mount as read-only (default: read-write)
    #[arg(long)]
    read_only: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Filesystem name shown in the mount table
    #[arg(long, env = "MIRRORFS_FS_NAME", default_value = mirrorfs_fuse::config::DEFAULT_FS_NAME)]
    fs_name: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.root.is_dir() {
        anyhow::bail!("Root directory does not exist: {}", cli.root.display());
    }
    if !cli.mount.is_dir() {
        anyhow::bail!("Mountpoint does not exist: {}", cli.mount.display());
    }

    info!(root = %cli.root.display(), mount = %cli.mount.display(), "Mounting mirror");

    let mirror = MirrorFs::new(&cli.root).context("Failed to initialize filesystem")?;
    let config = MountConfig::default()
        .fs_name(cli.fs_name)
        .read_only(cli.read_only)
        .allow_other(cli.allow_other);
    let fuse = MirrorFuse::with_config(mirror, config.clone());
    let unmounted = fuse.unmount_signal();

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to set signal handler")?;

    info!("Mounting filesystem (press Ctrl+C to unmount)");

    let session = spawn_mount(fuse, &cli.mount, &config).map_err(|e| {
        error!(error = %e, "Mount failed");
        anyhow::anyhow!("Failed to mount filesystem: {e}")
    })?;

    info!("Filesystem mounted at {}", cli.mount.display());

    select! {
        recv(interrupt_rx) -> _ => info!("Received interrupt signal, unmounting..."),
        recv(unmounted) -> _ => info!("Filesystem unmounted externally"),
    }

    drop(session);
    info!("Filesystem unmounted");
    Ok(())
}
