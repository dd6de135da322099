//! FUSE front end for mirrorfs.
//!
//! This crate mounts a [`mirrorfs::MirrorFs`] through the kernel's FUSE
//! interface so that a directory tree becomes visible at a second location.
//!
//! # Usage
//!
//! ```no_run
//! use mirrorfs::MirrorFs;
//! use mirrorfs_fuse::{MirrorFuse, MountConfig, spawn_mount};
//!
//! let fuse = MirrorFuse::new(MirrorFs::new("/srv/data")?);
//! let session = spawn_mount(fuse, "/mnt/data", &MountConfig::default())?;
//! // ... the mirror is live until `session` is dropped
//! drop(session);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod attr;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod handles;
pub mod inode;

pub use config::MountConfig;
pub use error::{FuseError, FuseResult};
pub use filesystem::MirrorFuse;
pub use handles::HandleTable;
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};

use fuser::BackgroundSession;
use std::io;
use std::path::Path;

/// Mounts `fs` at `mountpoint` and serves it from a background thread.
///
/// The filesystem stays mounted until the returned session is dropped or
/// the mountpoint is unmounted externally.
pub fn spawn_mount(
    fs: MirrorFuse,
    mountpoint: impl AsRef<Path>,
    config: &MountConfig,
) -> io::Result<BackgroundSession> {
    fuser::spawn_mount2(fs, mountpoint.as_ref(), &config.mount_options())
}
