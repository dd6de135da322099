//! Mount harness for FUSE integration tests.
//!
//! `TestMount` mirrors a fresh temp directory at a second temp directory and
//! unmounts on drop.

use fuser::BackgroundSession;
use mirrorfs::MirrorFs;
use mirrorfs_fuse::{MirrorFuse, MountConfig, spawn_mount};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);
const MOUNT_CHECK_INTERVAL: Duration = Duration::from_millis(100);
const READY_MARKER: &str = ".mirror-ready";

pub struct TestMount {
    pub source_path: PathBuf,
    pub mount_path: PathBuf,
    session: Option<BackgroundSession>,
    _source: TempDir,
    _mount: TempDir,
}

impl TestMount {
    /// Mounts an empty source directory.
    pub fn new() -> Result<Self, String> {
        let source = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        fs::write(source.path().join(READY_MARKER), b"")
            .map_err(|e| format!("Failed to seed source: {e}"))?;

        let mirror =
            MirrorFs::new(source.path()).map_err(|e| format!("Failed to create mirror: {e}"))?;
        let config = MountConfig::default().fs_name("mirrorfs-test");
        let session = spawn_mount(MirrorFuse::with_config(mirror, config.clone()), mount.path(), &config)
            .map_err(|e| format!("Failed to mount: {e}"))?;

        let this = Self {
            source_path: source.path().to_path_buf(),
            mount_path: mount.path().to_path_buf(),
            session: Some(session),
            _source: source,
            _mount: mount,
        };
        Self::wait_for_mount(&this.mount_path)?;
        fs::remove_file(this.source_path.join(READY_MARKER))
            .map_err(|e| format!("Failed to clear marker: {e}"))?;
        Ok(this)
    }

    fn wait_for_mount(mount_path: &Path) -> Result<(), String> {
        let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
        while Instant::now() < deadline {
            if mount_path.join(READY_MARKER).exists() {
                return Ok(());
            }
            thread::sleep(MOUNT_CHECK_INTERVAL);
        }
        Err("Mount did not become ready in time".to_string())
    }

    pub fn mounted(&self, rel: &str) -> PathBuf {
        self.mount_path.join(rel)
    }

    pub fn source(&self, rel: &str) -> PathBuf {
        self.source_path.join(rel)
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        drop(self.session.take());
    }
}

pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
