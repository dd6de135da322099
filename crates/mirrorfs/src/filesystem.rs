//! The filesystem facade: owns the root, hands out the root node, reports
//! statistics and signals teardown.

use crate::error::{FsError, FsResult, LogFailure};
use crate::node::Node;
use crate::path::{PathResolver, RelPath};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{Span, debug, info, info_span, trace};

/// Maximum name length reported by [`MirrorFs::statistics`].
pub const NAME_MAX: u32 = 512;

/// State shared by every node and handle of one filesystem: the immutable
/// root and the diagnostic span their log events are recorded under.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) resolver: PathResolver,
    pub(crate) span: Span,
}

/// Filesystem-level statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub block_size: u32,
    pub name_max: u32,
    /// Always zero.
    pub fragment_size: u32,
}

/// A pass-through view of one directory tree.
pub struct MirrorFs {
    shared: Arc<Shared>,
    unmount_tx: Sender<()>,
    unmount_rx: Receiver<()>,
}

impl MirrorFs {
    /// Creates a filesystem rooted at `root`.
    ///
    /// The root is made absolute once here and never changes afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be resolved or is not a directory.
    pub fn new(root: impl AsRef<Path>) -> FsResult<Self> {
        let root = root.as_ref();
        let span = info_span!("mirrorfs", root = %root.display());
        Self::with_span(root, span)
    }

    /// Creates a filesystem whose diagnostics are recorded under `span`.
    pub fn with_span(root: impl AsRef<Path>, span: Span) -> FsResult<Self> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).log_failure("canonicalize", root)?;
        if !root.is_dir() {
            return Err(FsError::NotADirectory(root.display().to_string()));
        }

        span.in_scope(|| info!(root = %root.display(), "mirror filesystem initialized"));

        let (unmount_tx, unmount_rx) = crossbeam_channel::bounded(1);
        Ok(Self {
            shared: Arc::new(Shared {
                resolver: PathResolver::new(root),
                span,
            }),
            unmount_tx,
            unmount_rx,
        })
    }

    /// The absolute root directory.
    pub fn root(&self) -> &Path {
        self.shared.resolver.root()
    }

    /// Returns the node for the root of the tree.
    pub fn root_node(&self) -> Node {
        Node::new(Arc::clone(&self.shared), RelPath::root(), true)
    }

    /// Queries statistics of the file system holding the root.
    pub fn statistics(&self) -> FsResult<FsStats> {
        let _enter = self.shared.span.enter();
        trace!("statfs");

        let root = self.root();
        let stat = nix::sys::statvfs::statvfs(root).log_failure("statfs", root)?;
        Ok(FsStats {
            blocks: stat.blocks() as u64,
            blocks_free: stat.blocks_free() as u64,
            blocks_available: stat.blocks_available() as u64,
            files: stat.files() as u64,
            files_free: stat.files_free() as u64,
            block_size: stat.block_size() as u32,
            name_max: NAME_MAX,
            fragment_size: 0,
        })
    }

    /// Tells the session owner that the mount may be released.
    ///
    /// Closes nothing itself. Repeated calls before the signal is consumed
    /// are coalesced.
    pub fn teardown(&self) {
        let _enter = self.shared.span.enter();
        match self.unmount_tx.try_send(()) {
            Ok(()) => info!("teardown signalled"),
            Err(TrySendError::Full(())) => debug!("teardown already pending"),
            Err(TrySendError::Disconnected(())) => debug!("no listener for teardown"),
        }
    }

    /// Returns the receiving end of the teardown signal.
    pub fn unmount_signal(&self) -> Receiver<()> {
        self.unmount_rx.clone()
    }
}

impl fmt::Debug for MirrorFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorFs").field("root", &self.root()).finish()
    }
}
