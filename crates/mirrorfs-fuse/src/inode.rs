//! Inode management for the FUSE front end.
//!
//! The mirror reports the native inode number of every entry, so the table
//! does not allocate numbers itself. It maps the number the kernel holds to
//! the [`Node`] that serves it and counts lookups so that `forget()` can drop
//! entries the kernel no longer references.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mirrorfs::Node;
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// Inode reported for non-root entries whose native inode is also 1, such
/// as `/proc` or a nested FUSE mount inside the mirrored tree.
pub const ROOT_ALIAS_INODE: u64 = 1 << 63;

/// Maps a native inode number onto the number handed to the kernel.
///
/// Only the mirror root may use [`ROOT_INODE`]; any other entry reporting
/// it is moved to [`ROOT_ALIAS_INODE`].
pub fn kernel_inode(native: u64, is_root: bool) -> u64 {
    if native == ROOT_INODE && !is_root {
        ROOT_ALIAS_INODE
    } else {
        native
    }
}

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// The node currently serving this inode.
    pub node: Node,
    /// Lookup count for `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(node: Node) -> Self {
        Self {
            node,
            nlookup: AtomicU64::new(1),
        }
    }

    /// Increments the lookup count and returns the new value.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the current lookup count.
    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::SeqCst)
    }
}

/// Thread-safe table from inode numbers to nodes.
pub struct InodeTable {
    entries: DashMap<u64, InodeEntry>,
}

impl InodeTable {
    /// Creates a table holding the root node under [`ROOT_INODE`].
    pub fn new(root: Node) -> Self {
        let entries = DashMap::new();
        entries.insert(ROOT_INODE, InodeEntry::new(root));
        Self { entries }
    }

    /// Records a lookup of `node` under `ino`.
    ///
    /// A known inode has its lookup count bumped and its node replaced, so a
    /// renamed or recreated entry is served from its latest path. A non-root
    /// node is never stored under [`ROOT_INODE`].
    pub fn remember(&self, ino: u64, node: Node) -> u64 {
        let ino = kernel_inode(ino, node.is_root());
        match self.entries.entry(ino) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.node = node;
                entry.inc_nlookup()
            }
            Entry::Vacant(vacant) => {
                vacant.insert(InodeEntry::new(node));
                1
            }
        }
    }

    /// Replaces the node of a known inode without touching its lookup count.
    ///
    /// Returns `false` if the kernel holds no reference to `ino`.
    pub fn refresh(&self, ino: u64, node: Node) -> bool {
        let ino = kernel_inode(ino, node.is_root());
        match self.entries.get_mut(&ino) {
            Some(mut entry) => {
                entry.node = node;
                true
            }
            None => false,
        }
    }

    /// Returns the node serving `ino`.
    pub fn get(&self, ino: u64) -> Option<Node> {
        self.entries.get(&ino).map(|e| e.node.clone())
    }

    /// Returns the lookup count of `ino`, or 0 if unknown.
    pub fn nlookup(&self, ino: u64) -> u64 {
        self.entries.get(&ino).map_or(0, |e| e.nlookup())
    }

    /// Decrements the lookup count by `nlookup`, evicting the entry at zero.
    ///
    /// The root is never evicted. Returns `true` if the entry was removed.
    pub fn forget(&self, ino: u64, nlookup: u64) -> bool {
        if ino == ROOT_INODE {
            return false;
        }
        if let Entry::Occupied(occupied) = self.entries.entry(ino) {
            let entry = occupied.get();
            let remaining = entry.nlookup().saturating_sub(nlookup);
            entry.nlookup.store(remaining, Ordering::SeqCst);
            if remaining == 0 {
                occupied.remove();
                return true;
            }
        }
        false
    }

    /// Returns the number of inodes currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if only the root is held.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}
