//! Open file and directory handles keyed by the number handed to the kernel.

use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use fuser::FileType;
use mirrorfs::Handle;
use std::ffi::OsString;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One entry of a directory listing as handed to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListingEntry {
    pub inode: u64,
    pub file_type: FileType,
    pub name: OsString,
}

/// Thread-safe table of open [`Handle`]s.
///
/// Handle numbers start at 1 and are never reused while the table lives.
/// A directory handle also carries the listing taken when its stream was
/// (re)started, so every readdir offset indexes the same snapshot.
pub struct HandleTable {
    handles: DashMap<u64, Handle>,
    listings: DashMap<u64, Arc<[DirListingEntry]>>,
    next_fh: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            listings: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    /// Stores `handle` and returns the number the kernel will use for it.
    pub fn insert(&self, handle: Handle) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles.insert(fh, handle);
        fh
    }

    pub fn get(&self, fh: u64) -> Option<Ref<'_, u64, Handle>> {
        self.handles.get(&fh)
    }

    /// Removes the handle and its listing, handing the handle back for
    /// release.
    pub fn remove(&self, fh: u64) -> Option<Handle> {
        self.listings.remove(&fh);
        self.handles.remove(&fh).map(|(_, handle)| handle)
    }

    /// Returns the listing stored for `fh`, if the stream has started.
    pub fn listing(&self, fh: u64) -> Option<Arc<[DirListingEntry]>> {
        self.listings.get(&fh).map(|l| Arc::clone(&l))
    }

    /// Stores a fresh listing for `fh`, replacing any earlier one.
    pub fn set_listing(&self, fh: u64, entries: Vec<DirListingEntry>) -> Arc<[DirListingEntry]> {
        let listing: Arc<[DirListingEntry]> = entries.into();
        self.listings.insert(fh, Arc::clone(&listing));
        listing
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorfs::MirrorFs;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_insert_get_remove() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let mirror = MirrorFs::new(dir.path()).unwrap();
        let node = mirror.root_node().lookup("a.txt").unwrap();

        let table = HandleTable::new();
        let first = table.insert(node.open(libc::O_RDONLY).unwrap());
        let second = table.insert(node.open(libc::O_RDONLY).unwrap());
        assert_ne!(first, second);
        assert_eq!(table.len(), 2);

        let data = table.get(first).unwrap().read(0, 16).unwrap();
        assert_eq!(data, b"hi");

        let handle = table.remove(first).unwrap();
        handle.release().unwrap();
        assert!(table.get(first).is_none());
        assert!(table.remove(first).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_listing_lives_with_handle() {
        let dir = TempDir::new().unwrap();
        let mirror = MirrorFs::new(dir.path()).unwrap();

        let table = HandleTable::new();
        let fh = table.insert(mirror.root_node().open(libc::O_RDONLY).unwrap());
        assert!(table.listing(fh).is_none());

        let entry = DirListingEntry {
            inode: 1,
            file_type: FileType::Directory,
            name: ".".into(),
        };
        table.set_listing(fh, vec![entry.clone()]);
        assert_eq!(&*table.listing(fh).unwrap(), &[entry][..]);

        table.remove(fh).unwrap().release().unwrap();
        assert!(table.listing(fh).is_none());
    }

    #[test]
    fn test_numbers_not_reused() {
        let dir = TempDir::new().unwrap();
        let mirror = MirrorFs::new(dir.path()).unwrap();
        let root = mirror.root_node();

        let table = HandleTable::new();
        let fh = table.insert(root.open(libc::O_RDONLY).unwrap());
        table.remove(fh);
        assert!(table.is_empty());
        let next = table.insert(root.open(libc::O_RDONLY).unwrap());
        assert!(next > fh);
    }
}
