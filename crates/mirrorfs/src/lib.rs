//! Pass-through filesystem core.
//!
//! This crate exposes an existing directory tree through a node/handle
//! interface suitable for a user-space filesystem protocol. Every request
//! is replayed directly against the real tree under a configured root.
//!
//! # Features
//!
//! - Path-identified nodes with no metadata or directory caching
//! - Positioned read/write on exclusively owned handles
//! - Native stat records translated into portable [`AttrRecord`]s
//! - Partial attribute updates applied in a fixed, short-circuiting order
//!
//! # Usage
//!
//! ```no_run
//! use mirrorfs::MirrorFs;
//!
//! let fs = MirrorFs::new("/srv/data")?;
//! let file = fs.root_node().lookup("a.txt")?;
//! let handle = file.open(libc::O_RDONLY)?;
//! let data = handle.read(0, 4096)?;
//! handle.release()?;
//! # Ok::<(), mirrorfs::FsError>(())
//! ```

pub mod attr;
pub mod error;
pub mod filesystem;
pub mod handle;
pub mod node;
pub mod path;

pub use attr::{ATTR_VALID, AttrRecord, FileKind, ROOT_INO, SetAttrRequest, SetTime};
pub use error::{FsError, FsResult, ToErrno};
pub use filesystem::{FsStats, MirrorFs};
pub use handle::{DirEntry, Handle};
pub use node::{Created, Node};
pub use path::{PathResolver, RelPath};
