//! Vnode abstraction and its reference-counting contract.
//!
//! Every call that hands a caller a new `VnodeRef` (`lookup`, `vfs_root`,
//! `special_file_vnode`) has already bumped its refcount; every caller that
//! received one is responsible for exactly one matching `vput`. `file_t`
//! holds one ref for as long as a file is open; `namev` holds transient refs
//! only while resolving a path and always drops the intermediate ones.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Errno, KResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeKind {
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
}

/// Filesystem-specific behavior a concrete backing store (ramfs, a device
/// node table, ...) implements. One `VnodeOps` is shared by every vnode that
/// belongs to the same mounted filesystem.
pub trait VnodeOps: Send + Sync {
    fn read(&self, ino: u64, offset: usize, buf: &mut [u8]) -> KResult<usize>;
    fn write(&self, ino: u64, offset: usize, buf: &[u8]) -> KResult<usize>;
    fn truncate(&self, ino: u64, len: usize) -> KResult<()>;
    fn size(&self, ino: u64) -> usize;

    /// Look up `name` as a direct child of directory `ino`. `ENOENT` if
    /// absent, `ENOTDIR` if `ino` is not a directory.
    fn lookup(&self, ino: u64, name: &str) -> KResult<VnodeRef>;
    /// `mknod`: creates a child of kind `kind`; `devid` is `Some` only for
    /// `CharDevice`/`BlockDevice` nodes (the `MKDEVID` convention).
    fn mknod(&self, ino: u64, name: &str, kind: VnodeKind, devid: Option<u32>) -> KResult<VnodeRef>;
    fn mkdir(&self, ino: u64, name: &str) -> KResult<VnodeRef>;
    fn rmdir(&self, ino: u64, name: &str) -> KResult<()>;
    fn unlink(&self, ino: u64, name: &str) -> KResult<()>;
    fn link(&self, ino: u64, name: &str, target: u64) -> KResult<()>;
    /// `(name, ino)` pairs in directory `ino`, in an implementation-defined
    /// but stable order, starting after `offset` entries.
    fn readdir(&self, ino: u64, offset: usize) -> KResult<Vec<(String, u64)>>;

    /// `create`: `mknod` specialized to a plain regular file, the op
    /// `open_namev` calls for `O_CREAT`.
    fn create(&self, ino: u64, name: &str) -> KResult<VnodeRef> {
        self.mknod(ino, name, VnodeKind::Regular, None)
    }
}

pub struct Vnode {
    pub ino: u64,
    pub kind: VnodeKind,
    pub ops: Arc<dyn VnodeOps>,
    /// `Some((major, minor))`-derived id for `CharDevice`/`BlockDevice`
    /// vnodes; routes `read`/`write` to `fs::device` instead of `ops`.
    pub devid: Option<u32>,
    refcount: AtomicUsize,
}

pub type VnodeRef = Arc<Vnode>;

impl Vnode {
    pub fn new(ino: u64, kind: VnodeKind, ops: Arc<dyn VnodeOps>, devid: Option<u32>) -> VnodeRef {
        Arc::new(Vnode { ino, kind, ops, devid, refcount: AtomicUsize::new(1) })
    }

    pub fn is_dir(&self) -> bool {
        self.kind == VnodeKind::Directory
    }

    pub fn is_device(&self) -> bool {
        matches!(self.kind, VnodeKind::CharDevice | VnodeKind::BlockDevice)
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> KResult<usize> {
        self.ops.read(self.ino, offset, buf)
    }

    pub fn write(&self, offset: usize, buf: &[u8]) -> KResult<usize> {
        self.ops.write(self.ino, offset, buf)
    }

    pub fn size(&self) -> usize {
        self.ops.size(self.ino)
    }
}

/// `vref`: bump the refcount, returning a second logical owner of the same
/// vnode. The `Arc` clone itself is cheap bookkeeping; `refcount` is the
/// value the rest of the kernel reasons about (mirrors `vn_refcount`).
pub fn vref(v: &VnodeRef) -> VnodeRef {
    v.refcount.fetch_add(1, Ordering::SeqCst);
    v.clone()
}

/// `vput`: drop one logical reference. Once it would go to zero, the
/// `VnodeRef` is simply not cloned again and the last `Arc` drop reclaims
/// the `Vnode` itself.
pub fn vput(v: VnodeRef) {
    let prev = v.refcount.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(prev > 0, "vput: refcount underflow");
}

pub fn lookup(dir: &VnodeRef, name: &str) -> KResult<VnodeRef> {
    if !dir.is_dir() {
        return Err(Errno::ENOTDIR);
    }
    dir.ops.lookup(dir.ino, name)
}
