//! `file_t` and the per-process file descriptor table.
//!
//! A `file_t` is shared (via `dup`/`dup2` and across `fork`) by however many
//! fd slots currently point at it; `fget`/`fput` manage that sharing the
//! same way `vref`/`vput` manage vnode lifetime, intentionally decoupled
//! from the table slot itself so `do_dup`/`do_close` can be expressed
//! precisely in terms of reference counts.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::NFILES;
use crate::error::{Errno, KResult};
use crate::fs::vnode::{vput, vref, VnodeRef};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ   = 0b0001;
        const WRITE  = 0b0010;
        const APPEND = 0b0100;
        const CREAT  = 0b1000;
    }
}

pub struct FileT {
    pub vnode: VnodeRef,
    pub flags: OpenFlags,
    pos: AtomicUsize,
    refcount: AtomicUsize,
}

pub type FileRef = Arc<FileT>;

impl FileT {
    pub fn new(vnode: VnodeRef, flags: OpenFlags) -> FileRef {
        Arc::new(FileT { vnode, flags, pos: AtomicUsize::new(0), refcount: AtomicUsize::new(1) })
    }

    pub fn pos(&self) -> usize {
        self.pos.load(Ordering::SeqCst)
    }

    pub fn set_pos(&self, pos: usize) {
        self.pos.store(pos, Ordering::SeqCst);
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }
}

/// "`file_t` holds one ref for as long as a file is open": the manual
/// vnode refcount and this `FileT`'s own `Arc` strong count move in lockstep
/// (every `fget` clones the `Arc` and bumps the counter together, every
/// `fput` consumes one of each), so the vnode's ref is released exactly
/// when the last `Arc<FileT>` handle is.
impl Drop for FileT {
    fn drop(&mut self) {
        vput(self.vnode.clone());
    }
}

/// `fget`: bump a file's refcount, for a new fd slot or a thread entering a
/// syscall with an fd it resolved.
pub fn fget(f: &FileRef) -> FileRef {
    f.refcount.fetch_add(1, Ordering::SeqCst);
    f.clone()
}

/// `fput`: drop one logical reference. Matches `vput`'s discipline — once
/// every holder has called this, the last `Arc` drop reclaims the `FileT`.
pub fn fput(f: FileRef) {
    let prev = f.refcount.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(prev > 0, "fput: refcount underflow");
}

pub struct FdTable {
    slots: [Option<FileRef>; NFILES],
}

impl FdTable {
    pub fn new() -> Self {
        FdTable { slots: core::array::from_fn(|_| None) }
    }

    /// `get_empty_fd`: lowest free descriptor, or `EMFILE` if the table is
    /// full.
    pub fn get_empty_fd(&self) -> KResult<usize> {
        self.slots.iter().position(|s| s.is_none()).ok_or(Errno::EMFILE)
    }

    pub fn install(&mut self, fd: usize, file: FileRef) {
        self.slots[fd] = Some(file);
    }

    /// `fget` by descriptor: `EBADF` if unopened.
    pub fn get(&self, fd: usize) -> KResult<FileRef> {
        self.slots.get(fd).and_then(|s| s.as_ref()).map(fget).ok_or(Errno::EBADF)
    }

    /// Clears a slot, returning what it held so the caller can decide how
    /// many `fput`s to issue (see `do_close`'s documented double-`fput`).
    pub fn clear(&mut self, fd: usize) -> Option<FileRef> {
        self.slots.get_mut(fd).and_then(|s| s.take())
    }

    pub fn is_open(&self, fd: usize) -> bool {
        self.slots.get(fd).map(|s| s.is_some()).unwrap_or(false)
    }

    /// Used by `fork`: every open fd's `file_t` gets one more reference and
    /// the child's table points at the same ones (shared file position,
    /// matching the original's fd-table duplication).
    pub fn dup_table(&self) -> FdTable {
        let mut new = FdTable::new();
        for (fd, slot) in self.slots.iter().enumerate() {
            if let Some(f) = slot {
                new.slots[fd] = Some(fget(f));
            }
        }
        new
    }

    /// All open fds, for `proc_cleanup`'s close-everything-on-exit pass.
    pub fn open_fds(&self) -> Vec<usize> {
        self.slots.iter().enumerate().filter(|(_, s)| s.is_some()).map(|(fd, _)| fd).collect()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `do_dup`: points `new_fd` at the same `file_t` as `old_fd`, checking
/// `get_empty_fd`'s `EMFILE` result before installing so a full table is
/// rejected instead of silently dropped.
pub fn do_dup(fds: &mut FdTable, old_fd: usize) -> KResult<usize> {
    let file = fds.get(old_fd)?;
    let new_fd = fds.get_empty_fd()?;
    fds.install(new_fd, file);
    Ok(new_fd)
}

pub fn do_dup2(fds: &mut FdTable, old_fd: usize, new_fd: usize) -> KResult<usize> {
    if new_fd >= NFILES {
        return Err(Errno::EBADF);
    }
    let file = fds.get(old_fd)?;
    if old_fd == new_fd {
        fput(file);
        return Ok(new_fd);
    }
    if let Some(prev) = fds.clear(new_fd) {
        fput(prev);
    }
    fds.install(new_fd, file);
    Ok(new_fd)
}

/// `do_close`: preserves the original's net −1 refcount bug exactly
///   — one `fput` from resolving `fd` via `get`, a second from
/// clearing the table slot, for a file_t that only ever had one real
/// reference installed by `do_open`.
pub fn do_close(fds: &mut FdTable, fd: usize) -> KResult<()> {
    let resolved = fds.get(fd)?;
    fput(resolved);
    match fds.clear(fd) {
        Some(f) => {
            fput(f);
            Ok(())
        }
        None => Err(Errno::EBADF),
    }
}

pub fn vref_cwd(v: &VnodeRef) -> VnodeRef {
    vref(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;

    fn test_file() -> FileRef {
        let fs = RamFs::new();
        let root = crate::fs::ramfs::root(&fs);
        FileT::new(root, OpenFlags::READ | OpenFlags::WRITE)
    }

    #[test]
    fn get_empty_fd_finds_lowest_free_slot() {
        let mut fds = FdTable::new();
        fds.install(0, test_file());
        assert_eq!(fds.get_empty_fd().unwrap(), 1);
    }

    #[test]
    fn table_full_of_fds_reports_emfile() {
        let mut fds = FdTable::new();
        for fd in 0..NFILES {
            fds.install(fd, test_file());
        }
        assert_eq!(fds.get_empty_fd(), Err(Errno::EMFILE));
    }

    #[test]
    fn dup_checks_emfile_unlike_the_original() {
        let mut fds = FdTable::new();
        for fd in 0..NFILES {
            fds.install(fd, test_file());
        }
        assert_eq!(do_dup(&mut fds, 0), Err(Errno::EMFILE));
    }

    #[test]
    fn close_drops_refcount_by_two_net_minus_one() {
        let f = test_file();
        assert_eq!(f.refcount(), 1);
        let mut fds = FdTable::new();
        fds.install(3, fget(&f));
        assert_eq!(f.refcount(), 2);
        do_close(&mut fds, 3).unwrap();
        assert_eq!(f.refcount(), 1, "do_close nets -1: starts at 2, one fput from get(), one from clear()");
        assert!(!fds.is_open(3));
    }

    #[test]
    fn close_of_unopened_fd_is_ebadf() {
        let mut fds = FdTable::new();
        assert_eq!(do_close(&mut fds, 5), Err(Errno::EBADF));
    }

    #[test]
    fn dup_table_gives_every_open_fd_its_own_extra_reference() {
        let f = test_file();
        let mut fds = FdTable::new();
        fds.install(0, fget(&f));
        assert_eq!(f.refcount(), 2);
        let _cloned = fds.dup_table();
        assert_eq!(f.refcount(), 3);
    }
}
