//! Kernel-wide sizing constants.
//!
//! Collected in one place instead of scattered literals so the scheduler,
//! process table, VFS and VM subsystems agree on the same numbers.

/// Number of open file descriptors a process may hold at once.
pub const NFILES: usize = 32;

/// Maximum length of a single path component.
pub const NAME_LEN: usize = 256;

/// Maximum number of path components `dir_namev` will walk before giving up.
pub const MAXPATHLEN: usize = 1024;

/// Upper bound on live processes. Pids are recycled below this ceiling.
pub const PROC_MAX_COUNT: usize = 256;

/// Reserved pid of the idle process (never scheduled away from if nothing
/// else is runnable).
pub const PID_IDLE: u64 = 0;

/// Reserved pid of the init process. Orphaned children are reparented here.
pub const PID_INIT: u64 = 1;

/// Page size in bytes for every vmmap/mmobj computation.
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: u32 = 12;

/// Lowest and highest canonical user-space addresses a vmmap may place
/// vmareas in (exclusive of the kernel's own mapping).
pub const USER_MEM_LOW: usize = 0x0000_0000_1000;
pub const USER_MEM_HIGH: usize = 0x0000_7FFF_FFFF_F000;

/// Start address of a fresh process's heap vma, before any `brk` growth.
/// Placed well above a nominal text/data load range, leaving room below
/// the stack.
pub const USER_HEAP_START: usize = 0x0000_0040_0000;

pub const fn addr_to_pn(addr: usize) -> usize {
    addr >> PAGE_SHIFT
}

pub const fn pn_to_addr(pn: usize) -> usize {
    pn << PAGE_SHIFT
}

pub const fn page_align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

pub const fn page_align_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub const fn is_page_aligned(addr: usize) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}
