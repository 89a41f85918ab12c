//! Seam between the subsystems this crate implements (scheduler, process
//! table, virtual memory, VFS) and the hardware collaborators that are
//! explicitly out of scope: context switching, page table manipulation,
//! physical frame allocation and TLB control.
//!
//! Every subsystem above this module talks to physical memory and page
//! tables only through the [`Platform`] trait. The real kernel binary wires
//! it to [`x86`] (built on the existing `memory::paging` /
//! `memory::frame_allocator` code); `#[cfg(test)]` builds use [`sim`]
//! instead, so vmmap/CoW/VFS logic can run as ordinary host tests.

#[cfg(not(test))]
pub mod x86;
#[cfg(test)]
pub mod sim;

use crate::error::{Errno, KResult};

/// Opaque handle to one physical page frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame(pub u64);

/// Opaque handle to one hardware page table (one per process address space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageTable(pub u64);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const WRITABLE = 0b0001;
        const USER     = 0b0010;
    }
}

/// Physical-memory and page-table collaborator. See module docs.
pub trait Platform: Send + Sync {
    fn alloc_frame(&self) -> KResult<Frame>;
    fn free_frame(&self, frame: Frame);

    fn zero_frame(&self, frame: Frame);
    fn copy_frame(&self, src: Frame, dst: Frame);
    fn read_frame(&self, frame: Frame, offset: usize, buf: &mut [u8]);
    fn write_frame(&self, frame: Frame, offset: usize, buf: &[u8]);

    fn new_page_table(&self) -> PageTable;
    fn destroy_page_table(&self, pt: PageTable);
    /// Shallow-clone a page table's mappings (used by `fork`; the caller is
    /// responsible for re-mapping private regions copy-on-write afterwards).
    fn clone_page_table(&self, src: PageTable) -> PageTable;

    fn map(&self, pt: PageTable, vaddr: usize, frame: Frame, flags: MapFlags) -> KResult<()>;
    fn unmap(&self, pt: PageTable, vaddr: usize);
    fn unmap_range(&self, pt: PageTable, start: usize, end: usize);
    fn translate(&self, pt: PageTable, vaddr: usize) -> Option<Frame>;

    fn flush_tlb_all(&self);
}

pub fn page_size() -> usize {
    crate::config::PAGE_SIZE
}

pub const ENOMEM: Errno = Errno::ENOMEM;
