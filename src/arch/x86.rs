//! Real x86_64 wiring of [`super::Platform`], built on the existing
//! multiboot2-driven frame allocator and the identity-mapped page tables
//! set up by `memory::paging`.
//!
//! Every physical frame is addressed at `PHYSICAL_MEMORY_OFFSET + phys`,
//! matching the identity mapping `memory::mod.rs` establishes at boot.

use core::ptr;

use lazy_static::lazy_static;
use spin::Mutex;
use x86_64::structures::paging::{
    FrameAllocator, Mapper, OffsetPageTable, Page, PageTable as X86PageTable, PageTableFlags,
    PhysFrame, Size4KiB,
};
use x86_64::{PhysAddr, VirtAddr};

use super::{Frame, MapFlags, PageTable, Platform};
use crate::config::PAGE_SIZE;
use crate::error::{Errno, KResult};
use crate::memory::frame_allocator::BumpFrameAllocator;
use crate::memory::FRAME_ALLOCATOR;

/// Physical memory is identity-mapped starting at this virtual offset (see
/// `memory::init`, which boots with `phys_mem_offset = 0`).
const PHYSICAL_MEMORY_OFFSET: u64 = 0;

fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new(phys.as_u64() + PHYSICAL_MEMORY_OFFSET)
}

/// Registry of live top-level page tables, addressed by their level-4 frame's
/// physical address. The scheduler/process layer only ever sees the opaque
/// [`PageTable`] id; this is where that id is resolved to a real `Mapper`.
pub struct X86Platform {
    tables: Mutex<alloc::collections::BTreeMap<u64, PhysFrame>>,
}

impl X86Platform {
    pub fn new() -> Self {
        X86Platform { tables: Mutex::new(alloc::collections::BTreeMap::new()) }
    }

    unsafe fn mapper_for(&self, l4_frame: PhysFrame) -> OffsetPageTable<'static> {
        let virt = phys_to_virt(l4_frame.start_address());
        let l4_table: &'static mut X86PageTable = &mut *virt.as_mut_ptr();
        OffsetPageTable::new(l4_table, VirtAddr::new(PHYSICAL_MEMORY_OFFSET))
    }

    fn resolve(&self, pt: PageTable) -> Option<PhysFrame> {
        self.tables.lock().get(&pt.0).copied()
    }
}

impl Default for X86Platform {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for X86Platform {}
unsafe impl Sync for X86Platform {}

impl Platform for X86Platform {
    fn alloc_frame(&self) -> KResult<Frame> {
        let mut alloc = FRAME_ALLOCATOR.lock();
        let frame: PhysFrame = FrameAllocator::<Size4KiB>::allocate_frame(&mut *alloc)
            .ok_or(Errno::ENOMEM)?;
        Ok(Frame(frame.start_address().as_u64()))
    }

    fn free_frame(&self, _frame: Frame) {
        // BumpFrameAllocator never reclaims; it's explicitly a placeholder
        // (see `memory::frame_allocator::BumpFrameAllocator`).
    }

    fn zero_frame(&self, frame: Frame) {
        let virt = phys_to_virt(PhysAddr::new(frame.0));
        unsafe { ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, PAGE_SIZE) };
    }

    fn copy_frame(&self, src: Frame, dst: Frame) {
        let src_virt = phys_to_virt(PhysAddr::new(src.0));
        let dst_virt = phys_to_virt(PhysAddr::new(dst.0));
        unsafe {
            ptr::copy_nonoverlapping(src_virt.as_ptr::<u8>(), dst_virt.as_mut_ptr::<u8>(), PAGE_SIZE);
        }
    }

    fn read_frame(&self, frame: Frame, offset: usize, buf: &mut [u8]) {
        let virt = phys_to_virt(PhysAddr::new(frame.0)) + offset as u64;
        let n = buf.len().min(PAGE_SIZE - offset);
        unsafe { ptr::copy_nonoverlapping(virt.as_ptr::<u8>(), buf.as_mut_ptr(), n) };
    }

    fn write_frame(&self, frame: Frame, offset: usize, buf: &[u8]) {
        let virt = phys_to_virt(PhysAddr::new(frame.0)) + offset as u64;
        let n = buf.len().min(PAGE_SIZE - offset);
        unsafe { ptr::copy_nonoverlapping(buf.as_ptr(), virt.as_mut_ptr::<u8>(), n) };
    }

    fn new_page_table(&self) -> PageTable {
        let mut alloc = FRAME_ALLOCATOR.lock();
        let l4_frame = FrameAllocator::<Size4KiB>::allocate_frame(&mut *alloc)
            .expect("out of physical memory allocating a page table");
        drop(alloc);

        let virt = phys_to_virt(l4_frame.start_address());
        unsafe {
            let table: &mut X86PageTable = &mut *virt.as_mut_ptr();
            table.zero();
        }

        let id = l4_frame.start_address().as_u64();
        self.tables.lock().insert(id, l4_frame);
        PageTable(id)
    }

    fn destroy_page_table(&self, pt: PageTable) {
        self.tables.lock().remove(&pt.0);
        // Leaf frames mapped by this table are released by the vmmap/mmobj
        // teardown path (vmmap_destroy), not here.
    }

    fn clone_page_table(&self, src: PageTable) -> PageTable {
        let new = self.new_page_table();
        let src_frame = self.resolve(src).expect("clone_page_table: unknown source");
        let new_frame = self.resolve(new).expect("just created");

        // Kernel half (upper entries) is shared by every address space;
        // userspace entries are re-populated page by page by the caller
        // (vmmap clone + CoW shadow insertion), so only the kernel half is
        // copied here.
        let src_virt = phys_to_virt(src_frame.start_address());
        let new_virt = phys_to_virt(new_frame.start_address());
        unsafe {
            let src_table: &X86PageTable = &*src_virt.as_ptr();
            let new_table: &mut X86PageTable = &mut *new_virt.as_mut_ptr();
            for i in 256..512 {
                new_table[i] = src_table[i].clone();
            }
        }
        new
    }

    fn map(&self, pt: PageTable, vaddr: usize, frame: Frame, flags: MapFlags) -> KResult<()> {
        let l4_frame = self.resolve(pt).ok_or(Errno::EFAULT)?;
        let mut mapper = unsafe { self.mapper_for(l4_frame) };
        let mut alloc = FRAME_ALLOCATOR.lock();

        let page: Page<Size4KiB> = Page::containing_address(VirtAddr::new(vaddr as u64));
        let phys_frame = PhysFrame::containing_address(PhysAddr::new(frame.0));

        let mut table_flags = PageTableFlags::PRESENT;
        if flags.contains(MapFlags::WRITABLE) {
            table_flags |= PageTableFlags::WRITABLE;
        }
        if flags.contains(MapFlags::USER) {
            table_flags |= PageTableFlags::USER_ACCESSIBLE;
        }

        unsafe {
            mapper
                .map_to(page, phys_frame, table_flags, &mut *alloc)
                .map_err(|_| Errno::ENOMEM)?
                .flush();
        }
        Ok(())
    }

    fn unmap(&self, pt: PageTable, vaddr: usize) {
        if let Some(l4_frame) = self.resolve(pt) {
            let mut mapper = unsafe { self.mapper_for(l4_frame) };
            let page: Page<Size4KiB> = Page::containing_address(VirtAddr::new(vaddr as u64));
            if let Ok((_, flush)) = mapper.unmap(page) {
                flush.flush();
            }
        }
    }

    fn unmap_range(&self, pt: PageTable, start: usize, end: usize) {
        let mut addr = crate::config::page_align_down(start);
        while addr < end {
            self.unmap(pt, addr);
            addr += PAGE_SIZE;
        }
    }

    fn translate(&self, pt: PageTable, vaddr: usize) -> Option<Frame> {
        let l4_frame = self.resolve(pt)?;
        let mapper = unsafe { self.mapper_for(l4_frame) };
        mapper
            .translate_page(Page::<Size4KiB>::containing_address(VirtAddr::new(vaddr as u64)))
            .ok()
            .map(|f| Frame(f.start_address().as_u64()))
    }

    fn flush_tlb_all(&self) {
        use x86_64::registers::control::Cr3;
        let (frame, flags) = Cr3::read();
        unsafe { Cr3::write(frame, flags) };
    }
}

// `BumpFrameAllocator` is already `FrameAllocator<Size4KiB>`; this mirrors
// `memory::mod.rs`'s use of the same global.
const _: fn() -> () = || {
    fn assert_frame_allocator<T: FrameAllocator<Size4KiB>>() {}
    assert_frame_allocator::<BumpFrameAllocator>();
};

lazy_static! {
    /// The single hardware `Platform` the real kernel binary runs against.
    /// `process`/`vm` code never references this directly — it goes through
    /// `process::platform()` so the exact same call sites work unmodified
    /// under `#[cfg(test)]` against `arch::sim::SimPlatform` instead.
    pub static ref PLATFORM: X86Platform = X86Platform::new();
}
