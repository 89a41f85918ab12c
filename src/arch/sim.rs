//! Host-testable stand-in for the real page table / frame allocator.
//!
//! Backs physical frames with plain `Vec<u8>` pages and page tables with a
//! `BTreeMap`, so the vmmap/CoW/page-fault logic can be driven end to end
//! under `cargo test` without real hardware.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Frame, MapFlags, PageTable, Platform};
use crate::config::PAGE_SIZE;
use crate::error::{Errno, KResult};

struct Mapping {
    frame: Frame,
    flags: MapFlags,
}

pub struct SimPlatform {
    frames: Mutex<BTreeMap<u64, [u8; PAGE_SIZE]>>,
    next_frame: Mutex<u64>,
    tables: Mutex<BTreeMap<u64, BTreeMap<usize, Mapping>>>,
    next_table: Mutex<u64>,
}

impl SimPlatform {
    pub fn new() -> Self {
        SimPlatform {
            frames: Mutex::new(BTreeMap::new()),
            next_frame: Mutex::new(1),
            tables: Mutex::new(BTreeMap::new()),
            next_table: Mutex::new(1),
        }
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    fn alloc_frame(&self) -> KResult<Frame> {
        let mut next = self.next_frame.lock().unwrap();
        let id = *next;
        *next += 1;
        self.frames.lock().unwrap().insert(id, [0u8; PAGE_SIZE]);
        Ok(Frame(id))
    }

    fn free_frame(&self, frame: Frame) {
        self.frames.lock().unwrap().remove(&frame.0);
    }

    fn zero_frame(&self, frame: Frame) {
        if let Some(page) = self.frames.lock().unwrap().get_mut(&frame.0) {
            page.fill(0);
        }
    }

    fn copy_frame(&self, src: Frame, dst: Frame) {
        let mut frames = self.frames.lock().unwrap();
        let data = *frames.get(&src.0).expect("copy_frame: missing src frame");
        frames.insert(dst.0, data);
    }

    fn read_frame(&self, frame: Frame, offset: usize, buf: &mut [u8]) {
        let frames = self.frames.lock().unwrap();
        let page = frames.get(&frame.0).expect("read_frame: missing frame");
        let end = (offset + buf.len()).min(PAGE_SIZE);
        let n = end.saturating_sub(offset);
        buf[..n].copy_from_slice(&page[offset..offset + n]);
    }

    fn write_frame(&self, frame: Frame, offset: usize, buf: &[u8]) {
        let mut frames = self.frames.lock().unwrap();
        let page = frames.get_mut(&frame.0).expect("write_frame: missing frame");
        let end = (offset + buf.len()).min(PAGE_SIZE);
        let n = end.saturating_sub(offset);
        page[offset..offset + n].copy_from_slice(&buf[..n]);
    }

    fn new_page_table(&self) -> PageTable {
        let mut next = self.next_table.lock().unwrap();
        let id = *next;
        *next += 1;
        self.tables.lock().unwrap().insert(id, BTreeMap::new());
        PageTable(id)
    }

    fn destroy_page_table(&self, pt: PageTable) {
        self.tables.lock().unwrap().remove(&pt.0);
    }

    fn clone_page_table(&self, src: PageTable) -> PageTable {
        let new = self.new_page_table();
        let mut tables = self.tables.lock().unwrap();
        let src_map = tables.get(&src.0).expect("clone_page_table: missing src").clone();
        tables.insert(new.0, src_map);
        new
    }

    fn map(&self, pt: PageTable, vaddr: usize, frame: Frame, flags: MapFlags) -> KResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.get_mut(&pt.0).ok_or(Errno::EFAULT)?;
        table.insert(vaddr, Mapping { frame, flags });
        Ok(())
    }

    fn unmap(&self, pt: PageTable, vaddr: usize) {
        if let Some(table) = self.tables.lock().unwrap().get_mut(&pt.0) {
            table.remove(&vaddr);
        }
    }

    fn unmap_range(&self, pt: PageTable, start: usize, end: usize) {
        if let Some(table) = self.tables.lock().unwrap().get_mut(&pt.0) {
            table.retain(|&addr, _| addr < start || addr >= end);
        }
    }

    fn translate(&self, pt: PageTable, vaddr: usize) -> Option<Frame> {
        self.tables
            .lock()
            .unwrap()
            .get(&pt.0)
            .and_then(|table| table.get(&vaddr))
            .map(|m| m.frame)
    }

    fn flush_tlb_all(&self) {}
}

impl Clone for Mapping {
    fn clone(&self) -> Self {
        Mapping { frame: self.frame, flags: self.flags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_write_frame_roundtrips() {
        let p = SimPlatform::new();
        let f = p.alloc_frame().unwrap();
        p.write_frame(f, 0, b"hello");
        let mut buf = [0u8; 5];
        p.read_frame(f, 0, &mut buf);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn copy_frame_duplicates_contents_independently() {
        let p = SimPlatform::new();
        let a = p.alloc_frame().unwrap();
        let b = p.alloc_frame().unwrap();
        p.write_frame(a, 0, b"data");
        p.copy_frame(a, b);
        p.write_frame(a, 0, b"xxxx");
        let mut buf = [0u8; 4];
        p.read_frame(b, 0, &mut buf);
        assert_eq!(&buf, b"data");
    }

    #[test]
    fn map_unmap_and_translate() {
        let p = SimPlatform::new();
        let pt = p.new_page_table();
        let f = p.alloc_frame().unwrap();
        p.map(pt, 0x1000, f, MapFlags::WRITABLE | MapFlags::USER).unwrap();
        assert_eq!(p.translate(pt, 0x1000), Some(f));
        p.unmap(pt, 0x1000);
        assert_eq!(p.translate(pt, 0x1000), None);
    }

    #[test]
    fn clone_page_table_is_independent_afterwards() {
        let p = SimPlatform::new();
        let pt = p.new_page_table();
        let f = p.alloc_frame().unwrap();
        p.map(pt, 0x2000, f, MapFlags::USER).unwrap();
        let clone = p.clone_page_table(pt);
        assert_eq!(p.translate(clone, 0x2000), Some(f));
        p.unmap(pt, 0x2000);
        assert_eq!(p.translate(clone, 0x2000), Some(f));
    }
}
