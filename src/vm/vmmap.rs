//! `vmmap_t` — the ordered, non-overlapping list of virtual memory areas
//! that makes up one process's address space, plus the page-granular
//! `find_range`/`insert`/`remove`/`clone`/`read`/`write` operations every
//! higher-level policy (`brk`, `mmap`, `fork`, the page-fault handler)
//! builds on.
//!
//! Addresses are tracked in page numbers, not bytes, throughout — matching
//! the `vmarea_t` fields (`vma_start`/`vma_end`/`vma_off` all "in
//! pages").

use alloc::vec::Vec;

use crate::arch::{Platform, PageTable, MapFlags};
use crate::config::{self, PAGE_SIZE};
use crate::error::{Errno, KResult};
use crate::vm::mmobj::{self, MmObj};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u32 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const EXEC  = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapType {
    Shared,
    Private,
}

/// Direction `find_range` searches in, matching the original's `VMMAP_DIR_HI`
/// (search downward from the top of the address space, used by `mmap`'s
/// default placement) and `VMMAP_DIR_LO` (search upward, used by `brk`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Hi,
    Lo,
}

pub struct Vma {
    pub id: u64,
    pub start: usize,
    pub end: usize,
    pub off: usize,
    pub prot: Prot,
    pub map_type: MapType,
    pub obj: MmObj,
}

impl Vma {
    pub fn npages(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, pn: usize) -> bool {
        pn >= self.start && pn < self.end
    }
}

pub struct VmMap {
    pub pt: PageTable,
    vmas: Vec<Vma>,
    next_vma_id: u64,
    lopage: usize,
    hipage: usize,
}

impl VmMap {
    pub fn new(platform: &dyn Platform) -> Self {
        VmMap {
            pt: platform.new_page_table(),
            vmas: Vec::new(),
            next_vma_id: 1,
            lopage: config::addr_to_pn(config::USER_MEM_LOW),
            hipage: config::addr_to_pn(config::USER_MEM_HIGH),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.vmas.iter()
    }

    pub fn lookup(&self, pn: usize) -> Option<&Vma> {
        self.vmas.iter().find(|v| v.contains(pn))
    }

    pub fn lookup_addr(&self, addr: usize) -> Option<&Vma> {
        self.lookup(config::addr_to_pn(addr))
    }

    /// `vmmap_is_range_empty`: true if no vma overlaps `[start, end)`.
    pub fn is_range_empty(&self, start: usize, end: usize) -> bool {
        !self.vmas.iter().any(|v| v.start < end && start < v.end)
    }

    /// `vmmap_find_range`: first-fit search for `npages` contiguous free
    /// pages, scanning from the top of the address space down (`Hi`, for
    /// `mmap`'s default placement) or from the bottom up (`Lo`, for `brk`'s
    /// heap growth).
    pub fn find_range(&self, npages: usize, dir: Direction) -> Option<usize> {
        if npages == 0 || npages > self.hipage - self.lopage {
            return None;
        }
        let mut sorted: Vec<&Vma> = self.vmas.iter().collect();
        sorted.sort_by_key(|v| v.start);

        match dir {
            Direction::Lo => {
                let mut candidate = self.lopage;
                for v in &sorted {
                    if v.start >= candidate + npages {
                        break;
                    }
                    if v.start < candidate + npages {
                        candidate = candidate.max(v.end);
                    }
                }
                if candidate + npages <= self.hipage {
                    Some(candidate)
                } else {
                    None
                }
            }
            Direction::Hi => {
                let mut candidate = self.hipage - npages;
                for v in sorted.iter().rev() {
                    if v.end <= candidate {
                        break;
                    }
                    if v.start < candidate + npages {
                        if v.start < npages {
                            return None;
                        }
                        candidate = v.start - npages;
                    }
                }
                if candidate >= self.lopage {
                    Some(candidate)
                } else {
                    None
                }
            }
        }
    }

    /// `vmmap_insert`: inserts `vma`, keeping the list ordered by `start`.
    /// Precondition (debug-checked): the range is actually free.
    pub fn insert(&mut self, mut vma: Vma) -> u64 {
        debug_assert!(self.is_range_empty(vma.start, vma.end), "vmmap_insert: overlapping vma");
        vma.id = self.next_vma_id;
        self.next_vma_id += 1;
        let id = vma.id;
        mmobj::mmobj_root_vma(&vma.obj.bottom(), id);
        let pos = self.vmas.iter().position(|v| v.start > vma.start).unwrap_or(self.vmas.len());
        self.vmas.insert(pos, vma);
        id
    }

    /// `vmmap_map`: allocates an anonymous or file-backed mmobj, finds
    /// placement for `dir` when `addr` is `None`, and inserts the vma.
    /// Returns the chosen starting page number.
    pub fn map(
        &mut self,
        platform: &dyn Platform,
        addr: Option<usize>,
        npages: usize,
        prot: Prot,
        map_type: MapType,
        obj: MmObj,
        off: usize,
        dir: Direction,
    ) -> KResult<usize> {
        let start = match addr {
            Some(a) => {
                if !self.is_range_empty(a, a + npages) {
                    return Err(Errno::EINVAL);
                }
                a
            }
            None => self.find_range(npages, dir).ok_or(Errno::ENOMEM)?,
        };
        let _ = platform;
        self.insert(Vma { id: 0, start, end: start + npages, off, prot, map_type, obj });
        Ok(start)
    }

    /// Grows the vma starting at `start_pn` in place to end at `new_end`,
    /// used by `brk` to extend the heap without disturbing its mmobj or
    /// offset. Precondition (debug-checked): `[old_end, new_end)` is free.
    pub fn grow_vma_end(&mut self, start_pn: usize, new_end: usize) {
        let old_end = self.vmas.iter().find(|v| v.start == start_pn).map(|v| v.end);
        debug_assert!(
            old_end.map(|e| new_end >= e).unwrap_or(false),
            "grow_vma_end: no such vma, or new_end shrinks it"
        );
        if let Some(v) = self.vmas.iter_mut().find(|v| v.start == start_pn) {
            v.end = new_end;
        }
    }

    /// `vmmap_remove`: unmaps `[start, end)`, handling the shrink-from-left,
    /// shrink-from-right, split-in-two and engulf-whole-vma cases. Puts the
    /// mmobj reference for any vma entirely consumed.
    pub fn remove(&mut self, platform: &dyn Platform, start: usize, end: usize) {
        platform.unmap_range(self.pt, config::pn_to_addr(start), config::pn_to_addr(end));

        let mut kept = Vec::new();
        let mut to_put = Vec::new();
        for v in core::mem::take(&mut self.vmas) {
            if v.end <= start || v.start >= end {
                kept.push(v);
                continue;
            }
            if v.start >= start && v.end <= end {
                to_put.push((v.id, v.obj.clone()));
                continue;
            }
            if v.start < start && v.end > end {
                // split: left half keeps the object and id, right half is a
                // new vma with a fresh logical reference to the same object
                // at an adjusted offset.
                mmobj::mmobj_ref(&v.obj);
                let right_id = self.next_vma_id;
                self.next_vma_id += 1;
                mmobj::mmobj_root_vma(&v.obj.bottom(), right_id);
                let right = Vma {
                    id: right_id,
                    start: end,
                    end: v.end,
                    off: v.off + (end - v.start),
                    prot: v.prot,
                    map_type: v.map_type,
                    obj: v.obj.clone(),
                };
                kept.push(Vma { id: v.id, start: v.start, end: start, off: v.off, prot: v.prot, map_type: v.map_type, obj: v.obj });
                kept.push(right);
                continue;
            }
            if v.start < start {
                // shrink from the right
                kept.push(Vma { id: v.id, start: v.start, end: start, off: v.off, prot: v.prot, map_type: v.map_type, obj: v.obj });
                continue;
            }
            // shrink from the left
            let shift = end - v.start;
            kept.push(Vma { id: v.id, start: end, end: v.end, off: v.off + shift, prot: v.prot, map_type: v.map_type, obj: v.obj });
        }
        kept.sort_by_key(|v| v.start);
        self.vmas = kept;
        for (id, obj) in to_put {
            mmobj::mmobj_unroot_vma(&obj.bottom(), id);
            mmobj::mmobj_put(platform, obj);
        }
    }

    /// Swaps the backing object of the vma identified by `vma_id`, releasing
    /// the object it previously held. Used by `do_fork` to re-root a private
    /// vma's parent side onto a freshly created shadow object after the
    /// child's own shadow has been spliced in underneath it.
    pub fn set_vma_obj(&mut self, platform: &dyn Platform, vma_id: u64, obj: MmObj) {
        if let Some(v) = self.vmas.iter_mut().find(|v| v.id == vma_id) {
            mmobj::mmobj_root_vma(&obj.bottom(), vma_id);
            let old = core::mem::replace(&mut v.obj, obj);
            mmobj::mmobj_unroot_vma(&old.bottom(), vma_id);
            mmobj::mmobj_put(platform, old);
        }
    }

    /// Tears down every vma in the map, releasing all mmobj references and
    /// unmapping the whole range. Used by `proc_cleanup` when a process
    /// exits; the `VmMap` itself is dropped (and its page table destroyed)
    /// right after by the caller.
    pub fn destroy(&mut self, platform: &dyn Platform) {
        let lo = self.lopage;
        let hi = self.hipage;
        self.remove(platform, lo, hi);
    }

    /// `vmmap_clone`: used by `fork`. Copies every vma's extent/protection
    /// but never the underlying mmobj directly — callers pair this with
    /// shadow-object insertion so parent and child each get their own
    /// private view.
    pub fn clone_shape(&self, platform: &dyn Platform) -> VmMap {
        VmMap {
            pt: platform.new_page_table(),
            vmas: Vec::new(),
            next_vma_id: self.next_vma_id,
            lopage: self.lopage,
            hipage: self.hipage,
        }
    }

    /// Forces CoW by looking up (and, if necessary, materializing) the page
    /// backing `addr`, then copies `buf.len()` bytes starting at the
    /// in-page offset. Used by both the page-fault handler's install step
    /// and any kernel-side reader of user memory.
    pub fn write(&self, platform: &dyn Platform, addr: usize, buf: &[u8]) -> KResult<()> {
        self.access(platform, addr, buf.len(), true, |frame, foff, n, buf_off| {
            platform.write_frame(frame, foff, &buf[buf_off..buf_off + n]);
        })
    }

    pub fn read(&self, platform: &dyn Platform, addr: usize, buf: &mut [u8]) -> KResult<()> {
        let len = buf.len();
        let ptr = buf.as_mut_ptr();
        self.access(platform, addr, len, false, |frame, foff, n, buf_off| {
            // SAFETY: each (buf_off, n) region visited is disjoint and
            // within `buf`'s original bounds; `access` drives this closure
            // sequentially over strictly increasing offsets.
            let dst = unsafe { core::slice::from_raw_parts_mut(ptr.add(buf_off), n) };
            platform.read_frame(frame, foff, dst);
        })
    }

    fn access(
        &self,
        platform: &dyn Platform,
        addr: usize,
        len: usize,
        forwrite: bool,
        mut each: impl FnMut(crate::arch::Frame, usize, usize, usize),
    ) -> KResult<()> {
        let mut remaining = len;
        let mut cur = addr;
        let mut buf_off = 0usize;
        while remaining > 0 {
            let pn = config::addr_to_pn(cur);
            let vma = self.lookup(pn).ok_or(Errno::EFAULT)?;
            if forwrite && !vma.prot.contains(Prot::WRITE) {
                return Err(Errno::EFAULT);
            }
            let obj_pn = vma.off + (pn - vma.start);
            let pf = mmobj::pframe_lookup(platform, &vma.obj, obj_pn, forwrite)?;
            if forwrite {
                mmobj::mmobj_dirtypage(&vma.obj, obj_pn);
            }
            let in_page = cur % PAGE_SIZE;
            let n = (PAGE_SIZE - in_page).min(remaining);
            each(pf.frame, in_page, n, buf_off);
            cur += n;
            buf_off += n;
            remaining -= n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::SimPlatform;
    use crate::vm::mmobj::anon_create;

    fn map_with(vm: &mut VmMap, p: &SimPlatform, start: usize, pages: usize, prot: Prot) {
        vm.map(p, Some(start), pages, prot, MapType::Private, anon_create(), 0, Direction::Lo).unwrap();
    }

    #[test]
    fn find_range_lo_skips_existing_vmas() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        map_with(&mut vm, &p, vm.lopage, 4, Prot::READ | Prot::WRITE);
        let found = vm.find_range(2, Direction::Lo).unwrap();
        assert_eq!(found, vm.lopage + 4);
    }

    #[test]
    fn insert_rejects_overlap_in_debug() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        map_with(&mut vm, &p, vm.lopage, 4, Prot::READ | Prot::WRITE);
        assert!(!vm.is_range_empty(vm.lopage, vm.lopage + 1));
        assert!(vm.is_range_empty(vm.lopage + 4, vm.lopage + 5));
    }

    #[test]
    fn remove_splits_a_vma_spanning_the_removed_range() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        map_with(&mut vm, &p, 10, 10, Prot::READ | Prot::WRITE); // [10, 20)
        vm.remove(&p, 13, 15); // carve a hole in the middle

        let mut starts: Vec<usize> = vm.iter().map(|v| v.start).collect();
        starts.sort();
        assert_eq!(starts, alloc::vec![10, 15]);
        assert!(vm.is_range_empty(13, 15));
    }

    #[test]
    fn remove_shrinks_from_either_edge() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        map_with(&mut vm, &p, 10, 10, Prot::READ | Prot::WRITE); // [10, 20)
        vm.remove(&p, 18, 20); // shrink from the right
        assert_eq!(vm.iter().next().unwrap().end, 18);
        vm.remove(&p, 10, 12); // shrink from the left
        assert_eq!(vm.iter().next().unwrap().start, 12);
    }

    #[test]
    fn write_then_read_round_trips_through_page_fault_style_lookup() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        let start_pn = vm.lopage;
        map_with(&mut vm, &p, start_pn, 1, Prot::READ | Prot::WRITE);
        let addr = config::pn_to_addr(start_pn) + 10;

        vm.write(&p, addr, b"hi").unwrap();
        let mut buf = [0u8; 2];
        vm.read(&p, addr, &mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn write_to_read_only_vma_faults() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        map_with(&mut vm, &p, vm.lopage, 1, Prot::READ);
        let addr = config::pn_to_addr(vm.lopage);
        assert_eq!(vm.write(&p, addr, b"x"), Err(Errno::EFAULT));
    }

    #[test]
    fn access_outside_any_vma_faults() {
        let p = SimPlatform::new();
        let vm = VmMap::new(&p);
        let mut buf = [0u8; 1];
        assert_eq!(vm.read(&p, config::pn_to_addr(vm.lopage), &mut buf), Err(Errno::EFAULT));
    }
}
