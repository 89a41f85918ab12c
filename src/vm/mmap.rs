//! `do_mmap`/`do_munmap`: the user-facing mapping syscalls, layered on top
//! of `VmMap::map`/`VmMap::remove` and the mmobj constructors.
//!
//! `MAP_PRIVATE` always
//! wraps the backing object (anonymous or file) in a fresh shadow so writes
//! never escape to the file or to another mapping of the same object;
//! `MAP_SHARED` maps the backing object directly.

use crate::arch::Platform;
use crate::config::{self, PAGE_SIZE};
use crate::error::{Errno, KResult};
use crate::fs::file::{FileT, OpenFlags};
use crate::vm::mmobj::{self, anon_create, file_create};
use crate::vm::vmmap::{Direction, MapType, Prot, VmMap};

pub fn do_mmap(
    vm: &mut VmMap,
    platform: &dyn Platform,
    addr: Option<usize>,
    len: usize,
    prot: Prot,
    map_type: MapType,
    file: Option<&FileT>,
    off_bytes: usize,
) -> KResult<usize> {
    if len == 0 {
        return Err(Errno::EINVAL);
    }
    if !config::is_page_aligned(off_bytes) {
        return Err(Errno::EINVAL);
    }
    if let Some(f) = file {
        if prot.contains(Prot::WRITE) && !f.flags.contains(OpenFlags::WRITE) {
            return Err(Errno::EPERM);
        }
    }
    let npages = config::addr_to_pn(config::page_align_up(len));
    let addr_pn = addr.map(config::addr_to_pn);

    let off_pages = off_bytes / PAGE_SIZE;
    let obj = match file {
        Some(f) => {
            let base = file_create(f.vnode.clone(), off_pages);
            match map_type {
                MapType::Shared => base,
                MapType::Private => mmobj::shadow_create(base),
            }
        }
        None => anon_create(),
    };

    let start = vm.map(platform, addr_pn, npages, prot, map_type, obj, 0, Direction::Hi)?;
    Ok(config::pn_to_addr(start))
}

pub fn do_munmap(vm: &mut VmMap, platform: &dyn Platform, addr: usize, len: usize) -> KResult<()> {
    if len == 0 || !config::is_page_aligned(addr) {
        return Err(Errno::EINVAL);
    }
    let start_pn = config::addr_to_pn(addr);
    let end_pn = config::addr_to_pn(config::page_align_up(len)) + start_pn;
    vm.remove(platform, start_pn, end_pn);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::SimPlatform;

    #[test]
    fn mmap_anon_then_munmap_round_trips() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        let addr = do_mmap(&mut vm, &p, None, PAGE_SIZE, Prot::READ | Prot::WRITE, MapType::Private, None, 0).unwrap();
        assert!(vm.lookup_addr(addr).is_some());
        do_munmap(&mut vm, &p, addr, PAGE_SIZE).unwrap();
        assert!(vm.lookup_addr(addr).is_none());
    }

    #[test]
    fn mmap_rejects_unaligned_offset() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        assert_eq!(
            do_mmap(&mut vm, &p, None, PAGE_SIZE, Prot::READ, MapType::Private, None, 7),
            Err(Errno::EINVAL)
        );
    }

    #[test]
    fn mmap_zero_length_is_rejected() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        assert_eq!(do_mmap(&mut vm, &p, None, 0, Prot::READ, MapType::Private, None, 0), Err(Errno::EINVAL));
    }

    #[test]
    fn mmap_write_against_a_read_only_file_is_rejected() {
        use crate::fs::ramfs::{root, RamFs};

        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        let fs = RamFs::new();
        let vnode = root(&fs);
        let file = FileT::new(vnode, OpenFlags::READ);
        assert_eq!(
            do_mmap(&mut vm, &p, None, PAGE_SIZE, Prot::READ | Prot::WRITE, MapType::Private, Some(&*file), 0),
            Err(Errno::EPERM)
        );
    }
}
