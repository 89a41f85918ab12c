//! Page-fault handling: the only place a user memory access actually causes
//! a page to become resident and mapped into hardware page tables.
//!
//! vma lookup, protection check, mmobj-relative page number, `pframe_lookup`,
//! then install. A fault this function cannot resolve is reported back to
//! the caller as `EFAULT`; killing the process on such a fault belongs to
//! `proc`/exit handling, not here.

use crate::arch::{MapFlags, Platform};
use crate::config::{self, PAGE_SIZE};
use crate::error::{Errno, KResult};
use crate::vm::mmobj;
use crate::vm::vmmap::{Prot, VmMap};

#[derive(Debug, Clone, Copy)]
pub struct FaultCause {
    pub write: bool,
    pub present: bool,
}

/// Resolves a fault at `addr`, installing a mapping in `vm`'s page table on
/// success.
pub fn handle_page_fault(vm: &VmMap, platform: &dyn Platform, addr: usize, cause: FaultCause) -> KResult<()> {
    let pn = config::addr_to_pn(addr);
    let vma = vm.lookup(pn).ok_or(Errno::EFAULT)?;

    if cause.write && !vma.prot.contains(Prot::WRITE) {
        return Err(Errno::EFAULT);
    }
    if !cause.write && !vma.prot.contains(Prot::READ) {
        return Err(Errno::EFAULT);
    }

    let obj_pn = vma.off + (pn - vma.start);
    let pf = mmobj::pframe_lookup(platform, &vma.obj, obj_pn, cause.write)?;
    if cause.write {
        mmobj::mmobj_dirtypage(&vma.obj, obj_pn);
    }

    let mut flags = MapFlags::USER;
    if vma.prot.contains(Prot::WRITE) {
        flags |= MapFlags::WRITABLE;
    }
    let page_addr = config::pn_to_addr(pn);
    platform.map(vm.pt, page_addr, pf.frame, flags)?;
    platform.flush_tlb_all();
    let _ = PAGE_SIZE;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::SimPlatform;
    use crate::vm::mmobj::anon_create;
    use crate::vm::vmmap::{Direction, MapType};

    #[test]
    fn read_fault_on_valid_vma_maps_a_zero_filled_page() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        let pn = vm.map(&p, None, 1, Prot::READ | Prot::WRITE, MapType::Private, anon_create(), 0, Direction::Lo).unwrap();
        let addr = config::pn_to_addr(pn);

        handle_page_fault(&vm, &p, addr, FaultCause { write: false, present: false }).unwrap();
        assert!(p.translate(vm.pt, addr).is_some());
    }

    #[test]
    fn fault_outside_any_vma_is_efault() {
        let p = SimPlatform::new();
        let vm = VmMap::new(&p);
        let addr = config::pn_to_addr(vm.iter().next().map(|v| v.start).unwrap_or(100));
        assert_eq!(
            handle_page_fault(&vm, &p, addr, FaultCause { write: false, present: false }),
            Err(Errno::EFAULT)
        );
    }

    #[test]
    fn write_fault_on_read_only_vma_is_efault() {
        let p = SimPlatform::new();
        let mut vm = VmMap::new(&p);
        let start = vm.map(&p, None, 1, Prot::READ, MapType::Private, anon_create(), 0, Direction::Lo).unwrap();
        let addr = config::pn_to_addr(start);
        assert_eq!(
            handle_page_fault(&vm, &p, addr, FaultCause { write: true, present: false }),
            Err(Errno::EFAULT)
        );
    }
}
