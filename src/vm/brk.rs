//! `do_brk`: grows or shrinks the single heap vma every process has,
//! immediately following its `start_brk` page.
//!
//! The heap occupies exactly one vma for the whole lifetime of the process;
//! `do_brk` never creates a second one — growth extends the existing vma's
//! end, shrinkage calls `vmmap_remove` on the freed tail, and nothing else
//! in the kernel is allowed to carve a hole out of the middle of it.

use crate::arch::Platform;
use crate::config::{self, PAGE_SIZE};
use crate::error::{Errno, KResult};
use crate::vm::mmobj::anon_create;
use crate::vm::vmmap::{Direction, MapType, Prot, VmMap};

/// Process-side heap bookkeeping; `Process` owns one of these alongside its
/// `VmMap`.
pub struct Heap {
    pub start_brk: usize,
    pub brk: usize,
}

impl Heap {
    pub fn new(start_brk: usize) -> Self {
        Heap { start_brk, brk: start_brk }
    }
}

/// Sets the break to `new_brk`, creating the heap vma on first growth from
/// empty and resizing it afterward. `None` just reports the current break.
/// Shrinking below `start_brk` is `ENOMEM`.
pub fn do_brk(heap: &mut Heap, vm: &mut VmMap, platform: &dyn Platform, new_brk: Option<usize>) -> KResult<usize> {
    let new_brk = match new_brk {
        Some(addr) => addr,
        None => return Ok(heap.brk),
    };
    if new_brk < heap.start_brk {
        return Err(Errno::ENOMEM);
    }
    if new_brk == heap.brk {
        return Ok(heap.brk);
    }

    let start_pn = config::addr_to_pn(config::page_align_down(heap.start_brk));
    let old_end_pn = config::addr_to_pn(config::page_align_up(heap.brk));
    let new_end_pn = config::addr_to_pn(config::page_align_up(new_brk));

    if new_end_pn > old_end_pn {
        if heap.brk == heap.start_brk {
            // First growth: no heap vma exists yet, create it.
            if !vm.is_range_empty(start_pn, new_end_pn) {
                return Err(Errno::ENOMEM);
            }
            vm.map(
                platform,
                Some(start_pn),
                new_end_pn - start_pn,
                Prot::READ | Prot::WRITE,
                MapType::Private,
                anon_create(),
                0,
                Direction::Lo,
            )?;
        } else if !vm.is_range_empty(old_end_pn, new_end_pn) {
            return Err(Errno::ENOMEM);
        } else {
            vm.grow_vma_end(start_pn, new_end_pn);
        }
    } else if new_end_pn < old_end_pn {
        vm.remove(platform, new_end_pn, old_end_pn);
    }

    heap.brk = new_brk;
    let _ = PAGE_SIZE;
    Ok(heap.brk)
}
