//! Virtual memory: memory objects (anonymous/shadow/file-backed), the
//! per-process vma list, page-fault handling, and the `brk`/`mmap` policy
//! layered on top of it.

pub mod brk;
pub mod mmap;
pub mod mmobj;
pub mod pagefault;
pub mod vmmap;
