//! Process lifecycle: `proc_create`, `fork`, `exit`/`proc_cleanup`, and
//! `waitpid`'s reap loop, built on top of the scheduler, vmmap/mmobj and VFS
//! primitives already implemented in their own modules.
//!
//! As with `sched::core::Scheduler`,
//! [`ProcessTable`]'s methods take their collaborators (`Scheduler`,
//! `Platform`) as explicit parameters rather than reaching for the globals
//! themselves, so the pid/parent/child bookkeeping and the fork CoW splice
//! can be driven directly by `#[test]` functions. The `lazy_static` globals
//! and the unsafe blocking wrappers around them (`do_waitpid`, real process
//! exit) live at the bottom of this file, mirroring `sched::mod`.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::arch::Platform;
use crate::config::{self, PID_IDLE, PID_INIT, PROC_MAX_COUNT};
use crate::error::{Errno, KResult};
use crate::fs::file::FdTable;
use crate::fs::vnode::{vput, vref, VnodeRef};
use crate::sched::core::Scheduler;
use crate::sched::queue::QueueId;
use crate::sched::thread::Tid;
use crate::sched::{self, TASK_STACK_SIZE};
use crate::vm::brk::Heap;
use crate::vm::mmobj::{self, MmObj};
use crate::vm::vmmap::{MapType, Vma, VmMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    Dead,
}

pub struct Process {
    pub pid: Pid,
    pub name: String,
    pub state: ProcState,
    pub exit_status: i32,
    pub parent: Option<Pid>,
    pub children: Vec<Pid>,
    pub tid: Tid,
    pub vmmap: VmMap,
    pub cwd: Option<VnodeRef>,
    pub fds: FdTable,
    pub heap: Heap,
    /// `p_wait`: threads (really, just this process's parent, since each
    /// process has a single thread) blocked in `waitpid` on one of this
    /// process's children becoming Dead.
    pub wait_queue: QueueId,
}

/// `pid == -1` vs. a specific child, matching `do_waitpid`'s two pid forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    AnyChild,
    Child(Pid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reaped(Pid, i32),
    NoneDeadYet,
}

pub struct ProcessTable {
    processes: BTreeMap<u64, Process>,
    next_pid_search: u64,
    initproc: Option<Pid>,
    current: Option<Pid>,
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable { processes: BTreeMap::new(), next_pid_search: 0, initproc: None, current: None }
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn set_current(&mut self, pid: Option<Pid>) {
        self.current = pid;
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid.0)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(&pid.0)
    }

    /// `_proc_getid`: rotating linear search starting from the last
    /// allocated pid, wrapping at `PROC_MAX_COUNT`. O(n) amortized when the
    /// pid space is sparse, worst case O(n^2) over live processes.
    fn alloc_pid(&mut self) -> KResult<u64> {
        for _ in 0..PROC_MAX_COUNT {
            let candidate = self.next_pid_search;
            self.next_pid_search = (self.next_pid_search + 1) % PROC_MAX_COUNT as u64;
            if !self.processes.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        // the Errno taxonomy (§7) has no EAGAIN/process-table-full
        // code; pid exhaustion is reported as ENOMEM (see DESIGN.md).
        Err(Errno::ENOMEM)
    }

    /// `proc_create`: allocates a pid, a fresh empty address space and fd
    /// table, and (for everything past init) a root-vnode cwd. Parent is
    /// always whatever `self.current` is — `None` only for the bootstrap
    /// idle process, created before any thread is running.
    pub fn proc_create(
        &mut self,
        name: &str,
        sched: &mut Scheduler,
        platform: &dyn Platform,
        root: Option<&VnodeRef>,
    ) -> KResult<Pid> {
        let pid = self.alloc_pid()?;
        assert!(pid != PID_IDLE || self.processes.is_empty(), "idle must be the first process created");
        assert!(
            pid != PID_INIT || self.current == Some(Pid(PID_IDLE)),
            "init must be created with the idle process as curproc"
        );

        let parent = self.current;
        let tid = sched.new_thread(pid, TASK_STACK_SIZE);
        let wait_queue = sched.alloc_queue();

        let cwd = if pid > PID_INIT { root.map(vref) } else { None };

        let proc = Process {
            pid: Pid(pid),
            name: String::from(name),
            state: ProcState::Running,
            exit_status: 0,
            parent,
            children: Vec::new(),
            tid,
            vmmap: VmMap::new(platform),
            cwd,
            fds: FdTable::new(),
            heap: Heap::new(config::USER_HEAP_START),
            wait_queue,
        };

        if pid == PID_INIT {
            self.initproc = Some(Pid(PID_INIT));
        }
        if let Some(ppid) = parent {
            if let Some(p) = self.processes.get_mut(&ppid.0) {
                p.children.push(Pid(pid));
            }
        }
        self.processes.insert(pid, proc);
        Ok(Pid(pid))
    }

    /// `do_fork`: clones `parent`'s address space vma-by-vma (splicing a
    /// fresh shadow under both sides of every Private vma, bumping the
    /// refcount once for every Shared vma), duplicates its fd table and cwd,
    /// clones its thread (the clone's `retval` starts at 0 — the forced
    /// child return value), and unmaps the parent's entire userspace range
    /// so both sides re-fault into their new per-vma objects.
    pub fn fork(&mut self, sched: &mut Scheduler, platform: &dyn Platform, parent_pid: Pid) -> KResult<Pid> {
        let child_pid_num = self.alloc_pid()?;

        let mut child_vm = {
            let parent = self.processes.get(&parent_pid.0).ok_or(Errno::EINVAL)?;
            parent.vmmap.clone_shape(platform)
        };

        let parent_vmas: Vec<(usize, usize, usize, crate::vm::vmmap::Prot, MapType, MmObj)> = self
            .processes
            .get(&parent_pid.0)
            .unwrap()
            .vmmap
            .iter()
            .map(|v| (v.start, v.end, v.off, v.prot, v.map_type, v.obj.clone()))
            .collect();

        for (start, end, off, prot, map_type, obj) in parent_vmas {
            // One fresh logical reference for the child's side, regardless
            // of map type (matches fork.c's unconditional top-of-loop `ref`).
            mmobj::mmobj_ref(&obj);

            let child_obj = match map_type {
                MapType::Shared => obj.clone(),
                MapType::Private => mmobj::shadow_create(obj.clone()),
            };
            let child_vma_id = child_vm.insert(Vma { id: 0, start, end, off, prot, map_type, obj: child_obj });

            if map_type == MapType::Private {
                // Re-root the parent's side onto its own fresh shadow so
                // neither parent nor child can write through to the other's
                // pages; `set_vma_obj` releases the parent's old direct
                // reference to `obj` as part of the swap.
                mmobj::mmobj_ref(&obj);
                let parent_shadow = mmobj::shadow_create(obj.clone());
                let parent_vma_id = self.processes.get(&parent_pid.0).unwrap().vmmap.lookup(start).unwrap().id;
                self.processes.get_mut(&parent_pid.0).unwrap().vmmap.set_vma_obj(platform, parent_vma_id, parent_shadow);
            }

            let _ = child_vma_id;
        }

        let (parent_cwd, parent_heap_start, parent_heap_brk, parent_pt) = {
            let parent = self.processes.get(&parent_pid.0).unwrap();
            (parent.cwd.as_ref().map(vref), parent.heap.start_brk, parent.heap.brk, parent.vmmap.pt)
        };

        let child_fds = self.processes.get_mut(&parent_pid.0).unwrap().fds.dup_table();

        let child_tid = sched.new_thread(child_pid_num, TASK_STACK_SIZE);
        let child_wait_queue = sched.alloc_queue();

        let child = Process {
            pid: Pid(child_pid_num),
            name: self.processes.get(&parent_pid.0).unwrap().name.clone(),
            state: ProcState::Running,
            exit_status: 0,
            parent: Some(parent_pid),
            children: Vec::new(),
            tid: child_tid,
            vmmap: child_vm,
            cwd: parent_cwd,
            fds: child_fds,
            heap: Heap { start_brk: parent_heap_start, brk: parent_heap_brk },
            wait_queue: child_wait_queue,
        };
        self.processes.insert(child_pid_num, child);
        if let Some(p) = self.processes.get_mut(&parent_pid.0) {
            p.children.push(Pid(child_pid_num));
        }

        // Forces both parent and child to re-fault and pick up their new
        // per-vma (shadow) objects under the new CoW protections.
        platform.unmap_range(parent_pt, config::USER_MEM_LOW, config::USER_MEM_HIGH);
        platform.flush_tlb_all();

        sched.make_runnable(child_tid);
        Ok(Pid(child_pid_num))
    }

    /// `proc_cleanup`: wakes the parent (if blocked in `waitpid`) before
    /// reparenting children, in that exact order, then releases every fd
    /// and the cwd and tears down the address space. The process itself
    /// stays allocated (Dead/zombie) until a parent `waitpid` reaps it.
    pub fn exit(&mut self, sched: &mut Scheduler, platform: &dyn Platform, pid: Pid, status: i32) {
        let parent_pid = self.processes.get(&pid.0).and_then(|p| p.parent);
        if let Some(ppid) = parent_pid {
            if let Some(parent) = self.processes.get(&ppid.0) {
                sched.wakeup_on(parent.wait_queue);
            }
        }

        let init_pid = self.initproc;
        let orphans = core::mem::take(&mut self.processes.get_mut(&pid.0).unwrap().children);
        for orphan in &orphans {
            if let Some(child) = self.processes.get_mut(&orphan.0) {
                child.parent = init_pid;
            }
            if let Some(init_pid) = init_pid {
                if let Some(initp) = self.processes.get_mut(&init_pid.0) {
                    initp.children.push(*orphan);
                }
            }
        }

        let proc = self.processes.get_mut(&pid.0).unwrap();
        proc.exit_status = status;
        proc.state = ProcState::Dead;
        for fd in proc.fds.open_fds() {
            if let Some(f) = proc.fds.clear(fd) {
                crate::fs::file::fput(f);
            }
        }
        if let Some(cwd) = proc.cwd.take() {
            vput(cwd);
        }
        proc.vmmap.destroy(platform);
    }

    /// Non-blocking half of `do_waitpid`: scans `waiter`'s children for one
    /// already Dead and reaps it if found. `ECHILD` iff `target` names no
    /// child of `waiter` at all (not merely "none Dead yet").
    pub fn try_reap(
        &mut self,
        sched: &mut Scheduler,
        platform: &dyn Platform,
        waiter: Pid,
        target: WaitTarget,
    ) -> KResult<WaitOutcome> {
        let children = self.processes.get(&waiter.0).ok_or(Errno::ECHILD)?.children.clone();

        let candidate = match target {
            WaitTarget::AnyChild => {
                if children.is_empty() {
                    return Err(Errno::ECHILD);
                }
                children.iter().find(|c| self.processes.get(&c.0).map(|p| p.state == ProcState::Dead).unwrap_or(false)).copied()
            }
            WaitTarget::Child(pid) => {
                if !children.contains(&pid) {
                    return Err(Errno::ECHILD);
                }
                self.processes.get(&pid.0).filter(|p| p.state == ProcState::Dead).map(|_| pid)
            }
        };

        match candidate {
            Some(child_pid) => {
                let status = self.reap(sched, platform, waiter, child_pid);
                Ok(WaitOutcome::Reaped(child_pid, status))
            }
            None => Ok(WaitOutcome::NoneDeadYet),
        }
    }

    /// Tears down an already-Dead child: destroys its thread and page
    /// directory, frees its wait queue, unlinks it from its parent's
    /// children list and the global table, returns its exit status.
    fn reap(&mut self, sched: &mut Scheduler, platform: &dyn Platform, waiter: Pid, child_pid: Pid) -> i32 {
        let child = self.processes.remove(&child_pid.0).expect("reap: unknown child");
        debug_assert_eq!(child.state, ProcState::Dead, "reap: child is not Dead");
        sched.remove_thread(child.tid);
        sched.free_queue(child.wait_queue);
        platform.destroy_page_table(child.vmmap.pt);
        if let Some(waiter_proc) = self.processes.get_mut(&waiter.0) {
            waiter_proc.children.retain(|&c| c != child_pid);
        }
        child.exit_status
    }

    /// `proc_kill`: direct-exit when `target == curproc`, otherwise cancels
    /// the target's single thread.
    pub fn kill(&mut self, sched: &mut Scheduler, platform: &dyn Platform, curproc: Pid, target: Pid, status: i32) {
        if target == curproc {
            self.exit(sched, platform, target, status);
        } else if let Some(p) = self.processes.get(&target.0) {
            sched.cancel(p.tid);
        }
    }

    /// `proc_kill_all`: every process but pids 0/1/2 and `curproc` itself.
    pub fn kill_all(&mut self, sched: &mut Scheduler, curproc: Pid) {
        let targets: Vec<Pid> =
            self.processes.keys().copied().map(Pid).filter(|&p| p.0 > 2 && p != curproc).collect();
        for t in targets {
            if let Some(p) = self.processes.get(&t.0) {
                sched.cancel(p.tid);
            }
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    pub static ref PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());
}

/// Blocking `waitpid`. Loops scanning-then-sleeping-then-rescanning rather
/// than a single check-then-sleep: a child reaching Dead between our scan
/// and our sleep is never missed, since we only sleep when the scan just
/// found nothing.
///
/// # Safety
/// Must be called from thread context with `waiter` the currently running
/// process's own thread.
pub unsafe fn do_waitpid(waiter: Pid, target: WaitTarget, options: i32) -> KResult<(Pid, i32)> {
    if options != 0 {
        return Err(Errno::EINVAL);
    }
    loop {
        let outcome = {
            let mut table = PROCESS_TABLE.lock();
            let mut sched = sched::SCHEDULER.lock();
            table.try_reap(&mut sched, platform(), waiter, target)?
        };
        match outcome {
            WaitOutcome::Reaped(pid, status) => return Ok((pid, status)),
            WaitOutcome::NoneDeadYet => {
                let (tid, wq) = {
                    let table = PROCESS_TABLE.lock();
                    let proc = table.get(waiter).ok_or(Errno::ECHILD)?;
                    (proc.tid, proc.wait_queue)
                };
                unsafe { sched::sched_sleep_on(tid, wq) };
            }
        }
    }
}

/// `do_exit` → `proc_cleanup` → never-returning `sched_switch`.
///
/// # Safety
/// Same as [`do_waitpid`]: `pid` must be the calling thread's own process.
pub unsafe fn do_exit(pid: Pid, status: i32) -> ! {
    let tid = {
        let mut table = PROCESS_TABLE.lock();
        let mut sched = sched::SCHEDULER.lock();
        table.exit(&mut sched, platform(), pid, status);
        table.get(pid).unwrap().tid
    };
    unsafe { sched::sched_switch(tid) };
    unreachable!("do_exit: sched_switch returned into a dead thread");
}

pub fn do_fork(parent: Pid) -> KResult<Pid> {
    let mut table = PROCESS_TABLE.lock();
    let mut sched = sched::SCHEDULER.lock();
    table.fork(&mut sched, platform(), parent)
}

pub fn do_kill(curproc: Pid, target: Pid, status: i32) {
    let mut table = PROCESS_TABLE.lock();
    let mut sched = sched::SCHEDULER.lock();
    table.kill(&mut sched, platform(), curproc, target, status);
}

pub fn do_kill_all(curproc: Pid) {
    let mut table = PROCESS_TABLE.lock();
    let mut sched = sched::SCHEDULER.lock();
    table.kill_all(&mut sched, curproc);
}

/// Boots the process table: pid 0 (idle, parentless) then pid 1 (init,
/// rooted at the VFS root), matching the "idle is the only pid-0
/// process, init is the unique pid 1" invariants. Must run once, after
/// `sched::init` and `fs::init`, before any other process is created.
#[cfg(not(test))]
pub fn init() {
    let mut table = PROCESS_TABLE.lock();
    let mut sched = sched::SCHEDULER.lock();
    let root = crate::fs::vfs_root();

    let idle = table.proc_create("idle", &mut sched, platform(), None).expect("proc_create(idle)");
    table.set_current(Some(idle));
    let init_pid = table.proc_create("init", &mut sched, platform(), Some(&root)).expect("proc_create(init)");
    table.set_current(Some(init_pid));

    crate::fs::vnode::vput(root);
    crate::log_info!("Process table initialized: idle={}, init={}.", idle.0, init_pid.0);
}

#[cfg(not(test))]
fn platform() -> &'static dyn Platform {
    &*crate::arch::x86::PLATFORM
}

#[cfg(test)]
fn platform() -> &'static dyn Platform {
    use crate::arch::sim::SimPlatform;
    use lazy_static::lazy_static;
    lazy_static! {
        static ref TEST_PLATFORM: SimPlatform = SimPlatform::new();
    }
    &*TEST_PLATFORM
}
