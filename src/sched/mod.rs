//! Scheduler: run queue, IPL discipline, mutex, and the blocking entry
//! points built on top of them. See `core` for the queue/state machine and
//! `mutex` for `kmutex_t`; this module is the glue plus the global
//! singleton every process/thread operation goes through.

pub mod context;
pub mod core;
pub mod ipl;
pub mod mutex;
pub mod queue;
pub mod thread;

use lazy_static::lazy_static;
use spin::Mutex;

use self::core::Scheduler;
use self::queue::QueueId;
use self::thread::{ThreadState, Tid};
use crate::error::{Errno, KResult};

/// Default kernel stack size for a new thread.
pub const TASK_STACK_SIZE: usize = 4096 * 4;

lazy_static! {
    pub static ref SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());
}

/// `sched_switch`: pops the next runnable thread and performs a real
/// context switch into it. Blocks (by not returning to the caller's stack)
/// until some other thread switches back into `tid`.
///
/// # Safety
/// Must be called from thread context with `tid` referring to the thread
/// currently executing on this stack.
pub unsafe fn sched_switch(tid: Tid) {
    loop {
        let next = { SCHEDULER.lock().pick_next() };
        match next {
            Some(next_tid) => {
                let (old_ctx, new_ctx) = {
                    let mut sched = SCHEDULER.lock();
                    sched.set_current(Some(next_tid));
                    let old_ptr = &mut sched.thread_mut(tid).expect("sched_switch: unknown thread").context
                        as *mut context::Context;
                    let new_ptr = &sched.thread(next_tid).expect("sched_switch: unknown next thread").context
                        as *const context::Context;
                    (old_ptr, new_ptr)
                };
                unsafe { context::switch_context(old_ctx, new_ctx) };
                return;
            }
            None => {
                ipl::disable();
                ipl::setipl(ipl::IPL_LOW);
                ipl::wait_for_interrupt();
            }
        }
    }
}

/// `sched_sleep_on`: enqueues the current thread uninterruptibly, then
/// switches away.
///
/// # Safety
/// Same as [`sched_switch`].
pub unsafe fn sched_sleep_on(tid: Tid, q: QueueId) {
    SCHEDULER.lock().enqueue_sleeping(tid, q, ThreadState::Sleep);
    unsafe { sched_switch(tid) };
}

/// `sched_cancellable_sleep_on`: checks cancellation before *and* after
/// blocking, so a cancel racing the enqueue is never missed.
///
/// # Safety
/// Same as [`sched_switch`].
pub unsafe fn sched_cancellable_sleep_on(tid: Tid, q: QueueId) -> KResult<()> {
    {
        let sched = SCHEDULER.lock();
        if sched.thread(tid).map(|t| t.cancelled).unwrap_or(false) {
            return Err(Errno::EINTR);
        }
    }
    SCHEDULER.lock().enqueue_sleeping(tid, q, ThreadState::SleepCancellable);
    unsafe { sched_switch(tid) };

    let sched = SCHEDULER.lock();
    if sched.thread(tid).map(|t| t.cancelled).unwrap_or(false) {
        Err(Errno::EINTR)
    } else {
        Ok(())
    }
}

pub fn sched_make_runnable(tid: Tid) {
    SCHEDULER.lock().make_runnable(tid);
}

pub fn sched_wakeup_on(q: QueueId) -> Option<Tid> {
    SCHEDULER.lock().wakeup_on(q)
}

pub fn sched_broadcast_on(q: QueueId) -> alloc::vec::Vec<Tid> {
    SCHEDULER.lock().broadcast_on(q)
}

pub fn sched_cancel(tid: Tid) {
    SCHEDULER.lock().cancel(tid);
}

pub fn init() {
    crate::log_info!("Scheduler initialized: single ready queue, IPL-gated.");
}
