//! `kmutex_t` — a non-recursive, one-holder-at-a-time mutex built directly
//! on the scheduler's wait queues.
//!
//! `KMutex` itself only tracks holder + wait-queue membership (fully unit
//! testable); the blocking entry points (`lock`, `lock_cancellable`) pair
//! it with a real `sched_switch`, so they live in `sched::mod` next to the
//! rest of the blocking glue and are not exercised by the host test suite —
//! the handoff invariant they rely on (tested here) is what actually
//! matters.

use super::core::Scheduler;
use super::queue::QueueId;
use super::thread::{ThreadState, Tid};

pub struct KMutex {
    holder: Option<Tid>,
    waiters: QueueId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Blocked,
}

impl KMutex {
    pub fn new(sched: &mut Scheduler) -> Self {
        KMutex { holder: None, waiters: sched.alloc_queue() }
    }

    pub fn holder(&self) -> Option<Tid> {
        self.holder
    }

    pub fn is_held_by(&self, tid: Tid) -> bool {
        self.holder == Some(tid)
    }

    /// `kmutex_lock`'s non-blocking half: becomes holder if free, otherwise
    /// enqueues the caller on the wait queue (uninterruptible sleep) and
    /// tells the caller to switch away.
    pub fn lock_or_wait(&mut self, sched: &mut Scheduler, tid: Tid) -> LockOutcome {
        debug_assert!(self.holder != Some(tid), "kmutex_lock: already held by caller");
        if self.holder.is_none() {
            self.holder = Some(tid);
            LockOutcome::Acquired
        } else {
            sched.enqueue_sleeping(tid, self.waiters, ThreadState::Sleep);
            LockOutcome::Blocked
        }
    }

    /// `kmutex_lock_cancellable`'s non-blocking half: same as above but the
    /// sleep is cancellable.
    pub fn lock_or_wait_cancellable(&mut self, sched: &mut Scheduler, tid: Tid) -> LockOutcome {
        debug_assert!(self.holder != Some(tid), "kmutex_lock_cancellable: already held by caller");
        if self.holder.is_none() {
            self.holder = Some(tid);
            LockOutcome::Acquired
        } else {
            sched.enqueue_sleeping(tid, self.waiters, ThreadState::SleepCancellable);
            LockOutcome::Blocked
        }
    }

    /// `kmutex_unlock`: precondition caller is holder. Hands off directly to
    /// the head of the wait queue (no barging) rather than clearing
    /// `holder` and letting a racing `lock_or_wait` win it.
    pub fn unlock(&mut self, sched: &mut Scheduler, tid: Tid) {
        debug_assert_eq!(self.holder, Some(tid), "kmutex_unlock: caller does not hold mutex");
        match sched.wakeup_on(self.waiters) {
            Some(next) => self.holder = Some(next),
            None => self.holder = None,
        }
    }

    /// Used by `kmutex_lock_cancellable` callers: if cancellation raced with
    /// a handoff (the thread was made the holder just as it was cancelled),
    /// the lock must be released again before EINTR is returned, rather than
    /// left held by a thread that thinks it never acquired it.
    pub fn release_if_held(&mut self, sched: &mut Scheduler, tid: Tid) {
        if self.holder == Some(tid) {
            self.unlock(sched, tid);
        }
    }

    pub fn waiters(&self) -> QueueId {
        self.waiters
    }
}
