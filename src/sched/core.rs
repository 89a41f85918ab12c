//! Run queue, IPL-gated queue mutation, and the sleep/wake/cancel
//! primitives every higher-level blocking point (mutex, `waitpid`, mmobj
//! fill) is built from.
//!
//! Queue storage is centralized here rather than scattered across owning
//! structs (mutexes, mmobjs) so that `cancel` can pull a sleeping thread out
//! of whichever queue it is on without needing a raw pointer back to that
//! queue, the way the original C does with `kt_wchan`. Callers hold a
//! [`QueueId`] instead.

use alloc::collections::BTreeMap;

use super::ipl::{self, IPL_HIGH};
use super::queue::{Ktqueue, QueueId};
use super::thread::{Thread, ThreadState, Tid};

pub const RUN_QUEUE: QueueId = QueueId(0);

pub struct Scheduler {
    queues: BTreeMap<u64, Ktqueue>,
    next_queue_id: u64,
    threads: BTreeMap<Tid, Thread>,
    next_tid: u64,
    current: Option<Tid>,
}

impl Scheduler {
    pub fn new() -> Self {
        let mut queues = BTreeMap::new();
        queues.insert(RUN_QUEUE.0, Ktqueue::new());
        Scheduler { queues, next_queue_id: 1, threads: BTreeMap::new(), next_tid: 1, current: None }
    }

    pub fn alloc_queue(&mut self) -> QueueId {
        let id = self.next_queue_id;
        self.next_queue_id += 1;
        self.queues.insert(id, Ktqueue::new());
        QueueId(id)
    }

    /// Releases a dynamically allocated wait queue (e.g. a mutex being
    /// destroyed). The run queue is never freed.
    pub fn free_queue(&mut self, q: QueueId) {
        debug_assert_ne!(q, RUN_QUEUE, "run queue must never be freed");
        if let Some(queue) = self.queues.get(&q.0) {
            debug_assert!(queue.is_empty(), "freeing a non-empty wait queue");
        }
        self.queues.remove(&q.0);
    }

    pub fn new_thread(&mut self, pid: u64, kstack_size: usize) -> Tid {
        let id = self.next_tid;
        self.next_tid += 1;
        let tid = Tid(id);
        self.threads.insert(tid, Thread::new(tid, pid, kstack_size));
        tid
    }

    pub fn remove_thread(&mut self, tid: Tid) -> Option<Thread> {
        self.threads.remove(&tid)
    }

    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    pub fn thread_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.get_mut(&tid)
    }

    pub fn current(&self) -> Option<Tid> {
        self.current
    }

    pub fn set_current(&mut self, tid: Option<Tid>) {
        self.current = tid;
    }

    pub fn queue_len(&self, q: QueueId) -> usize {
        self.queues.get(&q.0).map(|q| q.len()).unwrap_or(0)
    }

    /// `sched_make_runnable`: precondition the thread is not already on the
    /// run queue. Raises IPL across the mutation, restores the caller's.
    pub fn make_runnable(&mut self, tid: Tid) {
        ipl::with_ipl(IPL_HIGH, || {
            debug_assert!(
                self.threads.get(&tid).map(|t| t.wchan) != Some(Some(RUN_QUEUE)),
                "sched_make_runnable: thread already on run queue"
            );
            if let Some(t) = self.threads.get_mut(&tid) {
                t.state = ThreadState::Run;
                t.wchan = Some(RUN_QUEUE);
            }
            self.queues.get_mut(&RUN_QUEUE.0).unwrap().enqueue(tid);
        });
    }

    /// `ktqueue_dequeue` on the run queue, the logical half of
    /// `sched_switch` (picking who runs next). The caller performs the
    /// actual register switch.
    pub fn pick_next(&mut self) -> Option<Tid> {
        ipl::with_ipl(IPL_HIGH, || {
            let tid = self.queues.get_mut(&RUN_QUEUE.0)?.dequeue();
            if let Some(tid) = tid {
                if let Some(t) = self.threads.get_mut(&tid) {
                    t.wchan = None;
                }
            }
            tid
        })
    }

    pub fn run_queue_empty(&self) -> bool {
        self.queues.get(&RUN_QUEUE.0).map(|q| q.is_empty()).unwrap_or(true)
    }

    /// Enqueues the current thread onto `q` with the given sleep state.
    /// Does not itself switch away — callers combine this with a real
    /// context switch.
    pub fn enqueue_sleeping(&mut self, tid: Tid, q: QueueId, state: ThreadState) {
        debug_assert!(matches!(state, ThreadState::Sleep | ThreadState::SleepCancellable));
        ipl::with_ipl(IPL_HIGH, || {
            if let Some(t) = self.threads.get_mut(&tid) {
                t.state = state;
                t.wchan = Some(q);
            }
            self.queues.get_mut(&q.0).unwrap().enqueue(tid);
        });
    }

    /// `sched_wakeup_on`: dequeues one waiter (FIFO) and makes it runnable.
    pub fn wakeup_on(&mut self, q: QueueId) -> Option<Tid> {
        ipl::with_ipl(IPL_HIGH, || {
            let tid = self.queues.get_mut(&q.0)?.dequeue()?;
            {
                let t = self.threads.get(&tid).expect("wakeup_on: unknown thread");
                debug_assert!(matches!(t.state, ThreadState::Sleep | ThreadState::SleepCancellable));
            }
            if let Some(t) = self.threads.get_mut(&tid) {
                t.wchan = None;
            }
            self.make_runnable_locked(tid);
            Some(tid)
        })
    }

    /// `sched_broadcast_on`: wakes every waiter on `q`, in FIFO order.
    pub fn broadcast_on(&mut self, q: QueueId) -> alloc::vec::Vec<Tid> {
        let mut woken = alloc::vec::Vec::new();
        while let Some(tid) = self.wakeup_on(q) {
            woken.push(tid);
        }
        woken
    }

    /// `sched_cancel`: sets the cancel flag; if the thread is in a
    /// cancellable sleep, pulls it off its wait queue and makes it runnable
    /// immediately. Otherwise the flag is set but the thread's queue
    /// membership is untouched — it is observed on the next cancellable
    /// sleep attempt instead.
    pub fn cancel(&mut self, tid: Tid) {
        ipl::with_ipl(IPL_HIGH, || {
            let (state, wchan) = match self.threads.get(&tid) {
                Some(t) => (t.state, t.wchan),
                None => return,
            };
            if let Some(t) = self.threads.get_mut(&tid) {
                t.cancelled = true;
            }
            if state == ThreadState::SleepCancellable {
                if let Some(q) = wchan {
                    self.queues.get_mut(&q.0).map(|queue| queue.remove(tid));
                }
                if let Some(t) = self.threads.get_mut(&tid) {
                    t.wchan = None;
                }
                self.make_runnable_locked(tid);
            }
        });
    }

    /// Shared by `wakeup_on`/`cancel`, which already hold IPL_HIGH and must
    /// not try to re-raise it (that would work via `with_ipl`'s restore
    /// semantics too, but this avoids the redundant atomic round trip).
    fn make_runnable_locked(&mut self, tid: Tid) {
        if let Some(t) = self.threads.get_mut(&tid) {
            t.state = ThreadState::Run;
            t.wchan = Some(RUN_QUEUE);
        }
        self.queues.get_mut(&RUN_QUEUE.0).unwrap().enqueue(tid);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
