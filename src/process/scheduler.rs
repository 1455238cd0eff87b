// Process Scheduler for the kproc process subsystem
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::task::Wake;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::task::{Context, Poll, Waker};
use crossbeam_queue::ArrayQueue;
use futures_util::future::{BoxFuture, FutureExt};
use spin::Mutex;

use crate::process::pcb::{ProcessControlBlock, ProcessId};

/// A submitted process: its PCB, its body, and the waker that re-queues it.
struct ProcessTask {
    pcb: Arc<ProcessControlBlock>,
    future: BoxFuture<'static, ()>,
    waker: Waker,
    scheduled: Arc<AtomicBool>,
}

/// Cooperative dispatcher over process bodies.
///
/// A process runs until its body returns `Poll::Pending`. If it marked its
/// PCB Blocked before doing so, it stays off the run queue until its waker
/// fires; otherwise it is treated as a yield and goes back to Runnable.
/// One thread drives `run_ready`; wakers may fire from anywhere.
pub struct Scheduler {
    tasks: Mutex<BTreeMap<ProcessId, ProcessTask>>,
    run_queue: Arc<ArrayQueue<ProcessId>>,
    total_switches: AtomicU64,
}

impl Scheduler {
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: Mutex::new(BTreeMap::new()),
            run_queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            total_switches: AtomicU64::new(0),
        }
    }

    /// Hand a freshly created process to the dispatcher as Runnable.
    pub fn submit<F>(&self, pcb: Arc<ProcessControlBlock>, body: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pid = pcb.pid();
        let scheduled = Arc::new(AtomicBool::new(false));
        let waker = ProcessWaker::new(
            pid,
            Arc::downgrade(&pcb),
            scheduled.clone(),
            self.run_queue.clone(),
        );
        let task = ProcessTask {
            pcb,
            future: body.boxed(),
            waker: waker.clone(),
            scheduled,
        };
        if self.tasks.lock().insert(pid, task).is_some() {
            log::warn!("PID {} submitted twice, previous body dropped", pid);
        }
        waker.wake();
    }

    /// Re-queue a process by id.
    pub fn wake(&self, pid: ProcessId) {
        let waker = self.tasks.lock().get(&pid).map(|task| task.waker.clone());
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Drop the body of a process that is not being polled right now.
    /// Returns `false` if the dispatcher does not hold it (not submitted,
    /// already finished, or currently running).
    pub fn cancel(&self, pid: ProcessId) -> bool {
        let task = self.tasks.lock().remove(&pid);
        match task {
            // Dropped outside the map lock: the body's own destructors may
            // reach back into the kernel.
            Some(task) => {
                drop(task);
                log::trace!("Cancelled body of PID {}", pid);
                true
            }
            None => false,
        }
    }

    /// Poll every queued process once. Returns how many were polled.
    pub fn run_ready(&self) -> usize {
        let mut polled = 0;
        while let Some(pid) = self.run_queue.pop() {
            // The task is taken out of the map while it runs so that it can
            // exec (and thereby submit) without re-entering the map lock.
            let mut task = match self.tasks.lock().remove(&pid) {
                Some(task) => task,
                None => continue, // process no longer exists
            };
            task.scheduled.store(false, Ordering::Release);
            if !task.pcb.is_alive() {
                log::trace!("Dropping body of exited PID {}", pid);
                continue;
            }

            task.pcb.lock().set_running();
            self.total_switches.fetch_add(1, Ordering::Relaxed);
            polled += 1;

            let mut context = Context::from_waker(&task.waker);
            match task.future.as_mut().poll(&mut context) {
                Poll::Ready(()) => {
                    log::trace!("Body of PID {} finished", pid);
                }
                Poll::Pending => {
                    let alive = {
                        let mut inner = task.pcb.lock();
                        inner.preempt();
                        inner.state.is_alive()
                    };
                    if alive {
                        self.tasks.lock().insert(pid, task);
                    }
                }
            }
        }
        polled
    }

    /// Run until nothing is runnable. Returns the number of polls made.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let polled = self.run_ready();
            if polled == 0 && self.run_queue.is_empty() {
                return total;
            }
            total += polled;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.run_queue.is_empty()
    }

    /// Number of processes whose bodies the dispatcher still holds.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn get_total_switches(&self) -> u64 {
        self.total_switches.load(Ordering::Relaxed)
    }

    /// Get scheduler statistics
    pub fn get_stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.run_queue.len(),
            tasks: self.task_count(),
            total_switches: self.get_total_switches(),
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub tasks: usize,
    pub total_switches: u64,
}

struct ProcessWaker {
    pid: ProcessId,
    pcb: Weak<ProcessControlBlock>,
    scheduled: Arc<AtomicBool>,
    run_queue: Arc<ArrayQueue<ProcessId>>,
}

impl ProcessWaker {
    fn new(
        pid: ProcessId,
        pcb: Weak<ProcessControlBlock>,
        scheduled: Arc<AtomicBool>,
        run_queue: Arc<ArrayQueue<ProcessId>>,
    ) -> Waker {
        Waker::from(Arc::new(ProcessWaker {
            pid,
            pcb,
            scheduled,
            run_queue,
        }))
    }

    fn wake_process(&self) {
        let pcb = match self.pcb.upgrade() {
            Some(pcb) => pcb,
            None => return,
        };
        {
            let mut inner = pcb.lock();
            if !inner.state.is_alive() {
                return;
            }
            inner.make_runnable();
        }
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return; // already queued
        }
        if self.run_queue.push(self.pid).is_err() {
            self.scheduled.store(false, Ordering::Release);
            log::error!("Run queue full, wake of PID {} dropped", self.pid);
        }
    }
}

impl Wake for ProcessWaker {
    fn wake(self: Arc<Self>) {
        self.wake_process();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wake_process();
    }
}

/// Give up the processor once and go to the back of the run queue.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
