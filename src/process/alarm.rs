// Timer-driven sleep for the kproc process subsystem
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use spin::Mutex;

use crate::config::TICKS_PER_INTERRUPT;
use crate::process::pcb::ProcessControlBlock;

/// Sleepers keyed by (wake time, arrival order).
type SleeperKey = (u64, u64);

struct AlarmInner {
    now: u64,
    next_seq: u64,
    sleepers: BTreeMap<SleeperKey, Waker>,
}

/// Software timer. Processes sleep until the clock passes their deadline;
/// the clock only moves on `timer_interrupt`/`advance`.
pub struct Alarm {
    inner: Mutex<AlarmInner>,
}

impl Alarm {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AlarmInner {
                now: 0,
                next_seq: 0,
                sleepers: BTreeMap::new(),
            }),
        }
    }

    /// Current time in ticks.
    pub fn now(&self) -> u64 {
        self.inner.lock().now
    }

    /// Number of processes currently asleep.
    pub fn sleepers(&self) -> usize {
        self.inner.lock().sleepers.len()
    }

    /// Deadline of the earliest sleeper.
    pub fn next_deadline(&self) -> Option<u64> {
        self.inner
            .lock()
            .sleepers
            .keys()
            .next()
            .map(|(wake_time, _)| *wake_time)
    }

    /// Sleep for at least `ticks` ticks. `pcb` is marked Blocked while the
    /// caller is asleep.
    pub fn wait_until(
        self: &Arc<Self>,
        ticks: u64,
        pcb: Option<Arc<ProcessControlBlock>>,
    ) -> Sleep {
        let wake_time = self.now().saturating_add(ticks);
        Sleep {
            alarm: self.clone(),
            wake_time,
            key: None,
            pcb,
        }
    }

    /// The periodic timer interrupt: advance the clock one period.
    pub fn timer_interrupt(&self) -> usize {
        self.advance(TICKS_PER_INTERRUPT)
    }

    /// Advance the clock and wake every sleeper whose deadline has passed.
    /// Returns the number of sleepers woken.
    pub fn advance(&self, ticks: u64) -> usize {
        let due: Vec<Waker> = {
            let mut inner = self.inner.lock();
            inner.now = inner.now.saturating_add(ticks);
            let cutoff = inner.now.saturating_add(1);
            let later = inner.sleepers.split_off(&(cutoff, 0));
            let due = core::mem::replace(&mut inner.sleepers, later);
            due.into_values().collect()
        };
        let woken = due.len();
        for waker in due {
            waker.wake();
        }
        woken
    }

    /// Jump the clock straight to the earliest deadline.
    pub fn advance_to_next_deadline(&self) -> usize {
        let ticks = match self.next_deadline() {
            Some(deadline) => deadline.saturating_sub(self.now()),
            None => return 0,
        };
        self.advance(ticks)
    }
}

impl Default for Alarm {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`Alarm::wait_until`].
pub struct Sleep {
    alarm: Arc<Alarm>,
    wake_time: u64,
    key: Option<SleeperKey>,
    pcb: Option<Arc<ProcessControlBlock>>,
}

impl Sleep {
    pub fn wake_time(&self) -> u64 {
        self.wake_time
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if let Some(pcb) = &self.pcb {
            pcb.lock().block();
        }
        let due = {
            let mut inner = self.alarm.inner.lock();
            if inner.now >= self.wake_time {
                if let Some(key) = self.key {
                    inner.sleepers.remove(&key);
                }
                true
            } else {
                let key = match self.key {
                    Some(key) => key,
                    None => {
                        let key = (self.wake_time, inner.next_seq);
                        inner.next_seq += 1;
                        key
                    }
                };
                inner.sleepers.insert(key, cx.waker().clone());
                drop(inner);
                self.key = Some(key);
                false
            }
        };
        if !due {
            return Poll::Pending;
        }
        self.key = None;
        if let Some(pcb) = &self.pcb {
            pcb.lock().resume();
        }
        Poll::Ready(())
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.alarm.inner.lock().sleepers.remove(&key);
        }
    }
}
