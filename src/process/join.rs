// Join Coordinator for the kproc process subsystem
use alloc::sync::Arc;
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use crate::process::exit;
use crate::process::pcb::{JoinWaiter, ProcessControlBlock, ProcessId, ProcessState};
use crate::process::table::ProcessTable;

/// Join errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    /// The id is not a live child of the caller (own id and strangers included).
    NotAChild,
    /// The child's status was already collected by an earlier join.
    AlreadyJoined,
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JoinError::NotAChild => write!(f, "Not a child of the calling process"),
            JoinError::AlreadyJoined => write!(f, "Child already joined"),
        }
    }
}

/// Wait for `child` (a child of `parent`) to exit and collect its status.
///
/// The returned future suspends the parent while the child is alive and
/// resolves immediately if the child is already a Zombie.
pub fn join(table: &Arc<ProcessTable>, parent: ProcessId, child: ProcessId) -> JoinFuture {
    JoinFuture {
        table: table.clone(),
        parent,
        child,
        stage: Stage::Start,
    }
}

enum Stage {
    Start,
    Claimed(Arc<ProcessControlBlock>),
    Done,
}

/// Future returned by [`join`].
///
/// The first poll claims the child in the parent's PCB, so at most one join
/// per child ever gets past that point. Dropping the future before it
/// completes gives the claim back.
pub struct JoinFuture {
    table: Arc<ProcessTable>,
    parent: ProcessId,
    child: ProcessId,
    stage: Stage,
}

impl JoinFuture {
    pub fn child(&self) -> ProcessId {
        self.child
    }

    fn claim(&self) -> Result<Arc<ProcessControlBlock>, JoinError> {
        if self.parent == self.child {
            return Err(JoinError::NotAChild);
        }
        let parent = self.table.lookup(self.parent).ok_or(JoinError::NotAChild)?;
        {
            let mut inner = parent.lock();
            if inner.joined.contains(&self.child) {
                return Err(JoinError::AlreadyJoined);
            }
            // The child stays in `children` until the join completes, so an
            // exit of the parent in the meantime still orphans it.
            if !inner.children.contains(&self.child) {
                return Err(JoinError::NotAChild);
            }
            inner.joined.insert(self.child);
        }
        // A registered child stays in the table until this join reaps it.
        self.table.lookup(self.child).ok_or(JoinError::AlreadyJoined)
    }
}

impl Future for JoinFuture {
    type Output = Result<i32, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Stage::Start = self.stage {
            match self.claim() {
                Ok(child) => self.stage = Stage::Claimed(child),
                Err(err) => {
                    self.stage = Stage::Done;
                    log::debug!("PID {} join({}) refused: {}", self.parent, self.child, err);
                    return Poll::Ready(Err(err));
                }
            }
        }
        let child = match &self.stage {
            Stage::Claimed(child) => child.clone(),
            _ => return Poll::Ready(Err(JoinError::AlreadyJoined)),
        };
        let parent = self.table.lookup(self.parent);

        // Check-or-register is one critical section on the child's lock; the
        // exit path publishes the status and takes the waiter under the same
        // lock, so a wake can be neither lost nor doubled.
        let status = {
            let mut inner = child.lock();
            match inner.state {
                ProcessState::Zombie => {
                    inner.state = ProcessState::Terminated;
                    inner.join_waiter = None;
                    inner.exit_status
                }
                ProcessState::Terminated => None,
                _ => {
                    inner.join_waiter = Some(JoinWaiter {
                        parent: self.parent,
                        waker: cx.waker().clone(),
                    });
                    if let Some(parent) = &parent {
                        parent.lock().block();
                    }
                    return Poll::Pending;
                }
            }
        };

        self.stage = Stage::Done;
        self.table.remove(self.child);
        if let Some(parent) = &parent {
            let mut inner = parent.lock();
            inner.children.remove(&self.child);
            inner.resume();
        }
        match status {
            Some(status) => {
                log::debug!("PID {} joined child {} (status {})", self.parent, self.child, status);
                Poll::Ready(Ok(status))
            }
            None => Poll::Ready(Err(JoinError::AlreadyJoined)),
        }
    }
}

impl Drop for JoinFuture {
    fn drop(&mut self) {
        let child = match core::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Claimed(child) => child,
            _ => return,
        };
        {
            let mut inner = child.lock();
            if inner
                .join_waiter
                .as_ref()
                .map_or(false, |waiter| waiter.parent == self.parent)
            {
                inner.join_waiter = None;
            }
        }

        // Hand the claim back so a later join can still collect the status.
        let restored = match self.table.lookup(self.parent) {
            Some(parent) => {
                let mut inner = parent.lock();
                if inner.state.is_alive() {
                    inner.joined.remove(&self.child);
                    inner.make_runnable();
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if !restored {
            exit::orphan(&self.table, &child);
        }
        log::debug!("PID {} abandoned join on child {}", self.parent, self.child);
    }
}
