// Process termination path for the kproc process subsystem
use alloc::sync::Arc;

use crate::loader::AddressSpaceHandle;
use crate::process::pcb::{ProcessControlBlock, ProcessId, ProcessState};
use crate::process::table::ProcessTable;

/// What a successful termination did, for the caller to finish up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub status: i32,
    /// Address space to hand back to the loader.
    pub address_space: Option<AddressSpaceHandle>,
    /// The PCB was removed right away because nobody can join it.
    pub reaped: bool,
    /// Number of children detached from this process.
    pub orphans: usize,
}

/// Terminate `pid` with `status`.
///
/// Publishes the status and moves the PCB to Zombie, then detaches every
/// child (Zombie children are reaped, live ones lose their parent and are
/// reaped when they exit), and finally wakes a parent parked in join.
/// A process without a parent is reaped at once.
///
/// Returns `None` if the process is unknown or has already exited; the
/// first status always wins.
pub fn terminate(table: &ProcessTable, pid: ProcessId, status: i32) -> Option<Termination> {
    let pcb = table.lookup(pid)?;
    let (parent, children, waiter, address_space) = {
        let mut inner = pcb.lock();
        if !inner.record_exit(status) {
            return None;
        }
        let children = core::mem::take(&mut inner.children);
        (
            inner.parent,
            children,
            inner.join_waiter.take(),
            inner.address_space.take(),
        )
    };

    let orphans = children.len();
    for child in children {
        if let Some(child) = table.lookup(child) {
            orphan(table, &child);
        }
    }

    let reaped = parent.is_none();
    if reaped {
        pcb.lock().state = ProcessState::Terminated;
        table.remove(pid);
    }

    // The status is already visible under the PCB lock; wake outside it.
    if let Some(waiter) = waiter {
        log::trace!("PID {} wakes joining parent {}", pid, waiter.parent);
        waiter.waker.wake();
    }

    Some(Termination {
        pid,
        parent,
        status,
        address_space,
        reaped,
        orphans,
    })
}

/// Detach `child` from its parent. A Zombie is reaped on the spot; a live
/// child becomes un-joinable and is reaped when it exits.
pub fn orphan(table: &ProcessTable, child: &Arc<ProcessControlBlock>) {
    let reap = {
        let mut inner = child.lock();
        inner.parent = None;
        inner.join_waiter = None;
        if inner.state == ProcessState::Zombie {
            inner.state = ProcessState::Terminated;
            true
        } else {
            false
        }
    };
    if reap {
        table.remove(child.pid());
    }
}
