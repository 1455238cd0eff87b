// Process Control Block (PCB) for the kproc process subsystem
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::task::Waker;
use spin::{Mutex, MutexGuard};

use crate::loader::AddressSpaceHandle;

/// Process identifier. Handed out monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl ProcessId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Runnable,   // Waiting in the run queue
    Running,    // Currently being polled by the dispatcher
    Blocked,    // Suspended in join or sleep
    Zombie,     // Exited, status not yet collected
    Terminated, // Status collected or discarded, PCB reaped
}

impl ProcessState {
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            ProcessState::Runnable | ProcessState::Running | ProcessState::Blocked
        )
    }
}

/// The (single) parent parked on this PCB's termination.
#[derive(Debug)]
pub struct JoinWaiter {
    pub parent: ProcessId,
    pub waker: Waker,
}

/// Mutable half of a PCB, guarded by the PCB's own lock.
#[derive(Debug)]
pub struct PcbInner {
    pub parent: Option<ProcessId>,
    pub children: BTreeSet<ProcessId>,
    /// Children whose status this process has already collected (or is
    /// collecting). Used to tell `AlreadyJoined` apart from `NotAChild`.
    /// Ids are never reused, so entries are kept for the life of the
    /// process: one per collected child. A join that is dropped before it
    /// completes takes its entry back out.
    pub joined: BTreeSet<ProcessId>,
    pub state: ProcessState,
    pub exit_status: Option<i32>,
    pub join_waiter: Option<JoinWaiter>,
    pub address_space: Option<AddressSpaceHandle>,
}

impl PcbInner {
    /// Record the exit status and move to Zombie. Returns `false` if the
    /// process had already exited; the first status wins.
    pub fn record_exit(&mut self, status: i32) -> bool {
        if self.exit_status.is_some() || !self.state.is_alive() {
            return false;
        }
        self.exit_status = Some(status);
        self.state = ProcessState::Zombie;
        true
    }

    /// Runnable/Running -> Blocked
    pub fn block(&mut self) {
        if matches!(self.state, ProcessState::Runnable | ProcessState::Running) {
            self.state = ProcessState::Blocked;
        }
    }

    /// Blocked -> Runnable
    pub fn make_runnable(&mut self) {
        if self.state == ProcessState::Blocked {
            self.state = ProcessState::Runnable;
        }
    }

    /// Runnable/Blocked -> Running
    pub fn set_running(&mut self) {
        if matches!(self.state, ProcessState::Runnable | ProcessState::Blocked) {
            self.state = ProcessState::Running;
        }
    }

    /// Blocked -> Running, when a wait completes without the dispatcher.
    pub fn resume(&mut self) {
        if self.state == ProcessState::Blocked {
            self.state = ProcessState::Running;
        }
    }

    /// Running -> Runnable, after a voluntary yield.
    pub fn preempt(&mut self) {
        if self.state == ProcessState::Running {
            self.state = ProcessState::Runnable;
        }
    }

    pub fn join_waiters(&self) -> usize {
        self.join_waiter.is_some() as usize
    }
}

/// Process Control Block (PCB) - per-process lifecycle record
#[derive(Debug)]
pub struct ProcessControlBlock {
    pid: ProcessId,
    name: String,
    args: Vec<String>,
    inner: Mutex<PcbInner>,
}

impl ProcessControlBlock {
    pub fn new(
        pid: ProcessId,
        parent: Option<ProcessId>,
        name: String,
        args: Vec<String>,
        address_space: Option<AddressSpaceHandle>,
    ) -> Self {
        Self {
            pid,
            name,
            args,
            inner: Mutex::new(PcbInner {
                parent,
                children: BTreeSet::new(),
                joined: BTreeSet::new(),
                state: ProcessState::Runnable,
                exit_status: None,
                join_waiter: None,
                address_space,
            }),
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Image path the process was started from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn lock(&self) -> MutexGuard<'_, PcbInner> {
        self.inner.lock()
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.inner.lock().parent
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    pub fn info(&self) -> ProcessInfo {
        let inner = self.inner.lock();
        ProcessInfo {
            pid: self.pid,
            parent: inner.parent,
            name: self.name.clone(),
            state: inner.state,
            exit_status: inner.exit_status,
            children: inner.children.iter().copied().collect(),
        }
    }
}

/// Point-in-time view of a PCB, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub name: String,
    pub state: ProcessState,
    pub exit_status: Option<i32>,
    pub children: Vec<ProcessId>,
}
