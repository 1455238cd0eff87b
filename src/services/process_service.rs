// Process Management Service for the kproc process subsystem
use alloc::sync::Arc;
use alloc::vec::Vec;
use conquer_once::spin::OnceCell;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::config::{KernelConfig, FAULT_EXIT_STATUS};
use crate::loader::ImageLoader;
use crate::process::alarm::Alarm;
use crate::process::exec::{self, ExecError};
use crate::process::exit::terminate;
use crate::process::join::{join, JoinFuture};
use crate::process::pcb::{ProcessControlBlock, ProcessId, ProcessInfo, ProcessState};
use crate::process::scheduler::Scheduler;
use crate::process::table::ProcessTable;

/// Process Management Service - wires the process table, dispatcher,
/// image loader and timer together behind the exec/join/exit surface.
pub struct ProcessService {
    config: KernelConfig,
    table: Arc<ProcessTable>,
    scheduler: Scheduler,
    alarm: Arc<Alarm>,
    loader: Arc<dyn ImageLoader>,
    root: Mutex<Option<ProcessId>>,
    halted: AtomicBool,
}

impl ProcessService {
    pub fn new(config: KernelConfig, loader: Arc<dyn ImageLoader>) -> Arc<Self> {
        Arc::new(Self {
            config,
            table: Arc::new(ProcessTable::new(config.max_processes)),
            scheduler: Scheduler::new(config.run_queue_capacity()),
            alarm: Arc::new(Alarm::new()),
            loader,
            root: Mutex::new(None),
            halted: AtomicBool::new(false),
        })
    }

    /// Start the root process. Any previous halt is cleared.
    pub fn boot(self: &Arc<Self>, path: &str, args: &[&str]) -> Result<ProcessId, ExecError> {
        let pid = self.exec(None, path, args)?;
        *self.root.lock() = Some(pid);
        self.halted.store(false, Ordering::Release);
        log::info!("Booted root process '{}' with PID {}", path, pid);
        Ok(pid)
    }

    /// Create a new process
    pub fn exec(
        self: &Arc<Self>,
        parent: Option<ProcessId>,
        path: &str,
        args: &[&str],
    ) -> Result<ProcessId, ExecError> {
        exec::launch(self, parent, path, args)
    }

    /// Wait for `child` of `parent` to exit
    pub fn join(&self, parent: ProcessId, child: ProcessId) -> JoinFuture {
        join(&self.table, parent, child)
    }

    /// Terminate a process. Returns `false` if it was unknown or had
    /// already exited.
    pub fn exit(&self, pid: ProcessId, status: i32) -> bool {
        let termination = match terminate(&self.table, pid, status) {
            Some(termination) => termination,
            None => return false,
        };
        if let Some(address_space) = termination.address_space {
            self.loader.release(address_space);
        }
        // Drops the body of a process killed while parked in join or sleep.
        // A body that is running right now is dropped by the dispatcher.
        self.scheduler.cancel(pid);
        log::info!("Terminated process PID {} with exit code {}", pid, status);
        if termination.orphans > 0 {
            log::debug!("PID {} left {} orphaned children", pid, termination.orphans);
        }

        if self.table.live_count() == 0 {
            log::info!("Last process exited, machine halting");
            self.halted.store(true, Ordering::Release);
        }
        true
    }

    /// Terminate a process that faulted.
    pub fn fault(&self, pid: ProcessId) -> bool {
        log::warn!("PID {} faulted", pid);
        self.exit(pid, FAULT_EXIT_STATUS)
    }

    /// Stop the machine. Only the root process may do this.
    pub fn halt(&self, caller: ProcessId) -> bool {
        if self.root() != Some(caller) {
            log::warn!("PID {} attempted halt, ignored", caller);
            return false;
        }
        log::info!("Machine halted by PID {}", caller);
        self.halted.store(true, Ordering::Release);
        true
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Drive processes until the machine halts or nothing is runnable or
    /// asleep. Idle time is skipped by jumping the timer to the next
    /// deadline. Returns the number of polls made.
    pub fn run(&self) -> usize {
        let mut total = 0;
        while !self.is_halted() {
            let polled = self.scheduler.run_ready();
            total += polled;
            if polled > 0 || !self.scheduler.is_idle() {
                continue;
            }
            if self.alarm.advance_to_next_deadline() == 0 {
                break;
            }
        }
        total
    }

    pub fn root(&self) -> Option<ProcessId> {
        *self.root.lock()
    }

    pub fn lookup(&self, pid: ProcessId) -> Option<Arc<ProcessControlBlock>> {
        self.table.lookup(pid)
    }

    /// List all processes
    pub fn list_processes(&self) -> Vec<ProcessInfo> {
        self.table.list()
    }

    /// Get process count
    pub fn get_process_count(&self) -> usize {
        self.table.len()
    }

    /// Get system statistics
    pub fn get_system_stats(&self) -> SystemStats {
        let processes = self.table.list();
        let count = |state: ProcessState| processes.iter().filter(|p| p.state == state).count();
        SystemStats {
            total_processes: processes.len(),
            runnable_processes: count(ProcessState::Runnable),
            running_processes: count(ProcessState::Running),
            blocked_processes: count(ProcessState::Blocked),
            zombie_processes: count(ProcessState::Zombie),
            context_switches: self.scheduler.get_total_switches(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<ProcessTable> {
        &self.table
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn alarm(&self) -> &Arc<Alarm> {
        &self.alarm
    }

    pub fn loader(&self) -> &Arc<dyn ImageLoader> {
        &self.loader
    }
}

/// System statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStats {
    pub total_processes: usize,
    pub runnable_processes: usize,
    pub running_processes: usize,
    pub blocked_processes: usize,
    pub zombie_processes: usize,
    pub context_switches: u64,
}

static PROCESS_SERVICE: OnceCell<Arc<ProcessService>> = OnceCell::uninit();

/// Bring up the kernel-wide process service. Called once at boot; later
/// calls keep the first instance.
pub fn init_process_service(
    config: KernelConfig,
    loader: Arc<dyn ImageLoader>,
) -> Option<Arc<ProcessService>> {
    if PROCESS_SERVICE
        .try_init_once(|| ProcessService::new(config, loader))
        .is_err()
    {
        log::warn!("Process service already initialized");
    }
    process_service().cloned()
}

/// The kernel-wide process service, if it has been brought up.
pub fn process_service() -> Option<&'static Arc<ProcessService>> {
    PROCESS_SERVICE.try_get().ok()
}
