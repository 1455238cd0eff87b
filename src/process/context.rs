// Process Context for the kproc process subsystem
use alloc::string::String;
use alloc::sync::Arc;

use crate::process::alarm::Sleep;
use crate::process::exec::ExecError;
use crate::process::join::JoinFuture;
use crate::process::pcb::{ProcessControlBlock, ProcessId};
use crate::process::scheduler::{yield_now, YieldNow};
use crate::services::process_service::ProcessService;

/// Handle passed to a program's entry point: the running process's own
/// view of the kernel.
#[derive(Clone)]
pub struct ProcessContext {
    pcb: Arc<ProcessControlBlock>,
    service: Arc<ProcessService>,
}

impl ProcessContext {
    pub fn new(pcb: Arc<ProcessControlBlock>, service: Arc<ProcessService>) -> Self {
        Self { pcb, service }
    }

    pub fn pid(&self) -> ProcessId {
        self.pcb.pid()
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.pcb.parent()
    }

    /// Arguments the process was started with.
    pub fn args(&self) -> &[String] {
        self.pcb.args()
    }

    pub fn pcb(&self) -> &Arc<ProcessControlBlock> {
        &self.pcb
    }

    pub fn service(&self) -> &Arc<ProcessService> {
        &self.service
    }

    /// Start a child process. Returns as soon as the child is queued.
    pub fn exec(&self, path: &str, args: &[&str]) -> Result<ProcessId, ExecError> {
        self.service.exec(Some(self.pid()), path, args)
    }

    /// Wait for a child to exit and collect its status.
    pub fn join(&self, child: ProcessId) -> JoinFuture {
        self.service.join(self.pid(), child)
    }

    /// Terminate this process. The body is dropped by the dispatcher at its
    /// next suspension point.
    pub fn exit(&self, status: i32) -> bool {
        self.service.exit(self.pid(), status)
    }

    /// Sleep for at least `ticks` timer ticks.
    pub fn sleep(&self, ticks: u64) -> Sleep {
        self.service.alarm().wait_until(ticks, Some(self.pcb.clone()))
    }

    pub fn yield_now(&self) -> YieldNow {
        yield_now()
    }
}
