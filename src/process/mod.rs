// Process Management Module for the kproc process subsystem
pub mod alarm;
pub mod context;
pub mod exec;
pub mod exit;
pub mod join;
pub mod pcb;
pub mod scheduler;
pub mod table;

pub use context::ProcessContext;
pub use exec::ExecError;
pub use join::{JoinError, JoinFuture};
pub use pcb::{ProcessControlBlock, ProcessId, ProcessInfo, ProcessState};
pub use scheduler::{yield_now, Scheduler, SchedulerStats};
pub use table::ProcessTable;
