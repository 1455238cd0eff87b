// kproc: process lifecycle and join synchronization for a teaching kernel
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod loader;
pub mod process;
pub mod services;
pub mod syscalls;

pub use config::KernelConfig;
pub use loader::{ImageLoader, Program, ProgramRegistry};
pub use process::{ExecError, JoinError, ProcessContext, ProcessId, ProcessState, ProcessTable};
pub use services::process_service::ProcessService;
