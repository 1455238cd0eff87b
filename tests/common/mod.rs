#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use kproc::process::yield_now;
use kproc::syscalls::{sys_exec, sys_join, SyscallResult};
use kproc::{KernelConfig, Program, ProgramRegistry, ProcessService};

/// Stand-in for the console device: collects printed lines.
#[derive(Clone, Default)]
pub struct Console(Arc<Mutex<Vec<String>>>);

impl Console {
    pub fn print(&self, line: String) {
        self.0.lock().unwrap().push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Shared slot a program can publish a value into.
#[derive(Clone)]
pub struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot(Arc::new(Mutex::new(None)))
    }
}

impl<T: Clone> Slot<T> {
    pub fn set(&self, value: T) {
        *self.0.lock().unwrap() = Some(value);
    }

    pub fn get(&self) -> Option<T> {
        self.0.lock().unwrap().clone()
    }
}

pub fn service_with(registry: ProgramRegistry) -> Arc<ProcessService> {
    ProcessService::new(KernelConfig::default(), Arc::new(registry))
}

/// Spins for a while, yielding the processor, then exits with `status`.
pub fn loop_simple(iterations: u32, status: i32) -> Program {
    Program::new(4, move |_ctx| async move {
        for _ in 0..iterations {
            yield_now().await;
        }
        status
    })
}

/// exec loopSimple.coff, join it, report, then keep working.
pub fn join_simple(console: Console) -> Program {
    Program::new(8, move |ctx| {
        let console = console.clone();
        async move {
            let cid = match sys_exec(&ctx, "loopSimple.coff", &["loopSimple.coff"]) {
                SyscallResult::Success(pid) => pid,
                _ => return -1,
            };
            let mut cstatus = 0;
            sys_join(&ctx, cid, &mut cstatus).await;
            console.print(format!("Child pid={}, exit status: {}", cid, cstatus));
            let mut c = 1;
            while c < 15 {
                c += 1;
                console.print(format!("c={}", c));
            }
            0
        }
    })
}
