// src/syscalls.rs
use alloc::vec::Vec;
use core::convert::Infallible;
use core::fmt;

use crate::config::FAULT_EXIT_STATUS;
use crate::process::context::ProcessContext;
use crate::process::exec::ExecError;
use crate::process::join::JoinError;
use crate::process::pcb::ProcessId;

/// System call numbers
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNumber {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Join = 3,
}

impl TryFrom<u64> for SyscallNumber {
    type Error = SyscallError;

    fn try_from(number: u64) -> Result<Self, Self::Error> {
        match number {
            0 => Ok(SyscallNumber::Halt),
            1 => Ok(SyscallNumber::Exit),
            2 => Ok(SyscallNumber::Exec),
            3 => Ok(SyscallNumber::Join),
            _ => Err(SyscallError::InvalidSyscall),
        }
    }
}

/// System call result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    Success(u64),
    Error(SyscallError),
}

/// System call errors
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall = 1,
    InvalidArgument = 2,
    PermissionDenied = 3,
    LoadFailed = 4,
    ResourceExhausted = 5,
    NotAChild = 6,
    AlreadyJoined = 7,
    CallerExited = 8,
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyscallError::InvalidSyscall => write!(f, "Invalid syscall number"),
            SyscallError::InvalidArgument => write!(f, "Invalid argument"),
            SyscallError::PermissionDenied => write!(f, "Permission denied"),
            SyscallError::LoadFailed => write!(f, "Image load failed"),
            SyscallError::ResourceExhausted => write!(f, "Resources exhausted"),
            SyscallError::NotAChild => write!(f, "Not a child of the caller"),
            SyscallError::AlreadyJoined => write!(f, "Child already joined"),
            SyscallError::CallerExited => write!(f, "Caller has exited"),
        }
    }
}

impl From<ExecError> for SyscallError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::LoadFailed => SyscallError::LoadFailed,
            ExecError::ResourceExhausted => SyscallError::ResourceExhausted,
            ExecError::InvalidArguments => SyscallError::InvalidArgument,
            ExecError::CallerExited => SyscallError::CallerExited,
        }
    }
}

impl From<JoinError> for SyscallError {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::NotAChild => SyscallError::NotAChild,
            JoinError::AlreadyJoined => SyscallError::AlreadyJoined,
        }
    }
}

const ERROR_BIT: u64 = 0x8000_0000_0000_0000;

/// Convert syscall result to u64 for return value
impl From<SyscallResult> for u64 {
    fn from(result: SyscallResult) -> u64 {
        match result {
            SyscallResult::Success(value) => value,
            SyscallResult::Error(err) => {
                // Use high bit to indicate error
                ERROR_BIT | (err as u64)
            }
        }
    }
}

impl SyscallResult {
    /// Decode a raw return value produced by `u64::from`.
    pub fn from_raw(raw: u64) -> Self {
        if raw & ERROR_BIT == 0 {
            return SyscallResult::Success(raw);
        }
        let err = match raw & !ERROR_BIT {
            2 => SyscallError::InvalidArgument,
            3 => SyscallError::PermissionDenied,
            4 => SyscallError::LoadFailed,
            5 => SyscallError::ResourceExhausted,
            6 => SyscallError::NotAChild,
            7 => SyscallError::AlreadyJoined,
            8 => SyscallError::CallerExited,
            _ => SyscallError::InvalidSyscall,
        };
        SyscallResult::Error(err)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SyscallResult::Error(_))
    }
}

/// halt(): stop the machine. Root process only.
pub fn sys_halt(ctx: &ProcessContext) -> SyscallResult {
    if ctx.service().halt(ctx.pid()) {
        SyscallResult::Success(0)
    } else {
        SyscallResult::Error(SyscallError::PermissionDenied)
    }
}

/// exec(path, argv): start a child process and return its PID.
pub fn sys_exec(ctx: &ProcessContext, path: &str, argv: &[&str]) -> SyscallResult {
    match ctx.exec(path, argv) {
        Ok(pid) => {
            log::debug!("[SYSCALL] Exec: PID {} started '{}' as PID {}", ctx.pid(), path, pid);
            SyscallResult::Success(pid.as_u64())
        }
        Err(err) => {
            log::debug!("[SYSCALL] Exec '{}' failed: {}", path, err);
            SyscallResult::Error(err.into())
        }
    }
}

/// Split a NUL-terminated argument block into `argc` strings. Empty
/// arguments are kept; only the piece after the final NUL is dropped.
pub fn unpack_args(argc: usize, argv: &[u8]) -> Result<Vec<&str>, SyscallError> {
    let block = argv.strip_suffix(&[0]).unwrap_or(argv);
    if argc == 0 && block.is_empty() {
        return Ok(Vec::new());
    }
    let args = block
        .split(|byte| *byte == 0)
        .map(core::str::from_utf8)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| SyscallError::InvalidArgument)?;
    if args.len() != argc {
        return Err(SyscallError::InvalidArgument);
    }
    Ok(args)
}

/// exec with a NUL-separated argument block, the way arguments arrive
/// from user memory.
pub fn sys_exec_raw(ctx: &ProcessContext, path: &str, argc: usize, argv: &[u8]) -> SyscallResult {
    match unpack_args(argc, argv) {
        Ok(args) => sys_exec(ctx, path, &args),
        Err(err) => SyscallResult::Error(err),
    }
}

/// join(pid, &status): wait for a child, store its exit status in `status`.
///
/// Returns 1 if the child exited normally and 0 if it was terminated by a
/// fault; `status` is written in both cases and left untouched on error.
pub async fn sys_join(ctx: &ProcessContext, pid: u64, status: &mut i32) -> SyscallResult {
    match ctx.join(ProcessId(pid)).await {
        Ok(exit_status) => {
            *status = exit_status;
            log::debug!("[SYSCALL] Join: PID {} collected {} -> {}", ctx.pid(), pid, exit_status);
            SyscallResult::Success((exit_status != FAULT_EXIT_STATUS) as u64)
        }
        Err(err) => SyscallResult::Error(err.into()),
    }
}

/// exit(status): terminate the caller. Never returns; the dispatcher drops
/// the body at this suspension point.
pub async fn sys_exit(ctx: &ProcessContext, status: i32) -> Infallible {
    log::debug!("[SYSCALL] Exit: PID {} exiting with {}", ctx.pid(), status);
    ctx.exit(status);
    futures_util::future::pending().await
}
