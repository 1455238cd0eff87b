// Exec Launcher for the kproc process subsystem
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::config::KernelConfig;
use crate::loader::LoadError;
use crate::process::context::ProcessContext;
use crate::process::pcb::ProcessId;
use crate::services::process_service::ProcessService;

/// Exec errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The image does not exist or cannot be loaded.
    LoadFailed,
    /// No room left for another PCB or address space.
    ResourceExhausted,
    /// Empty path, too many arguments, or an argument that is too long.
    InvalidArguments,
    /// The calling process has already exited.
    CallerExited,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::LoadFailed => write!(f, "Image load failed"),
            ExecError::ResourceExhausted => write!(f, "Resources exhausted"),
            ExecError::InvalidArguments => write!(f, "Invalid exec arguments"),
            ExecError::CallerExited => write!(f, "Calling process has exited"),
        }
    }
}

impl From<LoadError> for ExecError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::NotFound | LoadError::Malformed => ExecError::LoadFailed,
            LoadError::OutOfMemory => ExecError::ResourceExhausted,
        }
    }
}

/// Check `exec` arguments against the configured limits.
pub fn validate_args(config: &KernelConfig, path: &str, args: &[&str]) -> Result<(), ExecError> {
    if path.is_empty() || args.len() > config.max_args {
        return Err(ExecError::InvalidArguments);
    }
    if args.iter().any(|arg| arg.len() > config.max_arg_len) {
        return Err(ExecError::InvalidArguments);
    }
    Ok(())
}

/// Start `path` as a new process, a child of `parent` (or parentless when
/// launched by the kernel itself).
///
/// Loads the image, registers a Runnable PCB, links it into the parent's
/// children and hands it to the dispatcher. Does not wait for the child to
/// run. On any failure no PCB survives and the parent is left unchanged.
pub fn launch(
    service: &Arc<ProcessService>,
    parent: Option<ProcessId>,
    path: &str,
    args: &[&str],
) -> Result<ProcessId, ExecError> {
    validate_args(service.config(), path, args)?;

    let table = service.table();
    let parent_pcb = match parent {
        Some(pid) => Some(
            table
                .lookup(pid)
                .filter(|pcb| pcb.is_alive())
                .ok_or(ExecError::CallerExited)?,
        ),
        None => None,
    };

    let image = service.loader().load(path).map_err(|err| {
        log::warn!("exec '{}' failed: {}", path, err);
        ExecError::from(err)
    })?;
    let address_space = image.address_space;

    let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    let pcb = match table.register(parent, String::from(path), args, Some(address_space)) {
        Ok(pcb) => pcb,
        Err(err) => {
            log::warn!("exec '{}' failed: {}", path, err);
            service.loader().release(address_space);
            return Err(ExecError::ResourceExhausted);
        }
    };
    let pid = pcb.pid();

    if let Some(parent_pcb) = &parent_pcb {
        let mut inner = parent_pcb.lock();
        // Linking happens under the parent's lock, so an exit racing with
        // this exec either sees the child in its children or made us fail.
        if !inner.state.is_alive() {
            drop(inner);
            table.remove(pid);
            service.loader().release(address_space);
            return Err(ExecError::CallerExited);
        }
        inner.children.insert(pid);
    }

    let body = (image.entry)(ProcessContext::new(pcb.clone(), service.clone()));
    let exiting = service.clone();
    service.scheduler().submit(pcb, async move {
        let status = body.await;
        exiting.exit(pid, status);
    });

    match parent {
        Some(parent) => log::info!("PID {} created process '{}' with PID {}", parent, path, pid),
        None => log::info!("Created process '{}' with PID {}", path, pid),
    }
    Ok(pid)
}
