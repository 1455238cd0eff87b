// Boot-time configuration for the kproc process subsystem

/// Exit status recorded for a process terminated by a fault rather than by `exit`.
pub const FAULT_EXIT_STATUS: i32 = -1;

/// Clock ticks the timer advances per interrupt.
pub const TICKS_PER_INTERRUPT: u64 = 500;

/// Size of one physical frame handed out by the image loader.
pub const PAGE_SIZE: usize = 0x400;

pub const DEFAULT_MAX_PROCESSES: usize = 64;
pub const DEFAULT_MAX_ARGS: usize = 16;
pub const DEFAULT_MAX_ARG_LEN: usize = 256;
pub const DEFAULT_PHYS_FRAMES: usize = 256;

/// Limits fixed when the process service is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Upper bound on PCBs registered at once, Zombies included.
    pub max_processes: usize,
    /// Maximum number of arguments accepted by `exec`.
    pub max_args: usize,
    /// Maximum length in bytes of a single `exec` argument.
    pub max_arg_len: usize,
    /// Physical frames available to address spaces.
    pub phys_frames: usize,
}

impl KernelConfig {
    pub fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }

    pub fn with_max_args(mut self, max_args: usize) -> Self {
        self.max_args = max_args;
        self
    }

    pub fn with_phys_frames(mut self, phys_frames: usize) -> Self {
        self.phys_frames = phys_frames;
        self
    }

    /// Capacity of the run queue. A live process is queued at most once at a
    /// time; the second half absorbs late wakes of processes already gone.
    pub fn run_queue_capacity(&self) -> usize {
        self.max_processes.max(1) * 2
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            max_args: DEFAULT_MAX_ARGS,
            max_arg_len: DEFAULT_MAX_ARG_LEN,
            phys_frames: DEFAULT_PHYS_FRAMES,
        }
    }
}
