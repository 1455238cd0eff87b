// Image Loader interface for the kproc process subsystem
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::future::Future;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use futures_util::future::{BoxFuture, FutureExt};
use spin::Mutex;

use crate::config::{KernelConfig, PAGE_SIZE};
use crate::process::context::ProcessContext;

/// Entry point of a loaded program. The returned future resolves to the
/// process's exit status.
pub type ProgramEntry = Arc<dyn Fn(ProcessContext) -> BoxFuture<'static, i32> + Send + Sync>;

/// Opaque handle to an address space built by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpaceHandle {
    id: u64,
    pages: usize,
}

impl AddressSpaceHandle {
    pub fn new(id: u64, pages: usize) -> Self {
        Self { id, pages }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn size_in_bytes(&self) -> usize {
        self.pages * PAGE_SIZE
    }
}

/// Result of a successful load: the address space plus the entry point.
pub struct LoadedImage {
    pub address_space: AddressSpaceHandle,
    pub entry: ProgramEntry,
}

/// Image loader errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    NotFound,
    Malformed,
    OutOfMemory,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::NotFound => write!(f, "Image not found"),
            LoadError::Malformed => write!(f, "Malformed image"),
            LoadError::OutOfMemory => write!(f, "Not enough physical memory for image"),
        }
    }
}

/// Builds address spaces for `exec`.
pub trait ImageLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<LoadedImage, LoadError>;

    /// Give back an address space when its process exits.
    fn release(&self, address_space: AddressSpaceHandle);
}

/// A program image: its entry point and the number of pages it occupies.
#[derive(Clone)]
pub struct Program {
    entry: ProgramEntry,
    pages: usize,
}

impl Program {
    pub fn new<F, Fut>(pages: usize, entry: F) -> Self
    where
        F: Fn(ProcessContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        Self {
            entry: Arc::new(move |ctx| entry(ctx).boxed()),
            pages,
        }
    }

    pub fn pages(&self) -> usize {
        self.pages
    }
}

/// In-memory loader: programs are registered under a path and loading one
/// reserves its pages from a fixed pool of physical frames.
pub struct ProgramRegistry {
    programs: Mutex<BTreeMap<String, Program>>,
    free_frames: AtomicUsize,
    total_frames: usize,
    next_space: AtomicU64,
}

impl ProgramRegistry {
    pub fn new(phys_frames: usize) -> Self {
        Self {
            programs: Mutex::new(BTreeMap::new()),
            free_frames: AtomicUsize::new(phys_frames),
            total_frames: phys_frames,
            next_space: AtomicU64::new(1),
        }
    }

    /// A registry sized to the frame budget in `config`.
    pub fn from_config(config: &KernelConfig) -> Self {
        Self::new(config.phys_frames)
    }

    /// Register (or replace) the program stored at `path`.
    pub fn install(&self, path: &str, program: Program) {
        self.programs.lock().insert(String::from(path), program);
    }

    pub fn free_frames(&self) -> usize {
        self.free_frames.load(Ordering::Acquire)
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    fn reserve(&self, pages: usize) -> Result<(), LoadError> {
        self.free_frames
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |free| {
                free.checked_sub(pages)
            })
            .map(|_| ())
            .map_err(|_| LoadError::OutOfMemory)
    }
}

impl ImageLoader for ProgramRegistry {
    fn load(&self, path: &str) -> Result<LoadedImage, LoadError> {
        let program = self
            .programs
            .lock()
            .get(path)
            .cloned()
            .ok_or(LoadError::NotFound)?;
        // An image without a single section cannot be mapped.
        if program.pages == 0 {
            return Err(LoadError::Malformed);
        }
        self.reserve(program.pages)?;

        let id = self.next_space.fetch_add(1, Ordering::Relaxed);
        log::debug!("Loaded '{}' into address space {} ({} pages)", path, id, program.pages);
        Ok(LoadedImage {
            address_space: AddressSpaceHandle::new(id, program.pages),
            entry: program.entry,
        })
    }

    fn release(&self, address_space: AddressSpaceHandle) {
        self.free_frames
            .fetch_add(address_space.pages(), Ordering::AcqRel);
        log::debug!("Released address space {}", address_space.id());
    }
}
