// Process Table for the kproc process subsystem
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::loader::AddressSpaceHandle;
use crate::process::pcb::{ProcessControlBlock, ProcessId, ProcessInfo};

/// Returned when registering a PCB would exceed the table's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

impl fmt::Display for TableFull {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Process table full")
    }
}

/// Registry of every PCB that has not yet been reaped.
///
/// Only the map itself is guarded here; each PCB carries its own lock, so
/// unrelated exec/join traffic only meets on the short map operations.
pub struct ProcessTable {
    next_pid: AtomicU64,
    processes: Mutex<BTreeMap<ProcessId, Arc<ProcessControlBlock>>>,
    capacity: usize,
}

impl ProcessTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            next_pid: AtomicU64::new(1), // Start from PID 1
            processes: Mutex::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Hand out a fresh identifier. Identifiers are never reused.
    pub fn allocate(&self) -> ProcessId {
        ProcessId(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate an identifier and register a new Runnable PCB under it.
    ///
    /// The capacity check and the insertion happen under one lock, so
    /// concurrent launches can never overshoot the limit.
    pub fn register(
        &self,
        parent: Option<ProcessId>,
        name: String,
        args: Vec<String>,
        address_space: Option<AddressSpaceHandle>,
    ) -> Result<Arc<ProcessControlBlock>, TableFull> {
        let mut processes = self.processes.lock();
        if processes.len() >= self.capacity {
            return Err(TableFull);
        }
        let pid = self.allocate();
        let pcb = Arc::new(ProcessControlBlock::new(
            pid,
            parent,
            name,
            args,
            address_space,
        ));
        processes.insert(pid, pcb.clone());
        Ok(pcb)
    }

    pub fn lookup(&self, pid: ProcessId) -> Option<Arc<ProcessControlBlock>> {
        self.processes.lock().get(&pid).cloned()
    }

    /// Deregister a PCB. A second removal of the same id is a no-op.
    pub fn remove(&self, pid: ProcessId) -> Option<Arc<ProcessControlBlock>> {
        let removed = self.processes.lock().remove(&pid);
        if removed.is_some() {
            log::debug!("Reaped process PID {}", pid);
        }
        removed
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.processes.lock().contains_key(&pid)
    }

    /// Number of registered PCBs, Zombies included.
    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered PCBs that have not exited yet.
    pub fn live_count(&self) -> usize {
        self.processes
            .lock()
            .values()
            .filter(|pcb| pcb.is_alive())
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// List all processes
    pub fn list(&self) -> Vec<ProcessInfo> {
        let pcbs: Vec<Arc<ProcessControlBlock>> =
            self.processes.lock().values().cloned().collect();
        // PCB locks are taken after the map lock is released.
        pcbs.iter().map(|pcb| pcb.info()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;

    fn register(table: &ProcessTable) -> Result<Arc<ProcessControlBlock>, TableFull> {
        table.register(None, String::from("test.coff"), Vec::new(), None)
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let table = ProcessTable::new(16);
        let mut seen = BTreeSet::new();
        for _ in 0..10 {
            let pcb = register(&table).unwrap();
            assert!(seen.insert(pcb.pid()));
        }
        let ids: Vec<_> = seen.into_iter().collect();
        assert_eq!(ids.first(), Some(&ProcessId(1)));
        assert_eq!(ids.last(), Some(&ProcessId(10)));
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let table = ProcessTable::new(4);
        let first = register(&table).unwrap().pid();
        table.remove(first);
        let second = register(&table).unwrap().pid();
        assert_ne!(first, second);
        assert!(table.lookup(first).is_none());
    }

    #[test]
    fn remove_twice_is_a_noop() {
        let table = ProcessTable::new(4);
        let pid = register(&table).unwrap().pid();
        assert!(table.remove(pid).is_some());
        assert!(table.remove(pid).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn register_respects_capacity() {
        let table = ProcessTable::new(2);
        register(&table).unwrap();
        register(&table).unwrap();
        assert_eq!(register(&table).unwrap_err(), TableFull);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn concurrent_registration_never_shares_an_id() {
        let table = Arc::new(ProcessTable::new(1024));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    (0..64)
                        .map(|_| register(&table).unwrap().pid())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = BTreeSet::new();
        for handle in handles {
            for pid in handle.join().unwrap() {
                assert!(all.insert(pid));
            }
        }
        assert_eq!(all.len(), 8 * 64);
        assert_eq!(table.len(), 8 * 64);
    }
}
