//! Process table: PID allocation and lookup.

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};

use super::{Process, ProcessId};
use crate::task::registry::ThreadHandle;

/// All processes indexed by PID. PIDs are monotonic, so key order is
/// creation order.
pub struct ProcessTable {
    processes: BTreeMap<ProcessId, Process>,

    /// Next available PID
    next_pid: AtomicU64,

    root: Option<ProcessId>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable {
            processes: BTreeMap::new(),
            next_pid: AtomicU64::new(1), // PIDs start at 1
            root: None,
        }
    }

    /// Forget every process and restart PIDs at 1.
    pub fn reset(&mut self) {
        self.processes.clear();
        self.next_pid.store(1, Ordering::SeqCst);
        self.root = None;
    }

    pub fn allocate_pid(&self) -> ProcessId {
        ProcessId::new(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    pub fn insert(&mut self, process: Process) {
        self.processes.insert(process.id, process);
    }

    pub fn remove(&mut self, pid: ProcessId) -> Option<Process> {
        let removed = self.processes.remove(&pid);
        if removed.is_some() {
            log::debug!("removed process {} from table", pid);
        }
        removed
    }

    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    pub fn set_root(&mut self, pid: ProcessId) {
        self.root = Some(pid);
    }

    pub fn root_pid(&self) -> Option<ProcessId> {
        self.root
    }

    /// Process whose main thread is `handle`.
    pub fn find_by_thread(&self, handle: ThreadHandle) -> Option<ProcessId> {
        self.processes
            .values()
            .find(|p| p.main_thread() == Some(handle))
            .map(|p| p.id)
    }

    /// Process owning `handle` in any thread slot.
    pub fn find_by_sub_thread(&self, handle: ThreadHandle) -> Option<ProcessId> {
        self.processes
            .values()
            .find(|p| p.owns_thread(handle))
            .map(|p| p.id)
    }

    /// Oldest process in the `Died` state.
    pub fn killable(&self) -> Option<ProcessId> {
        self.processes
            .values()
            .find(|p| p.is_killable())
            .map(|p| p.id)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }
}
