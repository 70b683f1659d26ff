//! Process structure and lifecycle states

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use x86_64::{PhysAddr, VirtAddr};

use crate::error::ProcError;
use crate::layout::{MAX_THREADS_PER_PROCESS, PROCESS_NAME_LEN, USER_SHARED_MEM_START};
use crate::memory::stack::StackAllocator;
use crate::process::fd::{FdTable, FileRef};
use crate::task::registry::ThreadHandle;
use crate::task::thread::bounded_name;

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    pub const fn new(id: u64) -> Self {
        ProcessId(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a dead process is still in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapReason {
    /// The loader's file handle was still attached at exit
    LoaderFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapStatus {
    /// Removed from the table during exit
    Immediate,
    /// Left in the table for a waiter to reclaim
    PendingReap { reason: ReapReason },
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot created, no main thread yet
    NotReady,
    Ready,
    Running,
    /// Parked in a wait
    Suspended,
    /// Exited; see `ReapStatus`
    Died { reap: ReapStatus },
}

/// A region handed out by the anonymous mmap path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vma {
    pub start: VirtAddr,
    pub len: u64,
}

/// A shared-memory segment mapped into this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmMapping {
    pub key: u64,
    pub base: VirtAddr,
    pub len: u64,
}

/// A process owns an address space, its stacks and descriptors, and the
/// threads running in it.
pub struct Process {
    pub id: ProcessId,

    name: String,

    pub state: ProcessState,

    /// Top-level page table
    pub page_table_root: PhysAddr,

    pub stacks: StackAllocator,

    /// Top of the main thread's user stack
    pub main_stack: VirtAddr,

    /// `None` if the environment page could not be mapped
    pub env_block: Option<VirtAddr>,

    /// Bytes granted from `PROCESS_BREAK_ADDRESS`
    pub heap_len: u64,

    /// Bytes mapped from `PROCESS_MMAP_ADDRESS`
    pub mmap_len: u64,

    pub shm_break: VirtAddr,
    pub shm_maps: Vec<ShmMapping>,
    pub vmas: Vec<Vma>,

    pub fds: FdTable,

    /// Threads blocked until this process exits
    pub waitlist: Vec<ThreadHandle>,

    /// Slot 0 is the main thread, sub-threads from slot 1
    threads: Vec<Option<ThreadHandle>>,

    /// Executable handle held by the loader
    pub file: Option<FileRef>,

    /// Parent process ID (if any)
    pub parent: Option<ProcessId>,
}

impl Process {
    pub fn new(
        id: ProcessId,
        name: &str,
        page_table_root: PhysAddr,
        parent: Option<ProcessId>,
    ) -> Self {
        Self {
            id,
            name: bounded_name(name, PROCESS_NAME_LEN),
            state: ProcessState::NotReady,
            page_table_root,
            stacks: StackAllocator::new(),
            main_stack: VirtAddr::zero(),
            env_block: None,
            heap_len: 0,
            mmap_len: 0,
            shm_break: VirtAddr::new(USER_SHARED_MEM_START),
            shm_maps: Vec::new(),
            vmas: Vec::new(),
            fds: FdTable::new(),
            waitlist: Vec::new(),
            threads: vec![None],
            file: None,
            parent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn main_thread(&self) -> Option<ThreadHandle> {
        self.threads.first().copied().flatten()
    }

    /// Install the loader-created main thread.
    pub fn set_main_thread(&mut self, handle: ThreadHandle) {
        self.threads[0] = Some(handle);
        if self.state == ProcessState::NotReady {
            self.state = ProcessState::Ready;
        }
    }

    /// Append a sub-thread and return its slot index.
    pub fn add_thread(&mut self, handle: ThreadHandle) -> Result<usize, ProcError> {
        if !self.can_add_thread() {
            return Err(ProcError::ThreadLimit);
        }
        self.threads.push(Some(handle));
        Ok(self.threads.len() - 1)
    }

    pub fn can_add_thread(&self) -> bool {
        self.threads.len() < MAX_THREADS_PER_PROCESS
    }

    /// Number of slots in use, main slot included.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn thread(&self, index: usize) -> Option<ThreadHandle> {
        self.threads.get(index).copied().flatten()
    }

    pub fn sub_threads(&self) -> impl Iterator<Item = ThreadHandle> + '_ {
        self.threads.iter().skip(1).filter_map(|t| *t)
    }

    /// Main thread first, then sub-threads.
    pub fn threads(&self) -> impl Iterator<Item = ThreadHandle> + '_ {
        self.threads.iter().filter_map(|t| *t)
    }

    pub fn owns_thread(&self, handle: ThreadHandle) -> bool {
        self.threads().any(|t| t == handle)
    }

    pub fn is_killable(&self) -> bool {
        matches!(self.state, ProcessState::Died { .. })
    }
}
