//! Error types for process and thread management.

use core::fmt;

/// Failures reported by the lifecycle, registry, and scheduler operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    /// No process with the given PID exists
    NoSuchProcess,
    /// Handle or id does not name a live thread
    NoSuchThread,
    /// The root process cannot be terminated
    RootProcess,
    /// A root process was already created this boot
    RootExists,
    /// The process thread array is full
    ThreadLimit,
    /// Every descriptor slot is taken
    NoFreeDescriptor,
    /// Descriptor slot is empty or out of range
    BadDescriptor,
    /// The frame allocator ran dry
    OutOfMemory,
    /// Could not create or modify an address space
    AddressSpace,
    /// Operation needs a main thread the loader has not attached yet
    NoMainThread,
    /// Process is not in the `Died` state
    NotKillable,
    /// The idle thread never leaves the ready list
    IdleThread,
    /// Thread is still on one of the scheduler lists
    StillLinked,
    /// Nothing is running yet
    NoCurrentThread,
    /// The image loader refused the executable
    LoadFailed,
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ProcError::NoSuchProcess => "no such process",
            ProcError::NoSuchThread => "no such thread",
            ProcError::RootProcess => "root process cannot be terminated",
            ProcError::RootExists => "root process already exists",
            ProcError::ThreadLimit => "thread limit reached",
            ProcError::NoFreeDescriptor => "no free file descriptor",
            ProcError::BadDescriptor => "bad file descriptor",
            ProcError::OutOfMemory => "out of physical memory",
            ProcError::AddressSpace => "address space operation failed",
            ProcError::NoMainThread => "process has no main thread",
            ProcError::NotKillable => "process has not died",
            ProcError::IdleThread => "idle thread cannot change state",
            ProcError::StillLinked => "thread is still linked on a list",
            ProcError::NoCurrentThread => "no current thread",
            ProcError::LoadFailed => "image load failed",
        };
        f.write_str(msg)
    }
}

/// Contract violations on the intrusive thread lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListError {
    Empty,
    NotMember,
    AlreadyLinked,
    StaleHandle,
}

impl fmt::Display for ListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListError::Empty => write!(f, "list is empty"),
            ListError::NotMember => write!(f, "thread is not on this list"),
            ListError::AlreadyLinked => write!(f, "thread is already on a list"),
            ListError::StaleHandle => write!(f, "stale thread handle"),
        }
    }
}

impl From<ListError> for ProcError {
    fn from(err: ListError) -> Self {
        match err {
            ListError::AlreadyLinked => ProcError::StillLinked,
            ListError::Empty | ListError::NotMember | ListError::StaleHandle => {
                ProcError::NoSuchThread
            }
        }
    }
}
