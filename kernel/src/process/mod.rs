//! Process management
//!
//! This module handles process creation, teardown and reaping. A process is
//! an address space plus the threads running in it; the threads themselves
//! are scheduled by `crate::task::scheduler`.

use spin::Mutex;

use crate::arch_impl::without_interrupts;

pub mod fd;
pub mod manager;
pub mod process;
pub mod resources;
pub mod table;

pub use fd::{FdTable, FileFlags, FileNode, FileRef};
pub use manager::{ProcessManager, WaitTarget};
pub use process::{Process, ProcessId, ProcessState, ReapReason, ReapStatus};
pub use resources::{ImageLoader, NoHooks, ResourceHooks};

/// Wrapper around the global manager lock
pub struct ProcessManagerGuard {
    pub(crate) _guard: spin::MutexGuard<'static, Option<ProcessManager>>,
}

impl core::ops::Deref for ProcessManagerGuard {
    type Target = Option<ProcessManager>;

    fn deref(&self) -> &Self::Target {
        &self._guard
    }
}

impl core::ops::DerefMut for ProcessManagerGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self._guard
    }
}

/// Global process manager
pub static PROCESS_MANAGER: Mutex<Option<ProcessManager>> = Mutex::new(None);

/// Install the process manager built by early boot.
pub fn init(manager: ProcessManager) {
    crate::layout::log_layout();
    *PROCESS_MANAGER.lock() = Some(manager);
    log::info!("Process management initialized");
}

/// Get a reference to the global process manager
/// NOTE: This acquires a lock without disabling interrupts.
/// Anything reachable from the timer path must use with_process_manager().
pub fn manager() -> ProcessManagerGuard {
    ProcessManagerGuard {
        _guard: PROCESS_MANAGER.lock(),
    }
}

/// Execute a function with the process manager while interrupts are disabled
/// This prevents deadlock when the timer interrupt tries to access the process manager
pub fn with_process_manager<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut ProcessManager) -> R,
{
    without_interrupts(|| {
        let mut manager_lock = PROCESS_MANAGER.lock();
        manager_lock.as_mut().map(f)
    })
}

/// Try to get the process manager without blocking (for interrupt contexts)
pub fn try_manager() -> Option<spin::MutexGuard<'static, Option<ProcessManager>>> {
    PROCESS_MANAGER.try_lock()
}

/// Get the current process ID
pub fn current_pid() -> Option<ProcessId> {
    with_process_manager(|m| m.current_pid()).flatten()
}

/// Exit the current process and switch away from it.
pub fn exit_current() {
    let result = with_process_manager(|m| match m.current_pid() {
        Some(pid) => m.exit(pid, true).map(|_| ()),
        None => Err(crate::error::ProcError::NoCurrentThread),
    });
    match result {
        Some(Ok(())) => {}
        Some(Err(e)) => log::error!("exit_current: {}", e),
        None => log::error!("Process manager not available!"),
    }
}
