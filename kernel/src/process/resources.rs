//! Hooks into subsystems that own per-thread or per-process resources.
//!
//! Audio, signal, mailbox and timer bookkeeping live outside the process
//! manager. At exit the manager tells each of them to drop whatever the dying
//! threads registered. Every hook has a no-op default and must tolerate being
//! called for a thread that never registered anything.

use x86_64::VirtAddr;

use super::{ProcessId, ProcessManager};
use crate::error::ProcError;
use crate::process::process::ShmMapping;
use crate::task::thread::Tid;

pub trait ResourceHooks: Send {
    fn release_audio(&mut self, _tid: Tid) {}
    fn release_signals(&mut self, _tid: Tid) {}
    fn release_mailbox(&mut self, _tid: Tid) {}
    fn release_timers(&mut self, _tid: Tid) {}

    /// A shared-memory segment was unmapped from `pid`.
    fn detach_shared_memory(&mut self, _pid: ProcessId, _mapping: &ShmMapping) {}

    fn register_signal(&mut self, _tid: Tid, _signo: u32, _handler: VirtAddr) -> Result<(), ProcError> {
        Ok(())
    }

    /// Queue `signo` for `tid`. The manager wakes the target afterwards.
    fn send_signal(&mut self, _tid: Tid, _signo: u32) -> Result<(), ProcError> {
        Ok(())
    }
}

/// Hooks for a kernel with none of the resource subsystems.
pub struct NoHooks;

impl ResourceHooks for NoHooks {}

/// Loads an executable into a freshly created process slot.
///
/// Implementations map the image, then call
/// [`ProcessManager::spawn_main_thread`] and, if they keep the file open,
/// [`ProcessManager::set_loader_file`].
pub trait ImageLoader {
    fn load(
        &mut self,
        manager: &mut ProcessManager,
        pid: ProcessId,
        path: &str,
        args: &[&str],
    ) -> Result<(), ProcError>;
}
