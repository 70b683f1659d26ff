//! Architecture-agnostic traits for hardware abstraction.
//!
//! These traits define the interface between architecture-specific code and
//! the scheduler. `CpuOps` is implemented with associated functions because
//! the interrupt flag belongs to the CPU, not to any object; `ArchOps` is the
//! per-instance half that the process manager owns.

use x86_64::{PhysAddr, VirtAddr};

/// Basic CPU control operations.
pub trait CpuOps {
    /// Enable interrupts.
    ///
    /// # Safety
    ///
    /// Must be called in a context where interrupts can be safely taken.
    unsafe fn enable_interrupts();

    /// Disable interrupts.
    ///
    /// # Safety
    ///
    /// Must be paired with a later enable (see `InterruptGuard`).
    unsafe fn disable_interrupts();

    /// Check if interrupts are currently enabled.
    fn interrupts_enabled() -> bool;
}

/// Architecture services consumed by the scheduler and process lifecycle.
pub trait ArchOps: Send {
    /// Load a new page-table root (CR3 on x86, TTBR on ARM).
    fn switch_address_space(&mut self, root: PhysAddr);

    /// Ask for the scheduler to run at the next opportunity.
    ///
    /// Blocking primitives call this after parking the current thread; the
    /// switch itself happens in the next `tick`.
    fn request_reschedule(&mut self);

    /// Routine a first-run user thread resumes into, which drops to ring 3
    /// using the thread's `UserEntry`.
    fn enter_user_trampoline(&self) -> VirtAddr;

    /// Kernel entry point given to sub-threads at creation time.
    fn process_entry_trampoline(&self) -> VirtAddr;

    /// Acknowledge the timer interrupt driving the current tick.
    fn acknowledge_timer(&mut self) {}
}
