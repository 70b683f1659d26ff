//! Architecture abstraction layer.
//!
//! This module provides architecture-agnostic traits and re-exports the
//! current backend. On bare-metal x86_64 the backend drives the real
//! interrupt flag and CR3; on any hosted target a simulated interrupt flag
//! stands in so the scheduler can run under the normal test harness.
//!
//! Multi-step list surgery is wrapped in an `InterruptGuard`, which restores
//! the previous interrupt state when dropped, including on early return.

use core::marker::PhantomData;

pub mod traits;
pub use traits::*;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use self::x86_64 as current;

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub mod hosted;
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub use self::hosted as current;

use current::Cpu;

/// Critical section: interrupts stay masked while the guard is alive.
///
/// Guards nest; only the outermost one re-enables interrupts.
pub struct InterruptGuard {
    was_enabled: bool,
    // Must be dropped on the CPU that created it.
    _not_send: PhantomData<*mut ()>,
}

impl InterruptGuard {
    pub fn new() -> Self {
        let was_enabled = Cpu::interrupts_enabled();
        unsafe { Cpu::disable_interrupts() };
        Self {
            was_enabled,
            _not_send: PhantomData,
        }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            unsafe { Cpu::enable_interrupts() };
        }
    }
}

/// Run `f` with interrupts masked.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = InterruptGuard::new();
    f()
}

/// Whether the current CPU has interrupts enabled.
pub fn interrupts_enabled() -> bool {
    Cpu::interrupts_enabled()
}
