//! Hosted backend.
//!
//! Simulates the CPU interrupt flag so critical sections behave the same way
//! under a hosted build as on hardware. Under `cfg(test)` the flag is
//! per-thread so parallel tests do not observe each other's guards.

use super::traits::CpuOps;

pub struct Cpu;


#[cfg(not(test))]
mod flag {
    use core::sync::atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(true);

    pub fn get() -> bool {
        ENABLED.load(Ordering::SeqCst)
    }

    pub fn set(enabled: bool) {
        ENABLED.store(enabled, Ordering::SeqCst);
    }
}

impl CpuOps for Cpu {
    unsafe fn enable_interrupts() {
        flag::set(true);
    }

    unsafe fn disable_interrupts() {
        flag::set(false);
    }

    fn interrupts_enabled() -> bool {
        flag::get()
    }
}
