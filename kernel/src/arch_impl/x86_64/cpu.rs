//! x86_64 CPU operations.
//!
//! Interrupt-flag control for the bare-metal backend.

use crate::arch_impl::traits::CpuOps;

/// x86_64 CPU operations implementation.
pub struct Cpu;

impl CpuOps for Cpu {
    #[inline(always)]
    unsafe fn enable_interrupts() {
        x86_64::instructions::interrupts::enable();
    }

    #[inline(always)]
    unsafe fn disable_interrupts() {
        x86_64::instructions::interrupts::disable();
    }

    #[inline(always)]
    fn interrupts_enabled() -> bool {
        x86_64::instructions::interrupts::are_enabled()
    }
}
