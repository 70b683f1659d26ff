//! x86_64 bare-metal backend.
//!
//! CR3 switching and the deferred-reschedule flag read by the timer and
//! syscall return paths.

use core::sync::atomic::{AtomicBool, Ordering};

use x86_64::registers::control::Cr3;
use x86_64::structures::paging::PhysFrame;
use x86_64::{PhysAddr, VirtAddr};

use crate::arch_impl::traits::ArchOps;

pub mod cpu;

pub use cpu::Cpu;

/// Set by blocking primitives; consumed on the way out of an interrupt or
/// syscall to run the scheduler immediately.
static NEED_RESCHED: AtomicBool = AtomicBool::new(false);

/// Take (and clear) a pending reschedule request.
pub fn take_reschedule_request() -> bool {
    NEED_RESCHED.swap(false, Ordering::AcqRel)
}

/// Architecture services for the process manager.
pub struct X86Arch {
    enter_user: VirtAddr,
    process_entry: VirtAddr,
}

impl X86Arch {
    /// `enter_user` and `process_entry` are the assembly trampolines linked
    /// into the kernel image.
    pub const fn new(enter_user: VirtAddr, process_entry: VirtAddr) -> Self {
        Self {
            enter_user,
            process_entry,
        }
    }
}

impl ArchOps for X86Arch {
    fn switch_address_space(&mut self, root: PhysAddr) {
        let (current, flags) = Cr3::read();
        let next = PhysFrame::containing_address(root);
        if current != next {
            // The root was produced by the memory manager and maps the kernel.
            unsafe { Cr3::write(next, flags) };
        }
    }

    fn request_reschedule(&mut self) {
        NEED_RESCHED.store(true, Ordering::Release);
    }

    fn enter_user_trampoline(&self) -> VirtAddr {
        self.enter_user
    }

    fn process_entry_trampoline(&self) -> VirtAddr {
        self.process_entry
    }
}
