//! Per-process stack allocation.
//!
//! User and kernel stacks are handed out from two fixed windows with a simple
//! incrementing cursor per process. User stacks are never returned to the
//! window; freeing a kernel stack winds the kernel cursor back by one stack.

use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::error::ProcError;
use crate::layout::{
    kernel_stack_region, user_stack_region, KERNEL_STACK_SIZE, USER_STACK_SIZE,
};
use crate::memory::{map_fresh_pages, release_pages, MemoryServices, USER_FLAGS};

/// Stack cursors for one address space
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StackAllocator {
    /// Byte offset of the next user stack from `USER_STACK_BASE`
    user_index: u64,
    /// Byte offset of the next kernel stack from `KERNEL_STACK_BASE`
    kernel_index: u64,
}

impl StackAllocator {
    pub const fn new() -> Self {
        Self {
            user_index: 0,
            kernel_index: 0,
        }
    }

    /// Map a user stack and return its top (highest address, exclusive).
    pub fn allocate_user_stack(
        &mut self,
        root: PhysAddr,
        mem: &mut dyn MemoryServices,
    ) -> Result<VirtAddr, ProcError> {
        let base = user_stack_region(self.user_index);
        map_fresh_pages(mem, root, base, USER_STACK_SIZE, USER_FLAGS)?;
        self.user_index += USER_STACK_SIZE;

        log::debug!(
            "user stack {:#x}-{:#x}",
            base.as_u64(),
            base.as_u64() + USER_STACK_SIZE
        );
        Ok(base + USER_STACK_SIZE)
    }

    /// Map a kernel stack and return its top.
    pub fn allocate_kernel_stack(
        &mut self,
        root: PhysAddr,
        mem: &mut dyn MemoryServices,
    ) -> Result<VirtAddr, ProcError> {
        let base = kernel_stack_region(self.kernel_index);
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        map_fresh_pages(mem, root, base, KERNEL_STACK_SIZE, flags)?;
        self.kernel_index += KERNEL_STACK_SIZE;

        log::debug!(
            "kernel stack {:#x}-{:#x}",
            base.as_u64(),
            base.as_u64() + KERNEL_STACK_SIZE
        );
        Ok(base + KERNEL_STACK_SIZE)
    }

    /// Release the kernel stack starting at `base`.
    ///
    /// The cursor moves back by one stack whichever stack is freed, so only
    /// LIFO frees keep the window dense.
    pub fn free_kernel_stack(
        &mut self,
        base: VirtAddr,
        root: PhysAddr,
        mem: &mut dyn MemoryServices,
    ) {
        release_pages(mem, root, base, KERNEL_STACK_SIZE);
        self.kernel_index = self.kernel_index.saturating_sub(KERNEL_STACK_SIZE);
    }

    pub fn user_index(&self) -> u64 {
        self.user_index
    }

    pub fn kernel_index(&self) -> u64 {
        self.kernel_index
    }
}

/// Base of the kernel stack whose top is `top`.
pub fn kernel_stack_base(top: VirtAddr) -> VirtAddr {
    top - KERNEL_STACK_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{KERNEL_STACK_BASE, PAGE_SIZE, USER_STACK_BASE};
    use crate::testing::FakeMemory;

    #[test]
    fn test_user_stacks_are_distinct_and_adjacent() {
        let mut mem = FakeMemory::new(256);
        let root = mem.create_address_space().unwrap();
        let mut stacks = StackAllocator::new();

        let tops: alloc::vec::Vec<u64> = (0..5)
            .map(|_| stacks.allocate_user_stack(root, &mut mem).unwrap().as_u64())
            .collect();

        for (i, top) in tops.iter().enumerate() {
            assert_eq!(*top, USER_STACK_BASE + (i as u64 + 1) * USER_STACK_SIZE);
        }
        for pair in tops.windows(2) {
            assert_eq!(pair[1] - pair[0], USER_STACK_SIZE);
        }
        assert_eq!(
            mem.mapped_pages(root) as u64,
            5 * USER_STACK_SIZE / PAGE_SIZE
        );
    }

    #[test]
    fn test_kernel_stack_free_rewinds_cursor_and_frees_frames() {
        let mut mem = FakeMemory::new(64);
        let root = mem.create_address_space().unwrap();
        let mut stacks = StackAllocator::new();
        let free_before = mem.free_frames();

        let top = stacks.allocate_kernel_stack(root, &mut mem).unwrap();
        assert_eq!(top.as_u64(), KERNEL_STACK_BASE + KERNEL_STACK_SIZE);
        assert_eq!(stacks.kernel_index(), KERNEL_STACK_SIZE);

        stacks.free_kernel_stack(kernel_stack_base(top), root, &mut mem);
        assert_eq!(stacks.kernel_index(), 0);
        assert_eq!(mem.free_frames(), free_before);

        // The window is reused.
        let again = stacks.allocate_kernel_stack(root, &mut mem).unwrap();
        assert_eq!(again, top);
    }

    #[test]
    fn test_collision_keeps_old_mapping_and_returns_frame() {
        let mut mem = FakeMemory::new(64);
        let root = mem.create_address_space().unwrap();
        let frame = mem.allocate_frame().unwrap();
        assert!(mem.map_page(root, frame, VirtAddr::new(USER_STACK_BASE), USER_FLAGS));
        let free_before = mem.free_frames();

        let mut stacks = StackAllocator::new();
        stacks.allocate_user_stack(root, &mut mem).unwrap();

        assert_eq!(mem.translate(root, VirtAddr::new(USER_STACK_BASE)), Some(frame));
        let pages = USER_STACK_SIZE / PAGE_SIZE;
        assert_eq!(mem.free_frames() as u64, free_before as u64 - (pages - 1));
    }

    #[test]
    fn test_exhaustion_does_not_advance_cursor() {
        let mut mem = FakeMemory::new(4);
        let root = mem.create_address_space().unwrap();
        let mut stacks = StackAllocator::new();

        assert_eq!(
            stacks.allocate_user_stack(root, &mut mem),
            Err(ProcError::OutOfMemory)
        );
        assert_eq!(stacks.user_index(), 0);
    }
}
