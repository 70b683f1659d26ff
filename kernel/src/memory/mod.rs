//! Memory services consumed by the process manager.
//!
//! Physical frame allocation and page-table editing live outside this crate;
//! the manager reaches them through [`MemoryServices`]. The helpers here map
//! and release runs of pages on top of that trait.

pub mod stack;

use alloc::vec::Vec;
use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::error::ProcError;
use crate::layout::PAGE_SIZE;

/// Frame allocator and page-table manipulation for process address spaces.
///
/// `root` is the physical address of a top-level page table previously
/// returned by [`create_address_space`](MemoryServices::create_address_space).
pub trait MemoryServices: Send {
    fn allocate_frame(&mut self) -> Option<PhysAddr>;
    fn free_frame(&mut self, frame: PhysAddr);

    /// Map `virt` to `phys`. Returns `false` if `virt` is already mapped, in
    /// which case the existing mapping is kept.
    fn map_page(&mut self, root: PhysAddr, phys: PhysAddr, virt: VirtAddr, flags: PageTableFlags)
        -> bool;

    fn translate(&self, root: PhysAddr, virt: VirtAddr) -> Option<PhysAddr>;

    /// Remove the mapping for `virt`, leaving the frame alone.
    fn unmap_page(&mut self, root: PhysAddr, virt: VirtAddr);

    /// New top-level table with the kernel half already present.
    fn create_address_space(&mut self) -> Option<PhysAddr>;

    /// Free the page-table hierarchy under `root`. Leaf frames must already
    /// have been released.
    fn destroy_address_space(&mut self, root: PhysAddr);

    fn zero_frame(&mut self, frame: PhysAddr);
    fn copy_frame(&mut self, src: PhysAddr, dst: PhysAddr);
}

pub const USER_FLAGS: PageTableFlags = PageTableFlags::PRESENT
    .union(PageTableFlags::WRITABLE)
    .union(PageTableFlags::USER_ACCESSIBLE);

pub const fn page_align_up(len: u64) -> u64 {
    (len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// `page_align_up` for lengths that come from user space.
pub const fn checked_page_align_up(len: u64) -> Option<u64> {
    match len.checked_add(PAGE_SIZE - 1) {
        Some(end) => Some(end & !(PAGE_SIZE - 1)),
        None => None,
    }
}

/// Back `len` bytes at `base` with fresh zeroed frames.
///
/// A page that is already mapped keeps its old frame; the fresh one goes
/// straight back to the allocator. On exhaustion every page this call
/// mapped is released again before `OutOfMemory` is returned.
pub fn map_fresh_pages(
    mem: &mut dyn MemoryServices,
    root: PhysAddr,
    base: VirtAddr,
    len: u64,
    flags: PageTableFlags,
) -> Result<(), ProcError> {
    let mut mapped: Vec<VirtAddr> = Vec::new();

    for offset in (0..page_align_up(len)).step_by(PAGE_SIZE as usize) {
        let virt = base + offset;
        let frame = match mem.allocate_frame() {
            Some(frame) => frame,
            None => {
                log::warn!("map_fresh_pages: out of frames at {:#x}", virt.as_u64());
                for page in mapped {
                    release_page(mem, root, page);
                }
                return Err(ProcError::OutOfMemory);
            }
        };
        mem.zero_frame(frame);

        if mem.map_page(root, frame, virt, flags) {
            mapped.push(virt);
        } else {
            log::warn!("map_fresh_pages: {:#x} already mapped", virt.as_u64());
            mem.free_frame(frame);
        }
    }
    Ok(())
}

/// Unmap `len` bytes at `base` and free the backing frames. Holes are skipped.
pub fn release_pages(mem: &mut dyn MemoryServices, root: PhysAddr, base: VirtAddr, len: u64) {
    for offset in (0..page_align_up(len)).step_by(PAGE_SIZE as usize) {
        release_page(mem, root, base + offset);
    }
}

/// Unmap without freeing; used for frames owned by someone else.
pub fn unmap_pages(mem: &mut dyn MemoryServices, root: PhysAddr, base: VirtAddr, len: u64) {
    for offset in (0..page_align_up(len)).step_by(PAGE_SIZE as usize) {
        let virt = base + offset;
        if mem.translate(root, virt).is_some() {
            mem.unmap_page(root, virt);
        }
    }
}

fn release_page(mem: &mut dyn MemoryServices, root: PhysAddr, virt: VirtAddr) {
    if let Some(phys) = mem.translate(root, virt) {
        mem.unmap_page(root, virt);
        mem.free_frame(phys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMemory;

    #[test]
    fn test_page_align_up() {
        assert_eq!(page_align_up(0), 0);
        assert_eq!(page_align_up(1), PAGE_SIZE);
        assert_eq!(page_align_up(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_align_up(PAGE_SIZE + 1), 2 * PAGE_SIZE);
    }

    #[test]
    fn test_checked_page_align_up_rejects_overflow() {
        assert_eq!(checked_page_align_up(1), Some(PAGE_SIZE));
        assert_eq!(checked_page_align_up(u64::MAX - PAGE_SIZE), Some(u64::MAX - PAGE_SIZE + 1));
        assert_eq!(checked_page_align_up(u64::MAX), None);
    }

    #[test]
    fn test_map_then_release_returns_every_frame() {
        let mut mem = FakeMemory::new(16);
        let root = mem.create_address_space().unwrap();
        let free_before = mem.free_frames();

        map_fresh_pages(&mut mem, root, VirtAddr::new(0x40_0000), 3 * PAGE_SIZE, USER_FLAGS)
            .unwrap();
        assert_eq!(mem.free_frames(), free_before - 3);

        release_pages(&mut mem, root, VirtAddr::new(0x40_0000), 3 * PAGE_SIZE);
        assert_eq!(mem.free_frames(), free_before);
        assert!(mem.translate(root, VirtAddr::new(0x40_0000)).is_none());
    }

    #[test]
    fn test_exhaustion_rolls_back_partial_mapping() {
        let mut mem = FakeMemory::new(3);
        let root = mem.create_address_space().unwrap();

        let err = map_fresh_pages(&mut mem, root, VirtAddr::new(0x40_0000), 4 * PAGE_SIZE, USER_FLAGS);
        assert_eq!(err, Err(ProcError::OutOfMemory));
        assert_eq!(mem.free_frames(), 2);
        assert_eq!(mem.mapped_pages(root), 0);
    }

    #[test]
    fn test_release_tolerates_holes() {
        let mut mem = FakeMemory::new(8);
        let root = mem.create_address_space().unwrap();
        map_fresh_pages(&mut mem, root, VirtAddr::new(0x40_1000), PAGE_SIZE, USER_FLAGS).unwrap();

        release_pages(&mut mem, root, VirtAddr::new(0x40_0000), 4 * PAGE_SIZE);
        assert_eq!(mem.mapped_pages(root), 0);
    }
}
