//! Process address-space layout and scheduler constants
//!
//! Every process shares the same user layout; kernel stacks are carved out of
//! one higher-half window per address space.

use x86_64::VirtAddr;

pub const PAGE_SIZE: u64 = 4096;

// User half
pub const ENV_BLOCK_ADDRESS: u64 = 0x5000;
pub const PROCESS_BREAK_ADDRESS: u64 = 0x0000_0600_0000_0000;
pub const PROCESS_MMAP_ADDRESS: u64 = 0x0000_0700_0000_0000;
pub const USER_STACK_BASE: u64 = 0x0000_7000_0000_0000;
pub const USER_SHARED_MEM_START: u64 = 0x0000_0800_0000_0000;

/// Heap and mmap regions each end where the next region begins.
pub const PROCESS_HEAP_LIMIT: u64 = PROCESS_MMAP_ADDRESS - PROCESS_BREAK_ADDRESS;
pub const PROCESS_MMAP_LIMIT: u64 = USER_SHARED_MEM_START - PROCESS_MMAP_ADDRESS;

/// Size of each user stack (64 KiB)
pub const USER_STACK_SIZE: u64 = 64 * 1024;

/// Bytes left untouched below the top of a fresh user stack
pub const USER_STACK_RESERVE: u64 = 32;

// Kernel half
pub const KERNEL_STACK_BASE: u64 = 0xFFFF_FA00_0000_0000;

/// Size of each kernel stack (16 KiB)
pub const KERNEL_STACK_SIZE: u64 = 16 * 1024;

// Per-process limits
pub const FILE_DESC_PER_PROCESS: usize = 60;
/// stdin, stdout, stderr
pub const RESERVED_STD_FDS: usize = 3;
pub const MAX_THREADS_PER_PROCESS: usize = 60;
pub const PROCESS_NAME_LEN: usize = 16;
pub const THREAD_NAME_LEN: usize = 8;

// Timing
pub const TIMER_TICK_MS: u64 = 1;
pub const WAIT_ANY_QUANTUM_MS: u64 = 10;

// GDT selectors (RPL included for ring 3)
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x33;
pub const USER_DATA_SELECTOR: u16 = 0x2b;

// Root process
pub const ROOT_PROCESS_NAME: &str = "_root";
pub const ROOT_IMAGE_PATH: &str = "/init.exe";
pub const ROOT_IMAGE_ARGS: &[&str] = &["-about"];

/// Milliseconds to scheduler ticks, rounding up so a non-zero sleep always
/// yields at least one tick.
pub const fn ms_to_ticks(ms: u64) -> u64 {
    ms.div_ceil(TIMER_TICK_MS)
}

pub fn user_stack_region(index: u64) -> VirtAddr {
    VirtAddr::new(USER_STACK_BASE + index)
}

pub fn kernel_stack_region(index: u64) -> VirtAddr {
    VirtAddr::new(KERNEL_STACK_BASE + index)
}

/// Log the process layout during initialization
pub fn log_layout() {
    log::info!("LAYOUT: process address space:");
    log::info!("  env block   {:#018x}", ENV_BLOCK_ADDRESS);
    log::info!("  heap break  {:#018x}", PROCESS_BREAK_ADDRESS);
    log::info!("  mmap        {:#018x}", PROCESS_MMAP_ADDRESS);
    log::info!("  shared mem  {:#018x}", USER_SHARED_MEM_START);
    log::info!(
        "  user stacks {:#018x} ({} KiB each)",
        USER_STACK_BASE,
        USER_STACK_SIZE / 1024
    );
    log::info!(
        "  kstacks     {:#018x} ({} KiB each)",
        KERNEL_STACK_BASE,
        KERNEL_STACK_SIZE / 1024
    );
}
