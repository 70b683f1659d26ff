//! Thread data model
//!
//! A thread is the unit the scheduler moves between lists. It belongs to at
//! most one process (the idle thread belongs to none) and carries the
//! register snapshot restored when it is picked.

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use x86_64::{PhysAddr, VirtAddr};

use crate::layout::{
    KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, THREAD_NAME_LEN, USER_CODE_SELECTOR,
    USER_DATA_SELECTOR,
};
use crate::process::ProcessId;

/// Global thread ID counter
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1); // 0 is never handed out

/// Thread identifier. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(u64);

impl Tid {
    pub fn allocate() -> Self {
        Tid(NEXT_THREAD_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Ready to run and on the ready list
    Ready,
    /// Currently on the CPU; still on the ready list
    Running,
    /// Waiting on an event (wait-list, pause, signal)
    Blocked,
    /// Waiting for a tick deadline
    Sleeping,
    /// Terminated, waiting to be reaped
    Trash,
}

bitflags! {
    /// Privilege and role of a thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadLevel: u8 {
        const KERNEL = 1 << 0;
        const USER = 1 << 1;
        const MAIN_THREAD = 1 << 2;
        const SUB_THREAD = 1 << 3;
    }
}

/// CPU context saved during context switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CpuContext {
    /// General purpose registers
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,

    /// Instruction pointer
    pub rip: u64,

    /// CPU flags
    pub rflags: u64,

    /// Segment registers
    pub cs: u64,
    pub ss: u64,
}

impl CpuContext {
    /// Create a new CPU context for a thread entry point
    pub fn new(entry_point: VirtAddr, stack_pointer: VirtAddr, level: ThreadLevel) -> Self {
        let user = level.contains(ThreadLevel::USER) && !level.contains(ThreadLevel::KERNEL);
        Self {
            rsp: stack_pointer.as_u64(),
            rip: entry_point.as_u64(),
            // Bit 1 is reserved and must be set; IF only for ring 3.
            rflags: if user { 0x202 } else { 0x002 },
            cs: if user {
                USER_CODE_SELECTOR as u64
            } else {
                KERNEL_CODE_SELECTOR as u64
            },
            ss: if user {
                USER_DATA_SELECTOR as u64
            } else {
                KERNEL_DATA_SELECTOR as u64
            },
            ..Self::default()
        }
    }
}

/// Where a user thread lands the first time it drops to ring 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserEntry {
    pub entry: VirtAddr,
    pub rsp: VirtAddr,
    pub stack_base: VirtAddr,
    pub cs: u16,
    pub ss: u16,
    pub argc: u64,
    pub argv: u64,
}

/// Thread control block
#[derive(Debug)]
pub struct Thread {
    pub id: Tid,

    /// Short name, at most `THREAD_NAME_LEN` bytes
    name: String,

    /// Owning process; `None` for the idle thread
    pub process: Option<ProcessId>,

    pub state: ThreadState,

    /// Registers restored when this thread is picked
    pub context: CpuContext,

    pub kernel_stack_top: Option<VirtAddr>,

    /// Address space to load before running
    pub page_table_root: PhysAddr,

    pub level: ThreadLevel,

    /// Not consulted by the round-robin scheduler.
    pub priority: u8,

    /// Has this thread ever run? (false for brand new threads)
    pub has_started: bool,

    pub user_entry: Option<Box<UserEntry>>,

    /// Tick at which a sleeping thread becomes ready again
    pub wake_tick: Option<u64>,
}

impl Thread {
    /// Create a thread in the `Ready` state with a fresh id.
    pub fn new(
        name: &str,
        entry_point: VirtAddr,
        stack_top: VirtAddr,
        page_table_root: PhysAddr,
        level: ThreadLevel,
    ) -> Self {
        Self {
            id: Tid::allocate(),
            name: bounded_name(name, THREAD_NAME_LEN),
            process: None,
            state: ThreadState::Ready,
            context: CpuContext::new(entry_point, stack_top, level),
            kernel_stack_top: Some(stack_top),
            page_table_root,
            level,
            priority: 0,
            has_started: false,
            user_entry: None,
            wake_tick: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_user(&self) -> bool {
        self.level.contains(ThreadLevel::USER)
    }

    pub fn is_runnable(&self) -> bool {
        self.state == ThreadState::Ready
    }
}

/// Copy of `name` cut to at most `max` bytes on a char boundary.
pub(crate) fn bounded_name(name: &str, max: usize) -> String {
    let mut end = name.len().min(max);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}
