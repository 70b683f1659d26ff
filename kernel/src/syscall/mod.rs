//! System call interface for process and thread management
//!
//! Numbers are fixed by the user-space ABI. Every call returns a signed
//! 64-bit value; failures come back as `-1`.

use alloc::string::String;
use alloc::vec::Vec;

pub mod dispatcher;
pub mod handlers;

pub use dispatcher::dispatch_syscall;

/// System call numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallNumber {
    PauseThread = 1,
    GetThreadId = 2,
    GetProcessId = 3,
    ProcessExit = 4,
    WaitForTermination = 5,
    CreateProcess = 6,
    ProcessLoadExec = 7,
    GetProcessHeapMem = 8,
    ProcessSleep = 9,
    SetSignal = 10,
    GetSystemTimerTick = 11,
    CreateThread = 12,
    SetFileToProcess = 13,
    SendSignal = 14,
    ProcessGetFileDesc = 15,
    GetEnvironmentBlock = 16,
}

impl SyscallNumber {
    /// Try to convert a u64 to a SyscallNumber
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::PauseThread),
            2 => Some(Self::GetThreadId),
            3 => Some(Self::GetProcessId),
            4 => Some(Self::ProcessExit),
            5 => Some(Self::WaitForTermination),
            6 => Some(Self::CreateProcess),
            7 => Some(Self::ProcessLoadExec),
            8 => Some(Self::GetProcessHeapMem),
            9 => Some(Self::ProcessSleep),
            10 => Some(Self::SetSignal),
            11 => Some(Self::GetSystemTimerTick),
            12 => Some(Self::CreateThread),
            13 => Some(Self::SetFileToProcess),
            14 => Some(Self::SendSignal),
            15 => Some(Self::ProcessGetFileDesc),
            16 => Some(Self::GetEnvironmentBlock),
            _ => None,
        }
    }
}

/// Value returned to user space on any failure
pub const SYSCALL_FAILED: i64 = -1;

/// `WaitForTermination` argument meaning "any process"
pub const WAIT_ANY: i64 = -1;

/// Copies string arguments out of the caller's address space.
pub trait UserStrings {
    fn string(&self, ptr: u64) -> Option<String>;

    /// `count` string pointers stored at `array`.
    fn string_array(&self, array: u64, count: u64) -> Option<Vec<String>>;
}
