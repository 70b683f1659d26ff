//! System call dispatcher
//!
//! Routes system calls to their appropriate handlers based on the syscall number.

use super::handlers;
use super::{SyscallNumber, UserStrings, SYSCALL_FAILED};
use crate::process::{ImageLoader, ProcessManager};

/// Dispatch a system call to the appropriate handler
pub fn dispatch_syscall(
    manager: &mut ProcessManager,
    loader: &mut dyn ImageLoader,
    user: &dyn UserStrings,
    syscall_num: u64,
    args: [u64; 4],
) -> i64 {
    let syscall = match SyscallNumber::from_u64(syscall_num) {
        Some(s) => s,
        None => {
            log::warn!("Invalid syscall number: {}", syscall_num);
            return SYSCALL_FAILED;
        }
    };
    let [arg1, arg2, arg3, arg4] = args;

    let result = match syscall {
        SyscallNumber::PauseThread => handlers::sys_pause(manager),
        SyscallNumber::GetThreadId => handlers::sys_get_thread_id(manager),
        SyscallNumber::GetProcessId => handlers::sys_get_process_id(manager),
        SyscallNumber::ProcessExit => handlers::sys_exit(manager),
        SyscallNumber::WaitForTermination => {
            handlers::sys_wait_for_termination(manager, arg1 as i64)
        }
        SyscallNumber::CreateProcess => handlers::sys_create_process(manager, user, arg1, arg2),
        SyscallNumber::ProcessLoadExec => {
            handlers::sys_load_exec(manager, loader, user, arg1, arg2, arg3, arg4)
        }
        SyscallNumber::GetProcessHeapMem => handlers::sys_heap_mem(manager, arg1),
        SyscallNumber::ProcessSleep => handlers::sys_sleep(manager, arg1),
        SyscallNumber::SetSignal => handlers::sys_set_signal(manager, arg1, arg2),
        SyscallNumber::GetSystemTimerTick => handlers::sys_system_tick(manager),
        SyscallNumber::CreateThread => handlers::sys_create_thread(manager, user, arg1, arg2),
        SyscallNumber::SetFileToProcess => {
            handlers::sys_set_file_to_process(manager, arg1, arg2, arg3)
        }
        SyscallNumber::SendSignal => handlers::sys_send_signal(manager, arg1, arg2),
        SyscallNumber::ProcessGetFileDesc => handlers::sys_get_file_desc(manager, user, arg1),
        SyscallNumber::GetEnvironmentBlock => handlers::sys_env_block(manager),
    };

    match result {
        Ok(value) => value,
        Err(e) => {
            log::debug!("syscall {:?} failed: {}", syscall, e);
            SYSCALL_FAILED
        }
    }
}
