//! System call handler implementations
//!
//! Each handler acts on behalf of the thread currently on the CPU.

use alloc::vec::Vec;
use x86_64::VirtAddr;

use super::{UserStrings, SYSCALL_FAILED, WAIT_ANY};
use crate::error::ProcError;
use crate::process::{ImageLoader, ProcessId, ProcessManager, WaitTarget};
use crate::task::thread::Tid;

type SysResult = Result<i64, ProcError>;

fn current_pid(m: &ProcessManager) -> Result<ProcessId, ProcError> {
    m.current_pid().ok_or(ProcError::NoCurrentThread)
}

fn user_addr(raw: u64) -> Result<VirtAddr, ProcError> {
    VirtAddr::try_new(raw).map_err(|_| ProcError::AddressSpace)
}

pub fn sys_pause(m: &mut ProcessManager) -> SysResult {
    m.pause_current()?;
    Ok(0)
}

pub fn sys_get_thread_id(m: &ProcessManager) -> SysResult {
    m.current_tid()
        .map(|tid| tid.as_u64() as i64)
        .ok_or(ProcError::NoCurrentThread)
}

pub fn sys_get_process_id(m: &ProcessManager) -> SysResult {
    current_pid(m).map(|pid| pid.as_u64() as i64)
}

pub fn sys_exit(m: &mut ProcessManager) -> SysResult {
    let pid = current_pid(m)?;
    m.exit(pid, true)?;
    Ok(0)
}

/// `-1` performs one wait-any step and returns the reaped PID (0 if none).
pub fn sys_wait_for_termination(m: &mut ProcessManager, target: i64) -> SysResult {
    let waiter = current_pid(m)?;
    if target == WAIT_ANY {
        let reaped = m.wait_for_termination(waiter, WaitTarget::Any)?;
        return Ok(reaped.map_or(0, |pid| pid.as_u64() as i64));
    }
    let pid = u64::try_from(target).map_err(|_| ProcError::NoSuchProcess)?;
    m.wait_for_termination(waiter, WaitTarget::Pid(ProcessId::new(pid)))?;
    Ok(0)
}

pub fn sys_create_process(
    m: &mut ProcessManager,
    user: &dyn UserStrings,
    parent: u64,
    name_ptr: u64,
) -> SysResult {
    let name = user.string(name_ptr).ok_or(ProcError::AddressSpace)?;
    let pid = m.create_process_slot(ProcessId::new(parent), &name)?;
    Ok(pid.as_u64() as i64)
}

pub fn sys_load_exec(
    m: &mut ProcessManager,
    loader: &mut dyn ImageLoader,
    user: &dyn UserStrings,
    pid: u64,
    path_ptr: u64,
    argc: u64,
    argv_ptr: u64,
) -> SysResult {
    let path = user.string(path_ptr).ok_or(ProcError::AddressSpace)?;
    let args = if argc == 0 {
        Vec::new()
    } else {
        user.string_array(argv_ptr, argc)
            .ok_or(ProcError::AddressSpace)?
    };
    let args: Vec<&str> = args.iter().map(|a| a.as_str()).collect();
    m.load_executable(loader, ProcessId::new(pid), &path, &args)?;
    Ok(0)
}

pub fn sys_heap_mem(m: &mut ProcessManager, size: u64) -> SysResult {
    let pid = current_pid(m)?;
    let start = m.allocate_heap(pid, size)?;
    Ok(start.as_u64() as i64)
}

pub fn sys_sleep(m: &mut ProcessManager, ms: u64) -> SysResult {
    m.sleep_current(ms)?;
    Ok(0)
}

pub fn sys_set_signal(m: &mut ProcessManager, signo: u64, handler: u64) -> SysResult {
    m.register_signal(signo as u32, user_addr(handler)?)?;
    Ok(0)
}

pub fn sys_system_tick(m: &ProcessManager) -> SysResult {
    Ok(m.system_ticks() as i64)
}

/// Returns the new thread's id.
pub fn sys_create_thread(
    m: &mut ProcessManager,
    user: &dyn UserStrings,
    entry: u64,
    name_ptr: u64,
) -> SysResult {
    let pid = current_pid(m)?;
    let name = user.string(name_ptr).ok_or(ProcError::AddressSpace)?;
    let index = m.create_user_thread(pid, user_addr(entry)?, &name)?;
    m.process(pid)
        .and_then(|p| p.thread(index))
        .and_then(|h| m.scheduler().get(h))
        .map(|t| t.id.as_u64() as i64)
        .ok_or(ProcError::NoSuchThread)
}

pub fn sys_set_file_to_process(
    m: &mut ProcessManager,
    fd: u64,
    dest_fd: u64,
    dest_pid: u64,
) -> SysResult {
    let src = current_pid(m)?;
    m.set_file_to_process(src, fd as usize, ProcessId::new(dest_pid), dest_fd as usize)?;
    Ok(0)
}

/// Signals go to the target process's main thread.
pub fn sys_send_signal(m: &mut ProcessManager, pid: u64, signo: u64) -> SysResult {
    let tid: Tid = m
        .process(ProcessId::new(pid))
        .ok_or(ProcError::NoSuchProcess)?
        .main_thread()
        .and_then(|h| m.scheduler().get(h))
        .map(|t| t.id)
        .ok_or(ProcError::NoMainThread)?;
    m.send_signal(tid, signo as u32)?;
    Ok(0)
}

pub fn sys_get_file_desc(
    m: &mut ProcessManager,
    user: &dyn UserStrings,
    name_ptr: u64,
) -> SysResult {
    let pid = current_pid(m)?;
    let name = user.string(name_ptr).ok_or(ProcError::AddressSpace)?;
    Ok(m
        .file_descriptor_by_name(pid, &name)
        .map_or(SYSCALL_FAILED, |fd| fd as i64))
}

pub fn sys_env_block(m: &ProcessManager) -> SysResult {
    let pid = current_pid(m)?;
    m.env_block(pid)
        .map(|at| at.as_u64() as i64)
        .ok_or(ProcError::AddressSpace)
}
