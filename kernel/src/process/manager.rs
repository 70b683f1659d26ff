//! Process manager - process lifecycle on top of the scheduler
//!
//! Creates process slots and their threads, tears processes down at exit,
//! and implements the waits, sleeps and signals that park threads. All
//! multi-step list surgery runs under an `InterruptGuard`.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;
use x86_64::{PhysAddr, VirtAddr};

use super::fd::FileRef;
use super::process::{ReapReason, ReapStatus, ShmMapping, Vma};
use super::resources::{ImageLoader, ResourceHooks};
use super::table::ProcessTable;
use super::{Process, ProcessId, ProcessState};
use crate::arch_impl::{ArchOps, InterruptGuard};
use crate::error::ProcError;
use crate::layout::{
    ms_to_ticks, ENV_BLOCK_ADDRESS, KERNEL_STACK_SIZE, PAGE_SIZE, PROCESS_BREAK_ADDRESS,
    PROCESS_HEAP_LIMIT, PROCESS_MMAP_ADDRESS, PROCESS_MMAP_LIMIT, ROOT_IMAGE_ARGS,
    ROOT_IMAGE_PATH, ROOT_PROCESS_NAME, USER_CODE_SELECTOR, USER_DATA_SELECTOR, USER_STACK_BASE,
    USER_STACK_RESERVE, WAIT_ANY_QUANTUM_MS,
};
use crate::memory::stack::{kernel_stack_base, StackAllocator};
use crate::memory::{
    checked_page_align_up, map_fresh_pages, release_pages, unmap_pages, MemoryServices, USER_FLAGS,
};
use crate::task::registry::ThreadHandle;
use crate::task::scheduler::{Scheduler, Switch};
use crate::task::thread::{CpuContext, Thread, ThreadLevel, ThreadState, Tid, UserEntry};

/// What a wait is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    /// Reap whichever process dies
    Any,
    Pid(ProcessId),
}

/// Process manager handles all processes in the system
pub struct ProcessManager {
    table: ProcessTable,
    scheduler: Scheduler,
    mem: Box<dyn MemoryServices>,
    arch: Box<dyn ArchOps>,
    hooks: Box<dyn ResourceHooks>,

    /// Kernel address space, home of the idle thread
    kernel_root: PhysAddr,
    kernel_stacks: StackAllocator,

    /// Serialises image loading; created by `start_root_process`
    loader_lock: Option<Arc<Mutex<()>>>,
}

impl ProcessManager {
    /// Create a new process manager with an idle thread running `idle_entry`
    /// in the kernel address space.
    pub fn new(
        mut mem: Box<dyn MemoryServices>,
        arch: Box<dyn ArchOps>,
        hooks: Box<dyn ResourceHooks>,
        kernel_root: PhysAddr,
        idle_entry: VirtAddr,
    ) -> Result<Self, ProcError> {
        let mut kernel_stacks = StackAllocator::new();
        let idle_stack = kernel_stacks.allocate_kernel_stack(kernel_root, mem.as_mut())?;
        let idle = Thread::new("idle", idle_entry, idle_stack, kernel_root, ThreadLevel::KERNEL);
        log::info!(
            "idle thread {} on kernel stack {:#x}",
            idle.id,
            idle_stack.as_u64()
        );

        Ok(ProcessManager {
            table: ProcessTable::new(),
            scheduler: Scheduler::new(idle),
            mem,
            arch,
            hooks,
            kernel_root,
            kernel_stacks,
            loader_lock: None,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn start_scheduler(&mut self) {
        self.scheduler.start();
    }

    pub fn process(&self, pid: ProcessId) -> Option<&Process> {
        self.table.get(pid)
    }

    pub fn process_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.table.get_mut(pid)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.table.iter()
    }

    /// For loaders mapping an image into a slot.
    pub fn memory_mut(&mut self) -> &mut dyn MemoryServices {
        self.mem.as_mut()
    }

    pub fn kernel_root(&self) -> PhysAddr {
        self.kernel_root
    }

    pub fn loader_lock(&self) -> Option<Arc<Mutex<()>>> {
        self.loader_lock.clone()
    }

    // ---------------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------------

    /// Create the first process of the boot.
    pub fn create_root_process(&mut self) -> Result<ProcessId, ProcError> {
        if let Some(root) = self.table.root_pid() {
            log::error!("root process {} already exists", root);
            return Err(ProcError::RootExists);
        }
        let pid = self.create_slot(ROOT_PROCESS_NAME, None)?;
        self.table.set_root(pid);
        Ok(pid)
    }

    /// Create an empty process that inherits `parent`'s environment block.
    pub fn create_process_slot(
        &mut self,
        parent: ProcessId,
        name: &str,
    ) -> Result<ProcessId, ProcError> {
        self.create_slot(name, Some(parent))
    }

    fn create_slot(&mut self, name: &str, parent: Option<ProcessId>) -> Result<ProcessId, ProcError> {
        let parent_env = match parent {
            Some(ppid) => {
                let p = self.table.get(ppid).ok_or(ProcError::NoSuchProcess)?;
                p.env_block
                    .and_then(|env| self.mem.translate(p.page_table_root, env))
            }
            None => None,
        };

        let mem = self.mem.as_mut();
        let root = mem.create_address_space().ok_or(ProcError::AddressSpace)?;
        let mut stacks = StackAllocator::new();
        let main_stack = match stacks.allocate_user_stack(root, mem) {
            Ok(top) => top,
            Err(e) => {
                mem.destroy_address_space(root);
                return Err(e);
            }
        };
        let env_block = map_env_block(mem, root, parent_env, name);

        let pid = self.table.allocate_pid();
        let mut process = Process::new(pid, name, root, parent);
        process.stacks = stacks;
        process.main_stack = main_stack;
        process.env_block = env_block;
        self.table.insert(process);

        log::info!(
            "Created process {} '{}' (parent {:?}, root {:#x})",
            pid,
            name,
            parent.map(|p| p.as_u64()),
            root.as_u64()
        );
        Ok(pid)
    }

    /// Create the main thread of `pid`. Called by the image loader once the
    /// executable is mapped.
    pub fn spawn_main_thread(
        &mut self,
        pid: ProcessId,
        entry: VirtAddr,
        argc: u64,
        argv: u64,
    ) -> Result<ThreadHandle, ProcError> {
        let trampoline = self.arch.process_entry_trampoline();
        let process = self.table.get_mut(pid).ok_or(ProcError::NoSuchProcess)?;
        let root = process.page_table_root;
        let kstack = process.stacks.allocate_kernel_stack(root, self.mem.as_mut())?;

        let rsp = process.main_stack - USER_STACK_RESERVE;
        let thread = user_thread(
            process.name(),
            pid,
            trampoline,
            kstack,
            root,
            ThreadLevel::USER | ThreadLevel::MAIN_THREAD,
            UserEntry {
                entry,
                rsp,
                stack_base: rsp,
                cs: USER_CODE_SELECTOR,
                ss: USER_DATA_SELECTOR,
                argc,
                argv,
            },
        );
        let tid = thread.id;
        let handle = self.scheduler.spawn(thread);
        process.set_main_thread(handle);

        log::info!("process {} main thread {} entry {:#x}", pid, tid, entry.as_u64());
        Ok(handle)
    }

    /// Hand the loader's executable handle to the process. Its presence at
    /// exit defers the final reap.
    pub fn set_loader_file(&mut self, pid: ProcessId, file: FileRef) -> Result<(), ProcError> {
        let process = self.table.get_mut(pid).ok_or(ProcError::NoSuchProcess)?;
        process.file = Some(file);
        Ok(())
    }

    /// Add a user thread starting at `entry` and return its slot index.
    pub fn create_user_thread(
        &mut self,
        pid: ProcessId,
        entry: VirtAddr,
        name: &str,
    ) -> Result<usize, ProcError> {
        let trampoline = self.arch.process_entry_trampoline();
        let process = self.table.get_mut(pid).ok_or(ProcError::NoSuchProcess)?;
        if !process.can_add_thread() {
            log::warn!("process {} is at its thread limit", pid);
            return Err(ProcError::ThreadLimit);
        }

        let root = process.page_table_root;
        let mem = self.mem.as_mut();
        let kstack = process.stacks.allocate_kernel_stack(root, mem)?;
        let ustack = match process.stacks.allocate_user_stack(root, mem) {
            Ok(top) => top,
            Err(e) => {
                process.stacks.free_kernel_stack(kernel_stack_base(kstack), root, mem);
                return Err(e);
            }
        };

        let rsp = ustack - USER_STACK_RESERVE;
        let thread = user_thread(
            name,
            pid,
            trampoline,
            kstack,
            root,
            ThreadLevel::USER | ThreadLevel::SUB_THREAD,
            UserEntry {
                entry,
                rsp,
                stack_base: rsp,
                cs: USER_CODE_SELECTOR,
                ss: USER_DATA_SELECTOR,
                argc: 0,
                argv: 0,
            },
        );
        let tid = thread.id;
        let handle = self.scheduler.spawn(thread);
        let index = process.add_thread(handle)?;

        log::debug!("process {} thread {} in slot {}", pid, tid, index);
        Ok(index)
    }

    /// Run `path` in `pid` through `loader`.
    pub fn load_executable(
        &mut self,
        loader: &mut dyn ImageLoader,
        pid: ProcessId,
        path: &str,
        args: &[&str],
    ) -> Result<(), ProcError> {
        if self.table.get(pid).is_none() {
            return Err(ProcError::NoSuchProcess);
        }
        loader.load(self, pid, path, args)
    }

    /// Boot-time entry: fresh process table, loader mutex, root process
    /// running `/init.exe`.
    pub fn start_root_process(&mut self, loader: &mut dyn ImageLoader) -> Result<ProcessId, ProcError> {
        self.table.reset();
        self.loader_lock = Some(Arc::new(Mutex::new(())));

        let pid = self.create_root_process()?;
        loader.load(self, pid, ROOT_IMAGE_PATH, ROOT_IMAGE_ARGS)?;
        log::info!("root process {} started from {}", pid, ROOT_IMAGE_PATH);
        Ok(pid)
    }

    // ---------------------------------------------------------------------
    // Termination
    // ---------------------------------------------------------------------

    /// Terminate `pid` and release everything it holds except its address
    /// space. Threads end up in the trash list. The root process cannot
    /// exit.
    pub fn exit(&mut self, pid: ProcessId, reschedule_now: bool) -> Result<ReapStatus, ProcError> {
        let _guard = InterruptGuard::new();
        if self.table.root_pid() == Some(pid) {
            log::error!("cannot exit root process");
            return Err(ProcError::RootProcess);
        }

        let status = self.mark_for_reclaim(pid)?;
        if reschedule_now {
            self.arch.request_reschedule();
        }
        Ok(status)
    }

    fn mark_for_reclaim(&mut self, pid: ProcessId) -> Result<ReapStatus, ProcError> {
        let Self {
            table,
            scheduler,
            mem,
            hooks,
            ..
        } = self;
        let process = table.get_mut(pid).ok_or(ProcError::NoSuchProcess)?;
        if let ProcessState::Died { reap } = process.state {
            return Ok(reap);
        }

        log::info!("Process {} '{}' exiting", pid, process.name());
        process.state = ProcessState::Died {
            reap: ReapStatus::Immediate,
        };
        let root = process.page_table_root;

        if let Some(tid) = process.main_thread().and_then(|h| scheduler.get(h)).map(|t| t.id) {
            release_thread_resources(hooks.as_mut(), tid);
        }
        for handle in process.sub_threads() {
            if let Some(tid) = scheduler.get(handle).map(|t| t.id) {
                release_thread_resources(hooks.as_mut(), tid);
                let _ = scheduler.trash(handle);
            }
        }

        process.fds.close_all();

        for waiter in process.waitlist.drain(..) {
            let _ = scheduler.unblock(waiter);
        }

        release_pages(
            mem.as_mut(),
            root,
            VirtAddr::new(PROCESS_MMAP_ADDRESS),
            process.mmap_len,
        );
        process.mmap_len = 0;
        process.vmas.clear();

        for mapping in process.shm_maps.drain(..) {
            unmap_pages(mem.as_mut(), root, mapping.base, mapping.len);
            hooks.detach_shared_memory(pid, &mapping);
        }

        release_pages(
            mem.as_mut(),
            root,
            VirtAddr::new(PROCESS_BREAK_ADDRESS),
            process.heap_len,
        );
        process.heap_len = 0;

        let status = match process.file.take() {
            Some(file) => {
                file.lock().freed = true;
                ReapStatus::PendingReap {
                    reason: ReapReason::LoaderFile,
                }
            }
            None => ReapStatus::Immediate,
        };
        if let Some(main) = process.main_thread() {
            let _ = scheduler.trash(main);
        }
        process.state = ProcessState::Died { reap: status };

        if status == ReapStatus::Immediate {
            table.remove(pid);
        }
        Ok(status)
    }

    /// Final reap of a dead process: free its threads, stacks, environment
    /// block and page tables, and drop it from the table.
    pub fn reclaim(&mut self, pid: ProcessId) -> Result<(), ProcError> {
        let _guard = InterruptGuard::new();
        let process = self.table.get(pid).ok_or(ProcError::NoSuchProcess)?;
        if !process.is_killable() {
            return Err(ProcError::NotKillable);
        }
        if let Some(current) = self.scheduler.current() {
            if process.owns_thread(current) {
                return Err(ProcError::StillLinked);
            }
        }

        let mut process = self.table.remove(pid).ok_or(ProcError::NoSuchProcess)?;
        for waiter in process.waitlist.drain(..) {
            let _ = self.scheduler.unblock(waiter);
        }
        let root = process.page_table_root;
        let mem = self.mem.as_mut();

        let threads: Vec<ThreadHandle> = process.threads().collect();
        for handle in threads {
            // Already freed by an earlier trash pass if this fails.
            if let Ok(thread) = self.scheduler.reap(handle) {
                if let Some(top) = thread.kernel_stack_top {
                    process
                        .stacks
                        .free_kernel_stack(kernel_stack_base(top), root, mem);
                }
            }
        }

        release_pages(
            mem,
            root,
            VirtAddr::new(USER_STACK_BASE),
            process.stacks.user_index(),
        );
        if let Some(env) = process.env_block {
            release_pages(mem, root, env, PAGE_SIZE);
        }
        mem.destroy_address_space(root);

        log::info!("Reclaimed process {} '{}'", pid, process.name());
        Ok(())
    }

    /// Free trashed threads and their kernel stacks.
    pub fn reap_trash(&mut self) -> usize {
        let Self {
            table,
            scheduler,
            mem,
            ..
        } = self;
        scheduler.reap_trash(|thread| {
            let Some(top) = thread.kernel_stack_top else {
                return;
            };
            let base = kernel_stack_base(top);
            match thread.process.and_then(|pid| table.get_mut(pid)) {
                Some(p) => p
                    .stacks
                    .free_kernel_stack(base, thread.page_table_root, mem.as_mut()),
                None => release_pages(
                    mem.as_mut(),
                    thread.page_table_root,
                    base,
                    KERNEL_STACK_SIZE,
                ),
            }
        })
    }

    // ---------------------------------------------------------------------
    // Waiting
    // ---------------------------------------------------------------------

    /// Wait for `target` on behalf of `waiter`.
    ///
    /// `Any` performs a single poll step and returns the PID it reaped, if
    /// any; callers loop. `Pid` blocks the current thread until the target
    /// exits.
    pub fn wait_for_termination(
        &mut self,
        waiter: ProcessId,
        target: WaitTarget,
    ) -> Result<Option<ProcessId>, ProcError> {
        match target {
            WaitTarget::Any => self.poll_wait_any(waiter),
            WaitTarget::Pid(pid) => {
                self.wait_for_pid(pid)?;
                Ok(None)
            }
        }
    }

    /// Reap at most one dead process, then park the waiter for one quantum.
    pub fn poll_wait_any(&mut self, waiter: ProcessId) -> Result<Option<ProcessId>, ProcError> {
        let main = self
            .table
            .get(waiter)
            .ok_or(ProcError::NoSuchProcess)?
            .main_thread();

        let reaped = match self.table.killable() {
            Some(dead) => match self.reclaim(dead) {
                Ok(()) => Some(dead),
                Err(e) => {
                    log::warn!("wait: could not reclaim process {}: {}", dead, e);
                    None
                }
            },
            None => None,
        };

        let main = main.ok_or(ProcError::NoMainThread)?;
        self.scheduler
            .sleep(main, ms_to_ticks(WAIT_ANY_QUANTUM_MS))?;
        if let Some(p) = self.table.get_mut(waiter) {
            p.state = ProcessState::Suspended;
        }
        self.arch.request_reschedule();
        Ok(reaped)
    }

    fn wait_for_pid(&mut self, target: ProcessId) -> Result<(), ProcError> {
        let _guard = InterruptGuard::new();
        let process = self.table.get(target).ok_or(ProcError::NoSuchProcess)?;
        // Its exit pass already ran and nobody is left to wake us.
        if process.is_killable() {
            return Ok(());
        }
        let current = self.scheduler.block_current()?;
        if let Some(p) = self.table.get_mut(target) {
            p.waitlist.push(current);
        }
        self.arch.request_reschedule();
        Ok(())
    }

    /// Put the running thread to sleep for at least `ms` milliseconds.
    pub fn sleep_current(&mut self, ms: u64) -> Result<(), ProcError> {
        let current = self.scheduler.current().ok_or(ProcError::NoCurrentThread)?;
        self.scheduler.sleep(current, ms_to_ticks(ms))?;
        self.arch.request_reschedule();
        Ok(())
    }

    /// Block the running thread until a signal arrives.
    pub fn pause_current(&mut self) -> Result<(), ProcError> {
        self.scheduler.block_current()?;
        self.arch.request_reschedule();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Signals
    // ---------------------------------------------------------------------

    pub fn register_signal(&mut self, signo: u32, handler: VirtAddr) -> Result<(), ProcError> {
        let tid = self.current_tid().ok_or(ProcError::NoCurrentThread)?;
        self.hooks.register_signal(tid, signo, handler)
    }

    /// Queue `signo` for `tid`, waking it if it is blocked.
    pub fn send_signal(&mut self, tid: Tid, signo: u32) -> Result<(), ProcError> {
        let handle = self.scheduler.find(tid).ok_or(ProcError::NoSuchThread)?;
        self.hooks.send_signal(tid, signo)?;
        self.scheduler.unblock(handle)
    }

    // ---------------------------------------------------------------------
    // Memory
    // ---------------------------------------------------------------------

    /// Grow the process heap by `size` bytes (rounded up to pages) and return
    /// the start of the new region.
    pub fn allocate_heap(&mut self, pid: ProcessId, size: u64) -> Result<VirtAddr, ProcError> {
        let process = self.table.get_mut(pid).ok_or(ProcError::NoSuchProcess)?;
        let len = region_growth(process.heap_len, size, PROCESS_HEAP_LIMIT)?;
        let start = VirtAddr::new(PROCESS_BREAK_ADDRESS + process.heap_len);
        map_fresh_pages(self.mem.as_mut(), process.page_table_root, start, len, USER_FLAGS)?;
        process.heap_len += len;
        Ok(start)
    }

    /// Map `len` bytes of anonymous memory after the existing mmap region.
    pub fn map_anonymous(&mut self, pid: ProcessId, len: u64) -> Result<VirtAddr, ProcError> {
        let process = self.table.get_mut(pid).ok_or(ProcError::NoSuchProcess)?;
        let len = region_growth(process.mmap_len, len, PROCESS_MMAP_LIMIT)?;
        let start = VirtAddr::new(PROCESS_MMAP_ADDRESS + process.mmap_len);
        map_fresh_pages(self.mem.as_mut(), process.page_table_root, start, len, USER_FLAGS)?;
        process.mmap_len += len;
        process.vmas.push(Vma { start, len });
        Ok(start)
    }

    /// Map an existing shared segment at the process's shared-memory break.
    pub fn attach_shared_memory(
        &mut self,
        pid: ProcessId,
        key: u64,
        frames: &[PhysAddr],
    ) -> Result<VirtAddr, ProcError> {
        let process = self.table.get_mut(pid).ok_or(ProcError::NoSuchProcess)?;
        let base = process.shm_break;
        for (i, frame) in frames.iter().enumerate() {
            let virt = base + i as u64 * PAGE_SIZE;
            if !self
                .mem
                .map_page(process.page_table_root, *frame, virt, USER_FLAGS)
            {
                log::warn!("shared page {:#x} already mapped", virt.as_u64());
            }
        }
        let len = frames.len() as u64 * PAGE_SIZE;
        process.shm_maps.push(ShmMapping { key, base, len });
        process.shm_break = base + len;
        Ok(base)
    }

    pub fn env_block(&self, pid: ProcessId) -> Option<VirtAddr> {
        self.table.get(pid).and_then(|p| p.env_block)
    }

    // ---------------------------------------------------------------------
    // File descriptors
    // ---------------------------------------------------------------------

    pub fn get_free_file_descriptor(&self, pid: ProcessId) -> Option<usize> {
        self.table.get(pid).and_then(|p| p.fds.free_slot())
    }

    pub fn install_file(&mut self, pid: ProcessId, file: FileRef) -> Result<usize, ProcError> {
        let process = self.table.get_mut(pid).ok_or(ProcError::NoSuchProcess)?;
        process.fds.install(file)
    }

    /// Share descriptor `fd` of `src` into slot `dest_fd` of `dest`.
    pub fn set_file_to_process(
        &mut self,
        src: ProcessId,
        fd: usize,
        dest: ProcessId,
        dest_fd: usize,
    ) -> Result<(), ProcError> {
        let file = self
            .table
            .get(src)
            .ok_or(ProcError::NoSuchProcess)?
            .fds
            .get(fd)
            .cloned()
            .ok_or(ProcError::BadDescriptor)?;
        let target = self.table.get_mut(dest).ok_or(ProcError::NoSuchProcess)?;
        if let Some(old) = target.fds.set(dest_fd, file.clone())? {
            if Arc::ptr_eq(&old, &file) {
                return Ok(());
            }
            old.lock().release();
        }

        let mut node = file.lock();
        if node.is_refcounted() {
            node.copy_count += 1;
        }
        Ok(())
    }

    pub fn file_descriptor_by_name(&self, pid: ProcessId, name: &str) -> Option<usize> {
        self.table.get(pid).and_then(|p| p.fds.find_by_name(name))
    }

    // ---------------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------------

    pub fn root_pid(&self) -> Option<ProcessId> {
        self.table.root_pid()
    }

    pub fn current_tid(&self) -> Option<Tid> {
        self.scheduler.current_tid()
    }

    pub fn current_pid(&self) -> Option<ProcessId> {
        self.scheduler.current_thread().and_then(|t| t.process)
    }

    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        self.scheduler.find(tid).and_then(|h| self.scheduler.get(h))
    }

    pub fn find_by_pid(&self, pid: ProcessId) -> Option<&Process> {
        self.table.get(pid)
    }

    /// Process whose main thread is `tid`.
    pub fn find_by_thread(&self, tid: Tid) -> Option<ProcessId> {
        self.scheduler
            .find(tid)
            .and_then(|h| self.table.find_by_thread(h))
    }

    /// Process owning `tid`, main or sub-thread.
    pub fn find_by_sub_thread(&self, tid: Tid) -> Option<ProcessId> {
        self.thread(tid)
            .and_then(|t| t.process)
            .filter(|pid| self.table.get(*pid).is_some())
    }

    pub fn killable_process(&self) -> Option<ProcessId> {
        self.table.killable()
    }

    pub fn system_ticks(&self) -> u64 {
        self.scheduler.ticks()
    }

    // ---------------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------------

    /// Timer interrupt entry. `frame` is the interrupted register state and
    /// receives the state of the thread to resume.
    pub fn tick(&mut self, frame: &mut CpuContext) -> Option<Switch> {
        let prev = self.current_pid();
        let switch = self.scheduler.tick(frame, self.arch.as_mut())?;
        let next = self.current_pid();

        if prev != next {
            if let Some(p) = prev.and_then(|pid| self.table.get_mut(pid)) {
                if p.state == ProcessState::Running {
                    p.state = ProcessState::Ready;
                }
            }
            if let Some(p) = next.and_then(|pid| self.table.get_mut(pid)) {
                if matches!(p.state, ProcessState::Ready | ProcessState::Suspended) {
                    p.state = ProcessState::Running;
                }
            }
        }
        Some(switch)
    }

    /// Thread currently on the CPU, if it is one of `pid`'s.
    pub fn is_running_in(&self, pid: ProcessId) -> bool {
        self.scheduler
            .current_thread()
            .map_or(false, |t| t.process == Some(pid) && t.state == ThreadState::Running)
    }
}

/// Page-rounded size of a request to grow a region currently `used` bytes
/// long, refused if the region would pass `limit`.
fn region_growth(used: u64, request: u64, limit: u64) -> Result<u64, ProcError> {
    let len = checked_page_align_up(request).ok_or(ProcError::OutOfMemory)?;
    match used.checked_add(len) {
        Some(end) if end <= limit => Ok(len),
        _ => {
            log::warn!("refusing to grow region of {:#x} bytes by {:#x}", used, request);
            Err(ProcError::OutOfMemory)
        }
    }
}

fn release_thread_resources(hooks: &mut dyn ResourceHooks, tid: Tid) {
    hooks.release_audio(tid);
    hooks.release_signals(tid);
    hooks.release_mailbox(tid);
    hooks.release_timers(tid);
}

/// Map a zeroed page at `ENV_BLOCK_ADDRESS`, seeded from `parent_env`.
/// Failure is logged and leaves the process without a block.
fn map_env_block(
    mem: &mut dyn MemoryServices,
    root: PhysAddr,
    parent_env: Option<PhysAddr>,
    name: &str,
) -> Option<VirtAddr> {
    let Some(frame) = mem.allocate_frame() else {
        log::warn!("no frame for environment block of '{}'", name);
        return None;
    };
    mem.zero_frame(frame);
    if let Some(src) = parent_env {
        mem.copy_frame(src, frame);
    }

    let at = VirtAddr::new(ENV_BLOCK_ADDRESS);
    if mem.map_page(root, frame, at, USER_FLAGS) {
        Some(at)
    } else {
        log::warn!("failed to map environment block for '{}'", name);
        mem.free_frame(frame);
        None
    }
}

/// Kernel-mode thread that enters user mode through `trampoline`.
fn user_thread(
    name: &str,
    pid: ProcessId,
    trampoline: VirtAddr,
    kstack: VirtAddr,
    root: PhysAddr,
    level: ThreadLevel,
    entry: UserEntry,
) -> Thread {
    let mut thread = Thread::new(
        name,
        trampoline,
        kstack - USER_STACK_RESERVE,
        root,
        ThreadLevel::KERNEL,
    );
    thread.level = level;
    thread.kernel_stack_top = Some(kstack);
    thread.process = Some(pid);
    thread.user_entry = Some(Box::new(entry));
    thread
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::USER_STACK_SIZE;
    use crate::process::fd::{FileFlags, FileNode};
    use crate::task::registry::ListKind;
    use crate::testing::{FakeLoader, Fixture, HookEvent, IMAGE_ENTRY, PROCESS_ENTRY};
    use alloc::vec::Vec;

    fn list_of(m: &ProcessManager, handle: ThreadHandle) -> Option<ListKind> {
        m.scheduler().registry().list_of(handle)
    }

    /// Start the scheduler and run until `pid`'s main thread is on the CPU.
    fn run_main_thread(m: &mut ProcessManager, pid: ProcessId) {
        m.start_scheduler();
        let main = m.process(pid).and_then(|p| p.main_thread());
        let mut frame = CpuContext::default();
        for _ in 0..8 {
            m.tick(&mut frame);
            if m.scheduler().current() == main {
                return;
            }
        }
        panic!("main thread of {} never scheduled", pid);
    }

    #[test]
    fn test_start_root_process_loads_init() {
        let mut fx = Fixture::new(4096);
        let mut loader = FakeLoader::new();
        let root = fx.manager.start_root_process(&mut loader).unwrap();

        assert_eq!(root.as_u64(), 1);
        assert_eq!(fx.manager.root_pid(), Some(root));
        assert!(fx.manager.loader_lock().is_some());
        assert_eq!(loader.loads.len(), 1);
        assert_eq!(loader.loads[0].1, "/init.exe");
        assert_eq!(loader.loads[0].2, ["-about"]);

        let p = fx.manager.process(root).unwrap();
        assert_eq!(p.name(), "_root");
        assert_eq!(p.state, ProcessState::Ready);
        assert_eq!(p.env_block, Some(VirtAddr::new(ENV_BLOCK_ADDRESS)));

        let main = fx.manager.scheduler().get(p.main_thread().unwrap()).unwrap();
        let entry = main.user_entry.as_ref().unwrap();
        assert_eq!(entry.entry.as_u64(), IMAGE_ENTRY);
        assert_eq!(entry.argc, 1);
        assert_eq!(entry.rsp, p.main_stack - USER_STACK_RESERVE);
        assert_eq!(entry.cs, USER_CODE_SELECTOR);
        assert!(main.level.contains(ThreadLevel::MAIN_THREAD));
    }

    #[test]
    fn test_second_root_refused() {
        let (mut fx, _) = Fixture::booted();
        assert_eq!(fx.manager.create_root_process(), Err(ProcError::RootExists));
    }

    #[test]
    fn test_root_exit_is_a_noop() {
        let (mut fx, root) = Fixture::booted();
        let free = fx.mem.free_frames();

        assert_eq!(fx.manager.exit(root, true), Err(ProcError::RootProcess));
        let p = fx.manager.process(root).unwrap();
        assert_eq!(p.state, ProcessState::Ready);
        assert_eq!(list_of(&fx.manager, p.main_thread().unwrap()), Some(ListKind::Ready));
        assert_eq!(fx.mem.free_frames(), free);
        assert_eq!(fx.arch.reschedule_requests(), 0);
    }

    #[test]
    fn test_exit_without_file_removes_process_and_wakes_waiters() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        fx.manager.create_user_thread(child, VirtAddr::new(0x40_1000), "w1").unwrap();
        fx.manager.create_user_thread(child, VirtAddr::new(0x40_2000), "w2").unwrap();
        let threads: Vec<ThreadHandle> = fx.manager.process(child).unwrap().threads().collect();
        assert_eq!(threads.len(), 3);

        run_main_thread(&mut fx.manager, root);
        let waiter = fx.manager.process(root).unwrap().main_thread().unwrap();
        fx.manager
            .wait_for_termination(root, WaitTarget::Pid(child))
            .unwrap();
        assert_eq!(list_of(&fx.manager, waiter), Some(ListKind::Blocked));

        assert_eq!(fx.manager.exit(child, false), Ok(ReapStatus::Immediate));
        assert!(fx.manager.find_by_pid(child).is_none());
        for handle in threads {
            assert_eq!(list_of(&fx.manager, handle), Some(ListKind::Trash));
        }
        assert_eq!(
            fx.manager.scheduler().get(waiter).unwrap().state,
            ThreadState::Ready
        );
        fx.manager.scheduler().registry().check_invariants();
    }

    #[test]
    fn test_exit_releases_thread_resources() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        fx.manager.create_user_thread(child, VirtAddr::new(0x40_1000), "w").unwrap();
        let tids: Vec<Tid> = fx
            .manager
            .process(child)
            .unwrap()
            .threads()
            .map(|h| fx.manager.scheduler().get(h).unwrap().id)
            .collect();

        fx.manager.exit(child, true).unwrap();
        let events = fx.hooks.events();
        for tid in tids {
            assert!(events.contains(&HookEvent::Audio(tid)));
            assert!(events.contains(&HookEvent::Signals(tid)));
            assert!(events.contains(&HookEvent::Mailbox(tid)));
            assert!(events.contains(&HookEvent::Timers(tid)));
        }
        assert_eq!(fx.arch.reschedule_requests(), 1);
    }

    #[test]
    fn test_exit_with_loader_file_defers_until_reclaim() {
        let (mut fx, root) = Fixture::booted();
        let free_before = fx.mem.free_frames();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::keeping_file());
        fx.manager.create_user_thread(child, VirtAddr::new(0x40_1000), "w").unwrap();
        let file = fx.manager.process(child).unwrap().file.clone().unwrap();
        let threads: Vec<ThreadHandle> = fx.manager.process(child).unwrap().threads().collect();
        let child_root = fx.manager.process(child).unwrap().page_table_root;

        let status = fx.manager.exit(child, false).unwrap();
        assert_eq!(
            status,
            ReapStatus::PendingReap {
                reason: ReapReason::LoaderFile
            }
        );
        assert!(file.lock().freed);
        assert!(fx.manager.process(child).unwrap().is_killable());
        assert_eq!(fx.manager.killable_process(), Some(child));
        // A second exit reports the same outcome.
        assert_eq!(fx.manager.exit(child, false), Ok(status));

        fx.manager.reclaim(child).unwrap();
        assert!(fx.manager.process(child).is_none());
        for handle in threads {
            assert!(fx.manager.scheduler().get(handle).is_none());
        }
        assert!(!fx.mem.has_address_space(child_root));
        assert_eq!(fx.mem.free_frames(), free_before);
    }

    #[test]
    fn test_reclaim_refuses_live_process() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        assert_eq!(fx.manager.reclaim(child), Err(ProcError::NotKillable));
        assert_eq!(
            fx.manager.reclaim(ProcessId::new(99)),
            Err(ProcError::NoSuchProcess)
        );
    }

    #[test]
    fn test_reap_trash_then_reclaim_frees_everything_once() {
        let (mut fx, root) = Fixture::booted();
        let free_before = fx.mem.free_frames();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::keeping_file());
        fx.manager.create_user_thread(child, VirtAddr::new(0x40_1000), "w").unwrap();
        fx.manager.exit(child, false).unwrap();

        let before_reap = fx.mem.free_frames();
        assert_eq!(fx.manager.reap_trash(), 2);
        let stack_pages = (KERNEL_STACK_SIZE / PAGE_SIZE) as usize;
        assert_eq!(fx.mem.free_frames(), before_reap + 2 * stack_pages);

        fx.manager.reclaim(child).unwrap();
        assert_eq!(fx.mem.free_frames(), free_before);
    }

    #[test]
    fn test_wait_for_pid_blocks_until_target_exits() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        run_main_thread(&mut fx.manager, root);
        let waiter = fx.manager.scheduler().current().unwrap();

        fx.manager
            .wait_for_termination(root, WaitTarget::Pid(child))
            .unwrap();
        assert_eq!(fx.arch.reschedule_requests(), 1);

        let mut frame = CpuContext::default();
        for _ in 0..4 {
            fx.manager.tick(&mut frame);
            assert_ne!(fx.manager.scheduler().current(), Some(waiter));
        }
        assert_eq!(fx.manager.current_pid(), Some(child));

        fx.manager.exit(child, true).unwrap();
        fx.manager.tick(&mut frame);
        assert_eq!(fx.manager.scheduler().current(), Some(waiter));
        assert_eq!(fx.manager.process(root).unwrap().state, ProcessState::Running);
    }

    #[test]
    fn test_wait_for_dead_pid_returns_without_blocking() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::keeping_file());
        fx.manager.exit(child, false).unwrap();
        run_main_thread(&mut fx.manager, root);
        let waiter = fx.manager.scheduler().current().unwrap();
        let requests = fx.arch.reschedule_requests();

        assert_eq!(
            fx.manager.wait_for_termination(root, WaitTarget::Pid(child)),
            Ok(None)
        );
        assert_eq!(fx.manager.scheduler().get(waiter).unwrap().state, ThreadState::Running);
        assert!(fx.manager.process(child).unwrap().waitlist.is_empty());
        assert_eq!(fx.arch.reschedule_requests(), requests);

        fx.manager.reclaim(child).unwrap();
        let mut frame = CpuContext::default();
        fx.manager.tick(&mut frame);
        assert_eq!(fx.manager.scheduler().current(), Some(waiter));
    }

    #[test]
    fn test_reclaim_wakes_leftover_waiters() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::keeping_file());
        run_main_thread(&mut fx.manager, root);
        let waiter = fx.manager.scheduler().current().unwrap();
        fx.manager.pause_current().unwrap();
        fx.manager.exit(child, false).unwrap();
        fx.manager.process_mut(child).unwrap().waitlist.push(waiter);

        fx.manager.reclaim(child).unwrap();
        assert_eq!(list_of(&fx.manager, waiter), Some(ListKind::Ready));
    }

    #[test]
    fn test_wait_for_missing_pid_fails() {
        let (mut fx, root) = Fixture::booted();
        run_main_thread(&mut fx.manager, root);
        assert_eq!(
            fx.manager
                .wait_for_termination(root, WaitTarget::Pid(ProcessId::new(42))),
            Err(ProcError::NoSuchProcess)
        );
    }

    #[test]
    fn test_wait_any_reaps_and_sleeps_one_quantum() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::keeping_file());
        fx.manager.exit(child, false).unwrap();
        run_main_thread(&mut fx.manager, root);
        let waiter = fx.manager.scheduler().current().unwrap();

        let reaped = fx.manager.wait_for_termination(root, WaitTarget::Any);
        assert_eq!(reaped, Ok(Some(child)));
        assert!(fx.manager.process(child).is_none());
        assert_eq!(fx.manager.process(root).unwrap().state, ProcessState::Suspended);
        assert_eq!(list_of(&fx.manager, waiter), Some(ListKind::Sleeping));

        let mut frame = CpuContext::default();
        for _ in 0..ms_to_ticks(WAIT_ANY_QUANTUM_MS) {
            fx.manager.tick(&mut frame);
        }
        assert_eq!(fx.manager.scheduler().current(), Some(waiter));
        assert_eq!(fx.manager.process(root).unwrap().state, ProcessState::Running);

        // Nothing left to reap.
        assert_eq!(fx.manager.poll_wait_any(root), Ok(None));
    }

    #[test]
    fn test_thread_limit() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "many", &mut FakeLoader::new());
        let mut created = 0;
        loop {
            match fx.manager.create_user_thread(child, VirtAddr::new(0x40_1000), "t") {
                Ok(index) => {
                    created += 1;
                    assert_eq!(index, created);
                }
                Err(e) => {
                    assert_eq!(e, ProcError::ThreadLimit);
                    break;
                }
            }
        }
        assert_eq!(created, crate::layout::MAX_THREADS_PER_PROCESS - 1);
    }

    #[test]
    fn test_sub_thread_stacks_are_distinct() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        let main_stack = fx.manager.process(child).unwrap().main_stack;
        let mut bases = Vec::from([main_stack - USER_STACK_RESERVE]);
        for _ in 0..3 {
            let index = fx
                .manager
                .create_user_thread(child, VirtAddr::new(0x40_1000), "t")
                .unwrap();
            let handle = fx.manager.process(child).unwrap().thread(index).unwrap();
            let thread = fx.manager.scheduler().get(handle).unwrap();
            assert!(thread.level.contains(ThreadLevel::SUB_THREAD));
            assert_eq!(thread.context.rip, PROCESS_ENTRY);
            bases.push(thread.user_entry.as_ref().unwrap().stack_base);
        }
        for pair in bases.windows(2) {
            assert_eq!(pair[1] - pair[0], USER_STACK_SIZE);
        }
    }

    #[test]
    fn test_heap_grows_by_pages_and_is_released_at_exit() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        let child_root = fx.manager.process(child).unwrap().page_table_root;

        let first = fx.manager.allocate_heap(child, 5000).unwrap();
        let second = fx.manager.allocate_heap(child, 1).unwrap();
        assert_eq!(first.as_u64(), PROCESS_BREAK_ADDRESS);
        assert_eq!(second.as_u64(), PROCESS_BREAK_ADDRESS + 2 * PAGE_SIZE);
        assert!(fx.mem.translate(child_root, second).is_some());

        fx.manager.exit(child, false).unwrap();
        assert!(fx.mem.translate(child_root, first).is_none());
        assert!(fx.mem.translate(child_root, second).is_none());
    }

    #[test]
    fn test_oversized_heap_and_mmap_requests_refused() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        let free_before = fx.mem.free_frames();

        assert_eq!(fx.manager.allocate_heap(child, u64::MAX), Err(ProcError::OutOfMemory));
        assert_eq!(
            fx.manager.allocate_heap(child, PROCESS_HEAP_LIMIT + 1),
            Err(ProcError::OutOfMemory)
        );
        assert_eq!(fx.manager.map_anonymous(child, u64::MAX), Err(ProcError::OutOfMemory));
        assert_eq!(
            fx.manager.map_anonymous(child, PROCESS_MMAP_LIMIT + 1),
            Err(ProcError::OutOfMemory)
        );

        let process = fx.manager.process(child).unwrap();
        assert_eq!(process.heap_len, 0);
        assert_eq!(process.mmap_len, 0);
        assert!(process.vmas.is_empty());
        assert_eq!(fx.mem.free_frames(), free_before);

        let start = fx.manager.allocate_heap(child, PAGE_SIZE).unwrap();
        assert_eq!(start.as_u64(), PROCESS_BREAK_ADDRESS);
    }

    #[test]
    fn test_mmap_and_shared_memory_released_at_exit() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        let child_root = fx.manager.process(child).unwrap().page_table_root;

        let anon = fx.manager.map_anonymous(child, 3 * PAGE_SIZE).unwrap();
        assert_eq!(anon.as_u64(), PROCESS_MMAP_ADDRESS);
        assert_eq!(fx.manager.process(child).unwrap().vmas.len(), 1);

        let shared = PhysAddr::new(0x9000_0000);
        let base = fx.manager.attach_shared_memory(child, 7, &[shared]).unwrap();
        assert_eq!(fx.mem.translate(child_root, base), Some(shared));

        fx.manager.exit(child, false).unwrap();
        assert!(fx.mem.translate(child_root, anon).is_none());
        assert!(fx.mem.translate(child_root, base).is_none());
        assert!(fx.hooks.events().contains(&HookEvent::ShmDetach(child, 7)));
    }

    #[test]
    fn test_set_file_to_process_shares_node() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        let file = FileNode::new("/data.txt", FileFlags::GENERAL).into_ref();
        let fd = fx.manager.install_file(root, file.clone()).unwrap();
        assert_eq!(fd, 3);

        fx.manager.set_file_to_process(root, fd, child, 5).unwrap();
        let shared = fx.manager.process(child).unwrap().fds.get(5).unwrap().clone();
        assert!(Arc::ptr_eq(&shared, &file));
        assert_eq!(file.lock().copy_count, 1);
        assert_eq!(fx.manager.file_descriptor_by_name(child, "/data.txt"), Some(5));

        fx.manager.exit(child, false).unwrap();
        let node = file.lock();
        assert_eq!(node.copy_count, 0);
        assert!(!node.freed);
    }

    #[test]
    fn test_set_file_to_process_releases_replaced_node() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        let old = FileNode::new("/old.txt", FileFlags::GENERAL).into_ref();
        old.lock().copy_count = 1;
        fx.manager
            .process_mut(child)
            .unwrap()
            .fds
            .set(5, old.clone())
            .unwrap();
        let new = FileNode::new("/new.txt", FileFlags::GENERAL).into_ref();
        let fd = fx.manager.install_file(root, new.clone()).unwrap();

        fx.manager.set_file_to_process(root, fd, child, 5).unwrap();
        assert_eq!(old.lock().copy_count, 0);
        assert_eq!(new.lock().copy_count, 1);
        assert_eq!(fx.manager.file_descriptor_by_name(child, "/old.txt"), None);

        // Sharing the same node into the same slot again changes nothing.
        fx.manager.set_file_to_process(root, fd, child, 5).unwrap();
        assert_eq!(new.lock().copy_count, 1);
    }

    #[test]
    fn test_set_file_to_process_bad_descriptor() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        assert_eq!(
            fx.manager.set_file_to_process(root, 10, child, 5),
            Err(ProcError::BadDescriptor)
        );
        assert_eq!(fx.manager.get_free_file_descriptor(child), Some(3));
    }

    #[test]
    fn test_signal_wakes_paused_thread() {
        let (mut fx, root) = Fixture::booted();
        run_main_thread(&mut fx.manager, root);
        let tid = fx.manager.current_tid().unwrap();

        fx.manager.register_signal(2, VirtAddr::new(0x40_3000)).unwrap();
        fx.manager.pause_current().unwrap();
        assert_eq!(fx.manager.thread(tid).unwrap().state, ThreadState::Blocked);

        fx.manager.send_signal(tid, 2).unwrap();
        assert_eq!(fx.manager.thread(tid).unwrap().state, ThreadState::Ready);
        let events = fx.hooks.events();
        assert!(events.contains(&HookEvent::Register(tid, 2)));
        assert!(events.contains(&HookEvent::Send(tid, 2)));
    }

    #[test]
    fn test_sleep_current_needs_a_running_thread() {
        let (mut fx, root) = Fixture::booted();
        assert_eq!(fx.manager.sleep_current(5), Err(ProcError::NoCurrentThread));

        run_main_thread(&mut fx.manager, root);
        let tid = fx.manager.current_tid().unwrap();
        let now = fx.manager.system_ticks();
        fx.manager.sleep_current(5).unwrap();
        let thread = fx.manager.thread(tid).unwrap();
        assert_eq!(thread.state, ThreadState::Sleeping);
        assert_eq!(thread.wake_tick, Some(now + ms_to_ticks(5)));
    }

    #[test]
    fn test_env_block_copied_from_parent() {
        let (mut fx, root) = Fixture::booted();
        let env = fx.manager.env_block(root).unwrap();
        let root_pt = fx.manager.process(root).unwrap().page_table_root;
        let frame = fx.mem.translate(root_pt, env).unwrap();
        fx.mem.write_byte(frame, 0x42);

        let child = fx.manager.create_process_slot(root, "child").unwrap();
        let child_pt = fx.manager.process(child).unwrap().page_table_root;
        let child_frame = fx.mem.translate(child_pt, env).unwrap();
        assert_ne!(child_frame, frame);
        assert_eq!(fx.mem.read_byte(child_frame), 0x42);
        assert_eq!(fx.manager.process(child).unwrap().state, ProcessState::NotReady);
    }

    #[test]
    fn test_slot_creation_out_of_memory_leaves_no_process() {
        let mut fx = Fixture::new(16);
        assert_eq!(fx.manager.create_root_process(), Err(ProcError::OutOfMemory));
        assert!(fx.manager.processes().next().is_none());
    }

    #[test]
    fn test_thread_lookups() {
        let (mut fx, root) = Fixture::booted();
        let child = fx.spawn_child(root, "child", &mut FakeLoader::new());
        let index = fx
            .manager
            .create_user_thread(child, VirtAddr::new(0x40_1000), "w")
            .unwrap();
        let p = fx.manager.process(child).unwrap();
        let main = fx.manager.scheduler().get(p.main_thread().unwrap()).unwrap().id;
        let sub = fx.manager.scheduler().get(p.thread(index).unwrap()).unwrap().id;

        assert_eq!(fx.manager.find_by_thread(main), Some(child));
        assert_eq!(fx.manager.find_by_thread(sub), None);
        assert_eq!(fx.manager.find_by_sub_thread(sub), Some(child));
        assert_eq!(fx.manager.find_by_sub_thread(main), Some(child));
    }

    #[test]
    fn test_tick_switches_address_space() {
        let (mut fx, root) = Fixture::booted();
        run_main_thread(&mut fx.manager, root);
        let root_pt = fx.manager.process(root).unwrap().page_table_root;
        assert_eq!(fx.arch.last_root(), Some(root_pt));
        assert_eq!(fx.manager.process(root).unwrap().state, ProcessState::Running);
        assert!(fx.manager.is_running_in(root));
    }
}
