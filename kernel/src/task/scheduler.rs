//! Round-robin scheduler
//!
//! One CPU, one current thread. Every timer tick saves the interrupted
//! thread's registers, walks the ready list from the current thread's
//! successor, and loads the first `Ready` thread it finds. The idle thread
//! sits on the ready list permanently but is only chosen when nothing else
//! can run.

use crate::arch_impl::ArchOps;
use crate::error::ProcError;
use crate::task::registry::{ListKind, ThreadHandle, ThreadRegistry};
use crate::task::thread::{CpuContext, Thread, ThreadState, Tid};

/// Outcome of one scheduling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// Thread that was interrupted; `None` on the very first tick
    pub from: Option<Tid>,
    pub to: Tid,
}

/// The kernel scheduler
pub struct Scheduler {
    registry: ThreadRegistry,

    /// Currently running thread
    current: Option<ThreadHandle>,

    /// Idle thread (runs when no other threads are ready)
    idle: ThreadHandle,

    started: bool,
    ticks: u64,
}

impl Scheduler {
    /// Create a new scheduler around an idle thread
    pub fn new(idle_thread: Thread) -> Self {
        let mut registry = ThreadRegistry::new();
        let idle = registry.add(idle_thread);
        // A fresh handle is never linked.
        let _ = registry.insert(ListKind::Ready, idle);

        Self {
            registry,
            current: None,
            idle,
            started: false,
            ticks: 0,
        }
    }

    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    /// Let `tick` start switching threads.
    pub fn start(&mut self) {
        self.started = true;
        log::info!("Scheduler started");
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn idle(&self) -> ThreadHandle {
        self.idle
    }

    pub fn current(&self) -> Option<ThreadHandle> {
        self.current
    }

    pub fn current_thread(&self) -> Option<&Thread> {
        self.current.and_then(|h| self.registry.get(h))
    }

    pub fn current_tid(&self) -> Option<Tid> {
        self.current_thread().map(|t| t.id)
    }

    pub fn get(&self, handle: ThreadHandle) -> Option<&Thread> {
        self.registry.get(handle)
    }

    pub fn get_mut(&mut self, handle: ThreadHandle) -> Option<&mut Thread> {
        self.registry.get_mut(handle)
    }

    pub fn find(&self, tid: Tid) -> Option<ThreadHandle> {
        self.registry.find(tid)
    }

    /// Register a new thread and make it runnable.
    pub fn spawn(&mut self, thread: Thread) -> ThreadHandle {
        log::debug!(
            "spawn thread {} '{}' (user: {})",
            thread.id,
            thread.name(),
            thread.is_user()
        );
        let handle = self.registry.add(thread);
        let _ = self.registry.insert(ListKind::Ready, handle);
        handle
    }

    /// Pick the thread to run next without changing anything.
    pub fn select_next(&self) -> ThreadHandle {
        let reg = &self.registry;
        let len = reg.len(ListKind::Ready);

        let mut cursor = match self.current {
            Some(cur) if reg.list_of(cur) == Some(ListKind::Ready) => {
                reg.next_in(cur).or_else(|| reg.head(ListKind::Ready))
            }
            _ => reg.head(ListKind::Ready),
        };

        for _ in 0..len {
            let Some(handle) = cursor else { break };
            if handle != self.idle {
                if let Some(thread) = reg.get(handle) {
                    if thread.state == ThreadState::Ready {
                        return handle;
                    }
                }
            }
            cursor = reg.next_in(handle).or_else(|| reg.head(ListKind::Ready));
        }
        self.idle
    }

    /// Timer tick: save `frame` into the interrupted thread, pick the next
    /// one, and load its registers back into `frame`.
    pub fn tick(&mut self, frame: &mut CpuContext, arch: &mut dyn ArchOps) -> Option<Switch> {
        if !self.started {
            return None;
        }
        self.ticks += 1;
        self.wake_sleepers();

        let from = match self.current.and_then(|h| self.registry.get_mut(h)) {
            Some(thread) => {
                thread.context = *frame;
                if thread.state == ThreadState::Running {
                    thread.state = ThreadState::Ready;
                }
                Some(thread.id)
            }
            None => {
                self.current = None;
                None
            }
        };

        let next = self.select_next();
        let enter_user = arch.enter_user_trampoline();
        let thread = self.registry.get_mut(next)?;

        arch.switch_address_space(thread.page_table_root);
        if thread.is_user() && !thread.has_started {
            thread.context.rip = enter_user.as_u64();
        }
        thread.has_started = true;
        thread.state = ThreadState::Running;
        *frame = thread.context;
        let to = thread.id;

        self.current = Some(next);
        arch.acknowledge_timer();

        #[cfg(feature = "sched_trace")]
        log::trace!("tick {}: {:?} -> {}", self.ticks, from, to);

        Some(Switch { from, to })
    }

    /// Move sleepers whose deadline has passed back to the ready list.
    fn wake_sleepers(&mut self) {
        let now = self.ticks;
        let mut cursor = self.registry.head(ListKind::Sleeping);
        while let Some(handle) = cursor {
            cursor = self.registry.next_in(handle);
            let due = self
                .registry
                .get(handle)
                .map_or(false, |t| t.wake_tick.map_or(true, |at| at <= now));
            if due {
                if let Some(thread) = self.registry.get_mut(handle) {
                    thread.wake_tick = None;
                }
                let _ = self.registry.transition(handle, ThreadState::Ready);
            }
        }
    }

    fn set_state(&mut self, handle: ThreadHandle, state: ThreadState) -> Result<(), ProcError> {
        if handle == self.idle {
            log::error!("refusing to move the idle thread to {:?}", state);
            return Err(ProcError::IdleThread);
        }
        self.registry.transition(handle, state)?;
        Ok(())
    }

    pub fn block(&mut self, handle: ThreadHandle) -> Result<(), ProcError> {
        self.set_state(handle, ThreadState::Blocked)
    }

    /// Make a blocked thread runnable. Threads in any other state are left
    /// alone.
    pub fn unblock(&mut self, handle: ThreadHandle) -> Result<(), ProcError> {
        match self.registry.get(handle).map(|t| t.state) {
            Some(ThreadState::Blocked) => self.set_state(handle, ThreadState::Ready),
            Some(_) => Ok(()),
            None => Err(ProcError::NoSuchThread),
        }
    }

    /// Put `handle` to sleep for `ticks` timer ticks.
    pub fn sleep(&mut self, handle: ThreadHandle, ticks: u64) -> Result<(), ProcError> {
        let wake = self.ticks.saturating_add(ticks);
        self.set_state(handle, ThreadState::Sleeping)?;
        if let Some(thread) = self.registry.get_mut(handle) {
            thread.wake_tick = Some(wake);
        }
        Ok(())
    }

    pub fn trash(&mut self, handle: ThreadHandle) -> Result<(), ProcError> {
        self.set_state(handle, ThreadState::Trash)
    }

    /// Block whatever is running.
    pub fn block_current(&mut self) -> Result<ThreadHandle, ProcError> {
        let current = self.current.ok_or(ProcError::NoCurrentThread)?;
        self.block(current)?;
        Ok(current)
    }

    /// Delist and free one thread. The running thread is refused.
    pub fn reap(&mut self, handle: ThreadHandle) -> Result<Thread, ProcError> {
        if Some(handle) == self.current {
            return Err(ProcError::StillLinked);
        }
        if self.registry.list_of(handle) != Some(ListKind::Trash) {
            self.trash(handle)?;
        }
        Ok(self.registry.reap(handle)?)
    }

    /// Free every trashed thread except the one still on the CPU. Each freed
    /// thread is passed to `release` for stack reclamation.
    pub fn reap_trash<F>(&mut self, mut release: F) -> usize
    where
        F: FnMut(Thread),
    {
        let mut reaped = 0;
        let mut cursor = self.registry.head(ListKind::Trash);
        while let Some(handle) = cursor {
            cursor = self.registry.next_in(handle);
            if Some(handle) == self.current {
                continue;
            }
            if let Ok(thread) = self.registry.reap(handle) {
                log::debug!("reaped thread {} '{}'", thread.id, thread.name());
                release(thread);
                reaped += 1;
            }
        }
        reaped
    }

    pub fn has_runnable_threads(&self) -> bool {
        self.registry
            .iter(ListKind::Ready)
            .any(|h| h != self.idle)
    }
}
