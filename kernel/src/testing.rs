//! Fakes shared by the unit tests.
//!
//! Each fake keeps its state behind an `Arc<Mutex<..>>` so a test can hand a
//! clone to the manager and still inspect what happened.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;
use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::arch_impl::ArchOps;
use crate::error::ProcError;
use crate::layout::PAGE_SIZE;
use crate::memory::MemoryServices;
use crate::process::fd::{FileFlags, FileNode};
use crate::process::process::ShmMapping;
use crate::process::{ImageLoader, ProcessId, ProcessManager, ResourceHooks};
use crate::task::thread::Tid;

const FRAME_BASE: u64 = 0x100_0000;
pub const IDLE_ENTRY: u64 = 0xFFFF_8000_0010_0000;
pub const ENTER_USER: u64 = 0xFFFF_8000_0000_1000;
pub const PROCESS_ENTRY: u64 = 0xFFFF_8000_0000_2000;
pub const IMAGE_ENTRY: u64 = 0x40_0000;

#[derive(Default)]
struct MemState {
    free: Vec<PhysAddr>,
    spaces: BTreeMap<u64, BTreeMap<u64, PhysAddr>>,
    contents: BTreeMap<u64, u8>,
}

/// Frame pool and page tables kept in maps. A frame's contents are a single
/// byte, enough to see copies happen.
#[derive(Clone, Default)]
pub struct FakeMemory {
    state: Arc<Mutex<MemState>>,
}

impl FakeMemory {
    pub fn new(frames: usize) -> Self {
        let free = (0..frames as u64)
            .rev()
            .map(|i| PhysAddr::new(FRAME_BASE + i * PAGE_SIZE))
            .collect();
        Self {
            state: Arc::new(Mutex::new(MemState {
                free,
                ..MemState::default()
            })),
        }
    }

    pub fn free_frames(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn mapped_pages(&self, root: PhysAddr) -> usize {
        self.state
            .lock()
            .spaces
            .get(&root.as_u64())
            .map_or(0, |space| space.len())
    }

    pub fn has_address_space(&self, root: PhysAddr) -> bool {
        self.state.lock().spaces.contains_key(&root.as_u64())
    }

    pub fn write_byte(&self, frame: PhysAddr, value: u8) {
        self.state.lock().contents.insert(frame.as_u64(), value);
    }

    pub fn read_byte(&self, frame: PhysAddr) -> u8 {
        self.state
            .lock()
            .contents
            .get(&frame.as_u64())
            .copied()
            .unwrap_or(0)
    }
}

impl MemoryServices for FakeMemory {
    fn allocate_frame(&mut self) -> Option<PhysAddr> {
        self.state.lock().free.pop()
    }

    fn free_frame(&mut self, frame: PhysAddr) {
        let mut state = self.state.lock();
        assert!(!state.free.contains(&frame), "double free of {:?}", frame);
        state.contents.remove(&frame.as_u64());
        state.free.push(frame);
    }

    fn map_page(&mut self, root: PhysAddr, phys: PhysAddr, virt: VirtAddr, _flags: PageTableFlags) -> bool {
        let mut state = self.state.lock();
        let space = state.spaces.entry(root.as_u64()).or_default();
        if space.contains_key(&virt.as_u64()) {
            return false;
        }
        space.insert(virt.as_u64(), phys);
        true
    }

    fn translate(&self, root: PhysAddr, virt: VirtAddr) -> Option<PhysAddr> {
        self.state
            .lock()
            .spaces
            .get(&root.as_u64())
            .and_then(|space| space.get(&virt.as_u64()).copied())
    }

    fn unmap_page(&mut self, root: PhysAddr, virt: VirtAddr) {
        if let Some(space) = self.state.lock().spaces.get_mut(&root.as_u64()) {
            space.remove(&virt.as_u64());
        }
    }

    fn create_address_space(&mut self) -> Option<PhysAddr> {
        let root = self.allocate_frame()?;
        self.state.lock().spaces.insert(root.as_u64(), BTreeMap::new());
        Some(root)
    }

    fn destroy_address_space(&mut self, root: PhysAddr) {
        let existed = self.state.lock().spaces.remove(&root.as_u64()).is_some();
        if existed {
            self.free_frame(root);
        }
    }

    fn zero_frame(&mut self, frame: PhysAddr) {
        self.state.lock().contents.insert(frame.as_u64(), 0);
    }

    fn copy_frame(&mut self, src: PhysAddr, dst: PhysAddr) {
        let mut state = self.state.lock();
        let value = state.contents.get(&src.as_u64()).copied().unwrap_or(0);
        state.contents.insert(dst.as_u64(), value);
    }
}

#[derive(Default)]
struct ArchState {
    roots: Vec<PhysAddr>,
    reschedules: usize,
    acks: usize,
}

#[derive(Clone, Default)]
pub struct FakeArch {
    state: Arc<Mutex<ArchState>>,
}

impl FakeArch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_root(&self) -> Option<PhysAddr> {
        self.state.lock().roots.last().copied()
    }

    pub fn reschedule_requests(&self) -> usize {
        self.state.lock().reschedules
    }

    pub fn timer_acks(&self) -> usize {
        self.state.lock().acks
    }
}

impl ArchOps for FakeArch {
    fn switch_address_space(&mut self, root: PhysAddr) {
        self.state.lock().roots.push(root);
    }

    fn request_reschedule(&mut self) {
        self.state.lock().reschedules += 1;
    }

    fn enter_user_trampoline(&self) -> VirtAddr {
        VirtAddr::new(ENTER_USER)
    }

    fn process_entry_trampoline(&self) -> VirtAddr {
        VirtAddr::new(PROCESS_ENTRY)
    }

    fn acknowledge_timer(&mut self) {
        self.state.lock().acks += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Audio(Tid),
    Signals(Tid),
    Mailbox(Tid),
    Timers(Tid),
    ShmDetach(ProcessId, u64),
    Register(Tid, u32),
    Send(Tid, u32),
}

#[derive(Clone, Default)]
pub struct RecordingHooks {
    events: Arc<Mutex<Vec<HookEvent>>>,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().clone()
    }

    fn record(&self, event: HookEvent) {
        self.events.lock().push(event);
    }
}

impl ResourceHooks for RecordingHooks {
    fn release_audio(&mut self, tid: Tid) {
        self.record(HookEvent::Audio(tid));
    }

    fn release_signals(&mut self, tid: Tid) {
        self.record(HookEvent::Signals(tid));
    }

    fn release_mailbox(&mut self, tid: Tid) {
        self.record(HookEvent::Mailbox(tid));
    }

    fn release_timers(&mut self, tid: Tid) {
        self.record(HookEvent::Timers(tid));
    }

    fn detach_shared_memory(&mut self, pid: ProcessId, mapping: &ShmMapping) {
        self.record(HookEvent::ShmDetach(pid, mapping.key));
    }

    fn register_signal(&mut self, tid: Tid, signo: u32, _handler: VirtAddr) -> Result<(), ProcError> {
        self.record(HookEvent::Register(tid, signo));
        Ok(())
    }

    fn send_signal(&mut self, tid: Tid, signo: u32) -> Result<(), ProcError> {
        self.record(HookEvent::Send(tid, signo));
        Ok(())
    }
}

/// Loader that maps nothing and attaches a main thread at `IMAGE_ENTRY`.
#[derive(Default)]
pub struct FakeLoader {
    /// Attach the executable as the loader file, deferring the reap at exit
    pub keep_file: bool,
    pub fail: bool,
    pub loads: Vec<(ProcessId, String, Vec<String>)>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keeping_file() -> Self {
        Self {
            keep_file: true,
            ..Self::default()
        }
    }
}

impl ImageLoader for FakeLoader {
    fn load(
        &mut self,
        manager: &mut ProcessManager,
        pid: ProcessId,
        path: &str,
        args: &[&str],
    ) -> Result<(), ProcError> {
        self.loads.push((
            pid,
            path.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
        if self.fail {
            return Err(ProcError::LoadFailed);
        }
        manager.spawn_main_thread(pid, VirtAddr::new(IMAGE_ENTRY), args.len() as u64, 0)?;
        if self.keep_file {
            let file = FileNode::new(path, FileFlags::GENERAL).into_ref();
            manager.set_loader_file(pid, file)?;
        }
        Ok(())
    }
}

/// A manager wired to fresh fakes.
pub struct Fixture {
    pub manager: ProcessManager,
    pub mem: FakeMemory,
    pub arch: FakeArch,
    pub hooks: RecordingHooks,
}

impl Fixture {
    pub fn new(frames: usize) -> Self {
        let mut mem = FakeMemory::new(frames);
        let arch = FakeArch::new();
        let hooks = RecordingHooks::default();
        let kernel_root = mem
            .create_address_space()
            .expect("no frame for the kernel root");
        let manager = ProcessManager::new(
            Box::new(mem.clone()),
            Box::new(arch.clone()),
            Box::new(hooks.clone()),
            kernel_root,
            VirtAddr::new(IDLE_ENTRY),
        )
        .expect("idle thread setup");
        Self {
            manager,
            mem,
            arch,
            hooks,
        }
    }

    /// Fixture with the root process loaded.
    pub fn booted() -> (Self, ProcessId) {
        let mut fx = Self::new(4096);
        let root = fx
            .manager
            .start_root_process(&mut FakeLoader::new())
            .expect("root process");
        (fx, root)
    }

    /// Create and load a child of `parent`.
    pub fn spawn_child(&mut self, parent: ProcessId, name: &str, loader: &mut FakeLoader) -> ProcessId {
        let pid = self
            .manager
            .create_process_slot(parent, name)
            .expect("process slot");
        self.manager
            .load_executable(loader, pid, name, &[])
            .expect("load");
        pid
    }
}
