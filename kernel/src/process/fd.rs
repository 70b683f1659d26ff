//! Per-process file descriptor table
//!
//! Slots hold shared references to file nodes owned by the VFS. The table
//! only decides which slots are free and what happens to each kind of node
//! when the owning process dies.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;
use spin::Mutex;

use crate::error::ProcError;
use crate::layout::{FILE_DESC_PER_PROCESS, RESERVED_STD_FDS};

bitflags! {
    /// Kind of object a file node stands for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u32 {
        const GENERAL = 1 << 0;
        const DIRECTORY = 1 << 1;
        const DEVICE = 1 << 2;
        const FILE_SYSTEM = 1 << 3;
        const SOCKET = 1 << 4;
    }
}

/// Called when a socket node's last process goes away.
pub type CloseFn = fn(&mut FileNode);

pub struct FileNode {
    name: String,
    pub flags: FileFlags,
    /// Extra references held by other descriptor tables
    pub copy_count: i32,
    /// Set once the node has been released back to the VFS
    pub freed: bool,
    pub close: Option<CloseFn>,
}

impl FileNode {
    pub fn new(name: &str, flags: FileFlags) -> Self {
        Self {
            name: String::from(name),
            flags,
            copy_count: 0,
            freed: false,
            close: None,
        }
    }

    pub fn with_close(mut self, close: CloseFn) -> Self {
        self.close = Some(close);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// General files and directories are refcounted through `copy_count`.
    pub fn is_refcounted(&self) -> bool {
        self.flags
            .intersects(FileFlags::GENERAL | FileFlags::DIRECTORY)
    }

    /// Give up one descriptor's hold on the node.
    ///
    /// Devices and filesystem roots stay open. Refcounted nodes lose one
    /// copy, or are freed when none are left. Sockets run their close hook.
    pub fn release(&mut self) {
        if self
            .flags
            .intersects(FileFlags::DEVICE | FileFlags::FILE_SYSTEM)
        {
            return;
        }
        if self.is_refcounted() {
            if self.copy_count <= 0 {
                self.freed = true;
            } else {
                self.copy_count -= 1;
            }
        }
        if self.flags.contains(FileFlags::SOCKET) {
            if let Some(close) = self.close {
                close(self);
            }
        }
    }

    pub fn into_ref(self) -> FileRef {
        Arc::new(Mutex::new(self))
    }
}

impl fmt::Debug for FileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileNode")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("copy_count", &self.copy_count)
            .field("freed", &self.freed)
            .finish_non_exhaustive()
    }
}

pub type FileRef = Arc<Mutex<FileNode>>;

/// Per-process file descriptor table
pub struct FdTable {
    /// The file descriptors (None = unused slot)
    fds: Box<[Option<FileRef>; FILE_DESC_PER_PROCESS]>,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    pub fn new() -> Self {
        FdTable {
            fds: Box::new(core::array::from_fn(|_| None)),
        }
    }

    /// First free slot past the standard streams.
    ///
    /// The top three slots are never handed out.
    pub fn free_slot(&self) -> Option<usize> {
        (RESERVED_STD_FDS..FILE_DESC_PER_PROCESS - RESERVED_STD_FDS)
            .find(|&fd| self.fds[fd].is_none())
    }

    /// Place `file` in the first free slot.
    pub fn install(&mut self, file: FileRef) -> Result<usize, ProcError> {
        let fd = self.free_slot().ok_or(ProcError::NoFreeDescriptor)?;
        self.fds[fd] = Some(file);
        Ok(fd)
    }

    pub fn get(&self, fd: usize) -> Option<&FileRef> {
        self.fds.get(fd).and_then(|slot| slot.as_ref())
    }

    /// Put `file` at `fd`, handing back whatever was there.
    pub fn set(&mut self, fd: usize, file: FileRef) -> Result<Option<FileRef>, ProcError> {
        let slot = self.fds.get_mut(fd).ok_or(ProcError::BadDescriptor)?;
        Ok(slot.replace(file))
    }

    pub fn close(&mut self, fd: usize) -> Result<FileRef, ProcError> {
        self.fds
            .get_mut(fd)
            .and_then(|slot| slot.take())
            .ok_or(ProcError::BadDescriptor)
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.fds.iter().position(|slot| {
            slot.as_ref()
                .map_or(false, |file| file.lock().name() == name)
        })
    }

    pub fn open_count(&self) -> usize {
        self.fds.iter().filter(|slot| slot.is_some()).count()
    }

    /// Drop every descriptor as part of process exit.
    pub fn close_all(&mut self) {
        for (fd, slot) in self.fds.iter_mut().enumerate() {
            let Some(file) = slot.take() else { continue };
            let mut node = file.lock();
            log::debug!("closing fd {} '{}'", fd, node.name());
            node.release();
        }
    }
}
