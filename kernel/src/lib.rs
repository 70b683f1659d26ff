//! Process and thread lifecycle management for a single-core kernel.
//!
//! The crate owns the thread lists, the round-robin scheduler and the
//! process table. Page tables, frame allocation, image loading and the
//! subsystems that hold per-thread resources are reached through traits
//! (`MemoryServices`, `ImageLoader`, `ResourceHooks`, `ArchOps`) so the same
//! code runs on bare metal and under the hosted test harness.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch_impl;
pub mod error;
pub mod layout;
pub mod logger;
pub mod memory;
pub mod process;
pub mod syscall;
pub mod task;

#[cfg(test)]
mod testing;

pub use error::{ListError, ProcError};
pub use process::{ProcessId, ProcessManager};
pub use task::thread::Tid;
