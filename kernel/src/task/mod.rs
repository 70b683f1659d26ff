//! Threads and scheduling.

pub mod registry;
pub mod scheduler;
pub mod thread;

pub use registry::{ListKind, ThreadHandle, ThreadRegistry};
pub use scheduler::{Scheduler, Switch};
pub use thread::{CpuContext, Thread, ThreadLevel, ThreadState, Tid};
