//! Kernel logger.
//!
//! Records are formatted into a fixed buffer until an output sink (usually
//! the serial port) is attached. Attaching the sink flushes the backlog and
//! every later record is written straight through.

use conquer_once::spin::OnceCell;
use core::fmt::{self, Write};
use core::sync::atomic::{AtomicU64, Ordering};
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

const BUFFER_SIZE: usize = 8192;

/// Output routine for formatted log text.
pub type Sink = fn(&str);

/// Buffer for storing log messages before a sink exists
struct LogBuffer {
    buffer: [u8; BUFFER_SIZE],
    position: usize,
}

impl LogBuffer {
    const fn new() -> Self {
        Self {
            buffer: [0; BUFFER_SIZE],
            position: 0,
        }
    }

    fn contents(&self) -> &str {
        core::str::from_utf8(&self.buffer[..self.position]).unwrap_or("<invalid UTF-8>")
    }

    fn clear(&mut self) {
        self.position = 0;
    }
}

impl Write for LogBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = BUFFER_SIZE - self.position;

        if bytes.len() > remaining {
            return Err(fmt::Error);
        }

        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }
}

struct SinkWriter(Sink);

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        (self.0)(s);
        Ok(())
    }
}

pub struct KernelLogger {
    buffer: Mutex<LogBuffer>,
    sink: OnceCell<Sink>,
    /// Records lost to lock contention or to a full buffer.
    dropped: AtomicU64,
}

impl KernelLogger {
    pub const fn new() -> Self {
        KernelLogger {
            buffer: Mutex::new(LogBuffer::new()),
            sink: OnceCell::uninit(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach the output sink and flush everything buffered so far.
    ///
    /// Only the first sink sticks; later calls are ignored.
    pub fn attach_sink(&self, sink: Sink) {
        let mut buffer = self.buffer.lock();
        if self.sink.try_init_once(|| sink).is_err() {
            return;
        }
        if buffer.position > 0 {
            sink(buffer.contents());
            buffer.clear();
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn buffered(&self) -> alloc::string::String {
        alloc::string::String::from(self.buffer.lock().contents())
    }
}

impl Default for KernelLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // try_lock: the timer path may log while a lower context holds the buffer.
        let mut buffer = match self.buffer.try_lock() {
            Some(buffer) => buffer,
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.sink.get() {
            Some(&sink) => {
                drop(buffer);
                let _ = write!(
                    SinkWriter(sink),
                    "[{:>5}] {}: {}\n",
                    record.level(),
                    record.target(),
                    record.args()
                );
            }
            None => {
                // Full: keep what we have, drop the whole newcomer.
                let mark = buffer.position;
                let written = write!(
                    &mut *buffer,
                    "[{:>5}] {}: {}\n",
                    record.level(),
                    record.target(),
                    record.args()
                );
                if written.is_err() {
                    buffer.position = mark;
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn flush(&self) {}
}

pub static KERNEL_LOGGER: KernelLogger = KernelLogger::new();

/// Install the kernel logger. Safe to call before any sink exists.
pub fn init(level: LevelFilter) {
    if log::set_logger(&KERNEL_LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Route log output to `sink` from now on.
pub fn attach_sink(sink: Sink) {
    KERNEL_LOGGER.attach_sink(sink);
}
