//! Kernel logger
//!
//! Records are kept in a small in-memory buffer until an output sink (the
//! serial port on the board) registers itself with [`serial_ready`]; the
//! buffer is flushed then and later records go straight to the sink.

use conquer_once::spin::OnceCell;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

const BUFFER_SIZE: usize = 4096;

/// Where formatted log lines go once output is available.
pub type Sink = fn(fmt::Arguments);

/// Buffer for storing log messages before serial is initialized
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

pub struct KernelLogger {
    level: LevelFilter,
    buffer: Mutex<LogBuffer>,
    sink: OnceCell<Sink>,
}

impl KernelLogger {
    pub const fn new(level: LevelFilter) -> Self {
        Self {
            level,
            buffer: Mutex::new(LogBuffer::new()),
            sink: OnceCell::uninit(),
        }
    }

    /// Register the output sink and flush everything buffered so far.
    ///
    /// Only the first sink is kept.
    pub fn serial_ready(&self, sink: Sink) {
        if self.sink.try_init_once(|| sink).is_err() {
            return;
        }
        let mut buffer = self.buffer.lock();
        if buffer.position > 0 {
            sink(format_args!("{}", buffer.contents()));
            buffer.clear();
        }
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = self.sink.get() {
            sink(format_args!("[{:>5}] {}: {}\n", record.level(), record.target(), record.args()));
            return;
        }
        // try_lock: a trap taken while buffering must not deadlock.
        if let Some(mut buffer) = self.buffer.try_lock() {
            let start = buffer.position;
            let written = write!(&mut *buffer, "[{:>5}] {}: {}\n", record.level(), record.target(), record.args());
            if written.is_err() {
                // Full: drop the whole record, keep the older ones.
                buffer.position = start;
            }
        }
    }

    fn flush(&self) {}
}

pub static LOGGER: KernelLogger = KernelLogger::new(LevelFilter::Debug);

/// Install the kernel logger; records are buffered until [`serial_ready`].
pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(LOGGER.level);
    Ok(())
}

/// Call after the serial port is initialized
pub fn serial_ready(sink: Sink) {
    LOGGER.serial_ready(sink);
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    fn capture(args: fmt::Arguments) {
        CAPTURED.lock().push_str(&alloc::format!("{}", args));
    }

    fn emit(logger: &KernelLogger, level: Level, message: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("pikern::test")
                .args(format_args!("{}", message))
                .build(),
        );
    }

    #[test]
    fn test_buffers_until_sink_then_writes_through() {
        let logger = KernelLogger::new(LevelFilter::Info);
        emit(&logger, Level::Info, "early");
        emit(&logger, Level::Debug, "filtered");
        assert!(CAPTURED.lock().is_empty());

        logger.serial_ready(capture);
        emit(&logger, Level::Warn, "late");
        assert_eq!(
            CAPTURED.lock().as_str(),
            "[ INFO] pikern::test: early\n[ WARN] pikern::test: late\n"
        );
        assert_eq!(logger.buffer.lock().position, 0);
    }

    #[test]
    fn test_full_buffer_drops_new_records() {
        let logger = KernelLogger::new(LevelFilter::Trace);
        let long = "x".repeat(BUFFER_SIZE - 40);
        emit(&logger, Level::Trace, &long);
        let used = logger.buffer.lock().position;
        emit(&logger, Level::Trace, "does not fit anymore");
        assert_eq!(logger.buffer.lock().position, used);
    }
}
