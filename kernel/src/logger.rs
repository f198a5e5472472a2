//! Kernel logger
//!
//! `log` backend for the scheduling core. Records are formatted into a fixed
//! stack buffer (no allocation while the scheduling lock may be held) and
//! handed to the console sink installed by the platform.

use log::{Level, LevelFilter, Metadata, Record};
use spin::Once;

/// Byte sink the platform provides for console output
pub trait ConsoleSink: Send + Sync {
    fn write_bytes(&self, bytes: &[u8]);
}

/// Logger writing `[LEVEL] message` lines to the console sink
struct KernelLogger;

static SINK: Once<&'static dyn ConsoleSink> = Once::new();
static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(sink) = SINK.get() else {
            return;
        };

        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        use core::fmt::Write;
        let mut buf = [0u8; 512];
        let pos = {
            let mut writer = BufferWriter { buffer: &mut buf, pos: 0 };
            let _ = core::write!(&mut writer, "[{}] {}\n", level_str, record.args());
            writer.pos
        };
        sink.write_bytes(&buf[..pos]);
    }

    fn flush(&self) {}
}

/// Buffer writer for formatting without alloc
///
/// Output longer than the buffer is truncated.
pub struct BufferWriter<'a> {
    pub buffer: &'a mut [u8],
    pub pos: usize,
}

impl<'a> core::fmt::Write for BufferWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);

        if to_write > 0 {
            self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
        }

        Ok(())
    }
}

/// Install the logger with the default level (`Info`)
pub fn init(sink: &'static dyn ConsoleSink) -> bool {
    init_with_level(sink, LevelFilter::Info)
}

/// Install the logger with a specific level
///
/// Returns `false` if another logger was already installed; the sink is
/// kept either way so a later `log::set_logger` race cannot lose output.
pub fn init_with_level(sink: &'static dyn ConsoleSink, level: LevelFilter) -> bool {
    SINK.call_once(|| sink);
    match log::set_logger(&LOGGER) {
        Ok(()) => {
            log::set_max_level(level);
            true
        }
        Err(_) => {
            sink.write_bytes(b"[LOGGER] logger already installed\n");
            false
        }
    }
}
