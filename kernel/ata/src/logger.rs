//! `log` backend writing to a 16550 serial port.

use core::fmt::{self, Display, Write};
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
use core::sync::atomic::{AtomicUsize, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use owo_colors::OwoColorize;
use uart_16550::SerialPort;
use unicode_segmentation::UnicodeSegmentation;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use x86_64::instructions::interrupts::{self, without_interrupts};

struct SerialLogger {
    port: spin::Mutex<Option<SerialPort>>,
}

static LOGGER: SerialLogger = SerialLogger {
    port: spin::Mutex::new(None),
};

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // The ATA interrupt handler logs too; it must not find the port locked
        // by the thread it interrupted.
        without_interrupts(|| {
            debug_assert!(interrupts_masked());
            if let Some(port) = self.port.lock().as_mut() {
                let _ = write_record(&mut WriterWithCr::new(port), record);
            }
        });
    }

    fn flush(&self) {}
}

/// Installs the serial logger on the UART at `base`.
///
/// # Safety
/// `base` must be a 16550-compatible UART that nothing else drives.
pub unsafe fn init(base: u16, level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let mut serial = unsafe { SerialPort::new(base) };
    serial.init();
    without_interrupts(|| *LOGGER.port.lock() = Some(serial));
    log::set_max_level(level);
    log::set_logger(&LOGGER)
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
fn interrupts_masked() -> bool {
    !interrupts::are_enabled()
}

// Hosted builds take no interrupts; the depth only tracks masked sections.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
static MASK_DEPTH: AtomicUsize = AtomicUsize::new(0);

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    MASK_DEPTH.fetch_add(1, Ordering::Relaxed);
    let result = f();
    MASK_DEPTH.fetch_sub(1, Ordering::Relaxed);
    result
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
fn interrupts_masked() -> bool {
    MASK_DEPTH.load(Ordering::Relaxed) > 0
}

/// `LEVEL [target] message`
fn write_record(out: &mut impl Write, record: &Record) -> fmt::Result {
    let level = record.level();
    let color = match level {
        Level::Error => Color::BrightRed,
        Level::Warn => Color::BrightYellow,
        Level::Info => Color::BrightBlue,
        Level::Debug => Color::BrightCyan,
        Level::Trace => Color::BrightMagenta,
    };
    paint(out, color, format_args!("{level:5} "))?;
    paint(out, Color::Gray, format_args!("[{}] ", record.target()))?;
    paint(out, Color::Default, record.args())?;
    out.write_str("\n")
}

fn paint(out: &mut impl Write, color: Color, text: impl Display) -> fmt::Result {
    match color {
        Color::Default => write!(out, "{text}"),
        Color::Gray => write!(out, "{}", text.dimmed()),
        Color::BrightRed => write!(out, "{}", text.bright_red()),
        Color::BrightYellow => write!(out, "{}", text.bright_yellow()),
        Color::BrightBlue => write!(out, "{}", text.bright_blue()),
        Color::BrightCyan => write!(out, "{}", text.bright_cyan()),
        Color::BrightMagenta => write!(out, "{}", text.bright_magenta()),
    }
}

/// Serial terminals want `\r\n`.
struct WriterWithCr<T> {
    writer: T,
}

impl<T> WriterWithCr<T> {
    const fn new(writer: T) -> Self {
        Self { writer }
    }
}

impl<T: Write> Write for WriterWithCr<T> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for grapheme in s.graphemes(true) {
            match grapheme {
                "\n" => self.writer.write_str("\r\n")?,
                other => self.writer.write_str(other)?,
            }
        }
        Ok(())
    }
}

enum Color {
    Default,
    Gray,
    BrightRed,
    BrightYellow,
    BrightBlue,
    BrightCyan,
    BrightMagenta,
}
