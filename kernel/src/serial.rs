//! Boot-time serial bring-up and the `log` crate bridge.
//!
//! Raw `serial_print!`/`println!` output (see [`crate::print`]) goes straight
//! to COM1 through [`crate::arch::x86_64::serial`] and is available before
//! anything else in the kernel is up. [`KernelLogger`] additionally mirrors
//! every `log::info!`/`log::warn!`/etc. call into the structured ring buffer
//! in [`crate::log_service`], so a panic handler or a later `/proc`-style
//! diagnostic can dump recent history even once the serial line itself is
//! quiet.

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::log_service::{self, LogLevel};

/// Boot-time default. Component #12 calls for level-filtered loggers, not a
/// blanket pass-through; `Info` is quiet enough for normal boot while still
/// surfacing every subsystem's status line. Raise it at runtime with
/// `set_log_level` (e.g. from a debug syscall) when deeper tracing is
/// needed.
const DEFAULT_LEVEL: LevelFilter = LevelFilter::Info;

fn level_to_log_level(level: Level) -> LogLevel {
    match level {
        Level::Error => LogLevel::Error,
        Level::Warn => LogLevel::Warn,
        Level::Info => LogLevel::Info,
        Level::Debug => LogLevel::Debug,
        Level::Trace => LogLevel::Trace,
    }
}

/// `record.target()` defaults to the full module path (e.g.
/// `"runeos_kernel::fs::fat32"`). `log_service` uses this as both the
/// ring buffer's subsystem tag and, once the file sink is active, a
/// `<module>.log` file name -- so this strips the crate prefix and keeps
/// only the top-level subsystem (`"fs"`), matching the short tags
/// `log_service`'s own doc comments use (`"sched"`, `"mm"`, `"fs"`).
fn subsystem_tag(target: &str) -> &str {
    let without_crate = target.strip_prefix("runeos_kernel::").unwrap_or(target);
    match without_crate.split_once("::") {
        Some((head, _)) => head,
        None => without_crate,
    }
}

/// A `log::Log` implementation that fans every record out to the serial
/// port and the in-memory structured log buffer.
struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::serial_println!(
            "[{:>5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );

        extern crate alloc;
        use alloc::string::ToString;
        let message = record.args().to_string();
        log_service::klog(
            level_to_log_level(record.level()),
            subsystem_tag(record.target()),
            &message,
        );
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Brings up COM1 and installs the `log` crate bridge. Must run before any
/// other subsystem logs anything (it is the first line of `bootstrap::run`).
pub fn init() {
    // Force the lazy_static serial port to initialize now rather than on
    // first use, so early boot output doesn't pay that cost mid-message.
    crate::arch::x86_64::serial::SERIAL1.lock();

    log_service::log_init();
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(DEFAULT_LEVEL))
        .unwrap_or(());
}

/// Reconfigures the kernel-wide log level filter at runtime. `enabled()`
/// consults `log::max_level()` directly, so this takes effect on the very
/// next `log::info!`/etc. call -- no restart needed.
pub fn set_log_level(level: LevelFilter) {
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsystem_tag_strips_crate_prefix_and_submodules() {
        assert_eq!(subsystem_tag("runeos_kernel::fs::fat32"), "fs");
        assert_eq!(subsystem_tag("runeos_kernel::sched"), "sched");
        assert_eq!(subsystem_tag("sched"), "sched");
    }

    #[test]
    fn enabled_honors_configured_max_level() {
        let logger = KernelLogger;
        log::set_max_level(LevelFilter::Warn);
        assert!(logger.enabled(&Metadata::builder().level(Level::Error).build()));
        assert!(logger.enabled(&Metadata::builder().level(Level::Warn).build()));
        assert!(!logger.enabled(&Metadata::builder().level(Level::Info).build()));
        assert!(!logger.enabled(&Metadata::builder().level(Level::Debug).build()));

        log::set_max_level(LevelFilter::Trace);
        assert!(logger.enabled(&Metadata::builder().level(Level::Trace).build()));

        // Restore the boot default so other tests in this process see the
        // usual filtering.
        log::set_max_level(DEFAULT_LEVEL);
    }
}
