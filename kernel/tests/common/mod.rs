//! Shared helpers for the bare-metal integration test binaries under
//! `tests/`. Each test binary links against `runeos_kernel` as an external
//! crate and supplies its own `_start`/panic handler; this module only
//! holds the setup glue every suite repeats.

use runeos_kernel::serial_println;

/// Prints the suite banner every test binary starts with.
pub fn init_test_env(subsystem: &str) {
    serial_println!("\n=== {} ===", subsystem);
}
