//! Architecture-independent timer tick accessor.

pub fn get_ticks() -> u64 {
    crate::arch::x86_64::timer::get_ticks()
}

/// Milliseconds since boot. The PIT is programmed for a 10ms tick
/// (see `arch::x86_64::timer::setup_timer`), so this is just a scaled
/// read of the tick counter.
pub fn get_timestamp_ms() -> u64 {
    get_ticks() * 10
}
