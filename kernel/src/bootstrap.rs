//! Composition root: owns the boot-order handoff data and drives every
//! subsystem's `init()` in the sequence fixed by the system overview —
//! Boot Glue, PMM, VMM, Heap, Interrupts & Timer, Scheduler, Devices & VFS,
//! Application Module, System Call Gate.

use crate::mm::bootloader::{BootInfo, FramebufferInfo};
use crate::mm::MemoryMap;
use crate::sync::GlobalState;
use crate::{drivers, elf as _elf, fs, irq, mm, process, sched, syscall, timer};

static BOOT_INFO: GlobalState<BootInfo> = GlobalState::new();
static MEMORY_MAP: GlobalState<MemoryMap> = GlobalState::new();

/// Reads back the `BootInfo` collected from Limine. Panics if called before
/// `run()` has collected it — every subsystem initializer runs after that
/// point, so this is a logic error, not a runtime condition.
pub fn boot_info() -> &'static BootInfo {
    BOOT_INFO
        .try_get()
        .expect("boot_info() called before boot glue ran")
        .as_ref()
        .unwrap()
}

/// A copy of the framebuffer descriptor, if the bootloader reported one and
/// boot glue has already run. Unlike `boot_info()`, never panics: the
/// panic-path framebuffer banner (`panic_banner::draw_banner`) calls this
/// from inside the `#[panic_handler]` itself, where panicking again would
/// recurse rather than report.
pub fn framebuffer_info() -> Option<FramebufferInfo> {
    BOOT_INFO.try_get()?.as_ref()?.framebuffer
}

/// The live memory map, as mutated by the PMM's region claims. Owned here
/// (not inside the PMM) because the VMM and the reclaim step both need to
/// retag regions in it.
pub fn memory_map<R>(f: impl FnOnce(&MemoryMap) -> R) -> R {
    MEMORY_MAP
        .with(f)
        .expect("memory_map() called before boot glue ran")
}

pub fn set_memory_map(map: MemoryMap) {
    MEMORY_MAP
        .init(map)
        .unwrap_or_else(|_| panic!("memory map initialized twice"));
}

pub fn with_memory_map_mut<R>(f: impl FnOnce(&mut MemoryMap) -> R) -> R {
    MEMORY_MAP
        .with_mut(f)
        .expect("with_memory_map_mut() called before boot glue ran")
}

/// Runs the full boot sequence. Never returns: falls through into the
/// scheduler's run loop.
pub fn run() -> ! {
    crate::serial::init();
    log::info!("runeOS kernel starting");

    let info = mm::bootloader::collect();
    BOOT_INFO
        .init(info)
        .unwrap_or_else(|_| panic!("boot info initialized twice"));

    crate::arch::init();
    mm::init();
    irq::init();
    timer::init();
    sched::init();
    drivers::init();
    fs::init();
    crate::log_service::open_file_sink();
    process::init();
    syscall::init();

    log::info!("runeOS kernel initialized, starting init process");
    process::start_os("/Apps/Crucible.app", "/");

    sched::run()
}
