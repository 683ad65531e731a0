//! Loads an executable into a fresh address space, wires up its std
//! streams, and hands it to the scheduler: `start_os` for the init process,
//! `start_new_app` for everything it spawns afterward.

extern crate alloc;

use alloc::string::ToString;
use alloc::vec::Vec;

use crate::elf;
use crate::error::AppError;
use crate::fs::{self, OpenMode, OpenedNode};
use crate::mm::vmm;
use crate::sched::{self, Priority, TaskContext, Thread};

use super::pcb::{AppId, Application, StdTarget};
use super::stdio;
use super::table;

/// User stack placement within a fresh address space: fixed top address,
/// one size, same for every process. Grows down from `USER_STACK_TOP`.
const USER_STACK_TOP: u64 = vmm::KERNEL_MEMORY_START - 0x1000;
const USER_STACK_SIZE: u64 = 256 * 1024;

fn read_executable(path: &str) -> Result<Vec<u8>, AppError> {
    match fs::vfs().open(path, OpenMode::Read) {
        Ok(OpenedNode::File(file)) => {
            let mut data = alloc::vec![0u8; file.size() as usize];
            file.seek(0);
            let mut read = 0;
            while read < data.len() {
                let n = file.read(&mut data[read..]).map_err(|_| AppError::NodeNotFound)?;
                if n == 0 {
                    break;
                }
                read += n;
            }
            data.truncate(read);
            Ok(data)
        }
        Ok(OpenedNode::Directory(_)) => Err(AppError::BadArg),
        Err(_) => Err(AppError::NodeNotFound),
    }
}

#[allow(clippy::too_many_arguments)]
fn create(
    path: &str,
    argv: &[&str],
    wd: &str,
    stdin_cfg: StdTarget,
    stdout_cfg: StdTarget,
    stderr_cfg: StdTarget,
    parent: Option<&Application>,
) -> Result<AppId, AppError> {
    let data = read_executable(path)?;
    let image = elf::load(&data).map_err(AppError::Fault)?;
    let mut address_space = image.address_space;

    let flags = crate::mm::PageFlags::PRESENT
        | crate::mm::PageFlags::WRITABLE
        | crate::mm::PageFlags::USER_ACCESSIBLE
        | crate::mm::PageFlags::NO_EXECUTE;
    let stack_base = USER_STACK_TOP - USER_STACK_SIZE;
    let stack_pages = (USER_STACK_SIZE as usize) / crate::mm::FRAME_SIZE;
    address_space
        .allocate(crate::mm::VirtualAddress(stack_base), flags, stack_pages)
        .map_err(|_| AppError::Fault(crate::error::ElfError::MemoryError))?;
    let user_sp = elf::build_user_stack(&mut address_space, USER_STACK_TOP, argv)
        .map_err(AppError::Fault)?;

    let std_in = stdio::resolve(stdin_cfg, parent.map(|p| &p.std_in));
    let std_out = stdio::resolve(stdout_cfg, parent.map(|p| &p.std_out));
    let std_err = stdio::resolve(stderr_cfg, parent.map(|p| &p.std_err));

    let root = address_space.root_physical().as_u64();
    let name = path
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .trim_end_matches(".app")
        .to_string();

    let app = Application::new(
        path.to_string(),
        name,
        image.vendor_info.vendor,
        image.vendor_info.version,
        wd.to_string(),
        address_space,
        image.entry_point,
        image.heap_start,
        std_in,
        std_out,
        std_err,
    );

    let kernel_sp = vmm::alloc_kernel_stack().map_err(|_| AppError::BadArg)?;
    let mut context = TaskContext::new_user(image.entry_point as usize, user_sp as usize);
    context.set_kernel_stack(kernel_sp as usize);
    context.set_page_table_root(root);

    let thread = Thread::new(
        app.name.clone(),
        Priority::Normal,
        app.id.0,
        context,
        kernel_sp as usize,
        user_sp as usize,
    );
    app.add_thread(thread.clone());

    table::process_table().insert(app.clone());
    sched::scheduler::spawn(thread);
    Ok(app.id)
}

/// Loads the init process. There is no parent to inherit a std stream
/// from, so `inherit` (which the boot sequence does not actually pass)
/// would resolve to the console.
pub fn start_os(path: &str, wd: &str) -> Result<AppId, AppError> {
    create(path, &[path], wd, StdTarget::Inherit, StdTarget::Inherit, StdTarget::Inherit, None)
}

/// Loads a child of `parent`, inheriting any `StdTarget::Inherit` stream
/// from the parent's own (already-resolved) target.
#[allow(clippy::too_many_arguments)]
pub fn start_new_app(
    parent: &Application,
    path: &str,
    argv: &[&str],
    wd: &str,
    stdin_cfg: StdTarget,
    stdout_cfg: StdTarget,
    stderr_cfg: StdTarget,
) -> Result<AppId, AppError> {
    create(path, argv, wd, stdin_cfg, stdout_cfg, stderr_cfg, Some(parent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_stack_fits_below_kernel_boundary() {
        assert!(USER_STACK_TOP < vmm::KERNEL_MEMORY_START);
        assert!(USER_STACK_TOP - USER_STACK_SIZE < USER_STACK_TOP);
    }
}
