//! Panic-path framebuffer banner.
//!
//! `original_source/Kernel/Include/KRE/System/FrameBuffer.h` has the panic
//! handler write a final diagnostic to the framebuffer in addition to the
//! serial dump; spec.md's Non-goal excludes "bitmap font rendering and
//! framebuffer drawing beyond what the panic path requires", which leaves
//! the panic path itself in scope. This is the minimal version of that: a
//! solid-color fill over the whole screen, no glyphs.

use crate::mm::bootloader::FramebufferInfo;

/// Fills the entire framebuffer with a single color so a panic is visible
/// even when nothing else ever reached the screen. Only 24 and 32 bits per
/// pixel are handled (the only depths a Limine-booted framebuffer reports
/// in practice); anything else is skipped rather than risking a
/// fractional-byte stride.
pub fn draw_banner(fb: &FramebufferInfo) {
    if fb.address == 0 || fb.width == 0 || fb.height == 0 {
        return;
    }
    let bytes_per_pixel = match fb.bpp {
        32 => 4u64,
        24 => 3u64,
        _ => return,
    };

    let color = (0xFFu32 << fb.red_shift) | (0x00u32 << fb.green_shift) | (0x00u32 << fb.blue_shift);
    let [b0, b1, b2, _] = color.to_le_bytes();

    // SAFETY: `fb.address` is the framebuffer's Limine-mapped virtual base;
    // the bootloader establishes this mapping as writable MMIO before
    // control reaches the kernel, and every write below stays within
    // `pitch * height` bytes of it, which is the framebuffer's own
    // reported size.
    unsafe {
        let base = fb.address as *mut u8;
        for y in 0..fb.height {
            let row = base.add((y * fb.pitch) as usize);
            for x in 0..fb.width {
                let pixel = row.add((x * bytes_per_pixel) as usize);
                match bytes_per_pixel {
                    4 => core::ptr::write_volatile(pixel as *mut u32, color),
                    3 => {
                        core::ptr::write_volatile(pixel, b0);
                        core::ptr::write_volatile(pixel.add(1), b1);
                        core::ptr::write_volatile(pixel.add(2), b2);
                    }
                    _ => unreachable!(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fb(bpp: u16) -> FramebufferInfo {
        FramebufferInfo {
            address: 0,
            width: 4,
            height: 4,
            pitch: 16,
            bpp,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    #[test]
    fn zero_address_is_skipped_without_panicking() {
        draw_banner(&fb(32));
    }

    #[test]
    fn unsupported_bpp_is_skipped_without_panicking() {
        let mut info = fb(16);
        info.address = 0x1000;
        draw_banner(&info);
    }
}
