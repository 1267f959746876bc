//! Kernel bring-up on the board.

use super::entry::KERNEL;
use super::{mmu, Armv6Platform};
use crate::memory::heap;
use crate::memory::Region;
use crate::platform_config::KernelConfig;
use crate::trap::{Fatal, Kernel};
use crate::{logger, serial};

extern "C" {
    static __kernel_heap_start: u8;
}

/// Bring up serial logging, the kernel heap, the kernel table and the MMU,
/// and install the kernel for the trap entry. The caller becomes the
/// bootstrap process.
pub fn init(framebuffer: Option<Region>) -> Result<(), Fatal> {
    serial::init();
    if logger::init().is_ok() {
        logger::serial_ready(serial::sink);
    }

    let config = KernelConfig::raspberry_pi();
    config.layout.validate().map_err(Fatal::InvalidLayout)?;
    let (scratch, _) = config.layout.scratch_pages();
    // SAFETY: everything between the image and the scratch pages is free,
    // and boot runs once.
    unsafe {
        let start = core::ptr::addr_of!(__kernel_heap_start) as u32;
        heap::init(start, scratch.start_address().as_u32()).map_err(Fatal::InvalidLayout)?;
    }

    // SAFETY: the only platform instance.
    let platform = unsafe { Armv6Platform::new(framebuffer) };
    let kernel = Kernel::new(platform, config)?;
    // SAFETY: the kernel table identity-maps the whole kernel region.
    unsafe { mmu::enable(kernel.vm().kernel_root()) };

    *KERNEL.lock() = Some(kernel);
    log::info!("Kernel ready ({} bytes of kernel heap in use)", heap::used());
    Ok(())
}
