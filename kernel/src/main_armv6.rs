//! Raspberry Pi kernel image.
//!
//! `trap_entry.S` sets up the mode stacks and jumps to `pikern_main` in
//! system mode; from then on the boot code is the bootstrap process.

#![cfg_attr(target_arch = "arm", no_std, no_main)]

#[cfg(target_arch = "arm")]
mod rpi {
    use core::panic::PanicInfo;

    use pikern::arch_impl::armv6::{boot, cpu};

    #[no_mangle]
    pub extern "C" fn pikern_main() -> ! {
        if let Err(err) = boot::init(None) {
            log::error!("Boot failed: {}", err);
            cpu::halt();
        }
        pikern::serial_println!("pikern: boot complete, bootstrap process idling");
        cpu::enable_interrupts();
        loop {
            cpu::wait_for_interrupt();
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        log::error!("KERNEL PANIC: {}", info);
        cpu::halt()
    }
}

#[cfg(not(target_arch = "arm"))]
fn main() {}
