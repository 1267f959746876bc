//! ARM1176 CPU operations.
//!
//! IRQs are masked with the I bit of the CPSR (`cpsid i` / `cpsie i`).
//! Reboot goes through the BCM2835 power-management watchdog, or, without
//! the `rpi` feature (QEMU), jumps back to the image load address.

use crate::arch_impl::traits::CpuOps;
#[cfg(feature = "rpi")]
use crate::platform_config::PM_BASE;

/// CPSR I bit
const CPSR_IRQ_DISABLE: u32 = 1 << 7;

#[cfg(feature = "rpi")]
const PM_RSTC: u32 = PM_BASE + 0x1c;
#[cfg(feature = "rpi")]
const PM_WDOG: u32 = PM_BASE + 0x24;
#[cfg(feature = "rpi")]
const PM_PASSWORD: u32 = 0x5a00_0000;
#[cfg(feature = "rpi")]
const PM_RSTC_WRCFG_FULL_RESET: u32 = 0x20;

/// Mask IRQs
#[inline]
pub fn disable_interrupts() {
    // SAFETY: only changes the CPSR I bit.
    unsafe { core::arch::asm!("cpsid i", options(nomem, nostack)) };
}

/// Unmask IRQs
#[inline]
pub fn enable_interrupts() {
    // SAFETY: only changes the CPSR I bit.
    unsafe { core::arch::asm!("cpsie i", options(nomem, nostack)) };
}

#[inline]
pub fn interrupts_enabled() -> bool {
    let cpsr: u32;
    // SAFETY: reading the CPSR has no side effects.
    unsafe { core::arch::asm!("mrs {}, cpsr", out(reg) cpsr, options(nomem, nostack)) };
    cpsr & CPSR_IRQ_DISABLE == 0
}

/// The interrupt mask of the running core, for code that has no platform.
pub struct Cpu;

impl CpuOps for Cpu {
    fn disable_interrupts(&mut self) {
        disable_interrupts();
    }

    fn enable_interrupts(&mut self) {
        enable_interrupts();
    }

    fn interrupts_enabled(&self) -> bool {
        interrupts_enabled()
    }

    fn reboot(&mut self) {
        reboot()
    }
}

/// Run `f` with IRQs masked, restoring the previous mask afterwards.
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    Cpu.without_interrupts(|_| f())
}

/// Stop for good.
pub fn halt() -> ! {
    disable_interrupts();
    loop {
        wait_for_interrupt();
    }
}

/// Reset the board.
#[cfg(feature = "rpi")]
pub fn reboot() -> ! {
    // SAFETY: documented BCM2835 watchdog sequence on identity-mapped registers.
    unsafe {
        core::ptr::write_volatile(PM_WDOG as *mut u32, PM_PASSWORD | 1);
        core::ptr::write_volatile(PM_RSTC as *mut u32, PM_PASSWORD | PM_RSTC_WRCFG_FULL_RESET);
    }
    halt()
}

/// Restart the image (QEMU has no watchdog).
#[cfg(not(feature = "rpi"))]
pub fn reboot() -> ! {
    use crate::platform_config::KERNEL_LOAD_ADDRESS;
    // SAFETY: the image entry point re-initialises everything it relies on.
    unsafe { core::arch::asm!("bx {}", in(reg) KERNEL_LOAD_ADDRESS, options(noreturn)) }
}

/// Sleep until the next interrupt.
#[inline]
pub fn wait_for_interrupt() {
    // SAFETY: CP15 wait-for-interrupt has no other effect.
    unsafe { core::arch::asm!("mcr p15, 0, {}, c7, c0, 4", in(reg) 0u32, options(nomem, nostack)) };
}
