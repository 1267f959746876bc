//! BCM2835 system timer.
//!
//! A free-running 1 MHz counter (CLO/CHI) with four compare channels.
//! Channel 1 drives preemption; channels 0 and 2 belong to the GPU.

use crate::platform_config::{IRQ_CONTROLLER_BASE, SYSTEM_TIMER_BASE, TIMER_TICKS_PER_MS};

/// Control/status: a set Mn bit means channel n matched; write 1 to clear.
const TIMER_CS: u32 = SYSTEM_TIMER_BASE;
const TIMER_CLO: u32 = SYSTEM_TIMER_BASE + 0x04;
const TIMER_CHI: u32 = SYSTEM_TIMER_BASE + 0x08;
const TIMER_C1: u32 = SYSTEM_TIMER_BASE + 0x10;
const TIMER_CS_M1: u32 = 1 << 1;

/// Enable IRQs 1 register of the interrupt controller.
const IRQ_ENABLE_1: u32 = IRQ_CONTROLLER_BASE + 0x10;
/// System timer match 1 is GPU IRQ 1.
const IRQ_SYSTEM_TIMER_1: u32 = 1 << 1;

#[inline]
fn read(addr: u32) -> u32 {
    // SAFETY: timer registers are valid MMIO in the identity-mapped device window.
    unsafe { core::ptr::read_volatile(addr as *const u32) }
}

#[inline]
fn write(addr: u32, value: u32) {
    // SAFETY: as in `read`.
    unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
}

/// Route compare channel 1 to the ARM IRQ line.
pub fn init() {
    write(IRQ_ENABLE_1, IRQ_SYSTEM_TIMER_1);
}

/// Acknowledge any pending match and fire again `ticks` scheduler ticks from now.
///
/// One scheduler tick is one millisecond.
pub fn arm(ticks: u32) {
    write(TIMER_CS, TIMER_CS_M1);
    let delay = ticks.max(1).saturating_mul(TIMER_TICKS_PER_MS);
    write(TIMER_C1, read(TIMER_CLO).wrapping_add(delay));
}

/// Microseconds since power-on.
pub fn counter() -> u64 {
    // Re-read until CHI is stable across the CLO read.
    loop {
        let high = read(TIMER_CHI);
        let low = read(TIMER_CLO);
        if read(TIMER_CHI) == high {
            return (high as u64) << 32 | low as u64;
        }
    }
}

pub fn uptime_ms() -> u64 {
    counter() / TIMER_TICKS_PER_MS as u64
}
