//! Platform configuration.
//!
//! Peripheral addresses for the BCM2835 and the tunables the kernel core is
//! built with. `KernelConfig::raspberry_pi()` is the configuration the boot
//! path uses; tests build smaller ones around the simulated board.

use crate::memory::layout::MemoryLayout;
use crate::memory::pages_for;

// =============================================================================
// BCM2835 peripherals (ARM physical addresses)
// =============================================================================

pub const PERIPHERAL_BASE: u32 = 0x2000_0000;

/// System timer: free-running 1 MHz counter with four compare channels.
pub const SYSTEM_TIMER_BASE: u32 = PERIPHERAL_BASE + 0x3000;
/// Interrupt controller.
pub const IRQ_CONTROLLER_BASE: u32 = PERIPHERAL_BASE + 0xB200;
/// Power management block (watchdog).
pub const PM_BASE: u32 = PERIPHERAL_BASE + 0x10_0000;
/// PL011 UART0.
pub const UART0_BASE: u32 = PERIPHERAL_BASE + 0x20_1000;

/// Address the firmware loads the kernel image at.
pub const KERNEL_LOAD_ADDRESS: u32 = 0x8000;

/// System timer ticks per scheduling tick (1 ms at 1 MHz).
pub const TIMER_TICKS_PER_MS: u32 = 1000;

// =============================================================================
// Scheduling and process defaults
// =============================================================================

/// Timer ticks distributed over one round of the ring.
pub const TIME_SLICE: u32 = 50;

pub const PROCESS_STACK_SIZE: u32 = 10 * 1024;

/// Niceness of the process that runs the boot code (lowest priority).
pub const BOOTSTRAP_NICENESS: i32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    pub layout: MemoryLayout,
    pub time_slice: u32,
    /// Stack size of new processes in bytes, rounded up to whole pages.
    pub stack_size: u32,
    pub bootstrap_niceness: i32,
}

impl KernelConfig {
    pub const fn raspberry_pi() -> Self {
        Self {
            layout: MemoryLayout::RASPBERRY_PI,
            time_slice: TIME_SLICE,
            stack_size: PROCESS_STACK_SIZE,
            bootstrap_niceness: BOOTSTRAP_NICENESS,
        }
    }

    pub const fn stack_pages(&self) -> u32 {
        pages_for(self.stack_size)
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::raspberry_pi()
    }
}
