//! Serial output on the BCM2835 PL011 UART.
//!
//! The UART lives in the identity-mapped peripheral window, so the same
//! address works before and after the MMU is on. The firmware has already
//! routed GPIO 14/15 to it.

#![cfg(target_arch = "arm")]

use core::fmt;
use spin::Mutex;

use crate::arch_impl::armv6::cpu;
use crate::platform_config::UART0_BASE;

/// PL011 register offsets
#[allow(dead_code)]
mod reg {
    /// Data Register
    pub const DR: u32 = 0x00;
    /// Flag Register
    pub const FR: u32 = 0x18;
    /// Integer Baud Rate Register
    pub const IBRD: u32 = 0x24;
    /// Fractional Baud Rate Register
    pub const FBRD: u32 = 0x28;
    /// Line Control Register
    pub const LCR_H: u32 = 0x2C;
    /// Control Register
    pub const CR: u32 = 0x30;
    /// Interrupt Clear Register
    pub const ICR: u32 = 0x44;
}

/// Transmit FIFO full
const FR_TXFF: u32 = 1 << 5;
/// 8 data bits, FIFOs enabled
const LCR_H_8N1_FIFO: u32 = (0b11 << 5) | (1 << 4);
/// UART, transmit and receive enable
const CR_ENABLE: u32 = (1 << 0) | (1 << 8) | (1 << 9);

/// 115200 baud from the 3 MHz UART clock: 3e6 / (16 * 115200) = 1.627.
const IBRD_115200: u32 = 1;
const FBRD_115200: u32 = 40;

#[inline]
fn read_reg(offset: u32) -> u32 {
    // SAFETY: PL011 registers are valid MMIO in the identity-mapped device window.
    unsafe { core::ptr::read_volatile((UART0_BASE + offset) as *const u32) }
}

#[inline]
fn write_reg(offset: u32, value: u32) {
    // SAFETY: as in `read_reg`.
    unsafe { core::ptr::write_volatile((UART0_BASE + offset) as *mut u32, value) }
}

pub struct SerialPort {
    initialized: bool,
}

impl SerialPort {
    pub const fn new() -> Self {
        Self { initialized: false }
    }

    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        write_reg(reg::CR, 0);
        write_reg(reg::ICR, 0x7FF);
        write_reg(reg::IBRD, IBRD_115200);
        write_reg(reg::FBRD, FBRD_115200);
        write_reg(reg::LCR_H, LCR_H_8N1_FIFO);
        write_reg(reg::CR, CR_ENABLE);
        self.initialized = true;
    }

    /// Send a single byte
    pub fn send(&mut self, byte: u8) {
        while read_reg(reg::FR) & FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        write_reg(reg::DR, byte as u32);
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.send(b'\r');
            }
            self.send(byte);
        }
        Ok(())
    }
}

pub static SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort::new());

pub fn init() {
    SERIAL1.lock().init();
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    // IRQs stay masked while SERIAL1 is held: the timer path logs, and an
    // IRQ taken by a holder would spin on the lock forever.
    let result = cpu::without_interrupts(|| SERIAL1.lock().write_fmt(args));
    // The UART cannot fail; only a broken `Display` impl can.
    debug_assert!(result.is_ok(), "formatting serial output failed");
}

/// Log sink: `logger::serial_ready(serial::sink)`.
pub fn sink(args: fmt::Arguments) {
    _print(args);
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
