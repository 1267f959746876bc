//! Rust side of the trap entry.

use spin::Mutex;

use super::{cpu, Armv6Platform};
use crate::trap::{Kernel, TrapFrame, TrapKind};

/// The kernel, installed by [`super::boot::init`].
pub static KERNEL: Mutex<Option<Kernel<Armv6Platform>>> = Mutex::new(None);

/// Called by `trap_entry.S` with the frame it built on the trap stack.
#[no_mangle]
pub extern "C" fn rust_trap_handler(kind: u32, frame: &mut TrapFrame) {
    let Some(kind) = TrapKind::from_u32(kind) else {
        log::error!("Unknown trap kind {}", kind);
        cpu::halt();
    };
    // Traps never nest, so the lock is only ever held here or during boot.
    let Some(mut guard) = KERNEL.try_lock() else {
        log::error!("{:?} trap while the kernel is locked", kind);
        cpu::halt();
    };
    let Some(kernel) = guard.as_mut() else {
        log::error!("{:?} trap before the kernel was initialized", kind);
        cpu::halt();
    };
    if let Err(err) = kernel.handle_trap(kind, frame) {
        log::error!("Kernel halted: {}", err);
        cpu::halt();
    }
}
