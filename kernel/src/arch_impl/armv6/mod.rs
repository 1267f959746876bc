//! ARMv6 (ARM1176JZF-S, BCM2835) architecture implementation.
//!
//! Boot code, exception vectors and the trap entry live in `trap_entry.S`;
//! everything after the register save happens in [`entry`].

pub mod boot;
pub mod cpu;
pub mod entry;
pub mod mmu;
pub mod timer;

use alloc::alloc::{alloc_zeroed, dealloc};
use core::alloc::Layout;

use crate::arch_impl::traits::{CpuOps, MmuOps, PhysicalMemory, Platform, TimerOps};
use crate::memory::{PhysAddr, Region, VirtAddr, PAGE_SIZE};

core::arch::global_asm!(include_str!("trap_entry.S"), options(raw));

extern "C" {
    static __user_exit_trampoline: u8;
}

/// The board.
///
/// Translation tables come from the kernel heap, which lies in the
/// identity-mapped kernel region, so their addresses are physical.
pub struct Armv6Platform {
    /// Wall clock minus uptime, in milliseconds.
    clock_offset_ms: u64,
    framebuffer: Option<Region>,
}

impl Armv6Platform {
    /// # Safety
    ///
    /// Only one platform may exist; it owns the timer and the MMU.
    pub unsafe fn new(framebuffer: Option<Region>) -> Self {
        timer::init();
        Self {
            clock_offset_ms: 0,
            framebuffer,
        }
    }
}

impl CpuOps for Armv6Platform {
    fn disable_interrupts(&mut self) {
        cpu::disable_interrupts();
    }

    fn enable_interrupts(&mut self) {
        cpu::enable_interrupts();
    }

    fn interrupts_enabled(&self) -> bool {
        cpu::interrupts_enabled()
    }

    fn reboot(&mut self) {
        cpu::reboot()
    }
}

impl TimerOps for Armv6Platform {
    fn arm_timer(&mut self, ticks: u32) {
        timer::arm(ticks);
    }

    fn wall_clock_ms(&self) -> u64 {
        timer::uptime_ms().wrapping_add(self.clock_offset_ms)
    }

    fn set_wall_clock_ms(&mut self, ms: u64) {
        self.clock_offset_ms = ms.wrapping_sub(timer::uptime_ms());
    }
}

impl MmuOps for Armv6Platform {
    fn active_translation_table(&self) -> PhysAddr {
        mmu::ttbr0()
    }

    unsafe fn set_translation_table(&mut self, root: PhysAddr) {
        mmu::set_ttbr0(root);
    }

    fn invalidate_tlb_entry(&mut self, addr: VirtAddr) {
        mmu::invalidate_tlb_entry(addr);
    }

    fn invalidate_tlb(&mut self) {
        mmu::invalidate_tlb();
    }

    fn fault_address(&self) -> VirtAddr {
        mmu::fault_address()
    }
}

impl PhysicalMemory for Armv6Platform {
    unsafe fn read_word(&self, addr: PhysAddr) -> u32 {
        core::ptr::read_volatile(addr.as_u32() as *const u32)
    }

    unsafe fn write_word(&mut self, addr: PhysAddr, value: u32) {
        core::ptr::write_volatile(addr.as_u32() as *mut u32, value);
    }

    fn alloc_table(&mut self, layout: Layout) -> Option<PhysAddr> {
        // SAFETY: table layouts are never zero-sized.
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        Some(PhysAddr::new(ptr as u32))
    }

    unsafe fn free_table(&mut self, addr: PhysAddr, layout: Layout) {
        dealloc(addr.as_u32() as *mut u8, layout);
    }

    unsafe fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) {
        core::ptr::copy_nonoverlapping(
            src.as_u32() as *const u8,
            dst.as_u32() as *mut u8,
            PAGE_SIZE as usize,
        );
    }
}

impl Platform for Armv6Platform {
    fn framebuffer(&self) -> Option<Region> {
        self.framebuffer
    }

    fn exit_trampoline(&self) -> VirtAddr {
        // SAFETY: only the symbol's address is taken.
        VirtAddr::new(unsafe { core::ptr::addr_of!(__user_exit_trampoline) } as u32)
    }
}
