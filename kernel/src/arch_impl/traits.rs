//! Hardware abstraction traits.
//!
//! These traits define the interface between the ARMv6 support code and the
//! rest of the kernel. The scheduler, the trap dispatcher and the page table
//! manager only ever talk to hardware through a [`Platform`], which is what
//! lets the same code run against the simulated board in unit tests.

use core::alloc::Layout;

use crate::memory::{PhysAddr, Region, VirtAddr};

/// Basic CPU control operations.
pub trait CpuOps {
    /// Mask IRQs on the current core.
    fn disable_interrupts(&mut self);

    /// Unmask IRQs on the current core.
    fn enable_interrupts(&mut self);

    fn interrupts_enabled(&self) -> bool;

    /// Reset the machine.
    ///
    /// On hardware this does not return; simulated platforms record the request.
    fn reboot(&mut self);

    /// Run `f` with IRQs masked, then restore the previous mask.
    fn without_interrupts<F, R>(&mut self, f: F) -> R
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> R,
    {
        let were_enabled = self.interrupts_enabled();
        self.disable_interrupts();
        let result = f(self);
        if were_enabled {
            self.enable_interrupts();
        }
        result
    }
}

/// Preemption timer and wall clock.
pub trait TimerOps {
    /// Fire the preemption interrupt after `ticks` timer ticks.
    fn arm_timer(&mut self, ticks: u32);

    /// Current wall-clock time in milliseconds.
    fn wall_clock_ms(&self) -> u64;

    fn set_wall_clock_ms(&mut self, ms: u64);
}

/// Translation table base and TLB operations.
pub trait MmuOps {
    /// Physical address of the first-level table in use.
    fn active_translation_table(&self) -> PhysAddr;

    /// Switch the MMU to another first-level table.
    ///
    /// # Safety
    ///
    /// `root` must point to a complete first-level table that maps the kernel.
    unsafe fn set_translation_table(&mut self, root: PhysAddr);

    /// Flush the TLB entry for one logical page.
    fn invalidate_tlb_entry(&mut self, addr: VirtAddr);

    /// Flush the entire TLB.
    fn invalidate_tlb(&mut self);

    /// Address that caused the last data abort.
    fn fault_address(&self) -> VirtAddr;
}

/// Access to the memory translation tables live in.
///
/// Tables are kernel objects. They are carved out of kernel memory and are
/// addressed physically; the kernel region is identity-mapped so physical and
/// logical addresses coincide there.
pub trait PhysicalMemory {
    /// # Safety
    ///
    /// `addr` must be a word-aligned address inside kernel memory.
    unsafe fn read_word(&self, addr: PhysAddr) -> u32;

    /// # Safety
    ///
    /// `addr` must be a word-aligned address inside a translation table.
    unsafe fn write_word(&mut self, addr: PhysAddr, value: u32);

    /// Allocate zero-initialised storage for a translation table.
    ///
    /// Returns `None` when kernel memory is exhausted.
    fn alloc_table(&mut self, layout: Layout) -> Option<PhysAddr>;

    /// # Safety
    ///
    /// `addr` must come from [`alloc_table`](Self::alloc_table) with the same
    /// layout and must no longer be referenced by any descriptor.
    unsafe fn free_table(&mut self, addr: PhysAddr, layout: Layout);

    /// Copy one page through the active translation table.
    ///
    /// # Safety
    ///
    /// Both pages must be mapped, page aligned and distinct.
    unsafe fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr);
}

/// Everything the kernel core needs from a board.
pub trait Platform: CpuOps + TimerOps + MmuOps + PhysicalMemory {
    /// Framebuffer the GPU handed over, if any.
    fn framebuffer(&self) -> Option<Region>;

    /// Code address processes return to when their entry function returns.
    ///
    /// The routine issues the exit call with the returned value.
    fn exit_trampoline(&self) -> VirtAddr;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch_impl::sim::{test_layout, SimPlatform};

    #[test]
    fn test_without_interrupts_restores_previous_mask() {
        let mut sim = SimPlatform::new(&test_layout());
        assert!(sim.interrupts_enabled());

        let masked = sim.without_interrupts(|sim| sim.interrupts_enabled());
        assert!(!masked);
        assert!(sim.interrupts_enabled());

        // Already masked: the section must not unmask on the way out.
        sim.disable_interrupts();
        let nested = sim.without_interrupts(|sim| sim.without_interrupts(|sim| sim.interrupts_enabled()));
        assert!(!nested);
        assert!(!sim.interrupts_enabled());
    }
}
