//! ARM1176 MMU control through CP15.
//!
//! Only TTBR0 is used (TTBCR.N = 0), every descriptor sits in domain 0, and
//! domain 0 is a manager domain, so access permission bits are not checked.
//! Subpage access permissions are disabled (ARMv6 descriptor format).

use crate::memory::{PhysAddr, VirtAddr};

/// SCTLR bits
const SCTLR_MMU_ENABLE: u32 = 1 << 0;
const SCTLR_WRITE_BUFFER: u32 = 1 << 3;
const SCTLR_L4: u32 = 1 << 15;
/// Extended page tables: ARMv6 format, subpages disabled.
const SCTLR_XP: u32 = 1 << 23;

/// Domain 0 as manager.
const DACR_DOMAIN0_MANAGER: u32 = 0b11;

/// Point TTBR0 at the first-level table `root`.
///
/// # Safety
///
/// `root` must be a 16 KiB aligned first-level table mapping the running code.
#[inline]
pub unsafe fn set_ttbr0(root: PhysAddr) {
    core::arch::asm!("mcr p15, 0, {}, c2, c0, 0", in(reg) root.as_u32(), options(nostack));
}

#[inline]
pub fn ttbr0() -> PhysAddr {
    let value: u32;
    // SAFETY: reading TTBR0 has no side effects.
    unsafe { core::arch::asm!("mrc p15, 0, {}, c2, c0, 0", out(reg) value, options(nomem, nostack)) };
    PhysAddr::new(value & 0xFFFF_C000)
}

/// Invalidate the unified TLB entry for one address.
#[inline]
pub fn invalidate_tlb_entry(addr: VirtAddr) {
    // SAFETY: TLB maintenance only.
    unsafe { core::arch::asm!("mcr p15, 0, {}, c8, c7, 1", in(reg) addr.as_u32() & !0xFFF, options(nostack)) };
}

/// Invalidate the whole unified TLB.
#[inline]
pub fn invalidate_tlb() {
    // SAFETY: TLB maintenance only.
    unsafe { core::arch::asm!("mcr p15, 0, {}, c8, c7, 0", in(reg) 0u32, options(nostack)) };
}

/// Data Fault Address Register
#[inline]
pub fn fault_address() -> VirtAddr {
    let value: u32;
    // SAFETY: reading the DFAR has no side effects.
    unsafe { core::arch::asm!("mrc p15, 0, {}, c6, c0, 0", out(reg) value, options(nomem, nostack)) };
    VirtAddr::new(value)
}

/// Install `root` and turn the MMU on.
///
/// # Safety
///
/// `root` must identity-map all kernel code, data and stacks.
pub unsafe fn enable(root: PhysAddr) {
    // Caches off, then invalidate caches and TLB.
    core::arch::asm!("mcr p15, 0, {}, c1, c0, 0", in(reg) 0u32, options(nostack));
    core::arch::asm!("mcr p15, 0, {}, c7, c7, 0", in(reg) 0u32, options(nostack));
    invalidate_tlb();

    set_ttbr0(root);
    // TTBCR: TTBR0 translates everything.
    core::arch::asm!("mcr p15, 0, {}, c2, c0, 2", in(reg) 0u32, options(nostack));
    core::arch::asm!("mcr p15, 0, {}, c3, c0, 0", in(reg) DACR_DOMAIN0_MANAGER, options(nostack));

    let control = SCTLR_XP | SCTLR_L4 | SCTLR_WRITE_BUFFER | SCTLR_MMU_ENABLE;
    invalidate_tlb();
    core::arch::asm!("mcr p15, 0, {}, c1, c0, 0", in(reg) control, options(nostack));
    log::info!("MMU enabled (table at {})", root);
}
