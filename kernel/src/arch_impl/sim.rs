//! Simulated board for unit tests.
//!
//! RAM is a host allocation aligned like the real thing, so physical
//! addresses are plain offsets into it. Translation tables come from a
//! `linked_list_allocator` heap carved out of the simulated kernel region,
//! just as the kernel heap provides them on hardware. The MMU is a software
//! walker over those tables; timer, clock and interrupt state are recorded
//! for assertions.

use core::alloc::Layout;
use core::ptr::NonNull;

use linked_list_allocator::Heap;

use super::traits::{CpuOps, MmuOps, PhysicalMemory, Platform, TimerOps};
use crate::memory::layout::MemoryLayout;
use crate::memory::page_table::walk;
use crate::memory::{PhysAddr, Region, VirtAddr, PAGE_SIZE};
use crate::platform_config::KernelConfig;

/// Start of the table pool inside the simulated kernel region.
pub const TABLE_POOL_START: u32 = 0x0004_0000;

/// Where the simulated exit routine lives.
pub const SIM_EXIT_TRAMPOLINE: u32 = 0x0000_8100;

const RAM_ALIGN: usize = 1 << 20;

/// 8 MiB of RAM, a 2 MiB kernel region and a 1 MiB device window.
pub fn test_layout() -> MemoryLayout {
    MemoryLayout {
        kernel_end: PhysAddr::new(0x0020_0000),
        ram_end: PhysAddr::new(0x0080_0000),
        device_start: PhysAddr::new(0x2000_0000),
        device_end: PhysAddr::new(0x2010_0000),
        user_start: VirtAddr::new(0x0020_0000),
        user_end: VirtAddr::new(0x2000_0000),
    }
}

pub fn test_config() -> KernelConfig {
    KernelConfig {
        layout: test_layout(),
        ..KernelConfig::raspberry_pi()
    }
}

pub struct SimPlatform {
    ram: NonNull<u8>,
    ram_layout: Layout,
    tables: Heap,
    live_tables: usize,
    active_root: PhysAddr,
    armed: Vec<u32>,
    clock_ms: u64,
    interrupts_enabled: bool,
    interrupt_disables: usize,
    table_switches: usize,
    tlb_flushes: usize,
    tlb_entry_flushes: usize,
    reboots: usize,
    fault_address: VirtAddr,
    framebuffer: Option<Region>,
}

impl SimPlatform {
    pub fn new(layout: &MemoryLayout) -> Self {
        let ram_layout = Layout::from_size_align(layout.ram_end.as_u32() as usize, RAM_ALIGN)
            .expect("simulated RAM layout");
        // SAFETY: the layout has a non-zero size.
        let ram = NonNull::new(unsafe { std::alloc::alloc_zeroed(ram_layout) })
            .expect("simulated RAM allocation");

        let (scratch, _) = layout.scratch_pages();
        let pool_end = scratch.start_address().as_u32();
        let mut tables = Heap::empty();
        // SAFETY: the pool lies inside the RAM allocation, which outlives the heap.
        unsafe {
            tables.init(
                ram.as_ptr().add(TABLE_POOL_START as usize),
                (pool_end - TABLE_POOL_START) as usize,
            );
        }

        Self {
            ram,
            ram_layout,
            tables,
            live_tables: 0,
            active_root: PhysAddr::new(0),
            armed: Vec::new(),
            clock_ms: 0,
            interrupts_enabled: true,
            interrupt_disables: 0,
            table_switches: 0,
            tlb_flushes: 0,
            tlb_entry_flushes: 0,
            reboots: 0,
            fault_address: VirtAddr::new(0),
            framebuffer: None,
        }
    }

    pub fn with_framebuffer(mut self, region: Region) -> Self {
        self.framebuffer = Some(region);
        self
    }

    fn ram(&self) -> &[u8] {
        // SAFETY: `ram` points at `ram_layout.size()` initialised bytes owned by `self`.
        unsafe { core::slice::from_raw_parts(self.ram.as_ptr(), self.ram_layout.size()) }
    }

    fn ram_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `ram`, and `&mut self` guarantees exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.ram.as_ptr(), self.ram_layout.size()) }
    }

    pub fn write_bytes(&mut self, addr: PhysAddr, bytes: &[u8]) {
        let start = addr.as_u32() as usize;
        self.ram_mut()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn read_bytes(&self, addr: PhysAddr, len: usize) -> Vec<u8> {
        let start = addr.as_u32() as usize;
        self.ram()[start..start + len].to_vec()
    }

    /// Write through the translation table rooted at `root`.
    pub fn write_virt(&mut self, root: PhysAddr, addr: VirtAddr, bytes: &[u8]) {
        let phys = walk(self, root, addr).expect("address is mapped");
        self.write_bytes(phys, bytes);
    }

    pub fn read_virt(&self, root: PhysAddr, addr: VirtAddr, len: usize) -> Vec<u8> {
        let phys = walk(self, root, addr).expect("address is mapped");
        self.read_bytes(phys, len)
    }

    pub fn armed_ticks(&self) -> &[u32] {
        &self.armed
    }

    pub fn live_tables(&self) -> usize {
        self.live_tables
    }

    pub fn interrupt_disables(&self) -> usize {
        self.interrupt_disables
    }

    pub fn table_switches(&self) -> usize {
        self.table_switches
    }

    pub fn tlb_flushes(&self) -> usize {
        self.tlb_flushes
    }

    pub fn tlb_entry_flushes(&self) -> usize {
        self.tlb_entry_flushes
    }

    pub fn reboots(&self) -> usize {
        self.reboots
    }

    pub fn set_fault_address(&mut self, addr: VirtAddr) {
        self.fault_address = addr;
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> PhysAddr {
        PhysAddr::new((ptr.as_ptr() as usize - self.ram.as_ptr() as usize) as u32)
    }
}

impl Drop for SimPlatform {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { std::alloc::dealloc(self.ram.as_ptr(), self.ram_layout) };
    }
}

impl CpuOps for SimPlatform {
    fn disable_interrupts(&mut self) {
        self.interrupts_enabled = false;
        self.interrupt_disables += 1;
    }

    fn enable_interrupts(&mut self) {
        self.interrupts_enabled = true;
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    fn reboot(&mut self) {
        self.reboots += 1;
    }
}

impl TimerOps for SimPlatform {
    fn arm_timer(&mut self, ticks: u32) {
        self.armed.push(ticks);
    }

    fn wall_clock_ms(&self) -> u64 {
        self.clock_ms
    }

    fn set_wall_clock_ms(&mut self, ms: u64) {
        self.clock_ms = ms;
    }
}

impl MmuOps for SimPlatform {
    fn active_translation_table(&self) -> PhysAddr {
        self.active_root
    }

    unsafe fn set_translation_table(&mut self, root: PhysAddr) {
        self.active_root = root;
        self.table_switches += 1;
    }

    fn invalidate_tlb_entry(&mut self, _addr: VirtAddr) {
        self.tlb_entry_flushes += 1;
    }

    fn invalidate_tlb(&mut self) {
        self.tlb_flushes += 1;
    }

    fn fault_address(&self) -> VirtAddr {
        self.fault_address
    }
}

impl PhysicalMemory for SimPlatform {
    unsafe fn read_word(&self, addr: PhysAddr) -> u32 {
        let start = addr.as_u32() as usize;
        let bytes = &self.ram()[start..start + 4];
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    unsafe fn write_word(&mut self, addr: PhysAddr, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    fn alloc_table(&mut self, layout: Layout) -> Option<PhysAddr> {
        let ptr = self.tables.allocate_first_fit(layout).ok()?;
        let addr = self.offset_of(ptr);
        let start = addr.as_u32() as usize;
        self.ram_mut()[start..start + layout.size()].fill(0);
        self.live_tables += 1;
        Some(addr)
    }

    unsafe fn free_table(&mut self, addr: PhysAddr, layout: Layout) {
        let ptr = self.ram.as_ptr().add(addr.as_u32() as usize);
        self.tables.deallocate(NonNull::new_unchecked(ptr), layout);
        self.live_tables -= 1;
    }

    unsafe fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) {
        let dst = walk(self, self.active_root, dst).expect("destination is mapped");
        let src = walk(self, self.active_root, src).expect("source is mapped");
        let src = src.as_u32() as usize;
        let size = PAGE_SIZE as usize;
        self.ram_mut().copy_within(src..src + size, dst.as_u32() as usize);
    }
}

impl Platform for SimPlatform {
    fn framebuffer(&self) -> Option<Region> {
        self.framebuffer
    }

    fn exit_trampoline(&self) -> VirtAddr {
        VirtAddr::new(SIM_EXIT_TRAMPOLINE)
    }
}
