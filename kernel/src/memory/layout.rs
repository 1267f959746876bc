//! Physical and logical memory layout.
//!
//! The kernel is identity-mapped from address 0 up to `kernel_end`. Everything
//! between `kernel_end` and `ram_end` is handed out frame by frame to user
//! processes. The peripheral window is identity-mapped as device memory in
//! every translation table, and user mappings are placed inside
//! `user_start..user_end`.

use core::ops::Range;

use super::{Page, PhysAddr, VirtAddr, PAGE_SIZE, SECTION_SIZE};

// Raspberry Pi (BCM2835) constants
pub const RPI_KERNEL_END: u32 = 0x0100_0000; // 16 MiB
pub const RPI_RAM_END: u32 = 0x2000_0000; // 512 MiB
pub const RPI_DEVICE_START: u32 = 0x2000_0000;
pub const RPI_DEVICE_END: u32 = 0x2100_0000;

/// Number of kernel pages kept unmapped for temporary mappings.
pub const SCRATCH_PAGES: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryLayout {
    /// End of the identity-mapped kernel region (exclusive).
    pub kernel_end: PhysAddr,
    /// End of physical RAM (exclusive).
    pub ram_end: PhysAddr,
    pub device_start: PhysAddr,
    pub device_end: PhysAddr,
    /// Lowest logical address handed to user mappings.
    pub user_start: VirtAddr,
    /// Logical address just above the highest user mapping.
    pub user_end: VirtAddr,
}

impl MemoryLayout {
    pub const RASPBERRY_PI: Self = Self {
        kernel_end: PhysAddr::new(RPI_KERNEL_END),
        ram_end: PhysAddr::new(RPI_RAM_END),
        device_start: PhysAddr::new(RPI_DEVICE_START),
        device_end: PhysAddr::new(RPI_DEVICE_END),
        user_start: VirtAddr::new(RPI_KERNEL_END),
        user_end: VirtAddr::new(RPI_DEVICE_START),
    };

    /// Check the alignment and ordering rules the page table manager relies on.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.kernel_end.is_aligned(SECTION_SIZE) {
            return Err("kernel region must end on a section boundary");
        }
        if !self.ram_end.is_aligned(PAGE_SIZE) {
            return Err("end of RAM must be page aligned");
        }
        if self.kernel_end >= self.ram_end {
            return Err("kernel region leaves no frames for processes");
        }
        if !self.device_start.is_aligned(SECTION_SIZE) || !self.device_end.is_aligned(SECTION_SIZE) {
            return Err("device window must be section aligned");
        }
        if self.device_start >= self.device_end {
            return Err("device window is empty");
        }
        if self.user_start.as_u32() % PAGE_SIZE != 0 || self.user_end.as_u32() % PAGE_SIZE != 0 {
            return Err("user range must be page aligned");
        }
        if self.user_start.as_u32() < self.kernel_end.as_u32() {
            return Err("user range overlaps the kernel region");
        }
        if self.user_start >= self.user_end {
            return Err("user range is empty");
        }
        Ok(())
    }

    /// Number of frames tracked by the frame allocator.
    pub fn frame_count(&self) -> usize {
        (self.ram_end.as_u32() / PAGE_SIZE) as usize
    }

    /// The two kernel pages reserved for temporary mappings, destination first.
    ///
    /// They sit at the top of the kernel region and are never identity-mapped.
    pub fn scratch_pages(&self) -> (Page, Page) {
        let top = self.kernel_end.as_u32() / PAGE_SIZE;
        (Page::from_number(top - 2), Page::from_number(top - 1))
    }

    /// Page numbers available to user mappings.
    pub fn user_pages(&self) -> Range<u32> {
        self.user_start.as_u32() / PAGE_SIZE..self.user_end.as_u32() / PAGE_SIZE
    }

    pub fn kernel_sections(&self) -> Range<usize> {
        0..(self.kernel_end.as_u32() / SECTION_SIZE) as usize
    }

    pub fn device_sections(&self) -> Range<usize> {
        (self.device_start.as_u32() / SECTION_SIZE) as usize
            ..(self.device_end.as_u32() / SECTION_SIZE) as usize
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::RASPBERRY_PI
    }
}

/// Log the memory layout during initialization.
pub fn log_layout(layout: &MemoryLayout) {
    log::info!("LAYOUT: kernel {:#010x}..{}", 0, layout.kernel_end);
    log::info!("LAYOUT: frames {}..{}", layout.kernel_end, layout.ram_end);
    log::info!("LAYOUT: devices {}..{}", layout.device_start, layout.device_end);
    log::info!("LAYOUT: user {}..{}", layout.user_start, layout.user_end);
}
