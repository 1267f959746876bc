//! Memory management.
//!
//! Physical frames are tracked by [`frame_allocator`], translation tables are
//! built and walked by [`page_table`], and per-process dynamic memory lives in
//! [`process_heap`]. All addresses are 32-bit; the kernel runs identity-mapped.

pub mod descriptor;
pub mod frame_allocator;
#[cfg(target_arch = "arm")]
pub mod heap;
pub mod layout;
pub mod page_table;
pub mod process_heap;

use core::fmt;

pub const PAGE_SIZE: u32 = 4096;
pub const PAGE_SHIFT: u32 = 12;

/// Bytes covered by one first-level descriptor.
pub const SECTION_SIZE: u32 = 1 << SECTION_SHIFT;
pub const SECTION_SHIFT: u32 = 20;
pub const PAGES_PER_SECTION: u32 = SECTION_SIZE / PAGE_SIZE;

/// Number of pages needed to hold `bytes`.
#[inline]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}

/// A physical address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(u32);

impl PhysAddr {
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_aligned(self, align: u32) -> bool {
        self.0 % align == 0
    }

    #[inline]
    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#010x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A logical (virtual) address as seen by the running process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u32);

impl VirtAddr {
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Offset of this address inside its page.
    #[inline]
    pub const fn page_offset(self) -> u32 {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Index of the first-level descriptor covering this address.
    #[inline]
    pub const fn section_index(self) -> usize {
        (self.0 >> SECTION_SHIFT) as usize
    }

    /// Index of the second-level descriptor inside its section's table.
    #[inline]
    pub const fn table_index(self) -> usize {
        ((self.0 >> PAGE_SHIFT) & (PAGES_PER_SECTION - 1)) as usize
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A 4 KiB physical frame, identified by its frame number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame(u32);

impl Frame {
    #[inline]
    pub const fn from_number(number: u32) -> Self {
        Self(number)
    }

    #[inline]
    pub const fn containing(addr: PhysAddr) -> Self {
        Self(addr.as_u32() >> PAGE_SHIFT)
    }

    #[inline]
    pub const fn number(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn start_address(self) -> PhysAddr {
        PhysAddr::new(self.0 << PAGE_SHIFT)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:#010x})", self.start_address().as_u32())
    }
}

/// A 4 KiB logical page, identified by its page number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Page(u32);

impl Page {
    #[inline]
    pub const fn from_number(number: u32) -> Self {
        Self(number)
    }

    #[inline]
    pub const fn containing(addr: VirtAddr) -> Self {
        Self(addr.as_u32() >> PAGE_SHIFT)
    }

    #[inline]
    pub const fn number(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn start_address(self) -> VirtAddr {
        VirtAddr::new(self.0 << PAGE_SHIFT)
    }

    #[inline]
    pub const fn section_index(self) -> usize {
        (self.0 / PAGES_PER_SECTION) as usize
    }

    /// The page `count` pages above this one.
    #[inline]
    pub const fn add(self, count: u32) -> Self {
        Self(self.0 + count)
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({:#010x})", self.start_address().as_u32())
    }
}

/// A physically contiguous range, e.g. the framebuffer handed over by the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub start: PhysAddr,
    pub size: u32,
}

impl Region {
    pub const fn new(start: PhysAddr, size: u32) -> Self {
        Self { start, size }
    }

    pub const fn end(&self) -> PhysAddr {
        PhysAddr::new(self.start.as_u32() + self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_indices() {
        let va = VirtAddr::new(0x1234_5678);
        assert_eq!(va.section_index(), 0x123);
        assert_eq!(va.table_index(), 0x45);
        assert_eq!(va.page_offset(), 0x678);

        let page = Page::containing(va);
        assert_eq!(page.start_address(), VirtAddr::new(0x1234_5000));
        assert_eq!(page.section_index(), 0x123);
    }

    #[test]
    fn test_pages_for_rounds_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(10 * 1024), 3);
    }

    #[test]
    fn test_frame_round_trip() {
        let frame = Frame::containing(PhysAddr::new(0x0030_1abc));
        assert_eq!(frame.number(), 0x301);
        assert_eq!(frame.start_address(), PhysAddr::new(0x0030_1000));
    }
}
