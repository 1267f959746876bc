//! ARMv6 short-descriptor translation table entries.
//!
//! Only the formats this kernel produces are modelled: coarse page table
//! pointers at the first level and small (4 KiB) pages at the second level,
//! with subpages disabled (XP = 1). Anything else decodes as `Unsupported`
//! and is never written.

use core::fmt;
use core::ops::BitOr;

use super::{Frame, PhysAddr};

pub const FIRST_LEVEL_ENTRIES: usize = 4096;
pub const SECOND_LEVEL_ENTRIES: usize = 256;

/// Size and alignment of a first-level table.
pub const FIRST_LEVEL_TABLE_SIZE: usize = FIRST_LEVEL_ENTRIES * 4;
/// Size and alignment of a second-level table.
pub const SECOND_LEVEL_TABLE_SIZE: usize = SECOND_LEVEL_ENTRIES * 4;

const TYPE_MASK: u32 = 0b11;

const COARSE_TABLE: u32 = 0b01;
const DOMAIN_SHIFT: u32 = 5;
const DOMAIN_MASK: u32 = 0xF;
const TABLE_BASE_MASK: u32 = 0xFFFF_FC00;

const SMALL_PAGE: u32 = 0b10;
const FRAME_BASE_MASK: u32 = 0xFFFF_F000;
/// Attribute bits of a small-page descriptor (everything below the base except bit 1).
const PAGE_FLAGS_MASK: u32 = 0x0000_0FFD;

/// Attribute bits of a small-page descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageFlags(u32);

impl PageFlags {
    pub const EXECUTE_NEVER: Self = Self(1 << 0);
    pub const BUFFERABLE: Self = Self(1 << 2);
    pub const CACHEABLE: Self = Self(1 << 3);
    pub const AP0: Self = Self(1 << 4);
    pub const AP1: Self = Self(1 << 5);
    pub const TEX0: Self = Self(1 << 6);
    pub const TEX1: Self = Self(1 << 7);
    pub const TEX2: Self = Self(1 << 8);
    pub const APX: Self = Self(1 << 9);
    pub const SHARED: Self = Self(1 << 10);
    pub const NOT_GLOBAL: Self = Self(1 << 11);

    /// Kernel RAM: privileged read/write, normal memory (TEX = 001).
    pub const KERNEL: Self = Self::AP0.union(Self::TEX0);
    /// Peripherals: shared device memory, never executed.
    pub const DEVICE: Self = Self::EXECUTE_NEVER.union(Self::BUFFERABLE).union(Self::AP0);
    /// Framebuffer: normal memory user processes may draw into.
    pub const FRAMEBUFFER: Self = Self::KERNEL.union(Self::AP1);
    /// Process memory: full access, normal memory, tagged with the current ASID.
    pub const USER: Self = Self::AP0
        .union(Self::AP1)
        .union(Self::TEX0)
        .union(Self::NOT_GLOBAL);

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & PAGE_FLAGS_MASK)
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageFlags({:#05x})", self.0)
    }
}

/// A first-level descriptor: one per 1 MiB section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirstLevelDescriptor {
    Fault,
    /// Points to a 256-entry second-level table.
    CoarseTable { base: PhysAddr, domain: u8 },
    Unsupported(u32),
}

impl FirstLevelDescriptor {
    /// A coarse table pointer in domain 0.
    pub const fn coarse(base: PhysAddr) -> Self {
        Self::CoarseTable { base, domain: 0 }
    }

    pub const fn encode(self) -> u32 {
        match self {
            Self::Fault => 0,
            Self::CoarseTable { base, domain } => {
                (base.as_u32() & TABLE_BASE_MASK)
                    | ((domain as u32 & DOMAIN_MASK) << DOMAIN_SHIFT)
                    | COARSE_TABLE
            }
            Self::Unsupported(raw) => raw,
        }
    }

    pub const fn decode(raw: u32) -> Self {
        match raw & TYPE_MASK {
            0b00 => Self::Fault,
            COARSE_TABLE => Self::CoarseTable {
                base: PhysAddr::new(raw & TABLE_BASE_MASK),
                domain: ((raw >> DOMAIN_SHIFT) & DOMAIN_MASK) as u8,
            },
            _ => Self::Unsupported(raw),
        }
    }
}

/// A second-level descriptor: one per 4 KiB page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecondLevelDescriptor {
    Fault,
    SmallPage { frame: Frame, flags: PageFlags },
    Unsupported(u32),
}

impl SecondLevelDescriptor {
    pub const fn small_page(frame: Frame, flags: PageFlags) -> Self {
        Self::SmallPage { frame, flags }
    }

    pub const fn encode(self) -> u32 {
        match self {
            Self::Fault => 0,
            Self::SmallPage { frame, flags } => {
                (frame.start_address().as_u32() & FRAME_BASE_MASK)
                    | (flags.bits() & PAGE_FLAGS_MASK)
                    | SMALL_PAGE
            }
            Self::Unsupported(raw) => raw,
        }
    }

    pub const fn decode(raw: u32) -> Self {
        match raw & TYPE_MASK {
            0b00 => Self::Fault,
            // Large pages (0b01) are never produced.
            0b01 => Self::Unsupported(raw),
            _ => Self::SmallPage {
                frame: Frame::containing(PhysAddr::new(raw & FRAME_BASE_MASK)),
                flags: PageFlags::from_bits_truncate(raw),
            },
        }
    }

    pub const fn frame(self) -> Option<Frame> {
        match self {
            Self::SmallPage { frame, .. } => Some(frame),
            _ => None,
        }
    }
}
