//! Physical frame allocator.
//!
//! Every frame of RAM has a reference counter. A frame is free exactly when
//! its counter is zero. Frames under the kernel image (and anything else the
//! kernel owns for good, such as the framebuffer) are pinned and never handed
//! out. The extra references let the page table manager map a frame into the
//! scratch window while a process still owns it.
//!
//! Allocation is next-fit: the search resumes just after the previously
//! allocated frame and wraps around once.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use super::{Frame, PhysAddr, PAGE_SIZE};

/// Counter value of frames that are never allocated or released.
const PINNED: u8 = u8::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Every frame is in use.
    Exhausted,
    /// The frame lies outside physical RAM.
    OutOfRange(Frame),
    /// The frame was released but holds no reference.
    NotReserved(Frame),
    /// The frame belongs to the kernel.
    Pinned(Frame),
    /// Too many references to one frame.
    Saturated(Frame),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "out of physical frames"),
            Self::OutOfRange(frame) => write!(f, "{:?} is outside RAM", frame),
            Self::NotReserved(frame) => write!(f, "{:?} is not reserved", frame),
            Self::Pinned(frame) => write!(f, "{:?} is pinned", frame),
            Self::Saturated(frame) => write!(f, "{:?} has too many references", frame),
        }
    }
}

pub struct FrameAllocator {
    counters: Vec<u8>,
    /// Frame number where the next search starts.
    next: usize,
    free: usize,
}

impl FrameAllocator {
    /// Track `frame_count` frames starting at physical address 0, all free.
    pub fn new(frame_count: usize) -> Self {
        Self {
            counters: vec![0; frame_count],
            next: 0,
            free: frame_count,
        }
    }

    /// Pin every frame overlapping `start..end` (clipped to RAM).
    pub fn pin_range(&mut self, start: PhysAddr, end: PhysAddr) {
        let first = (start.as_u32() / PAGE_SIZE) as usize;
        let last = (end.as_u32().div_ceil(PAGE_SIZE) as usize).min(self.counters.len());
        for counter in self.counters.iter_mut().take(last).skip(first) {
            if *counter == 0 {
                self.free -= 1;
            }
            *counter = PINNED;
        }
    }

    /// Reserve the next free frame.
    pub fn reserve_frame(&mut self) -> Result<Frame, FrameError> {
        let count = self.counters.len();
        if count == 0 {
            return Err(FrameError::Exhausted);
        }
        let start = self.next % count;
        for step in 0..count {
            let index = (start + step) % count;
            if self.counters[index] == 0 {
                self.counters[index] = 1;
                self.free -= 1;
                self.next = index + 1;
                log::trace!("Frame allocator: reserved frame #{}", index);
                return Ok(Frame::from_number(index as u32));
            }
        }
        log::error!("Frame allocator: no free frame among {}", count);
        Err(FrameError::Exhausted)
    }

    /// Take an additional reference to a reserved frame.
    ///
    /// Pinned frames accept any number of references.
    pub fn retain(&mut self, frame: Frame) -> Result<(), FrameError> {
        let counter = self.counter_mut(frame)?;
        match *counter {
            PINNED => Ok(()),
            0 => Err(FrameError::NotReserved(frame)),
            n if n == PINNED - 1 => Err(FrameError::Saturated(frame)),
            _ => {
                *counter += 1;
                Ok(())
            }
        }
    }

    /// Drop one reference; the frame becomes free when none are left.
    pub fn release_frame(&mut self, frame: Frame) -> Result<(), FrameError> {
        let counter = self.counter_mut(frame)?;
        match *counter {
            PINNED => Err(FrameError::Pinned(frame)),
            0 => Err(FrameError::NotReserved(frame)),
            _ => {
                *counter -= 1;
                if *counter == 0 {
                    self.free += 1;
                }
                Ok(())
            }
        }
    }

    /// Number of references held on `frame` (`u8::MAX` when pinned).
    pub fn references(&self, frame: Frame) -> u8 {
        self.counters
            .get(frame.number() as usize)
            .copied()
            .unwrap_or(PINNED)
    }

    pub fn is_free(&self, frame: Frame) -> bool {
        self.references(frame) == 0
    }

    pub fn free_frames(&self) -> usize {
        self.free
    }

    pub fn frame_count(&self) -> usize {
        self.counters.len()
    }

    fn counter_mut(&mut self, frame: Frame) -> Result<&mut u8, FrameError> {
        self.counters
            .get_mut(frame.number() as usize)
            .ok_or(FrameError::OutOfRange(frame))
    }
}
