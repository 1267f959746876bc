//! Two-level translation table management.
//!
//! The manager owns the frame allocator and the kernel's first-level table.
//! The kernel table identity-maps the kernel region, the peripheral window
//! and the framebuffer. Those first-level entries are shared: every process
//! table gets a copy of them at creation, and nothing in a process table is
//! ever mapped or unmapped inside a shared section. Everything else in a
//! process table is private to that process.
//!
//! Tables are addressed physically through [`PhysicalMemory`]. The kernel
//! region is identity-mapped, so that is also where the kernel reads them.

use core::alloc::Layout;
use core::fmt;

use super::descriptor::{
    FirstLevelDescriptor, PageFlags, SecondLevelDescriptor, FIRST_LEVEL_ENTRIES,
    FIRST_LEVEL_TABLE_SIZE, SECOND_LEVEL_ENTRIES, SECOND_LEVEL_TABLE_SIZE,
};
use super::frame_allocator::{FrameAllocator, FrameError};
use super::layout::MemoryLayout;
use super::{Frame, Page, PhysAddr, Region, VirtAddr, PAGE_SIZE, PAGES_PER_SECTION};
use crate::arch_impl::{MmuOps, PhysicalMemory};

const FIRST_LEVEL_LAYOUT: Layout =
    match Layout::from_size_align(FIRST_LEVEL_TABLE_SIZE, FIRST_LEVEL_TABLE_SIZE) {
        Ok(layout) => layout,
        Err(_) => panic!("invalid first-level table layout"),
    };

const SECOND_LEVEL_LAYOUT: Layout =
    match Layout::from_size_align(SECOND_LEVEL_TABLE_SIZE, SECOND_LEVEL_TABLE_SIZE) {
        Ok(layout) => layout,
        Err(_) => panic!("invalid second-level table layout"),
    };

/// Address bits of a translation table base register value.
const ROOT_MASK: u32 = 0xFFFF_C000;

/// A first-level table owned by a process.
///
/// Not `Clone`: a table has exactly one owner, which must hand it back to
/// [`PageTableManager::destroy_table`].
#[derive(Debug, PartialEq, Eq)]
pub struct PageTable {
    root: PhysAddr,
}

impl PageTable {
    pub fn root(&self) -> PhysAddr {
        self.root
    }
}

/// Search direction for [`PageTableManager::find_free_run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// No kernel memory left for a translation table.
    TableMemoryExhausted,
    Frames(FrameError),
    /// No run of free logical pages of the requested length.
    NoFreeRun { pages: u32 },
    AlreadyMapped(Page),
    /// The page belongs to a region shared with the kernel table.
    SharedRegion(Page),
    /// A first-level entry has a format this kernel never writes.
    CorruptDescriptor(Page),
}

impl From<FrameError> for MapError {
    fn from(err: FrameError) -> Self {
        Self::Frames(err)
    }
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableMemoryExhausted => write!(f, "no memory for translation tables"),
            Self::Frames(err) => write!(f, "{}", err),
            Self::NoFreeRun { pages } => write!(f, "no run of {} free pages", pages),
            Self::AlreadyMapped(page) => write!(f, "{:?} is already mapped", page),
            Self::SharedRegion(page) => write!(f, "{:?} is in a shared region", page),
            Self::CorruptDescriptor(page) => write!(f, "unexpected descriptor covering {:?}", page),
        }
    }
}

/// Why a logical address has no translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslationFault {
    /// The first-level entry is not a table pointer.
    Section(VirtAddr),
    /// The second-level entry is not a small page.
    Page(VirtAddr),
}

/// Translate `addr` through the table rooted at `root`.
pub fn walk<M: PhysicalMemory>(
    mem: &M,
    root: PhysAddr,
    addr: VirtAddr,
) -> Result<PhysAddr, TranslationFault> {
    let root = PhysAddr::new(root.as_u32() & ROOT_MASK);
    // SAFETY: roots and coarse descriptors only ever point at tables from `alloc_table`.
    let first = unsafe { mem.read_word(root.offset(addr.section_index() as u32 * 4)) };
    let base = match FirstLevelDescriptor::decode(first) {
        FirstLevelDescriptor::CoarseTable { base, .. } => base,
        _ => return Err(TranslationFault::Section(addr)),
    };
    let second = unsafe { mem.read_word(base.offset(addr.table_index() as u32 * 4)) };
    match SecondLevelDescriptor::decode(second) {
        SecondLevelDescriptor::SmallPage { frame, .. } => {
            Ok(frame.start_address().offset(addr.page_offset()))
        }
        _ => Err(TranslationFault::Page(addr)),
    }
}

/// First-level indices whose entries are copied from the kernel table.
struct SharedSections {
    bits: [u32; FIRST_LEVEL_ENTRIES / 32],
}

impl SharedSections {
    const fn new() -> Self {
        Self { bits: [0; FIRST_LEVEL_ENTRIES / 32] }
    }

    fn insert(&mut self, section: usize) {
        self.bits[section / 32] |= 1 << (section % 32);
    }

    fn contains(&self, section: usize) -> bool {
        self.bits
            .get(section / 32)
            .is_some_and(|word| word & (1 << (section % 32)) != 0)
    }
}

pub struct PageTableManager {
    frames: FrameAllocator,
    layout: MemoryLayout,
    kernel_root: PhysAddr,
    shared: SharedSections,
}

impl PageTableManager {
    /// Set up frame tracking and build the kernel table.
    pub fn new<M: PhysicalMemory>(
        mem: &mut M,
        layout: MemoryLayout,
        framebuffer: Option<Region>,
    ) -> Result<Self, MapError> {
        let mut frames = FrameAllocator::new(layout.frame_count());
        frames.pin_range(PhysAddr::new(0), layout.kernel_end);

        let mut manager = Self {
            frames,
            layout,
            kernel_root: PhysAddr::new(0),
            shared: SharedSections::new(),
        };
        let kernel_table = manager.create_kernel_table(mem, framebuffer)?;
        manager.kernel_root = kernel_table.root;

        log::info!(
            "Kernel translation table at {}, {} frames free",
            manager.kernel_root,
            manager.frames.free_frames()
        );
        Ok(manager)
    }

    /// Build the identity mapping of kernel memory, peripherals and framebuffer.
    ///
    /// The two scratch pages at the top of the kernel region stay unmapped.
    /// Framebuffer frames are pinned so they are never handed to a process.
    pub fn create_kernel_table<M: PhysicalMemory>(
        &mut self,
        mem: &mut M,
        framebuffer: Option<Region>,
    ) -> Result<PageTable, MapError> {
        let table = Self::create_table(mem)?;
        let (scratch_dst, scratch_src) = self.layout.scratch_pages();

        for number in 0..self.layout.kernel_end.as_u32() / PAGE_SIZE {
            let page = Page::from_number(number);
            if page == scratch_dst || page == scratch_src {
                continue;
            }
            Self::identity_map(mem, &table, page, PageFlags::KERNEL)?;
        }
        for section in self.layout.kernel_sections() {
            self.shared.insert(section);
        }

        let device_pages =
            self.layout.device_start.as_u32() / PAGE_SIZE..self.layout.device_end.as_u32() / PAGE_SIZE;
        for number in device_pages {
            Self::identity_map(mem, &table, Page::from_number(number), PageFlags::DEVICE)?;
        }
        for section in self.layout.device_sections() {
            self.shared.insert(section);
        }

        if let Some(region) = framebuffer {
            self.frames.pin_range(region.start, region.end());
            let first = region.start.as_u32() / PAGE_SIZE;
            let last = region.end().as_u32().div_ceil(PAGE_SIZE);
            for number in first..last {
                Self::identity_map(mem, &table, Page::from_number(number), PageFlags::FRAMEBUFFER)?;
            }
            for section in (first / PAGES_PER_SECTION)..last.div_ceil(PAGES_PER_SECTION) {
                self.shared.insert(section as usize);
            }
            log::info!("Framebuffer mapped at {} ({} bytes)", region.start, region.size);
        }

        Ok(table)
    }

    /// Allocate an empty first-level table.
    pub fn create_table<M: PhysicalMemory>(mem: &mut M) -> Result<PageTable, MapError> {
        let root = mem
            .alloc_table(FIRST_LEVEL_LAYOUT)
            .ok_or(MapError::TableMemoryExhausted)?;
        Ok(PageTable { root })
    }

    /// Allocate a table for a new process, sharing the kernel's mappings.
    pub fn create_process_table<M: PhysicalMemory>(&self, mem: &mut M) -> Result<PageTable, MapError> {
        let table = Self::create_table(mem)?;
        for section in 0..FIRST_LEVEL_ENTRIES {
            if !self.shared.contains(section) {
                continue;
            }
            let offset = section as u32 * 4;
            // SAFETY: both tables are complete first-level tables.
            unsafe {
                let raw = mem.read_word(self.kernel_root.offset(offset));
                mem.write_word(table.root.offset(offset), raw);
            }
        }
        Ok(table)
    }

    /// Map `page` to `frame` in a process table.
    ///
    /// `frame` must come from the frame allocator; the mapping takes over its
    /// reservation and [`unmap`](Self::unmap) gives it back.
    pub fn map<M: PhysicalMemory>(
        &mut self,
        mem: &mut M,
        table: &PageTable,
        page: Page,
        frame: Frame,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        if !self.is_private(page) {
            return Err(MapError::SharedRegion(page));
        }
        let entry = Self::leaf_entry(mem, table.root, page)?;
        // SAFETY: `entry` lies inside a second-level table of `table`.
        unsafe {
            if SecondLevelDescriptor::decode(mem.read_word(entry)) != SecondLevelDescriptor::Fault {
                return Err(MapError::AlreadyMapped(page));
            }
            mem.write_word(entry, SecondLevelDescriptor::small_page(frame, flags).encode());
        }
        Ok(())
    }

    /// Remove the mapping of `page` and release its frame.
    ///
    /// Unmapped pages are left alone; shared pages are never touched.
    pub fn unmap<M: PhysicalMemory + MmuOps>(&mut self, mem: &mut M, table: &PageTable, page: Page) {
        if !self.is_private(page) {
            log::warn!("Refusing to unmap shared {:?}", page);
            return;
        }
        let Some(entry) = Self::existing_leaf_entry(mem, table.root, page) else {
            return;
        };
        // SAFETY: `entry` lies inside a second-level table of `table`.
        let descriptor = SecondLevelDescriptor::decode(unsafe { mem.read_word(entry) });
        if let Some(frame) = descriptor.frame() {
            unsafe { mem.write_word(entry, SecondLevelDescriptor::Fault.encode()) };
            mem.invalidate_tlb_entry(page.start_address());
            if let Err(err) = self.frames.release_frame(frame) {
                log::error!("Unmapping {:?}: {}", page, err);
            }
        }
    }

    /// Translate through `table`, or through the active table when `None`.
    pub fn translate<M: PhysicalMemory + MmuOps>(
        &self,
        mem: &M,
        table: Option<&PageTable>,
        addr: VirtAddr,
    ) -> Result<PhysAddr, TranslationFault> {
        let root = table.map_or_else(|| mem.active_translation_table(), PageTable::root);
        walk(mem, root, addr)
    }

    /// Find `count` consecutive free pages, searching from `start`.
    ///
    /// Searching up returns the first run at or above `start`; searching down
    /// returns the highest run at or below it. In both cases the lowest page of
    /// the run is returned. Shared sections are never part of a run.
    pub fn find_free_run<M: PhysicalMemory>(
        &self,
        mem: &M,
        table: &PageTable,
        count: u32,
        start: Page,
        direction: Direction,
    ) -> Option<Page> {
        let range = self.layout.user_pages();
        if count == 0 || range.is_empty() {
            return None;
        }
        let mut run = 0;
        match direction {
            Direction::Up => {
                for number in start.number().max(range.start)..range.end {
                    if self.page_is_free(mem, table, Page::from_number(number)) {
                        run += 1;
                        if run == count {
                            return Some(Page::from_number(number + 1 - count));
                        }
                    } else {
                        run = 0;
                    }
                }
            }
            Direction::Down => {
                if start.number() < range.start {
                    return None;
                }
                let top = start.number().min(range.end - 1);
                for number in (range.start..=top).rev() {
                    if self.page_is_free(mem, table, Page::from_number(number)) {
                        run += 1;
                        if run == count {
                            return Some(Page::from_number(number));
                        }
                    } else {
                        run = 0;
                    }
                }
            }
        }
        None
    }

    /// Find and back `count` consecutive pages with fresh frames.
    ///
    /// Either every page gets mapped or none does.
    pub fn alloc_pages<M: PhysicalMemory + MmuOps>(
        &mut self,
        mem: &mut M,
        table: &PageTable,
        count: u32,
        start: Page,
        direction: Direction,
        flags: PageFlags,
    ) -> Result<Page, MapError> {
        let first = self
            .find_free_run(mem, table, count, start, direction)
            .ok_or(MapError::NoFreeRun { pages: count })?;
        self.alloc_pages_at(mem, table, first, count, flags)?;
        Ok(first)
    }

    /// Back `first..first + count` with fresh frames, rolling back on failure.
    pub fn alloc_pages_at<M: PhysicalMemory + MmuOps>(
        &mut self,
        mem: &mut M,
        table: &PageTable,
        first: Page,
        count: u32,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        for index in 0..count {
            if let Err(err) = self.map_fresh_frame(mem, table, first.add(index), flags) {
                log::debug!("Allocating {} pages at {:?} failed: {}", count, first, err);
                self.free_pages(mem, table, first, index);
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn free_pages<M: PhysicalMemory + MmuOps>(
        &mut self,
        mem: &mut M,
        table: &PageTable,
        first: Page,
        count: u32,
    ) {
        for index in 0..count {
            self.unmap(mem, table, first.add(index));
        }
    }

    /// Whether `first..first + count` is private and entirely unmapped.
    pub fn is_range_free<M: PhysicalMemory>(&self, mem: &M, table: &PageTable, first: Page, count: u32) -> bool {
        (0..count).all(|index| self.page_is_free(mem, table, first.add(index)))
    }

    /// Release a process table, every frame it still maps, and its second-level tables.
    ///
    /// Shared entries are skipped; they belong to the kernel table.
    pub fn destroy_table<M: PhysicalMemory + MmuOps>(&mut self, mem: &mut M, table: PageTable) {
        if mem.active_translation_table().as_u32() & ROOT_MASK == table.root.as_u32() {
            log::error!("Refusing to destroy the active translation table {}", table.root);
            return;
        }
        for section in 0..FIRST_LEVEL_ENTRIES {
            if self.shared.contains(section) {
                continue;
            }
            // SAFETY: `table` is a complete first-level table owned by the caller.
            let first = unsafe { mem.read_word(table.root.offset(section as u32 * 4)) };
            let FirstLevelDescriptor::CoarseTable { base, .. } = FirstLevelDescriptor::decode(first) else {
                continue;
            };
            for index in 0..SECOND_LEVEL_ENTRIES {
                let second = unsafe { mem.read_word(base.offset(index as u32 * 4)) };
                if let Some(frame) = SecondLevelDescriptor::decode(second).frame() {
                    if let Err(err) = self.frames.release_frame(frame) {
                        log::error!("Destroying table {}: {}", table.root, err);
                    }
                }
            }
            // SAFETY: the second-level table was allocated by `leaf_entry` and
            // is referenced only by this first-level table.
            unsafe { mem.free_table(base, SECOND_LEVEL_LAYOUT) };
        }
        unsafe { mem.free_table(table.root, FIRST_LEVEL_LAYOUT) };
    }

    /// Copy the contents of `src` into `dst` through the scratch pages.
    ///
    /// The kernel table must be active. Both frames hold an extra reference
    /// while they are mapped in the scratch window.
    pub fn copy_page<M: PhysicalMemory + MmuOps>(
        &mut self,
        mem: &mut M,
        dst: Frame,
        src: Frame,
    ) -> Result<(), MapError> {
        debug_assert_eq!(mem.active_translation_table(), self.kernel_root);
        let (dst_page, src_page) = self.layout.scratch_pages();
        let root = self.kernel_root;

        self.frames.retain(dst)?;
        if let Err(err) = self.frames.retain(src) {
            self.release_logged(dst);
            return Err(err.into());
        }

        let result = Self::scratch_map(mem, root, dst_page, dst)
            .and_then(|()| Self::scratch_map(mem, root, src_page, src));
        if result.is_ok() {
            // SAFETY: both scratch pages were just mapped to distinct frames.
            unsafe { mem.copy_page(dst_page.start_address(), src_page.start_address()) };
        }

        for page in [dst_page, src_page] {
            if let Some(entry) = Self::existing_leaf_entry(mem, root, page) {
                unsafe { mem.write_word(entry, SecondLevelDescriptor::Fault.encode()) };
            }
            mem.invalidate_tlb_entry(page.start_address());
        }
        self.release_logged(src);
        self.release_logged(dst);
        result
    }

    /// Install `table`, or the kernel table when `None`, as the active table.
    pub fn activate<M: MmuOps>(&self, mem: &mut M, table: Option<&PageTable>) {
        let root = table.map_or(self.kernel_root, PageTable::root);
        if mem.active_translation_table() != root {
            // SAFETY: every table built here carries the kernel mappings.
            unsafe { mem.set_translation_table(root) };
            mem.invalidate_tlb();
        }
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn kernel_root(&self) -> PhysAddr {
        self.kernel_root
    }

    /// Whether `page` may be mapped in a process table.
    pub fn is_private(&self, page: Page) -> bool {
        self.layout.user_pages().contains(&page.number()) && !self.shared.contains(page.section_index())
    }

    pub fn is_mapped<M: PhysicalMemory>(&self, mem: &M, table: &PageTable, page: Page) -> bool {
        Self::existing_leaf_entry(mem, table.root, page).is_some_and(|entry| {
            // SAFETY: `entry` lies inside a second-level table of `table`.
            let raw = unsafe { mem.read_word(entry) };
            SecondLevelDescriptor::decode(raw) != SecondLevelDescriptor::Fault
        })
    }

    fn page_is_free<M: PhysicalMemory>(&self, mem: &M, table: &PageTable, page: Page) -> bool {
        self.is_private(page) && !self.is_mapped(mem, table, page)
    }

    fn map_fresh_frame<M: PhysicalMemory>(
        &mut self,
        mem: &mut M,
        table: &PageTable,
        page: Page,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let frame = self.frames.reserve_frame()?;
        if let Err(err) = self.map(mem, table, page, frame, flags) {
            self.release_logged(frame);
            return Err(err);
        }
        Ok(())
    }

    fn release_logged(&mut self, frame: Frame) {
        if let Err(err) = self.frames.release_frame(frame) {
            log::error!("Releasing {:?}: {}", frame, err);
        }
    }

    fn identity_map<M: PhysicalMemory>(
        mem: &mut M,
        table: &PageTable,
        page: Page,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let entry = Self::leaf_entry(mem, table.root, page)?;
        let frame = Frame::from_number(page.number());
        // SAFETY: `entry` lies inside a second-level table of `table`.
        unsafe { mem.write_word(entry, SecondLevelDescriptor::small_page(frame, flags).encode()) };
        Ok(())
    }

    fn scratch_map<M: PhysicalMemory + MmuOps>(
        mem: &mut M,
        root: PhysAddr,
        page: Page,
        frame: Frame,
    ) -> Result<(), MapError> {
        let entry = Self::leaf_entry(mem, root, page)?;
        let descriptor = SecondLevelDescriptor::small_page(frame, PageFlags::KERNEL);
        // SAFETY: `entry` lies inside the kernel table's scratch section.
        unsafe { mem.write_word(entry, descriptor.encode()) };
        mem.invalidate_tlb_entry(page.start_address());
        Ok(())
    }

    /// Address of the second-level entry for `page`, creating its table if needed.
    fn leaf_entry<M: PhysicalMemory>(mem: &mut M, root: PhysAddr, page: Page) -> Result<PhysAddr, MapError> {
        let first_entry = root.offset(page.section_index() as u32 * 4);
        // SAFETY: `root` is a complete first-level table.
        let raw = unsafe { mem.read_word(first_entry) };
        let base = match FirstLevelDescriptor::decode(raw) {
            FirstLevelDescriptor::CoarseTable { base, .. } => base,
            FirstLevelDescriptor::Fault => {
                let base = mem
                    .alloc_table(SECOND_LEVEL_LAYOUT)
                    .ok_or(MapError::TableMemoryExhausted)?;
                unsafe { mem.write_word(first_entry, FirstLevelDescriptor::coarse(base).encode()) };
                base
            }
            FirstLevelDescriptor::Unsupported(_) => return Err(MapError::CorruptDescriptor(page)),
        };
        Ok(base.offset(page.start_address().table_index() as u32 * 4))
    }

    fn existing_leaf_entry<M: PhysicalMemory>(mem: &M, root: PhysAddr, page: Page) -> Option<PhysAddr> {
        // SAFETY: `root` is a complete first-level table.
        let raw = unsafe { mem.read_word(root.offset(page.section_index() as u32 * 4)) };
        match FirstLevelDescriptor::decode(raw) {
            FirstLevelDescriptor::CoarseTable { base, .. } => {
                Some(base.offset(page.start_address().table_index() as u32 * 4))
            }
            _ => None,
        }
    }
}
