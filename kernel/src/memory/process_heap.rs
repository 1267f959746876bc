//! Per-process dynamic memory.
//!
//! A heap is an address-ordered list of blocks, each either free or
//! occupied. Allocation is first-fit: the first free block large enough is
//! taken, split when it is larger than needed. When nothing fits, the heap
//! grows by whole pages, contiguously after its last block when that range is
//! free, otherwise wherever the page table manager finds room. Freed blocks
//! merge with free neighbours that are adjacent in memory.

use alloc::vec::Vec;
use core::fmt;

use super::descriptor::PageFlags;
use super::page_table::{Direction, MapError, PageTable, PageTableManager};
use super::{pages_for, Page, VirtAddr, PAGE_SIZE};
use crate::arch_impl::{MmuOps, PhysicalMemory};

/// Allocation sizes are rounded up to this many bytes.
pub const HEAP_GRANULE: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Free,
    Occupied,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    pub address: VirtAddr,
    pub size: u32,
    pub kind: BlockKind,
}

impl Block {
    fn end(&self) -> u32 {
        self.address.as_u32() + self.size
    }

    fn is_free(&self) -> bool {
        self.kind == BlockKind::Free
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapError {
    ZeroSize,
    OutOfMemory,
    /// No block starts at this address.
    UnknownAddress(VirtAddr),
    /// The block at this address is already free.
    NotAllocated(VirtAddr),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "zero-sized allocation"),
            Self::OutOfMemory => write!(f, "heap memory exhausted"),
            Self::UnknownAddress(addr) => write!(f, "no block starts at {}", addr),
            Self::NotAllocated(addr) => write!(f, "block at {} is not allocated", addr),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessHeap {
    blocks: Vec<Block>,
}

impl ProcessHeap {
    pub const fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Bytes currently handed out.
    pub fn occupied_bytes(&self) -> u32 {
        self.blocks.iter().filter(|b| !b.is_free()).map(|b| b.size).sum()
    }

    /// Allocate `size` bytes mapped into `table`.
    pub fn alloc<M: PhysicalMemory + MmuOps>(
        &mut self,
        vm: &mut PageTableManager,
        mem: &mut M,
        table: &PageTable,
        size: u32,
    ) -> Result<VirtAddr, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        let size = size
            .checked_next_multiple_of(HEAP_GRANULE)
            .ok_or(HeapError::OutOfMemory)?;

        if let Some(index) = self.first_fit(size) {
            return Ok(self.take(index, size));
        }
        self.grow(vm, mem, table, size).map_err(|err| {
            log::debug!("Heap growth by {} bytes failed: {}", size, err);
            HeapError::OutOfMemory
        })?;
        let index = self.first_fit(size).ok_or(HeapError::OutOfMemory)?;
        Ok(self.take(index, size))
    }

    /// Free the block starting at `address`.
    pub fn free(&mut self, address: VirtAddr) -> Result<(), HeapError> {
        let index = self
            .blocks
            .iter()
            .position(|block| block.address == address)
            .ok_or(HeapError::UnknownAddress(address))?;
        if self.blocks[index].is_free() {
            return Err(HeapError::NotAllocated(address));
        }
        self.blocks[index].kind = BlockKind::Free;

        if let Some(next) = self.blocks.get(index + 1).copied() {
            if next.is_free() && self.blocks[index].end() == next.address.as_u32() {
                self.blocks[index].size += next.size;
                self.blocks.remove(index + 1);
            }
        }
        if index > 0 {
            let previous = self.blocks[index - 1];
            if previous.is_free() && previous.end() == self.blocks[index].address.as_u32() {
                self.blocks[index - 1].size += self.blocks[index].size;
                self.blocks.remove(index);
            }
        }
        Ok(())
    }

    /// Release every page backing the heap and forget all blocks.
    pub fn free_all<M: PhysicalMemory + MmuOps>(
        &mut self,
        vm: &mut PageTableManager,
        mem: &mut M,
        table: &PageTable,
    ) {
        for (start, pages) in self.spans() {
            vm.free_pages(mem, table, start, pages);
        }
        self.blocks.clear();
    }

    /// Address-contiguous runs of blocks as (first page, page count).
    ///
    /// Growth always happens in whole pages, so every run is page aligned.
    pub fn spans(&self) -> Vec<(Page, u32)> {
        let mut spans: Vec<(u32, u32)> = Vec::new();
        for block in &self.blocks {
            match spans.last_mut() {
                Some((start, size)) if *start + *size == block.address.as_u32() => *size += block.size,
                _ => spans.push((block.address.as_u32(), block.size)),
            }
        }
        spans
            .into_iter()
            .map(|(start, size)| (Page::containing(VirtAddr::new(start)), size / PAGE_SIZE))
            .collect()
    }

    fn first_fit(&self, size: u32) -> Option<usize> {
        self.blocks
            .iter()
            .position(|block| block.is_free() && block.size >= size)
    }

    /// Mark block `index` occupied, splitting off the remainder.
    fn take(&mut self, index: usize, size: u32) -> VirtAddr {
        let block = self.blocks[index];
        if block.size > size {
            self.blocks.insert(
                index + 1,
                Block {
                    address: VirtAddr::new(block.address.as_u32() + size),
                    size: block.size - size,
                    kind: BlockKind::Free,
                },
            );
            self.blocks[index].size = size;
        }
        self.blocks[index].kind = BlockKind::Occupied;
        block.address
    }

    fn grow<M: PhysicalMemory + MmuOps>(
        &mut self,
        vm: &mut PageTableManager,
        mem: &mut M,
        table: &PageTable,
        size: u32,
    ) -> Result<(), MapError> {
        let (end, trailing_free) = match self.blocks.last() {
            Some(last) if last.is_free() => (last.end(), last.size),
            Some(last) => (last.end(), 0),
            None => (vm.layout().user_start.as_u32(), 0),
        };

        let next = Page::containing(VirtAddr::new(end));
        let pages = pages_for(size - trailing_free);
        if vm.is_range_free(mem, table, next, pages) {
            vm.alloc_pages_at(mem, table, next, pages, PageFlags::USER)?;
            match self.blocks.last_mut() {
                Some(last) if last.is_free() => last.size += pages * PAGE_SIZE,
                _ => self.blocks.push(Block {
                    address: next.start_address(),
                    size: pages * PAGE_SIZE,
                    kind: BlockKind::Free,
                }),
            }
            return Ok(());
        }

        let pages = pages_for(size);
        let first = vm.alloc_pages(mem, table, pages, next, Direction::Up, PageFlags::USER)?;
        let block = Block {
            address: first.start_address(),
            size: pages * PAGE_SIZE,
            kind: BlockKind::Free,
        };
        let position = self
            .blocks
            .iter()
            .position(|b| b.address > block.address)
            .unwrap_or(self.blocks.len());
        self.blocks.insert(position, block);
        log::debug!("Heap grew into a new region at {}", block.address);
        Ok(())
    }
}
