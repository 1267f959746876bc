//! Kernel heap.
//!
//! PCBs, block lists and translation tables are allocated from a
//! linked-list heap between the end of the kernel image and the scratch
//! pages at the top of the kernel region. The region is identity-mapped, so
//! heap pointers double as physical addresses.

use linked_list_allocator::LockedHeap;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Hand `start..end` to the global allocator.
///
/// # Safety
///
/// The range must be unused, writable, identity-mapped memory, and this may
/// only be called once.
pub unsafe fn init(start: u32, end: u32) -> Result<(), &'static str> {
    if end <= start {
        return Err("empty kernel heap");
    }
    ALLOCATOR.lock().init(start as *mut u8, (end - start) as usize);
    log::info!(
        "Kernel heap initialized at {:#010x} with size {} KiB",
        start,
        (end - start) / 1024
    );
    Ok(())
}

/// Bytes currently handed out.
pub fn used() -> usize {
    ALLOCATOR.lock().used()
}
