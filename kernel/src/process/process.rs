//! Process structure and lifecycle

use core::fmt;

use crate::memory::page_table::PageTable;
use crate::memory::process_heap::ProcessHeap;
use crate::memory::{Page, VirtAddr, PAGE_SIZE};

/// Process handle.
///
/// The low 16 bits index the process table, the high 16 bits hold the
/// slot's generation (1..=0x7FFF). A handle to a reaped process never
/// matches the slot's next occupant, and no handle is ever 0 or `u32::MAX`,
/// which leaves both free as error sentinels.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(u32);

impl ProcessId {
    pub const MAX_GENERATION: u16 = 0x7FFF;

    pub(crate) const fn from_parts(index: u16, generation: u16) -> Self {
        Self(((generation as u32) << 16) | index as u32)
    }

    /// Reinterpret a raw handle received from a process.
    ///
    /// The result may not name any process; lookups reject it.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    pub const fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({}:{})", self.index(), self.generation())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index(), self.generation())
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProcessState {
    /// Currently executing
    Running = 0,
    /// Waiting for its turn
    Ready = 1,
    /// Reserved; nothing blocks yet
    Waiting = 2,
    /// Exited, waiting to be reaped
    Terminated = 3,
}

impl ProcessState {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Running),
            1 => Some(Self::Ready),
            2 => Some(Self::Waiting),
            3 => Some(Self::Terminated),
            _ => None,
        }
    }
}

/// Status register of a freshly started process: user mode, FIQs masked,
/// IRQs enabled.
pub const USER_MODE_STATUS: u32 = 0x150;

/// Return code of a process that has not exited.
pub const NOT_EXITED: i32 = -1;

/// Registers saved when a process is interrupted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SavedContext {
    /// r0-r12
    pub registers: [u32; 13],
    /// User-mode link register.
    pub user_return_address: u32,
    /// Where execution resumes.
    pub supervisor_return_address: u32,
    /// User-mode stack pointer.
    pub stack_pointer: u32,
    pub status_register: u32,
}

impl SavedContext {
    /// Context that starts executing `entry` in user mode.
    ///
    /// Returning from `entry` lands in `exit_trampoline`.
    pub fn new_user(entry: VirtAddr, stack_top: VirtAddr, exit_trampoline: VirtAddr) -> Self {
        Self {
            registers: [0; 13],
            user_return_address: exit_trampoline.as_u32(),
            supervisor_return_address: entry.as_u32(),
            stack_pointer: stack_top.as_u32(),
            status_register: USER_MODE_STATUS,
        }
    }
}

/// Stack pages of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackRegion {
    /// Address just above the highest stack page; the initial stack pointer.
    pub base: VirtAddr,
    pub pages: u32,
}

impl StackRegion {
    pub fn lowest_page(&self) -> Page {
        Page::from_number(Page::containing(self.base).number() - self.pages)
    }

    pub fn size(&self) -> u32 {
        self.pages * PAGE_SIZE
    }
}

/// Translation table a process runs with.
#[derive(Debug)]
pub enum AddressSpace {
    /// The kernel table (bootstrap process).
    Kernel,
    Private(PageTable),
    /// Torn down at exit.
    Released,
}

impl AddressSpace {
    /// The private table, if any.
    pub fn table(&self) -> Option<&PageTable> {
        match self {
            Self::Private(table) => Some(table),
            _ => None,
        }
    }

    /// Hand the private table over for destruction.
    pub fn release(&mut self) -> Option<PageTable> {
        match core::mem::replace(self, Self::Released) {
            Self::Private(table) => Some(table),
            Self::Kernel => {
                *self = Self::Kernel;
                None
            }
            Self::Released => None,
        }
    }
}

/// Process control block.
pub struct Process {
    pub context: SavedContext,
    pub stack: Option<StackRegion>,
    pub address_space: AddressSpace,
    pub heap: ProcessHeap,
    pub state: ProcessState,
    /// Exit status once terminated.
    pub return_code: i32,
    pub weight: u32,
    pub parent: Option<ProcessId>,
    pub(crate) prev: ProcessId,
    pub(crate) next: ProcessId,
}

impl Process {
    /// The process that runs the boot code, with the kernel's address space.
    pub fn bootstrap(weight: u32) -> Self {
        let mut process = Self::new(SavedContext::default(), None, AddressSpace::Kernel, weight, None);
        process.state = ProcessState::Running;
        process
    }

    pub fn new(
        context: SavedContext,
        stack: Option<StackRegion>,
        address_space: AddressSpace,
        weight: u32,
        parent: Option<ProcessId>,
    ) -> Self {
        Self {
            context,
            stack,
            address_space,
            heap: ProcessHeap::new(),
            state: ProcessState::Ready,
            return_code: NOT_EXITED,
            weight,
            parent,
            // Linked by the process table.
            prev: ProcessId::from_raw(0),
            next: ProcessId::from_raw(0),
        }
    }

    /// Mark process as running
    pub fn set_running(&mut self) {
        self.state = ProcessState::Running;
    }

    /// Mark process as ready
    pub fn set_ready(&mut self) {
        self.state = ProcessState::Ready;
    }

    pub fn terminate(&mut self, return_code: i32) {
        self.state = ProcessState::Terminated;
        self.return_code = return_code;
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ProcessState::Terminated
    }

    pub fn next(&self) -> ProcessId {
        self.next
    }

    pub fn prev(&self) -> ProcessId {
        self.prev
    }
}

/// Niceness runs from -20 (highest priority) to 20 (lowest); out-of-range
/// values are clamped.
pub fn niceness_to_weight(niceness: i32) -> u32 {
    (21 - niceness.clamp(-20, 20)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_niceness_to_weight() {
        assert_eq!(niceness_to_weight(20), 1);
        assert_eq!(niceness_to_weight(0), 21);
        assert_eq!(niceness_to_weight(-20), 41);
        assert_eq!(niceness_to_weight(99), 1);
        assert_eq!(niceness_to_weight(-99), 41);
    }

    #[test]
    fn test_process_id_parts() {
        let id = ProcessId::from_parts(7, 3);
        assert_eq!(id.index(), 7);
        assert_eq!(id.generation(), 3);
        assert_eq!(ProcessId::from_raw(id.as_u32()), id);
        assert_ne!(ProcessId::from_parts(0xFFFF, ProcessId::MAX_GENERATION).as_u32(), u32::MAX);
    }

    #[test]
    fn test_stack_region_pages() {
        let stack = StackRegion { base: VirtAddr::new(0x2000_0000), pages: 3 };
        assert_eq!(stack.lowest_page().start_address(), VirtAddr::new(0x1FFF_D000));
        assert_eq!(stack.size(), 3 * PAGE_SIZE);
    }

    #[test]
    fn test_user_context() {
        let context = SavedContext::new_user(
            VirtAddr::new(0x8400),
            VirtAddr::new(0x2000_0000),
            VirtAddr::new(0x8100),
        );
        assert_eq!(context.supervisor_return_address, 0x8400);
        assert_eq!(context.user_return_address, 0x8100);
        assert_eq!(context.stack_pointer, 0x2000_0000);
        assert_eq!(context.status_register & 0x1F, 0x10);
    }

    #[test]
    fn test_release_keeps_kernel_address_space() {
        let mut space = AddressSpace::Kernel;
        assert!(space.release().is_none());
        assert!(matches!(space, AddressSpace::Kernel));
    }
}
