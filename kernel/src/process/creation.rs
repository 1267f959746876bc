//! Process creation
//!
//! A new process gets a private translation table sharing the kernel's
//! mappings, a stack at the top of the user range, and a context that starts
//! it in user mode at its entry point. It joins the ring right after the
//! process that created it.

use super::{niceness_to_weight, AddressSpace, Process, ProcessError, ProcessId, SavedContext, StackRegion};
use crate::arch_impl::Platform;
use crate::memory::descriptor::PageFlags;
use crate::memory::page_table::{Direction, PageTableManager};
use crate::memory::{Page, VirtAddr};
use crate::task::Scheduler;

impl Scheduler {
    /// Create a READY process that will start at `entry`.
    pub fn spawn<P: Platform>(
        &mut self,
        vm: &mut PageTableManager,
        platform: &mut P,
        entry: VirtAddr,
        niceness: i32,
    ) -> Result<ProcessId, ProcessError> {
        if !self.processes.has_room() {
            return Err(ProcessError::TableFull);
        }
        let table = vm.create_process_table(platform)?;

        let top = Page::containing(VirtAddr::new(vm.layout().user_end.as_u32() - 1));
        let stack_bottom = match vm.alloc_pages(platform, &table, self.stack_pages, top, Direction::Down, PageFlags::USER) {
            Ok(page) => page,
            Err(err) => {
                vm.destroy_table(platform, table);
                return Err(err.into());
            }
        };
        let stack = StackRegion {
            base: stack_bottom.add(self.stack_pages).start_address(),
            pages: self.stack_pages,
        };

        let context = SavedContext::new_user(entry, stack.base, platform.exit_trampoline());
        let weight = niceness_to_weight(niceness);
        let parent = self.current;
        let process = Process::new(context, Some(stack), AddressSpace::Private(table), weight, Some(parent));

        let id = self.processes.insert_after(parent, process)?;
        self.total_weight += weight;

        log::info!(
            "Spawned process {} (entry={}, stack={}, weight={})",
            id,
            entry,
            stack.base,
            weight
        );
        Ok(id)
    }
}
