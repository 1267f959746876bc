//! fork() with eager memory copying
//!
//! The child gets its own translation table with the parent's stack and heap
//! pages duplicated at the same logical addresses, a copy of the parent's
//! saved registers, and 0 as its return value. Pages are copied frame to
//! frame through the kernel's scratch window, so the kernel table must be
//! active.

use super::{AddressSpace, Process, ProcessError, ProcessId};
use crate::arch_impl::Platform;
use crate::memory::descriptor::PageFlags;
use crate::memory::page_table::{MapError, PageTable, PageTableManager};
use crate::memory::{Frame, Page};
use crate::task::Scheduler;

impl Scheduler {
    /// Duplicate the current process; returns the child's handle.
    pub fn fork<P: Platform>(
        &mut self,
        vm: &mut PageTableManager,
        platform: &mut P,
    ) -> Result<ProcessId, ProcessError> {
        if !self.processes.has_room() {
            return Err(ProcessError::TableFull);
        }
        let parent_id = self.current;
        let parent = self
            .processes
            .get(parent_id)
            .ok_or(ProcessError::NoSuchProcess(parent_id))?;
        let (Some(parent_table), Some(stack)) = (parent.address_space.table(), parent.stack) else {
            return Err(ProcessError::NoAddressSpace);
        };

        let child_table = vm.create_process_table(platform)?;
        let mut regions = parent.heap.spans();
        regions.push((stack.lowest_page(), stack.pages));
        for (first, count) in regions {
            if let Err(err) = copy_pages(vm, platform, parent_table, &child_table, first, count) {
                vm.destroy_table(platform, child_table);
                log::warn!("fork of {} failed: {}", parent_id, err);
                return Err(err.into());
            }
        }

        let mut context = parent.context;
        context.registers[0] = 0;
        let weight = parent.weight;
        let mut child = Process::new(context, Some(stack), AddressSpace::Private(child_table), weight, Some(parent_id));
        child.heap = parent.heap.clone();

        let child_id = self.processes.insert_after(parent_id, child)?;
        self.total_weight += weight;
        log::info!("Forked process {} from {}", child_id, parent_id);
        Ok(child_id)
    }
}

/// Back `first..first + count` in `dst` with fresh frames holding copies of
/// the same pages in `src`.
fn copy_pages<P: Platform>(
    vm: &mut PageTableManager,
    platform: &mut P,
    src: &PageTable,
    dst: &PageTable,
    first: Page,
    count: u32,
) -> Result<(), MapError> {
    vm.alloc_pages_at(platform, dst, first, count, PageFlags::USER)?;
    for index in 0..count {
        let page = first.add(index).start_address();
        let (Ok(from), Ok(to)) = (
            vm.translate(platform, Some(src), page),
            vm.translate(platform, Some(dst), page),
        ) else {
            continue;
        };
        vm.copy_page(platform, Frame::containing(to), Frame::containing(from))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::arch_impl::sim::{test_config, SimPlatform};
    use crate::memory::page_table::PageTableManager;
    use crate::memory::VirtAddr;
    use crate::process::{ProcessError, ProcessState};
    use crate::task::Scheduler;

    struct World {
        sim: SimPlatform,
        vm: PageTableManager,
        scheduler: Scheduler,
    }

    fn world() -> World {
        let config = test_config();
        let mut sim = SimPlatform::new(&config.layout);
        let vm = PageTableManager::new(&mut sim, config.layout, None).unwrap();
        let scheduler = Scheduler::init(&vm, &mut sim, &config);
        World { sim, vm, scheduler }
    }

    #[test]
    fn test_fork_from_bootstrap_is_rejected() {
        let mut w = world();
        assert_eq!(
            w.scheduler.fork(&mut w.vm, &mut w.sim),
            Err(ProcessError::NoAddressSpace)
        );
    }

    #[test]
    fn test_fork_copies_stack_heap_and_registers() {
        let mut w = world();
        let parent = w.scheduler.spawn(&mut w.vm, &mut w.sim, VirtAddr::new(0x9000), 3).unwrap();
        w.scheduler.yield_to(&mut w.sim, parent).unwrap();

        let (stack_top, heap_addr, parent_root) = {
            let World { sim, vm, scheduler } = &mut w;
            let process = scheduler.process_mut(parent).unwrap();
            process.context.registers[0] = 14;
            process.context.registers[4] = 0xfeed;
            let table = process.address_space.table().unwrap();
            let heap_addr = process.heap.alloc(vm, sim, table, 32).unwrap();
            let top = VirtAddr::new(process.stack.unwrap().base.as_u32() - 16);
            (top, heap_addr, table.root())
        };
        w.sim.write_virt(parent_root, stack_top, b"stack data");
        w.sim.write_virt(parent_root, heap_addr, b"heap data");

        let child = w.scheduler.fork(&mut w.vm, &mut w.sim).unwrap();
        assert_eq!(w.scheduler.current(), parent);

        let child_process = w.scheduler.process(child).unwrap();
        assert_eq!(child_process.state, ProcessState::Ready);
        assert_eq!(child_process.parent, Some(parent));
        assert_eq!(child_process.context.registers[0], 0);
        assert_eq!(child_process.context.registers[4], 0xfeed);
        assert_eq!(child_process.heap, w.scheduler.process(parent).unwrap().heap);

        let child_root = child_process.address_space.table().unwrap().root();
        assert_ne!(child_root, parent_root);
        assert_eq!(w.sim.read_virt(child_root, stack_top, 10), b"stack data");
        assert_eq!(w.sim.read_virt(child_root, heap_addr, 9), b"heap data");

        // The copies are private: writes in the child do not reach the parent.
        w.sim.write_virt(child_root, stack_top, b"child");
        assert_eq!(w.sim.read_virt(parent_root, stack_top, 10), b"stack data");
        assert_eq!(w.scheduler.total_weight(), 1 + 2 * 18);
    }

    #[test]
    fn test_failed_fork_releases_child_memory() {
        let mut w = world();
        let parent = w.scheduler.spawn(&mut w.vm, &mut w.sim, VirtAddr::new(0x9000), 0).unwrap();
        w.scheduler.yield_to(&mut w.sim, parent).unwrap();

        // Leave fewer free frames than the child needs.
        {
            let World { sim, vm, scheduler } = &mut w;
            let process = scheduler.process_mut(parent).unwrap();
            let table = process.address_space.table().unwrap();
            let spare = vm.frames().free_frames() as u32 - 2;
            process.heap.alloc(vm, sim, table, spare * 4096).unwrap();
        }
        let free = w.vm.frames().free_frames();
        let tables = w.sim.live_tables();
        let armed = w.sim.armed_ticks().len();

        let result = w.scheduler.fork(&mut w.vm, &mut w.sim);
        assert!(matches!(result, Err(ProcessError::OutOfMemory(_))));
        assert_eq!(w.vm.frames().free_frames(), free);
        assert_eq!(w.sim.live_tables(), tables);
        assert_eq!(w.scheduler.processes().len(), 2);
        assert_eq!(w.sim.armed_ticks().len(), armed);
    }
}
