//! Weighted round-robin scheduler
//!
//! Every process sits in one ring. Election walks the ring from the current
//! process and switches to the first READY process it meets. The chosen
//! process gets a share of the time slice proportional to its weight:
//! `max(1, time_slice * weight / total_weight)` timer ticks.

use crate::arch_impl::{Platform, TimerOps};
use crate::memory::page_table::PageTableManager;
use crate::platform_config::KernelConfig;
use crate::process::{niceness_to_weight, Process, ProcessError, ProcessId, ProcessState, ProcessTable};
use crate::trap::Fatal;

pub struct Scheduler {
    pub(crate) processes: ProcessTable,
    pub(crate) current: ProcessId,
    /// Sum of the weights of all live (not terminated) processes.
    pub(crate) total_weight: u32,
    pub(crate) time_slice: u32,
    /// Stack size of new processes, in pages.
    pub(crate) stack_pages: u32,
}

impl Scheduler {
    /// Turn the boot code into the bootstrap process and start the timer.
    ///
    /// The bootstrap process runs with the kernel's translation table.
    pub fn init<P: Platform>(vm: &PageTableManager, platform: &mut P, config: &KernelConfig) -> Self {
        let weight = niceness_to_weight(config.bootstrap_niceness);
        let (processes, current) = ProcessTable::with_root(Process::bootstrap(weight));
        vm.activate(platform, None);

        let scheduler = Self {
            processes,
            current,
            total_weight: weight,
            time_slice: config.time_slice,
            stack_pages: config.stack_pages(),
        };
        platform.arm_timer(scheduler.timeslice_for(weight));
        log::info!("Scheduler initialized (bootstrap {} weight {})", current, weight);
        scheduler
    }

    pub fn current(&self) -> ProcessId {
        self.current
    }

    pub fn current_process(&self) -> Option<&Process> {
        self.processes.get(self.current)
    }

    pub fn current_process_mut(&mut self) -> Option<&mut Process> {
        self.processes.get_mut(self.current)
    }

    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(id)
    }

    pub fn process_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(id)
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn total_weight(&self) -> u32 {
        self.total_weight
    }

    /// Timer ticks a process of `weight` runs for.
    pub fn timeslice_for(&self, weight: u32) -> u32 {
        if self.total_weight == 0 {
            return self.time_slice.max(1);
        }
        let share = self.time_slice as u64 * weight as u64 / self.total_weight as u64;
        (share as u32).max(1)
    }

    /// Pick the next READY process after the current one.
    ///
    /// When there is none the current process keeps running on a fresh
    /// timeslice, unless it has terminated, in which case nothing can run.
    pub fn elect<T: TimerOps>(&mut self, timer: &mut T) -> Result<(), Fatal> {
        let start = self.current;
        let mut candidate = self.processes.next_of(start).unwrap_or(start);
        while candidate != start {
            if self.processes.get(candidate).map(|p| p.state) == Some(ProcessState::Ready) {
                self.switch_to(timer, candidate);
                return Ok(());
            }
            candidate = self.processes.next_of(candidate).unwrap_or(start);
        }

        match self.current_process() {
            Some(process) if !process.is_terminated() => {
                timer.arm_timer(self.timeslice_for(process.weight));
                Ok(())
            }
            _ => {
                log::error!("No runnable process left after {}", start);
                Err(Fatal::NoRunnableProcess)
            }
        }
    }

    /// Hand the processor to `target` directly.
    ///
    /// Yielding to yourself is a no-op.
    pub fn yield_to<T: TimerOps>(&mut self, timer: &mut T, target: ProcessId) -> Result<(), ProcessError> {
        if target == self.current {
            return Ok(());
        }
        let process = self
            .processes
            .get(target)
            .ok_or(ProcessError::NoSuchProcess(target))?;
        if process.state != ProcessState::Ready {
            return Err(ProcessError::NotReady(target));
        }
        self.switch_to(timer, target);
        Ok(())
    }

    /// Make `target` the running process and arm its timeslice.
    fn switch_to<T: TimerOps>(&mut self, timer: &mut T, target: ProcessId) {
        let previous = self.current;
        if let Some(process) = self.processes.get_mut(previous) {
            if process.state == ProcessState::Running {
                process.set_ready();
            }
        }
        let weight = match self.processes.get_mut(target) {
            Some(process) => {
                process.set_running();
                process.weight
            }
            None => return,
        };
        self.current = target;
        timer.arm_timer(self.timeslice_for(weight));
        log::debug!("Scheduling: {} -> {}", previous, target);
    }

    /// Terminate the current process with `status` and elect a successor.
    ///
    /// Its stack, heap and translation table are released right away; the
    /// PCB stays in the ring until it is reaped.
    pub fn exit<P: Platform>(
        &mut self,
        vm: &mut PageTableManager,
        platform: &mut P,
        status: i32,
    ) -> Result<(), Fatal> {
        let id = self.current;
        let Some(process) = self.processes.get_mut(id) else {
            return Err(Fatal::NoRunnableProcess);
        };
        process.terminate(status);
        self.total_weight = self.total_weight.saturating_sub(process.weight);

        let Process { stack, heap, address_space, .. } = process;
        if let Some(table) = address_space.table() {
            if let Some(stack) = stack.take() {
                vm.free_pages(platform, table, stack.lowest_page(), stack.pages);
            }
            heap.free_all(vm, platform, table);
        }
        if let Some(table) = address_space.release() {
            vm.destroy_table(platform, table);
        }
        log::info!("Process {} exited with status {}", id, status);

        self.elect(platform)
    }

    /// Remove a terminated process and return its exit status.
    pub fn reap(&mut self, id: ProcessId) -> Result<i32, ProcessError> {
        let process = self.processes.get(id).ok_or(ProcessError::NoSuchProcess(id))?;
        if !process.is_terminated() || id == self.current {
            return Err(ProcessError::NotTerminated(id));
        }
        let process = self
            .processes
            .remove(id)
            .ok_or(ProcessError::NoSuchProcess(id))?;
        log::debug!("Reaped process {} (status {})", id, process.return_code);
        Ok(process.return_code)
    }
}
