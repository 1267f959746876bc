//! System call handler implementations
//!
//! Each handler runs with the kernel table active and interrupts masked.
//! Requests a caller can get wrong are answered with a sentinel; only
//! conditions the kernel cannot continue from become [`Fatal`].

use super::{SyscallResult, INVALID};
use crate::arch_impl::Platform;
use crate::memory::VirtAddr;
use crate::process::{ProcessError, ProcessId, NOT_EXITED};
use crate::trap::{Fatal, Kernel};

/// sys_reboot - restart the board
pub fn sys_reboot<P: Platform>(kernel: &mut Kernel<P>) -> Result<SyscallResult, Fatal> {
    log::info!("Reboot requested by {}", kernel.scheduler.current());
    kernel.platform.reboot();
    Ok(SyscallResult::None)
}

/// sys_set_time - set the wall clock, in milliseconds split low/high
pub fn sys_set_time<P: Platform>(kernel: &mut Kernel<P>, low: u32, high: u32) -> Result<SyscallResult, Fatal> {
    let ms = (high as u64) << 32 | low as u64;
    kernel.platform.set_wall_clock_ms(ms);
    log::debug!("Wall clock set to {} ms", ms);
    Ok(SyscallResult::None)
}

/// sys_get_time - wall clock in milliseconds, low word in r0
pub fn sys_get_time<P: Platform>(kernel: &mut Kernel<P>) -> Result<SyscallResult, Fatal> {
    let ms = kernel.platform.wall_clock_ms();
    Ok(SyscallResult::Pair(ms as u32, (ms >> 32) as u32))
}

pub fn sys_yield_to<P: Platform>(kernel: &mut Kernel<P>, target: ProcessId) -> Result<SyscallResult, Fatal> {
    let caller = kernel.scheduler.current();
    match kernel.scheduler.yield_to(&mut kernel.platform, target) {
        Ok(()) => Ok(SyscallResult::Value(0)),
        Err(err) => {
            log::warn!("yield_to from {} rejected: {}", caller, err);
            Ok(SyscallResult::Value(INVALID))
        }
    }
}

pub fn sys_yield<P: Platform>(kernel: &mut Kernel<P>) -> Result<SyscallResult, Fatal> {
    kernel.scheduler.elect(&mut kernel.platform)?;
    Ok(SyscallResult::None)
}

/// sys_exit - terminate the caller; never returns to it
pub fn sys_exit<P: Platform>(kernel: &mut Kernel<P>, status: i32) -> Result<SyscallResult, Fatal> {
    kernel.scheduler.exit(&mut kernel.vm, &mut kernel.platform, status)?;
    Ok(SyscallResult::None)
}

/// sys_reap - remove a terminated process, returning its exit status
pub fn sys_reap<P: Platform>(kernel: &mut Kernel<P>, target: ProcessId) -> Result<SyscallResult, Fatal> {
    match kernel.scheduler.reap(target) {
        Ok(status) => Ok(SyscallResult::Value(status as u32)),
        Err(err) => {
            log::warn!("reap from {} rejected: {}", kernel.scheduler.current(), err);
            Ok(SyscallResult::Value(INVALID))
        }
    }
}

/// sys_spawn - start a new process at `entry`
pub fn sys_spawn<P: Platform>(kernel: &mut Kernel<P>, entry: u32, niceness: i32) -> Result<SyscallResult, Fatal> {
    let Kernel { platform, vm, scheduler } = kernel;
    let result = scheduler.spawn(vm, platform, VirtAddr::new(entry), niceness);
    creation_result("spawn", result)
}

/// sys_fork - duplicate the caller; the child sees 0
pub fn sys_fork<P: Platform>(kernel: &mut Kernel<P>) -> Result<SyscallResult, Fatal> {
    let Kernel { platform, vm, scheduler } = kernel;
    let result = scheduler.fork(vm, platform);
    creation_result("fork", result)
}

/// Out of memory while building a process is fatal; anything else is the
/// caller's problem.
fn creation_result(operation: &str, result: Result<ProcessId, ProcessError>) -> Result<SyscallResult, Fatal> {
    match result {
        Ok(id) => Ok(SyscallResult::Value(id.as_u32())),
        Err(ProcessError::OutOfMemory(err)) => {
            log::error!("{} ran out of memory: {}", operation, err);
            Err(Fatal::Memory(err))
        }
        Err(err) => {
            log::warn!("{} rejected: {}", operation, err);
            Ok(SyscallResult::Value(INVALID))
        }
    }
}

pub fn sys_query_state<P: Platform>(kernel: &mut Kernel<P>, target: ProcessId) -> Result<SyscallResult, Fatal> {
    let state = kernel.scheduler.process(target).map(|process| process.state.code());
    Ok(SyscallResult::Value(state.unwrap_or(INVALID)))
}

pub fn sys_query_return_code<P: Platform>(kernel: &mut Kernel<P>, target: ProcessId) -> Result<SyscallResult, Fatal> {
    let code = kernel
        .scheduler
        .process(target)
        .map_or(NOT_EXITED, |process| process.return_code);
    Ok(SyscallResult::Value(code as u32))
}

/// sys_heap_alloc - address of `size` fresh bytes, or 0
pub fn sys_heap_alloc<P: Platform>(kernel: &mut Kernel<P>, size: u32) -> Result<SyscallResult, Fatal> {
    let Kernel { platform, vm, scheduler } = kernel;
    let caller = scheduler.current();
    let Some(process) = scheduler.current_process_mut() else {
        return Err(Fatal::NoRunnableProcess);
    };
    let Some(table) = process.address_space.table() else {
        log::warn!("heap_alloc from {} without an address space", caller);
        return Ok(SyscallResult::Value(0));
    };
    match process.heap.alloc(vm, platform, table, size) {
        Ok(address) => {
            log::debug!("heap_alloc({}) for {} -> {}", size, caller, address);
            Ok(SyscallResult::Value(address.as_u32()))
        }
        Err(err) => {
            log::warn!("heap_alloc({}) for {} failed: {}", size, caller, err);
            Ok(SyscallResult::Value(0))
        }
    }
}

/// sys_heap_free - release a block returned by heap_alloc
pub fn sys_heap_free<P: Platform>(kernel: &mut Kernel<P>, address: u32) -> Result<SyscallResult, Fatal> {
    let caller = kernel.scheduler.current();
    let Some(process) = kernel.scheduler.current_process_mut() else {
        return Err(Fatal::NoRunnableProcess);
    };
    match process.heap.free(VirtAddr::new(address)) {
        Ok(()) => Ok(SyscallResult::Value(0)),
        Err(err) => {
            log::warn!("heap_free from {} rejected: {}", caller, err);
            Ok(SyscallResult::Value(INVALID))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::arch_impl::sim::{test_config, SimPlatform};
    use crate::arch_impl::{CpuOps, TimerOps};
    use crate::process::{ProcessId, ProcessState};
    use crate::syscall::{SyscallNumber, INVALID};
    use crate::trap::{Fatal, Kernel, TrapFrame, TrapKind};

    struct Machine {
        kernel: Kernel<SimPlatform>,
        frame: TrapFrame,
    }

    impl Machine {
        fn new() -> Self {
            let config = test_config();
            let kernel = Kernel::new(SimPlatform::new(&config.layout), config).unwrap();
            let frame = TrapFrame { spsr: 0x13, return_address: 0x8000, ..TrapFrame::default() };
            Self { kernel, frame }
        }

        fn try_call(&mut self, number: u32, args: [u32; 3]) -> Result<[u32; 2], Fatal> {
            self.frame.r[0] = number;
            self.frame.r[1..4].copy_from_slice(&args);
            self.frame.return_address += 4;
            self.kernel.handle_trap(TrapKind::SupervisorCall, &mut self.frame)?;
            Ok([self.frame.r[0], self.frame.r[1]])
        }

        fn call(&mut self, number: SyscallNumber, args: [u32; 3]) -> u32 {
            self.try_call(number as u32, args).unwrap()[0]
        }

        fn current(&self) -> ProcessId {
            self.kernel.scheduler().current()
        }
    }

    #[test]
    fn test_time_round_trips_through_two_registers() {
        let mut m = Machine::new();
        m.call(SyscallNumber::SetTime, [0x8000_0001, 0x2, 0]);
        assert_eq!(m.kernel.platform().wall_clock_ms(), 0x2_8000_0001);
        assert_eq!(m.try_call(SyscallNumber::GetTime as u32, [0; 3]), Ok([0x8000_0001, 0x2]));
    }

    #[test]
    fn test_nop_and_reboot() {
        let mut m = Machine::new();
        assert_eq!(m.call(SyscallNumber::Nop, [0; 3]), SyscallNumber::Nop as u32);
        m.call(SyscallNumber::Reboot, [0; 3]);
        assert_eq!(m.kernel.platform().reboots(), 1);
        assert!(!m.kernel.platform().interrupts_enabled());
    }

    #[test]
    fn test_unknown_syscall_is_fatal() {
        let mut m = Machine::new();
        assert_eq!(m.try_call(99, [0; 3]), Err(Fatal::UnknownSyscall(99)));
        assert_eq!(m.try_call(0, [0; 3]), Err(Fatal::UnknownSyscall(0)));
    }

    #[test]
    fn test_spawn_query_exit_reap() {
        let mut m = Machine::new();
        let bootstrap = m.current();
        let child = m.call(SyscallNumber::Spawn, [0x9000, 0, 0]);
        assert_eq!(m.call(SyscallNumber::QueryState, [child, 0, 0]), ProcessState::Ready.code());
        assert_eq!(m.call(SyscallNumber::QueryReturnCode, [child, 0, 0]), u32::MAX);
        assert_eq!(m.call(SyscallNumber::Reap, [child, 0, 0]), INVALID);

        // Run the child and let it exit with 42.
        assert_eq!(m.call(SyscallNumber::YieldTo, [child, 0, 0]), 0);
        assert_eq!(m.current(), ProcessId::from_raw(child));
        assert_eq!(m.frame.return_address, 0x9000);
        m.call(SyscallNumber::Exit, [42, 0, 0]);
        assert_eq!(m.current(), bootstrap);

        // The bootstrap process sees the yield_to result on resumption.
        assert_eq!(m.frame.r[0], 0);
        assert_eq!(m.call(SyscallNumber::QueryState, [child, 0, 0]), ProcessState::Terminated.code());
        assert_eq!(m.call(SyscallNumber::QueryReturnCode, [child, 0, 0]), 42);
        assert_eq!(m.call(SyscallNumber::Reap, [child, 0, 0]), 42);

        // Stale handle after the reap.
        assert_eq!(m.call(SyscallNumber::Reap, [child, 0, 0]), INVALID);
        assert_eq!(m.call(SyscallNumber::QueryState, [child, 0, 0]), INVALID);
        assert_eq!(m.call(SyscallNumber::QueryReturnCode, [child, 0, 0]) as i32, -1);
        assert_eq!(m.call(SyscallNumber::YieldTo, [child, 0, 0]), INVALID);
    }

    #[test]
    fn test_yield_passes_to_next_ready_process() {
        let mut m = Machine::new();
        let bootstrap = m.current();
        let child = m.call(SyscallNumber::Spawn, [0x9000, 0, 0]);
        m.call(SyscallNumber::Yield, [0; 3]);
        assert_eq!(m.current(), ProcessId::from_raw(child));
        m.call(SyscallNumber::Yield, [0; 3]);
        assert_eq!(m.current(), bootstrap);
        // Yield leaves the caller's registers alone.
        assert_eq!(m.frame.r[0], SyscallNumber::Yield as u32);
    }

    #[test]
    fn test_heap_calls() {
        let mut m = Machine::new();
        // The bootstrap process has no heap.
        assert_eq!(m.call(SyscallNumber::HeapAlloc, [64, 0, 0]), 0);

        let child = m.call(SyscallNumber::Spawn, [0x9000, 0, 0]);
        m.call(SyscallNumber::YieldTo, [child, 0, 0]);
        let first = m.call(SyscallNumber::HeapAlloc, [10, 0, 0]);
        let second = m.call(SyscallNumber::HeapAlloc, [10, 0, 0]);
        assert_ne!(first, 0);
        assert_eq!(second, first + 16);
        assert_eq!(m.call(SyscallNumber::HeapAlloc, [0, 0, 0]), 0);

        assert_eq!(m.call(SyscallNumber::HeapFree, [first, 0, 0]), 0);
        assert_eq!(m.call(SyscallNumber::HeapFree, [first, 0, 0]), INVALID);
        assert_eq!(m.call(SyscallNumber::HeapFree, [first + 4, 0, 0]), INVALID);
        // The freed block is reused first.
        assert_eq!(m.call(SyscallNumber::HeapAlloc, [8, 0, 0]), first);
        // The caller survives bad frees.
        assert_eq!(m.current(), ProcessId::from_raw(child));
    }

    #[test]
    fn test_fork_returns_child_handle_and_zero() {
        let mut m = Machine::new();
        assert_eq!(m.call(SyscallNumber::Fork, [0; 3]), INVALID);

        let parent = m.call(SyscallNumber::Spawn, [0x9000, 0, 0]);
        m.call(SyscallNumber::YieldTo, [parent, 0, 0]);
        let child = m.call(SyscallNumber::Fork, [0; 3]);
        assert_ne!(child, INVALID);
        assert_eq!(m.current(), ProcessId::from_raw(parent));

        // The child resumes right after the fork call, seeing 0.
        let resume = m.frame.return_address;
        m.call(SyscallNumber::YieldTo, [child, 0, 0]);
        assert_eq!(m.current(), ProcessId::from_raw(child));
        assert_eq!(m.frame.r[0], 0);
        assert_eq!(m.frame.return_address, resume);
    }

    #[test]
    fn test_forked_child_status_reaches_parent_once() {
        let mut m = Machine::new();
        let bootstrap = m.current();
        let free_before = m.kernel.vm().frames().free_frames();

        let parent = m.call(SyscallNumber::Spawn, [0x9000, 0, 0]);
        m.call(SyscallNumber::YieldTo, [parent, 0, 0]);
        assert_ne!(m.call(SyscallNumber::HeapAlloc, [5000, 0, 0]), 0);
        let child = m.call(SyscallNumber::Fork, [0; 3]);
        assert_ne!(child, INVALID);

        m.call(SyscallNumber::YieldTo, [child, 0, 0]);
        assert_eq!(m.current(), ProcessId::from_raw(child));
        assert_eq!(m.frame.r[0], 0);
        m.call(SyscallNumber::Exit, [7, 0, 0]);

        m.call(SyscallNumber::YieldTo, [parent, 0, 0]);
        assert_eq!(m.current(), ProcessId::from_raw(parent));
        assert_eq!(m.call(SyscallNumber::QueryReturnCode, [child, 0, 0]), 7);
        assert_eq!(m.call(SyscallNumber::Reap, [child, 0, 0]), 7);
        assert_eq!(m.call(SyscallNumber::Reap, [child, 0, 0]), INVALID);

        m.call(SyscallNumber::Exit, [0; 3]);
        assert_eq!(m.current(), bootstrap);
        assert_eq!(m.call(SyscallNumber::Reap, [parent, 0, 0]), 0);

        let processes = m.kernel.scheduler().processes();
        assert_eq!(processes.len(), 1);
        assert!(processes.ring_is_consistent());
        assert_eq!(m.kernel.vm().frames().free_frames(), free_before);
    }
}
