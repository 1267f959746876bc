//! Trap dispatch.
//!
//! Every entry into the kernel after boot (supervisor call, timer interrupt,
//! data abort) goes through [`Kernel::handle_trap`]:
//!
//! 1. interrupts are masked;
//! 2. the interrupted registers are saved into the current process;
//! 3. the kernel table is activated;
//! 4. the trap is handled, possibly changing the current process;
//! 5. the current process's table is activated;
//! 6. its saved registers are loaded into the frame, with IRQs unmasked in
//!    the status register the trap returns with.
//!
//! Unrecoverable conditions come back as [`Fatal`]; the architecture entry
//! logs them and halts.

use core::fmt;

pub mod frame;

pub use frame::TrapFrame;

use crate::arch_impl::Platform;
use crate::memory::layout::{log_layout, MemoryLayout};
use crate::memory::page_table::{MapError, PageTableManager};
use crate::memory::VirtAddr;
use crate::platform_config::KernelConfig;
use crate::task::Scheduler;
use frame::IRQ_DISABLE;

/// Exit status of a process killed by a data abort.
pub const FAULT_EXIT_STATUS: i32 = -11;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TrapKind {
    SupervisorCall = 0,
    Timer = 1,
    DataAbort = 2,
}

impl TrapKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::SupervisorCall),
            1 => Some(Self::Timer),
            2 => Some(Self::DataAbort),
            _ => None,
        }
    }

    /// Distance between the trap link register and the resume address.
    fn return_adjustment(self) -> u32 {
        match self {
            Self::SupervisorCall => 0,
            Self::Timer => 4,
            Self::DataAbort => 8,
        }
    }
}

/// Conditions the kernel cannot recover from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fatal {
    Memory(MapError),
    UnknownSyscall(u32),
    NoRunnableProcess,
    /// Data abort in kernel code.
    KernelFault(VirtAddr),
    InvalidLayout(&'static str),
}

impl From<MapError> for Fatal {
    fn from(err: MapError) -> Self {
        Self::Memory(err)
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(err) => write!(f, "memory exhausted: {}", err),
            Self::UnknownSyscall(number) => write!(f, "unknown system call {}", number),
            Self::NoRunnableProcess => write!(f, "no runnable process"),
            Self::KernelFault(addr) => write!(f, "kernel data abort at {}", addr),
            Self::InvalidLayout(reason) => write!(f, "invalid memory layout: {}", reason),
        }
    }
}

/// The kernel core: the board, the page table manager and the scheduler.
pub struct Kernel<P: Platform> {
    pub(crate) platform: P,
    pub(crate) vm: PageTableManager,
    pub(crate) scheduler: Scheduler,
}

impl<P: Platform> Kernel<P> {
    /// Build the kernel table, activate it, and make the caller the bootstrap process.
    pub fn new(mut platform: P, config: KernelConfig) -> Result<Self, Fatal> {
        config.layout.validate().map_err(Fatal::InvalidLayout)?;
        log_layout(&config.layout);

        let framebuffer = platform.framebuffer();
        let vm = PageTableManager::new(&mut platform, config.layout, framebuffer)?;
        let scheduler = Scheduler::init(&vm, &mut platform, &config);
        Ok(Self { platform, vm, scheduler })
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn vm(&self) -> &PageTableManager {
        &self.vm
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn layout(&self) -> &MemoryLayout {
        self.vm.layout()
    }

    /// Handle one trap. On return `frame` holds the state to resume.
    pub fn handle_trap(&mut self, kind: TrapKind, frame: &mut TrapFrame) -> Result<(), Fatal> {
        self.platform.disable_interrupts();

        if let Some(process) = self.scheduler.current_process_mut() {
            process.context = frame.to_context(kind.return_adjustment());
        }
        self.vm.activate(&mut self.platform, None);

        match kind {
            TrapKind::Timer => {
                log::trace!("Timer tick in {}", self.scheduler.current());
                self.scheduler.elect(&mut self.platform)?
            }
            TrapKind::SupervisorCall => self.dispatch_syscall(frame)?,
            TrapKind::DataAbort => self.handle_data_abort(frame)?,
        }

        let Kernel { platform, vm, scheduler } = self;
        let Some(process) = scheduler.current_process() else {
            return Err(Fatal::NoRunnableProcess);
        };
        vm.activate(platform, process.address_space.table());
        frame.load_context(&process.context);
        frame.spsr &= !IRQ_DISABLE;
        Ok(())
    }

    fn handle_data_abort(&mut self, frame: &TrapFrame) -> Result<(), Fatal> {
        let address = self.platform.fault_address();
        if !frame.is_from_user() {
            log::error!("Data abort in kernel mode at {} (pc={:#010x})", address, frame.return_address);
            return Err(Fatal::KernelFault(address));
        }
        log::warn!(
            "Process {} faulted at {} (pc={:#010x}); terminating",
            self.scheduler.current(),
            address,
            frame.return_address.wrapping_sub(8)
        );
        self.scheduler.exit(&mut self.vm, &mut self.platform, FAULT_EXIT_STATUS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch_impl::sim::{test_config, SimPlatform};
    use crate::arch_impl::{CpuOps, MmuOps};
    use crate::memory::page_table::walk;
    use crate::memory::{Page, PhysAddr, Region};
    use crate::process::{ProcessId, ProcessState};
    use crate::syscall::SyscallNumber;

    fn kernel() -> Kernel<SimPlatform> {
        let config = test_config();
        Kernel::new(SimPlatform::new(&config.layout), config).unwrap()
    }

    fn syscall(kernel: &mut Kernel<SimPlatform>, frame: &mut TrapFrame, number: SyscallNumber, args: [u32; 3]) -> u32 {
        frame.r[0] = number as u32;
        frame.r[1..4].copy_from_slice(&args);
        frame.return_address += 4;
        kernel.handle_trap(TrapKind::SupervisorCall, frame).unwrap();
        frame.r[0]
    }

    #[test]
    fn test_new_rejects_bad_layout() {
        let mut config = test_config();
        config.layout.user_start = VirtAddr::new(0x1000);
        let result = Kernel::new(SimPlatform::new(&config.layout), config);
        assert!(matches!(result, Err(Fatal::InvalidLayout(_))));
    }

    #[test]
    fn test_timer_trap_switches_process_and_tables() {
        let mut kernel = kernel();
        let mut frame = TrapFrame { spsr: 0x13, return_address: 0x0000_8204, ..TrapFrame::default() };
        let child = syscall(&mut kernel, &mut frame, SyscallNumber::Spawn, [0x9000, 0, 0]);
        let switches = kernel.platform().table_switches();

        frame.return_address = 0x0000_8304;
        kernel.handle_trap(TrapKind::Timer, &mut frame).unwrap();
        assert_eq!(kernel.platform().table_switches(), switches + 1);

        let child = ProcessId::from_raw(child);
        assert_eq!(kernel.scheduler().current(), child);
        assert_eq!(frame.return_address, 0x9000);
        assert_eq!(frame.spsr & 0x1F, 0x10);
        assert_eq!(frame.spsr & IRQ_DISABLE, 0);
        let table = kernel.scheduler().process(child).unwrap().address_space.table().unwrap().root();
        assert_eq!(kernel.platform().active_translation_table(), table);

        // The bootstrap process resumes where the timer interrupted it.
        kernel.handle_trap(TrapKind::Timer, &mut frame).unwrap();
        assert_eq!(frame.return_address, 0x0000_8300);
        assert_eq!(kernel.platform().active_translation_table(), kernel.vm().kernel_root());
        assert_eq!(kernel.platform().table_switches(), switches + 2);
    }

    #[test]
    fn test_framebuffer_is_pinned_and_shared_with_processes() {
        let plain = kernel();
        let config = test_config();
        let framebuffer = Region::new(PhysAddr::new(0x0070_0000), 0x1_0000);
        let platform = SimPlatform::new(&config.layout).with_framebuffer(framebuffer);
        let mut kernel = Kernel::new(platform, config).unwrap();

        assert_eq!(kernel.vm().frames().free_frames(), plain.vm().frames().free_frames() - 16);
        assert!(!kernel.vm().is_private(Page::from_number(0x700)));
        let pixel = VirtAddr::new(0x0070_0010);
        assert_eq!(
            walk(kernel.platform(), kernel.vm().kernel_root(), pixel),
            Ok(PhysAddr::new(0x0070_0010))
        );

        let mut frame = TrapFrame { spsr: 0x13, ..TrapFrame::default() };
        let raw = syscall(&mut kernel, &mut frame, SyscallNumber::Spawn, [0x9000, 0, 0]);
        let child = kernel.scheduler().process(ProcessId::from_raw(raw)).unwrap();
        let root = child.address_space.table().unwrap().root();
        assert_eq!(walk(kernel.platform(), root, pixel), Ok(PhysAddr::new(0x0070_0010)));
    }

    #[test]
    fn test_trap_masks_interrupts_and_unmasks_on_return() {
        let mut kernel = kernel();
        let mut frame = TrapFrame { spsr: 0x13 | IRQ_DISABLE, ..TrapFrame::default() };
        kernel.handle_trap(TrapKind::Timer, &mut frame).unwrap();
        assert_eq!(kernel.platform().interrupt_disables(), 1);
        assert!(!kernel.platform().interrupts_enabled());
        assert_eq!(frame.spsr & IRQ_DISABLE, 0);
    }

    #[test]
    fn test_user_data_abort_terminates_process() {
        let mut kernel = kernel();
        let mut frame = TrapFrame { spsr: 0x13, ..TrapFrame::default() };
        let raw = syscall(&mut kernel, &mut frame, SyscallNumber::Spawn, [0x9000, 0, 0]);
        let child = ProcessId::from_raw(raw);
        syscall(&mut kernel, &mut frame, SyscallNumber::YieldTo, [raw, 0, 0]);
        assert_eq!(kernel.scheduler().current(), child);

        kernel.platform_mut().set_fault_address(VirtAddr::new(0xdead_0000));
        frame.return_address = 0x9010;
        kernel.handle_trap(TrapKind::DataAbort, &mut frame).unwrap();

        let process = kernel.scheduler().process(child).unwrap();
        assert_eq!(process.state, ProcessState::Terminated);
        assert_eq!(process.return_code, FAULT_EXIT_STATUS);
        assert_ne!(kernel.scheduler().current(), child);
    }

    #[test]
    fn test_kernel_data_abort_is_fatal() {
        let mut kernel = kernel();
        kernel.platform_mut().set_fault_address(VirtAddr::new(0x10));
        let mut frame = TrapFrame { spsr: 0x13, ..TrapFrame::default() };
        assert_eq!(
            kernel.handle_trap(TrapKind::DataAbort, &mut frame),
            Err(Fatal::KernelFault(VirtAddr::new(0x10)))
        );
    }

    #[test]
    fn test_weighted_fairness_over_timer_traps() {
        let mut kernel = kernel();
        let mut frame = TrapFrame { spsr: 0x13, ..TrapFrame::default() };
        // Weights 1 (bootstrap), 11 and 21.
        let a = syscall(&mut kernel, &mut frame, SyscallNumber::Spawn, [0x9000, 10, 0]);
        let b = syscall(&mut kernel, &mut frame, SyscallNumber::Spawn, [0x9000, 0, 0]);
        let (a, b) = (ProcessId::from_raw(a), ProcessId::from_raw(b));
        let bootstrap = kernel.scheduler().current();

        let mut ticks = [0u32; 3];
        for _ in 0..30 {
            kernel.handle_trap(TrapKind::Timer, &mut frame).unwrap();
            let armed = *kernel.platform().armed_ticks().last().unwrap();
            let current = kernel.scheduler().current();
            let slot = if current == bootstrap { 0 } else if current == a { 1 } else { 2 };
            assert!(current == bootstrap || current == a || current == b);
            ticks[slot] += armed;
        }
        // Every process ran 10 times; shares follow the weights (50*w/33).
        assert_eq!(ticks, [10 * 1, 10 * 16, 10 * 31]);
        assert!(kernel.scheduler().processes().ring_is_consistent());
    }
}
