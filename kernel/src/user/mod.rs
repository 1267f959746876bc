//! User-side system call wrappers
//!
//! [`Syscalls`] turns each kernel operation into a typed call over a
//! [`SyscallAbi`], the raw trap mechanism. On the board that is
//! [`SvcAbi`]: operation code in r0, arguments in r1..r3, results in r0/r1.

use core::fmt;

use crate::memory::VirtAddr;
use crate::process::{ProcessId, ProcessState, NOT_EXITED};
use crate::syscall::{SyscallNumber, INVALID};

/// Raw trap into the kernel.
pub trait SyscallAbi {
    /// Issue `number` with `args` in r1..r3; returns r0 and r1 afterwards.
    fn syscall(&mut self, number: SyscallNumber, args: [u32; 3]) -> (u32, u32);
}

/// `svc #0` on the ARM1176.
#[cfg(target_arch = "arm")]
pub struct SvcAbi;

#[cfg(target_arch = "arm")]
impl SyscallAbi for SvcAbi {
    #[inline(always)]
    fn syscall(&mut self, number: SyscallNumber, args: [u32; 3]) -> (u32, u32) {
        let r0: u32;
        let r1: u32;
        // SAFETY: the kernel restores every register except the result
        // registers r0 and r1 before returning.
        unsafe {
            core::arch::asm!(
                "svc #0",
                inlateout("r0") number as u32 => r0,
                inlateout("r1") args[0] => r1,
                in("r2") args[1],
                in("r3") args[2],
                options(nostack),
            );
        }
        (r0, r1)
    }
}

/// Which side of a fork the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    Parent(ProcessId),
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapError {
    /// The handle names no live process (never existed or already reaped).
    NoSuchProcess(ProcessId),
    /// The process has not exited yet.
    NotTerminated(ProcessId),
    /// Someone else reaped the process between observing its exit and reaping it.
    AlreadyReaped(ProcessId),
}

impl fmt::Display for ReapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchProcess(id) => write!(f, "no process {}", id),
            Self::NotTerminated(id) => write!(f, "process {} is still running", id),
            Self::AlreadyReaped(id) => write!(f, "process {} was reaped by another waiter", id),
        }
    }
}

/// Typed system calls.
pub struct Syscalls<A: SyscallAbi> {
    abi: A,
}

impl<A: SyscallAbi> Syscalls<A> {
    pub const fn new(abi: A) -> Self {
        Self { abi }
    }

    pub fn abi(&self) -> &A {
        &self.abi
    }

    pub fn abi_mut(&mut self) -> &mut A {
        &mut self.abi
    }

    fn call(&mut self, number: SyscallNumber, args: [u32; 3]) -> u32 {
        self.abi.syscall(number, args).0
    }

    pub fn reboot(&mut self) {
        self.call(SyscallNumber::Reboot, [0; 3]);
    }

    pub fn nop(&mut self) {
        self.call(SyscallNumber::Nop, [0; 3]);
    }

    pub fn set_time(&mut self, ms: u64) {
        self.call(SyscallNumber::SetTime, [ms as u32, (ms >> 32) as u32, 0]);
    }

    /// Wall clock in milliseconds.
    pub fn get_time(&mut self) -> u64 {
        let (low, high) = self.abi.syscall(SyscallNumber::GetTime, [0; 3]);
        (high as u64) << 32 | low as u64
    }

    /// Hand the processor to `target`. Returns false if it cannot run.
    pub fn yield_to(&mut self, target: ProcessId) -> bool {
        self.call(SyscallNumber::YieldTo, [target.as_u32(), 0, 0]) != INVALID
    }

    pub fn yield_now(&mut self) {
        self.call(SyscallNumber::Yield, [0; 3]);
    }

    /// Terminate the caller. On the board this does not return.
    pub fn exit(&mut self, status: i32) {
        self.call(SyscallNumber::Exit, [status as u32, 0, 0]);
    }

    /// Remove a terminated process and return its exit status.
    ///
    /// The raw call answers a refusal with `u32::MAX`, which is also how an
    /// exit status of -1 comes back, so the state is checked on both sides.
    pub fn reap(&mut self, target: ProcessId) -> Result<i32, ReapError> {
        match self.query_state(target) {
            None => return Err(ReapError::NoSuchProcess(target)),
            Some(ProcessState::Terminated) => {}
            Some(_) => return Err(ReapError::NotTerminated(target)),
        }
        let status = self.query_return_code(target);
        match self.call(SyscallNumber::Reap, [target.as_u32(), 0, 0]) {
            INVALID if status == NOT_EXITED && self.query_state(target).is_none() => Ok(status),
            INVALID => Err(ReapError::AlreadyReaped(target)),
            reaped if reaped as i32 == status => Ok(status),
            _ => Err(ReapError::AlreadyReaped(target)),
        }
    }

    pub fn spawn(&mut self, entry: VirtAddr, niceness: i32) -> Option<ProcessId> {
        match self.call(SyscallNumber::Spawn, [entry.as_u32(), niceness as u32, 0]) {
            INVALID => None,
            raw => Some(ProcessId::from_raw(raw)),
        }
    }

    pub fn query_state(&mut self, target: ProcessId) -> Option<ProcessState> {
        ProcessState::from_code(self.call(SyscallNumber::QueryState, [target.as_u32(), 0, 0]))
    }

    /// Exit status of `target`; -1 while it runs or for a stale handle.
    pub fn query_return_code(&mut self, target: ProcessId) -> i32 {
        self.call(SyscallNumber::QueryReturnCode, [target.as_u32(), 0, 0]) as i32
    }

    pub fn heap_alloc(&mut self, size: u32) -> Option<VirtAddr> {
        match self.call(SyscallNumber::HeapAlloc, [size, 0, 0]) {
            0 => None,
            address => Some(VirtAddr::new(address)),
        }
    }

    /// Returns false if `address` starts no allocated block.
    pub fn heap_free(&mut self, address: VirtAddr) -> bool {
        self.call(SyscallNumber::HeapFree, [address.as_u32(), 0, 0]) != INVALID
    }

    pub fn fork(&mut self) -> Option<Fork> {
        match self.call(SyscallNumber::Fork, [0; 3]) {
            0 => Some(Fork::Child),
            INVALID => None,
            raw => Some(Fork::Parent(ProcessId::from_raw(raw))),
        }
    }

    /// Wait for `target` to exit, then reap it and return its status.
    ///
    /// Spins cooperatively, giving up the processor on every iteration.
    pub fn wait(&mut self, target: ProcessId) -> Result<i32, ReapError> {
        loop {
            match self.query_state(target) {
                None => return Err(ReapError::NoSuchProcess(target)),
                Some(ProcessState::Terminated) => break,
                Some(_) => self.yield_now(),
            }
        }
        self.reap(target)
    }
}
