//! System call dispatcher
//!
//! Routes system calls to their handlers based on the number in r0.

use super::handlers;
use super::{SyscallNumber, SyscallResult};
use crate::arch_impl::Platform;
use crate::process::ProcessId;
use crate::trap::{Fatal, Kernel, TrapFrame};

impl<P: Platform> Kernel<P> {
    /// Run the system call described by `frame` on behalf of the current
    /// process. Unknown numbers are fatal.
    pub(crate) fn dispatch_syscall(&mut self, frame: &TrapFrame) -> Result<(), Fatal> {
        let number = frame.syscall_number();
        let Some(syscall) = SyscallNumber::from_u32(number) else {
            log::error!("Unknown system call {} from {}", number, self.scheduler.current());
            return Err(Fatal::UnknownSyscall(number));
        };

        // The handler may switch processes; results belong to the caller.
        let caller = self.scheduler.current();
        let (arg1, arg2) = (frame.arg1(), frame.arg2());
        let result = match syscall {
            SyscallNumber::Reboot => handlers::sys_reboot(self),
            SyscallNumber::Nop => Ok(SyscallResult::None),
            SyscallNumber::SetTime => handlers::sys_set_time(self, arg1, arg2),
            SyscallNumber::GetTime => handlers::sys_get_time(self),
            SyscallNumber::YieldTo => handlers::sys_yield_to(self, ProcessId::from_raw(arg1)),
            SyscallNumber::Yield => handlers::sys_yield(self),
            SyscallNumber::Exit => handlers::sys_exit(self, arg1 as i32),
            SyscallNumber::Reap => handlers::sys_reap(self, ProcessId::from_raw(arg1)),
            SyscallNumber::Spawn => handlers::sys_spawn(self, arg1, arg2 as i32),
            SyscallNumber::QueryState => handlers::sys_query_state(self, ProcessId::from_raw(arg1)),
            SyscallNumber::QueryReturnCode => handlers::sys_query_return_code(self, ProcessId::from_raw(arg1)),
            SyscallNumber::HeapAlloc => handlers::sys_heap_alloc(self, arg1),
            SyscallNumber::HeapFree => handlers::sys_heap_free(self, arg1),
            SyscallNumber::Fork => handlers::sys_fork(self),
        }?;

        if let Some(process) = self.scheduler.process_mut(caller) {
            result.store(&mut process.context);
        }
        Ok(())
    }
}
