//! System call interface
//!
//! User code issues `svc #0` with the operation code in r0 and arguments in
//! r1..r3. Results come back in r0 (and r1 for GET_TIME), written into the
//! caller's saved registers so they are delivered whenever the caller is
//! next resumed.

pub(crate) mod dispatcher;
pub mod handlers;

use crate::process::SavedContext;

/// Sentinel returned for rejected handles, status codes and operations.
pub const INVALID: u32 = u32::MAX;

/// System call numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallNumber {
    Reboot = 1,
    Nop = 2,
    SetTime = 3,
    GetTime = 4,
    YieldTo = 5,
    Yield = 6,
    Exit = 7,
    Reap = 8,
    Spawn = 9,
    QueryState = 10,
    QueryReturnCode = 11,
    HeapAlloc = 12,
    HeapFree = 13,
    Fork = 14,
}

impl SyscallNumber {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Reboot),
            2 => Some(Self::Nop),
            3 => Some(Self::SetTime),
            4 => Some(Self::GetTime),
            5 => Some(Self::YieldTo),
            6 => Some(Self::Yield),
            7 => Some(Self::Exit),
            8 => Some(Self::Reap),
            9 => Some(Self::Spawn),
            10 => Some(Self::QueryState),
            11 => Some(Self::QueryReturnCode),
            12 => Some(Self::HeapAlloc),
            13 => Some(Self::HeapFree),
            14 => Some(Self::Fork),
            _ => None,
        }
    }
}

/// What a system call hands back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    /// The caller's registers are left as they were.
    None,
    Value(u32),
    Pair(u32, u32),
}

impl SyscallResult {
    /// Write the result into a caller's saved registers.
    pub fn store(self, context: &mut SavedContext) {
        match self {
            Self::None => {}
            Self::Value(value) => context.registers[0] = value,
            Self::Pair(low, high) => {
                context.registers[0] = low;
                context.registers[1] = high;
            }
        }
    }
}
