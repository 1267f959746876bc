//! Process management
//!
//! This module holds the process control block, the process table the
//! scheduler's ring lives in, and process creation (spawn and fork).
//! Scheduling decisions themselves are made in [`crate::task::scheduler`].

use core::fmt;

use crate::memory::page_table::MapError;

pub mod creation;
pub mod fork;
pub mod process;
pub mod table;

pub use process::{
    niceness_to_weight, AddressSpace, Process, ProcessId, ProcessState, SavedContext, StackRegion,
    NOT_EXITED, USER_MODE_STATUS,
};
pub use table::ProcessTable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessError {
    /// The handle names no live process.
    NoSuchProcess(ProcessId),
    /// The process has not exited yet.
    NotTerminated(ProcessId),
    /// The process cannot be switched to.
    NotReady(ProcessId),
    /// The calling process has no private address space to work with.
    NoAddressSpace,
    TableFull,
    OutOfMemory(MapError),
}

impl From<MapError> for ProcessError {
    fn from(err: MapError) -> Self {
        Self::OutOfMemory(err)
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchProcess(id) => write!(f, "no process {}", id),
            Self::NotTerminated(id) => write!(f, "process {} is still alive", id),
            Self::NotReady(id) => write!(f, "process {} is not ready", id),
            Self::NoAddressSpace => write!(f, "caller has no private address space"),
            Self::TableFull => write!(f, "process table is full"),
            Self::OutOfMemory(err) => write!(f, "out of memory: {}", err),
        }
    }
}
