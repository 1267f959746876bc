//! pikern: process and memory core of a Raspberry Pi (ARMv6) kernel.
//!
//! The board support lives in [`arch_impl`]; everything else is generic over
//! [`arch_impl::Platform`] and is unit-tested on the build host against a
//! simulated board.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch_impl;
pub mod logger;
pub mod memory;
pub mod platform_config;
pub mod process;
pub mod serial;
pub mod syscall;
pub mod task;
pub mod trap;
pub mod user;

pub use trap::{Fatal, Kernel};
