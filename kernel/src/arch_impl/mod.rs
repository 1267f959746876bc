//! Architecture abstraction layer.
//!
//! This module provides the hardware traits and the current architecture's
//! implementation. Code outside this module should use the traits defined
//! here rather than architecture-specific types directly.
//!
//! # Supported Architectures
//!
//! - `armv6`: Raspberry Pi 1 / Zero (ARM1176JZF-S)
//! - `sim`: simulated board used by unit tests on the build host

#[cfg(target_arch = "arm")]
pub mod armv6;
#[cfg(target_arch = "arm")]
pub use armv6 as current;

#[cfg(test)]
pub mod sim;

pub mod traits;
pub use traits::*;
