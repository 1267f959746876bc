//! Scheduling.

pub mod scheduler;

pub use scheduler::Scheduler;
