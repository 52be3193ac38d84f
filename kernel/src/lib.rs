//! Virtual memory for KidneyOS user processes: demand paging from executables
//! and memory-mapped files, stack growth, and clock eviction to a swap device.
//!
//! The scheduler, file system, block driver and hardware page tables are
//! reached through the traits in [`threading::process`], [`fs`], [`block`]
//! and [`paging`].

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod block;
pub mod fs;
pub mod mem;
pub mod paging;
pub mod sync;
pub mod threading;

pub use mem::config::VmConfig;
pub use mem::error::VmError;
pub use mem::{AddressSpace, VirtualMemory};
