#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod bit_array;
pub mod mem;
pub mod paging;
pub mod sizes;
