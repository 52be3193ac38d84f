//! Checks on pointers handed in by user programs.
//!
//! These only check that a range lies in user space. Whether the pages are
//! present is settled by the page fault handler when the kernel touches them.

use super::VirtualMemory;
use crate::mem::error::{Result, VmError};
use core::mem::size_of;

impl VirtualMemory {
    /// Checks that `count` bytes starting at `ptr` are non-null user
    /// addresses.
    pub fn check_user_range(&self, ptr: usize, count: usize) -> Result<()> {
        if ptr == 0 {
            return Err(VmError::InvalidAccess { addr: ptr });
        }
        let Some(end) = ptr.checked_add(count) else {
            return Err(VmError::InvalidAccess { addr: ptr });
        };
        if ptr >= self.config.user_top || end > self.config.user_top {
            return Err(VmError::InvalidAccess { addr: ptr });
        }
        Ok(())
    }

    /// Checks that a `T` at `ptr` would lie in user space.
    pub fn check_user_pointer<T>(&self, ptr: *const T) -> Result<()> {
        self.check_user_range(ptr as usize, size_of::<T>())
    }
}
