//! A lock that remembers which process holds it.
//!
//! The file system is not re-entrant, so every call into it goes through one
//! [`HolderLock`]. A process that already holds the lock (because a page fault
//! arrived in the middle of a file system call, say) passes straight through
//! instead of deadlocking on itself.

use super::{Mutex, MutexGuard};
use crate::threading::process::{AtomicPid, Pid};
use core::sync::atomic::Ordering;

/// No process holds the lock. Process ids start at 1.
const NO_HOLDER: Pid = 0;

pub struct HolderLock {
    holder: AtomicPid,
    inner: Mutex<()>,
}

/// Releases the lock on drop, but only if this guard was the one that took it.
pub struct HolderLockGuard<'a> {
    lock: &'a HolderLock,
    inner: Option<MutexGuard<'a, ()>>,
}

impl HolderLock {
    pub const fn new() -> Self {
        Self {
            holder: AtomicPid::new(NO_HOLDER),
            inner: Mutex::new(()),
        }
    }

    /// Takes the lock on behalf of `who`, or passes through if `who` already
    /// holds it.
    pub fn acquire(&self, who: Pid) -> HolderLockGuard {
        if self.held_by(who) {
            return HolderLockGuard {
                lock: self,
                inner: None,
            };
        }

        let guard = self.inner.lock();
        self.holder.store(who, Ordering::Release);
        HolderLockGuard {
            lock: self,
            inner: Some(guard),
        }
    }

    /// Like [`HolderLock::acquire`], but gives up instead of waiting for
    /// another process.
    pub fn try_acquire(&self, who: Pid) -> Option<HolderLockGuard> {
        if self.held_by(who) {
            return Some(HolderLockGuard {
                lock: self,
                inner: None,
            });
        }

        let guard = self.inner.try_lock()?;
        self.holder.store(who, Ordering::Release);
        Some(HolderLockGuard {
            lock: self,
            inner: Some(guard),
        })
    }

    pub fn held_by(&self, who: Pid) -> bool {
        who != NO_HOLDER && self.holder.load(Ordering::Acquire) == who
    }

    pub fn holder(&self) -> Option<Pid> {
        match self.holder.load(Ordering::Acquire) {
            NO_HOLDER => None,
            pid => Some(pid),
        }
    }
}

impl Default for HolderLock {
    fn default() -> Self {
        Self::new()
    }
}

impl HolderLockGuard<'_> {
    /// Whether this guard took the lock, as opposed to re-entering it.
    pub fn is_outermost(&self) -> bool {
        self.inner.is_some()
    }
}

impl Drop for HolderLockGuard<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.inner.take() {
            self.lock.holder.store(NO_HOLDER, Ordering::Release);
            drop(guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HolderLock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reentrant_for_the_holder() {
        let lock = HolderLock::new();
        let outer = lock.acquire(3);
        assert!(outer.is_outermost());
        assert!(lock.held_by(3));
        {
            let inner = lock.acquire(3);
            assert!(!inner.is_outermost());
        }
        // The nested guard must not have released the lock.
        assert_eq!(lock.holder(), Some(3));
        drop(outer);
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn try_acquire_never_waits() {
        let lock = HolderLock::new();
        let guard = lock.acquire(1);
        assert!(lock.try_acquire(2).is_none());
        assert!(lock.try_acquire(1).is_some_and(|nested| !nested.is_outermost()));
        assert_eq!(lock.holder(), Some(1));
        drop(guard);

        let taken = lock.try_acquire(2).expect("lock is free");
        assert!(taken.is_outermost());
        assert!(lock.held_by(2));
    }

    #[test]
    fn other_process_waits() {
        let lock = Arc::new(HolderLock::new());
        let entered = Arc::new(AtomicBool::new(false));
        let guard = lock.acquire(1);

        let waiter = {
            let lock = Arc::clone(&lock);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let _guard = lock.acquire(2);
                entered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!entered.load(Ordering::SeqCst));
        drop(guard);
        waiter.join().expect("waiter panicked");
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(lock.holder(), None);
    }
}
