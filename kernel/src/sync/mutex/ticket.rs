//! A FIFO spinlock in the style of [spin](https://docs.rs/spin/latest/spin/)'s ticket mutex.

use core::sync::atomic::{AtomicUsize, Ordering};
use core::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
};

/// A [ticket lock](https://en.wikipedia.org/wiki/Ticket_lock).
///
/// Each locker draws the next ticket and spins until it is served, so threads
/// acquire the lock in the order they asked for it.
///
/// # Example
///
/// ```
/// let lock = kidneyos_vm::sync::mutex::TicketMutex::<_>::new(0);
///
/// *lock.lock() = 1;
/// assert_eq!(*lock.lock(), 1);
/// ```
pub struct TicketMutex<T: ?Sized> {
    /// Ticket handed to the next caller of `lock`.
    dispenser: AtomicUsize,
    /// Ticket currently allowed to hold the lock.
    serving: AtomicUsize,
    data: UnsafeCell<T>,
}

/// Grants access to the protected data until dropped.
pub struct TicketMutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a TicketMutex<T>,
    ticket: usize,
}

unsafe impl<T: ?Sized + Send> Sync for TicketMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for TicketMutex<T> {}

unsafe impl<T: ?Sized + Sync> Sync for TicketMutexGuard<'_, T> {}

impl<T> TicketMutex<T> {
    #[inline(always)]
    pub const fn new(data: T) -> Self {
        Self {
            dispenser: AtomicUsize::new(0),
            serving: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> TicketMutex<T> {
    pub fn lock(&self) -> TicketMutexGuard<T> {
        let ticket = self.dispenser.fetch_add(1, Ordering::Relaxed);
        while self.serving.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }
        TicketMutexGuard { lock: self, ticket }
    }

    pub fn try_lock(&self) -> Option<TicketMutexGuard<T>> {
        // Only take a ticket if it would be served immediately.
        let serving = self.serving.load(Ordering::Acquire);
        self.dispenser
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()
            .map(|ticket| TicketMutexGuard { lock: self, ticket })
    }

    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.queued() != 0
    }

    /// Number of threads holding or waiting for the lock.
    pub fn queued(&self) -> usize {
        let dispensed = self.dispenser.load(Ordering::Relaxed);
        dispensed.wrapping_sub(self.serving.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized> fmt::Debug for TicketMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketMutex")
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Deref for TicketMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the guard's ticket is being served, so no other reference exists.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TicketMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in `deref`.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TicketMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock
            .serving
            .store(self.ticket.wrapping_add(1), Ordering::Release);
    }
}
