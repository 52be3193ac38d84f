//! The file system as seen by the memory manager.
//!
//! The file system underneath has no concurrency control of its own, so every
//! call goes through [`SerialFs`], which holds one global lock for the
//! duration of a session.

use crate::sync::mutex::{HolderLock, HolderLockGuard};
use crate::threading::process::Pid;
use alloc::sync::Arc;
use core::fmt;

/// An open file, as handed out by the file system.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileHandle(pub u32);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

pub trait FileSystem: Send + Sync {
    fn open(&self, name: &str) -> Option<FileHandle>;
    /// Opens a new handle on the same file. Closing either handle leaves the
    /// other usable.
    fn reopen(&self, file: FileHandle) -> Option<FileHandle>;
    /// Reads up to `buf.len()` bytes at `offset`, returning the number read.
    fn read_at(&self, file: FileHandle, buf: &mut [u8], offset: usize) -> usize;
    /// Writes up to `buf.len()` bytes at `offset`, returning the number written.
    fn write_at(&self, file: FileHandle, buf: &[u8], offset: usize) -> usize;
    fn length(&self, file: FileHandle) -> usize;
    fn close(&self, file: FileHandle);
}

/// Serializes every access to a [`FileSystem`].
pub struct SerialFs {
    fs: Arc<dyn FileSystem>,
    lock: HolderLock,
}

/// Access to the file system while holding the global lock.
pub struct FsSession<'a> {
    fs: &'a dyn FileSystem,
    _guard: HolderLockGuard<'a>,
}

impl SerialFs {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            lock: HolderLock::new(),
        }
    }

    /// Starts a session on behalf of `who`. If `who` already holds the lock
    /// further up its call stack the session shares it.
    pub fn enter(&self, who: Pid) -> FsSession {
        FsSession {
            fs: self.fs.as_ref(),
            _guard: self.lock.acquire(who),
        }
    }

    /// Starts a session only if the lock is free or already held by `who`.
    pub fn try_enter(&self, who: Pid) -> Option<FsSession> {
        Some(FsSession {
            fs: self.fs.as_ref(),
            _guard: self.lock.try_acquire(who)?,
        })
    }

    pub fn held_by(&self, who: Pid) -> bool {
        self.lock.held_by(who)
    }
}

impl FsSession<'_> {
    pub fn open(&self, name: &str) -> Option<FileHandle> {
        self.fs.open(name)
    }

    pub fn reopen(&self, file: FileHandle) -> Option<FileHandle> {
        self.fs.reopen(file)
    }

    pub fn read_at(&self, file: FileHandle, buf: &mut [u8], offset: usize) -> usize {
        self.fs.read_at(file, buf, offset)
    }

    pub fn write_at(&self, file: FileHandle, buf: &[u8], offset: usize) -> usize {
        self.fs.write_at(file, buf, offset)
    }

    pub fn length(&self, file: FileHandle) -> usize {
        self.fs.length(file)
    }

    pub fn close(&self, file: FileHandle) {
        self.fs.close(file)
    }
}


#[cfg(test)]
mod tests {
    use super::test::MemFs;
    use super::*;

    #[test]
    fn session_holds_the_lock() {
        let memfs = Arc::new(MemFs::new());
        memfs.create("a", b"hello");
        let fs = SerialFs::new(memfs.clone());

        let session = fs.enter(4);
        assert!(fs.held_by(4));
        let file = session.open("a").unwrap();
        {
            // A nested session for the same process does not deadlock.
            let nested = fs.enter(4);
            let mut buf = [0; 5];
            assert_eq!(nested.read_at(file, &mut buf, 0), 5);
            assert_eq!(&buf, b"hello");
        }
        assert!(fs.held_by(4));
        session.close(file);
        drop(session);

        assert!(!fs.held_by(4));
        assert_eq!(memfs.open_handles(), 0);
    }

    #[test]
    fn reopened_handle_outlives_original() {
        let memfs = Arc::new(MemFs::new());
        memfs.create("a", b"abc");
        let fs = SerialFs::new(memfs.clone());
        let session = fs.enter(1);

        let file = session.open("a").unwrap();
        let copy = session.reopen(file).unwrap();
        session.close(file);
        assert_eq!(session.length(copy), 3);
        assert_eq!(session.write_at(copy, b"X", 1), 1);
        assert_eq!(memfs.contents("a"), b"aXc");
        assert_eq!(memfs.write_calls("a"), 1);
    }
}
