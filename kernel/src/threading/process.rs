use alloc::{string::String, vec::Vec};
use core::sync::atomic::AtomicU16;

pub type Pid = u16;
pub type AtomicPid = AtomicU16;

/// What the memory manager needs to know about processes. Implemented by the
/// scheduler.
pub trait ProcessDirectory: Send + Sync {
    /// The process whose context is currently executing.
    fn current_process(&self) -> Pid;
    fn process_name(&self, pid: Pid) -> Option<String>;
    fn live_processes(&self) -> Vec<Pid>;
    /// Ends `pid` with exit code `status`. The address space has already been
    /// torn down when this is called.
    fn terminate(&self, pid: Pid, status: i32);
}
