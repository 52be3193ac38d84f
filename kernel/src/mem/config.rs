use kidneyos_shared::mem::{MAX_STACK_SIZE, OFFSET, STACK_SLOP};

/// Runtime parameters of the virtual memory system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// First address past user space. Must be page aligned.
    pub user_top: usize,
    /// How far below `user_top` the stack may grow.
    pub max_stack_size: usize,
    /// If set, a fault in the stack region only grows the stack when it lies
    /// at most this far below the stack pointer. `PUSHA` touches 32 bytes
    /// below `esp` before moving it. Unset, any fault in the region grows it.
    pub stack_slop: Option<usize>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_top: OFFSET,
            max_stack_size: MAX_STACK_SIZE,
            stack_slop: None,
        }
    }
}

impl VmConfig {
    pub const fn with_user_top(self, user_top: usize) -> Self {
        Self { user_top, ..self }
    }

    pub const fn with_max_stack_size(self, max_stack_size: usize) -> Self {
        Self {
            max_stack_size,
            ..self
        }
    }

    pub const fn with_stack_slop(self, stack_slop: usize) -> Self {
        Self {
            stack_slop: Some(stack_slop),
            ..self
        }
    }

    /// Limits stack growth to faults within [`STACK_SLOP`] of the stack
    /// pointer.
    pub const fn with_pusha_slop(self) -> Self {
        self.with_stack_slop(STACK_SLOP)
    }

    /// Lowest address the stack may grow down to.
    pub const fn stack_floor(&self) -> usize {
        self.user_top.saturating_sub(self.max_stack_size)
    }
}
