//! Error surface for the kernel core.
//!
//! The system this core is modeled on signals failures as raw sentinels (a
//! null handle from `process_create`, `-1` from `ipc_send`/`ipc_recv`).
//! Here they are typed instead, in the same hand-rolled-`Display` style the
//! rest of this codebase uses for its own error enums.
//!
//! `DEADLOCK` is deliberately not a variant: per the scheduler contract it
//! is terminal and is never returned to a caller. See
//! [`crate::scheduler::Scheduler::block_current`] and
//! [`crate::scheduler::Scheduler::exit_current`].

use core::fmt;

/// Recoverable failures surfaced by the process table and IPC queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// `process_create` found no `UNUSED`/`TERMINATED` slot to reuse.
    NoSlot,
    /// The stack allocator could not satisfy the requested size.
    NoMemory,
    /// A required pointer/handle argument was null (queue, out-pointer).
    ///
    /// Never constructed by this crate's own API: every queue and out-pointer
    /// here is a Rust reference, not a raw pointer, so the null case this
    /// variant names is unrepresentable at the call sites that would raise
    /// it. Kept anyway for parity with the upstream error catalog — a
    /// downstream embedder wiring raw FFI handles onto this API has somewhere
    /// to report that failure instead of inventing its own error type.
    NullArgument,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::NoSlot => write!(f, "process table has no free slot"),
            KernelError::NoMemory => write!(f, "stack allocation failed"),
            KernelError::NullArgument => write!(f, "null argument"),
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
