//! Core of a cooperative, single-core kernel: a fixed-capacity process
//! table, an aging round-robin scheduler, a bounded IPC queue, and the
//! first-fit heap that backs process stacks.
//!
//! This crate is `no_std` outside of `cargo test`: the x86_64 context-switch
//! primitive in [`arch`] is the only place assembly is involved, and it
//! touches nothing privileged except the deadlock path's `hlt`, so the rest
//! of this crate's logic — the scheduler, the process table, the IPC queue —
//! is exercised directly by real `#[test]`s on the host, not just inspected.
//!
//! What is deliberately out of scope: boot code, a UART/console driver, a
//! keyboard driver, interrupt/exception handling, and a shell. Those are
//! external collaborators a bare-metal binary built on top of this crate
//! supplies; see each module's doc comment for the corresponding interface
//! boundary.
#![cfg_attr(not(test), no_std)]

#[cfg(not(test))]
extern crate rlibc;

pub mod arch;
pub mod config;
pub mod error;
pub mod ipc;
pub mod kernel;
pub mod memory;
pub mod process;
pub mod scheduler;

pub use error::{KernelError, KernelResult};
pub use ipc::IpcQueue;
pub use kernel::Kernel;
pub use memory::{Heap, MemoryStats, StackAllocator};
pub use process::{ProcessId, ProcessSlot, ProcessState};
pub use scheduler::Scheduler;
