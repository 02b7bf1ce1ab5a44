//! Compile-time tunables for the scheduler, process table, and IPC queue.
//!
//! These mirror the "reference design" numbers called out in the upstream
//! design: an 8-slot process table, a 4 KiB default stack, a 16-entry IPC
//! ring, and an aging threshold of 3 scheduling events before a process is
//! boosted to the head of the ready queue. None of these are meant to be
//! runtime-configurable; the one genuinely runtime-tunable value (the
//! scheduling quantum) stays a `Scheduler` field, set via
//! `Scheduler::set_time_quantum`.

/// Maximum number of live process descriptors.
pub const MAX_PROCESSES: usize = 8;

/// Stack size requested by `ProcessTable::create` when the caller passes 0.
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// Capacity of an `IpcQueue` ring buffer.
pub const IPC_QUEUE_CAPACITY: usize = 16;

/// Number of scheduling events a ready process waits before it is boosted
/// to the head of the ready queue on its next insertion.
pub const AGING_THRESHOLD: u32 = 3;

/// Minimum permitted value for the scheduler's time quantum.
pub const MIN_TIME_QUANTUM: u32 = 1;

/// Size in bytes of the static arena [`crate::memory::Heap`] carves process
/// stacks out of.
pub const HEAP_SIZE: usize = 64 * 1024;

/// Byte alignment every block handed out by [`crate::memory::Heap`] honors.
pub const HEAP_ALIGNMENT: usize = 16;
