//! Fixed-capacity process table.
//!
//! A process descriptor lives in a slot of a flat array, never behind a
//! heap allocation. [`ProcessId`] is a monotonically increasing identifier
//! assigned at creation — stable for a process's whole life but distinct
//! from its slot index, so a stale id a caller held onto after a process
//! exited can never silently refer to a different process that later
//! reused the same slot. A process's place in the ready queue or an IPC
//! waiter list is an index stored in its own [`ProcessSlot::next`] field
//! rather than a pointer into a separately-allocated list node.
//!
//! [`crate::scheduler`] and [`crate::ipc`] are the ones that actually link
//! slots into queues; they do so by slot index (the same currency the
//! system this is modeled on uses its raw descriptor pointers for), not by
//! [`ProcessId`]. Translating an externally-held `ProcessId` back to a slot
//! index goes through [`ProcessTable::index_of`].

use crate::arch::{self, BootstrapFn, Context};
use crate::config::MAX_PROCESSES;
use crate::error::{KernelError, KernelResult};
use crate::memory::StackAllocator;

/// A process's stable, monotonically assigned identity. Never reused, even
/// after the slot it once occupied is handed to a new process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

/// Lifecycle state of a process table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot is free and may be reused by `ProcessTable::create`.
    Unused,
    /// On the scheduler's ready queue, waiting for its turn.
    Ready,
    /// Currently the process the scheduler has switched to.
    Running,
    /// Blocked on an IPC rendezvous, linked into that queue's waiter list.
    Blocked,
    /// Ran to completion; its stack has been reclaimed and the slot is
    /// available for `create` exactly like `Unused`.
    Terminated,
}

/// Entry point a created process starts running at. Returning from it is
/// equivalent to calling `Scheduler::exit_current` with that return as the
/// exit code.
pub type EntryFn = extern "C" fn(usize) -> usize;

/// A single process table slot.
///
/// `next` and `age` are scheduler/IPC bookkeeping that lives here only
/// because the system this is modeled on keeps them inline on the process
/// descriptor itself; ownership of their meaning belongs to
/// `crate::scheduler` and `crate::ipc`, not to this module.
#[derive(Clone, Copy)]
pub struct ProcessSlot {
    pub id: ProcessId,
    pub state: ProcessState,
    pub(crate) ctx: Context,
    stack_base: *mut u8,
    stack_size: usize,
    entry: Option<EntryFn>,
    /// Doubles as the process's entry argument before its first run, and
    /// as the IPC direct-handoff slot afterward: [`crate::ipc::IpcQueue`]
    /// stores `value + 1` here before waking a blocked receiver, `0`
    /// meaning "no handoff occurred".
    pub(crate) arg: usize,
    pub(crate) exit_code: usize,
    pub(crate) next: Option<usize>,
    pub(crate) age: u32,
}

impl ProcessSlot {
    const fn unused() -> Self {
        ProcessSlot {
            id: ProcessId(0),
            state: ProcessState::Unused,
            ctx: Context::zeroed(),
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            entry: None,
            arg: 0,
            exit_code: 0,
            next: None,
            age: 0,
        }
    }
}

/// Fixed-capacity table of process descriptors, plus the stack allocator
/// backing each process's stack.
pub struct ProcessTable<A: StackAllocator> {
    slots: [ProcessSlot; MAX_PROCESSES],
    allocator: A,
    next_id: u64,
}

impl<A: StackAllocator> ProcessTable<A> {
    pub fn new(allocator: A) -> Self {
        ProcessTable {
            slots: [ProcessSlot::unused(); MAX_PROCESSES],
            allocator,
            next_id: 1,
        }
    }

    /// Finds the first `Unused`/`Terminated` slot, gives it a stack, and
    /// fabricates a context whose first resumption invokes `bootstrap`.
    ///
    /// `kernel_ptr` is threaded through to `bootstrap` untouched; this
    /// module never dereferences it. It exists so the bootstrap trampoline
    /// can find its way back to whatever owns this table.
    pub fn create(
        &mut self,
        entry: EntryFn,
        arg: usize,
        stack_size: usize,
        bootstrap: BootstrapFn,
        kernel_ptr: usize,
    ) -> KernelResult<ProcessId> {
        let index = self
            .slots
            .iter()
            .position(|s| matches!(s.state, ProcessState::Unused | ProcessState::Terminated))
            .ok_or(KernelError::NoSlot)?;

        let stack_base = self.allocator.alloc(stack_size).ok_or(KernelError::NoMemory)?;

        let ctx = unsafe { arch::new_context(stack_base, stack_size, bootstrap, index, kernel_ptr) };

        let id = ProcessId(self.next_id);
        self.next_id += 1;

        let slot = &mut self.slots[index];
        slot.id = id;
        slot.state = ProcessState::Ready;
        slot.ctx = ctx;
        slot.stack_base = stack_base;
        slot.stack_size = stack_size;
        slot.entry = Some(entry);
        slot.arg = arg;
        slot.exit_code = 0;
        slot.next = None;
        slot.age = 0;

        Ok(id)
    }

    /// Invoked by the bootstrap trampoline for the process at `index`.
    /// Runs its entry point to completion and reports the result; the
    /// caller (`Kernel::process_bootstrap`) is responsible for then calling
    /// `Scheduler::exit_current`, since that requires switching away from
    /// this stack and this function never returns to do so itself.
    pub fn run_entry(&self, index: usize) -> usize {
        let slot = &self.slots[index];
        let entry = slot.entry.expect("bootstrapped slot has no entry point");
        entry(slot.arg)
    }

    /// Reclaims a process's stack and returns its slot to `Terminated`.
    pub(crate) fn terminate(&mut self, index: usize, exit_code: usize) {
        let slot = &mut self.slots[index];
        if !slot.stack_base.is_null() {
            unsafe { self.allocator.free(slot.stack_base, slot.stack_size) };
        }
        slot.state = ProcessState::Terminated;
        slot.stack_base = core::ptr::null_mut();
        slot.stack_size = 0;
        slot.entry = None;
        slot.exit_code = exit_code;
        slot.next = None;
    }

    pub(crate) fn slot(&self, index: usize) -> &ProcessSlot {
        &self.slots[index]
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut ProcessSlot {
        &mut self.slots[index]
    }

    /// Resolves a `ProcessId` to its current slot index. Returns `None` for
    /// a stale id whose slot has since been reclaimed by a different
    /// process, since that slot's `id` no longer matches.
    pub fn index_of(&self, id: ProcessId) -> Option<usize> {
        self.slots.iter().position(|s| s.id == id)
    }

    /// Sets a slot's state to `Ready` directly, without touching any
    /// scheduler queue. Exposed for parity with the system this table is
    /// modeled on; ordinary lifecycle transitions go through
    /// `crate::scheduler::Scheduler` instead.
    pub fn mark_ready(&mut self, index: usize) {
        self.slots[index].state = ProcessState::Ready;
    }

    /// Table capacity — always [`MAX_PROCESSES`], matching the "by slot,
    /// not identifier" indexing `get_by_index` uses. This reports the
    /// table's size, not how many slots are currently live.
    pub fn get_count(&self) -> usize {
        MAX_PROCESSES
    }

    /// The slot at `index`, regardless of its state. `index` is a table
    /// position, not a [`ProcessId`].
    pub fn get_by_index(&self, index: usize) -> Option<&ProcessSlot> {
        self.slots.get(index)
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }
}

impl Context {
    pub(crate) const fn zeroed() -> Self {
        // Safety net only: a zeroed context is never resumed. Every real
        // context either comes from `arch::new_context` or has already
        // been written by a `context_switch` before it's read again.
        unsafe { core::mem::zeroed() }
    }
}
