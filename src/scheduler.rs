//! Aging round-robin scheduler.
//!
//! The ready queue is FIFO by default; a process that has waited through
//! [`crate::config::AGING_THRESHOLD`] scheduling events without running is
//! boosted to the front instead of taking another lap, so no process waits
//! forever behind a busy set of siblings. Aging only advances on
//! [`Scheduler::yield_now`] — this models a cooperative system with no
//! timer interrupt of its own; blocking and exiting hand the CPU over
//! immediately without taking an aging step.
//!
//! This scheduler has no blocked-process list of its own. In the system it
//! is modeled on, blocking always happens through [`crate::ipc`], which
//! already threads every blocked process through its own waiting-senders
//! or waiting-receivers list — reusing the same `next` field a second,
//! independent blocked-set list would need. A descriptor can only ever be
//! on one list at a time, so [`Scheduler::block_current`] simply drops the
//! caller off the ready queue and [`Scheduler::unblock`] is told exactly
//! which slot to pick back up, by the caller that already dequeued it.
//!
//! Internally, queue membership is tracked by process-table slot index
//! (the same currency raw descriptor pointers serve in the system this is
//! modeled on) rather than by [`ProcessId`] — a process's externally
//! visible identity, which [`crate::kernel::Kernel`] is responsible for
//! resolving to a slot index via [`crate::process::ProcessTable::index_of`]
//! before calling in here.

use crate::arch::{self, Context};
use crate::config::AGING_THRESHOLD;
use crate::memory::StackAllocator;
use crate::process::{ProcessId, ProcessState, ProcessTable};

/// Ready queue and currently-running pointer for a single CPU. Every
/// operation here takes the [`ProcessTable`] it schedules over as an
/// explicit argument rather than owning one, so [`crate::kernel::Kernel`]
/// can own both side by side without a borrow-checker standoff.
pub struct Scheduler {
    ready_head: Option<usize>,
    ready_tail: Option<usize>,
    current: Option<usize>,
    /// Save slot for the context that called [`Scheduler::start`]. Nothing
    /// ever switches back into it in normal operation; it exists so the
    /// first `context_switch` has a legal `old` destination.
    bootstrap_ctx: Context,
    time_quantum: u32,
}

impl Scheduler {
    pub fn new(time_quantum: u32) -> Self {
        Scheduler {
            ready_head: None,
            ready_tail: None,
            current: None,
            bootstrap_ctx: Context::zeroed(),
            time_quantum: time_quantum.max(crate::config::MIN_TIME_QUANTUM),
        }
    }

    pub fn time_quantum(&self) -> u32 {
        self.time_quantum
    }

    pub fn set_time_quantum(&mut self, ticks: u32) {
        self.time_quantum = ticks.max(crate::config::MIN_TIME_QUANTUM);
    }

    /// The slot index currently occupying the CPU, if the scheduler has run
    /// at least once. Used internally by `crate::ipc` to know who is
    /// calling `send`/`recv`.
    pub(crate) fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// The process currently occupying the CPU, if the scheduler has run at
    /// least once.
    pub fn current<A: StackAllocator>(&self, table: &ProcessTable<A>) -> Option<ProcessId> {
        self.current.map(|idx| table.slot(idx).id)
    }

    /// Inserts a brand-new process at the tail of the ready queue, by slot
    /// index. Its age always starts at zero; a process that has never run
    /// cannot have waited long enough to deserve a boost.
    pub(crate) fn add<A: StackAllocator>(&mut self, table: &mut ProcessTable<A>, index: usize) {
        table.slot_mut(index).age = 0;
        self.place_ready_with_aging(table, index);
    }

    /// Hands the CPU to the first ready process. A no-op if nothing has
    /// been [`Scheduler::add`]ed.
    pub fn start<A: StackAllocator>(&mut self, table: &mut ProcessTable<A>) {
        let Some(next_idx) = self.pop_ready(table) else {
            return;
        };
        let old_ctx: *mut Context = &mut self.bootstrap_ctx;
        self.dispatch(table, old_ctx, next_idx);
    }

    /// Voluntarily gives up the remainder of the current time quantum: the
    /// single point in this scheduler where waiting processes age. If
    /// another process is ready, the caller is reinserted (age reset to
    /// zero, as a process just getting off the CPU has no waiting credit)
    /// and the CPU switches to the new head; if nothing else is ready, this
    /// returns immediately and the caller keeps running.
    pub fn yield_now<A: StackAllocator>(&mut self, table: &mut ProcessTable<A>) {
        let cur = self
            .current
            .expect("yield_now called with no running process");

        self.age_ready(table);
        let Some(next_idx) = self.pop_ready(table) else {
            return;
        };

        if table.slot(cur).state == ProcessState::Running {
            table.slot_mut(cur).age = 0;
            self.place_ready_with_aging(table, cur);
        }

        let old_ctx: *mut Context = &mut table.slot_mut(cur).ctx;
        self.dispatch(table, old_ctx, next_idx);
    }

    /// Marks the current process `Blocked` and switches to the next ready
    /// process. The caller is responsible for having already linked itself
    /// into whatever waiter list it means to wait on; this call does not
    /// track blocked processes itself. Halts the system if no other
    /// process is ready to take over.
    pub fn block_current<A: StackAllocator>(&mut self, table: &mut ProcessTable<A>) {
        let cur = self
            .current
            .expect("block_current called with no running process");

        table.slot_mut(cur).state = ProcessState::Blocked;
        table.slot_mut(cur).age = 0;

        match self.pop_ready(table) {
            Some(next_idx) => {
                let old_ctx: *mut Context = &mut table.slot_mut(cur).ctx;
                self.dispatch(table, old_ctx, next_idx);
            }
            None => arch::deadlock_halt(),
        }
    }

    /// Moves the process at `index` from `Blocked` back onto the ready
    /// queue, by slot index. A no-op if it is not currently `Blocked` (for
    /// instance, a spurious double wake). Does not itself switch context;
    /// the caller keeps running until it next yields, blocks, or exits.
    pub(crate) fn unblock<A: StackAllocator>(&mut self, table: &mut ProcessTable<A>, index: usize) {
        if table.slot(index).state != ProcessState::Blocked {
            return;
        }
        table.slot_mut(index).age = 0;
        self.place_ready_with_aging(table, index);
    }

    /// Terminates the current process and switches to the next ready one.
    /// Halts the system if none remains.
    pub fn exit_current<A: StackAllocator>(
        &mut self,
        table: &mut ProcessTable<A>,
        exit_code: usize,
    ) -> ! {
        let cur = self
            .current
            .expect("exit_current called with no running process");

        table.terminate(cur, exit_code);

        match self.pop_ready(table) {
            Some(next_idx) => {
                let old_ctx: *mut Context = &mut table.slot_mut(cur).ctx;
                self.dispatch(table, old_ctx, next_idx);
                unreachable!("a terminated process's context is never resumed")
            }
            None => arch::deadlock_halt(),
        }
    }

    fn dispatch<A: StackAllocator>(
        &mut self,
        table: &mut ProcessTable<A>,
        old_ctx: *mut Context,
        next_idx: usize,
    ) {
        self.current = Some(next_idx);
        table.slot_mut(next_idx).state = ProcessState::Running;
        let new_ctx: *const Context = &table.slot(next_idx).ctx;
        unsafe { arch::context_switch(old_ctx, new_ctx) };
    }

    fn pop_ready<A: StackAllocator>(&mut self, table: &mut ProcessTable<A>) -> Option<usize> {
        let head = self.ready_head?;
        let next = table.slot(head).next;
        self.ready_head = next;
        if next.is_none() {
            self.ready_tail = None;
        }
        table.slot_mut(head).next = None;
        Some(head)
    }

    /// Advances the age of every ready process by one scheduling event.
    fn age_ready<A: StackAllocator>(&mut self, table: &mut ProcessTable<A>) {
        let mut cursor = self.ready_head;
        while let Some(idx) = cursor {
            let slot = table.slot_mut(idx);
            if slot.age < u32::MAX {
                slot.age += 1;
            }
            cursor = slot.next;
        }
    }

    /// Inserts the process at `index` into the ready queue: at the tail if
    /// its age is below the aging threshold, or at the head (with age
    /// reset to zero) if it has waited long enough to earn a boost. Always
    /// transitions it to `Ready` as a side effect, matching what every
    /// caller was about to do anyway.
    fn place_ready_with_aging<A: StackAllocator>(&mut self, table: &mut ProcessTable<A>, index: usize) {
        table.slot_mut(index).state = ProcessState::Ready;

        let Some(head_idx) = self.ready_head else {
            table.slot_mut(index).next = None;
            self.ready_head = Some(index);
            self.ready_tail = Some(index);
            return;
        };

        if table.slot(index).age >= AGING_THRESHOLD {
            table.slot_mut(index).next = Some(head_idx);
            self.ready_head = Some(index);
            table.slot_mut(index).age = 0;
            // Unreachable in practice: `ready_tail` is always `Some` here,
            // since it is only cleared by `pop_ready` in the same step it
            // clears `ready_head`. Kept for parity with the boost branch
            // this queue discipline is modeled on.
            if self.ready_tail.is_none() {
                self.ready_tail = Some(index);
            }
        } else {
            table.slot_mut(index).next = None;
            let tail_idx = self
                .ready_tail
                .expect("ready_tail must be set whenever ready_head is set");
            table.slot_mut(tail_idx).next = Some(index);
            self.ready_tail = Some(index);
        }
    }
}
