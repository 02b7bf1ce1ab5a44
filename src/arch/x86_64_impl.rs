//! x86_64 implementation of the context-switch primitive.
//!
//! A process's entire saved state is the value of `rsp` at the moment it
//! stopped running: [`context_switch`] pushes the six callee-saved General
//! Purpose registers (the caller-saved ones are already spilled by the
//! compiler around any `call`, same as an ordinary function call), stashes
//! the resulting `rsp` in `*old`, loads `rsp` from `*new`, pops the other
//! side's six registers back out, and `ret`s into whatever instruction
//! follows the `call` that brought that context to a halt last time.
//!
//! A freshly created process has never run, so there is no "instruction
//! following the call" to return to. [`new_context`] fabricates one: it
//! writes a stack frame that looks exactly like one `context_switch` would
//! have produced, except the saved return address points at
//! [`trampoline_entry`] instead of some mid-function label, and two of the
//! "saved registers" are repurposed to carry the two pieces of data
//! `trampoline_entry` needs to invoke the real bootstrap routine.

use core::arch::naked_asm;

/// Opaque saved execution context. The single field is the process's
/// saved stack pointer; every other register lives on the stack that
/// pointer refers to. `repr(C)` pins the field at offset 0, which the
/// assembly below addresses directly.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    sp: u64,
}

/// Signature of the Rust-level bootstrap routine a fresh process's first
/// resumption lands in. Receives the process's slot index and a pointer
/// (opaque to this module) to the kernel state that owns it.
pub type BootstrapFn = extern "C" fn(slot_index: usize, kernel_ptr: usize) -> !;

/// Saves the six callee-saved GPRs and the stack pointer into `*old`,
/// then loads the same from `*new` and resumes there.
///
/// # Safety
/// `old` must be a valid pointer to a `Context` this process owns exclusively.
/// `new` must point at a `Context` previously produced by [`new_context`] or
/// previously saved by a prior call to `context_switch` for a process that
/// is not currently running anywhere else.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(old: *mut Context, new: *const Context) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// Entry point every freshly created process's first `context_switch` into
/// it lands on. `r12`/`r13` were restored from the fabricated stack frame
/// [`new_context`] built, carrying the slot index and kernel pointer;
/// `r14` carries the bootstrap function to invoke. Indirect-calling through
/// a register (rather than `sym`) is what lets this stub stay generic over
/// whatever bootstrap routine the caller supplies.
#[unsafe(naked)]
unsafe extern "C" fn trampoline_entry() -> ! {
    naked_asm!(
        "mov rdi, r12",
        "mov rsi, r13",
        "call r14",
        "ud2",
    )
}

/// Builds a fresh `Context` whose first resumption invokes
/// `bootstrap(slot_index, kernel_ptr)` on its own stack.
///
/// # Safety
/// `stack_base .. stack_base + stack_size` must be a region this process
/// owns exclusively for as long as the returned context may be resumed,
/// and must be at least 64 bytes.
pub unsafe fn new_context(
    stack_base: *mut u8,
    stack_size: usize,
    bootstrap: BootstrapFn,
    slot_index: usize,
    kernel_ptr: usize,
) -> Context {
    let top = stack_base as usize + stack_size;
    let aligned_top = top & !0xF;
    let frame = (aligned_top - 7 * 8) as *mut u64;

    unsafe {
        frame.add(0).write(0); // r15 (scratch)
        frame.add(1).write(bootstrap as usize as u64); // r14 -> indirect call target
        frame.add(2).write(kernel_ptr as u64); // r13 -> rsi
        frame.add(3).write(slot_index as u64); // r12 -> rdi
        frame.add(4).write(0); // rbx (scratch)
        frame.add(5).write(0); // rbp (scratch)
        frame.add(6).write(trampoline_entry as usize as u64); // return address
    }

    Context { sp: frame as u64 }
}

/// Halts forever. On bare metal this parks the CPU with repeated `hlt`
/// instructions, matching the deadlock path of a cooperative kernel with no
/// other CPUs to hand control to. `hlt` is a privileged instruction, so
/// under `cargo test` (a hosted, ring-3 process) this instead panics —
/// same "this is fatal and unrecoverable" contract, survivable by the test
/// harness instead of faulting the host process.
#[cfg(not(test))]
pub fn deadlock_halt() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

#[cfg(test)]
pub fn deadlock_halt() -> ! {
    panic!("deadlock: no ready process and none can become ready");
}
