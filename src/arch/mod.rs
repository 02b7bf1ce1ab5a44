//! The opaque context-switch primitive.
//!
//! Everything above this module treats [`Context`] as a black box: it is
//! created once by [`new_context`] when a process is born, and from then on
//! is only ever read or written by [`context_switch`]. No other code is
//! allowed to poke at its fields, which is why they stay private to this
//! module and architecture-specific.
//!
//! Only x86_64 is implemented; the scheduler and IPC queue above this layer
//! never branch on architecture, so porting to another target means adding
//! a sibling module here and nothing else.

#[cfg(target_arch = "x86_64")]
mod x86_64_impl;

#[cfg(target_arch = "x86_64")]
pub use x86_64_impl::{context_switch, deadlock_halt, new_context, BootstrapFn, Context};
