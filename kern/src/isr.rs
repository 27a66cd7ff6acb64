// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The tick interrupt's Rust-side entry point.
//!
//! Real hardware reaches [`tick`] from the `arch` backend's naked context
//! switch after the outgoing task's volatile registers are already saved;
//! the host simulator reaches it directly from `arch::sim::simulate_tick`.
//! Either way, this is the one place per tick where the task table's
//! timeouts are advanced and the active scheduler policy gets to pick the
//! next task — mirroring the teacher kernel's `SysTick` handler, which
//! advances its own tick counter and calls `task::process_timers` before
//! deciding whether a context switch is needed.

use crate::sched::TickOutcome;
use crate::sync::CriticalSection;
use crate::TaskId;

ringbuf::ringbuf!(KernEvent, 32, KernEvent::Booted);

/// A diagnostic event recorded once per interesting tick, readable back from
/// a debugger attached to the ring buffer. Kept intentionally small — this
/// is an aid for bring-up and post-mortem, not a general logging facility.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KernEvent {
    /// The ring buffer's initial filler value; never recorded by `tick`
    /// itself, only ever seen if a debugger reads the buffer before the
    /// first tick.
    Booted,
    /// A tick selected a new current task.
    Switched(TaskId),
    /// A tick found every slot ineligible and ran the catastrophic-failure
    /// fallback.
    Halted,
}

/// Advances the task table's timeouts and asks the installed scheduler
/// policy to pick the next task to run.
///
/// Called with interrupts already disabled by the caller's ISR entry
/// sequence (real hardware) or synchronously from a test/`simulate_tick`
/// (host); either way this takes its own nested [`CriticalSection`] so the
/// table read/modify/write here is atomic with respect to any other
/// critical-section holder, matching the rest of this crate's convention of
/// never touching table state from outside one.
pub fn tick() {
    let _guard = CriticalSection::enter();
    let outcome = crate::launch::with_kernel(|k| {
        k.table.process_timeouts();
        k.scheduler.tick(&mut k.table)
    });
    match outcome {
        TickOutcome::Selected(id) => {
            ringbuf::ringbuf_entry!(KernEvent::Switched(id));
            crate::launch::install_current_context(id);
        }
        TickOutcome::Halt => {
            ringbuf::ringbuf_entry!(KernEvent::Halted);
            crate::launch::halt_scheduler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kern_event_variants_are_distinguishable() {
        assert_ne!(KernEvent::Switched(0), KernEvent::Switched(1));
        assert_ne!(KernEvent::Switched(0), KernEvent::Halted);
    }
}
