// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host simulator backend.
//!
//! There is no real interrupt controller or timer here — every hardware
//! side effect is stood in for by a plain atomic so that [`sync`] and the
//! scheduler policies can be exercised by `cargo test` exactly as they'd run
//! on the real target, modulo the actual register save/restore. Grounded on
//! the teacher kernel's `arch::fake` backend, which does the same for its
//! own syscall/fault plumbing.
//!
//! [`sync`]: crate::sync

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);
static TICK_RUNNING: AtomicBool = AtomicBool::new(false);
static TICK_INTERRUPT_ENABLED: AtomicBool = AtomicBool::new(false);
static TICK_RELOAD: AtomicU16 = AtomicU16::new(0);

pub fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.load(Ordering::Acquire)
}

pub fn disable_interrupts() {
    INTERRUPTS_ENABLED.store(false, Ordering::Release);
}

pub fn enable_interrupts() {
    INTERRUPTS_ENABLED.store(true, Ordering::Release);
}

pub fn stop_tick() {
    TICK_RUNNING.store(false, Ordering::Release);
}

pub fn start_tick() {
    TICK_RUNNING.store(true, Ordering::Release);
}

pub fn tick_running() -> bool {
    TICK_RUNNING.load(Ordering::Acquire)
}

pub fn reload_tick(reload: u16) {
    TICK_RELOAD.store(reload, Ordering::Release);
}

pub fn tick_reload() -> u16 {
    TICK_RELOAD.load(Ordering::Acquire)
}

pub fn enable_tick_interrupt() {
    TICK_INTERRUPT_ENABLED.store(true, Ordering::Release);
}

pub fn tick_interrupt_enabled() -> bool {
    TICK_INTERRUPT_ENABLED.load(Ordering::Acquire)
}

/// Drives one tick as if the hardware timer source had fired. Real hardware
/// reaches [`crate::isr::tick`] from the naked ISR entry point after saving
/// context; the simulator has no registers to save, so test code (and
/// [`crate::launch::pump_tick_for_test`]) calls straight into it.
pub fn simulate_tick() {
    crate::isr::tick();
}

/// On real hardware this loads the first task's saved context into the
/// machine registers and never returns; the naked epilogue is what actually
/// starts execution. Under the simulator there is no machine state to load
/// — `dispatch_tasks` already left the right slot installed as current — so
/// this just starts the (simulated) tick source.
///
/// # Safety
/// Matches the real-target backend's signature; the simulator has nothing
/// unsafe to do here, but callers are written once against both backends.
pub unsafe fn start_first_task() {
    start_tick();
}

/// No-op under the simulator, which has no machine registers to repoint —
/// `crate::table::TaskTable` is the only copy of task state either backend
/// reads from. Exists so `launch::install_current_context` can call through
/// `crate::arch` uniformly regardless of which backend is selected.
///
/// # Safety
/// Matches the real-target backend's signature.
pub unsafe fn set_current_context(_ctx: *mut crate::task::Context) {}

/// No-op under the simulator: there is no real call stack to prime with a
/// synthetic return frame, since `simulate_tick` never actually executes a
/// restore sequence. Returns `stack_top` unchanged so `Context::stack_pointer`
/// still reports the carved region's top under test.
pub fn write_initial_frame(stack_top: usize, _entry: usize) -> usize {
    stack_top
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_flag_round_trips() {
        disable_interrupts();
        assert!(!interrupts_enabled());
        enable_interrupts();
        assert!(interrupts_enabled());
    }

    #[test]
    fn tick_reload_round_trips() {
        reload_tick(250);
        assert_eq!(tick_reload(), 250);
    }
}
