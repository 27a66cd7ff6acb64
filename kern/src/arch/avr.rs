// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Real-target backend: an 8-bit AVR-class part with a single 16-bit timer
//! driving the preemption tick.
//!
//! The context switch is a naked timer-compare ISR, same shape as the
//! teacher kernel's PendSV handler on Cortex-M: a tiny `global_asm!` stub
//! saves the volatile machine state to wherever [`CURRENT_TASK_PTR`] points,
//! calls into a plain Rust function to pick the next task and repoint that
//! static, then restores from the (possibly different) context the static
//! now points to and returns. The save/restore byte order mirrors the
//! original scheduler's hand-written assembly helpers exactly, so a context
//! captured by one revision of this file is laid out the same way a captured
//! context was under the C implementation it's grounded on.

use core::arch::global_asm;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU16, Ordering};

use crate::task::Context;

/// Points at the `Context` of whichever task is currently installed on the
/// CPU. The naked ISR below reads and writes through this pointer directly;
/// everything else in the kernel goes through [`crate::table::TaskTable`]
/// instead.
///
/// `#[no_mangle]` is required, not decorative: the `global_asm!` block below
/// names this static by its literal symbol (`CURRENT_TASK_PTR`/
/// `CURRENT_TASK_PTR+1`), and without a fixed symbol name those relocations
/// would resolve against whatever mangled name rustc happens to pick instead.
/// Grounded on `examples/oxidecomputer-hubris/sys/kern/src/arch/arm_m.rs`'s
/// own `#[no_mangle]` on `CURRENT_TASK_PTR` for exactly this reason.
#[no_mangle]
static CURRENT_TASK_PTR: AtomicPtr<Context> = AtomicPtr::new(core::ptr::null_mut());

static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(false);
static TICK_RUNNING: AtomicBool = AtomicBool::new(false);
static TICK_INTERRUPT_ENABLED: AtomicBool = AtomicBool::new(false);
static TICK_RELOAD: AtomicU16 = AtomicU16::new(0);

/// Global interrupt flag, as last observed by this module. AVR has no
/// instruction to read the flag without also touching `SREG`'s other bits,
/// so this mirrors what `disable_interrupts`/`enable_interrupts` last set
/// rather than reading the hardware register back.
pub fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.load(Ordering::Acquire)
}

pub fn disable_interrupts() {
    // Safety: `cli` has no side effect beyond clearing the global interrupt
    // flag; it's always safe to issue.
    unsafe {
        core::arch::asm!("cli");
    }
    INTERRUPTS_ENABLED.store(false, Ordering::Release);
}

pub fn enable_interrupts() {
    INTERRUPTS_ENABLED.store(true, Ordering::Release);
    // Safety: same as `cli` above.
    unsafe {
        core::arch::asm!("sei");
    }
}

/// Disables the timer's compare-match interrupt without touching the global
/// flag, so other interrupt sources keep running. Grounded on the
/// `SchedulerSuspend` requirement (spec.md 4.A) that stopping the tick must
/// not be as heavy-handed as a full `cli`.
pub fn stop_tick() {
    TICK_RUNNING.store(false, Ordering::Release);
    // Safety: clears the timer's output-compare-match-A interrupt enable bit
    // only; every other peripheral is untouched.
    unsafe {
        timer_set_compare_interrupt(false);
    }
}

pub fn start_tick() {
    TICK_RUNNING.store(true, Ordering::Release);
    // Safety: see `stop_tick`.
    unsafe {
        timer_set_compare_interrupt(true);
    }
}

pub fn reload_tick(reload: u16) {
    TICK_RELOAD.store(reload, Ordering::Release);
    // Safety: writes the timer's output-compare register, which is only
    // meaningful while the tick source isn't mid-compare; callers reload
    // before `enable_tick_interrupt`/`start_tick`, matching the original
    // scheduler's init order.
    unsafe {
        timer_set_compare_value(reload);
    }
}

pub fn enable_tick_interrupt() {
    TICK_INTERRUPT_ENABLED.store(true, Ordering::Release);
    start_tick();
}

/// Installs the first task's context as current and returns control to it
/// via the same restore path the timer ISR uses, by tail-calling into the
/// naked `avr_restore_context` stub and never returning. Real hardware never
/// comes back from this call; the kernel's `start_tasks` treats it as
/// diverging in spirit (a spin-loop sits after it defensively, per spec.md's
/// catastrophic-failure convention, in case the restore stub is ever reached
/// with a null pointer).
///
/// # Safety
/// Must only be called once, after exactly one `TaskControl` has been
/// installed as current and before the tick interrupt is enabled.
pub unsafe fn start_first_task() {
    let ptr = CURRENT_TASK_PTR.load(Ordering::Acquire);
    debug_assert!(!ptr.is_null());
    // Safety: caller's contract guarantees a valid context is installed.
    unsafe {
        avr_restore_context();
    }
}

/// Repoints [`CURRENT_TASK_PTR`] at `ctx`. Called by the kernel whenever the
/// scheduler selects a new task, so the next timer interrupt saves into and
/// restores from the right place.
///
/// # Safety
/// `ctx` must remain valid (i.e. point into a live `TaskControl` inside the
/// task table) until the next call to this function or to
/// [`start_first_task`].
pub unsafe fn set_current_context(ctx: *mut Context) {
    CURRENT_TASK_PTR.store(ctx, Ordering::Release);
}

/// Primes a never-before-run task's stack with the return frame
/// `avr_timer_isr_restore_only` expects to find there.
///
/// The restore sequence below never reconstructs `r30`/`r31` or the program
/// counter from the `Context` record; it recovers them the same way a real
/// interrupt return always does, by popping them off the task's own stack
/// (the hardware already leaves the return address there, and the save path
/// leaves `r30`/`r31` sitting just above it). A task that has actually been
/// preempted once has this frame already, written there by its own ISR
/// entry. A freshly attached task has never been preempted, so nothing has
/// put those four bytes on its stack yet — this function writes them by
/// hand, in the same byte order a real `push r30; push r31` followed by a
/// hardware call to `entry` would have produced, and returns the stack
/// pointer value that leaves them next in line to be popped.
///
/// # Safety
/// `stack_top` must be the topmost valid, currently-unused address of a
/// carved stack region at least 4 bytes deep.
pub(crate) fn write_initial_frame(stack_top: usize, entry: usize) -> usize {
    let pc_h = (entry >> 8) as u8;
    let pc_l = entry as u8;
    // Safety: caller's contract guarantees these four addresses are valid
    // and exclusively owned by the task being primed.
    unsafe {
        core::ptr::write_volatile((stack_top - 3) as *mut u8, 0); // r31, never read
        core::ptr::write_volatile((stack_top - 2) as *mut u8, 0); // r30, never read
        core::ptr::write_volatile((stack_top - 1) as *mut u8, pc_h);
        core::ptr::write_volatile(stack_top as *mut u8, pc_l);
    }
    stack_top - 4
}

extern "C" {
    fn timer_set_compare_interrupt(enable: bool);
    fn timer_set_compare_value(reload: u16);
}

global_asm! {"
    .section .text.avr_timer_isr
    .global avr_timer_isr
    avr_timer_isr:
        push r30
        push r31
        in r30, 0x3f
        cli
        push r0
        push r30
        lds r30, CURRENT_TASK_PTR
        lds r31, CURRENT_TASK_PTR+1
        pop r0
        st Z+, r0
        pop r0
        st Z+, r0
        st Z+, r1
        st Z+, r2
        st Z+, r3
        st Z+, r4
        st Z+, r5
        st Z+, r6
        st Z+, r7
        st Z+, r8
        st Z+, r9
        st Z+, r10
        st Z+, r11
        st Z+, r12
        st Z+, r13
        st Z+, r14
        st Z+, r15
        st Z+, r16
        st Z+, r17
        st Z+, r18
        st Z+, r19
        st Z+, r20
        st Z+, r21
        st Z+, r22
        st Z+, r23
        st Z+, r24
        st Z+, r25
        st Z+, r26
        st Z+, r27
        st Z+, r28
        st Z+, r29
        in r26, 0x3d
        in r27, 0x3e
        st Z+, r27
        st Z+, r26
        call avr_timer_isr_entry

    avr_timer_isr_restore_only:
        lds r30, CURRENT_TASK_PTR
        lds r31, CURRENT_TASK_PTR+1
        adiw r30, 33
        ld r26, -Z
        ld r27, -Z
        out 0x3d, r26
        out 0x3e, r27
        ld r29, -Z
        ld r28, -Z
        ld r27, -Z
        ld r26, -Z
        ld r25, -Z
        ld r24, -Z
        ld r23, -Z
        ld r22, -Z
        ld r21, -Z
        ld r20, -Z
        ld r19, -Z
        ld r18, -Z
        ld r17, -Z
        ld r16, -Z
        ld r15, -Z
        ld r14, -Z
        ld r13, -Z
        ld r12, -Z
        ld r11, -Z
        ld r10, -Z
        ld r9, -Z
        ld r8, -Z
        ld r7, -Z
        ld r6, -Z
        ld r5, -Z
        ld r4, -Z
        ld r3, -Z
        ld r2, -Z
        ld r1, -Z
        ld r0, -Z
        sbiw r30, 1
        ld r30, Z
        andi r30, 0x7f
        out 0x3f, r30
        pop r31
        pop r30
        reti
    avr_restore_context:
        push r30
        push r31
        rjmp avr_timer_isr_restore_only
",
}

extern "C" {
    fn avr_restore_context();
}

/// The Rust side of the timer ISR: called from `avr_timer_isr` once the
/// previous task's volatile state has been pushed into its `Context`. Ticks
/// the scheduler, picks the next task, and repoints [`CURRENT_TASK_PTR`]
/// before returning into the naked restore sequence.
#[no_mangle]
extern "C" fn avr_timer_isr_entry() {
    crate::isr::tick();
}

#[cfg(test)]
mod tests {
    // This backend only links on the `avr` target; its tests run under the
    // `sim` backend instead, exercised via `arch::sim`'s own test module.
}
