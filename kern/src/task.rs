// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks: the saved CPU context and the per-slot control
//! record the rest of the kernel operates on.

use crate::config::TASK_REGISTERS;
use kernabi::{Priority, TaskId, TaskStatus, Ticks};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// A task's entry point. Tasks are plain function pointers — no closures, no
/// dynamic dispatch — and are expected to run forever (looping over
/// `Yield`/`Sleep` calls) until they call `Kill` on themselves.
pub type TaskFn = fn();

/// The saved CPU state of a task, serialized bit-for-bit by the `arch`
/// backend's naked ISR prologue/epilogue.
///
/// `#[repr(C)]` and field order matter here: the real-target `arch` backend
/// indexes into this structure by fixed byte offset from within inline
/// assembly, so reordering fields would silently corrupt every saved
/// context. The program counter and stack pointer are kept as byte pairs
/// (instead of `u16`) so the save/restore sequences can emit them one byte at
/// a time, matching the target ISA's 8-bit register file.
///
/// `r30`/`r31` never round-trip through `regs`: the ISR pushes them to the
/// task's own stack before the save sequence runs and pops them back after
/// restore, so they (and the return address below them) travel with the
/// stack pointer saved in the last two slots of `regs` rather than with this
/// struct. `pc_h`/`pc_l` describe the same address the saved stack already
/// resumes into; they exist for a task's first-ever dispatch and for
/// inspection, not because the restore path reads them back on every switch.
///
/// `FromBytes`/`IntoBytes`/`Unaligned` make that byte-for-byte contract
/// checkable by the type system rather than just by this comment: a type
/// that derives them is one `zerocopy` has verified has no padding, no
/// alignment requirement above 1, and no bit pattern that isn't a valid
/// value — exactly what's needed for something a naked ISR indexes into by
/// raw offset.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct Context {
    /// Status register snapshot, saved first.
    pub sreg: u8,
    /// `r0` through `r29` in `regs[0..30]`, followed by the stack pointer's
    /// high and low bytes in `regs[30]`/`regs[31]`.
    pub regs: [u8; TASK_REGISTERS],
    /// Program counter, high byte.
    pub pc_h: u8,
    /// Program counter, low byte.
    pub pc_l: u8,
    /// Stack pointer, high byte.
    pub sp_h: u8,
    /// Stack pointer, low byte.
    pub sp_l: u8,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            sreg: 0,
            regs: [0; TASK_REGISTERS],
            pc_h: 0,
            pc_l: 0,
            sp_h: 0,
            sp_l: 0,
        }
    }
}

impl Context {
    /// Builds the initial context for a task about to be dispatched for the
    /// first time: `PC` at `entry`, `SP` at the top of its carved stack
    /// region, status register cleared (global interrupt flag is restored by
    /// the `reti` at the end of `restore`, not baked into the saved state).
    ///
    /// Delegates the actual stack-pointer value to
    /// [`crate::arch::write_initial_frame`], since priming a task's stack
    /// with a return frame the restore sequence can pop is architecture
    /// specific (the simulator has nothing to write; the real target does).
    pub fn initial(entry: TaskFn, stack_top: usize) -> Self {
        let pc = entry as usize;
        let sp = crate::arch::write_initial_frame(stack_top, pc);
        Context {
            sreg: 0,
            regs: [0; TASK_REGISTERS],
            pc_h: (pc >> 8) as u8,
            pc_l: pc as u8,
            sp_h: (sp >> 8) as u8,
            sp_l: sp as u8,
        }
    }

    /// The stack pointer this context holds, reassembled from its byte pair.
    pub fn stack_pointer(&self) -> usize {
        ((self.sp_h as usize) << 8) | self.sp_l as usize
    }
}

/// Bookkeeping for a `Yield`/`Sleep` countdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimerState {
    /// Ticks remaining. Signed per spec so a late decrement can't wrap.
    pub timeout: Ticks,
    /// Value `timeout` reloads to when a `Yield` countdown reaches zero. Zero
    /// means "do not auto-reload."
    pub default_timeout: Ticks,
}

/// One slot of the task table.
///
/// Fields are private so that the invariants relating `status`, `id`, and
/// `entry` (spec.md 8: `status == None` iff `id < 0` and `entry == None`) can
/// only be broken from within this module.
#[derive(Clone, Copy, Debug)]
pub struct TaskControl {
    /// Saved machine state; always first, mirroring the teacher kernel's
    /// `Task` layout, so that an `arch` backend that wants to assume a fixed
    /// offset into `TaskControl` may do so.
    pub(crate) context: Context,
    status: TaskStatus,
    timer: TimerState,
    id: TaskId,
    entry: Option<TaskFn>,
    /// Opaque per-task data word. The kernel never interprets this; it is
    /// whatever the application wants to find again from inside the task
    /// (e.g. a pointer to task-local state it stashed in module-level memory
    /// guarded by the semaphore, per spec.md 9's "no dynamic dispatch" note).
    user_data: usize,
    stack_base: usize,
    stack_top: usize,
    priority: Priority,
    cached_priority: Priority,
}

impl Default for TaskControl {
    fn default() -> Self {
        TaskControl {
            context: Context::default(),
            status: TaskStatus::None,
            timer: TimerState::default(),
            id: kernabi::NO_TASK,
            entry: None,
            user_data: 0,
            stack_base: 0,
            stack_top: 0,
            priority: Priority::default(),
            cached_priority: Priority::default(),
        }
    }
}

impl TaskControl {
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn entry(&self) -> Option<TaskFn> {
        self.entry
    }

    pub fn user_data(&self) -> usize {
        self.user_data
    }

    pub fn set_user_data(&mut self, value: usize) {
        self.user_data = value;
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn stack_region(&self) -> (usize, usize) {
        (self.stack_base, self.stack_top)
    }

    pub fn timeout(&self) -> Ticks {
        self.timer.timeout
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Installs a fresh occupant into this slot. Only valid to call on a
    /// `None` slot; this is the sole place a slot transitions out of `None`.
    pub(crate) fn install(
        &mut self,
        id: TaskId,
        entry: TaskFn,
        priority: Priority,
        stack_base: usize,
        stack_top: usize,
        status: TaskStatus,
    ) {
        self.context = Context::initial(entry, stack_top);
        self.status = status;
        self.timer = TimerState::default();
        self.id = id;
        self.entry = Some(entry);
        self.user_data = 0;
        self.stack_base = stack_base;
        self.stack_top = stack_top;
        self.priority = priority;
        self.cached_priority = priority;
    }

    /// Clears this slot back to `None`, the terminal state of a reap.
    pub(crate) fn reap(&mut self) {
        *self = TaskControl::default();
    }

    pub(crate) fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    /// `Yield(n)`: park with a countdown decremented by the scheduler tick.
    /// Returns the timeout this call preempted, per the original
    /// implementation's convention of reporting whether a wait was already
    /// pending.
    pub(crate) fn set_yield(&mut self, n: Ticks, default_timeout: Ticks) -> Ticks {
        let previous = self.timer.timeout;
        self.status = TaskStatus::Yield;
        self.timer.timeout = n;
        self.timer.default_timeout = default_timeout;
        previous
    }

    /// `Sleep(n)`: stays "on-CPU" for accounting purposes (the scheduler
    /// still preempts it on the next tick) but the countdown is decremented
    /// by the task's own busy loop via `sleep_tick`, never by the ISR.
    pub(crate) fn set_sleep(&mut self, n: Ticks) -> Ticks {
        let previous = self.timer.timeout;
        self.status = TaskStatus::Sleep;
        self.timer.timeout = n;
        previous
    }

    /// Decrements a `Sleep` countdown from within the sleeping task itself;
    /// transitions back to `Ready` when it reaches zero. Returns whether the
    /// sleep is now over.
    pub fn sleep_tick(&mut self) -> bool {
        if self.status != TaskStatus::Sleep {
            return true;
        }
        if self.timer.timeout > 0 {
            self.timer.timeout -= 1;
        }
        if self.timer.timeout <= 0 {
            self.status = TaskStatus::Ready;
            true
        } else {
            false
        }
    }

    /// Applied by the tick ISR to every slot not in `None`, `Blocked`, or
    /// `Sleep`: if a `Yield` slot's timeout is already `<= 0`, it is
    /// transitioned to `Ready` immediately (reloading from `default_timeout`
    /// if nonzero) without a decrement; otherwise a positive timeout is
    /// decremented by one. Mirrors the original scheduler's two-branch shape
    /// (decrement only when `timeout > 0`, else promote to `Ready`
    /// straight away) so that `Yield(0)` is `Ready` on the very next tick
    /// rather than one tick late.
    pub(crate) fn tick_timeout(&mut self) -> bool {
        if matches!(
            self.status,
            TaskStatus::None | TaskStatus::Blocked | TaskStatus::Sleep
        ) {
            return false;
        }
        if self.status == TaskStatus::Yield && self.timer.timeout <= 0 {
            self.status = TaskStatus::Ready;
            if self.timer.default_timeout != 0 {
                self.timer.timeout = self.timer.default_timeout;
            }
            return true;
        }
        if self.timer.timeout <= 0 {
            return false;
        }
        self.timer.timeout -= 1;
        true
    }

    /// Sets this task's priority, clamped to `[0, cap]` per spec.md's
    /// supplemented clamp-don't-reject behavior, and refreshes the cached
    /// value the fairness-decrement policies restore from.
    pub(crate) fn set_priority(&mut self, priority: Priority, cap: i16) {
        let clamped = priority.clamp_to(cap);
        self.priority = clamped;
        self.cached_priority = clamped;
    }

    /// Decrements this slot's priority by one (used by the `Priority*`
    /// policies after selecting it); if that makes it negative, restores from
    /// `cached_priority` instead.
    pub(crate) fn decay_priority(&mut self) {
        let decremented = self.priority.decremented();
        self.priority = if decremented.is_negative() {
            self.cached_priority
        } else {
            decremented
        };
    }

    pub(crate) fn set_priority_raw(&mut self, priority: Priority) {
        self.priority = priority;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slot_is_none_and_has_no_id_or_entry() {
        let t = TaskControl::default();
        assert_eq!(t.status(), TaskStatus::None);
        assert!(t.id() < 0);
        assert!(t.entry().is_none());
    }

    #[test]
    fn install_then_reap_round_trips_to_none() {
        fn dummy() {}
        let mut t = TaskControl::default();
        t.install(3, dummy, Priority(2), 100, 164, TaskStatus::Scheduled);
        assert_eq!(t.status(), TaskStatus::Scheduled);
        assert_eq!(t.id(), 3);
        t.reap();
        assert_eq!(t.status(), TaskStatus::None);
        assert!(t.id() < 0);
        assert!(t.entry().is_none());
    }

    #[test]
    fn yield_timeout_counts_down_and_reloads() {
        fn dummy() {}
        let mut t = TaskControl::default();
        t.install(0, dummy, Priority(0), 0, 64, TaskStatus::Ready);
        t.set_yield(2, 5);
        // timeout > 0 is decremented without a status change on each of the
        // first two ticks; only once timeout has reached <= 0 does the third
        // tick promote back to Ready (and reload from default_timeout).
        assert!(t.tick_timeout());
        assert_eq!(t.status(), TaskStatus::Yield);
        assert!(t.tick_timeout());
        assert_eq!(t.status(), TaskStatus::Yield);
        assert!(t.tick_timeout());
        assert_eq!(t.status(), TaskStatus::Ready);
        assert_eq!(t.timeout(), 5);
    }

    #[test]
    fn yield_zero_transitions_to_ready_on_the_next_tick() {
        fn dummy() {}
        let mut t = TaskControl::default();
        t.install(0, dummy, Priority(0), 0, 64, TaskStatus::Ready);
        t.set_yield(0, 0);
        assert!(t.tick_timeout());
        assert_eq!(t.status(), TaskStatus::Ready);
        assert_eq!(t.timeout(), 0);
    }

    #[test]
    fn yield_zero_default_timeout_does_not_reload() {
        fn dummy() {}
        let mut t = TaskControl::default();
        t.install(0, dummy, Priority(0), 0, 64, TaskStatus::Ready);
        t.set_yield(1, 0);
        assert!(t.tick_timeout());
        assert_eq!(t.status(), TaskStatus::Yield);
        assert!(t.tick_timeout());
        assert_eq!(t.status(), TaskStatus::Ready);
        assert_eq!(t.timeout(), 0);
    }

    #[test]
    fn sleep_is_not_decremented_by_tick_timeout() {
        fn dummy() {}
        let mut t = TaskControl::default();
        t.install(0, dummy, Priority(0), 0, 64, TaskStatus::Ready);
        t.set_sleep(5);
        assert!(!t.tick_timeout());
        assert_eq!(t.timeout(), 5);
        assert!(!t.sleep_tick());
        assert_eq!(t.timeout(), 4);
    }

    #[test]
    fn blocked_and_none_are_excluded_from_tick_timeout() {
        let mut t = TaskControl::default();
        assert!(!t.tick_timeout());
        t.set_status(TaskStatus::Blocked);
        assert!(!t.tick_timeout());
    }

    #[test]
    fn priority_decays_and_restores_from_cache() {
        let mut t = TaskControl::default();
        t.set_priority(Priority(1), 15);
        t.decay_priority();
        assert_eq!(t.priority(), Priority(0));
        t.decay_priority();
        // 0 - 1 = -1, negative, so it restores from the cached value (1).
        assert_eq!(t.priority(), Priority(1));
    }

    #[test]
    fn set_priority_clamps_to_cap() {
        let mut t = TaskControl::default();
        t.set_priority(Priority(99), 15);
        assert_eq!(t.priority(), Priority(15));
        t.set_priority(Priority(-4), 15);
        assert_eq!(t.priority(), Priority(0));
    }
}
