#![cfg_attr(not(test), no_std)]

//! Shared, `no_std`-friendly vocabulary types for the fiber kernel.
//!
//! Split out from the `kern` crate itself, the way `abi` is split from `kern`
//! in the teacher kernel this workspace is patterned on: application code
//! (task entry functions, board bring-up) links against this crate's plain
//! data types without pulling in any kernel internals, keeping the public
//! surface stable and reviewable independent of the scheduler implementation.

use core::cmp::Ordering;

/// A task-table slot identifier.
///
/// Valid occupant ids are `0..MAX_TASKS`; the value `MAX_TASKS` itself names
/// the permanently-installed main/idle slot. Negative values mean "no task" —
/// returned, for instance, when `schedule` finds the table full.
pub type TaskId = i8;

/// Sentinel returned in place of a `TaskId` when an operation that would
/// normally hand back a slot id fails instead.
pub const NO_TASK: TaskId = -1;

/// A task's lifecycle state.
///
/// See the kernel's state machine documentation for the legal transition
/// graph; illegal transitions requested through the public API are no-ops,
/// they do not panic.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum TaskStatus {
    /// Slot is free.
    #[default]
    None,
    /// Slot is allocated but has never been granted CPU time.
    Scheduled,
    /// Eligible to run on the next tick.
    Ready,
    /// Voluntarily parked with a countdown decremented by the scheduler tick.
    Yield,
    /// Parked with a countdown decremented by the task's own busy loop.
    Sleep,
    /// Administratively parked; only external action resumes it.
    Blocked,
    /// The reserved main/idle slot.
    Main,
    /// Self-termination requested; reaped on the next tick.
    Kill,
}

impl TaskStatus {
    /// Whether a task in this state may be selected to run by any scheduler
    /// policy (subject to the policy's own further restrictions).
    pub fn is_schedulable(self) -> bool {
        !matches!(self, TaskStatus::None | TaskStatus::Blocked | TaskStatus::Kill)
    }
}

/// A task's scheduling priority.
///
/// Unlike some kernels' inverted convention, *larger* values are *more*
/// important here, matching the source specification's worked examples
/// (priority 5 should receive roughly `5/(1+2+5)` of the CPU, more than
/// priority 2 or 1). Deliberately does not implement `PartialOrd`/`Ord` as a
/// blanket numeric comparison so call sites say what they mean.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Priority(pub i16);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }

    /// Clamps `self` to `[0, cap]`, used when applying `HIGHEST_TASK_PRIORITY`.
    pub fn clamp_to(self, cap: i16) -> Self {
        Priority(self.0.clamp(0, cap))
    }

    /// One less than `self`, used by the fairness-decrement policies.
    pub fn decremented(self) -> Self {
        Priority(self.0 - 1)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// A scheduler-tick countdown, used for both `Yield` and `Sleep`.
///
/// Signed, per spec: a reload of zero means "do not auto-reload."
pub type Ticks = i16;

/// Selects which algorithm the scheduler uses to pick the next runnable slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedPolicy {
    /// Advance one slot at a time, skipping ineligible slots.
    RoundRobin,
    /// Weighted rotation: highest priority wins, decremented after each win.
    Priority,
    /// Like `Priority`, but only `Ready`/`Main` slots are eligible.
    PriorityAndReady,
    /// Every other tick runs the main slot; the alternate tick runs the
    /// single highest-priority eligible slot.
    PriorityStrict,
    /// Like `Priority`, but every other tick forces the main slot.
    PriorityMain,
    /// Physically sorts the table by priority at the top of each cycle, then
    /// round-robins.
    PriorityReorder,
}

impl Default for SchedPolicy {
    fn default() -> Self {
        SchedPolicy::RoundRobin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_bigger_is_more_important() {
        assert!(Priority(5).is_more_important_than(Priority(2)));
        assert!(!Priority(1).is_more_important_than(Priority(1)));
    }

    #[test]
    fn priority_clamp() {
        assert_eq!(Priority(20).clamp_to(15), Priority(15));
        assert_eq!(Priority(-3).clamp_to(15), Priority(0));
    }

    #[test]
    fn schedulable_excludes_none_blocked_kill() {
        assert!(!TaskStatus::None.is_schedulable());
        assert!(!TaskStatus::Blocked.is_schedulable());
        assert!(!TaskStatus::Kill.is_schedulable());
        assert!(TaskStatus::Ready.is_schedulable());
        assert!(TaskStatus::Main.is_schedulable());
    }
}
