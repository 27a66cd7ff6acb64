// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Every fallible kernel operation returns one of these small, `Copy`,
//! non-allocating enums rather than panicking or retrying on its own behalf —
//! precondition violations and resource exhaustion are communicated to the
//! caller, who may retry or back off as it sees fit. Nothing in this crate
//! ever constructs one of these from a `Debug`-formatted value; where a
//! branch is already known unreachable, use `unwrap_lite` from the
//! `unwrap-lite` crate instead of `.unwrap()`/`.expect()`.

/// Why `TaskTable::attach`/`schedule` refused to install a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttachError {
    /// The requested id is outside `0..MAX_TASKS`.
    IdOutOfRange,
    /// The requested slot is already occupied; callers must only attach at
    /// `None` slots.
    SlotOccupied,
    /// This slot's carved stack region would start below `RAMSTART`.
    StackUnderflow,
    /// No `None` slot was available for a first-fit `schedule`.
    TableFull,
}

/// Why `TaskTable::kill`/`kill_immediate` had no effect.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KillError {
    /// The requested id is outside `0..=MAX_TASKS`.
    IdOutOfRange,
}

/// Why a data-copy/data-write helper refused to run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferError {
    /// The semaphore guarding shared state was already held.
    Busy,
    /// `src`/`dst`/`n` would read or write outside of RAM.
    OutOfRange,
}
