// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A preemptive multitasking micro-kernel for a single-core 8-bit target.
//!
//! This is the application-independent part of the system: a fixed-size task
//! table, a naked-ISR context switch, a handful of selectable scheduling
//! policies, and the cooperative primitives (critical sections, a counting
//! semaphore, guarded data transfer helpers) tasks use to share state safely.
//! Board bring-up, peripheral drivers, and the application's own task bodies
//! live outside this crate and talk to it only through [`launch`] and the
//! [`table`] operations.
//!
//! # Design principles
//!
//! 1. One process-wide task table, one current-task pointer, one kernel
//!    instance. There is no dynamic task creation beyond the compile-time
//!    `MAX_TASKS` bound and no heap allocator anywhere in this crate.
//! 2. Every write to the task table goes through an operation that internally
//!    manages the critical section; there is no raw external access to table
//!    state.
//! 3. The only part of this crate that is not portable to a host is the
//!    `arch` module's real-target backend. Everything else — the task state
//!    machine, the scheduler policies, the sync primitives — is ordinary,
//!    host-testable Rust, exercised in this crate's own test suites against
//!    the `sim` backend.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod err;
pub mod isr;
pub mod launch;
pub mod sched;
pub mod sync;
pub mod table;
pub mod task;

pub use kernabi::{Priority, SchedPolicy, TaskId, TaskStatus, Ticks, NO_TASK};
