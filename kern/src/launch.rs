// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The public surface of the kernel: the process-wide singleton, the launch
//! sequence (`start_tasks`/`dispatch_tasks`), and every operation spec.md
//! section 6 lists (attach, kill, yield, sleep, priority, policy selection,
//! the semaphore request pair). Everything here either reaches into the one
//! [`Kernel`] instance through [`with_kernel`] or wraps a module-level
//! [`Semaphore`] — there is no other way to touch kernel state from outside
//! this crate.

use core::sync::atomic::{AtomicBool, Ordering};

use unwrap_lite::UnwrapLite;

use crate::config;
use crate::err::{AttachError, KillError, TransferError};
use crate::sched::Scheduler;
use crate::sync::{CriticalSection, Semaphore, SchedulerSuspend};
use crate::table::{TaskTable, MAIN_SLOT};
use crate::task::{Context, TaskFn};
use kernabi::{Priority, SchedPolicy, TaskId, TaskStatus};

/// The process-wide kernel instance: the task table plus whichever scheduler
/// policy is currently installed. Exactly one of these exists per boot,
/// concentrating the global state spec.md 9 calls for into this module
/// alone — nothing outside `launch`, `isr`, and `sync` ever names `Kernel`.
pub(crate) struct Kernel {
    pub(crate) table: TaskTable,
    pub(crate) scheduler: Scheduler,
}

// Safety discipline: every access to `KERNEL` happens through `with_kernel`
// or `ensure_kernel`, both of which hold a `CriticalSection` for the whole
// read/modify/write, so there is never more than one live `&mut Kernel`
// outstanding despite this being a bare `static mut` read through a raw
// pointer. This mirrors the teacher kernel's `with_task_table`, which
// manufactures a reference to its own `static mut TASK_TABLE_BASE` the same
// way (`examples/oxidecomputer-hubris/kern/src/arch/arm_m.rs`).
static mut KERNEL: Option<Kernel> = None;

/// Set once by `start_tasks`/`dispatch_tasks` and cleared either by the
/// scheduler's catastrophic-failure path ([`halt_scheduler`]) or by
/// `dispatch_tasks` itself once every non-main task has died. The blocking
/// `dispatch_tasks` busy-wait polls this.
static RUNNING: AtomicBool = AtomicBool::new(false);

/// The shared-state semaphore guarding the data-transfer helpers
/// (`TaskRequestDataCopy` and friends). One instance for the whole kernel,
/// per spec.md 4.E.
static SEMAPHORE: Semaphore = Semaphore::new();

/// Builds the kernel singleton the first time anything reaches for it.
/// Idempotent: a `Kernel` already present is left untouched.
fn ensure_kernel() {
    let _guard = CriticalSection::enter();
    // Safety: serialized by the critical section above; this either reads
    // `None` and writes once, or reads `Some` and does nothing, never racing
    // with another writer.
    unsafe {
        let slot = &mut *core::ptr::addr_of_mut!(KERNEL);
        if slot.is_none() {
            *slot = Some(Kernel {
                table: TaskTable::new(config::ram_start(), config::ram_end()),
                scheduler: Scheduler::new(SchedPolicy::RoundRobin),
            });
        }
    }
}

/// Hands `body` a mutable reference to the process-wide kernel instance,
/// constructing it on first use. Called from every operation in this module,
/// from [`crate::isr::tick`], and from [`crate::sync`]'s data-transfer
/// helpers — there is no other path to a live `&mut Kernel`.
pub(crate) fn with_kernel<R>(body: impl FnOnce(&mut Kernel) -> R) -> R {
    ensure_kernel();
    let _guard = CriticalSection::enter();
    // Safety: `ensure_kernel` just guaranteed `KERNEL` is `Some`; the
    // critical section serializes this against every other caller.
    let kernel = unsafe { (*core::ptr::addr_of_mut!(KERNEL)).as_mut() }.unwrap_lite();
    body(kernel)
}

/// Repoints the `arch` backend's current-context pointer at the `Context`
/// belonging to `id`, so the next tick's save/restore sequence reads and
/// writes the right slot. Called from [`crate::isr::tick`] right after the
/// scheduler selects a new task; a no-op if `id` no longer names a live slot
/// (only possible if it was reaped between selection and this call, which
/// cannot happen since both run inside the same critical section).
pub(crate) fn install_current_context(id: TaskId) {
    with_kernel(|k| {
        if let Some(slot) = k.table.slot_mut(id) {
            let ctx_ptr: *mut Context = slot.context_mut();
            // Safety: `ctx_ptr` points at a `Context` embedded in a live
            // `TaskControl` inside the process-wide table, which outlives
            // every context switch; the `arch` backend never retains it
            // past the next call to this function.
            unsafe {
                crate::arch::set_current_context(ctx_ptr);
            }
        }
    });
}

/// Stops the tick source and clears the running flag. The tick ISR's only
/// way of reaching this is the scheduler's safety-bound exhaustion
/// ([`crate::sched::TickOutcome::Halt`]); `dispatch_tasks` also reaches it
/// directly once every non-main task has died normally.
pub(crate) fn halt_scheduler() {
    crate::arch::stop_tick();
    RUNNING.store(false, Ordering::Release);
}

/// The built-in idle body installed in the main slot when `start_tasks` is
/// given `None`: spins forever. Grounded on the original scheduler's
/// `_EmptyTask` fallback (SPEC_FULL 2).
fn default_idle() {
    loop {
        core::hint::spin_loop();
    }
}

fn non_main_active_count(table: &TaskTable) -> usize {
    (0..MAIN_SLOT)
        .filter(|&i| table.slots()[i].status() != TaskStatus::None)
        .count()
}

/// Marks all occupied slots `Ready`, installs the main slot, arms the tick
/// source, and launches the first context switch. A no-op if no task has
/// been attached yet, matching the original's `if (m_TaskBlockCount > 0)`
/// guard around both `DispatchTasks` and `StartTasks`.
///
/// `main_fn` is the caller-supplied kernel function for the main slot, or
/// `None` to install the built-in idle loop; `priority` seeds the main
/// slot's priority for the `Priority*` policies. Blocks (on the host
/// simulator; diverges into the first task on real hardware, never
/// returning to the caller — see [`crate::arch::avr::start_first_task`])
/// until every task has died.
pub fn start_tasks(main_fn: Option<TaskFn>, priority: Priority) {
    let has_tasks = with_kernel(|k| k.table.active_task_count() > 0);
    if !has_tasks {
        return;
    }
    let main_body = main_fn.unwrap_or(default_idle);
    {
        let _guard = CriticalSection::enter();
        with_kernel(|k| {
            k.table.ready_all_occupied();
            k.table.install_main(main_body);
            k.table
                .set_priority(MAIN_SLOT as TaskId, priority, config::HIGHEST_TASK_PRIORITY);
            k.table.set_current_task_id(MAIN_SLOT as TaskId);
            k.scheduler.set_main_is_idle(main_fn.is_none());
        });
        RUNNING.store(true, Ordering::Release);
        // Launch sequence per spec.md 4.E: stop the tick, enable the tick
        // interrupt, reload the tick counter, start the tick, then (this
        // crate's own addition over the original, see `start_first_task`'s
        // docs) hand off to the first task the same way every later tick's
        // restore half does.
        crate::arch::stop_tick();
        crate::arch::enable_tick_interrupt();
        crate::arch::reload_tick(config::TASK_INTERRUPT_TICKS);
        crate::arch::start_tick();
        // Safety: exactly one task (the main slot, installed above) is
        // current; nothing else has run since this critical section began.
        unsafe {
            crate::arch::start_first_task();
        }
    }
    dispatch_tasks();
}

/// One pass of the `dispatch_tasks` busy-wait. Returns `true` if the caller
/// should keep waiting, `false` once every non-main task has died (in which
/// case the tick source is stopped and `RUNNING` cleared here) or the
/// running flag was already clear — the scheduler's catastrophic-failure
/// path ([`halt_scheduler`], reached from [`crate::isr::tick`]) having
/// already done so. Split out from [`dispatch_tasks`] so the exit condition
/// can be exercised by a single-threaded test without an actual blocking
/// wait.
fn dispatch_poll() -> bool {
    if !RUNNING.load(Ordering::Acquire) {
        return false;
    }
    if with_kernel(|k| non_main_active_count(&k.table)) == 0 {
        halt_scheduler();
        return false;
    }
    true
}

/// Blocks (on the host simulator; see [`start_tasks`] for the real-hardware
/// divergence caveat) until every non-main task has died, then clears the
/// table back to all-`None` per spec.md 3's lifecycle contract.
pub fn dispatch_tasks() {
    while dispatch_poll() {
        core::hint::spin_loop();
    }
    with_kernel(|k| k.table.kill_all_immediate());
}

/// `AttachTask(fn, id)`: installs `entry` at the caller-chosen slot.
pub fn attach_task(entry: TaskFn, id: TaskId) -> Result<TaskId, AttachError> {
    with_kernel(|k| k.table.attach(entry, id))
}

/// `ScheduleTask(fn)`: first-fit attach into the lowest-indexed free slot.
pub fn schedule_task(entry: TaskFn) -> Result<TaskId, AttachError> {
    with_kernel(|k| k.table.schedule(entry))
}

/// `KillTask(id)`: requests self-termination; the scheduler reaps the slot
/// on its next pass.
pub fn kill_task(id: TaskId) -> Result<(), KillError> {
    with_kernel(|k| k.table.kill(id))
}

/// `KillAllTasks()`.
pub fn kill_all_tasks() {
    with_kernel(|k| k.table.kill_all());
}

/// `KillOtherTasks(id)`.
pub fn kill_other_tasks(id: TaskId) {
    with_kernel(|k| k.table.kill_others(id));
}

/// `GetCurrentTaskId()`.
pub fn get_current_task_id() -> TaskId {
    let _guard = SchedulerSuspend::enter();
    with_kernel(|k| k.table.current_task_id())
}

/// `GetTaskStatus(id)`.
pub fn get_task_status(id: TaskId) -> Option<TaskStatus> {
    let _guard = SchedulerSuspend::enter();
    with_kernel(|k| k.table.status(id))
}

/// `SetTaskStatus(id, status)`: the only transitions this accepts directly
/// are the administrative `Ready <-> Blocked` pair (spec.md 4.C); every
/// other request is silently refused, matching "others are illegal and must
/// be treated as no-ops."
pub fn set_task_status(id: TaskId, status: TaskStatus) {
    with_kernel(|k| {
        k.table.set_status_admin(id, status);
    });
}

/// `SetTaskPriority(id, p)`: clamps to `[0, HIGHEST_TASK_PRIORITY]`.
pub fn set_task_priority(id: TaskId, priority: Priority) {
    with_kernel(|k| {
        k.table
            .set_priority(id, priority, config::HIGHEST_TASK_PRIORITY);
    });
}

/// `SetTaskSchedule(policy)`: switches the active scheduler policy.
pub fn set_task_schedule(policy: SchedPolicy) {
    with_kernel(|k| k.scheduler.set_policy(policy));
}

/// `TaskSetYield(id, n)`: parks the caller with an ISR-decremented
/// countdown. Returns the timeout this call preempted.
pub fn task_set_yield(id: TaskId, n: i16) -> Option<i16> {
    with_kernel(|k| k.table.set_yield(id, n, 0))
}

/// `TaskSleep(id, n)`: parks the caller with a countdown the task itself
/// must decrement via [`crate::task::TaskControl::sleep_tick`]. Returns the
/// timeout this call preempted.
pub fn task_sleep(id: TaskId, n: i16) -> Option<i16> {
    with_kernel(|k| k.table.set_sleep(id, n))
}

/// `GetActiveTaskCount()`.
pub fn get_active_task_count() -> usize {
    let _guard = SchedulerSuspend::enter();
    with_kernel(|k| k.table.active_task_count())
}

/// `GetTaskByFunction(fn)`.
pub fn get_task_by_function(entry: TaskFn) -> Option<TaskId> {
    let _guard = SchedulerSuspend::enter();
    with_kernel(|k| k.table.task_by_function(entry))
}

/// `OpenSemaphoreRequest(wait)`. `wait = true` spins until the semaphore is
/// free; `wait = false` fails immediately if it is already held.
pub fn open_semaphore_request(wait: bool) -> bool {
    if SEMAPHORE.open() {
        return true;
    }
    if !wait {
        return false;
    }
    while !SEMAPHORE.open() {
        core::hint::spin_loop();
    }
    true
}

/// `CloseSemaphoreRequest()`.
pub fn close_semaphore_request() {
    SEMAPHORE.close();
}

/// `TaskRequestDataCopy(dst, src, n)`.
///
/// # Safety
/// `dst`/`src` must be valid for `n` bytes of write/read respectively.
pub unsafe fn task_request_data_copy(
    dst: *mut u8,
    src: *const u8,
    n: usize,
) -> Result<(), TransferError> {
    // Safety: forwarded from this function's own contract.
    unsafe { crate::sync::request_data_copy(&SEMAPHORE, dst, src, n) }
}

/// `YieldRequestDataCopy(id, dst, src, n)`.
///
/// # Safety
/// Same contract as [`task_request_data_copy`].
pub unsafe fn task_yield_request_data_copy(
    id: TaskId,
    dst: *mut u8,
    src: *const u8,
    n: usize,
) -> Result<(), TransferError> {
    // Safety: forwarded from this function's own contract.
    unsafe { crate::sync::yield_request_data_copy(id, &SEMAPHORE, dst, src, n) }
}

/// `RequestDataWrite(dst, data, n)`.
///
/// # Safety
/// `dst` must be valid for `data.len()` bytes of volatile writes.
pub unsafe fn task_request_data_write(dst: *mut u8, data: &[u8]) -> Result<(), TransferError> {
    // Safety: forwarded from this function's own contract.
    unsafe { crate::sync::request_data_write(&SEMAPHORE, dst, data) }
}

/// `YieldWriteData(id, dst, data, n)`.
///
/// # Safety
/// Same contract as [`task_request_data_write`].
pub unsafe fn task_yield_write_data(
    id: TaskId,
    dst: *mut u8,
    data: &[u8],
) -> Result<(), TransferError> {
    // Safety: forwarded from this function's own contract.
    unsafe { crate::sync::yield_write_data(id, &SEMAPHORE, dst, data) }
}

/// Test-only helper: drives one scheduler tick directly and synchronously,
/// the way the real tick source would fire on hardware, without needing an
/// actual timer or a second thread.
#[cfg(test)]
pub(crate) fn pump_tick_for_test() {
    crate::isr::tick();
}
