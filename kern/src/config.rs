// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compile-time kernel configuration.
//!
//! These are `pub const`s rather than a runtime-loaded structure, matching
//! the rest of the embedded corpus this kernel is patterned on: a single
//! fixed shape baked in at build time, selected per board/target by Cargo
//! features rather than by a config file the kernel parses at boot.

/// Number of schedulable task slots, *not* counting the reserved main slot at
/// index [`MAX_TASKS`]. Conservative default per spec.
pub const MAX_TASKS: usize = 10;

/// Number of general-purpose register bytes saved/restored per context
/// switch. 32 on the reference 8-bit target.
pub const TASK_REGISTERS: usize = 32;

/// Bytes of private stack carved out of RAM for each task slot, including the
/// main slot.
pub const TASK_STACK_SIZE: usize = 64;

/// Reload value for the tick source's countdown register. The tick period is
/// `TASK_INTERRUPT_TICKS` counts of the tick source's input clock; picking
/// this is a board-level concern, this is just the default used when no
/// board-specific override is supplied.
pub const TASK_INTERRUPT_TICKS: u16 = 250;

/// Upper bound enforced on any task's configured priority.
pub const HIGHEST_TASK_PRIORITY: i16 = 15;

/// Safety bound on the number of iterations the scheduler's inner selection
/// loop may take before concluding that no task is selectable and triggering
/// the catastrophic-failure path.
pub const SCHED_SAFETY_LIMIT: u32 = 100;

/// Tick increments a `YieldRequestDataCopy`/`YieldWriteData` caller waits
/// before retrying a busy semaphore, drawn from the 5-10 tick window spec.md
/// specifies; this is the default used when a caller doesn't care to vary it
/// across retries.
pub const DATA_HELPER_RETRY_TICKS: i16 = 7;

cfg_if::cfg_if! {
    if #[cfg(feature = "avr")] {
        extern "C" {
            /// Lowest valid RAM address, supplied by the target's linker
            /// script.
            static __ramstart: u8;
            /// Highest valid RAM address (inclusive), supplied by the
            /// target's linker script.
            static __ramend: u8;
        }

        /// Lowest valid RAM address.
        pub fn ram_start() -> usize {
            // Safety: these symbols are defined by the linker script for
            // every real-target build; they have no meaningful "value",
            // only an address, which is all we read.
            unsafe { &__ramstart as *const u8 as usize }
        }

        /// Highest valid RAM address (inclusive).
        pub fn ram_end() -> usize {
            unsafe { &__ramend as *const u8 as usize }
        }
    } else {
        use core::cell::UnsafeCell;

        /// A fixed-size byte arena standing in for target RAM under the host
        /// simulator, so that stack-carving bounds checks (spec.md 4.B) have
        /// something real to validate against even off-target.
        #[repr(align(8))]
        struct SimRam(UnsafeCell<[u8; SIM_RAM_BYTES]>);
        // Safety: the simulator is single-threaded; access is further
        // serialized by the kernel's own critical sections.
        unsafe impl Sync for SimRam {}

        const SIM_RAM_BYTES: usize = (MAX_TASKS + 1) * (TASK_STACK_SIZE + 64) + 256;

        static SIM_RAM: SimRam = SimRam(UnsafeCell::new([0; SIM_RAM_BYTES]));

        /// Lowest valid RAM address under the host simulator.
        pub fn ram_start() -> usize {
            SIM_RAM.0.get() as usize
        }

        /// Highest valid RAM address (inclusive) under the host simulator.
        pub fn ram_end() -> usize {
            ram_start() + SIM_RAM_BYTES - 1
        }
    }
}
