// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents.
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, tailored for whichever Cargo feature selected the
//! backend. Every backend defines the same set of free functions — no
//! trait objects here, matching the rest of this crate's no-`dyn` design.
//! Only [`sim`] is exercised by `cargo test`; `avr` is the one part of this
//! crate that can only be validated on real hardware.

cfg_if::cfg_if! {
    if #[cfg(feature = "avr")] {
        #[macro_use]
        pub mod avr;
        pub use avr::*;
    } else {
        pub mod sim;
        pub use sim::*;
    }
}
