/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Architecture-specific code, selected at compile time.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        pub mod armv7;
        pub use armv7::*;
    } else {
        compile_error!("ferrokernel only supports target_arch = \"arm\" (ARMv7-A)");
    }
}
