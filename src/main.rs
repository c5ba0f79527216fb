/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Binary entry point. All of the kernel's logic, the `_start` reset vector
//! (`global_asm!` in `arch::armv7::boot`) and the panic handler live in the
//! library crate; this file only needs to pull it into the final image.

#![no_std]
#![no_main]

#[cfg(not(target_arch = "arm"))]
use architecture_not_supported_sorry;

use ferrokernel as _;
