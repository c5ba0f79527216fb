/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Custom test-framework harness for the hardware-dependent `#[test_case]`
//! tests (boot, exception entry, MMU) that can only run under QEMU; pure
//! logic lives in ordinary `#[cfg(test)]` unit tests instead.

use crate::{print, println, qemu};

pub trait TestFn {
    fn run(&self);
}

impl<T> TestFn for T
where
    T: Fn(),
{
    fn run(&self) {
        print!("*TEST* {}...\t", core::any::type_name::<T>());
        self();
        println!("[ok]");
    }
}

#[cfg(test)]
pub fn test_runner(tests: &[&dyn TestFn]) {
    println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    println!("\n[success]\n");
    qemu::semihosting::exit_success();
}
