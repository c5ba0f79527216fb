/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Panic handler for hardware and for QEMU.

use core::panic::PanicInfo;

fn print_panic_info(info: &PanicInfo) {
    let (location, line, column) = match info.location() {
        Some(loc) => (loc.file(), loc.line(), loc.column()),
        _ => ("???", 0, 0),
    };

    crate::info!(
        "Kernel panic!\n\nPanic location:\n      File '{}', line {}, column {}\n\n{}",
        location,
        line,
        column,
        info.message().unwrap_or(&format_args!("")),
    );
}

pub fn handler(info: &PanicInfo) -> ! {
    panic_prevent_reenter();
    print_panic_info(info);
    crate::arch::endless_sleep()
}

#[cfg(test)]
pub fn handler_for_tests(info: &PanicInfo) -> ! {
    crate::println!("\n[failed]\n");
    panic_prevent_reenter();
    print_panic_info(info);
    crate::qemu::semihosting::exit_failure()
}

/// Stop immediately if called a second time; a panic inside `print_panic_info`
/// itself must not recurse forever.
fn panic_prevent_reenter() {
    use core::sync::atomic::{AtomicBool, Ordering};

    static PANIC_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

    if !PANIC_IN_PROGRESS.load(Ordering::Relaxed) {
        PANIC_IN_PROGRESS.store(true, Ordering::Relaxed);
        return;
    }

    #[cfg(feature = "qemu")]
    crate::qemu::semihosting::exit_failure();
    #[cfg(not(feature = "qemu"))]
    crate::arch::endless_sleep()
}
