/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The global console used by the kernel's `print!`/`println!`/`info!` macros.

use crate::{devices::ConsoleOps, sync::NullLock};
use core::fmt;

struct NullConsole;

impl crate::devices::SerialOps for NullConsole {}
impl ConsoleOps for NullConsole {}

static CONSOLE: NullLock<&'static (dyn ConsoleOps + Sync)> = NullLock::new(&NullConsole);

/// Install the console used for the remainder of the boot, typically the PL011
/// driver once its MMIO window has been mapped.
pub fn register_console(new_console: &'static (dyn ConsoleOps + Sync)) {
    CONSOLE.lock(|con| *con = new_console);
}

/// Run a closure with a handle to the currently registered console.
pub fn console() -> &'static dyn ConsoleOps {
    CONSOLE.lock(|con| *con)
}

struct ConsoleWriter;

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        console().write_string(s);
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let _ = ConsoleWriter.write_fmt(args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::console::_print(format_args_nl!($($arg)*)));
}

#[macro_export]
macro_rules! info {
    ($string:expr) => ({
        $crate::println!(concat!("[i] ", $string));
    });
    ($format:expr, $($arg:tt)*) => ({
        $crate::println!(concat!("[i] ", $format), $($arg)*);
    })
}
