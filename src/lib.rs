/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

#![no_std]
#![no_main]
#![feature(format_args_nl)]
#![feature(panic_info_message)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::tests::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(clippy::upper_case_acronyms)]
#![deny(warnings)]

#[cfg(not(target_arch = "arm"))]
use architecture_not_supported_sorry;

extern crate alloc;

use alloc::boxed::Box;

pub mod arch;
pub mod boot_info;
pub mod console;
pub mod devices;
pub mod elf;
pub mod error;
pub mod event;
pub mod interrupt;
pub mod memory;
pub mod panic;
pub mod qemu;
pub mod rpc;
pub mod sync;
pub mod syscall;
pub mod task;
#[cfg(test)]
pub mod tests;
pub mod timer;
pub mod write_to;

#[global_allocator]
static ALLOCATOR: memory::heap::KernelAllocator = memory::heap::KernelAllocator;

#[cfg(not(test))]
#[panic_handler]
fn panicked(info: &core::panic::PanicInfo) -> ! {
    panic::handler(info)
}

/// Size of the boot-time bump window handed to the Early heap phase, before
/// `virt::init` can map the Normal-phase window (§4.3).
const INITIAL_HEAP_SIZE: usize = 64 * 1024;

/// Entry point the arch boot path calls once `.bss` is cleared and every
/// privileged mode has its own stack (§4.8 Boot sequence).
///
/// # Safety
/// Must be called exactly once, from [`arch::armv7::boot::_start`].
pub unsafe fn kernel_entry(firmware: boot_info::FirmwareInfo) -> ! {
    let uart = devices::pl011::Pl011Uart::new(0x0900_0000);
    uart.init();
    console::register_console(&*Box::leak(Box::new(uart)));

    crate::info!("ferrokernel booting (machine_id={:#x})", firmware.machine_id);

    let kernel_end = 0x0020_0000u32; // linker-provided in the real image; placeholder here.
    memory::phys::ALLOCATOR.lock(|a| {
        a.init(1 << 20, kernel_end, firmware.initrd_phys_range, (1 << 20) - 4096, 4096);
    });

    memory::heap::init_early(0x0040_0000, INITIAL_HEAP_SIZE);

    arch::armv7::traps::install();

    memory::heap::init_normal(0x0050_0000);

    task::install_event_handlers();

    task::PROCESS_TABLE.lock(|table| {
        let ctx = memory::virt::AddressContext::new(memory::virt::ContextType::Kernel);
        let kernel_pid = table.create_process(0, 0, ctx);
        table.set_kernel_pid(kernel_pid);
    });

    crate::info!("ferrokernel init complete, idling");
    loop {
        task::scheduler::schedule(None);
    }
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[panic_handler]
    fn panicked(info: &core::panic::PanicInfo) -> ! {
        panic::handler_for_tests(info)
    }

    /// Entry point for the test image; called by the same arch boot path
    /// that calls [`kernel_entry`] in a normal build.
    #[no_mangle]
    pub unsafe extern "C" fn main() -> ! {
        let uart = devices::pl011::Pl011Uart::new(0x0900_0000);
        uart.init();
        console::register_console(&*Box::leak(Box::new(uart)));
        test_main();
        qemu::semihosting::exit_success()
    }
}
