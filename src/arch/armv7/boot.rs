/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Reset entry point: per-mode stack assignment, `.bss` clearing, and the
//! jump into [`crate::kernel_entry`].
//!
//! Grounded in the teacher's `nucleus/src/arch/aarch64/boot.rs`/
//! `machine/src/arch/aarch64/boot.rs` entry stub, with AArch64 EL-switching
//! replaced by ARMv7-A CPSR mode-switching (the original's
//! `arch/arm/v7/boot.S` performs the same per-mode stack carve-up).

use core::arch::global_asm;

/// ARM CPSR mode encodings (bits M4:M0).
mod mode {
    pub const FIQ: u32 = 0b10001;
    pub const IRQ: u32 = 0b10010;
    pub const SVC: u32 = 0b10011;
    pub const ABT: u32 = 0b10111;
    pub const UND: u32 = 0b11011;
    pub const SYS: u32 = 0b11111;
}

/// Exported so the linker script can size each mode's stack region.
pub const FIQ_STACK_SIZE: u32 = 1024;
pub const IRQ_STACK_SIZE: u32 = 4096;
pub const ABT_STACK_SIZE: u32 = 1024;
pub const UND_STACK_SIZE: u32 = 1024;
pub const SVC_STACK_SIZE: u32 = 16 * 1024;

global_asm!(
    r#"
.section .text._start
.global _start
_start:
    // Only the boot core runs this; secondary cores are parked (no-SMP §Non-goals).
    mrc p15, 0, r0, c0, c0, 5
    ands r0, r0, #3
    bne  _halt

    // Mode-switch through each privileged mode and give it its own stack,
    // carved down from the symbols the linker script places just below
    // `__kernel_stack_top`.
    ldr  r0, =__fiq_stack_top
    msr  cpsr_c, #{fiq}
    mov  sp, r0

    ldr  r0, =__irq_stack_top
    msr  cpsr_c, #{irq}
    mov  sp, r0

    ldr  r0, =__abt_stack_top
    msr  cpsr_c, #{abt}
    mov  sp, r0

    ldr  r0, =__und_stack_top
    msr  cpsr_c, #{und}
    mov  sp, r0

    ldr  r0, =__svc_stack_top
    msr  cpsr_c, #{svc}
    mov  sp, r0

    bl   {clear_bss}
    bl   {runtime_entry}

_halt:
    wfi
    b    _halt
"#,
    fiq = const mode::FIQ | (1 << 6) | (1 << 7),
    irq = const mode::IRQ | (1 << 6) | (1 << 7),
    abt = const mode::ABT | (1 << 6) | (1 << 7),
    und = const mode::UND | (1 << 6) | (1 << 7),
    svc = const mode::SVC | (1 << 6) | (1 << 7),
    clear_bss = sym clear_bss,
    runtime_entry = sym runtime_entry,
);

extern "C" {
    static mut __bss_start: u64;
    static mut __bss_end: u64;
}

/// Zero the `.bss` section word-by-word, mirroring the teacher's
/// `runtime_init::zero_bss`.
unsafe extern "C" fn clear_bss() {
    let mut ptr = core::ptr::addr_of_mut!(__bss_start);
    let end = core::ptr::addr_of_mut!(__bss_end);
    while ptr < end {
        core::ptr::write_volatile(ptr, 0);
        ptr = ptr.offset(1);
    }
}

/// Falls through into the architecture-independent entry once early
/// hand-off work is done. Never returns.
unsafe extern "C" fn runtime_entry() -> ! {
    crate::kernel_entry()
}
