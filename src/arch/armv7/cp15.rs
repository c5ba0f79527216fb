/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Access to the ARMv7 system control coprocessor (CP15).
//!
//! There is no widely used ARMv7-A equivalent of the `aarch64-cpu`/`cortex-a`
//! register crates the teacher uses for AArch64, so CP15 access is a thin set
//! of `mrc`/`mcr` wrappers; bitfield interpretation reuses `tock_registers`
//! exactly like the teacher's MMIO drivers do, by wrapping the raw `u32` in a
//! `LocalRegisterCopy`.

use core::arch::asm;
use tock_registers::{register_bitfields, LocalRegisterCopy};

register_bitfields! {
    u32,

    pub SCTLR [
        /// MMU enable.
        M OFFSET(0) NUMBITS(1) [],
        /// Alignment check enable.
        A OFFSET(1) NUMBITS(1) [],
        /// Cache enable (data/unified).
        C OFFSET(2) NUMBITS(1) [],
        /// Instruction cache enable.
        I OFFSET(12) NUMBITS(1) [],
        /// High exception vectors.
        V OFFSET(13) NUMBITS(1) [],
    ],

    pub DFSR [
        STATUS_4_0 OFFSET(0) NUMBITS(4) [],
        DOMAIN OFFSET(4) NUMBITS(4) [],
        STATUS_10 OFFSET(10) NUMBITS(1) [],
        WNR OFFSET(11) NUMBITS(1) [],
    ]
}

macro_rules! cp15_read {
    ($name:ident, $crn:literal, $op1:literal, $crm:literal, $op2:literal) => {
        #[inline(always)]
        pub fn $name() -> u32 {
            let value: u32;
            unsafe {
                asm!(concat!("mrc p15, ", $op1, ", {0}, c", $crn, ", c", $crm, ", ", $op2),
                    out(reg) value, options(nomem, nostack, preserves_flags));
            }
            value
        }
    };
}

macro_rules! cp15_write {
    ($name:ident, $crn:literal, $op1:literal, $crm:literal, $op2:literal) => {
        /// # Safety
        /// Writes global CPU state (paging, caching, fault status).
        #[inline(always)]
        pub unsafe fn $name(value: u32) {
            asm!(concat!("mcr p15, ", $op1, ", {0}, c", $crn, ", c", $crm, ", ", $op2),
                in(reg) value, options(nomem, nostack, preserves_flags));
        }
    };
}

cp15_read!(read_sctlr, 1, 0, 0, 0);
cp15_write!(write_sctlr, 1, 0, 0, 0);

cp15_read!(read_ttbr0, 2, 0, 0, 0);
cp15_write!(write_ttbr0, 2, 0, 0, 0);

cp15_read!(read_ttbcr, 2, 0, 0, 2);
cp15_write!(write_ttbcr, 2, 0, 0, 2);

cp15_write!(write_dacr, 3, 0, 0, 0);

cp15_read!(read_dfsr, 5, 0, 0, 0);
cp15_read!(read_ifsr, 5, 0, 0, 1);
cp15_read!(read_dfar, 6, 0, 0, 0);
cp15_read!(read_ifar, 6, 0, 0, 2);

cp15_write!(write_contextidr, 13, 0, 0, 1);

/// Invalidate the entire unified TLB.
///
/// # Safety
/// Must be followed by an instruction barrier before relying on the new mappings.
#[inline(always)]
pub unsafe fn tlbiall() {
    asm!("mcr p15, 0, {0}, c8, c7, 0", in(reg) 0u32, options(nomem, nostack));
}

/// Invalidate a single TLB entry by modified virtual address.
///
/// # Safety
/// Must be followed by an instruction barrier before relying on the new mapping.
#[inline(always)]
pub unsafe fn tlbimva(mva: u32) {
    asm!("mcr p15, 0, {0}, c8, c7, 1", in(reg) mva, options(nomem, nostack));
}

#[inline(always)]
pub fn sctlr() -> LocalRegisterCopy<u32, SCTLR::Register> {
    LocalRegisterCopy::new(read_sctlr())
}

#[inline(always)]
pub fn dfsr() -> LocalRegisterCopy<u32, DFSR::Register> {
    LocalRegisterCopy::new(read_dfsr())
}

/// Instruction and data synchronization barriers.
#[inline(always)]
pub fn isb() {
    unsafe { asm!("isb", options(nomem, nostack)) }
}

#[inline(always)]
pub fn dsb() {
    unsafe { asm!("dsb", options(nomem, nostack)) }
}
