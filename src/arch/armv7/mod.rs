/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! ARMv7-A architecture support: boot entry, CP15 access, short-descriptor
//! page tables, and the exception vector table.

pub mod boot;
pub mod context;
pub mod cp15;
pub mod mmu;
pub mod traps;

pub use context::CpuContext;

use core::arch::asm;
use core::sync::atomic::{AtomicBool, Ordering};

static IRQ_MASKED: AtomicBool = AtomicBool::new(false);

/// Disable IRQs (sets CPSR.I), run `f`, then restore the previous mask state.
///
/// Used by [`crate::sync::IrqSafeNullLock`] and anywhere the kernel must not be
/// reentered by an interrupt mid-mutation (the registries named in §9's "Global
/// mutable state").
pub fn exec_with_irq_masked<R>(f: impl FnOnce() -> R) -> R {
    let was_masked = is_irq_masked();
    mask_irq();
    let ret = f();
    if !was_masked {
        unmask_irq();
    }
    ret
}

pub fn is_irq_masked() -> bool {
    IRQ_MASKED.load(Ordering::Relaxed)
}

/// # Safety
/// Only called from [`exec_with_irq_masked`] and the scheduler's idle path.
pub fn mask_irq() {
    unsafe {
        asm!("cpsid i", options(nomem, nostack));
    }
    IRQ_MASKED.store(true, Ordering::Relaxed);
}

/// # Safety
/// Only called from [`exec_with_irq_masked`] and the scheduler's idle path.
pub fn unmask_irq() {
    IRQ_MASKED.store(false, Ordering::Relaxed);
    unsafe {
        asm!("cpsie i", options(nomem, nostack));
    }
}

/// Architectural halt: wait for an interrupt, then return.
///
/// Used by the scheduler's idle path (§4.5): re-enable interrupts, halt, and let
/// the next interrupt (timer or otherwise) race to deliver a runnable thread.
#[inline(always)]
pub fn wfi() {
    unsafe {
        asm!("wfi", options(nomem, nostack));
    }
}

/// Loop forever, halting between interrupts. Used by the panic path and as the
/// fallback if the scheduler ever runs completely out of work permanently.
pub fn endless_sleep() -> ! {
    loop {
        wfi();
    }
}
