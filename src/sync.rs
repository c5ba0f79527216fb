/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Single-core interior-mutability wrappers.
//!
//! The kernel runs on exactly one CPU (see Non-goals, no SMP) and never lets kernel
//! mutation cross a user-return boundary mid-update, so a real spinlock would only
//! be paying for something that can't happen here. `NullLock` documents the intent
//! at every call site without the cost.

use core::cell::UnsafeCell;

/// Interior-mutability cell usable from `static` kernel-global singletons.
///
/// # Safety
///
/// Callers must not call `lock` reentrantly on the same instance (e.g. from within
/// the closure passed to an outer `lock` call) or hold the returned reference across
/// a context switch.
pub struct NullLock<T: ?Sized> {
    data: UnsafeCell<T>,
}

// Safe because the kernel is single-core and interrupts are masked around every
// mutation that matters (see `IrqSafeNullLock`).
unsafe impl<T: ?Sized> Sync for NullLock<T> {}
unsafe impl<T: ?Sized + Send> Send for NullLock<T> {}

impl<T> NullLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> NullLock<T> {
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(unsafe { &mut *self.data.get() })
    }
}

/// Like [`NullLock`], but masks IRQs for the duration of the closure.
///
/// Use this for state that an interrupt handler might also touch (the scheduler
/// queues, the interrupt registry, the event bus); plain [`NullLock`] is enough
/// for state that is only ever touched from synchronous kernel-entry code.
pub struct IrqSafeNullLock<T: ?Sized> {
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized> Sync for IrqSafeNullLock<T> {}
unsafe impl<T: ?Sized + Send> Send for IrqSafeNullLock<T> {}

impl<T> IrqSafeNullLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> IrqSafeNullLock<T> {
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        crate::arch::exec_with_irq_masked(|| f(unsafe { &mut *self.data.get() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_lock_grants_mutable_access() {
        let lock = NullLock::new(0u32);
        lock.lock(|v| *v += 1);
        lock.lock(|v| *v += 41);
        assert_eq!(lock.lock(|v| *v), 42);
    }
}
