/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Monotonic tick counter and timer callback list (§4.7, §3.1 ADDED).
//!
//! Grounded in `original_source/bolthur/kernel/timer.c`'s non-allocating
//! peel-while-expired loop, expressed here as an insertion-sorted `Vec`
//! (simplest correct equivalent of the original's sorted singly-linked list).

use crate::rpc::engine::{self, RaiseParams};
use crate::task::process::Pid;
use crate::task::thread::Tid;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy)]
struct Callback {
    expire_tick: u64,
    pid: Pid,
    rpc_number: u32,
    tid: Tid,
}

struct Timer {
    tick: u64,
    frequency_hz: u32,
    callbacks: Vec<Callback>,
}

impl Timer {
    const fn new() -> Self {
        Self { tick: 0, frequency_hz: 0, callbacks: Vec::new() }
    }

    fn set_frequency(&mut self, hz: u32) {
        self.frequency_hz = hz;
    }

    fn schedule(&mut self, ticks_from_now: u64, pid: Pid, tid: Tid, rpc_number: u32) {
        let entry = Callback { expire_tick: self.tick + ticks_from_now, pid, rpc_number, tid };
        let pos = self.callbacks.partition_point(|c| c.expire_tick <= entry.expire_tick);
        self.callbacks.insert(pos, entry);
    }

    /// Cancel every pending callback belonging to `(pid, tid)`.
    fn release(&mut self, pid: Pid, tid: Tid) {
        self.callbacks.retain(|c| !(c.pid == pid && c.tid == tid));
    }

    /// Advance the tick counter by one and peel every expired callback off
    /// the (sorted) head, raising an RPC per entry.
    fn tick(&mut self) -> Vec<Callback> {
        self.tick += 1;
        let cutoff = self.callbacks.partition_point(|c| c.expire_tick <= self.tick);
        self.callbacks.drain(..cutoff).collect()
    }
}

pub static TIMER: crate::sync::IrqSafeNullLock<Timer> = crate::sync::IrqSafeNullLock::new(Timer::new());

pub fn set_frequency(hz: u32) {
    TIMER.lock(|t| t.set_frequency(hz));
}

pub fn acquire(ticks_from_now: u64, pid: Pid, tid: Tid, rpc_number: u32) {
    TIMER.lock(|t| t.schedule(ticks_from_now, pid, tid, rpc_number));
}

pub fn current_tick() -> u64 {
    TIMER.lock(|t| t.tick)
}

pub fn release(pid: Pid, tid: Tid) {
    TIMER.lock(|t| t.release(pid, tid));
}

/// Called from the timer IRQ's kernel pre-handler: advance the tick and
/// raise an RPC for every callback that just expired.
pub fn on_tick() {
    let expired = TIMER.lock(|t| t.tick());
    for callback in expired {
        let _ = engine::raise(RaiseParams {
            source_pid: 0,
            target_proc: callback.pid,
            rpc_type: callback.rpc_number,
            data: None,
            target_thread: Some(callback.tid),
            sync: false,
            origin_rpc_id: 0,
            disable_data: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callbacks_are_peeled_in_expiration_order() {
        let mut t = Timer::new();
        t.schedule(3, 1, 1, 0x10);
        t.schedule(1, 2, 1, 0x20);
        t.schedule(2, 3, 1, 0x30);
        assert!(t.tick().is_empty());
        let first = t.tick();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].pid, 2);
        assert!(t.tick().is_empty());
        let second = t.tick();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].pid, 3);
    }

    #[test]
    fn release_drops_only_the_matching_callback() {
        let mut t = Timer::new();
        t.schedule(1, 1, 1, 0x10);
        t.schedule(1, 1, 2, 0x20);
        t.release(1, 1);
        let expired = t.tick();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].tid, 2);
    }
}
