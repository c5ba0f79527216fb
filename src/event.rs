/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Event bus: a compile-time set of event types, each bound to a list of
//! synchronous handlers invoked from the exception-return tail (§3
//! "Event bus").

use crate::sync::IrqSafeNullLock;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventType {
    Process,
    Serial,
    Debug,
    InterruptCleanup,
}

/// Matches [`crate::interrupt::ExceptionOrigin`]; duplicated here (rather than
/// imported) so this module has no dependency on the interrupt registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Kernel,
    User,
}

pub type Handler = fn(Origin);

struct Bus {
    process: Vec<Handler>,
    serial: Vec<Handler>,
    debug: Vec<Handler>,
    interrupt_cleanup: Vec<Handler>,
    queued: VecDeque<(EventType, Origin)>,
}

impl Bus {
    const fn new() -> Self {
        Self {
            process: Vec::new(),
            serial: Vec::new(),
            debug: Vec::new(),
            interrupt_cleanup: Vec::new(),
            queued: VecDeque::new(),
        }
    }

    fn handlers(&self, ty: EventType) -> &Vec<Handler> {
        match ty {
            EventType::Process => &self.process,
            EventType::Serial => &self.serial,
            EventType::Debug => &self.debug,
            EventType::InterruptCleanup => &self.interrupt_cleanup,
        }
    }

    fn handlers_mut(&mut self, ty: EventType) -> &mut Vec<Handler> {
        match ty {
            EventType::Process => &mut self.process,
            EventType::Serial => &mut self.serial,
            EventType::Debug => &mut self.debug,
            EventType::InterruptCleanup => &mut self.interrupt_cleanup,
        }
    }
}

static BUS: IrqSafeNullLock<Bus> = IrqSafeNullLock::new(Bus::new());

pub fn bind(ty: EventType, handler: Handler) {
    BUS.lock(|bus| bus.handlers_mut(ty).push(handler));
}

/// Append `(type, origin)` to the pending queue; drained by [`drain`] at
/// exception return.
pub fn event_enqueue(ty: EventType, origin: Origin) {
    BUS.lock(|bus| bus.queued.push_back((ty, origin)));
}

/// Run every handler bound to each queued event, in enqueue order, then
/// clear the queue. Called once per exception return.
pub fn drain() {
    loop {
        let next = BUS.lock(|bus| bus.queued.pop_front());
        let Some((ty, origin)) = next else {
            break;
        };
        let handlers = BUS.lock(|bus| bus.handlers(ty).clone());
        for handler in handlers {
            handler(origin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static HITS: AtomicUsize = AtomicUsize::new(0);

    fn bump(_origin: Origin) {
        HITS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn bound_handlers_run_in_enqueue_order_then_queue_empties() {
        HITS.store(0, Ordering::Relaxed);
        bind(EventType::Debug, bump);
        event_enqueue(EventType::Debug, Origin::Kernel);
        event_enqueue(EventType::Debug, Origin::User);
        drain();
        assert_eq!(HITS.load(Ordering::Relaxed), 2);
        drain();
        assert_eq!(HITS.load(Ordering::Relaxed), 2);
    }
}
