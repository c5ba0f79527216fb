/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Kind-specific dispatch logic invoked by the arch-layer entry stubs
//! (§4.4 steps (d)-(e)).

use crate::arch::armv7::context::CpuContext;
use crate::event::{event_enqueue, EventType, Origin as EventOrigin};
use crate::interrupt::{ExceptionOrigin, InterruptKind, NestingGuard, REGISTRY};
use crate::rpc::engine::{self, RaiseParams};
use crate::task::{scheduler, PROCESS_TABLE};

fn to_event_origin(origin: ExceptionOrigin) -> EventOrigin {
    match origin {
        ExceptionOrigin::Kernel => EventOrigin::Kernel,
        ExceptionOrigin::User => EventOrigin::User,
    }
}

/// Run every kernel pre-handler, forward to subscribing processes via RPC,
/// then run every kernel post-handler (§4.4 registry semantics).
fn dispatch_line(num: u32, kind: InterruptKind) {
    let (pre, post, subs) = REGISTRY.lock(|registry| {
        let tree = registry.tree(kind);
        match tree.get(&num) {
            Some(line) => (line.pre.clone(), line.post.clone(), {
                let mut out = alloc::vec::Vec::new();
                for s in &line.processes {
                    out.push((s.process, s.rpc_type));
                }
                out
            }),
            None => (alloc::vec::Vec::new(), alloc::vec::Vec::new(), alloc::vec::Vec::new()),
        }
    });

    for handler in &pre {
        handler();
    }
    for (pid, rpc_type) in subs {
        let _ = engine::raise(RaiseParams {
            source_pid: 0,
            target_proc: pid,
            rpc_type,
            data: None,
            target_thread: None,
            sync: false,
            origin_rpc_id: 0,
            disable_data: false,
        });
    }
    for handler in &post {
        handler();
    }
}

fn common_entry(kind: InterruptKind, origin: ExceptionOrigin, num: u32, context: &mut CpuContext) {
    let _guard = NestingGuard::enter(kind);
    dispatch_line(num, kind);
    event_enqueue(EventType::InterruptCleanup, to_event_origin(origin));
    if kind == InterruptKind::Normal {
        scheduler::schedule(if origin == ExceptionOrigin::Kernel { Some(&*context) } else { None });
    }
}

pub fn handle_irq(origin: ExceptionOrigin, context: &mut CpuContext) {
    // The concrete IRQ number is read from the interrupt controller by the
    // arch layer; placeholder 0 stands in for "whatever line the GIC/VIC
    // reported" until that driver is wired in.
    common_entry(InterruptKind::Normal, origin, 0, context);
}

pub fn handle_fiq(origin: ExceptionOrigin, context: &mut CpuContext) {
    common_entry(InterruptKind::Fast, origin, 0, context);
}

pub fn handle_svc(origin: ExceptionOrigin, context: &mut CpuContext, number: u32) {
    let _guard = NestingGuard::enter(InterruptKind::Software);
    crate::syscall::dispatch(origin, context, number);
    event_enqueue(EventType::InterruptCleanup, to_event_origin(origin));
}

pub fn handle_undef(origin: ExceptionOrigin, context: &mut CpuContext) {
    let _guard = NestingGuard::enter(InterruptKind::Normal);
    fault(origin, context, "undefined instruction");
}

pub fn handle_prefetch_abort(origin: ExceptionOrigin, context: &mut CpuContext) {
    let _guard = NestingGuard::enter(InterruptKind::Normal);
    fault(origin, context, "prefetch abort");
}

pub fn handle_data_abort(origin: ExceptionOrigin, context: &mut CpuContext) {
    let _guard = NestingGuard::enter(InterruptKind::Normal);
    fault(origin, context, "data abort");
}

/// Fatal faults from kernel origin panic the kernel (§9); user-origin
/// faults are reported and the thread is killed by the process manager.
fn fault(origin: ExceptionOrigin, context: &mut CpuContext, what: &str) {
    match origin {
        ExceptionOrigin::Kernel => {
            panic!("{what} from kernel context at pc={:#x}", context.pc);
        }
        ExceptionOrigin::User => {
            crate::info!("{} from user context at pc={:#x}, killing thread", what, context.pc);
            PROCESS_TABLE.lock(|table| table.kill_current_thread());
            event_enqueue(EventType::InterruptCleanup, EventOrigin::User);
            event_enqueue(EventType::Process, EventOrigin::User);
        }
    }
}
