/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Software-interrupt dispatch table: argument marshalling from `r0..r5`,
//! `(r0=value, r1=errno-or-0)` return (§4.7).

pub mod handlers;
pub mod numbers;

use crate::arch::armv7::context::CpuContext;
use crate::error::errno;
use crate::interrupt::ExceptionOrigin;
use handlers::{Args, Reply};

type Handler = fn(&Args) -> Reply;

fn table_entry(number: u32) -> Option<Handler> {
    use numbers::*;
    Some(match number {
        PROCESS_CREATE => handlers::process_create,
        PROCESS_EXIT => handlers::process_exit,
        THREAD_CREATE => handlers::thread_create,
        THREAD_EXIT => handlers::thread_exit,
        KERNEL_PUTC => handlers::kernel_putc,
        KERNEL_PUTS => handlers::kernel_puts,
        MEMORY_ACQUIRE => handlers::memory_acquire,
        MEMORY_RELEASE => handlers::memory_release,
        MEMORY_SHARE => handlers::memory_share,
        RPC_SET_HANDLER => handlers::rpc_set_handler,
        RPC_SET_READY => handlers::rpc_set_ready,
        RPC_RAISE => handlers::rpc_raise,
        RPC_RET => handlers::rpc_ret,
        RPC_GET_DATA => handlers::rpc_get_data,
        RPC_WAIT_FOR_CALL => handlers::rpc_wait_for_call,
        RPC_WAIT_FOR_READY => handlers::rpc_wait_for_ready,
        RPC_END => handlers::rpc_end,
        INTERRUPT_ACQUIRE => handlers::interrupt_acquire,
        INTERRUPT_RELEASE => handlers::interrupt_release,
        TIMER_TICK => handlers::timer_tick,
        TIMER_FREQUENCY => handlers::timer_frequency,
        TIMER_ACQUIRE => handlers::timer_acquire,
        TIMER_RELEASE => handlers::timer_release,
        _ => return None,
    })
}

/// Entry point called from [`crate::interrupt::dispatch::handle_svc`].
/// User-origin only: a kernel-origin `svc` is a defect (the kernel never
/// issues `svc` itself) and is treated as `ENOSYS`-equivalent, writing the
/// error back rather than panicking, since it is recoverable for the caller.
pub fn dispatch(_origin: ExceptionOrigin, context: &mut CpuContext, number: u32) {
    let args: Args = [context.r0, context.r1, context.r2, context.r3, context.r4, context.r5];
    let (value, error) = match table_entry(number) {
        Some(handler) => handler(&args),
        None => (0, errno::EINVAL),
    };
    context.r0 = value;
    context.r1 = error as u32;
}
