/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Per-syscall handler bodies. Each takes the raw `r0..r5` arguments already
//! validated by [`super::dispatch`] and returns `(value, errno)`.

use crate::arch::armv7::mmu::MemoryType;
use crate::error::errno;
use crate::error::IntoErrno;
use crate::interrupt::{InterruptKind, Subscription, REGISTRY};
use crate::memory::addr::PAGE_SIZE;
use crate::memory::phys::{Pool, ALLOCATOR};
use crate::memory::virt::MapFlags;
use crate::rpc::engine::{self, RaiseParams};
use crate::task::process::Pid;
use crate::task::thread::{StateData, ThreadState, Tid};
use crate::task::PROCESS_TABLE;

pub type Args = [u32; 6];
pub type Reply = (u32, isize);

fn ok(value: u32) -> Reply {
    (value, 0)
}

fn err(code: isize) -> Reply {
    (0, code)
}

pub fn current() -> (Pid, Tid) {
    PROCESS_TABLE.lock(|t| t.current).expect("syscall entered with no current thread")
}

/// `process_create(): pid` — fork the calling process (§4.5).
pub fn process_create(_args: &Args) -> Reply {
    let (pid, _) = current();
    match PROCESS_TABLE.lock(|t| t.fork(pid)) {
        Ok(child_pid) => ok(child_pid),
        Err(e) => err(e.into_errno()),
    }
}

/// `process_exit()` — tear down the calling process's PCB and queue
/// entries; does not return to the caller.
pub fn process_exit(_args: &Args) -> Reply {
    let (pid, _) = current();
    PROCESS_TABLE.lock(|t| {
        t.destroy_process(pid);
        if t.current.map(|(p, _)| p) == Some(pid) {
            t.current = None;
        }
    });
    ok(0)
}

/// `thread_create(entry, stack_size, priority): tid`.
pub fn thread_create(args: &Args) -> Reply {
    let (pid, _) = current();
    let entry = args[0];
    let stack_size = if args[1] == 0 { 0x1000 } else { args[1] };
    let priority = args[2] as u8;
    let tid = PROCESS_TABLE.lock(|t| {
        let process = t.processes.get_mut(&pid)?;
        let tid = process.spawn_thread(priority, entry, stack_size);
        process.threads.get_mut(&tid).expect("just inserted").transition(ThreadState::Ready);
        t.queues.push(priority, (pid, tid));
        Some(tid)
    });
    match tid {
        Some(tid) => ok(tid),
        None => err(errno::ESRCH),
    }
}

/// `thread_exit()` — reap the calling thread's TCB/stack slot and clear
/// `current` if it was the one running.
pub fn thread_exit(_args: &Args) -> Reply {
    let (pid, tid) = current();
    PROCESS_TABLE.lock(|t| {
        let Some(priority) = t.processes.get(&pid).map(|p| p.priority) else { return };
        t.queues.remove(priority, (pid, tid));
        if let Some(process) = t.processes.get_mut(&pid) {
            process.kill_thread(tid);
        }
        if t.current == Some((pid, tid)) {
            t.current = None;
        }
    });
    ok(0)
}

pub fn kernel_putc(args: &Args) -> Reply {
    let byte = args[0] as u8 as char;
    crate::print!("{}", byte);
    ok(0)
}

pub fn kernel_puts(args: &Args) -> Reply {
    let ptr = args[0];
    let len = args[1] as usize;
    if !validate_user_range(ptr, len as u32) {
        return err(errno::EFAULT);
    }
    let slice = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    if let Ok(s) = core::str::from_utf8(slice) {
        crate::print!("{}", s);
    }
    ok(len as u32)
}

pub fn memory_acquire(args: &Args) -> Reply {
    let size = args[0];
    match ALLOCATOR.lock(|a| a.find_free_page_range(PAGE_SIZE, size, Pool::Normal)) {
        Ok(addr) => ok(addr),
        Err(e) => err(e.into_errno()),
    }
}

pub fn memory_release(args: &Args) -> Reply {
    let addr = args[0];
    let size = args[1];
    match ALLOCATOR.lock(|a| a.free_page_range(addr, size)) {
        Ok(()) => ok(0),
        Err(e) => err(e.into_errno()),
    }
}

/// `memory_share(target_pid, va, size, writable): 0` — map the calling
/// process's already-mapped `[va, va+size)` into `target_pid` at the same
/// VA, backed by the same physical frames (§3.1 ADDED "shared memory fork
/// mappings"). Pages already mapped at that VA in the target are left
/// alone rather than treated as an error.
pub fn memory_share(args: &Args) -> Reply {
    let (pid, _) = current();
    let target_pid = args[0];
    let va = args[1];
    let size = args[2];
    let writable = args[3] != 0;

    if pid == target_pid {
        return err(errno::EINVAL);
    }
    if !validate_user_range(va, size) {
        return err(errno::EFAULT);
    }

    let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
    let result: Result<(), isize> = PROCESS_TABLE.lock(|t| {
        if !t.processes.contains_key(&target_pid) {
            return Err(errno::ESRCH);
        }
        let flags = MapFlags { writable, user_accessible: true };
        for i in 0..pages {
            let page_va = va + i * PAGE_SIZE;
            let pa = t.processes[&pid].context.physical_address_of(page_va).ok_or(errno::EFAULT)?;
            let target = t.processes.get_mut(&target_pid).expect("checked above");
            if target.context.is_mapped(page_va) {
                continue;
            }
            target.context.map_address(page_va, pa, MemoryType::Normal, flags).map_err(|e| e.into_errno())?;
        }
        Ok(())
    });
    match result {
        Ok(()) => ok(0),
        Err(code) => err(code),
    }
}

pub fn rpc_set_handler(args: &Args) -> Reply {
    let (pid, _) = current();
    let handler = args[0];
    PROCESS_TABLE.lock(|t| {
        if let Some(p) = t.processes.get_mut(&pid) {
            p.rpc_handler = handler;
        }
    });
    ok(0)
}

pub fn rpc_set_ready(_args: &Args) -> Reply {
    let (pid, _) = current();
    PROCESS_TABLE.lock(|t| {
        if let Some(p) = t.processes.get_mut(&pid) {
            p.rpc_ready = true;
        }
    });
    ok(0)
}

pub fn rpc_raise(args: &Args) -> Reply {
    let (pid, _) = current();
    let target_proc = args[0];
    let rpc_type = args[1];
    let ptr = args[2];
    let len = args[3] as usize;
    let sync = args[4] != 0;

    let payload: Option<([u8; 256], usize)> = if ptr != 0 && len > 0 {
        if !validate_user_range(ptr, len as u32) {
            return err(errno::EFAULT);
        }
        let mut buf = [0u8; 256];
        let n = len.min(buf.len());
        unsafe { core::ptr::copy_nonoverlapping(ptr as *const u8, buf.as_mut_ptr(), n) };
        Some((buf, n))
    } else {
        None
    };

    let result = engine::raise(RaiseParams {
        source_pid: pid,
        target_proc,
        rpc_type,
        data: payload.as_ref().map(|(b, n)| &b[..*n]),
        target_thread: None,
        sync,
        origin_rpc_id: 0,
        disable_data: false,
    });
    match result {
        Ok(Some(id)) => ok(id),
        Ok(None) => ok(0),
        Err(e) => err(e.into_errno()),
    }
}

pub fn rpc_ret(args: &Args) -> Reply {
    let (pid, tid) = current();
    let rpc_type = args[0];
    let ptr = args[1];
    let len = args[2] as usize;
    let original_rpc_id = args[3];

    let mut buf = [0u8; 256];
    let payload = if ptr != 0 && len > 0 {
        if !validate_user_range(ptr, len as u32) {
            return err(errno::EFAULT);
        }
        let n = len.min(buf.len());
        unsafe { core::ptr::copy_nonoverlapping(ptr as *const u8, buf.as_mut_ptr(), n) };
        Some(&buf[..n])
    } else {
        None
    };

    match engine::rpc_ret(pid, tid, rpc_type, payload, original_rpc_id) {
        Ok(()) => ok(0),
        Err(e) => err(e.into_errno()),
    }
}

pub fn rpc_get_data(args: &Args) -> Reply {
    let (pid, _) = current();
    let ptr = args[0];
    let len = args[1] as usize;
    let data_id = args[2];
    let peek = args[3] != 0;

    if !validate_user_range(ptr, len as u32) {
        return err(errno::EFAULT);
    }
    let copied = PROCESS_TABLE.lock(|t| {
        let process = t.processes.get_mut(&pid)?;
        let mut buf = [0u8; 256];
        let n = process.rpc_data_queue.get(data_id, &mut buf[..len.min(256)], peek)?;
        unsafe { core::ptr::copy_nonoverlapping(buf.as_ptr(), ptr as *mut u8, n) };
        Some(n)
    });
    match copied {
        Some(n) => ok(n as u32),
        None => err(errno::ENOENT),
    }
}

pub fn rpc_wait_for_call(_args: &Args) -> Reply {
    let (pid, tid) = current();
    PROCESS_TABLE.lock(|t| {
        if let Some(thread) = t.processes.get_mut(&pid).and_then(|p| p.threads.get_mut(&tid)) {
            thread.block(ThreadState::RpcWaitForCall, StateData::default());
        }
    });
    ok(0)
}

pub fn rpc_wait_for_ready(_args: &Args) -> Reply {
    let (pid, tid) = current();
    PROCESS_TABLE.lock(|t| {
        if let Some(thread) = t.processes.get_mut(&pid).and_then(|p| p.threads.get_mut(&tid)) {
            thread.block(ThreadState::RpcWaitForReady, StateData::default());
        }
    });
    ok(0)
}

pub fn rpc_end(_args: &Args) -> Reply {
    let (pid, tid) = current();
    match engine::restore(pid, tid) {
        Ok(()) => ok(0),
        Err(e) => err(e.into_errno()),
    }
}

pub fn timer_tick(_args: &Args) -> Reply {
    ok(crate::timer::current_tick() as u32)
}

pub fn timer_frequency(args: &Args) -> Reply {
    crate::timer::set_frequency(args[0]);
    ok(0)
}

pub fn timer_acquire(args: &Args) -> Reply {
    let (pid, tid) = current();
    crate::timer::acquire(args[0] as u64, pid, tid, args[1]);
    ok(0)
}

pub fn timer_release(_args: &Args) -> Reply {
    let (pid, tid) = current();
    crate::timer::release(pid, tid);
    ok(0)
}

fn decode_interrupt_kind(value: u32) -> InterruptKind {
    match value {
        0 => InterruptKind::Normal,
        1 => InterruptKind::Fast,
        _ => InterruptKind::Software,
    }
}

/// `interrupt_acquire(num, kind, rpc_type, enable): 0` — subscribe the
/// calling process to line `num`, raising `rpc_type` on it when the line
/// fires (§4.4 registry `processes` list).
pub fn interrupt_acquire(args: &Args) -> Reply {
    let (pid, _) = current();
    let num = args[0];
    let kind = decode_interrupt_kind(args[1]);
    let rpc_type = args[2];
    let enable = args[3] != 0;
    REGISTRY.lock(|r| r.register_handler(num, kind, None, false, Some(Subscription { process: pid, rpc_type }), enable));
    ok(0)
}

pub fn interrupt_release(args: &Args) -> Reply {
    let (pid, _) = current();
    let num = args[0];
    let kind = decode_interrupt_kind(args[1]);
    REGISTRY.lock(|r| r.unregister_process(num, kind, pid));
    ok(0)
}

/// Validate that `[ptr, ptr+len)` lies entirely within the current process's
/// mapped range (§4.7: "validated against the current user context's mapped
/// range before dereference").
pub fn validate_user_range(ptr: u32, len: u32) -> bool {
    if ptr == 0 {
        return false;
    }
    let (pid, _) = current();
    PROCESS_TABLE.lock(|t| {
        let Some(process) = t.processes.get(&pid) else { return false };
        let pages = (len + PAGE_SIZE - 1) / PAGE_SIZE;
        (0..pages.max(1)).all(|i| process.context.is_mapped(ptr + i * PAGE_SIZE))
    })
}
