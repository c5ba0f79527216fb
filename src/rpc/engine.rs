/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! RPC engine: `raise`/`restore`/`rpc_ret` (§4.6).

use crate::error::errno;
use crate::rpc::backup::RpcBackup;
use crate::rpc::origin::OriginRecord;
use crate::task::process::Pid;
use crate::task::thread::{StateData, ThreadState, Tid};
use crate::task::PROCESS_TABLE;
use snafu::Snafu;

/// Architectural "max alignment" SP must be rounded down to before entering
/// a user RPC handler.
const STACK_ALIGN: u32 = 8;

#[derive(Debug, Snafu)]
pub enum RpcError {
    #[snafu(display("target process {pid} is not rpc_ready"))]
    NotReady { pid: Pid },
    #[snafu(display("target process {pid} has no thread accepting rpc"))]
    NoCandidateThread { pid: Pid },
    #[snafu(display("rpc backup {id} is not active"))]
    NotActive { id: u32 },
}

impl crate::error::IntoErrno for RpcError {
    fn into_errno(self) -> isize {
        match self {
            RpcError::NotReady { .. } => errno::EAGAIN,
            RpcError::NoCandidateThread { .. } => errno::ESRCH,
            RpcError::NotActive { .. } => errno::EINVAL,
        }
    }
}

type Result<T> = core::result::Result<T, RpcError>;

static NEXT_RPC_ID: crate::sync::IrqSafeNullLock<u32> = crate::sync::IrqSafeNullLock::new(1);

fn alloc_rpc_id() -> u32 {
    NEXT_RPC_ID.lock(|id| {
        let current = *id;
        *id = id.wrapping_add(1).max(1);
        current
    })
}

#[derive(Clone, Copy)]
pub struct RaiseParams<'a> {
    pub source_pid: Pid,
    pub target_proc: Pid,
    pub rpc_type: u32,
    pub data: Option<&'a [u8]>,
    pub target_thread: Option<Tid>,
    pub sync: bool,
    pub origin_rpc_id: u32,
    pub disable_data: bool,
}

/// §4.6 `raise`. Returns the fresh `data_id` the caller's syscall surfaces.
pub fn raise(params: RaiseParams) -> Result<Option<u32>> {
    PROCESS_TABLE.lock(|table| {
        let target = table
            .processes
            .get_mut(&params.target_proc)
            .ok_or(RpcError::NoCandidateThread { pid: params.target_proc })?;

        if !target.rpc_ready {
            return NotReadySnafu { pid: params.target_proc }.fail();
        }
        let tid = target
            .rpc_candidate_thread(params.target_thread)
            .ok_or(RpcError::NoCandidateThread { pid: params.target_proc })?;

        let thread = target.threads.get_mut(&tid).expect("candidate tid must exist");
        let saved_context = thread.context;
        let saved_state = if thread.state == ThreadState::RpcWaitForCall {
            ThreadState::Active
        } else {
            thread.state
        };
        let saved_state_data = thread.state_data;

        let data_id = if params.disable_data {
            None
        } else {
            Some(target.rpc_data_queue.enqueue(params.data))
        };

        let rpc_id = alloc_rpc_id();
        let mut backup = RpcBackup::new(
            rpc_id,
            tid,
            saved_context,
            saved_state,
            saved_state_data,
            params.source_pid,
            params.rpc_type,
            params.sync,
        );
        backup.data_id = data_id;
        backup.origin_data_id = None;

        let already_queued = matches!(thread.state, ThreadState::RpcQueued | ThreadState::RpcActive);
        if !already_queued {
            thread.context.set_rpc_arguments(params.rpc_type, params.source_pid, data_id.unwrap_or(0), params.origin_rpc_id);
            thread.context.redirect_to_handler(target.rpc_handler, STACK_ALIGN);
            thread.transition(if table.current.map(|(_, t)| t) == Some(tid) && table.current.map(|(p, _)| p) == Some(params.target_proc) {
                ThreadState::RpcActive
            } else {
                ThreadState::RpcQueued
            });
        }
        backup.prepared = true;
        backup.active = true;
        if let Some(id) = data_id {
            target.rpc_origin.record(
                id,
                OriginRecord { source_pid: params.source_pid, rpc_id: params.origin_rpc_id, sync: params.sync },
            );
        }
        target.rpc_backup_queue.push(backup);
        if !already_queued {
            table.queues.push(target.priority, (params.target_proc, tid));
        }
        Ok(data_id)
    })
}

/// §4.6 `restore`. Requires `thread`'s process has an `active` backup.
pub fn restore(pid: Pid, tid: Tid) -> Result<()> {
    PROCESS_TABLE.lock(|table| {
        let process = table.processes.get_mut(&pid).expect("restore on unknown process");
        let index = process.active_backup_index().ok_or(RpcError::NotActive { id: 0 })?;
        let backup = process.rpc_backup_queue.remove(index);

        if let Some(id) = backup.data_id {
            process.rpc_data_queue.remove(id);
            process.rpc_origin.remove(id);
        }

        let thread = process.threads.get_mut(&tid).expect("restore target thread must exist");
        thread.context = backup.saved_context;
        thread.state = backup.saved_state;
        thread.state_data = backup.saved_state_data;

        // Chain: if another backup is pending, promote it the same way
        // `raise` would, using the now-restored context as its snapshot.
        if let Some(next) = process.rpc_backup_queue.iter_mut().find(|b| !b.active) {
            next.saved_context = thread.context;
            next.active = true;
            thread.context.set_rpc_arguments(next.rpc_type, next.source_pid, next.data_id.unwrap_or(0), 0);
            thread.context.redirect_to_handler(process.rpc_handler, STACK_ALIGN);
            thread.transition(ThreadState::RpcActive);
        }
        Ok(())
    })
}

/// §4.6 synchronous-vs-asynchronous reply dispatch for `syscall_rpc_ret`.
pub fn rpc_ret(pid: Pid, tid: Tid, rpc_type: u32, data: Option<&[u8]>, original_rpc_id: u32) -> Result<()> {
    let (source_pid, sync, data_id) = PROCESS_TABLE.lock(|table| {
        let process = table.processes.get_mut(&pid).expect("rpc_ret on unknown process");
        let index = process.active_backup_index().ok_or(RpcError::NotActive { id: 0 })?;
        let backup = &process.rpc_backup_queue[index];
        Ok::<_, RpcError>((backup.source_pid, backup.sync, backup.data_id))
    })?;

    if sync && original_rpc_id == 0 {
        // Deliver straight into the source's data queue and unblock it.
        PROCESS_TABLE.lock(|table| {
            if let Some(source) = table.processes.get_mut(&source_pid) {
                let new_id = source.rpc_data_queue.enqueue(data);
                for thread in source.threads.values_mut() {
                    if thread.state == ThreadState::RpcWaitForReturn {
                        thread.state_data = StateData { tag: rpc_type, value: new_id };
                        thread.unblock();
                        break;
                    }
                }
            }
        });
        restore(pid, tid)
    } else {
        // Asynchronous fan-in: raise a second RPC into the source process.
        let origin = PROCESS_TABLE.lock(|table| {
            let process = table.processes.get(&pid).expect("rpc_ret on unknown process");
            data_id.and_then(|id| process.rpc_origin.lookup(id))
        });
        let origin_rpc_id = origin.map(|o| o.rpc_id).unwrap_or(original_rpc_id);
        restore(pid, tid)?;
        raise(RaiseParams {
            source_pid: pid,
            target_proc: source_pid,
            rpc_type,
            data,
            target_thread: None,
            sync: false,
            origin_rpc_id,
            disable_data: false,
        })
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::virt::{AddressContext, ContextType};
    use crate::task::ProcessTable;

    fn fresh_table() -> ProcessTable {
        ProcessTable::new()
    }

    #[test]
    fn raise_into_non_ready_process_fails_with_eagain_class() {
        PROCESS_TABLE.lock(|table| *table = fresh_table());
        let target = PROCESS_TABLE.lock(|table| table.create_process(0, 1, AddressContext::new(ContextType::User)));
        PROCESS_TABLE.lock(|table| {
            table.processes.get_mut(&target).unwrap().spawn_thread(1, 0x1000, 0x1000);
        });
        let err = raise(RaiseParams {
            source_pid: 1,
            target_proc: target,
            rpc_type: 0x10,
            data: None,
            target_thread: None,
            sync: true,
            origin_rpc_id: 0,
            disable_data: false,
        })
        .unwrap_err();
        assert!(matches!(err, RpcError::NotReady { .. }));
    }

    #[test]
    fn raise_then_restore_round_trips_the_saved_context() {
        PROCESS_TABLE.lock(|table| *table = fresh_table());
        let target = PROCESS_TABLE.lock(|table| table.create_process(0, 1, AddressContext::new(ContextType::User)));
        let tid = PROCESS_TABLE.lock(|table| {
            let process = table.processes.get_mut(&target).unwrap();
            process.rpc_ready = true;
            process.rpc_handler = 0x9000;
            process.spawn_thread(1, 0x1000, 0x1000)
        });

        let data_id = raise(RaiseParams {
            source_pid: 1,
            target_proc: target,
            rpc_type: 0x4000,
            data: Some(b"hello"),
            target_thread: Some(tid),
            sync: true,
            origin_rpc_id: 0,
            disable_data: false,
        })
        .unwrap();
        assert!(data_id.is_some());

        PROCESS_TABLE.lock(|table| {
            let thread = &table.processes[&target].threads[&tid];
            assert_eq!(thread.state, ThreadState::RpcQueued);
            assert_eq!(thread.context.pc, 0x9000);
        });

        restore(target, tid).unwrap();
        PROCESS_TABLE.lock(|table| {
            let thread = &table.processes[&target].threads[&tid];
            assert_eq!(thread.context.pc, 0x1000);
        });
    }
}
