/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Process control block (§3 "Process (PCB)").

use crate::memory::virt::AddressContext;
use crate::rpc::backup::RpcBackup;
use crate::rpc::data::DataQueue;
use crate::rpc::origin::OriginTree;
use crate::task::stack::StackManager;
use crate::task::thread::{Thread, Tid};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

pub type Pid = u32;

/// Default user stack size handed to the single thread `exec` creates for a
/// freshly loaded image (§4.5).
pub const DEFAULT_STACK_SIZE: u32 = 0x1000;

pub struct Process {
    pub pid: Pid,
    pub parent_pid: Pid,
    pub priority: u8,
    pub context: AddressContext,
    pub threads: BTreeMap<Tid, Thread>,
    pub stack_manager: StackManager,
    pub rpc_data_queue: DataQueue,
    pub rpc_backup_queue: Vec<RpcBackup>,
    pub rpc_origin: OriginTree,
    pub rpc_handler: u32,
    pub rpc_ready: bool,
    next_tid: Tid,
}

impl Process {
    pub fn new(pid: Pid, parent_pid: Pid, priority: u8, context: AddressContext) -> Self {
        Self {
            pid,
            parent_pid,
            priority,
            context,
            threads: BTreeMap::new(),
            stack_manager: StackManager::new(0x1000, 0x1_0000),
            rpc_data_queue: DataQueue::new(),
            rpc_backup_queue: Vec::new(),
            rpc_origin: OriginTree::new(),
            rpc_handler: 0,
            rpc_ready: false,
            next_tid: 1,
        }
    }

    pub fn spawn_thread(&mut self, priority: u8, entry_point: u32, stack_size: u32) -> Tid {
        let tid = self.next_tid;
        self.next_tid += 1;
        let stack_start = self.stack_manager.acquire();
        let thread = Thread::new(tid, priority, stack_start, stack_size, entry_point);
        self.threads.insert(tid, thread);
        tid
    }

    pub fn kill_thread(&mut self, tid: Tid) {
        if let Some(thread) = self.threads.remove(&tid) {
            self.stack_manager.release(thread.stack_start);
        }
    }

    /// Drop every thread and rewind id/stack-slot allocation, keeping this
    /// PCB (pid, parent_pid, rpc state) in place for process replace (§4.5
    /// exec): "destroy the virtual context keeping the PCB".
    pub fn reset_for_exec(&mut self) {
        self.threads.clear();
        self.stack_manager = StackManager::new(0x1000, 0x1_0000);
        self.next_tid = 1;
    }

    /// First thread iterated from the thread tree whose process accepts RPC
    /// (§4.6 step 1, "the hinted target_thread or the first one iterated").
    pub fn rpc_candidate_thread(&self, hint: Option<Tid>) -> Option<Tid> {
        if !self.rpc_ready {
            return None;
        }
        if let Some(tid) = hint {
            if self.threads.contains_key(&tid) {
                return Some(tid);
            }
            return None;
        }
        self.threads.keys().next().copied()
    }

    /// The one backup on this process's queue with `active=true`, if any
    /// (§4.6 `restore`: "at most one has active=true").
    pub fn active_backup_index(&self) -> Option<usize> {
        self.rpc_backup_queue.iter().position(|b| b.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::virt::ContextType;

    fn sample_process() -> Process {
        Process::new(1, 0, 5, AddressContext::new(ContextType::User))
    }

    #[test]
    fn spawn_then_kill_releases_the_stack_slot() {
        let mut p = sample_process();
        let tid = p.spawn_thread(5, 0x4000, 0x1000);
        let base = p.threads[&tid].stack_start;
        p.kill_thread(tid);
        assert!(!p.threads.contains_key(&tid));
        assert!(!p.stack_manager.is_in_use(base));
    }

    #[test]
    fn reset_for_exec_clears_threads_and_rewinds_tids() {
        let mut p = sample_process();
        p.spawn_thread(5, 0x4000, 0x1000);
        p.spawn_thread(5, 0x4000, 0x1000);
        p.reset_for_exec();
        assert!(p.threads.is_empty());
        let tid = p.spawn_thread(5, 0x5000, 0x1000);
        assert_eq!(tid, 1);
    }

    #[test]
    fn rpc_candidate_thread_requires_ready_flag() {
        let mut p = sample_process();
        p.spawn_thread(5, 0x4000, 0x1000);
        assert!(p.rpc_candidate_thread(None).is_none());
        p.rpc_ready = true;
        assert!(p.rpc_candidate_thread(None).is_some());
    }
}
