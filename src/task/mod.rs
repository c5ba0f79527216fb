/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Process/thread manager: the PCB tree, the per-priority run queues, and
//! the scheduler (§3 "Process (PCB)"/"Thread (TCB)"/"Priority queue", §4.5).

pub mod process;
pub mod queue;
pub mod scheduler;
pub mod stack;
pub mod thread;

use crate::arch::armv7::mmu::MemoryType;
use crate::elf::ExternalLoader;
use crate::error::errno;
use crate::event::{self, EventType, Origin as EventOrigin};
use crate::memory::addr::PAGE_SIZE;
use crate::memory::virt::{self, AddressContext, MapFlags, VirtError};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use process::{Pid, Process};
use queue::PriorityQueues;
use snafu::{OptionExt, ResultExt, Snafu};
use thread::{ThreadState, Tid};

/// Process-manager error surface (§4.5 fork/exec), modeled after
/// [`crate::rpc::engine::RpcError`].
#[derive(Debug, Snafu)]
pub enum TaskError {
    #[snafu(display("process {pid} does not exist"))]
    NoSuchProcess { pid: Pid },
    #[snafu(display("the kernel process record is unavailable"))]
    NoKernelContext,
    #[snafu(display("address space operation failed: {source}"))]
    Virt { source: VirtError },
    #[snafu(display("external loader rejected the image"))]
    Load,
}

impl crate::error::IntoErrno for TaskError {
    fn into_errno(self) -> isize {
        match self {
            TaskError::NoSuchProcess { .. } => errno::ESRCH,
            TaskError::NoKernelContext => errno::EFAULT,
            TaskError::Virt { .. } => errno::ENOMEM,
            TaskError::Load => errno::EINVAL,
        }
    }
}

type Result<T> = core::result::Result<T, TaskError>;

pub struct ProcessTable {
    pub processes: BTreeMap<Pid, Process>,
    pub queues: PriorityQueues,
    pub current: Option<(Pid, Tid)>,
    /// The pid created for `ContextType::Kernel` at boot, kept so
    /// `fork`/`exec` can borrow the kernel's context for temporary mappings
    /// (§4.2 `map_temporary`). Set once via [`ProcessTable::set_kernel_pid`].
    pub kernel_pid: Option<Pid>,
    next_pid: Pid,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
            queues: PriorityQueues::new(),
            current: None,
            kernel_pid: None,
            next_pid: 1,
        }
    }

    pub fn create_process(&mut self, parent_pid: Pid, priority: u8, context: AddressContext) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.processes.insert(pid, Process::new(pid, parent_pid, priority, context));
        pid
    }

    pub fn set_kernel_pid(&mut self, pid: Pid) {
        self.kernel_pid = Some(pid);
    }

    pub fn destroy_process(&mut self, pid: Pid) {
        if let Some(process) = self.processes.remove(&pid) {
            for &tid in process.threads.keys() {
                self.queues.remove(process.priority, (pid, tid));
            }
        }
    }

    /// Kill the thread currently selected by `current`: record the kill in
    /// its state, drop it from its run queue, reap its TCB/stack slot, and
    /// clear `current` so the next `schedule()` call picks a replacement
    /// (§4.4 "from user origin kill the current thread and enqueue a
    /// schedule event").
    pub fn kill_current_thread(&mut self) {
        let Some((pid, tid)) = self.current else {
            return;
        };
        if let Some(process) = self.processes.get_mut(&pid) {
            if let Some(thread) = process.threads.get_mut(&tid) {
                thread.transition(ThreadState::Kill);
            }
            self.queues.remove(process.priority, (pid, tid));
            process.kill_thread(tid);
        }
        self.current = None;
    }

    /// Duplicate `parent_pid` into a brand new process (§4.5 fork): the
    /// address space is deep-copied via [`AddressContext::fork_context`],
    /// every thread is replayed onto the child's own stack manager so its
    /// stack slots land on the same VAs the copy just duplicated, and
    /// `rpc_handler`/`rpc_ready` carry over unchanged. A thread caught
    /// `Active` (the forking thread itself) becomes `Ready` in the child,
    /// since only one CPU can actually be running it.
    pub fn fork(&mut self, parent_pid: Pid) -> Result<Pid> {
        let kernel_pid = self.kernel_pid.context(NoKernelContextSnafu)?;
        let mut kernel_process = self.processes.remove(&kernel_pid).context(NoKernelContextSnafu)?;

        let prepared = self.processes.get(&parent_pid).context(NoSuchProcessSnafu { pid: parent_pid }).and_then(
            |parent| {
                let context = parent.context.fork_context(&mut kernel_process.context).context(VirtSnafu)?;
                let threads: Vec<_> = parent
                    .threads
                    .values()
                    .map(|t| (t.priority, t.entry_point, t.stack_size, t.context, t.state, t.saved_state, t.state_data))
                    .collect();
                Ok((parent.priority, context, parent.rpc_handler, parent.rpc_ready, threads))
            },
        );

        self.processes.insert(kernel_pid, kernel_process);
        let (priority, context, rpc_handler, rpc_ready, threads) = prepared?;

        let child_pid = self.create_process(parent_pid, priority, context);
        {
            let child = self.processes.get_mut(&child_pid).expect("just created");
            child.rpc_handler = rpc_handler;
            child.rpc_ready = rpc_ready;
        }

        for (thread_priority, entry_point, stack_size, cpu_context, state, saved_state, state_data) in threads {
            let (tid, new_state) = {
                let child = self.processes.get_mut(&child_pid).expect("just created");
                let tid = child.spawn_thread(thread_priority, entry_point, stack_size);
                let thread = child.threads.get_mut(&tid).expect("just inserted");
                thread.context = cpu_context;
                thread.saved_state = saved_state;
                thread.state_data = state_data;
                let new_state = if state == ThreadState::Active { ThreadState::Ready } else { state };
                thread.state = new_state;
                (tid, new_state)
            };
            if new_state.is_schedulable() {
                self.queues.push(priority, (child_pid, tid));
            }
        }

        Ok(child_pid)
    }

    /// Replace `pid`'s image in place (§4.5 exec): snapshot the new image
    /// and argv/env into kernel memory, tear down and rebuild the address
    /// space, load the new image through `loader`, and start one fresh
    /// thread at its entry point with argv/env pushed on its stack. If
    /// `pid` is the currently scheduled process, `current` is repointed at
    /// the new thread and it is marked `Active`; otherwise the new thread
    /// is queued `Ready`.
    pub fn exec(
        &mut self,
        pid: Pid,
        image: &[u8],
        loader: &dyn ExternalLoader,
        argv: &[&[u8]],
        env: &[&[u8]],
    ) -> Result<Tid> {
        let kernel_pid = self.kernel_pid.context(NoKernelContextSnafu)?;
        let snapshot = image.to_vec();
        let argv_copy: Vec<Vec<u8>> = argv.iter().map(|a| a.to_vec()).collect();
        let env_copy: Vec<Vec<u8>> = env.iter().map(|e| e.to_vec()).collect();

        let mut kernel_process = self.processes.remove(&kernel_pid).context(NoKernelContextSnafu)?;
        let outcome = (|| -> Result<Tid> {
            let process = self.processes.get_mut(&pid).context(NoSuchProcessSnafu { pid })?;
            process.context.destroy_context(true).context(VirtSnafu)?;
            process.reset_for_exec();

            let entry = loader.load(&snapshot, &mut process.context, pid).map_err(|_| TaskError::Load)?;
            let tid = process.spawn_thread(process.priority, entry, process::DEFAULT_STACK_SIZE);

            let (stack_start, stack_size) = {
                let thread = &process.threads[&tid];
                (thread.stack_start, thread.stack_size)
            };
            let flags = MapFlags { writable: true, user_accessible: true };
            let pages = (stack_size + PAGE_SIZE - 1) / PAGE_SIZE;
            for i in 0..pages {
                let va = stack_start + i * PAGE_SIZE;
                if !process.context.is_mapped(va) {
                    process.context.map_address_random(va, MemoryType::Normal, flags).context(VirtSnafu)?;
                }
            }

            let stack_top = process.threads[&tid].context.sp;
            let new_sp = push_argv_env(&mut process.context, &mut kernel_process.context, stack_top, &argv_copy, &env_copy)
                .context(VirtSnafu)?;
            process.threads.get_mut(&tid).expect("just inserted").context.sp = new_sp;
            Ok(tid)
        })();
        self.processes.insert(kernel_pid, kernel_process);
        let tid = outcome?;

        if self.current.map(|(p, _)| p) == Some(pid) {
            self.current = Some((pid, tid));
            if let Some(thread) = self.processes.get_mut(&pid).and_then(|p| p.threads.get_mut(&tid)) {
                thread.transition(ThreadState::Active);
            }
        } else if let Some(process) = self.processes.get_mut(&pid) {
            process.threads.get_mut(&tid).expect("just inserted").transition(ThreadState::Ready);
            self.queues.push(process.priority, (pid, tid));
        }

        Ok(tid)
    }
}

/// Serialize `argv`/`env` as `[argc][envc][len,bytes]...` just below
/// `stack_top` and return the resulting stack pointer. Assumes the blob
/// fits in the stack page already mapped at `stack_top - 1`; written through
/// the kernel's temporary mapping window since the target context need not
/// be the active one (§4.2 `map_temporary`).
fn push_argv_env(
    context: &mut AddressContext,
    kernel_ctx: &mut AddressContext,
    stack_top: u32,
    argv: &[Vec<u8>],
    env: &[Vec<u8>],
) -> core::result::Result<u32, VirtError> {
    let mut blob = Vec::new();
    blob.extend_from_slice(&(argv.len() as u32).to_le_bytes());
    blob.extend_from_slice(&(env.len() as u32).to_le_bytes());
    for entry in argv.iter().chain(env.iter()) {
        blob.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        blob.extend_from_slice(entry);
    }
    let aligned_len = (blob.len() as u32 + 7) & !7;
    let write_base = stack_top - aligned_len;
    let page_va = write_base & !(PAGE_SIZE - 1);
    let pa = context.physical_address_of(page_va).ok_or(VirtError::NotMapped { addr: page_va })?;

    let window = virt::map_temporary(kernel_ctx, pa, PAGE_SIZE)?;
    let offset = write_base - page_va;
    unsafe {
        core::ptr::copy_nonoverlapping(blob.as_ptr(), (window + offset) as *mut u8, blob.len());
    }
    virt::unmap_temporary(kernel_ctx, window, PAGE_SIZE)?;
    Ok(write_base)
}

pub static PROCESS_TABLE: crate::sync::IrqSafeNullLock<ProcessTable> =
    crate::sync::IrqSafeNullLock::new(ProcessTable::new());

/// Bound to [`EventType::Process`] (see [`install_event_handlers`]): a
/// fault-killed thread enqueues this event so the scheduler runs its
/// replacement once the fault handler returns, instead of resuming the
/// now-dead thread's context.
fn on_process_event(_origin: EventOrigin) {
    scheduler::schedule(None);
}

/// Wire the process manager's event-bus handlers; called once during boot.
pub fn install_event_handlers() {
    event::bind(EventType::Process, on_process_event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::virt::ContextType;

    #[test]
    fn create_then_destroy_process_removes_its_queue_entries() {
        let mut table = ProcessTable::new();
        let pid = table.create_process(0, 3, AddressContext::new(ContextType::User));
        let tid = table.processes.get_mut(&pid).unwrap().spawn_thread(3, 0x4000, 0x1000);
        table.queues.push(3, (pid, tid));
        table.destroy_process(pid);
        assert!(table.processes.get(&pid).is_none());
        assert!(table.queues.next(|_| true).is_none());
    }

    #[test]
    fn kill_current_thread_reaps_it_and_clears_current() {
        let mut table = ProcessTable::new();
        let pid = table.create_process(0, 3, AddressContext::new(ContextType::User));
        let tid = table.processes.get_mut(&pid).unwrap().spawn_thread(3, 0x4000, 0x1000);
        table.queues.push(3, (pid, tid));
        table.current = Some((pid, tid));

        table.kill_current_thread();

        assert!(table.current.is_none());
        assert!(!table.processes[&pid].threads.contains_key(&tid));
        assert!(table.queues.next(|_| true).is_none());
    }

    #[test]
    fn fork_duplicates_threads_and_preserves_rpc_flags() {
        let mut table = ProcessTable::new();
        let kernel_pid = table.create_process(0, 0, AddressContext::new(ContextType::Kernel));
        table.set_kernel_pid(kernel_pid);

        let parent_pid = table.create_process(0, 5, AddressContext::new(ContextType::User));
        {
            let parent = table.processes.get_mut(&parent_pid).unwrap();
            let tid = parent.spawn_thread(5, 0x4000, 0x1000);
            parent.threads.get_mut(&tid).unwrap().transition(ThreadState::Ready);
            parent.rpc_handler = 0xABCD;
            parent.rpc_ready = true;
        }

        let child_pid = table.fork(parent_pid).unwrap();
        assert_ne!(child_pid, parent_pid);
        let child = &table.processes[&child_pid];
        assert_eq!(child.rpc_handler, 0xABCD);
        assert!(child.rpc_ready);
        assert_eq!(child.threads.len(), 1);
        let child_thread = child.threads.values().next().unwrap();
        assert_eq!(child_thread.entry_point, 0x4000);
        assert_eq!(child_thread.state, ThreadState::Ready);
    }

    #[test]
    fn fork_without_a_registered_kernel_pid_fails() {
        let mut table = ProcessTable::new();
        let parent_pid = table.create_process(0, 5, AddressContext::new(ContextType::User));
        assert!(matches!(table.fork(parent_pid), Err(TaskError::NoKernelContext)));
    }

    struct StubLoader {
        entry: u32,
    }

    impl crate::elf::ExternalLoader for StubLoader {
        fn load(
            &self,
            _image: &[u8],
            _context: &mut AddressContext,
            _target_pid: Pid,
        ) -> core::result::Result<u32, crate::elf::LoadError> {
            Ok(self.entry)
        }
    }

    fn init_allocator() {
        crate::memory::phys::ALLOCATOR.lock(|a| {
            if !a.is_initialized() {
                a.init(4096, 0, None, 4096 - 64, 64);
            }
        });
    }

    #[test]
    fn exec_replaces_the_image_and_starts_one_thread_with_argv_on_its_stack() {
        init_allocator();
        let mut table = ProcessTable::new();
        let kernel_pid = table.create_process(0, 0, AddressContext::new(ContextType::Kernel));
        table.set_kernel_pid(kernel_pid);

        let pid = table.create_process(0, 5, AddressContext::new(ContextType::User));
        table.processes.get_mut(&pid).unwrap().spawn_thread(5, 0x1000, 0x1000);
        table.current = Some((pid, 1));

        let loader = StubLoader { entry: 0x8000 };
        let tid = table.exec(pid, b"not really an elf", &loader, &[b"argv0"], &[b"K=V"]).unwrap();

        let process = &table.processes[&pid];
        assert_eq!(process.threads.len(), 1);
        let thread = &process.threads[&tid];
        assert_eq!(thread.entry_point, 0x8000);
        assert_eq!(thread.state, ThreadState::Active);
        assert_eq!(table.current, Some((pid, tid)));
        assert!(thread.context.sp < thread.stack_start + thread.stack_size);
    }
}
