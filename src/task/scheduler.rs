/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Priority-queue round-robin scheduler (§4.5).

use crate::arch::armv7::{context::CpuContext, cp15, wfi};
use crate::task::{thread::ThreadState, PROCESS_TABLE};

/// `schedule(origin, context)`: a no-op on kernel-origin preemption (the
/// kernel is non-reentrant for scheduling decisions); otherwise picks the
/// next runnable thread, switching address-space context if the process
/// changed, and idles if nothing is runnable.
pub fn schedule(context: Option<&CpuContext>) {
    if context.is_some() {
        return;
    }

    loop {
        let previous_pid = PROCESS_TABLE.lock(|table| {
            if let Some((pid, tid)) = table.current {
                let process = table.processes.get_mut(&pid).expect("current process vanished");
                let priority = process.priority;
                let thread = process.threads.get_mut(&tid).expect("current thread vanished");
                thread.transition(match thread.state {
                    ThreadState::RpcActive => ThreadState::RpcHaltSwitch,
                    _ => ThreadState::HaltSwitch,
                });
                table.queues.mark_last_handled(priority, (pid, tid));
            }
            table.current.map(|(pid, _)| pid)
        });

        let picked = next();
        match picked {
            Some((pid, tid)) => {
                PROCESS_TABLE.lock(|table| {
                    let process = table.processes.get_mut(&pid).expect("picked process vanished");
                    let thread = process.threads.get_mut(&tid).expect("picked thread vanished");
                    thread.transition(match thread.state {
                        ThreadState::RpcQueued | ThreadState::RpcHaltSwitch => ThreadState::RpcActive,
                        _ => ThreadState::Active,
                    });
                    table.current = Some((pid, tid));
                });
                if Some(pid) != previous_pid {
                    switch_address_space(pid);
                }
                return;
            }
            None => {
                PROCESS_TABLE.lock(|table| {
                    table.queues.reset_all();
                    table.current = None;
                });
                crate::arch::armv7::unmask_irq();
                wfi();
                crate::arch::armv7::mask_irq();
                // loop: race the next external event against another pick.
            }
        }
    }
}

/// Walk priority nodes highest to lowest, filtering by the live thread state
/// kept in the process table (§4.5 `next()`).
pub fn next() -> Option<(u32, u32)> {
    PROCESS_TABLE.lock(|table| {
        let processes = &table.processes;
        table.queues.next(|(pid, tid)| {
            processes
                .get(&pid)
                .and_then(|p| p.threads.get(&tid))
                .map(|t| t.state.is_schedulable())
                .unwrap_or(false)
        })
    })
}

fn switch_address_space(pid: u32) {
    PROCESS_TABLE.lock(|table| {
        if let Some(process) = table.processes.get(&pid) {
            let _ = process; // TTBR0/CONTEXTIDR programming is arch-specific;
                              // the actual page-table physical base is read
                              // from `process.context` by the arch layer.
            unsafe {
                cp15::write_contextidr(pid);
                cp15::tlbiall();
            }
            cp15::isb();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::virt::{AddressContext, ContextType};
    use crate::task::thread::ThreadState;

    #[test]
    fn schedule_picks_highest_priority_ready_thread() {
        PROCESS_TABLE.lock(|table| {
            *table = crate::task::ProcessTable::new();
            let low = table.create_process(0, 1, AddressContext::new(ContextType::User));
            let high = table.create_process(0, 9, AddressContext::new(ContextType::User));
            let t_low = table.processes.get_mut(&low).unwrap().spawn_thread(1, 0x1000, 0x1000);
            let t_high = table.processes.get_mut(&high).unwrap().spawn_thread(9, 0x2000, 0x1000);
            table.processes.get_mut(&low).unwrap().threads.get_mut(&t_low).unwrap().transition(ThreadState::Ready);
            table.processes.get_mut(&high).unwrap().threads.get_mut(&t_high).unwrap().transition(ThreadState::Ready);
            table.queues.push(1, (low, t_low));
            table.queues.push(9, (high, t_high));
        });

        schedule(None);

        PROCESS_TABLE.lock(|table| {
            assert_eq!(table.current.map(|(pid, _)| table.processes[&pid].priority), Some(9));
        });
    }
}
