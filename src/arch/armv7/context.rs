/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Saved CPU register context.
//!
//! A full context is what the RPC engine backs up and restores (§4.6) and what
//! the exception entry/exit path saves across a preemption. Deliberately a plain
//! data struct: the RPC engine clones it wholesale into a [`crate::rpc::backup::RpcBackup`].

/// ARMv7-A general-purpose register file plus the saved program status register.
///
/// `r0..=r3` double as the RPC argument registers (§6: "RPC on-wire shape").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct CpuContext {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub r12: u32,
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub cpsr: u32,
}

impl CpuContext {
    pub const fn zeroed() -> Self {
        Self {
            r0: 0,
            r1: 0,
            r2: 0,
            r3: 0,
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            sp: 0,
            lr: 0,
            pc: 0,
            cpsr: 0,
        }
    }

    /// Set the four argument registers used by the RPC handler calling
    /// convention (§6): `r0=type`, `r1=source_pid`, `r2=data_id`, `r3=origin_rpc_id`.
    pub fn set_rpc_arguments(&mut self, rpc_type: u32, source_pid: u32, data_id: u32, origin_rpc_id: u32) {
        self.r0 = rpc_type;
        self.r1 = source_pid;
        self.r2 = data_id;
        self.r3 = origin_rpc_id;
    }

    /// Rewrite this context so that, on return from the exception that brought
    /// us here, the thread executes `handler` with a fresh stack-aligned SP and
    /// the interrupted PC saved into `lr` (the handler's "return address" back
    /// into the thread's own code, reachable by the user handler stub).
    pub fn redirect_to_handler(&mut self, handler: u32, stack_align: u32) {
        self.lr = self.pc;
        self.pc = handler;
        self.sp &= !(stack_align - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_saves_old_pc_into_lr_and_aligns_sp() {
        let mut ctx = CpuContext::zeroed();
        ctx.pc = 0x1000;
        ctx.sp = 0x2000_7;
        ctx.redirect_to_handler(0x9000, 8);
        assert_eq!(ctx.lr, 0x1000);
        assert_eq!(ctx.pc, 0x9000);
        assert_eq!(ctx.sp, 0x2000_0);
    }

    #[test]
    fn rpc_arguments_land_in_r0_through_r3() {
        let mut ctx = CpuContext::zeroed();
        ctx.set_rpc_arguments(0x4000, 11, 7, 0);
        assert_eq!((ctx.r0, ctx.r1, ctx.r2, ctx.r3), (0x4000, 11, 7, 0));
    }
}
