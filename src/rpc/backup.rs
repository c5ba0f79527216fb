/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! RPC backup records (§3 "RPC backup", §4.6).

use crate::arch::armv7::context::CpuContext;
use crate::task::thread::{StateData, ThreadState};

pub type DataId = u32;
pub type RpcId = u32;

/// One in-flight or queued RPC on a target thread. At most one entry on a
/// given PCB's backup queue has `active=true`.
#[derive(Debug, Clone)]
pub struct RpcBackup {
    pub id: RpcId,
    pub target_tid: u32,
    pub saved_context: CpuContext,
    pub saved_state: ThreadState,
    pub saved_state_data: StateData,
    pub source_pid: u32,
    pub rpc_type: u32,
    pub data_id: Option<DataId>,
    pub origin_data_id: Option<DataId>,
    pub prepared: bool,
    pub active: bool,
    pub sync: bool,
}

impl RpcBackup {
    pub fn new(
        id: RpcId,
        target_tid: u32,
        saved_context: CpuContext,
        saved_state: ThreadState,
        saved_state_data: StateData,
        source_pid: u32,
        rpc_type: u32,
        sync: bool,
    ) -> Self {
        Self {
            id,
            target_tid,
            saved_context,
            saved_state,
            saved_state_data,
            source_pid,
            rpc_type,
            data_id: None,
            origin_data_id: None,
            prepared: false,
            active: false,
            sync,
        }
    }
}
