/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Origin tree (§3 "RPC origin record"): recovers the original caller for
//! asynchronous returns that may cross multiple intermediaries, keyed by
//! data-queue id.

use alloc::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub struct OriginRecord {
    pub source_pid: u32,
    pub rpc_id: u32,
    pub sync: bool,
}

#[derive(Default)]
pub struct OriginTree {
    records: BTreeMap<u32, OriginRecord>,
}

impl OriginTree {
    pub const fn new() -> Self {
        Self { records: BTreeMap::new() }
    }

    pub fn record(&mut self, data_id: u32, origin: OriginRecord) {
        self.records.insert(data_id, origin);
    }

    pub fn lookup(&self, data_id: u32) -> Option<OriginRecord> {
        self.records.get(&data_id).copied()
    }

    pub fn remove(&mut self, data_id: u32) {
        self.records.remove(&data_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_recorded_origin() {
        let mut tree = OriginTree::new();
        tree.record(7, OriginRecord { source_pid: 10, rpc_id: 3, sync: true });
        let found = tree.lookup(7).unwrap();
        assert_eq!(found.source_pid, 10);
        assert!(found.sync);
        tree.remove(7);
        assert!(tree.lookup(7).is_none());
    }
}
