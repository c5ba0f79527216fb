/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Per-priority round-robin run queues (§3 "Priority queue", §4.5 `next()`).
//!
//! Queue entries are non-owning `(pid, tid)` references; the PCB/TCB tree in
//! [`crate::task::process`] remains the sole owner (§9 "Cyclic graphs").

use alloc::collections::{BTreeMap, VecDeque};

pub type Entry = (u32, u32);

struct PriorityNode {
    list: VecDeque<Entry>,
    /// Index of the last entry handed out by `next`; `None` means "start
    /// from the head" (also the value after a full-queue reset).
    last_handled: Option<usize>,
}

impl PriorityNode {
    fn new() -> Self {
        Self {
            list: VecDeque::new(),
            last_handled: None,
        }
    }
}

pub struct PriorityQueues {
    // Highest priority first: BTreeMap iterated in reverse key order.
    nodes: BTreeMap<u8, PriorityNode>,
}

impl PriorityQueues {
    pub const fn new() -> Self {
        Self { nodes: BTreeMap::new() }
    }

    pub fn push(&mut self, priority: u8, entry: Entry) {
        self.nodes.entry(priority).or_insert_with(PriorityNode::new).list.push_back(entry);
    }

    pub fn remove(&mut self, priority: u8, entry: Entry) {
        if let Some(node) = self.nodes.get_mut(&priority) {
            if let Some(pos) = node.list.iter().position(|&e| e == entry) {
                node.list.remove(pos);
                node.last_handled = None;
            }
        }
    }

    /// Record `entry` as the most recently handled item in its priority's
    /// queue (§4.5 step (i)).
    pub fn mark_last_handled(&mut self, priority: u8, entry: Entry) {
        if let Some(node) = self.nodes.get_mut(&priority) {
            if let Some(pos) = node.list.iter().position(|&e| e == entry) {
                node.last_handled = Some(pos);
            }
        }
    }

    /// Walk priority nodes from highest to lowest; within each, start after
    /// `last_handled` (or the head) and return the first entry for which
    /// `schedulable` is true. Ties are broken by FIFO order within a
    /// priority (§4.5 `next()`).
    pub fn next(&mut self, schedulable: impl Fn(Entry) -> bool) -> Option<Entry> {
        for (&priority, node) in self.nodes.iter_mut().rev() {
            let len = node.list.len();
            if len == 0 {
                continue;
            }
            let start = node.last_handled.map(|i| i + 1).unwrap_or(0);
            for offset in start..len {
                let entry = node.list[offset];
                if schedulable(entry) {
                    node.last_handled = Some(offset);
                    let _ = priority;
                    return Some(entry);
                }
            }
            // traversal ended at the tail: this priority is consumed for
            // this pass; fall through to the next lower priority.
        }
        None
    }

    /// Reset every queue's `last_handled` cursor (§4.5 step (ii), idle path).
    pub fn reset_all(&mut self) {
        for node in self.nodes.values_mut() {
            node.last_handled = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_prefers_higher_priority_and_is_fifo_within_one() {
        let mut q = PriorityQueues::new();
        q.push(1, (10, 1));
        q.push(1, (10, 2));
        q.push(5, (11, 1));
        let first = q.next(|_| true).unwrap();
        assert_eq!(first, (11, 1)); // priority 5 beats priority 1
        q.mark_last_handled(5, (11, 1));
        // priority 5's queue is now consumed (single entry, cursor at tail).
        let second = q.next(|_| true).unwrap();
        assert_eq!(second, (10, 1));
    }

    #[test]
    fn reset_all_rewinds_cursor_to_head() {
        let mut q = PriorityQueues::new();
        q.push(2, (1, 1));
        q.push(2, (1, 2));
        let first = q.next(|_| true).unwrap();
        assert_eq!(first, (1, 1));
        q.reset_all();
        let again = q.next(|_| true).unwrap();
        assert_eq!(again, (1, 1));
    }

    #[test]
    fn schedulable_filter_skips_ineligible_entries() {
        let mut q = PriorityQueues::new();
        q.push(3, (1, 1));
        q.push(3, (1, 2));
        let picked = q.next(|entry| entry == (1, 2)).unwrap();
        assert_eq!(picked, (1, 2));
    }
}
