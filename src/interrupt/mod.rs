/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Interrupt/exception dispatcher (§4.4): the registry of normal/fast/software
//! line handlers plus the nesting-depth invariant enforced on every entry.

pub mod dispatch;

use crate::task::process::Pid;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};

/// §4.5/§3: the exception entered from kernel code (no scheduling decision
/// is made) vs. from user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionOrigin {
    Kernel,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterruptKind {
    Normal,
    Fast,
    Software,
}

/// An invariant, not a policy (§4.5): nested interrupts are permitted up to
/// this depth; exceeding it is a fatal assertion failure.
pub const INTERRUPT_NESTED_MAX: u8 = 3;

pub type KernelHandler = fn();

pub struct Subscription {
    pub process: Pid,
    pub rpc_type: u32,
}

pub struct Line {
    pub pre: Vec<KernelHandler>,
    pub post: Vec<KernelHandler>,
    pub processes: Vec<Subscription>,
    pub enabled: bool,
}

impl Line {
    fn new() -> Self {
        Self { pre: Vec::new(), post: Vec::new(), processes: Vec::new(), enabled: false }
    }

    fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty() && self.processes.is_empty()
    }
}

pub struct Registry {
    normal: BTreeMap<u32, Line>,
    fast: BTreeMap<u32, Line>,
    software: BTreeMap<u32, Line>,
}

impl Registry {
    const fn new() -> Self {
        Self { normal: BTreeMap::new(), fast: BTreeMap::new(), software: BTreeMap::new() }
    }

    fn tree_mut(&mut self, kind: InterruptKind) -> &mut BTreeMap<u32, Line> {
        match kind {
            InterruptKind::Normal => &mut self.normal,
            InterruptKind::Fast => &mut self.fast,
            InterruptKind::Software => &mut self.software,
        }
    }

    pub fn tree(&self, kind: InterruptKind) -> &BTreeMap<u32, Line> {
        match kind {
            InterruptKind::Normal => &self.normal,
            InterruptKind::Fast => &self.fast,
            InterruptKind::Software => &self.software,
        }
    }

    /// `register_handler(num, callback, process?, kind, post, enable)`.
    pub fn register_handler(
        &mut self,
        num: u32,
        kind: InterruptKind,
        callback: Option<KernelHandler>,
        post: bool,
        process: Option<Subscription>,
        enable: bool,
    ) {
        let line = self.tree_mut(kind).entry(num).or_insert_with(Line::new);
        if let Some(cb) = callback {
            if post {
                line.post.push(cb);
            } else {
                line.pre.push(cb);
            }
        }
        if let Some(sub) = process {
            line.processes.push(sub);
        }
        if enable {
            line.enabled = true;
        }
    }

    /// Unregister a process subscription; masks the line at the controller
    /// if both handler lists and the process list end up empty.
    pub fn unregister_process(&mut self, num: u32, kind: InterruptKind, pid: Pid) {
        if let Some(line) = self.tree_mut(kind).get_mut(&num) {
            line.processes.retain(|s| s.process != pid);
            if line.is_empty() {
                line.enabled = false;
            }
        }
    }
}

pub static REGISTRY: crate::sync::IrqSafeNullLock<Registry> = crate::sync::IrqSafeNullLock::new(Registry::new());

static NESTING: [AtomicU8; 3] = [AtomicU8::new(0), AtomicU8::new(0), AtomicU8::new(0)];

fn nesting_slot(kind: InterruptKind) -> &'static AtomicU8 {
    match kind {
        InterruptKind::Normal => &NESTING[0],
        InterruptKind::Fast => &NESTING[1],
        InterruptKind::Software => &NESTING[2],
    }
}

/// Enter a nested section for `kind`, asserting the depth invariant; returns
/// a guard that decrements on drop (§4.4 steps (a)/(f)).
pub struct NestingGuard(InterruptKind);

impl NestingGuard {
    pub fn enter(kind: InterruptKind) -> Self {
        let slot = nesting_slot(kind);
        let previous = slot.fetch_add(1, Ordering::SeqCst);
        assert!(previous < INTERRUPT_NESTED_MAX, "interrupt nesting exceeded INTERRUPT_NESTED_MAX");
        Self(kind)
    }
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        nesting_slot(self.0).fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_unregister_masks_an_otherwise_empty_line() {
        let mut registry = Registry::new();
        registry.register_handler(3, InterruptKind::Normal, None, false, Some(Subscription { process: 7, rpc_type: 3 }), true);
        assert!(registry.tree(InterruptKind::Normal)[&3].enabled);
        registry.unregister_process(3, InterruptKind::Normal, 7);
        assert!(!registry.tree(InterruptKind::Normal)[&3].enabled);
    }

    #[test]
    fn nesting_guard_allows_exactly_max_depth_then_unwinds_on_drop() {
        {
            let _a = NestingGuard::enter(InterruptKind::Fast);
            let _b = NestingGuard::enter(InterruptKind::Fast);
            let _c = NestingGuard::enter(InterruptKind::Fast);
            assert_eq!(nesting_slot(InterruptKind::Fast).load(Ordering::SeqCst), 3);
        }
        assert_eq!(nesting_slot(InterruptKind::Fast).load(Ordering::SeqCst), 0);
    }
}
