/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! RPC subsystem: context-backup/restore continuations, the origin tree for
//! asynchronous fan-in, and the pass-by-copy data queue (§4.6).

pub mod backup;
pub mod data;
pub mod engine;
pub mod origin;
