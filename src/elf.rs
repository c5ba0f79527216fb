/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The ELF-loading boundary (§6.1 ADDED): the kernel core never parses ELF
//! itself, it calls into whatever [`ExternalLoader`] the board registers.

use crate::memory::virt::AddressContext;
use crate::task::process::Pid;

#[derive(Debug)]
pub struct LoadError;

/// Implemented by the out-of-kernel component that knows how to lay an ELF
/// image out into a freshly created address-space context and report the
/// thread entry point.
pub trait ExternalLoader {
    fn load(&self, image: &[u8], context: &mut AddressContext, target_pid: Pid) -> Result<u32, LoadError>;
}
