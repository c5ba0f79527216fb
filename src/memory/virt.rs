/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Address-space manager (§4.2): per-process page tables, temporary kernel
//! mappings, and the min/max address accessors.

use crate::arch::armv7::cp15;
use crate::arch::armv7::mmu::{AccessPermission, L1Table, L1_ENTRIES, L2Table, L2_ENTRIES, MemoryType, SECTION_SIZE};
use crate::error::errno;
use crate::memory::addr::{KERNEL_AREA_START, PAGE_SIZE, USER_AREA_START};
use crate::memory::phys::{PhysError, Pool, ALLOCATOR};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use snafu::Snafu;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    Kernel,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags {
    pub writable: bool,
    pub user_accessible: bool,
}

#[derive(Debug, Snafu)]
pub enum VirtError {
    #[snafu(display("address {addr:#x} already mapped"))]
    AlreadyMapped { addr: u32 },
    #[snafu(display("address {addr:#x} is not mapped"))]
    NotMapped { addr: u32 },
    #[snafu(display("physical allocator failed: {source}"))]
    Phys { source: PhysError },
    #[snafu(display("no free virtual range of size {size} found starting at {hint_start:#x}"))]
    NoFreeRange { size: u32, hint_start: u32 },
}

impl crate::error::IntoErrno for VirtError {
    fn into_errno(self) -> isize {
        match self {
            VirtError::AlreadyMapped { .. } => errno::EINVAL,
            VirtError::NotMapped { .. } => errno::EFAULT,
            VirtError::Phys { .. } => errno::ENOMEM,
            VirtError::NoFreeRange { .. } => errno::ENOMEM,
        }
    }
}

type Result<T> = core::result::Result<T, VirtError>;

/// A process's (or the kernel's) address-space context: an L1 table plus the
/// L2 tables it owns, tracked so `destroy_context` can return every frame.
pub struct AddressContext {
    pub ty: ContextType,
    l1: Box<L1Table>,
    l2_tables: BTreeMap<u32, Box<L2Table>>,
}

impl AddressContext {
    pub fn new(ty: ContextType) -> Self {
        Self {
            ty,
            l1: Box::new(L1Table::empty()),
            l2_tables: BTreeMap::new(),
        }
    }

    fn l1_index(va: u32) -> usize {
        (va / SECTION_SIZE) as usize
    }

    fn l2_page_index(va: u32) -> usize {
        ((va % SECTION_SIZE) / PAGE_SIZE) as usize
    }

    pub fn is_mapped(&self, va: u32) -> bool {
        let l1_index = Self::l1_index(va);
        if !self.l1.is_mapped(l1_index) {
            return false;
        }
        // A section descriptor maps the whole MiB directly; an L2 table
        // needs its own per-page bit checked.
        match self.l2_tables.get(&(l1_index as u32)) {
            Some(table) => table.is_mapped(Self::l2_page_index(va)),
            None => true,
        }
    }

    /// Map one page, allocating an L2 table on demand (§4.2 "every call goes
    /// through a page-granular loop").
    pub fn map_address(&mut self, va: u32, pa: u32, mem: MemoryType, flags: MapFlags) -> Result<()> {
        if self.is_mapped(va) {
            return AlreadyMappedSnafu { addr: va }.fail();
        }
        let ap = match (flags.user_accessible, flags.writable) {
            (true, true) => AccessPermission::KernelRwUserRw,
            (true, false) => AccessPermission::KernelRwUserRo,
            (false, _) => AccessPermission::KernelOnlyRw,
        };

        let l1_index = Self::l1_index(va);
        let l1_key = l1_index as u32;
        if !self.l2_tables.contains_key(&l1_key) {
            let fresh = Box::new(L2Table::empty());
            self.l2_tables.insert(l1_key, fresh);
            let l2_phys = ALLOCATOR
                .lock(|a| a.find_free_page(PAGE_SIZE, Pool::Normal))
                .context(PhysSnafu)?;
            self.l1.set_page_table(l1_index, l2_phys);
        }
        let idx = Self::l2_page_index(va);
        let table = self.l2_tables.get_mut(&l1_key).expect("l2 table just inserted");
        table.set_small_page(idx, pa, mem, ap);
        Ok(())
    }

    pub fn map_address_range(&mut self, va_start: u32, pa_start: u32, size: u32, mem: MemoryType, flags: MapFlags) -> Result<()> {
        let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
        let mut mapped = 0u32;
        for i in 0..pages {
            if let Err(e) = self.map_address(va_start + i * PAGE_SIZE, pa_start + i * PAGE_SIZE, mem, flags) {
                for j in 0..mapped {
                    let _ = self.unmap_address(va_start + j * PAGE_SIZE, false);
                }
                return Err(e);
            }
            mapped += 1;
        }
        Ok(())
    }

    pub fn unmap_address(&mut self, va: u32, free_phys: bool) -> Result<()> {
        if !self.is_mapped(va) {
            return NotMappedSnafu { addr: va }.fail();
        }
        let l1_index = Self::l1_index(va);
        let l1_key = l1_index as u32;
        if let Some(table) = self.l2_tables.get_mut(&l1_key) {
            let idx = Self::l2_page_index(va);
            if free_phys {
                // physical base lives in bits [31:12] of the descriptor.
                let pa = table.0[idx] & 0xFFFF_F000;
                ALLOCATOR.lock(|a| a.free_page(pa)).context(PhysSnafu)?;
            }
            table.clear(idx);
        }
        Ok(())
    }

    pub fn get_min_address(&self) -> u32 {
        match self.ty {
            ContextType::Kernel => KERNEL_AREA_START as u32,
            ContextType::User => USER_AREA_START as u32,
        }
    }

    pub fn get_max_address(&self) -> u32 {
        match self.ty {
            ContextType::Kernel => 0xFFFF_0000,
            ContextType::User => KERNEL_AREA_START as u32 - 1,
        }
    }

    /// Linear scan for `size` contiguous unmapped bytes at/after `hint_start`,
    /// page by page (good enough: address spaces are sparse in this kernel).
    pub fn find_free_range(&self, size: u32, hint_start: u32) -> Result<u32> {
        let pages_needed = (size + PAGE_SIZE - 1) / PAGE_SIZE;
        let max = self.get_max_address();
        let mut candidate = hint_start.max(self.get_min_address());
        'outer: while candidate < max {
            for i in 0..pages_needed {
                if self.is_mapped(candidate + i * PAGE_SIZE) {
                    candidate += PAGE_SIZE;
                    continue 'outer;
                }
            }
            return Ok(candidate);
        }
        NoFreeRangeSnafu { size, hint_start }.fail()
    }

    /// Allocate a fresh physical frame and map it at `va`, rolling back the
    /// reservation if the mapping itself fails (e.g. already mapped).
    pub fn map_address_random(&mut self, va: u32, mem: MemoryType, flags: MapFlags) -> Result<()> {
        let pa = ALLOCATOR.lock(|a| a.find_free_page(PAGE_SIZE, Pool::Normal)).context(PhysSnafu)?;
        if let Err(e) = self.map_address(va, pa, mem, flags) {
            let _ = ALLOCATOR.lock(|a| a.free_page(pa));
            return Err(e);
        }
        Ok(())
    }

    pub fn unmap_address_range(&mut self, va_start: u32, size: u32, free_phys: bool) -> Result<()> {
        let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
        for i in 0..pages {
            self.unmap_address(va_start + i * PAGE_SIZE, free_phys)?;
        }
        Ok(())
    }

    /// Resolve `va` to the physical address it is currently mapped to,
    /// whichever level (section or small page) maps it.
    pub fn physical_address_of(&self, va: u32) -> Option<u32> {
        let l1_index = Self::l1_index(va);
        let entry = self.l1.0[l1_index];
        match entry & 0b11 {
            0b10 => Some((entry & 0xFFF0_0000) | (va & 0x000F_FFFF)),
            0b01 => {
                let table = self.l2_tables.get(&(l1_index as u32))?;
                let idx = Self::l2_page_index(va);
                if table.is_mapped(idx) {
                    Some((table.0[idx] & 0xFFFF_F000) | (va & 0x0000_0FFF))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Deep-copy every L2-backed mapping into fresh physical frames with
    /// their contents copied through the kernel's temporary mapping window
    /// (§4.2 fork); L1 sections (the shared kernel identity map) are copied
    /// by descriptor only, since they never own a private frame per process.
    pub fn fork_context(&self, kernel_ctx: &mut AddressContext) -> Result<AddressContext> {
        let mut child = AddressContext::new(self.ty);
        for l1_index in 0..L1_ENTRIES {
            let entry = self.l1.0[l1_index];
            match entry & 0b11 {
                0b10 => child.l1.0[l1_index] = entry,
                0b01 => {
                    let old_table = self
                        .l2_tables
                        .get(&(l1_index as u32))
                        .expect("l1 page-table entry without a tracked l2 table");
                    let new_l2_phys = ALLOCATOR
                        .lock(|a| a.find_free_page(PAGE_SIZE, Pool::Normal))
                        .context(PhysSnafu)?;
                    let mut new_table = Box::new(L2Table::empty());
                    for idx in 0..L2_ENTRIES {
                        if !old_table.is_mapped(idx) {
                            continue;
                        }
                        let old_pa = old_table.0[idx] & 0xFFFF_F000;
                        let new_pa = ALLOCATOR
                            .lock(|a| a.find_free_page(PAGE_SIZE, Pool::Normal))
                            .context(PhysSnafu)?;
                        Self::copy_page_contents(kernel_ctx, old_pa, new_pa)?;
                        new_table.0[idx] = (old_table.0[idx] & !0xFFFF_F000) | new_pa;
                    }
                    child.l1.set_page_table(l1_index, new_l2_phys);
                    child.l2_tables.insert(l1_index as u32, new_table);
                }
                _ => {}
            }
        }
        Ok(child)
    }

    fn copy_page_contents(kernel_ctx: &mut AddressContext, src_pa: u32, dst_pa: u32) -> Result<()> {
        let src_va = map_temporary(kernel_ctx, src_pa, PAGE_SIZE)?;
        let dst_va = match map_temporary(kernel_ctx, dst_pa, PAGE_SIZE) {
            Ok(va) => va,
            Err(e) => {
                let _ = unmap_temporary(kernel_ctx, src_va, PAGE_SIZE);
                return Err(e);
            }
        };
        unsafe {
            core::ptr::copy_nonoverlapping(src_va as *const u8, dst_va as *mut u8, PAGE_SIZE as usize);
        }
        unmap_temporary(kernel_ctx, dst_va, PAGE_SIZE)?;
        unmap_temporary(kernel_ctx, src_va, PAGE_SIZE)?;
        Ok(())
    }

    /// Return every frame this context owns — mapped pages and the L2
    /// tables themselves — to the physical allocator. `keep_metadata` reuses
    /// the existing L1 allocation in place (process replace/exec); otherwise
    /// the L1 table itself is dropped and replaced (process teardown).
    pub fn destroy_context(&mut self, keep_metadata: bool) -> Result<()> {
        for (l1_key, table) in self.l2_tables.iter() {
            for idx in 0..L2_ENTRIES {
                if table.is_mapped(idx) {
                    let pa = table.0[idx] & 0xFFFF_F000;
                    ALLOCATOR.lock(|a| a.free_page(pa)).context(PhysSnafu)?;
                }
            }
            let l2_phys = self.l1.0[*l1_key as usize] & 0xFFFF_FC00;
            ALLOCATOR.lock(|a| a.free_page(l2_phys)).context(PhysSnafu)?;
        }
        self.l2_tables.clear();
        if keep_metadata {
            self.l1.0.fill(0);
        } else {
            self.l1 = Box::new(L1Table::empty());
        }
        Ok(())
    }
}

/// Query whether `va` is mapped in `ctx`, without requiring the caller hold
/// a `&mut AddressContext`.
pub fn is_mapped_in_context(ctx: &AddressContext, va: u32) -> bool {
    ctx.is_mapped(va)
}

pub fn is_mapped_range(ctx: &AddressContext, va_start: u32, size: u32) -> bool {
    let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
    (0..pages).all(|i| ctx.is_mapped(va_start + i * PAGE_SIZE))
}

pub fn get_mapped_address_in_context(ctx: &AddressContext, va: u32) -> Option<u32> {
    ctx.physical_address_of(va)
}

/// Invalidate the single TLB entry backing `va` (§4.2 `flush_address`).
pub fn flush_address(_ctx: &AddressContext, va: u32) {
    unsafe {
        cp15::tlbimva(va & !(PAGE_SIZE - 1));
    }
    cp15::isb();
}

/// Invalidate the whole TLB (§4.2 `flush_complete`), e.g. after tearing down
/// a context whose ASID/PID may be reused.
pub fn flush_complete() {
    unsafe {
        cp15::tlbiall();
    }
    cp15::isb();
}

const TEMP_WINDOW_START: u32 = 0xFF00_0000;
const TEMP_WINDOW_SLOTS: usize = 16;

/// Fixed-size kernel VA window used to get a safely-accessible mapping of an
/// arbitrary physical frame for the duration of a copy (§3 "per-context
/// temporary mapping window"). Reentrant as long as live regions don't
/// overlap, since each call gets its own disjoint slot run.
struct TempWindow {
    used: [bool; TEMP_WINDOW_SLOTS],
}

impl TempWindow {
    const fn new() -> Self {
        Self { used: [false; TEMP_WINDOW_SLOTS] }
    }

    fn acquire(&mut self, slots_needed: usize) -> Option<usize> {
        if slots_needed == 0 || slots_needed > TEMP_WINDOW_SLOTS {
            return None;
        }
        'outer: for start in 0..=(TEMP_WINDOW_SLOTS - slots_needed) {
            for i in 0..slots_needed {
                if self.used[start + i] {
                    continue 'outer;
                }
            }
            for i in 0..slots_needed {
                self.used[start + i] = true;
            }
            return Some(start);
        }
        None
    }

    fn release(&mut self, start: usize, slots: usize) {
        for i in 0..slots {
            self.used[start + i] = false;
        }
    }
}

static TEMP_WINDOW: crate::sync::IrqSafeNullLock<TempWindow> =
    crate::sync::IrqSafeNullLock::new(TempWindow::new());

/// Map `size` bytes of physical memory starting at `pa` into the kernel
/// temporary window, returning the chosen VA. Valid only until the matching
/// [`unmap_temporary`] call.
pub fn map_temporary(kernel_ctx: &mut AddressContext, pa: u32, size: u32) -> Result<u32> {
    let pages = ((size + PAGE_SIZE - 1) / PAGE_SIZE) as usize;
    let start = match TEMP_WINDOW.lock(|w| w.acquire(pages)) {
        Some(s) => s,
        None => return NoFreeRangeSnafu { size, hint_start: TEMP_WINDOW_START }.fail(),
    };
    let va = TEMP_WINDOW_START + start as u32 * PAGE_SIZE;
    let flags = MapFlags { writable: true, user_accessible: false };
    if let Err(e) = kernel_ctx.map_address_range(va, pa, size, MemoryType::Normal, flags) {
        TEMP_WINDOW.lock(|w| w.release(start, pages));
        return Err(e);
    }
    Ok(va)
}

pub fn unmap_temporary(kernel_ctx: &mut AddressContext, va: u32, size: u32) -> Result<()> {
    kernel_ctx.unmap_address_range(va, size, false)?;
    let pages = ((size + PAGE_SIZE - 1) / PAGE_SIZE) as usize;
    let start = ((va - TEMP_WINDOW_START) / PAGE_SIZE) as usize;
    TEMP_WINDOW.lock(|w| w.release(start, pages));
    for i in 0..pages as u32 {
        flush_address(kernel_ctx, va + i * PAGE_SIZE);
    }
    Ok(())
}

use snafu::ResultExt;

/// Process-facing registry of address-space contexts (set_context/flush).
pub struct ContextManager {
    active: Option<u32>,
}

impl ContextManager {
    pub const fn new() -> Self {
        Self { active: None }
    }

    pub fn set_context(&mut self, pid: u32) {
        self.active = Some(pid);
        // Arch-specific TTBR0/CONTEXTIDR write happens in the caller, which
        // owns the actual `AddressContext` (kept in the process table).
    }

    pub fn active_pid(&self) -> Option<u32> {
        self.active
    }
}

pub static CONTEXT_MANAGER: crate::sync::IrqSafeNullLock<ContextManager> =
    crate::sync::IrqSafeNullLock::new(ContextManager::new());

#[cfg(test)]
mod tests {
    use super::*;

    fn init_allocator() {
        ALLOCATOR.lock(|a| {
            if !a.is_initialized() {
                a.init(4096, 0, None, 4096 - 64, 64);
            }
        });
    }

    #[test]
    fn map_then_is_mapped_round_trips() {
        init_allocator();
        let mut ctx = AddressContext::new(ContextType::User);
        let flags = MapFlags { writable: true, user_accessible: true };
        ctx.map_address(0x1000, 0x9000, MemoryType::Normal, flags).unwrap();
        assert!(ctx.is_mapped(0x1000));
        assert!(!ctx.is_mapped(0x2000));
    }

    #[test]
    fn unmap_then_remap_succeeds() {
        init_allocator();
        let mut ctx = AddressContext::new(ContextType::User);
        let flags = MapFlags { writable: true, user_accessible: true };
        ctx.map_address(0x5000, 0xA000, MemoryType::Normal, flags).unwrap();
        ctx.unmap_address(0x5000, false).unwrap();
        assert!(!ctx.is_mapped(0x5000));
        ctx.map_address(0x5000, 0xB000, MemoryType::Normal, flags).unwrap();
        assert!(ctx.is_mapped(0x5000));
    }

    #[test]
    fn min_max_address_follow_context_type() {
        let kernel = AddressContext::new(ContextType::Kernel);
        let user = AddressContext::new(ContextType::User);
        assert_eq!(kernel.get_min_address(), KERNEL_AREA_START as u32);
        assert_eq!(user.get_min_address(), USER_AREA_START as u32);
        assert!(user.get_max_address() < kernel.get_min_address());
    }

    #[test]
    fn map_address_random_picks_a_frame_and_unmap_range_frees_it() {
        init_allocator();
        let mut ctx = AddressContext::new(ContextType::User);
        let flags = MapFlags { writable: true, user_accessible: true };
        ctx.map_address_random(0x6000, MemoryType::Normal, flags).unwrap();
        assert!(ctx.is_mapped(0x6000));
        ctx.unmap_address_range(0x6000, PAGE_SIZE, true).unwrap();
        assert!(!ctx.is_mapped(0x6000));
    }

    #[test]
    fn physical_address_of_resolves_mapped_small_page() {
        init_allocator();
        let mut ctx = AddressContext::new(ContextType::User);
        let flags = MapFlags { writable: true, user_accessible: true };
        ctx.map_address(0x7000, 0xC000, MemoryType::Normal, flags).unwrap();
        assert_eq!(ctx.physical_address_of(0x7000), Some(0xC000));
        assert_eq!(ctx.physical_address_of(0x8000), None);
    }

    #[test]
    fn temporary_mapping_round_trips_contents() {
        init_allocator();
        let mut kernel_ctx = AddressContext::new(ContextType::Kernel);
        let pa = ALLOCATOR.lock(|a| a.find_free_page(PAGE_SIZE, Pool::Normal)).unwrap();
        let va = map_temporary(&mut kernel_ctx, pa, PAGE_SIZE).unwrap();
        unsafe {
            core::ptr::write_volatile(va as *mut u32, 0x1234_5678);
            assert_eq!(core::ptr::read_volatile(va as *const u32), 0x1234_5678);
        }
        unmap_temporary(&mut kernel_ctx, va, PAGE_SIZE).unwrap();
        assert!(!kernel_ctx.is_mapped(va));
        ALLOCATOR.lock(|a| a.free_page(pa)).unwrap();
    }

    #[test]
    fn fork_context_copies_mapped_pages_into_fresh_frames() {
        init_allocator();
        let mut kernel_ctx = AddressContext::new(ContextType::Kernel);
        let mut parent = AddressContext::new(ContextType::User);
        let flags = MapFlags { writable: true, user_accessible: true };
        let parent_pa = ALLOCATOR.lock(|a| a.find_free_page(PAGE_SIZE, Pool::Normal)).unwrap();
        parent.map_address(0x9000, parent_pa, MemoryType::Normal, flags).unwrap();

        let child = parent.fork_context(&mut kernel_ctx).unwrap();
        assert!(child.is_mapped(0x9000));
        let child_pa = child.physical_address_of(0x9000).unwrap();
        assert_ne!(child_pa, parent_pa);
    }

    #[test]
    fn destroy_context_frees_every_owned_frame() {
        init_allocator();
        let mut ctx = AddressContext::new(ContextType::User);
        let flags = MapFlags { writable: true, user_accessible: true };
        let pa = ALLOCATOR.lock(|a| a.find_free_page(PAGE_SIZE, Pool::Normal)).unwrap();
        ctx.map_address(0xA000, pa, MemoryType::Normal, flags).unwrap();
        ctx.destroy_context(false).unwrap();
        assert!(!ALLOCATOR.lock(|a| a.is_range_used(pa, PAGE_SIZE)));
        assert!(!ctx.is_mapped(0xA000));
    }
}
