/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! ARMv7-A short-descriptor translation tables (§4.2 "Virtual memory").
//!
//! One 4096-entry L1 table covers the full 4 GiB split into 1 MiB sections;
//! a `Normal`/`Device` region additionally gets a 256-entry L2 table of 4 KiB
//! small pages when finer-grained mapping is required. Grounded in the
//! teacher's `memory/mmu` register layout conventions (bitfield-driven
//! descriptor construction via `tock_registers`) even though the teacher
//! itself targets AArch64 long-descriptor tables; the short-descriptor bit
//! layout here follows the ARMv7-A architecture reference manual directly,
//! as referenced from `original_source/bolthur/kernel/arch/arm/v7/mm/virt/short.c`.

use tock_registers::{register_bitfields, LocalRegisterCopy};

register_bitfields! {
    u32,

    /// L1 section descriptor (bits [1:0] == 0b10).
    pub L1Section [
        TYPE OFFSET(0) NUMBITS(2) [
            Section = 0b10
        ],
        B OFFSET(2) NUMBITS(1) [],
        C OFFSET(3) NUMBITS(1) [],
        XN OFFSET(4) NUMBITS(1) [],
        DOMAIN OFFSET(5) NUMBITS(4) [],
        AP_LOW OFFSET(10) NUMBITS(2) [],
        TEX OFFSET(12) NUMBITS(3) [],
        AP_HIGH OFFSET(15) NUMBITS(1) [],
        S OFFSET(16) NUMBITS(1) [],
        NG OFFSET(17) NUMBITS(1) [],
        BASE OFFSET(20) NUMBITS(12) [],
    ],

    /// L1 page-table descriptor (bits [1:0] == 0b01), points at an L2 table.
    pub L1PageTable [
        TYPE OFFSET(0) NUMBITS(2) [
            PageTable = 0b01
        ],
        DOMAIN OFFSET(5) NUMBITS(4) [],
        BASE OFFSET(10) NUMBITS(22) [],
    ],

    /// L2 small-page descriptor (bits [1:0] == 0b10).
    pub L2SmallPage [
        XN OFFSET(0) NUMBITS(1) [],
        TYPE OFFSET(1) NUMBITS(1) [
            SmallPage = 1
        ],
        B OFFSET(2) NUMBITS(1) [],
        C OFFSET(3) NUMBITS(1) [],
        AP_LOW OFFSET(4) NUMBITS(2) [],
        TEX OFFSET(6) NUMBITS(3) [],
        AP_HIGH OFFSET(9) NUMBITS(1) [],
        S OFFSET(10) NUMBITS(1) [],
        NG OFFSET(11) NUMBITS(1) [],
        BASE OFFSET(12) NUMBITS(20) [],
    ]
}

/// Classification used by [`crate::memory::virt`] when it asks the
/// architecture layer to encode a descriptor; mirrors the `MemoryType` enum
/// named in the glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// Normal cacheable RAM.
    Normal,
    /// Device/MMIO: strongly ordered, no caching, no speculative access.
    Device,
}

impl MemoryType {
    fn bits(self) -> (u32, u32, u32) {
        // (TEX, C, B)
        match self {
            MemoryType::Normal => (0b001, 1, 1),
            MemoryType::Device => (0b000, 0, 0),
        }
    }
}

/// Access permission, collapsed to the subset the kernel actually uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPermission {
    KernelOnlyRw,
    KernelRwUserRo,
    KernelRwUserRw,
}

impl AccessPermission {
    fn ap(self) -> (u32, u32) {
        // (AP_HIGH, AP_LOW)
        match self {
            AccessPermission::KernelOnlyRw => (0, 0b01),
            AccessPermission::KernelRwUserRo => (0, 0b10),
            AccessPermission::KernelRwUserRw => (0, 0b11),
        }
    }
}

pub const SECTION_SIZE: u32 = 1024 * 1024;
pub const PAGE_SIZE: u32 = 4096;
pub const L1_ENTRIES: usize = 4096;
pub const L2_ENTRIES: usize = 256;

#[repr(align(16384))]
pub struct L1Table(pub [u32; L1_ENTRIES]);

#[repr(align(1024))]
pub struct L2Table(pub [u32; L2_ENTRIES]);

impl L1Table {
    pub const fn empty() -> Self {
        Self([0; L1_ENTRIES])
    }

    /// Encode a 1 MiB section descriptor for `index` (`index == vaddr >> 20`).
    pub fn set_section(&mut self, index: usize, phys_base: u32, mem: MemoryType, ap: AccessPermission) {
        let (tex, c, b) = mem.bits();
        let (ap_high, ap_low) = ap.ap();
        let mut reg: LocalRegisterCopy<u32, L1Section::Register> = LocalRegisterCopy::new(0);
        reg.write(
            L1Section::TYPE::Section
                + L1Section::B.val(b)
                + L1Section::C.val(c)
                + L1Section::TEX.val(tex)
                + L1Section::AP_LOW.val(ap_low)
                + L1Section::AP_HIGH.val(ap_high)
                + L1Section::DOMAIN.val(0)
                + L1Section::S.val(1)
                + L1Section::BASE.val(phys_base >> 20),
        );
        self.0[index] = reg.get();
    }

    pub fn set_page_table(&mut self, index: usize, l2_phys_base: u32) {
        let mut reg: LocalRegisterCopy<u32, L1PageTable::Register> = LocalRegisterCopy::new(0);
        reg.write(
            L1PageTable::TYPE::PageTable + L1PageTable::DOMAIN.val(0) + L1PageTable::BASE.val(l2_phys_base >> 10),
        );
        self.0[index] = reg.get();
    }

    pub fn clear(&mut self, index: usize) {
        self.0[index] = 0;
    }

    pub fn is_mapped(&self, index: usize) -> bool {
        self.0[index] & 0b11 != 0
    }
}

impl L2Table {
    pub const fn empty() -> Self {
        Self([0; L2_ENTRIES])
    }

    pub fn set_small_page(&mut self, index: usize, phys_base: u32, mem: MemoryType, ap: AccessPermission) {
        let (tex, c, b) = mem.bits();
        let (ap_high, ap_low) = ap.ap();
        let mut reg: LocalRegisterCopy<u32, L2SmallPage::Register> = LocalRegisterCopy::new(0);
        reg.write(
            L2SmallPage::TYPE::SmallPage
                + L2SmallPage::B.val(b)
                + L2SmallPage::C.val(c)
                + L2SmallPage::TEX.val(tex)
                + L2SmallPage::AP_LOW.val(ap_low)
                + L2SmallPage::AP_HIGH.val(ap_high)
                + L2SmallPage::S.val(1)
                + L2SmallPage::BASE.val(phys_base >> 12),
        );
        self.0[index] = reg.get();
    }

    pub fn clear(&mut self, index: usize) {
        self.0[index] = 0;
    }

    pub fn is_mapped(&self, index: usize) -> bool {
        self.0[index] & 0b11 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_descriptor_round_trips_base_address() {
        let mut l1 = L1Table::empty();
        l1.set_section(0x800, 0x8000_0000, MemoryType::Normal, AccessPermission::KernelOnlyRw);
        assert!(l1.is_mapped(0x800));
        assert_eq!(l1.0[0x800] & 0xFFF0_0000, 0x8000_0000);
        assert_eq!(l1.0[0x800] & 0b11, 0b10);
    }

    #[test]
    fn page_table_descriptor_selects_type_01() {
        let mut l1 = L1Table::empty();
        l1.set_page_table(3, 0x4000_0000);
        assert_eq!(l1.0[3] & 0b11, 0b01);
        l1.clear(3);
        assert!(!l1.is_mapped(3));
    }

    #[test]
    fn small_page_descriptor_round_trips_base_address() {
        let mut l2 = L2Table::empty();
        l2.set_small_page(5, 0x1234_5000, MemoryType::Device, AccessPermission::KernelRwUserRw);
        assert!(l2.is_mapped(5));
        assert_eq!(l2.0[5] & 0xFFFF_F000, 0x1234_5000);
    }
}
