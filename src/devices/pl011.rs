/*
 * SPDX-License-Identifier: MIT OR BlueOak-1.0.0
 * Portions derived from the PL011 register layout documented in
 * ARM DDI 0183G, adapted for the ARMv7-A virtual platform's UART0.
 */

//! PL011 UART driver.
//!
//! This is the console used for kernel diagnostics (`println!`/`print!`) and for
//! the QEMU semihosting-free serial path. Register offsets follow ARM DDI 0183G.

use {
    super::{ConsoleOps, SerialOps},
    core::ops,
    tock_registers::{
        interfaces::{Readable, Writeable},
        register_bitfields,
        registers::{ReadOnly, ReadWrite, WriteOnly},
    },
};

register_bitfields! {
    u32,

    FR [
        TXFF OFFSET(5) NUMBITS(1) [],
        RXFE OFFSET(4) NUMBITS(1) [],
        BUSY OFFSET(3) NUMBITS(1) [],
    ],

    IBRD [
        IBRD OFFSET(0) NUMBITS(16) [],
    ],

    FBRD [
        FBRD OFFSET(0) NUMBITS(6) [],
    ],

    LCRH [
        WLEN OFFSET(5) NUMBITS(2) [
            FiveBit = 0b00,
            SixBit = 0b01,
            SevenBit = 0b10,
            EightBit = 0b11
        ],
        FEN OFFSET(4) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ]
    ],

    CR [
        RXE OFFSET(9) NUMBITS(1) [],
        TXE OFFSET(8) NUMBITS(1) [],
        UARTEN OFFSET(0) NUMBITS(1) [],
    ],

    ICR [
        ALL OFFSET(0) NUMBITS(11) [],
    ]
}

#[repr(C)]
pub struct RegisterBlock {
    dr: ReadWrite<u32>,
    __reserved_0: [u32; 5],
    fr: ReadOnly<u32, FR::Register>,
    __reserved_1: [u32; 2],
    ibrd: WriteOnly<u32, IBRD::Register>,
    fbrd: WriteOnly<u32, FBRD::Register>,
    lcrh: WriteOnly<u32, LCRH::Register>,
    cr: WriteOnly<u32, CR::Register>,
    __reserved_2: [u32; 4],
    icr: WriteOnly<u32, ICR::Register>,
}

pub struct Pl011Uart {
    base_addr: usize,
}

impl ops::Deref for Pl011Uart {
    type Target = RegisterBlock;

    fn deref(&self) -> &Self::Target {
        unsafe { &*(self.base_addr as *const RegisterBlock) }
    }
}

impl Pl011Uart {
    /// # Safety
    ///
    /// `base_addr` must be the physical/virtual address of a mapped PL011 instance.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }

    /// Program the line control and enable TX/RX. Baud rate is fixed at a divisor
    /// appropriate for a 24MHz UART clock at 115200 baud (matching the reference
    /// virtual platform's fixed clock), since there is no clock-tree driver here.
    pub fn init(&self) {
        self.cr.set(0);
        self.icr.write(ICR::ALL::CLEAR);
        self.ibrd.write(IBRD::IBRD.val(13));
        self.fbrd.write(FBRD::FBRD.val(2));
        self.lcrh
            .write(LCRH::WLEN::EightBit + LCRH::FEN::Enabled);
        self.cr.write(CR::UARTEN::SET + CR::TXE::SET + CR::RXE::SET);
    }
}

impl SerialOps for Pl011Uart {
    fn write_byte(&self, byte: u8) {
        while self.fr.is_set(FR::TXFF) {
            core::hint::spin_loop();
        }
        self.dr.set(byte as u32);
    }

    fn read_byte(&self) -> u8 {
        while self.fr.is_set(FR::RXFE) {
            core::hint::spin_loop();
        }
        self.dr.get() as u8
    }

    fn flush(&self) {
        while self.fr.is_set(FR::BUSY) {
            core::hint::spin_loop();
        }
    }

    fn clear_rx(&self) {
        while !self.fr.is_set(FR::RXFE) {
            let _ = self.dr.get();
        }
    }
}

impl ConsoleOps for Pl011Uart {}

unsafe impl Sync for Pl011Uart {}
