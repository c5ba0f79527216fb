/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Bitmap physical page allocator (§4.1).
//!
//! Two bitmaps track every frame: `live` (currently handed out) and `check`
//! (reserved regardless of transient frees, per the resolved check-bitmap
//! protocol). A third, `dma`, is indexed by offset from `dma_start` and
//! covers the `Dma` pool separately from `Normal`.

use crate::error::errno;
use crate::memory::addr::PAGE_SIZE;
use alloc::vec;
use alloc::vec::Vec;
use snafu::Snafu;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Normal,
    Dma,
}

#[derive(Debug, Snafu)]
pub enum PhysError {
    #[snafu(display("physical allocator used before phys_init_get()"))]
    NotInitialized,
    #[snafu(display("no free frame satisfies alignment {alignment} in pool {pool:?}"))]
    OutOfMemory { alignment: u32, pool: Pool },
    #[snafu(display("address {addr:#x} is not page aligned"))]
    Misaligned { addr: u32 },
}

impl crate::error::IntoErrno for PhysError {
    fn into_errno(self) -> isize {
        match self {
            PhysError::NotInitialized => errno::EAGAIN,
            PhysError::OutOfMemory { .. } => errno::ENOMEM,
            PhysError::Misaligned { .. } => errno::EINVAL,
        }
    }
}

type Result<T> = core::result::Result<T, PhysError>;

struct Bitmap {
    words: Vec<u32>,
}

impl Bitmap {
    fn new(frame_count: usize) -> Self {
        Self {
            words: vec![0u32; (frame_count + 31) / 32],
        }
    }

    fn get(&self, index: usize) -> bool {
        self.words[index / 32] & (1 << (index % 32)) != 0
    }

    fn set(&mut self, index: usize, value: bool) {
        if value {
            self.words[index / 32] |= 1 << (index % 32);
        } else {
            self.words[index / 32] &= !(1 << (index % 32));
        }
    }

    fn word_full(&self, word_index: usize) -> bool {
        self.words[word_index] == u32::MAX
    }

    /// LSB-first scan within `word_index` for the first clear bit, per §4.1
    /// "bits are scanned LSB-first".
    fn first_clear_in_word(&self, word_index: usize, frame_count: usize) -> Option<usize> {
        let word = self.words[word_index];
        for bit in 0..32 {
            let index = word_index * 32 + bit;
            if index >= frame_count {
                break;
            }
            if word & (1 << bit) == 0 {
                return Some(index);
            }
        }
        None
    }
}

pub struct PhysAllocator {
    live: Bitmap,
    check: Bitmap,
    frame_count: usize,
    dma_start_frame: usize,
    dma_frame_count: usize,
    initialized: bool,
}

impl PhysAllocator {
    pub const fn uninit() -> Self {
        Self {
            live: Bitmap { words: Vec::new() },
            check: Bitmap { words: Vec::new() },
            frame_count: 0,
            dma_start_frame: 0,
            dma_frame_count: 0,
            initialized: false,
        }
    }

    /// Startup per §4.1: size the bitmaps, mark `[0, kernel_end)` and the
    /// initrd range used, then let the caller add arch-specific reservations
    /// before flipping `initialized`.
    pub fn init(&mut self, total_frames: usize, kernel_end: u32, initrd: Option<(u32, u32)>, dma_start_frame: usize, dma_frame_count: usize) {
        self.live = Bitmap::new(total_frames);
        self.check = Bitmap::new(total_frames);
        self.frame_count = total_frames;
        self.dma_start_frame = dma_start_frame;
        self.dma_frame_count = dma_frame_count;

        let kernel_end_frame = ((kernel_end + PAGE_SIZE - 1) / PAGE_SIZE) as usize;
        for frame in 0..kernel_end_frame.min(total_frames) {
            self.live.set(frame, true);
        }
        if let Some((start, end)) = initrd {
            let start_frame = (start / PAGE_SIZE) as usize;
            let end_frame = ((end + PAGE_SIZE - 1) / PAGE_SIZE) as usize;
            for frame in start_frame..end_frame.min(total_frames) {
                self.live.set(frame, true);
            }
        }
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn require_init(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            NotInitializedSnafu.fail()
        }
    }

    fn pool_bounds(&self, pool: Pool) -> (usize, usize) {
        match pool {
            Pool::Normal => (0, self.frame_count),
            Pool::Dma => (self.dma_start_frame, self.dma_start_frame + self.dma_frame_count),
        }
    }

    pub fn mark_used(&mut self, addr: u32) -> Result<()> {
        self.require_init()?;
        if addr % PAGE_SIZE != 0 {
            return MisalignedSnafu { addr }.fail();
        }
        self.live.set((addr / PAGE_SIZE) as usize, true);
        Ok(())
    }

    /// Clears the live bit unconditionally; clears (and frees) the check bit
    /// only if it was already clear. See the resolved check-bitmap protocol.
    pub fn mark_free(&mut self, addr: u32) -> Result<()> {
        self.require_init()?;
        if addr % PAGE_SIZE != 0 {
            return MisalignedSnafu { addr }.fail();
        }
        let index = (addr / PAGE_SIZE) as usize;
        self.live.set(index, false);
        if !self.check.get(index) {
            // nothing held the reservation: already free.
        }
        Ok(())
    }

    /// Reserve `addr` against future `find_free_page` results without
    /// marking it live. Paired with [`Self::phys_free_check_only`].
    pub fn mark_check(&mut self, addr: u32) -> Result<()> {
        self.require_init()?;
        self.check.set((addr / PAGE_SIZE) as usize, true);
        Ok(())
    }

    /// Drop a reservation placed by [`Self::mark_check`] once its holder no
    /// longer needs the frame excluded from allocation.
    pub fn phys_free_check_only(&mut self, addr: u32) -> Result<()> {
        self.require_init()?;
        self.check.set((addr / PAGE_SIZE) as usize, false);
        Ok(())
    }

    pub fn free_page(&mut self, addr: u32) -> Result<()> {
        self.mark_free(addr)
    }

    pub fn free_page_range(&mut self, addr: u32, size: u32) -> Result<()> {
        let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
        for i in 0..pages {
            self.mark_free(addr + i * PAGE_SIZE)?;
        }
        Ok(())
    }

    fn allocated(&self, index: usize) -> bool {
        self.live.get(index) || self.check.get(index)
    }

    pub fn find_free_page(&mut self, alignment: u32, pool: Pool) -> Result<u32> {
        self.require_init()?;
        let (start, end) = self.pool_bounds(pool);
        let align_frames = (alignment / PAGE_SIZE).max(1) as usize;

        let start_word = start / 32;
        let end_word = (end + 31) / 32;
        for word_index in start_word..end_word {
            if self.live.word_full(word_index) {
                continue;
            }
            if let Some(index) = self.live.first_clear_in_word(word_index, end) {
                if index < start {
                    continue;
                }
                if self.check.get(index) {
                    continue;
                }
                if index % align_frames != 0 {
                    continue;
                }
                self.live.set(index, true);
                return Ok(index as u32 * PAGE_SIZE);
            }
        }
        OutOfMemorySnafu { alignment, pool }.fail()
    }

    pub fn find_free_page_range(&mut self, alignment: u32, size: u32, pool: Pool) -> Result<u32> {
        self.require_init()?;
        let (start, end) = self.pool_bounds(pool);
        let align_frames = (alignment / PAGE_SIZE).max(1) as usize;
        let needed = ((size + PAGE_SIZE - 1) / PAGE_SIZE) as usize;

        let mut run_start: Option<usize> = None;
        let mut run_len = 0usize;
        for index in start..end {
            if self.allocated(index) {
                run_start = None;
                run_len = 0;
                continue;
            }
            if run_start.is_none() {
                if index % align_frames != 0 {
                    continue;
                }
                run_start = Some(index);
                run_len = 0;
            }
            run_len += 1;
            if run_len == needed {
                let base = run_start.unwrap();
                for i in base..base + needed {
                    self.live.set(i, true);
                }
                return Ok(base as u32 * PAGE_SIZE);
            }
        }
        OutOfMemorySnafu { alignment, pool }.fail()
    }

    pub fn is_range_used(&self, addr: u32, size: u32) -> bool {
        let start = (addr / PAGE_SIZE) as usize;
        let pages = ((size + PAGE_SIZE - 1) / PAGE_SIZE) as usize;
        (start..start + pages).any(|i| self.allocated(i))
    }

    pub fn use_page_range(&mut self, addr: u32, size: u32) -> Result<()> {
        self.require_init()?;
        let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
        for i in 0..pages {
            self.mark_used(addr + i * PAGE_SIZE)?;
        }
        Ok(())
    }
}

pub static ALLOCATOR: crate::sync::IrqSafeNullLock<PhysAllocator> =
    crate::sync::IrqSafeNullLock::new(PhysAllocator::uninit());

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(frames: usize) -> PhysAllocator {
        let mut a = PhysAllocator::uninit();
        a.init(frames, 0, None, frames - 16, 16);
        a
    }

    #[test]
    fn find_free_page_skips_full_words_and_marks_result_used() {
        let mut a = fresh(128);
        for i in 0..32 {
            a.mark_used((i * PAGE_SIZE) as u32).unwrap();
        }
        let addr = a.find_free_page(PAGE_SIZE, Pool::Normal).unwrap();
        assert_eq!(addr, 32 * PAGE_SIZE);
        assert!(a.is_range_used(addr, PAGE_SIZE));
    }

    #[test]
    fn find_free_page_range_resets_run_on_used_bit() {
        let mut a = fresh(64);
        a.mark_used((2 * PAGE_SIZE) as u32).unwrap();
        let addr = a.find_free_page_range(PAGE_SIZE, 3 * PAGE_SIZE, Pool::Normal).unwrap();
        assert_eq!(addr, 3 * PAGE_SIZE);
    }

    #[test]
    fn mark_free_respects_outstanding_check_reservation() {
        let mut a = fresh(64);
        let addr = a.find_free_page(PAGE_SIZE, Pool::Normal).unwrap();
        a.mark_check(addr).unwrap();
        a.mark_free(addr).unwrap();
        // still excluded: check bit outlives the live-bit clear.
        assert!(a.is_range_used(addr, PAGE_SIZE));
        a.phys_free_check_only(addr).unwrap();
        assert!(!a.is_range_used(addr, PAGE_SIZE));
    }

    #[test]
    fn uninitialized_allocator_rejects_use() {
        let mut a = PhysAllocator::uninit();
        assert!(matches!(a.find_free_page(PAGE_SIZE, Pool::Normal), Err(PhysError::NotInitialized)));
    }

    #[test]
    fn dma_pool_is_indexed_from_dma_start() {
        let mut a = fresh(64);
        let addr = a.find_free_page(PAGE_SIZE, Pool::Dma).unwrap();
        assert!(addr >= (64 - 16) * PAGE_SIZE);
    }
}
