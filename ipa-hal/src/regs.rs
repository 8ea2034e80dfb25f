//! Per-channel register block definitions and accessors.
//!
//! Each channel owns one 0x80-byte block of 32-bit registers. Depth words
//! carry `{total:16 | filled:16}` (total in the high half, the
//! hardware-maintained filled count in the low half). Pointer words carry
//! `{pointer:16 | status:16}` with the mod-2*depth pointer in the high half
//! and the full/empty flag in bit 0 of the low half.

use bitflags::bitflags;
use core::ptr;

use crate::error::{HalError, Result};

/// Register offsets within one channel block (bytes).
pub mod fifo {
    /// Fill ring depth, `{total:16 | filled:16}`
    pub const FILL_DEPTH: usize = 0x00;
    /// Fill ring write pointer, `{ptr:16 | status:16}`
    pub const FILL_WR: usize = 0x04;
    /// Fill ring read pointer (hardware-advanced)
    pub const FILL_RD: usize = 0x08;
    /// Done ring depth, `{total:16 | filled:16}`
    pub const DONE_DEPTH: usize = 0x0C;
    /// Done ring write pointer (hardware-advanced)
    pub const DONE_WR: usize = 0x10;
    /// Done ring read pointer
    pub const DONE_RD: usize = 0x14;
    /// Fill ring base address, low word
    pub const FILL_ADDR_LO: usize = 0x18;
    /// Fill ring base address, high word
    pub const FILL_ADDR_HI: usize = 0x1C;
    /// Done ring base address, low word
    pub const DONE_ADDR_LO: usize = 0x20;
    /// Done ring base address, high word
    pub const DONE_ADDR_HI: usize = 0x24;
    /// Interrupt generation terms, `{delay_us:16 | threshold:16}`
    pub const INT_TERMS: usize = 0x2C;
    /// Interrupt enable word
    pub const INT_ENABLE: usize = 0x30;
    /// Flow-control config word
    pub const FLOW_CTRL_CONFIG: usize = 0x38;
    /// Done ring watermarks, `{exit:16 | entry:16}`
    pub const DONE_WATERMARKS: usize = 0x3C;
    /// Fill ring watermarks, `{exit:16 | entry:16}`
    pub const FILL_WATERMARKS: usize = 0x40;
    /// Interrupt status word
    pub const INT_STATUS: usize = 0x44;
    /// Interrupt clear word
    pub const INT_CLEAR: usize = 0x48;
    /// Write-only fill write pointer re-arm used on resume
    pub const FILL_WR_INIT: usize = 0x60;
}

/// Byte stride between consecutive channel blocks.
pub const BLOCK_STRIDE: usize = 0x80;

/// Flow-control config word bits.
pub mod flowctrl {
    /// Mode field, bits 1:0
    pub const MODE_MASK: u32 = 0x3;
    /// Stop hardware delivery into the done ring
    pub const RECEIVE_STOP: u32 = 1 << 4;
}

bitflags! {
    /// Interrupt enable bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntEnable: u32 {
        const ENTER_FLOW_CTRL = 1 << 0;
        const EXIT_FLOW_CTRL  = 1 << 1;
        const DONE_OVERFLOW   = 1 << 2;
        const DELAY_TIMER     = 1 << 3;
        const THRESHOLD       = 1 << 4;
        const DONE_DELIVERED  = 1 << 5;
        const FILL_EMPTY      = 1 << 6;
        const ERR_CODE        = 1 << 7;
        const DROP_PACKET     = 1 << 8;
    }
}

bitflags! {
    /// Interrupt status bits, the enable group shifted up by 12.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntStatus: u32 {
        const ENTER_FLOW_CTRL = 1 << 12;
        const EXIT_FLOW_CTRL  = 1 << 13;
        const DONE_OVERFLOW   = 1 << 14;
        const DELAY_TIMER     = 1 << 15;
        const THRESHOLD       = 1 << 16;
        const DONE_DELIVERED  = 1 << 17;
        const FILL_EMPTY      = 1 << 18;
        const ERR_CODE        = 1 << 19;
        const DROP_PACKET     = 1 << 20;
    }
}

bitflags! {
    /// Interrupt clear bits, one per status bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntClear: u32 {
        const ENTER_FLOW_CTRL = 1 << 0;
        const EXIT_FLOW_CTRL  = 1 << 1;
        const DONE_OVERFLOW   = 1 << 2;
        const DELAY_TIMER     = 1 << 3;
        const THRESHOLD       = 1 << 4;
        const DONE_DELIVERED  = 1 << 5;
        const FILL_EMPTY      = 1 << 6;
        const ERR_CODE        = 1 << 7;
        const DROP_PACKET     = 1 << 8;
    }
}

impl IntStatus {
    /// The clear bits acknowledging this status set.
    pub fn to_clear(self) -> IntClear {
        IntClear::from_bits_truncate(self.bits() >> 12)
    }
}

/// Volatile accessor over one channel's register block.
///
/// Hostside tests back this with an owned word array standing in for the
/// mapped device block; the arithmetic is identical either way.
#[derive(Debug)]
pub struct RegisterBlock {
    base: *mut u32,
}

impl RegisterBlock {
    /// Wrap a mapped channel block.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`BLOCK_STRIDE`] bytes of mapped
    /// read/write register (or register-like) memory, valid for the block's
    /// lifetime and not aliased by another `RegisterBlock`.
    pub unsafe fn new(base: *mut u32) -> Self {
        Self { base }
    }

    #[inline]
    fn read(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0 && offset < BLOCK_STRIDE);
        unsafe { ptr::read_volatile(self.base.add(offset / 4)) }
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0 && offset < BLOCK_STRIDE);
        unsafe { ptr::write_volatile(self.base.add(offset / 4), value) }
    }

    /// Update the high 16 bits of a word and verify by read-back.
    fn write_hi16_verified(&self, offset: usize, value: u16) -> Result<()> {
        let old = self.read(offset);
        self.write(offset, (old & 0xFFFF) | ((value as u32) << 16));
        if (self.read(offset) >> 16) as u16 != value {
            return Err(HalError::RegisterVerify);
        }
        Ok(())
    }

    // ---- depth words ----

    pub fn set_fill_depth(&self, total: u16) -> Result<()> {
        self.write_hi16_verified(fifo::FILL_DEPTH, total)
    }

    pub fn fill_depth(&self) -> u16 {
        (self.read(fifo::FILL_DEPTH) >> 16) as u16
    }

    /// Hardware-maintained fill-ring filled count.
    pub fn fill_filled(&self) -> u16 {
        self.read(fifo::FILL_DEPTH) as u16
    }

    pub fn set_done_depth(&self, total: u16) -> Result<()> {
        self.write_hi16_verified(fifo::DONE_DEPTH, total)
    }

    pub fn done_depth(&self) -> u16 {
        (self.read(fifo::DONE_DEPTH) >> 16) as u16
    }

    pub fn done_filled(&self) -> u16 {
        self.read(fifo::DONE_DEPTH) as u16
    }

    // ---- pointer words ----

    pub fn set_fill_wr(&self, ptr: u16) -> Result<()> {
        self.write_hi16_verified(fifo::FILL_WR, ptr)
    }

    pub fn fill_wr(&self) -> u16 {
        (self.read(fifo::FILL_WR) >> 16) as u16
    }

    pub fn set_fill_rd(&self, ptr: u16) -> Result<()> {
        self.write_hi16_verified(fifo::FILL_RD, ptr)
    }

    pub fn fill_rd(&self) -> u16 {
        (self.read(fifo::FILL_RD) >> 16) as u16
    }

    /// Fill ring full flag, bit 0 of the status half.
    pub fn fill_full(&self) -> bool {
        self.read(fifo::FILL_WR) & 1 != 0
    }

    pub fn set_done_wr(&self, ptr: u16) -> Result<()> {
        self.write_hi16_verified(fifo::DONE_WR, ptr)
    }

    pub fn done_wr(&self) -> u16 {
        (self.read(fifo::DONE_WR) >> 16) as u16
    }

    pub fn set_done_rd(&self, ptr: u16) -> Result<()> {
        self.write_hi16_verified(fifo::DONE_RD, ptr)
    }

    pub fn done_rd(&self) -> u16 {
        (self.read(fifo::DONE_RD) >> 16) as u16
    }

    /// Done ring empty flag, bit 0 of the status half.
    pub fn done_empty(&self) -> bool {
        self.read(fifo::DONE_RD) & 1 != 0
    }

    /// Re-arm a never-drained fill ring on resume.
    pub fn set_fill_wr_init(&self, ptr: u16) {
        self.write(fifo::FILL_WR_INIT, (ptr as u32) << 16);
    }

    // ---- ring base addresses ----

    pub fn set_fill_base(&self, bus: u64) {
        self.write(fifo::FILL_ADDR_LO, bus as u32);
        self.write(fifo::FILL_ADDR_HI, (bus >> 32) as u32);
    }

    pub fn fill_base(&self) -> u64 {
        (self.read(fifo::FILL_ADDR_LO) as u64) | ((self.read(fifo::FILL_ADDR_HI) as u64) << 32)
    }

    pub fn set_done_base(&self, bus: u64) {
        self.write(fifo::DONE_ADDR_LO, bus as u32);
        self.write(fifo::DONE_ADDR_HI, (bus >> 32) as u32);
    }

    pub fn done_base(&self) -> u64 {
        (self.read(fifo::DONE_ADDR_LO) as u64) | ((self.read(fifo::DONE_ADDR_HI) as u64) << 32)
    }

    // ---- interrupt machinery ----

    pub fn set_int_terms(&self, delay_us: u16, threshold: u16) {
        self.write(fifo::INT_TERMS, ((delay_us as u32) << 16) | threshold as u32);
    }

    pub fn set_int_enable(&self, enable: IntEnable) {
        self.write(fifo::INT_ENABLE, enable.bits());
    }

    pub fn int_enable(&self) -> IntEnable {
        IntEnable::from_bits_truncate(self.read(fifo::INT_ENABLE))
    }

    pub fn int_status(&self) -> IntStatus {
        IntStatus::from_bits_truncate(self.read(fifo::INT_STATUS))
    }

    pub fn int_clear(&self, clear: IntClear) {
        self.write(fifo::INT_CLEAR, clear.bits());
    }

    // ---- flow control ----

    pub fn set_done_watermarks(&self, exit: u16, entry: u16) {
        self.write(fifo::DONE_WATERMARKS, ((exit as u32) << 16) | entry as u32);
    }

    pub fn set_fill_watermarks(&self, exit: u16, entry: u16) {
        self.write(fifo::FILL_WATERMARKS, ((exit as u32) << 16) | entry as u32);
    }

    /// Program the flow-control mode field, preserving the other bits.
    pub fn set_flow_mode(&self, mode: u32) {
        let old = self.read(fifo::FLOW_CTRL_CONFIG);
        self.write(
            fifo::FLOW_CTRL_CONFIG,
            (old & !flowctrl::MODE_MASK) | (mode & flowctrl::MODE_MASK),
        );
    }

    /// Toggle the done-ring delivery stop bit.
    pub fn set_receive_stop(&self, stop: bool) {
        let old = self.read(fifo::FLOW_CTRL_CONFIG);
        let new = if stop {
            old | flowctrl::RECEIVE_STOP
        } else {
            old & !flowctrl::RECEIVE_STOP
        };
        self.write(fifo::FLOW_CTRL_CONFIG, new);
    }

    pub fn receive_stopped(&self) -> bool {
        self.read(fifo::FLOW_CTRL_CONFIG) & flowctrl::RECEIVE_STOP != 0
    }
}

// The pointer addresses device registers owned by exactly one channel.
unsafe impl Send for RegisterBlock {}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn fake_block() -> (Box<[u32; BLOCK_STRIDE / 4]>, RegisterBlock) {
        let mut words = Box::new([0u32; BLOCK_STRIDE / 4]);
        let regs = unsafe { RegisterBlock::new(words.as_mut_ptr()) };
        (words, regs)
    }

    #[test]
    fn depth_word_halves() {
        let (_mem, regs) = fake_block();
        regs.set_fill_depth(0x100).unwrap();
        assert_eq!(regs.fill_depth(), 0x100);
        assert_eq!(regs.fill_filled(), 0);
        // Low half untouched by the verified high-half write
        regs.set_fill_depth(0x200).unwrap();
        assert_eq!(regs.fill_depth(), 0x200);
    }

    #[test]
    fn pointer_words_round_trip() {
        let (_mem, regs) = fake_block();
        regs.set_fill_wr(0x1FF).unwrap();
        regs.set_done_rd(0x80).unwrap();
        assert_eq!(regs.fill_wr(), 0x1FF);
        assert_eq!(regs.done_rd(), 0x80);
        assert!(!regs.fill_full());
    }

    #[test]
    fn base_addresses_split_across_words() {
        let (_mem, regs) = fake_block();
        regs.set_done_base(0x0000_0012_3456_7890);
        assert_eq!(regs.done_base(), 0x0000_0012_3456_7890);
    }

    #[test]
    fn status_maps_to_clear() {
        let status = IntStatus::ENTER_FLOW_CTRL | IntStatus::DONE_DELIVERED;
        let clear = status.to_clear();
        assert_eq!(clear, IntClear::ENTER_FLOW_CTRL | IntClear::DONE_DELIVERED);
    }

    #[test]
    fn receive_stop_preserves_mode() {
        let (_mem, regs) = fake_block();
        regs.set_flow_mode(0x2);
        regs.set_receive_stop(true);
        assert!(regs.receive_stopped());
        regs.set_flow_mode(0x1);
        assert!(regs.receive_stopped());
        regs.set_receive_stop(false);
        assert!(!regs.receive_stopped());
    }
}
