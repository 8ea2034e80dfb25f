//! Ring-channel engine over one fill/done ring pair.
//!
//! Both rings use free-running pointers mod `2 * depth` (`PTR_MASK`), so a
//! full ring and an empty ring are distinguishable without wasting a slot:
//! occupancy is `(wr - rd) & PTR_MASK` and never exceeds `depth`. The slot
//! index is `ptr & (depth - 1)`; the bit at `depth` is the wrap bit and is
//! significant state, preserved across pointer save/restore.
//!
//! Software owns the fill-ring write pointer and the done-ring read pointer;
//! hardware advances the other two, which [`RingChannel::sync_from_hw`]
//! mirrors back into the channel.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use ipa_dma::MemoryRegion;

use crate::descriptor::{NodeDescriptor, NODE_SIZE};
use crate::error::{HalError, Result};
use crate::regs::{IntEnable, RegisterBlock};

/// Which ring of the pair an occupancy query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ring {
    Fill,
    Done,
}

/// Everything needed to open a channel, kept for replay on resume.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Elements per ring, power of two in `16..=4096`.
    pub depth: u16,
    /// Fill ring storage, at least `depth * NODE_SIZE` bytes.
    pub fill_region: MemoryRegion,
    /// Done ring storage, same size requirement.
    pub done_region: MemoryRegion,
    /// Interrupt coalescing delay in microseconds.
    pub intr_delay_us: u16,
    /// Interrupt coalescing element threshold.
    pub intr_threshold: u16,
    /// Interrupt sources to enable at open.
    pub int_enable: IntEnable,
    /// Rings live in on-chip SRAM and must be backed up across suspend.
    pub on_chip: bool,
}

/// All four ring pointers, full mod-2*depth values including wrap bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelPointers {
    pub fill_wr: u16,
    pub fill_rd: u16,
    pub done_wr: u16,
    pub done_rd: u16,
}

/// Snapshot of ring contents and pointers for suspend over power collapse.
#[derive(Debug, Clone)]
pub struct ChannelBackup {
    pub pointers: ChannelPointers,
    fill: Vec<u8>,
    done: Vec<u8>,
}

/// One channel: a fill/done ring pair plus its register block.
pub struct RingChannel {
    regs: RegisterBlock,
    cfg: Option<RingConfig>,
    ptr_mask: u16,
    fill_wr: u16,
    fill_rd: u16,
    done_wr: u16,
    done_rd: u16,
}

impl RingChannel {
    /// A closed channel over its register block.
    pub fn new(regs: RegisterBlock) -> Self {
        Self {
            regs,
            cfg: None,
            ptr_mask: 0,
            fill_wr: 0,
            fill_rd: 0,
            done_wr: 0,
            done_rd: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.cfg.is_some()
    }

    pub fn depth(&self) -> u16 {
        self.cfg.as_ref().map_or(0, |c| c.depth)
    }

    pub fn on_chip(&self) -> bool {
        self.cfg.as_ref().map_or(false, |c| c.on_chip)
    }

    pub fn regs(&self) -> &RegisterBlock {
        &self.regs
    }

    fn cfg(&self) -> Result<&RingConfig> {
        self.cfg.as_ref().ok_or(HalError::ChannelClosed)
    }

    #[inline]
    fn occupancy(&self, wr: u16, rd: u16) -> u16 {
        wr.wrapping_sub(rd) & self.ptr_mask
    }

    #[inline]
    fn slot(&self, ptr: u16) -> usize {
        (ptr & (self.ptr_mask >> 1)) as usize
    }

    /// Program the channel and zero all four pointers.
    pub fn open(&mut self, cfg: RingConfig) -> Result<()> {
        if self.cfg.is_some() {
            return Err(HalError::ChannelAlreadyOpen);
        }
        if !cfg.depth.is_power_of_two() || !(16..=4096).contains(&cfg.depth) {
            return Err(HalError::BadDepth);
        }
        let need = cfg.depth as usize * NODE_SIZE;
        if cfg.fill_region.len() < need || cfg.done_region.len() < need {
            return Err(HalError::RegionTooSmall);
        }

        self.program(&cfg)?;
        self.regs.set_fill_wr(0)?;
        self.regs.set_fill_rd(0)?;
        self.regs.set_done_wr(0)?;
        self.regs.set_done_rd(0)?;

        self.ptr_mask = cfg.depth.wrapping_mul(2).wrapping_sub(1);
        self.fill_wr = 0;
        self.fill_rd = 0;
        self.done_wr = 0;
        self.done_rd = 0;
        self.cfg = Some(cfg);
        Ok(())
    }

    fn program(&self, cfg: &RingConfig) -> Result<()> {
        self.regs.set_fill_depth(cfg.depth)?;
        self.regs.set_done_depth(cfg.depth)?;
        self.regs.set_fill_base(cfg.fill_region.bus_addr());
        self.regs.set_done_base(cfg.done_region.bus_addr());
        self.regs.set_int_terms(cfg.intr_delay_us, cfg.intr_threshold);
        self.regs.set_int_enable(cfg.int_enable);
        Ok(())
    }

    /// Clear channel state and pointers. Idempotent.
    pub fn close(&mut self) {
        if self.cfg.take().is_none() {
            return;
        }
        // Best effort on the way down, the block may already be unclocked
        let _ = self.regs.set_fill_wr(0);
        let _ = self.regs.set_fill_rd(0);
        let _ = self.regs.set_done_wr(0);
        let _ = self.regs.set_done_rd(0);
        self.fill_wr = 0;
        self.fill_rd = 0;
        self.done_wr = 0;
        self.done_rd = 0;
        self.ptr_mask = 0;
    }

    /// Refresh the hardware-advanced pointers (fill rd, done wr).
    pub fn sync_from_hw(&mut self) -> Result<()> {
        self.cfg()?;
        let fill_rd = self.regs.fill_rd() & self.ptr_mask;
        let done_wr = self.regs.done_wr() & self.ptr_mask;
        if self.occupancy(self.fill_wr, fill_rd) > self.depth()
            || self.occupancy(done_wr, self.done_rd) > self.depth()
        {
            return Err(HalError::PointerRange);
        }
        self.fill_rd = fill_rd;
        self.done_wr = done_wr;
        Ok(())
    }

    /// Elements currently in the given ring, as of the last
    /// [`sync_from_hw`](Self::sync_from_hw). Callers that need the count to
    /// reflect hardware progress must sync first; `publish`/`harvest` do so
    /// internally.
    pub fn filled_depth(&self, ring: Ring) -> Result<u16> {
        self.cfg()?;
        Ok(match ring {
            Ring::Fill => self.occupancy(self.fill_wr, self.fill_rd),
            Ring::Done => self.occupancy(self.done_wr, self.done_rd),
        })
    }

    /// Room left in the given ring; `filled + free == depth` always. Same
    /// freshness contract as [`filled_depth`](Self::filled_depth).
    pub fn free_depth(&self, ring: Ring) -> Result<u16> {
        Ok(self.depth() - self.filled_depth(ring)?)
    }

    /// Copy up to free-depth elements onto the fill ring and publish the new
    /// write pointer. Returns how many were accepted; 0 when full.
    pub fn publish(&mut self, nodes: &[NodeDescriptor]) -> Result<usize> {
        let cfg = self.cfg()?;
        let base = cfg.fill_region.as_ptr();
        self.sync_from_hw()?;

        let free = self.free_depth(Ring::Fill)? as usize;
        let n = nodes.len().min(free);
        if n == 0 {
            return Ok(0);
        }

        // Per-slot writes handle the wrap split
        for (i, node) in nodes[..n].iter().enumerate() {
            let slot = self.slot(self.fill_wr.wrapping_add(i as u16) & self.ptr_mask);
            unsafe { node.write_to_slot(base, slot) };
        }
        // Slot contents must be visible to the device before the pointer is
        fence(Ordering::Release);
        self.fill_wr = self.fill_wr.wrapping_add(n as u16) & self.ptr_mask;
        self.regs.set_fill_wr(self.fill_wr)?;
        Ok(n)
    }

    /// Copy up to filled-depth elements out of the done ring and publish the
    /// new read pointer. Each element is returned exactly once.
    pub fn harvest(&mut self, out: &mut [NodeDescriptor]) -> Result<usize> {
        let cfg = self.cfg()?;
        let base = cfg.done_region.as_ptr() as *const u8;
        self.sync_from_hw()?;

        let avail = self.filled_depth(Ring::Done)? as usize;
        let n = out.len().min(avail);
        if n == 0 {
            return Ok(0);
        }

        // Order the slot reads after the pointer read that made them visible
        fence(Ordering::Acquire);
        for (i, slot_out) in out[..n].iter_mut().enumerate() {
            let slot = self.slot(self.done_rd.wrapping_add(i as u16) & self.ptr_mask);
            *slot_out = unsafe { NodeDescriptor::read_from_slot(base, slot) };
        }
        self.done_rd = self.done_rd.wrapping_add(n as u16) & self.ptr_mask;
        self.regs.set_done_rd(self.done_rd)?;
        Ok(n)
    }

    /// Peek the `i`-th unharvested done-ring element without consuming it.
    pub fn node_at(&mut self, i: u16) -> Result<Option<NodeDescriptor>> {
        let cfg = self.cfg()?;
        let base = cfg.done_region.as_ptr() as *const u8;
        self.sync_from_hw()?;
        if i >= self.filled_depth(Ring::Done)? {
            return Ok(None);
        }
        fence(Ordering::Acquire);
        let slot = self.slot(self.done_rd.wrapping_add(i) & self.ptr_mask);
        Ok(Some(unsafe { NodeDescriptor::read_from_slot(base, slot) }))
    }

    /// Move every unharvested done-ring element back onto the fill ring, so
    /// in-flight work survives an error recovery. Returns how many moved.
    pub fn reclaim(&mut self) -> Result<usize> {
        self.sync_from_hw()?;
        let pending = self.filled_depth(Ring::Done)? as usize;
        if pending == 0 {
            return Ok(0);
        }
        let mut nodes = vec![NodeDescriptor::default(); pending];
        let n = self.harvest(&mut nodes)?;
        // Fill-ring room is bounded by the same depth, so this cannot drop
        let republished = self.publish(&nodes[..n])?;
        debug_assert_eq!(republished, n);
        Ok(republished)
    }

    /// Current pointer set, wrap bits included.
    pub fn pointers(&mut self) -> Result<ChannelPointers> {
        self.sync_from_hw()?;
        Ok(ChannelPointers {
            fill_wr: self.fill_wr,
            fill_rd: self.fill_rd,
            done_wr: self.done_wr,
            done_rd: self.done_rd,
        })
    }

    /// Restore a pointer set, writing only registers that differ.
    pub fn set_pointers(&mut self, p: ChannelPointers) -> Result<()> {
        self.cfg()?;
        let depth = self.depth();
        if self.occupancy(p.fill_wr, p.fill_rd) > depth
            || self.occupancy(p.done_wr, p.done_rd) > depth
        {
            return Err(HalError::PointerRange);
        }
        if self.regs.fill_wr() != p.fill_wr {
            self.regs.set_fill_wr(p.fill_wr)?;
        }
        if self.regs.fill_rd() != p.fill_rd {
            self.regs.set_fill_rd(p.fill_rd)?;
        }
        if self.regs.done_wr() != p.done_wr {
            self.regs.set_done_wr(p.done_wr)?;
        }
        if self.regs.done_rd() != p.done_rd {
            self.regs.set_done_rd(p.done_rd)?;
        }
        self.fill_wr = p.fill_wr;
        self.fill_rd = p.fill_rd;
        self.done_wr = p.done_wr;
        self.done_rd = p.done_rd;
        Ok(())
    }

    /// Snapshot ring contents and pointers ahead of power collapse.
    pub fn backup(&mut self) -> Result<ChannelBackup> {
        let pointers = self.pointers()?;
        let cfg = self.cfg()?;
        let len = cfg.depth as usize * NODE_SIZE;
        let mut fill = vec![0u8; len];
        let mut done = vec![0u8; len];
        unsafe {
            core::ptr::copy_nonoverlapping(cfg.fill_region.as_ptr(), fill.as_mut_ptr(), len);
            core::ptr::copy_nonoverlapping(cfg.done_region.as_ptr(), done.as_mut_ptr(), len);
        }
        Ok(ChannelBackup { pointers, fill, done })
    }

    /// Write a snapshot back into ring memory and restore the pointers.
    pub fn restore(&mut self, backup: &ChannelBackup) -> Result<()> {
        let cfg = self.cfg()?;
        let len = cfg.depth as usize * NODE_SIZE;
        if backup.fill.len() != len || backup.done.len() != len {
            return Err(HalError::RegionTooSmall);
        }
        unsafe {
            core::ptr::copy_nonoverlapping(backup.fill.as_ptr(), cfg.fill_region.as_ptr(), len);
            core::ptr::copy_nonoverlapping(backup.done.as_ptr(), cfg.done_region.as_ptr(), len);
        }
        fence(Ordering::Release);
        self.set_pointers(backup.pointers)
    }

    /// Re-program the block from the saved open parameters if the hardware
    /// lost them (depth register reads zero after power collapse).
    pub fn replay_open_if_needed(&mut self) -> Result<bool> {
        let cfg = self.cfg()?.clone();
        if self.regs.fill_depth() != 0 {
            return Ok(false);
        }
        self.program(&cfg)?;
        Ok(true)
    }

    /// Re-arm a never-drained fill ring after resume: the hardware write
    /// pointer is set to `depth`, i.e. a completely full ring with the wrap
    /// bit set.
    pub fn rearm_full_fill(&mut self) -> Result<()> {
        let depth = self.cfg()?.depth;
        self.regs.set_fill_wr_init(depth);
        self.fill_wr = depth & self.ptr_mask;
        Ok(())
    }

    /// Stop or resume hardware delivery into the done ring.
    pub fn stop_receive(&mut self, stop: bool) -> Result<()> {
        self.cfg()?;
        self.regs.set_receive_stop(stop);
        Ok(())
    }
}
