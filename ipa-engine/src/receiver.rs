//! Receive pump: buffer pre-fill, harvest, dispatch and batched refill.
//!
//! The receiver keeps the fill ring stocked with free buffers. The hardware
//! fills them in the order they were published, so the receiver tracks the
//! published buffer indices in a queue and expects completions to come back
//! in exactly that order; anything else is a skip with a counter, never a
//! crash. Consumed buffers are owed back to the ring as refill debt, repaid
//! in batches once the debt passes [`REFILL_BATCH`].

use alloc::collections::VecDeque;
use alloc::vec;

use ipa_dma::BufferPool;
use ipa_hal::{FlowControlMonitor, FlowEvents, FlowMode, NodeDescriptor, Ring, RingChannel, Watermarks};
use log::{debug, warn};

use crate::error::{EngineError, Result};

/// Receive buffer payload size in bytes.
pub const RECV_BUF_LEN: usize = 1600;

/// Refill debt threshold before a batch is republished.
pub const REFILL_BATCH: usize = 0x30;

/// Where harvested frames go. Returns false if no consumer claimed the
/// frame, in which case the receiver drops it and counts the miss.
pub trait RxSink {
    fn deliver(&mut self, node: &NodeDescriptor, payload: &[u8]) -> bool;
}

/// Running totals, readable for diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReceiverStats {
    pub received: u64,
    pub dropped_no_route: u64,
    pub null_addr: u64,
    pub addr_mismatch: u64,
    pub hw_errors: u64,
    /// Harvest bursts close to ring depth.
    pub harvest_danger: u64,
    /// Refill bursts close to ring depth.
    pub refill_danger: u64,
}

pub struct PacketReceiver {
    channel: RingChannel,
    pool: BufferPool,
    /// Buffer indices in published order; completions return in this order.
    expected: VecDeque<u16>,
    refill_debt: usize,
    /// Terms stamped on published fill elements.
    fill_src: u8,
    fill_dst: u8,
    flow: FlowControlMonitor,
    stats: ReceiverStats,
}

impl PacketReceiver {
    /// Take ownership of an open channel and program its watermarks: enter
    /// flow control at a quarter full, leave at half.
    pub fn new(channel: RingChannel, pool: BufferPool, fill_src: u8, fill_dst: u8) -> Result<Self> {
        if !channel.is_open() {
            return Err(EngineError::Hal(ipa_hal::HalError::ChannelClosed));
        }
        let depth = channel.depth();
        let mut flow = FlowControlMonitor::new();
        flow.configure(
            channel.regs(),
            FlowMode::EntryAndExit,
            Watermarks::for_depth(depth),
        );
        Ok(Self {
            channel,
            pool,
            expected: VecDeque::with_capacity(depth as usize),
            refill_debt: 0,
            fill_src,
            fill_dst,
            flow,
            stats: ReceiverStats::default(),
        })
    }

    /// Decode and acknowledge pending channel interrupts.
    pub fn service_flow(&mut self) -> FlowEvents {
        self.flow.service(self.channel.regs())
    }

    pub fn flow(&self) -> &FlowControlMonitor {
        &self.flow
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn refill_debt(&self) -> usize {
        self.refill_debt
    }

    pub(crate) fn channel_mut(&mut self) -> &mut RingChannel {
        &mut self.channel
    }

    /// Bus address the next completion should carry.
    #[cfg(test)]
    pub(crate) fn next_expected_bus_addr(&self) -> Option<u64> {
        let idx = *self.expected.front()?;
        Some(self.pool.get(idx).ok()?.bus_addr())
    }

    /// True when every ring slot has a published buffer behind it.
    pub(crate) fn fully_stocked(&self) -> bool {
        self.expected.len() == self.channel.depth() as usize
    }

    /// Stock the fill ring with `depth` free buffers before first use.
    pub fn prefill(&mut self) -> Result<usize> {
        let depth = self.channel.depth() as usize;
        self.publish_buffers(depth)
    }

    fn publish_buffers(&mut self, count: usize) -> Result<usize> {
        let mut nodes = vec![NodeDescriptor::default(); count];
        let mut indices = vec![0u16; count];
        for i in 0..count {
            let idx = match self.pool.alloc() {
                Ok(idx) => idx,
                Err(e) => {
                    // Return the buffers already taken before bailing out
                    self.release_unpublished(&indices[..i])?;
                    return Err(e.into());
                }
            };
            let buf = self.pool.get_mut(idx)?;
            nodes[i] = NodeDescriptor {
                address: buf.bus_addr(),
                src: self.fill_src,
                dst: self.fill_dst,
                ..Default::default()
            };
            unsafe { buf.mark_device_owned() };
            indices[i] = idx;
        }
        let published = match self.channel.publish(&nodes) {
            Ok(n) => n,
            Err(e) => {
                self.release_unpublished(&indices)?;
                return Err(e.into());
            }
        };
        // Roll back buffers the ring had no room for
        self.release_unpublished(&indices[published..])?;
        self.expected.extend(&indices[..published]);
        Ok(published)
    }

    /// Free buffers that were taken for publication but never made it onto
    /// the ring.
    fn release_unpublished(&mut self, indices: &[u16]) -> Result<()> {
        for &idx in indices {
            let buf = self.pool.get_mut(idx)?;
            unsafe { buf.mark_driver_owned() };
            self.pool.free(idx)?;
        }
        Ok(())
    }

    /// Harvest all completed elements and hand each frame to `sink`.
    /// Consumed buffers become refill debt.
    pub fn harvest_and_dispatch(&mut self, sink: &mut dyn RxSink) -> Result<usize> {
        let depth = self.channel.depth();
        let mut out = vec![NodeDescriptor::default(); depth as usize];
        let n = self.channel.harvest(&mut out)?;
        if n as u16 > depth - depth / 4 {
            warn!("harvest burst of {} on a {}-deep ring", n, depth);
            self.stats.harvest_danger += 1;
        }

        for node in &out[..n] {
            if node.address == 0 {
                self.stats.null_addr += 1;
                continue;
            }
            let Some(idx) = self.expected.pop_front() else {
                self.stats.addr_mismatch += 1;
                warn!("completion {:#x} with no published buffer", node.address);
                continue;
            };
            let buf = self.pool.get_mut(idx)?;
            if buf.bus_addr() != node.address {
                // The ring and our queue disagree; drop the buffer rather
                // than hand out someone else's payload
                self.stats.addr_mismatch += 1;
                warn!(
                    "completion {:#x} does not match published buffer {:#x}",
                    node.address,
                    buf.bus_addr()
                );
                unsafe { buf.mark_driver_owned() };
                self.pool.free(idx)?;
                self.refill_debt += 1;
                continue;
            }

            unsafe { buf.mark_driver_owned() };
            buf.trim(node.length as usize);
            if !node.is_ok() {
                self.stats.hw_errors += 1;
                warn!("rx completion error {} at {:#x}", node.err_code, node.address);
            }
            if sink.deliver(node, buf.as_slice()) {
                self.stats.received += 1;
            } else {
                self.stats.dropped_no_route += 1;
                debug!("no nic for src {} net {}", node.src, node.net_id);
            }
            self.pool.free(idx)?;
            self.refill_debt += 1;
        }
        Ok(n)
    }

    /// Repay refill debt if it passed the batch threshold.
    pub fn refill_if_due(&mut self) -> Result<usize> {
        if self.refill_debt <= REFILL_BATCH {
            return Ok(0);
        }
        self.refill_now()
    }

    /// Repay the whole refill debt immediately.
    pub fn refill_now(&mut self) -> Result<usize> {
        let owed = self.refill_debt;
        if owed == 0 {
            return Ok(0);
        }
        let depth = self.channel.depth() as usize;
        if owed > depth - depth / 4 {
            warn!("refill burst of {} on a {}-deep ring", owed, depth);
            self.stats.refill_danger += 1;
        }
        let published = self.publish_buffers(owed)?;
        self.refill_debt -= published;
        Ok(published)
    }

    /// Suspend gate: nothing harvestable and no refill debt, then stop
    /// hardware delivery.
    pub fn prepare_suspend(&mut self) -> Result<()> {
        self.channel.sync_from_hw()?;
        if self.channel.filled_depth(Ring::Done)? != 0 || self.refill_debt != 0 {
            return Err(EngineError::Busy);
        }
        self.channel.stop_receive(true)?;
        Ok(())
    }

    /// Re-enable hardware delivery.
    pub fn prepare_resume(&mut self) -> Result<()> {
        self.channel.stop_receive(false)?;
        Ok(())
    }
}
