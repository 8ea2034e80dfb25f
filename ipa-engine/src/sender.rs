//! Transmit pump: credit-counted sends and completion reclamation.
//!
//! A frame is sent fire-and-forget: copy into a pool buffer, hand the
//! buffer to the hardware through the fill ring, return. Completions come
//! back on the done ring and are reclaimed in batches by
//! [`PacketSender::reclaim_completed`], which is also the only place
//! credits are returned. The credit counter starts at ring depth, so send
//! can never find the fill ring full; it reports [`EngineError::WouldBlock`]
//! before touching the ring.

use alloc::vec;
use alloc::vec::Vec;

use ipa_dma::BufferPool;
use ipa_hal::{NodeDescriptor, RingChannel};
use log::{debug, warn};

use crate::error::{EngineError, Result};
use crate::event::{NicEvent, NicId};

/// Per-frame addressing carried into the descriptor.
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    pub nic: NicId,
    pub src: u8,
    pub dst: u8,
    pub net_id: u8,
    pub prio: u8,
    pub bearer_id: u8,
    pub intr: bool,
}

#[derive(Debug)]
struct InFlight {
    bus_addr: u64,
    buf: u16,
    nic: NicId,
}

/// Running totals, readable for diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct SenderStats {
    pub sent: u64,
    pub completed: u64,
    pub no_credit: u64,
    pub unmatched: u64,
    pub hw_errors: u64,
    /// Reclaim bursts close to ring depth.
    pub reclaim_danger: u64,
}

pub struct PacketSender {
    channel: RingChannel,
    pool: BufferPool,
    credits: u16,
    in_flight: Vec<InFlight>,
    /// Nics refused since the last exit notification.
    blocked: Vec<NicId>,
    stats: SenderStats,
}

impl PacketSender {
    /// Take ownership of an open channel; credits start at ring depth.
    pub fn new(channel: RingChannel, pool: BufferPool) -> Result<Self> {
        if !channel.is_open() {
            return Err(EngineError::Hal(ipa_hal::HalError::ChannelClosed));
        }
        let credits = channel.depth();
        let depth = channel.depth() as usize;
        Ok(Self {
            channel,
            pool,
            credits,
            in_flight: Vec::with_capacity(depth),
            blocked: Vec::new(),
            stats: SenderStats::default(),
        })
    }

    pub fn credits(&self) -> u16 {
        self.credits
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    pub(crate) fn channel_mut(&mut self) -> &mut RingChannel {
        &mut self.channel
    }

    /// Queue one frame for transmission. Never waits.
    pub fn send(&mut self, meta: FrameMeta, frame: &[u8]) -> Result<()> {
        if frame.len() > self.pool.buffer_size() {
            return Err(EngineError::FrameTooLong);
        }
        if self.credits == 0 {
            self.stats.no_credit += 1;
            if !self.blocked.contains(&meta.nic) {
                self.blocked.push(meta.nic);
            }
            return Err(EngineError::WouldBlock);
        }

        let idx = self.pool.alloc()?;
        let buf = self.pool.get_mut(idx)?;
        buf.as_mut_slice()[..frame.len()].copy_from_slice(frame);
        buf.trim(frame.len());
        let bus_addr = buf.bus_addr();

        let node = NodeDescriptor {
            address: bus_addr,
            length: frame.len() as u32,
            offset: 0,
            net_id: meta.net_id,
            src: meta.src,
            dst: meta.dst,
            prio: meta.prio,
            bearer_id: meta.bearer_id,
            intr: meta.intr,
            ..Default::default()
        };

        unsafe { buf.mark_device_owned() };
        let accepted = match self.channel.publish(&[node]) {
            Ok(n) => n,
            Err(e) => {
                self.rollback(idx);
                return Err(e.into());
            }
        };
        if accepted == 0 {
            // Credits say there is room, so this is a pointer-state problem
            self.rollback(idx);
            return Err(EngineError::WouldBlock);
        }

        self.credits -= 1;
        self.in_flight.push(InFlight {
            bus_addr,
            buf: idx,
            nic: meta.nic,
        });
        self.stats.sent += 1;
        Ok(())
    }

    fn rollback(&mut self, idx: u16) {
        if let Ok(buf) = self.pool.get_mut(idx) {
            unsafe { buf.mark_driver_owned() };
        }
        let _ = self.pool.free(idx);
    }

    /// Harvest transmit completions, free their buffers and return credits.
    ///
    /// Returns the number of reclaimed frames plus the nic events this pass
    /// produced (per-nic completion counts, and flow-control exit once
    /// credits recover past a quarter of the ring for nics that were
    /// refused).
    pub fn reclaim_completed(&mut self) -> Result<(usize, Vec<NicEvent>)> {
        let depth = self.channel.depth();
        let mut out = vec![NodeDescriptor::default(); depth as usize];
        let n = self.channel.harvest(&mut out)?;
        if n as u16 > depth - depth / 4 {
            warn!("reclaim burst of {} on a {}-deep ring", n, depth);
            self.stats.reclaim_danger += 1;
        }
        let mut events = Vec::new();
        let mut completed = 0u16;

        for node in &out[..n] {
            if !node.is_ok() {
                self.stats.hw_errors += 1;
                warn!("tx completion error {} at {:#x}", node.err_code, node.address);
            }
            let Some(pos) = self
                .in_flight
                .iter()
                .position(|f| f.bus_addr == node.address)
            else {
                self.stats.unmatched += 1;
                warn!("tx completion for unknown buffer {:#x}", node.address);
                continue;
            };
            let flight = self.in_flight.swap_remove(pos);
            let buf = self.pool.get_mut(flight.buf)?;
            unsafe { buf.mark_driver_owned() };
            self.pool.free(flight.buf)?;
            completed += 1;
            let pos = events
                .iter()
                .position(|e| matches!(e, NicEvent::TxDone { nic, .. } if *nic == flight.nic));
            if let Some(pos) = pos {
                if let NicEvent::TxDone { count, .. } = &mut events[pos] {
                    *count += 1;
                }
            } else {
                events.push(NicEvent::TxDone {
                    nic: flight.nic,
                    count: 1,
                });
            }
        }

        self.credits += completed;
        self.stats.completed += completed as u64;

        if !self.blocked.is_empty() && self.credits > self.channel.depth() / 4 {
            debug!("credits recovered, notifying {} blocked nics", self.blocked.len());
            for nic in self.blocked.drain(..) {
                events.push(NicEvent::FlowCtrlExit { nic });
            }
        }

        Ok((completed as usize, events))
    }

    /// All-or-nothing suspend gate: nothing staged, nothing in flight, and
    /// the hardware has consumed and completed every published element (all
    /// four ring pointers equal).
    pub fn prepare_suspend(&mut self) -> Result<()> {
        let p = self.channel.pointers()?;
        if !self.in_flight.is_empty() {
            return Err(EngineError::Busy);
        }
        // All four pointers equal: every published element was consumed and
        // its completion reclaimed
        if p.fill_wr != p.fill_rd || p.fill_wr != p.done_wr || p.done_wr != p.done_rd {
            return Err(EngineError::Busy);
        }
        Ok(())
    }

    /// Nothing to re-arm on the send side; kept for resume ordering.
    pub fn prepare_resume(&mut self) {}
}
