//! Packet engine for the IPA accelerator's data plane.
//!
//! [`IpaEngine`] wires the four moving parts together:
//!
//! - [`sender::PacketSender`]: credit-counted transmit over one channel;
//! - [`receiver::PacketReceiver`]: buffer-stocked receive over another;
//! - [`nic::NicMultiplexer`]: logical interfaces sharing both;
//! - [`suspend::SuspendCoordinator`]: drain, snapshot and restart across
//!   power collapse.
//!
//! The engine never blocks: send refuses with `WouldBlock` under
//! backpressure, receive reports `NoData`, a deferred power grant surfaces
//! as `Retry`, and [`IpaEngine::process`] is the single pump an interrupt
//! bottom half or poll loop drives.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod event;
pub mod nic;
pub mod receiver;
pub mod resource;
pub mod sender;
pub mod suspend;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{EngineError, Result};
pub use event::{NicEvent, NicId};
pub use nic::{NicMultiplexer, NicStats, RouteEntry};
pub use receiver::{PacketReceiver, ReceiverStats, RxSink, RECV_BUF_LEN, REFILL_BATCH};
pub use resource::{AlwaysOn, PowerResource, ResourceGrant};
pub use sender::{FrameMeta, PacketSender, SenderStats};
pub use suspend::{SuspendCoordinator, SuspendState};

use alloc::vec::Vec;

/// The assembled data-plane engine.
pub struct IpaEngine<R: PowerResource> {
    sender: PacketSender,
    receiver: PacketReceiver,
    mux: NicMultiplexer,
    resource: R,
    resource_held: bool,
    suspend: SuspendCoordinator,
}

impl<R: PowerResource> IpaEngine<R> {
    pub fn new(
        sender: PacketSender,
        receiver: PacketReceiver,
        mux: NicMultiplexer,
        resource: R,
    ) -> Self {
        Self {
            sender,
            receiver,
            mux,
            resource,
            resource_held: false,
            suspend: SuspendCoordinator::new(),
        }
    }

    /// Stock the receive ring; call once before traffic.
    pub fn start(&mut self) -> Result<()> {
        self.receiver.prefill()?;
        Ok(())
    }

    pub fn open_nic(&mut self, send_terminus: u8, net_id: Option<u8>) -> Result<NicId> {
        self.mux.open(send_terminus, net_id)
    }

    pub fn close_nic(&mut self, id: NicId) -> Result<()> {
        self.mux.close(id)
    }

    /// Send one frame on a nic. Never waits: backpressure is `WouldBlock`,
    /// a deferred power grant is `Retry` ("call back later").
    pub fn send(&mut self, id: NicId, prio: u8, frame: &[u8]) -> Result<()> {
        let state = self.suspend.state();
        if state != SuspendState::Active {
            return Err(EngineError::BadState(state));
        }
        if !self.resource_held {
            match self.resource.request() {
                ResourceGrant::Granted => self.resource_held = true,
                ResourceGrant::Pending => return Err(EngineError::Retry),
            }
        }
        let meta = self.mux.frame_meta(id, prio)?;
        match self.sender.send(meta, frame) {
            Ok(()) => {
                self.mux.note_sent(id);
                Ok(())
            }
            Err(EngineError::WouldBlock) => {
                self.mux.note_would_block(id);
                Err(EngineError::WouldBlock)
            }
            Err(e) => Err(e),
        }
    }

    pub fn try_receive(&mut self, id: NicId) -> Result<Vec<u8>> {
        self.mux.try_receive(id)
    }

    pub fn has_data(&self, id: NicId) -> Result<bool> {
        self.mux.has_data(id)
    }

    pub fn poll_event(&self) -> Option<NicEvent> {
        self.mux.poll_event()
    }

    pub fn nic_stats(&self, id: NicId) -> Result<NicStats> {
        self.mux.stats(id)
    }

    pub fn sender_stats(&self) -> SenderStats {
        self.sender.stats()
    }

    pub fn receiver_stats(&self) -> ReceiverStats {
        self.receiver.stats()
    }

    /// One pump pass: reclaim transmit completions, harvest and dispatch
    /// received frames, repay refill debt, and drop the power hold once
    /// nothing is in flight.
    pub fn process(&mut self) -> Result<()> {
        // Flow transitions and overflow are counted by the monitor
        let _ = self.receiver.service_flow();
        let (_, events) = self.sender.reclaim_completed()?;
        self.mux.absorb(events);
        self.receiver.harvest_and_dispatch(&mut self.mux)?;
        self.receiver.refill_if_due()?;
        if self.resource_held && self.sender.in_flight_len() == 0 {
            self.resource.release();
            self.resource_held = false;
        }
        Ok(())
    }

    pub fn suspend_state(&self) -> SuspendState {
        self.suspend.state()
    }

    pub fn prepare_suspend(&mut self) -> Result<()> {
        self.suspend
            .prepare_suspend(&mut self.sender, &mut self.receiver)
    }

    pub fn backup(&mut self) -> Result<()> {
        self.suspend.backup(&mut self.sender, &mut self.receiver)
    }

    pub fn restore(&mut self) -> Result<()> {
        self.suspend.restore(&mut self.sender, &mut self.receiver)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.suspend.resume(&mut self.sender, &mut self.receiver)
    }
}
