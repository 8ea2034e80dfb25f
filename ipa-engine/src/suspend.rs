//! Suspend/resume orchestration as an explicit state machine.
//!
//! ```text
//! ACTIVE ──prepare_suspend──► DRAINING ──ok──► QUIESCED ──backup──► BACKED_UP
//!    ▲                            │
//!    └────────── busy ────────────┘                 (power may be lost)
//!
//! BACKED_UP ──restore──► RESTORED ──resume──► ACTIVE
//! ```
//!
//! `prepare_suspend` is all-or-nothing: if either pump still has work in
//! flight the whole attempt aborts and the coordinator returns to ACTIVE
//! with nothing half-drained. Resume re-enables hardware delivery strictly
//! last, after ring contents, registers and the software pumps are back.

use ipa_hal::ChannelBackup;
use log::{debug, warn};

use crate::error::{EngineError, Result};
use crate::receiver::PacketReceiver;
use crate::sender::PacketSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendState {
    Active,
    Draining,
    Quiesced,
    BackedUp,
    Restored,
}

#[derive(Debug, Default)]
pub struct SuspendCoordinator {
    state: SuspendStateField,
    sender_backup: Option<ChannelBackup>,
    receiver_backup: Option<ChannelBackup>,
    failed_attempts: u64,
}

// Default to Active without an impl Default for the public enum
#[derive(Debug)]
struct SuspendStateField(SuspendState);

impl Default for SuspendStateField {
    fn default() -> Self {
        Self(SuspendState::Active)
    }
}

impl SuspendCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SuspendState {
        self.state.0
    }

    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts
    }

    fn require(&self, expected: SuspendState) -> Result<()> {
        if self.state.0 != expected {
            return Err(EngineError::BadState(self.state.0));
        }
        Ok(())
    }

    /// Drain both pumps. Any refusal aborts the whole attempt.
    pub fn prepare_suspend(
        &mut self,
        sender: &mut PacketSender,
        receiver: &mut PacketReceiver,
    ) -> Result<()> {
        self.require(SuspendState::Active)?;
        self.state.0 = SuspendState::Draining;

        let outcome = sender
            .prepare_suspend()
            .and_then(|()| receiver.prepare_suspend());
        match outcome {
            Ok(()) => {
                self.state.0 = SuspendState::Quiesced;
                Ok(())
            }
            Err(e) => {
                self.state.0 = SuspendState::Active;
                self.failed_attempts += 1;
                debug!("suspend aborted, attempt {}: {}", self.failed_attempts, e);
                Err(e)
            }
        }
    }

    /// Snapshot rings living in on-chip memory; power may be lost after.
    pub fn backup(
        &mut self,
        sender: &mut PacketSender,
        receiver: &mut PacketReceiver,
    ) -> Result<()> {
        self.require(SuspendState::Quiesced)?;
        self.sender_backup = if sender.channel_mut().on_chip() {
            Some(sender.channel_mut().backup()?)
        } else {
            None
        };
        self.receiver_backup = if receiver.channel_mut().on_chip() {
            Some(receiver.channel_mut().backup()?)
        } else {
            None
        };
        self.state.0 = SuspendState::BackedUp;
        Ok(())
    }

    /// Bring ring contents, pointers and register config back.
    pub fn restore(
        &mut self,
        sender: &mut PacketSender,
        receiver: &mut PacketReceiver,
    ) -> Result<()> {
        self.require(SuspendState::BackedUp)?;

        let replayed = sender.channel_mut().replay_open_if_needed()?;
        if replayed {
            warn!("send channel lost register state, replayed open");
        }
        if let Some(b) = &self.sender_backup {
            sender.channel_mut().restore(b)?;
        }

        let replayed = receiver.channel_mut().replay_open_if_needed()?;
        if replayed {
            warn!("recv channel lost register state, replayed open");
        }
        if let Some(b) = &self.receiver_backup {
            receiver.channel_mut().restore(b)?;
        } else if replayed && receiver.fully_stocked() {
            // The fill ring was fully published and never drained; the
            // hardware pointer must say so again
            receiver.channel_mut().rearm_full_fill()?;
        }

        self.state.0 = SuspendState::Restored;
        Ok(())
    }

    /// Restart the pumps; hardware delivery comes back strictly last.
    pub fn resume(
        &mut self,
        sender: &mut PacketSender,
        receiver: &mut PacketReceiver,
    ) -> Result<()> {
        self.require(SuspendState::Restored)?;
        sender.prepare_resume();
        receiver.prepare_resume()?;
        self.sender_backup = None;
        self.receiver_backup = None;
        self.state.0 = SuspendState::Active;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NicId;
    use crate::sender::FrameMeta;
    use crate::testutil::FakeHw;
    use ipa_dma::BufferPool;
    use ipa_hal::RingChannel;

    fn meta() -> FrameMeta {
        FrameMeta {
            nic: NicId(0),
            src: 3,
            dst: 1,
            net_id: 0,
            prio: 0,
            bearer_id: 0,
            intr: false,
        }
    }

    fn pumps(on_chip: bool) -> (FakeHw, FakeHw, PacketSender, PacketReceiver) {
        let (tx_hw, tx_ch, tx_pool): (FakeHw, RingChannel, BufferPool) =
            FakeHw::new_opts(16, 16, 1600, on_chip);
        let (rx_hw, rx_ch, rx_pool) = FakeHw::new_opts(16, 16, 1600, on_chip);
        let sender = PacketSender::new(tx_ch, tx_pool).unwrap();
        let receiver = PacketReceiver::new(rx_ch, rx_pool, 5, 19).unwrap();
        (tx_hw, rx_hw, sender, receiver)
    }

    #[test]
    fn blocked_until_in_flight_drains() {
        let (mut tx_hw, _rx_hw, mut sender, mut receiver) = pumps(true);
        let mut coord = SuspendCoordinator::new();

        sender.send(meta(), &[0; 32]).unwrap();
        let err = coord.prepare_suspend(&mut sender, &mut receiver);
        assert_eq!(err, Err(EngineError::Busy));
        // A failed attempt leaves everything running
        assert_eq!(coord.state(), SuspendState::Active);
        assert_eq!(coord.failed_attempts(), 1);
        sender.send(meta(), &[0; 32]).unwrap();

        tx_hw.complete_sent(2, 0);
        sender.reclaim_completed().unwrap();
        coord.prepare_suspend(&mut sender, &mut receiver).unwrap();
        assert_eq!(coord.state(), SuspendState::Quiesced);
    }

    #[test]
    fn out_of_order_calls_rejected() {
        let (_tx_hw, _rx_hw, mut sender, mut receiver) = pumps(true);
        let mut coord = SuspendCoordinator::new();
        assert_eq!(
            coord.backup(&mut sender, &mut receiver),
            Err(EngineError::BadState(SuspendState::Active))
        );
        assert_eq!(
            coord.resume(&mut sender, &mut receiver),
            Err(EngineError::BadState(SuspendState::Active))
        );
        coord.prepare_suspend(&mut sender, &mut receiver).unwrap();
        assert_eq!(
            coord.prepare_suspend(&mut sender, &mut receiver),
            Err(EngineError::BadState(SuspendState::Quiesced))
        );
    }

    #[test]
    fn full_cycle_with_on_chip_backup() {
        let (_tx_hw, mut rx_hw, mut sender, mut receiver) = pumps(true);
        let mut coord = SuspendCoordinator::new();
        receiver.prefill().unwrap();

        let before = receiver.channel_mut().pointers().unwrap();
        coord.prepare_suspend(&mut sender, &mut receiver).unwrap();
        coord.backup(&mut sender, &mut receiver).unwrap();

        // Power collapse wipes the register blocks
        rx_hw.power_collapse();

        coord.restore(&mut sender, &mut receiver).unwrap();
        assert_eq!(receiver.channel_mut().pointers().unwrap(), before);
        // The fully stocked fill ring still shows the wrap bit
        assert_eq!(before.fill_wr, 16);

        coord.resume(&mut sender, &mut receiver).unwrap();
        assert_eq!(coord.state(), SuspendState::Active);
        assert!(!receiver.channel_mut().regs().receive_stopped());
    }

    #[test]
    fn rearm_without_backup_after_power_loss() {
        let (_tx_hw, mut rx_hw, mut sender, mut receiver) = pumps(false);
        let mut coord = SuspendCoordinator::new();
        receiver.prefill().unwrap();

        coord.prepare_suspend(&mut sender, &mut receiver).unwrap();
        coord.backup(&mut sender, &mut receiver).unwrap();
        rx_hw.power_collapse();
        coord.restore(&mut sender, &mut receiver).unwrap();

        // No snapshot existed, so the replayed channel was re-armed full
        let p = receiver.channel_mut().pointers().unwrap();
        assert_eq!(p.fill_wr, 16);
        coord.resume(&mut sender, &mut receiver).unwrap();
    }
}
