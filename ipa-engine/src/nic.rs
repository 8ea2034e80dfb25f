//! Logical network interfaces multiplexed over the shared channel pair.
//!
//! A route table maps each nic to a destination terminus, an accepted
//! source mask and an optional virtual network id. Received frames are
//! dispatched to the first open nic whose mask contains the frame's source
//! terminus and whose network id matches (a `None` id is a catch-all).
//! Consumers poll a shared event queue instead of registering callbacks.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use ipa_hal::NodeDescriptor;
use log::debug;
use spin::Mutex;

use crate::error::{EngineError, Result};
use crate::event::{NicEvent, NicId};
use crate::receiver::RxSink;
use crate::sender::FrameMeta;

/// Well-known terminus ids (5-bit space).
pub mod terminus {
    pub const USB: u8 = 0x01;
    pub const WIFI: u8 = 0x02;
    pub const CP0: u8 = 0x04;
    pub const CP1: u8 = 0x05;
    pub const AP: u8 = 0x19;
}

/// One row of the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    /// Destination terminus frames sent on this nic are addressed to.
    pub send_terminus: u8,
    /// Bitmask of source termini whose received frames belong to this nic.
    pub src_mask: u32,
    /// Virtual network id; `None` accepts any.
    pub net_id: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NicState {
    Open,
    Closed,
}

/// Per-nic counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NicStats {
    pub sent: u64,
    pub received: u64,
    pub would_block: u64,
}

struct Nic {
    route: RouteEntry,
    state: NicState,
    rx_q: VecDeque<Vec<u8>>,
    flow_blocked: bool,
    stats: NicStats,
}

pub struct NicMultiplexer {
    /// Local terminus stamped as source on outgoing descriptors.
    local_src: u8,
    routes: Vec<RouteEntry>,
    nics: Vec<Nic>,
    events: Mutex<VecDeque<NicEvent>>,
}

impl NicMultiplexer {
    pub fn new(local_src: u8, routes: Vec<RouteEntry>) -> Self {
        Self {
            local_src,
            routes,
            nics: Vec::new(),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Open a nic for the route matching `send_terminus` and `net_id`.
    /// A closed nic with the same route is reused.
    pub fn open(&mut self, send_terminus: u8, net_id: Option<u8>) -> Result<NicId> {
        let route = *self
            .routes
            .iter()
            .find(|r| r.send_terminus == send_terminus && r.net_id == net_id)
            .ok_or(EngineError::NoRoute)?;

        if let Some(pos) = self
            .nics
            .iter()
            .position(|n| n.route == route && n.state == NicState::Closed)
        {
            self.nics[pos].state = NicState::Open;
            return Ok(NicId(pos as u16));
        }

        self.nics.push(Nic {
            route,
            state: NicState::Open,
            rx_q: VecDeque::new(),
            flow_blocked: false,
            stats: NicStats::default(),
        });
        Ok(NicId(self.nics.len() as u16 - 1))
    }

    /// Close a nic, dropping anything still queued for it.
    pub fn close(&mut self, id: NicId) -> Result<()> {
        let nic = self.open_nic_mut(id)?;
        nic.rx_q.clear();
        nic.flow_blocked = false;
        nic.state = NicState::Closed;
        Ok(())
    }

    fn open_nic(&self, id: NicId) -> Result<&Nic> {
        self.nics
            .get(id.0 as usize)
            .filter(|n| n.state == NicState::Open)
            .ok_or(EngineError::BadNic)
    }

    fn open_nic_mut(&mut self, id: NicId) -> Result<&mut Nic> {
        self.nics
            .get_mut(id.0 as usize)
            .filter(|n| n.state == NicState::Open)
            .ok_or(EngineError::BadNic)
    }

    /// Descriptor terms for a frame sent on `id`.
    pub fn frame_meta(&self, id: NicId, prio: u8) -> Result<FrameMeta> {
        let nic = self.open_nic(id)?;
        Ok(FrameMeta {
            nic: id,
            src: self.local_src,
            dst: nic.route.send_terminus,
            net_id: nic.route.net_id.unwrap_or(0),
            prio,
            bearer_id: 0,
            intr: false,
        })
    }

    /// First open nic that claims a frame from `src` on `net_id`.
    pub fn route_rx(&self, src: u8, net_id: u8) -> Option<NicId> {
        self.nics.iter().position(|n| {
            n.state == NicState::Open
                && n.route.src_mask & (1 << src) != 0
                && n.route.net_id.map_or(true, |id| id == net_id)
        })
        .map(|pos| NicId(pos as u16))
    }

    /// Queue a received frame; the first frame on an empty queue raises
    /// [`NicEvent::RxAvailable`].
    pub fn push_rx(&mut self, id: NicId, frame: Vec<u8>) -> Result<()> {
        let nic = self.open_nic_mut(id)?;
        nic.rx_q.push_back(frame);
        nic.stats.received += 1;
        if nic.rx_q.len() == 1 {
            self.push_event(NicEvent::RxAvailable { nic: id });
        }
        Ok(())
    }

    pub fn try_receive(&mut self, id: NicId) -> Result<Vec<u8>> {
        let nic = self.open_nic_mut(id)?;
        nic.rx_q.pop_front().ok_or(EngineError::NoData)
    }

    pub fn has_data(&self, id: NicId) -> Result<bool> {
        Ok(!self.open_nic(id)?.rx_q.is_empty())
    }

    pub fn stats(&self, id: NicId) -> Result<NicStats> {
        Ok(self.open_nic(id)?.stats)
    }

    pub fn is_flow_blocked(&self, id: NicId) -> Result<bool> {
        Ok(self.open_nic(id)?.flow_blocked)
    }

    pub(crate) fn note_sent(&mut self, id: NicId) {
        if let Ok(nic) = self.open_nic_mut(id) {
            nic.stats.sent += 1;
        }
    }

    pub(crate) fn note_would_block(&mut self, id: NicId) {
        if let Ok(nic) = self.open_nic_mut(id) {
            nic.stats.would_block += 1;
            if !nic.flow_blocked {
                nic.flow_blocked = true;
                self.push_event(NicEvent::FlowCtrlEnter { nic: id });
            }
        }
    }

    /// Fold sender events into nic state and the event queue.
    pub(crate) fn absorb(&mut self, events: impl IntoIterator<Item = NicEvent>) {
        for event in events {
            if let NicEvent::FlowCtrlExit { nic } = event {
                if let Ok(n) = self.open_nic_mut(nic) {
                    n.flow_blocked = false;
                }
            }
            self.push_event(event);
        }
    }

    pub fn push_event(&self, event: NicEvent) {
        self.events.lock().push_back(event);
    }

    /// Next pending event, if any.
    pub fn poll_event(&self) -> Option<NicEvent> {
        self.events.lock().pop_front()
    }
}

impl RxSink for NicMultiplexer {
    fn deliver(&mut self, node: &NodeDescriptor, payload: &[u8]) -> bool {
        let Some(id) = self.route_rx(node.src, node.net_id) else {
            debug!("unroutable frame from terminus {}", node.src);
            return false;
        };
        self.push_rx(id, payload.to_vec()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> Vec<RouteEntry> {
        vec![
            RouteEntry {
                send_terminus: terminus::USB,
                src_mask: 1 << terminus::USB,
                net_id: None,
            },
            RouteEntry {
                send_terminus: terminus::CP0,
                src_mask: (1 << terminus::CP0) | (1 << terminus::CP1),
                net_id: Some(3),
            },
        ]
    }

    fn mux() -> NicMultiplexer {
        NicMultiplexer::new(terminus::AP, routes())
    }

    #[test]
    fn open_matches_route_table() {
        let mut m = mux();
        let usb = m.open(terminus::USB, None).unwrap();
        let cp = m.open(terminus::CP0, Some(3)).unwrap();
        assert_ne!(usb, cp);
        assert_eq!(m.open(terminus::WIFI, None), Err(EngineError::NoRoute));
        assert_eq!(m.open(terminus::CP0, Some(9)), Err(EngineError::NoRoute));
    }

    #[test]
    fn close_reuses_slot_and_drains() {
        let mut m = mux();
        let usb = m.open(terminus::USB, None).unwrap();
        m.push_rx(usb, vec![1, 2, 3]).unwrap();
        m.close(usb).unwrap();
        assert_eq!(m.try_receive(usb), Err(EngineError::BadNic));
        let again = m.open(terminus::USB, None).unwrap();
        assert_eq!(again, usb);
        assert_eq!(m.try_receive(again), Err(EngineError::NoData));
    }

    #[test]
    fn frame_meta_uses_route_terms() {
        let mut m = mux();
        let cp = m.open(terminus::CP0, Some(3)).unwrap();
        let meta = m.frame_meta(cp, 2).unwrap();
        assert_eq!(meta.src, terminus::AP);
        assert_eq!(meta.dst, terminus::CP0);
        assert_eq!(meta.net_id, 3);
        assert_eq!(meta.prio, 2);
    }

    #[test]
    fn rx_routing_mask_and_net_id() {
        let mut m = mux();
        let usb = m.open(terminus::USB, None).unwrap();
        let cp = m.open(terminus::CP0, Some(3)).unwrap();
        // The catch-all nic takes any net id from its sources
        assert_eq!(m.route_rx(terminus::USB, 7), Some(usb));
        // Multi-source mask, exact net id
        assert_eq!(m.route_rx(terminus::CP1, 3), Some(cp));
        assert_eq!(m.route_rx(terminus::CP1, 4), None);
        assert_eq!(m.route_rx(terminus::WIFI, 0), None);
    }

    #[test]
    fn rx_available_only_on_first_frame() {
        let mut m = mux();
        let usb = m.open(terminus::USB, None).unwrap();
        m.push_rx(usb, vec![1]).unwrap();
        m.push_rx(usb, vec![2]).unwrap();
        assert_eq!(m.poll_event(), Some(NicEvent::RxAvailable { nic: usb }));
        assert_eq!(m.poll_event(), None);
        assert!(m.has_data(usb).unwrap());
        assert_eq!(m.try_receive(usb).unwrap(), vec![1]);
        assert_eq!(m.try_receive(usb).unwrap(), vec![2]);
        assert_eq!(m.try_receive(usb), Err(EngineError::NoData));
    }

    #[test]
    fn flow_ctrl_enter_exit_events() {
        let mut m = mux();
        let usb = m.open(terminus::USB, None).unwrap();
        m.note_would_block(usb);
        m.note_would_block(usb);
        assert!(m.is_flow_blocked(usb).unwrap());
        assert_eq!(m.poll_event(), Some(NicEvent::FlowCtrlEnter { nic: usb }));
        // Second refusal is not a new transition
        assert_eq!(m.poll_event(), None);

        m.absorb([NicEvent::FlowCtrlExit { nic: usb }]);
        assert!(!m.is_flow_blocked(usb).unwrap());
        assert_eq!(m.poll_event(), Some(NicEvent::FlowCtrlExit { nic: usb }));
    }

    #[test]
    fn sink_delivery_routes_or_drops() {
        let mut m = mux();
        let usb = m.open(terminus::USB, None).unwrap();
        let node = NodeDescriptor {
            src: terminus::USB,
            net_id: 0,
            ..Default::default()
        };
        assert!(m.deliver(&node, b"frame"));
        assert_eq!(m.try_receive(usb).unwrap(), b"frame".to_vec());

        let stray = NodeDescriptor {
            src: terminus::WIFI,
            ..Default::default()
        };
        assert!(!m.deliver(&stray, b"stray"));
    }
}
