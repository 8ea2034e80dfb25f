//! Watermark flow control and interrupt decode for one channel.

use bitflags::bitflags;
use log::warn;

use crate::regs::{IntEnable, IntStatus, RegisterBlock};

/// Which watermark crossings raise flow-control interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Disabled,
    ExitOnly,
    EntryOnly,
    EntryAndExit,
}

impl FlowMode {
    fn config_bits(self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::ExitOnly => 1,
            Self::EntryOnly => 2,
            Self::EntryAndExit => 3,
        }
    }

    fn irq_bits(self) -> IntEnable {
        match self {
            Self::Disabled => IntEnable::empty(),
            Self::ExitOnly => IntEnable::EXIT_FLOW_CTRL,
            Self::EntryOnly => IntEnable::ENTER_FLOW_CTRL,
            Self::EntryAndExit => IntEnable::ENTER_FLOW_CTRL | IntEnable::EXIT_FLOW_CTRL,
        }
    }
}

/// Watermarks in ring elements. Entry fires when occupancy rises past
/// `entry`, exit when it falls past `exit`; `exit < entry` or the channel
/// oscillates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    pub done_exit: u16,
    pub done_entry: u16,
    pub fill_exit: u16,
    pub fill_entry: u16,
}

impl Watermarks {
    /// The usual shape: enter at a quarter full, leave at half.
    pub fn for_depth(depth: u16) -> Self {
        Self {
            done_exit: depth / 2,
            done_entry: depth / 4,
            fill_exit: depth / 2,
            fill_entry: depth / 4,
        }
    }
}

bitflags! {
    /// Decoded interrupt causes from one service pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlowEvents: u16 {
        const ENTER_FLOW_CTRL = 1 << 0;
        const EXIT_FLOW_CTRL  = 1 << 1;
        const DONE_DELIVERED  = 1 << 2;
        const DONE_OVERFLOW   = 1 << 3;
        const FILL_EMPTY      = 1 << 4;
        const DELAY_TIMER     = 1 << 5;
        const THRESHOLD       = 1 << 6;
        const ERR_CODE        = 1 << 7;
        const DROP_PACKET     = 1 << 8;
    }
}

/// Per-channel flow-control state and transition counters.
#[derive(Debug, Default)]
pub struct FlowControlMonitor {
    in_flow_ctrl: bool,
    enter_count: u64,
    exit_count: u64,
    overflow_count: u64,
}

impl FlowControlMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program watermarks and mode. Exit levels are written before entry
    /// levels so the hardware never observes `exit > entry` mid-update, and
    /// the mode word goes last.
    pub fn configure(&mut self, regs: &RegisterBlock, mode: FlowMode, wm: Watermarks) {
        regs.set_done_watermarks(wm.done_exit, wm.done_entry);
        regs.set_fill_watermarks(wm.fill_exit, wm.fill_entry);
        regs.set_int_enable(regs.int_enable() | mode.irq_bits());
        regs.set_flow_mode(mode.config_bits());
    }

    /// Read and acknowledge pending interrupt causes, returning them as a
    /// typed event set and tracking flow-control transitions.
    pub fn service(&mut self, regs: &RegisterBlock) -> FlowEvents {
        let status = regs.int_status();
        if status.is_empty() {
            return FlowEvents::empty();
        }
        regs.int_clear(status.to_clear());

        let mut events = FlowEvents::empty();
        if status.contains(IntStatus::ENTER_FLOW_CTRL) {
            events |= FlowEvents::ENTER_FLOW_CTRL;
            if !self.in_flow_ctrl {
                self.in_flow_ctrl = true;
                self.enter_count += 1;
            }
        }
        if status.contains(IntStatus::EXIT_FLOW_CTRL) {
            events |= FlowEvents::EXIT_FLOW_CTRL;
            if self.in_flow_ctrl {
                self.in_flow_ctrl = false;
                self.exit_count += 1;
            }
        }
        if status.contains(IntStatus::DONE_DELIVERED) {
            events |= FlowEvents::DONE_DELIVERED;
        }
        if status.contains(IntStatus::DONE_OVERFLOW) {
            self.overflow_count += 1;
            warn!("done ring overflow, total {}", self.overflow_count);
            events |= FlowEvents::DONE_OVERFLOW;
        }
        if status.contains(IntStatus::FILL_EMPTY) {
            events |= FlowEvents::FILL_EMPTY;
        }
        if status.contains(IntStatus::DELAY_TIMER) {
            events |= FlowEvents::DELAY_TIMER;
        }
        if status.contains(IntStatus::THRESHOLD) {
            events |= FlowEvents::THRESHOLD;
        }
        if status.contains(IntStatus::ERR_CODE) {
            events |= FlowEvents::ERR_CODE;
        }
        if status.contains(IntStatus::DROP_PACKET) {
            events |= FlowEvents::DROP_PACKET;
        }
        events
    }

    pub fn in_flow_ctrl(&self) -> bool {
        self.in_flow_ctrl
    }

    pub fn enter_count(&self) -> u64 {
        self.enter_count
    }

    pub fn exit_count(&self) -> u64 {
        self.exit_count
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{fifo, RegisterBlock, BLOCK_STRIDE};

    fn fake_block() -> (Box<[u32; BLOCK_STRIDE / 4]>, RegisterBlock) {
        let mut words = Box::new([0u32; BLOCK_STRIDE / 4]);
        let regs = unsafe { RegisterBlock::new(words.as_mut_ptr()) };
        (words, regs)
    }

    fn raise(mem: &mut [u32; BLOCK_STRIDE / 4], status: IntStatus) {
        mem[fifo::INT_STATUS / 4] |= status.bits();
    }

    /// The fake block has no interrupt logic, so mirror the clear write into
    /// the status word the way the hardware would.
    fn ack(mem: &mut [u32; BLOCK_STRIDE / 4]) {
        let clear = mem[fifo::INT_CLEAR / 4];
        mem[fifo::INT_STATUS / 4] &= !(clear << 12);
        mem[fifo::INT_CLEAR / 4] = 0;
    }

    #[test]
    fn configure_programs_mode_and_irqs() {
        let (_mem, regs) = fake_block();
        let mut mon = FlowControlMonitor::new();
        mon.configure(&regs, FlowMode::EntryAndExit, Watermarks::for_depth(64));
        assert!(regs
            .int_enable()
            .contains(IntEnable::ENTER_FLOW_CTRL | IntEnable::EXIT_FLOW_CTRL));
    }

    #[test]
    fn enter_then_exit_counts_once_each() {
        let (mut mem, regs) = fake_block();
        let mut mon = FlowControlMonitor::new();

        raise(&mut mem, IntStatus::ENTER_FLOW_CTRL);
        let ev = mon.service(&regs);
        assert!(ev.contains(FlowEvents::ENTER_FLOW_CTRL));
        assert!(mon.in_flow_ctrl());
        assert_eq!(mon.enter_count(), 1);
        ack(&mut mem);

        // A repeated enter while already under flow control is not a new
        // transition
        raise(&mut mem, IntStatus::ENTER_FLOW_CTRL);
        mon.service(&regs);
        assert_eq!(mon.enter_count(), 1);
        ack(&mut mem);

        raise(&mut mem, IntStatus::EXIT_FLOW_CTRL);
        let ev = mon.service(&regs);
        assert!(ev.contains(FlowEvents::EXIT_FLOW_CTRL));
        assert!(!mon.in_flow_ctrl());
        assert_eq!(mon.exit_count(), 1);
    }

    #[test]
    fn service_acknowledges_what_it_read() {
        let (mut mem, regs) = fake_block();
        let mut mon = FlowControlMonitor::new();
        raise(&mut mem, IntStatus::DONE_DELIVERED | IntStatus::THRESHOLD);
        let ev = mon.service(&regs);
        assert_eq!(ev, FlowEvents::DONE_DELIVERED | FlowEvents::THRESHOLD);
        ack(&mut mem);
        assert_eq!(mon.service(&regs), FlowEvents::empty());
    }

    #[test]
    fn overflow_counted() {
        let (mut mem, regs) = fake_block();
        let mut mon = FlowControlMonitor::new();
        raise(&mut mem, IntStatus::DONE_OVERFLOW);
        let ev = mon.service(&regs);
        assert!(ev.contains(FlowEvents::DONE_OVERFLOW));
        assert_eq!(mon.overflow_count(), 1);
    }
}
