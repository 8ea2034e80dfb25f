//! Hardware abstraction for the IPA packet accelerator's data plane.
//!
//! The accelerator moves packets through pairs of descriptor rings sharing
//! one register block per channel:
//!
//! - the **fill ring**: software publishes descriptors (free receive
//!   buffers, or outgoing frames), hardware consumes them;
//! - the **done ring**: hardware publishes completed descriptors (received
//!   frames, or transmit completions), software harvests them.
//!
//! [`descriptor`] defines the 128-bit wire element, [`regs`] the per-channel
//! register block, [`ring`] the channel engine over both, and [`flow`] the
//! watermark flow-control and interrupt decode.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod descriptor;
pub mod error;
pub mod flow;
pub mod regs;
pub mod ring;

pub use descriptor::{NodeDescriptor, NODE_SIZE};
pub use error::{HalError, Result};
pub use flow::{FlowControlMonitor, FlowEvents, FlowMode, Watermarks};
pub use regs::{IntClear, IntEnable, IntStatus, RegisterBlock};
pub use ring::{ChannelBackup, ChannelPointers, Ring, RingChannel, RingConfig};
