//! DMA memory management for the IPA data plane.
//!
//! Three layers, lowest first:
//!
//! - [`region`]: raw CPU/bus memory windows. Ring memory comes either from
//!   a small on-chip SRAM window (contents lost on power collapse, must be
//!   backed up) or from ordinary DMA-coherent memory.
//! - [`buffer`]: a single DMA buffer with an explicit ownership state, so
//!   CPU access while the device holds the buffer is a bug caught at the
//!   access site rather than a silent corruption.
//! - [`pool`]: fixed-capacity pools of equally sized buffers, allocated by
//!   index and findable by bus address when the hardware hands one back.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod buffer;
pub mod pool;
pub mod region;

pub use buffer::{DmaBuffer, Ownership};
pub use pool::BufferPool;
pub use region::{align_down, align_up, MemoryRegion, OnChipRegion};

use core::fmt;

pub type Result<T> = core::result::Result<T, DmaError>;

/// DMA allocation and tracking failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// The on-chip region has no room for the requested allocation.
    RegionExhausted,
    /// Requested size or alignment is zero or not a power of two.
    BadLayout,
    /// The pool has no free buffer.
    PoolExhausted,
    /// Index or bus address does not name a live buffer.
    NoSuchBuffer,
    /// Buffer is not in the ownership state the operation requires.
    WrongOwner,
}

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegionExhausted => write!(f, "on-chip region exhausted"),
            Self::BadLayout => write!(f, "bad size or alignment"),
            Self::PoolExhausted => write!(f, "buffer pool exhausted"),
            Self::NoSuchBuffer => write!(f, "no such buffer"),
            Self::WrongOwner => write!(f, "buffer in wrong ownership state"),
        }
    }
}
