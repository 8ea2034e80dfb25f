//! Hardware-layer error types

use core::fmt;

pub type Result<T> = core::result::Result<T, HalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Operation on a channel that is not open.
    ChannelClosed,
    /// Open of a channel that is already open.
    ChannelAlreadyOpen,
    /// Depth is not a power of two in the supported range.
    BadDepth,
    /// Ring memory region too small for the configured depth.
    RegionTooSmall,
    /// A verified register write read back a different value.
    RegisterVerify,
    /// Pointer value violates the occupancy invariant.
    PointerRange,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelClosed => write!(f, "channel is closed"),
            Self::ChannelAlreadyOpen => write!(f, "channel is already open"),
            Self::BadDepth => write!(f, "unsupported ring depth"),
            Self::RegionTooSmall => write!(f, "ring memory region too small"),
            Self::RegisterVerify => write!(f, "register write verification failed"),
            Self::PointerRange => write!(f, "ring pointer out of range"),
        }
    }
}
