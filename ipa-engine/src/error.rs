//! Engine error types

use core::fmt;

use ipa_dma::DmaError;
use ipa_hal::HalError;

use crate::suspend::SuspendState;

pub type Result<T> = core::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// No send credit left; retry after completions are reclaimed.
    WouldBlock,
    /// Work still in flight; the suspend attempt was aborted.
    Busy,
    /// Receive queue is empty.
    NoData,
    /// No route table entry matches.
    NoRoute,
    /// Nic id does not name an open nic.
    BadNic,
    /// Frame exceeds the buffer or descriptor length field.
    FrameTooLong,
    /// Power resource grant is in progress; call back later.
    Retry,
    /// Operation not legal in the coordinator's current state.
    BadState(SuspendState),
    Dma(DmaError),
    Hal(HalError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldBlock => write!(f, "no send credit available"),
            Self::Busy => write!(f, "work in flight"),
            Self::NoData => write!(f, "no data queued"),
            Self::NoRoute => write!(f, "no matching route"),
            Self::BadNic => write!(f, "unknown or closed nic"),
            Self::FrameTooLong => write!(f, "frame too long"),
            Self::Retry => write!(f, "resource grant in progress"),
            Self::BadState(s) => write!(f, "not legal in suspend state {:?}", s),
            Self::Dma(e) => write!(f, "dma: {}", e),
            Self::Hal(e) => write!(f, "hal: {}", e),
        }
    }
}

impl From<DmaError> for EngineError {
    fn from(e: DmaError) -> Self {
        Self::Dma(e)
    }
}

impl From<HalError> for EngineError {
    fn from(e: HalError) -> Self {
        Self::Hal(e)
    }
}
