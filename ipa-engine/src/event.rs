//! Typed notifications delivered to nic consumers.

/// Handle naming one logical network interface on the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NicId(pub u16);

/// Events a nic consumer polls for instead of registering callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicEvent {
    /// The nic's receive queue went from empty to non-empty.
    RxAvailable { nic: NicId },
    /// The nic hit send backpressure; stop offering traffic.
    FlowCtrlEnter { nic: NicId },
    /// Credits recovered; the nic may send again.
    FlowCtrlExit { nic: NicId },
    /// Transmit completions were reclaimed for the nic.
    TxDone { nic: NicId, count: u16 },
}
