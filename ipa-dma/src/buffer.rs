//! Single DMA buffer with explicit ownership tracking.
//!
//! Every payload buffer the engine hands to the accelerator moves through a
//! fixed lifecycle:
//!
//! ```text
//!        alloc                 publish to ring
//!  Free ───────► DriverOwned ─────────────────► DeviceOwned
//!   ▲                 ▲                              │
//!   │     free        │        completion harvested  │
//!   └─────────────────┴──────────────────────────────┘
//! ```
//!
//! CPU access is only legal in `DriverOwned`; the accessors assert it so a
//! use-while-device-owned bug fails loudly instead of racing the DMA.

use core::slice;

/// Who may touch the buffer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// In the pool free list, contents undefined.
    Free,
    /// Driver holds it, CPU access allowed.
    DriverOwned,
    /// Posted to the hardware, CPU access forbidden.
    DeviceOwned,
}

/// A fixed-capacity DMA buffer.
///
/// `len` tracks the valid payload length within `capacity`; completions trim
/// it to the length the hardware reported.
#[derive(Debug)]
pub struct DmaBuffer {
    cpu_ptr: *mut u8,
    bus_addr: u64,
    capacity: usize,
    len: usize,
    ownership: Ownership,
    index: u16,
}

impl DmaBuffer {
    /// Wrap a mapped buffer.
    ///
    /// # Safety
    ///
    /// `cpu_ptr..cpu_ptr+capacity` must be a valid device-coherent mapping
    /// with bus address `bus_addr`, exclusively owned by this value.
    pub(crate) unsafe fn new(cpu_ptr: *mut u8, bus_addr: u64, capacity: usize, index: u16) -> Self {
        Self {
            cpu_ptr,
            bus_addr,
            capacity,
            len: 0,
            ownership: Ownership::Free,
            index,
        }
    }

    pub fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Valid payload length.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Clamp the valid length, e.g. to a completion's reported length.
    pub fn trim(&mut self, len: usize) {
        debug_assert_eq!(self.ownership, Ownership::DriverOwned);
        self.len = len.min(self.capacity);
    }

    /// Payload bytes. Panics unless driver-owned.
    pub fn as_slice(&self) -> &[u8] {
        assert_eq!(
            self.ownership,
            Ownership::DriverOwned,
            "buffer {} read while {:?}",
            self.index,
            self.ownership
        );
        unsafe { slice::from_raw_parts(self.cpu_ptr, self.len) }
    }

    /// Full writable window. Panics unless driver-owned.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert_eq!(
            self.ownership,
            Ownership::DriverOwned,
            "buffer {} written while {:?}",
            self.index,
            self.ownership
        );
        unsafe { slice::from_raw_parts_mut(self.cpu_ptr, self.capacity) }
    }

    /// Free -> DriverOwned, on pool alloc.
    pub(crate) fn mark_allocated(&mut self) {
        debug_assert_eq!(self.ownership, Ownership::Free);
        self.ownership = Ownership::DriverOwned;
        self.len = 0;
    }

    /// DriverOwned -> Free, on pool release.
    pub(crate) fn mark_free(&mut self) {
        debug_assert_eq!(self.ownership, Ownership::DriverOwned);
        self.ownership = Ownership::Free;
        self.len = 0;
    }

    /// DriverOwned -> DeviceOwned.
    ///
    /// # Safety
    ///
    /// Caller must actually post the buffer to the hardware and not touch
    /// the contents until [`mark_driver_owned`](Self::mark_driver_owned).
    pub unsafe fn mark_device_owned(&mut self) {
        debug_assert_eq!(self.ownership, Ownership::DriverOwned);
        self.ownership = Ownership::DeviceOwned;
    }

    /// DeviceOwned -> DriverOwned.
    ///
    /// # Safety
    ///
    /// Caller must have observed the hardware completion for this buffer.
    pub unsafe fn mark_driver_owned(&mut self) {
        debug_assert_eq!(self.ownership, Ownership::DeviceOwned);
        self.ownership = Ownership::DriverOwned;
    }
}

// The raw pointer is to exclusively owned mapped memory; the ownership state
// machine serializes CPU and device access.
unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}
