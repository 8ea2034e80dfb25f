//! CPU/bus memory windows for ring and buffer storage.

use crate::{DmaError, Result};

/// Align `value` up to the next multiple of `align` (power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Align `value` down to a multiple of `align` (power of two).
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// A contiguous memory window visible to both the CPU and the device.
///
/// `cpu` is the kernel-virtual/identity-mapped address the driver reads and
/// writes through; `bus` is the address the device DMAs with. The two differ
/// whenever an IOMMU or fixed offset sits between them, so they are carried
/// separately everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    cpu: usize,
    bus: u64,
    len: usize,
}

impl MemoryRegion {
    /// Describe an existing mapping.
    ///
    /// # Safety
    ///
    /// `cpu..cpu+len` must be a valid, device-coherent mapping whose bus
    /// address is `bus`, and it must stay mapped for the region's lifetime.
    pub const unsafe fn new(cpu: usize, bus: u64, len: usize) -> Self {
        Self { cpu, bus, len }
    }

    pub const fn cpu_addr(&self) -> usize {
        self.cpu
    }

    pub const fn bus_addr(&self) -> u64 {
        self.bus
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// CPU pointer to the start of the window.
    pub const fn as_ptr(&self) -> *mut u8 {
        self.cpu as *mut u8
    }

    /// Split off the first `len` bytes as its own region.
    pub fn split_at(&self, len: usize) -> Result<(MemoryRegion, MemoryRegion)> {
        if len > self.len {
            return Err(DmaError::BadLayout);
        }
        let head = MemoryRegion { cpu: self.cpu, bus: self.bus, len };
        let tail = MemoryRegion {
            cpu: self.cpu + len,
            bus: self.bus + len as u64,
            len: self.len - len,
        };
        Ok((head, tail))
    }
}

// Regions describe shared-with-device memory; access is synchronized by the
// ownership protocol layered above.
unsafe impl Send for MemoryRegion {}
unsafe impl Sync for MemoryRegion {}

/// Bump allocator over the accelerator's on-chip SRAM window.
///
/// On-chip placement keeps the latency-critical rings off the system bus,
/// but the SRAM loses its contents when the block powers down, so every
/// ring carved from here must be snapshotted before suspend. The window is
/// small; running out is an error reported to the caller, never a fallback
/// to general memory (the caller decides that).
#[derive(Debug)]
pub struct OnChipRegion {
    window: MemoryRegion,
    next: usize,
}

impl OnChipRegion {
    pub const fn new(window: MemoryRegion) -> Self {
        Self { window, next: 0 }
    }

    /// Carve `len` bytes at `align` alignment out of the window.
    pub fn alloc(&mut self, len: usize, align: usize) -> Result<MemoryRegion> {
        if len == 0 || align == 0 || !align.is_power_of_two() {
            return Err(DmaError::BadLayout);
        }
        let start = align_up(self.next, align);
        let end = start.checked_add(len).ok_or(DmaError::BadLayout)?;
        if end > self.window.len() {
            return Err(DmaError::RegionExhausted);
        }
        self.next = end;
        Ok(MemoryRegion {
            cpu: self.window.cpu_addr() + start,
            bus: self.window.bus_addr() + start as u64,
            len,
        })
    }

    /// Bytes still available (ignoring alignment padding of future allocs).
    pub fn remaining(&self) -> usize {
        self.window.len() - self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backing(len: usize) -> (Vec<u8>, MemoryRegion) {
        let mut mem = vec![0u8; len];
        let cpu = mem.as_mut_ptr() as usize;
        let region = unsafe { MemoryRegion::new(cpu, 0x8000_0000, len) };
        (mem, region)
    }

    #[test]
    fn align_helpers() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_down(31, 16), 16);
    }

    #[test]
    fn split_keeps_cpu_bus_in_step() {
        let (_mem, region) = backing(256);
        let (head, tail) = region.split_at(64).unwrap();
        assert_eq!(head.len(), 64);
        assert_eq!(tail.len(), 192);
        assert_eq!(tail.cpu_addr(), head.cpu_addr() + 64);
        assert_eq!(tail.bus_addr(), head.bus_addr() + 64);
        assert_eq!(region.split_at(257), Err(DmaError::BadLayout));
    }

    #[test]
    fn on_chip_alloc_exhausts() {
        let (_mem, region) = backing(128);
        let mut sram = OnChipRegion::new(region);
        let a = sram.alloc(48, 16).unwrap();
        assert_eq!(a.cpu_addr() % 16, 0);
        let b = sram.alloc(48, 16).unwrap();
        assert_eq!(b.bus_addr(), a.bus_addr() + 48);
        assert_eq!(sram.alloc(48, 16), Err(DmaError::RegionExhausted));
        assert!(sram.remaining() < 48);
    }

    #[test]
    fn on_chip_rejects_bad_layout() {
        let (_mem, region) = backing(64);
        let mut sram = OnChipRegion::new(region);
        assert_eq!(sram.alloc(0, 16), Err(DmaError::BadLayout));
        assert_eq!(sram.alloc(16, 3), Err(DmaError::BadLayout));
    }
}
