//! Fixed-capacity pool of equally sized DMA buffers.

use alloc::vec::Vec;

use crate::buffer::{DmaBuffer, Ownership};
use crate::region::MemoryRegion;
use crate::{DmaError, Result};

/// A pool carved from one [`MemoryRegion`], allocated by index.
///
/// The hardware reports completions by bus address, so the pool also
/// supports the reverse lookup from a bus address to the buffer index.
pub struct BufferPool {
    buffers: Vec<DmaBuffer>,
    free_list: Vec<u16>,
    buffer_size: usize,
}

impl BufferPool {
    /// Carve `count` buffers of `buffer_size` bytes out of `region`.
    pub fn new(region: MemoryRegion, buffer_size: usize, count: usize) -> Result<Self> {
        if buffer_size == 0 || count == 0 || count > u16::MAX as usize {
            return Err(DmaError::BadLayout);
        }
        if buffer_size
            .checked_mul(count)
            .map_or(true, |need| need > region.len())
        {
            return Err(DmaError::BadLayout);
        }

        let mut buffers = Vec::with_capacity(count);
        let mut free_list = Vec::with_capacity(count);
        for i in 0..count {
            let off = i * buffer_size;
            let cpu = unsafe { region.as_ptr().add(off) };
            let bus = region.bus_addr() + off as u64;
            buffers.push(unsafe { DmaBuffer::new(cpu, bus, buffer_size, i as u16) });
            // LIFO free list, lowest index allocated last
            free_list.push((count - 1 - i) as u16);
        }

        Ok(Self {
            buffers,
            free_list,
            buffer_size,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Take a free buffer, driver-owned on return.
    pub fn alloc(&mut self) -> Result<u16> {
        let index = self.free_list.pop().ok_or(DmaError::PoolExhausted)?;
        self.buffers[index as usize].mark_allocated();
        Ok(index)
    }

    /// Return a driver-owned buffer to the free list.
    pub fn free(&mut self, index: u16) -> Result<()> {
        let buf = self
            .buffers
            .get_mut(index as usize)
            .ok_or(DmaError::NoSuchBuffer)?;
        if buf.ownership() != Ownership::DriverOwned {
            return Err(DmaError::WrongOwner);
        }
        buf.mark_free();
        self.free_list.push(index);
        Ok(())
    }

    pub fn get(&self, index: u16) -> Result<&DmaBuffer> {
        self.buffers
            .get(index as usize)
            .ok_or(DmaError::NoSuchBuffer)
    }

    pub fn get_mut(&mut self, index: u16) -> Result<&mut DmaBuffer> {
        self.buffers
            .get_mut(index as usize)
            .ok_or(DmaError::NoSuchBuffer)
    }

    /// Find the live (non-free) buffer whose payload starts at `bus_addr`.
    pub fn find_by_bus_addr(&self, bus_addr: u64) -> Option<u16> {
        // Buffers are contiguous and equally sized, so this is arithmetic,
        // not a scan.
        let base = self.buffers.first()?.bus_addr();
        let off = bus_addr.checked_sub(base)?;
        if off % self.buffer_size as u64 != 0 {
            return None;
        }
        let index = (off / self.buffer_size as u64) as usize;
        let buf = self.buffers.get(index)?;
        if buf.ownership() == Ownership::Free {
            return None;
        }
        Some(index as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(count: usize, size: usize) -> (Vec<u8>, BufferPool) {
        let mut mem = vec![0u8; count * size];
        let region =
            unsafe { MemoryRegion::new(mem.as_mut_ptr() as usize, 0x4000_0000, mem.len()) };
        let pool = BufferPool::new(region, size, count).unwrap();
        (mem, pool)
    }

    #[test]
    fn alloc_free_cycle() {
        let (_mem, mut p) = pool(4, 128);
        assert_eq!(p.free_count(), 4);
        let a = p.alloc().unwrap();
        let b = p.alloc().unwrap();
        assert_ne!(a, b);
        assert_eq!(p.free_count(), 2);
        p.free(a).unwrap();
        assert_eq!(p.free_count(), 3);
        // Double free reports the ownership error
        assert_eq!(p.free(a), Err(DmaError::WrongOwner));
    }

    #[test]
    fn exhaustion() {
        let (_mem, mut p) = pool(2, 64);
        p.alloc().unwrap();
        p.alloc().unwrap();
        assert_eq!(p.alloc(), Err(DmaError::PoolExhausted));
    }

    #[test]
    fn bus_addr_lookup() {
        let (_mem, mut p) = pool(4, 256);
        let idx = p.alloc().unwrap();
        let bus = p.get(idx).unwrap().bus_addr();
        assert_eq!(p.find_by_bus_addr(bus), Some(idx));
        // Interior addresses and free buffers do not match
        assert_eq!(p.find_by_bus_addr(bus + 1), None);
        p.free(idx).unwrap();
        assert_eq!(p.find_by_bus_addr(bus), None);
    }

    #[test]
    fn rejects_oversized_layout() {
        let mut mem = vec![0u8; 100];
        let region =
            unsafe { MemoryRegion::new(mem.as_mut_ptr() as usize, 0x4000_0000, mem.len()) };
        assert!(matches!(
            BufferPool::new(region, 64, 4),
            Err(DmaError::BadLayout)
        ));
    }
}
