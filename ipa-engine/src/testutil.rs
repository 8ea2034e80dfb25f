//! Fake hardware for hostside tests: an owned word array stands in for the
//! register block and plain vectors for ring and buffer memory. The helpers
//! play the device's half of the protocol by editing the register words and
//! ring bytes directly.

use ipa_dma::{BufferPool, MemoryRegion};
use ipa_hal::regs::{fifo, RegisterBlock, BLOCK_STRIDE};
use ipa_hal::{IntEnable, NodeDescriptor, RingChannel, RingConfig, NODE_SIZE};

pub(crate) struct FakeHw {
    regs_mem: Box<[u32; BLOCK_STRIDE / 4]>,
    fill_mem: Vec<u8>,
    done_mem: Vec<u8>,
    _pool_mem: Vec<u8>,
    pool_bus: u64,
    pool_ptr: *const u8,
    depth: u16,
}

impl FakeHw {
    /// Build an open channel plus a pool of `buf_count` buffers.
    pub(crate) fn new(depth: u16, buf_count: usize, buf_size: usize) -> (Self, RingChannel, BufferPool) {
        Self::new_opts(depth, buf_count, buf_size, true)
    }

    pub(crate) fn new_opts(
        depth: u16,
        buf_count: usize,
        buf_size: usize,
        on_chip: bool,
    ) -> (Self, RingChannel, BufferPool) {
        let mut regs_mem = Box::new([0u32; BLOCK_STRIDE / 4]);
        let regs = unsafe { RegisterBlock::new(regs_mem.as_mut_ptr()) };

        let ring_len = depth as usize * NODE_SIZE;
        let mut fill_mem = vec![0u8; ring_len];
        let mut done_mem = vec![0u8; ring_len];
        let mut pool_mem = vec![0u8; buf_count * buf_size];

        let fill_region = unsafe {
            MemoryRegion::new(fill_mem.as_mut_ptr() as usize, 0x1000_0000, ring_len)
        };
        let done_region = unsafe {
            MemoryRegion::new(done_mem.as_mut_ptr() as usize, 0x2000_0000, ring_len)
        };
        let pool_region = unsafe {
            MemoryRegion::new(pool_mem.as_mut_ptr() as usize, 0x4000_0000, pool_mem.len())
        };

        let mut channel = RingChannel::new(regs);
        channel
            .open(RingConfig {
                depth,
                fill_region,
                done_region,
                intr_delay_us: 500,
                intr_threshold: 32,
                int_enable: IntEnable::DONE_DELIVERED | IntEnable::DONE_OVERFLOW,
                on_chip,
            })
            .unwrap();
        let pool = BufferPool::new(pool_region, buf_size, buf_count).unwrap();

        let pool_ptr = pool_mem.as_ptr();
        let hw = Self {
            regs_mem,
            fill_mem,
            done_mem,
            _pool_mem: pool_mem,
            pool_bus: 0x4000_0000,
            pool_ptr,
            depth,
        };
        (hw, channel, pool)
    }

    fn mask(&self) -> u16 {
        2 * self.depth - 1
    }

    fn reg(&self, offset: usize) -> u32 {
        self.regs_mem[offset / 4]
    }

    fn set_reg_hi16(&mut self, offset: usize, value: u16) {
        let w = &mut self.regs_mem[offset / 4];
        *w = (*w & 0xFFFF) | ((value as u32) << 16);
    }

    pub(crate) fn fill_rd(&self) -> u16 {
        (self.reg(fifo::FILL_RD) >> 16) as u16
    }

    pub(crate) fn done_wr(&self) -> u16 {
        (self.reg(fifo::DONE_WR) >> 16) as u16
    }

    /// Read the fill-ring element at `slot`.
    pub(crate) fn fill_node(&self, slot: usize) -> NodeDescriptor {
        let mut bytes = [0u8; NODE_SIZE];
        bytes.copy_from_slice(&self.fill_mem[slot * NODE_SIZE..][..NODE_SIZE]);
        NodeDescriptor::from_bytes(bytes)
    }

    /// Device side: consume `n` fill-ring elements without completing them.
    pub(crate) fn consume_fill(&mut self, n: u16) {
        let rd = self.fill_rd().wrapping_add(n) & self.mask();
        self.set_reg_hi16(fifo::FILL_RD, rd);
    }

    /// Device side: append completed elements to the done ring.
    pub(crate) fn deliver_done(&mut self, nodes: &[NodeDescriptor]) {
        let mut wr = self.done_wr();
        for node in nodes {
            let slot = (wr & (self.depth - 1)) as usize;
            self.done_mem[slot * NODE_SIZE..][..NODE_SIZE].copy_from_slice(&node.to_bytes());
            wr = wr.wrapping_add(1) & self.mask();
        }
        self.set_reg_hi16(fifo::DONE_WR, wr);
    }

    /// Device side: consume the next `n` published elements and echo them
    /// back as completions carrying `err_code`.
    pub(crate) fn complete_sent(&mut self, n: usize, err_code: u8) {
        let mut nodes = Vec::with_capacity(n);
        let rd = self.fill_rd();
        for i in 0..n {
            let slot = (rd.wrapping_add(i as u16) & (self.depth - 1)) as usize;
            let mut node = self.fill_node(slot);
            node.err_code = err_code;
            nodes.push(node);
        }
        self.consume_fill(n as u16);
        self.deliver_done(&nodes);
    }

    /// Payload bytes of the pool buffer that starts at `bus_addr`.
    pub(crate) fn buffer_contents(&self, bus_addr: u64, len: usize) -> &[u8] {
        let off = (bus_addr - self.pool_bus) as usize;
        unsafe { core::slice::from_raw_parts(self.pool_ptr.add(off), len) }
    }

    /// Device side: write a received frame into the published buffer at
    /// `bus_addr` and deliver its completion.
    pub(crate) fn receive_frame(&mut self, mut node: NodeDescriptor, payload: &[u8]) {
        let off = (node.address - self.pool_bus) as usize;
        unsafe {
            core::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                (self.pool_ptr as *mut u8).add(off),
                payload.len(),
            );
        }
        node.length = payload.len() as u32;
        self.consume_fill(1);
        self.deliver_done(&[node]);
    }

    /// Zero the register block, as a power collapse would.
    pub(crate) fn power_collapse(&mut self) {
        self.regs_mem.fill(0);
    }
}
