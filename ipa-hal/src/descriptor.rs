//! 128-bit ring element describing one packet buffer.

use static_assertions::const_assert_eq;

/// Size of one ring element in bytes.
pub const NODE_SIZE: usize = 16;

const_assert_eq!(NODE_SIZE, core::mem::size_of::<u128>());

/// Maximum payload length expressible in the 20-bit length field.
pub const MAX_NODE_LEN: u32 = (1 << 20) - 1;

/// One fill- or done-ring element.
///
/// Wire format is a 128-bit little-endian value stored as four u32 words in
/// ascending significance. Fields, LSB first:
///
/// ```text
/// address:40  length:20  offset:12  net_id:8  src:5  dst:5
/// prio:3  bearer_id:7  intr:1  index:1  err_code:4  reserved:22
/// ```
///
/// `index` is the scatter continuation flag; `err_code` values 0 and 1 are
/// success, anything above indicates a hardware-reported fault on the
/// element. `reserved` round-trips untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeDescriptor {
    /// Bus address of the payload buffer (40 bits).
    pub address: u64,
    /// Payload length in bytes (20 bits).
    pub length: u32,
    /// Payload offset within the buffer (12 bits).
    pub offset: u16,
    /// Virtual network id (8 bits).
    pub net_id: u8,
    /// Source terminus (5 bits).
    pub src: u8,
    /// Destination terminus (5 bits).
    pub dst: u8,
    /// Priority (3 bits).
    pub prio: u8,
    /// Bearer id (7 bits).
    pub bearer_id: u8,
    /// Raise an interrupt when this element completes.
    pub intr: bool,
    /// Scatter continuation flag.
    pub index: bool,
    /// Completion error code (4 bits), 0 or 1 on success.
    pub err_code: u8,
    /// Reserved bits (22), preserved across pack/unpack.
    pub reserved: u32,
}

impl NodeDescriptor {
    /// True unless the hardware flagged a fault on this element.
    pub fn is_ok(&self) -> bool {
        self.err_code <= 1
    }

    /// Pack into the 128-bit wire value. Out-of-range fields are masked.
    fn pack(&self) -> u128 {
        let mut v = 0u128;
        v |= (self.address as u128) & ((1 << 40) - 1);
        v |= ((self.length as u128) & ((1 << 20) - 1)) << 40;
        v |= ((self.offset as u128) & ((1 << 12) - 1)) << 60;
        v |= (self.net_id as u128) << 72;
        v |= ((self.src as u128) & 0x1F) << 80;
        v |= ((self.dst as u128) & 0x1F) << 85;
        v |= ((self.prio as u128) & 0x7) << 90;
        v |= ((self.bearer_id as u128) & 0x7F) << 93;
        v |= (self.intr as u128) << 100;
        v |= (self.index as u128) << 101;
        v |= ((self.err_code as u128) & 0xF) << 102;
        v |= ((self.reserved as u128) & ((1 << 22) - 1)) << 106;
        v
    }

    fn unpack(v: u128) -> Self {
        Self {
            address: (v & ((1 << 40) - 1)) as u64,
            length: ((v >> 40) & ((1 << 20) - 1)) as u32,
            offset: ((v >> 60) & ((1 << 12) - 1)) as u16,
            net_id: (v >> 72) as u8,
            src: ((v >> 80) & 0x1F) as u8,
            dst: ((v >> 85) & 0x1F) as u8,
            prio: ((v >> 90) & 0x7) as u8,
            bearer_id: ((v >> 93) & 0x7F) as u8,
            intr: (v >> 100) & 1 != 0,
            index: (v >> 101) & 1 != 0,
            err_code: ((v >> 102) & 0xF) as u8,
            reserved: ((v >> 106) & ((1 << 22) - 1)) as u32,
        }
    }

    /// Serialize as four little-endian u32 words in ascending significance.
    pub fn to_bytes(&self) -> [u8; NODE_SIZE] {
        self.pack().to_le_bytes()
    }

    pub fn from_bytes(bytes: [u8; NODE_SIZE]) -> Self {
        Self::unpack(u128::from_le_bytes(bytes))
    }

    /// Write the wire form into ring memory at `slot`.
    ///
    /// # Safety
    ///
    /// `ring_base` must point to ring memory of at least `slot + 1` elements,
    /// and the slot must currently be software-owned.
    pub(crate) unsafe fn write_to_slot(&self, ring_base: *mut u8, slot: usize) {
        let bytes = self.to_bytes();
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), ring_base.add(slot * NODE_SIZE), NODE_SIZE);
    }

    /// Read the wire form from ring memory at `slot`.
    ///
    /// # Safety
    ///
    /// Same bounds requirement as [`write_to_slot`](Self::write_to_slot);
    /// the slot must not be concurrently written by the device.
    pub(crate) unsafe fn read_from_slot(ring_base: *const u8, slot: usize) -> Self {
        let mut bytes = [0u8; NODE_SIZE];
        core::ptr::copy_nonoverlapping(ring_base.add(slot * NODE_SIZE), bytes.as_mut_ptr(), NODE_SIZE);
        Self::from_bytes(bytes)
    }
}
