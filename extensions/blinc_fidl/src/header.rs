//! FIDL transactional message header

use crate::{wire, Error, Result, EPITAPH_ORDINAL, FIDL_MAGIC};
use bitflags::bitflags;

/// Transaction ID (identifies request/response pairs)
pub type TransactionId = u32;

/// Method ordinal (identifies which method is being called)
pub type Ordinal = u64;

bitflags! {
    /// At-rest flags in message header
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MessageFlags: u16 {
        /// No flags set
        const NONE = 0;
        /// Wire format V2 marker
        ///
        /// Accepted on decode for header compatibility but never set by
        /// [`MessageHeader::new`], since this codec's envelope layout is not
        /// the V2 inline-envelope format.
        const USE_V2_WIRE_FORMAT = 1 << 1;
    }
}

bitflags! {
    /// Dynamic flags in message header
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DynamicFlags: u8 {
        /// No flags set
        const NONE = 0;
        /// Flexible method (unknown ordinals allowed)
        const FLEXIBLE = 1 << 7;
    }
}

/// FIDL message header (16 bytes)
///
/// ```text
/// 0        4          6     7       8                16
/// ┌────────┬──────────┬─────┬───────┬────────────────┐
/// │ txid   │ at_rest  │ dyn │ magic │ ordinal        │
/// └────────┴──────────┴─────┴───────┴────────────────┘
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageHeader {
    /// Transaction ID (0 for events and one-way calls)
    pub txid: TransactionId,
    /// At-rest flags
    pub at_rest_flags: MessageFlags,
    /// Dynamic flags
    pub dynamic_flags: DynamicFlags,
    /// Magic number (must be FIDL_MAGIC)
    pub magic: u8,
    /// Method ordinal
    pub ordinal: Ordinal,
}

impl MessageHeader {
    /// Header size in bytes
    pub const SIZE: usize = 16;

    /// Header with no at-rest flags set
    pub fn new(txid: TransactionId, ordinal: Ordinal) -> Self {
        Self {
            txid,
            at_rest_flags: MessageFlags::NONE,
            dynamic_flags: DynamicFlags::NONE,
            magic: FIDL_MAGIC,
            ordinal,
        }
    }

    /// Create an epitaph header (signals channel closure)
    pub fn new_epitaph() -> Self {
        Self::new(0, EPITAPH_ORDINAL)
    }

    /// Check if this is an epitaph
    pub fn is_epitaph(&self) -> bool {
        self.ordinal == EPITAPH_ORDINAL
    }

    fn validate(&self) -> Result<()> {
        if self.magic != FIDL_MAGIC {
            return Err(Error::InvalidMagic {
                expected: FIDL_MAGIC,
                actual: self.magic,
            });
        }
        Ok(())
    }

    /// Encode header to bytes
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        wire::write_u32(&mut buf, 0, self.txid);
        buf[4..6].copy_from_slice(&self.at_rest_flags.bits().to_le_bytes());
        buf[6] = self.dynamic_flags.bits();
        buf[7] = self.magic;
        wire::write_u64(&mut buf, 8, self.ordinal);
        buf
    }

    /// Decode and validate a header from the start of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::BufferUnderflow {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }

        let header = Self {
            txid: wire::read_u32(buf, 0),
            at_rest_flags: MessageFlags::from_bits_truncate(wire::read_u16(buf, 4)),
            dynamic_flags: DynamicFlags::from_bits_truncate(buf[6]),
            magic: buf[7],
            ordinal: wire::read_u64(buf, 8),
        };

        header.validate()?;
        Ok(header)
    }

    /// Overwrite the txid of an encoded message in place
    pub fn patch_txid(bytes: &mut [u8], txid: TransactionId) -> Result<()> {
        if bytes.len() < Self::SIZE {
            return Err(Error::BufferUnderflow {
                needed: Self::SIZE,
                available: bytes.len(),
            });
        }
        wire::write_u32(bytes, 0, txid);
        Ok(())
    }
}
