//! Wire format primitives
//!
//! Little-endian scalar access on byte slices plus the fixed markers used in
//! presence slots. Every out-of-line object starts on an 8-byte boundary.

/// Presence marker of a present out-of-line object
pub const ALLOC_PRESENT: u64 = u64::MAX;

/// Presence marker of an absent out-of-line object
pub const ALLOC_ABSENT: u64 = 0;

/// Inline size of a vector or string header (count + presence)
pub const VECTOR_HEADER_SIZE: usize = 16;

/// Inline size of an envelope (byte count + handle count + presence)
pub const ENVELOPE_SIZE: usize = 16;

/// Inline size of a union (ordinal + envelope)
pub const UNION_SIZE: usize = 8 + ENVELOPE_SIZE;

/// Inline size of a table (max ordinal + presence)
pub const TABLE_SIZE: usize = 16;

/// Round `len` up to the next multiple of 8
///
/// Returns `None` on overflow.
#[inline]
pub fn align8(len: usize) -> Option<usize> {
    len.checked_add(7).map(|n| n & !7)
}

#[inline]
pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

#[inline]
pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

#[inline]
pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// First non-zero byte in `bytes[start..end]`, as an absolute offset
#[inline]
pub(crate) fn find_nonzero(bytes: &[u8], start: usize, end: usize) -> Option<usize> {
    bytes[start..end]
        .iter()
        .position(|&b| b != 0)
        .map(|i| start + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align8() {
        assert_eq!(align8(0), Some(0));
        assert_eq!(align8(1), Some(8));
        assert_eq!(align8(8), Some(8));
        assert_eq!(align8(13), Some(16));
        assert_eq!(align8(usize::MAX), None);
    }

    #[test]
    fn test_scalars() {
        let mut buf = [0u8; 16];
        write_u32(&mut buf, 4, 0xDEAD_BEEF);
        write_u64(&mut buf, 8, ALLOC_PRESENT);
        assert_eq!(read_u32(&buf, 4), 0xDEAD_BEEF);
        assert_eq!(read_u16(&buf, 4), 0xBEEF);
        assert_eq!(read_u64(&buf, 8), ALLOC_PRESENT);
        assert_eq!(find_nonzero(&buf, 0, 4), None);
        assert_eq!(find_nonzero(&buf, 0, 16), Some(4));
    }
}
