//! Big-endian integer packing used by every frame on the wire.
//!
//! The gateway protocol stores all integers most significant byte first. The
//! fixed-width helpers keep Clippy expectations scoped to the conversion
//! points; [`encode_uint`] and [`decode_uint`] cover arbitrary widths.

/// Pack `value` into exactly `width` big-endian bytes.
///
/// Bits that do not fit in `width` bytes are discarded. Widths above eight
/// bytes are zero-padded on the left.
///
/// # Examples
///
/// ```
/// use apnwire::byte_order::encode_uint;
///
/// assert_eq!(encode_uint(0x0102_03, 3), vec![0x01, 0x02, 0x03]);
/// assert_eq!(encode_uint(7, 4), vec![0, 0, 0, 7]);
/// ```
#[must_use]
pub fn encode_uint(value: u64, width: usize) -> Vec<u8> {
    let mut out = vec![0; width];
    let mut rest = value;
    for byte in out.iter_mut().rev() {
        *byte = rest.to_le_bytes()[0];
        rest >>= 8;
    }
    out
}

/// Read a `width`-byte big-endian unsigned integer starting at `offset`.
///
/// Returns `None` when the slice is too short to hold the requested bytes.
///
/// # Examples
///
/// ```
/// use apnwire::byte_order::decode_uint;
///
/// let bytes = [0xff, 0x00, 0x26, 0x10];
/// assert_eq!(decode_uint(&bytes, 2, 1), Some(0x26));
/// assert_eq!(decode_uint(&bytes, 4, 1), None);
/// ```
#[must_use]
pub fn decode_uint(bytes: &[u8], width: usize, offset: usize) -> Option<u64> {
    let end = offset.checked_add(width)?;
    let window = bytes.get(offset..end)?;
    Some(
        window
            .iter()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)),
    )
}

/// Serialise a `u16` in network byte order (big-endian).
///
/// # Examples
///
/// ```
/// use apnwire::byte_order::write_network_u16;
///
/// assert_eq!(write_network_u16(0x0020), [0x00, 0x20]);
/// ```
#[must_use]
pub fn write_network_u16(value: u16) -> [u8; 2] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u16` from its on-wire representation.
#[must_use]
pub fn read_network_u16(bytes: [u8; 2]) -> u16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u16::from_be_bytes(bytes)
}

/// Serialise a `u32` in network byte order (big-endian).
#[must_use]
pub fn write_network_u32(value: u32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u32` from its on-wire representation.
#[must_use]
pub fn read_network_u32(bytes: [u8; 4]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u32::from_be_bytes(bytes)
}
