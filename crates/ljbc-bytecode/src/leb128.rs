//! Unsigned LEB128 framing
//!
//! Seven data bits per byte, least-significant group first; every byte but
//! the last carries the 0x80 continuation bit.

/// Append `value` as an unsigned LEB128 integer
pub fn write_uleb128(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Append a `usize` length as LEB128, `None` when it exceeds 32 bits
pub fn write_uleb128_len(out: &mut Vec<u8>, len: usize) -> Option<()> {
    write_uleb128(out, u32::try_from(len).ok()?);
    Some(())
}

/// Number of bytes `value` occupies once encoded
pub fn uleb128_size(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}
