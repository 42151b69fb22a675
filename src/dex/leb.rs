use crate::error::BytecodeError;

/// DEX LEB128 values are 32-bit, so valid encodings are at most 5 bytes.
const MAX_LEB128_BYTES: usize = 5;

/// Accumulate base-128 digits low-to-high. Returns (bytes consumed, raw value).
fn decode_leb128_raw(encoded: &[u8]) -> Result<(usize, u64), BytecodeError> {
    let mut value: u64 = 0;

    for (count, &byte) in encoded.iter().enumerate() {
        if count == MAX_LEB128_BYTES {
            break;
        }
        value |= ((byte & 0x7F) as u64) << (7 * count);
        if byte & 0x80 == 0 {
            return Ok((count + 1, value));
        }
    }

    if encoded.len() < MAX_LEB128_BYTES {
        fail!(TruncatedInput, "leb128 runs past end of buffer after {} bytes", encoded.len());
    }
    fail!(MalformedVarInt, "leb128 continuation set on byte {}", MAX_LEB128_BYTES)
}

pub fn decode_uleb128(encoded: &[u8]) -> Result<(usize, u32), BytecodeError> {
    let (count, value) = decode_leb128_raw(encoded)?;
    if value > u32::MAX as u64 {
        fail!(MalformedVarInt, "uleb128 value 0x{:x} overflows 32 bits", value);
    }
    Ok((count, value as u32))
}

/// Sign-extends from the final 7-bit group, i.e. from bit `7 * count - 1`.
pub fn decode_sleb128(encoded: &[u8]) -> Result<(usize, i32), BytecodeError> {
    let (count, raw) = decode_leb128_raw(encoded)?;
    let bits = 7 * count as u32;
    let value = if raw & (1 << (bits - 1)) != 0 { raw as i64 - (1i64 << bits) } else { raw as i64 };
    match i32::try_from(value) {
        Ok(v) => Ok((count, v)),
        Err(_) => Err(err!(MalformedVarInt, "sleb128 value {} overflows 32 bits", value)),
    }
}

/// Decodes `value + 1`, so a stored 0 yields -1 (`NO_INDEX` sentinels).
pub fn decode_uleb128p1(encoded: &[u8]) -> Result<(usize, i32), BytecodeError> {
    let (count, v) = decode_uleb128(encoded)?;
    Ok((count, v.wrapping_sub(1) as i32))
}

pub fn encode_uleb128(value: u32) -> Vec<u8> {
    let mut result = Vec::with_capacity(MAX_LEB128_BYTES);
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        if remaining != 0 {
            byte |= 0x80;
        }

        result.push(byte);
        if remaining == 0 {
            break;
        }
    }

    result
}

pub fn encode_sleb128(value: i32) -> Vec<u8> {
    let mut result = Vec::with_capacity(MAX_LEB128_BYTES);
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        let is_more =
            !((remaining == 0 && (byte & 0x40) == 0) || (remaining == -1 && (byte & 0x40) != 0));
        if is_more {
            byte |= 0x80;
        }

        result.push(byte);

        if !is_more {
            break;
        }
    }

    result
}

pub fn encode_uleb128p1(value: i32) -> Vec<u8> {
    encode_uleb128((value as u32).wrapping_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_encode_uleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (16256, vec![0x80, 0x7F]),
            (624485, vec![0xE5, 0x8E, 0x26]),
            (u32::MAX, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];

        for (value, expected) in cases {
            assert_eq!(encode_uleb128(value), expected);
        }
    }

    #[test]
    fn test_decode_uleb128() {
        let cases = vec![
            (vec![0x00], 0),
            (vec![0x01], 1),
            (vec![0x7F], 127),
            (vec![0x80, 0x01], 128),
            (vec![0x80, 0x7F], 16256),
            (vec![0xE5, 0x8E, 0x26], 624485),
        ];

        for (encoded, expected) in cases {
            assert_eq!(decode_uleb128(&encoded).unwrap(), (encoded.len(), expected));
        }
    }

    #[test]
    fn uleb128_round_trip_is_minimal() {
        let mut v: u32 = 1;
        let mut samples = vec![0, u32::MAX];
        while v != 0 {
            samples.extend([v - 1, v, v.wrapping_add(1)]);
            v = v.wrapping_shl(1);
        }
        for v in samples {
            let encoded = encode_uleb128(v);
            assert_eq!(decode_uleb128(&encoded).unwrap(), (encoded.len(), v));
            if encoded.len() > 1 {
                assert_ne!(*encoded.last().unwrap(), 0, "trailing zero group for {}", v);
            }
        }
    }

    #[test]
    fn uleb128_rejects_five_continuations() {
        let e = decode_uleb128(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MalformedVarInt);
    }

    #[test]
    fn uleb128_rejects_overflow() {
        let e = decode_uleb128(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MalformedVarInt);
    }

    #[test]
    fn uleb128_truncated() {
        let e = decode_uleb128(&[0x80, 0x80]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::TruncatedInput);
    }

    #[test]
    fn test_encode_sleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (-1, vec![0x7F]),
            (-123456, vec![0xC0, 0xBB, 0x78]),
            (-128, vec![0x80, 0x7F]),
        ];

        for (value, expected) in cases {
            assert_eq!(encode_sleb128(value), expected);
        }
    }

    #[test]
    fn test_decode_sleb128() {
        let cases = vec![
            (vec![0x00], 0),
            (vec![0x01], 1),
            (vec![0x7F], -1),
            (vec![0xFF, 0x00], 127),
            (vec![0x80, 0x7F], -128),
            (vec![0xC0, 0xBB, 0x78], -123456),
        ];

        for (encoded, expected) in cases {
            let (_, v) = decode_sleb128(&encoded).unwrap();
            assert_eq!(v, expected);
        }
    }

    #[test]
    fn sleb128_round_trip_extremes() {
        for v in [i32::MIN, i32::MIN + 1, -65, -64, 63, 64, i32::MAX] {
            let encoded = encode_sleb128(v);
            assert_eq!(decode_sleb128(&encoded).unwrap(), (encoded.len(), v));
        }
    }

    #[test]
    fn uleb128p1_sentinel() {
        assert_eq!(encode_uleb128p1(-1), vec![0x00]);
        assert_eq!(decode_uleb128p1(&[0x00]).unwrap(), (1, -1));
        assert_eq!(decode_uleb128p1(&encode_uleb128p1(41)).unwrap(), (1, 41));
    }
}
