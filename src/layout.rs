//! Binary layout primitives shared by both container formats.
//!
//! Records are read through a cursor (`bytes`, `ix`) with fixed-width fields in
//! either byte order, count-prefixed repetitions and [`Pointer`]s: absolute
//! offsets that are only dereferenced when the pointee is actually needed. Sections
//! may therefore be scattered anywhere in the buffer and visited in any order.

use std::fmt;
use std::marker::PhantomData;

use crate::error::BytecodeError;

/// A record that can be parsed at a cursor position.
pub trait Readable: Sized
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<Self, BytecodeError>;
}

/// A record that can be serialized; returns the number of bytes written.
pub trait Writable
{
    fn write(&self, bytes: &mut Vec<u8>) -> usize;
}

fn require(bytes: &[u8], ix: usize, n: usize, what: &str) -> Result<(), BytecodeError>
{
    if ix.checked_add(n).map_or(true, |end| end > bytes.len())
    {
        fail!(TruncatedInput, "Unexpected end of stream reading {} at index 0x{:x}", what, ix);
    }
    Ok(())
}

// Little-endian reads (DEX)
pub fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, BytecodeError>
{
    require(bytes, *ix, 1, "u1")?;
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, BytecodeError>
{
    require(bytes, *ix, 2, "u2")?;
    let result = u16::from_le_bytes([bytes[*ix], bytes[*ix + 1]]);
    *ix += 2;
    Ok(result)
}

pub fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, BytecodeError>
{
    require(bytes, *ix, 4, "u4")?;
    let result = u32::from_le_bytes([bytes[*ix], bytes[*ix + 1], bytes[*ix + 2], bytes[*ix + 3]]);
    *ix += 4;
    Ok(result)
}

pub fn read_u8(bytes: &[u8], ix: &mut usize) -> Result<u64, BytecodeError>
{
    let lo = read_u4(bytes, ix)? as u64;
    let hi = read_u4(bytes, ix)? as u64;
    Ok((hi << 32) | lo)
}

// Big-endian reads (class files)
pub fn read_be_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, BytecodeError>
{
    require(bytes, *ix, 2, "u2")?;
    let result = u16::from_be_bytes([bytes[*ix], bytes[*ix + 1]]);
    *ix += 2;
    Ok(result)
}

pub fn read_be_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, BytecodeError>
{
    require(bytes, *ix, 4, "u4")?;
    let result = u32::from_be_bytes([bytes[*ix], bytes[*ix + 1], bytes[*ix + 2], bytes[*ix + 3]]);
    *ix += 4;
    Ok(result)
}

pub fn read_be_u8(bytes: &[u8], ix: &mut usize) -> Result<u64, BytecodeError>
{
    let hi = read_be_u4(bytes, ix)? as u64;
    let lo = read_be_u4(bytes, ix)? as u64;
    Ok((hi << 32) | lo)
}

pub fn read_x(bytes: &[u8], ix: &mut usize, length: usize) -> Result<Vec<u8>, BytecodeError>
{
    require(bytes, *ix, length, "byte array")?;
    let v = bytes[*ix..*ix + length].to_vec();
    *ix += length;
    Ok(v)
}

/// Reads `count` consecutive records.
pub fn read_counted<T: Readable>(bytes: &[u8], ix: &mut usize, count: usize) -> Result<Vec<T>, BytecodeError>
{
    // Never trust a count for preallocation beyond what the buffer could hold.
    let mut v = Vec::with_capacity(count.min(bytes.len().saturating_sub(*ix)));
    for _ in 0..count { v.push(T::read(bytes, ix)?); }
    Ok(v)
}

pub fn expect_magic(bytes: &[u8], ix: &mut usize, magic: &[u8]) -> Result<(), BytecodeError>
{
    match bytes.get(*ix..*ix + magic.len())
    {
        Some(found) if found == magic => {
            *ix += magic.len();
            Ok(())
        }
        Some(found) => Err(err!(BadMagic, "Invalid magic value {:02x?}, expected {:02x?}", found, magic)),
        None => Err(err!(BadMagic, "Buffer too short for magic ({} bytes)", bytes.len())),
    }
}

pub fn write_u1(buffer: &mut Vec<u8>, val: u8) -> usize
{
    buffer.push(val);
    1
}

pub fn write_u2(buffer: &mut Vec<u8>, val: u16) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    2
}

pub fn write_u4(buffer: &mut Vec<u8>, val: u32) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    4
}

pub fn write_be_u2(buffer: &mut Vec<u8>, val: u16) -> usize
{
    buffer.extend_from_slice(&val.to_be_bytes());
    2
}

pub fn write_be_u4(buffer: &mut Vec<u8>, val: u32) -> usize
{
    buffer.extend_from_slice(&val.to_be_bytes());
    4
}

pub fn write_be_u8(buffer: &mut Vec<u8>, val: u64) -> usize
{
    buffer.extend_from_slice(&val.to_be_bytes());
    8
}

pub fn write_x(buffer: &mut Vec<u8>, val: &[u8]) -> usize
{
    buffer.extend_from_slice(val);
    val.len()
}

/// Round `value` up to the next multiple of `alignment` (a power of two).
pub fn align_to(value: u32, alignment: u32) -> Result<u32, BytecodeError>
{
    if alignment <= 1 {
        return Ok(value);
    }
    let mask = alignment - 1;
    match value.checked_add(mask) {
        Some(v) => Ok(v & !mask),
        None => Err(err!(TruncatedInput, "offset 0x{:x} cannot be aligned to {} within 32 bits", value, alignment)),
    }
}

/// Absolute offset of the end of `buffer`, which starts at `base`.
pub fn end_offset(buffer: &[u8], base: u32) -> Result<u32, BytecodeError>
{
    u32::try_from(buffer.len())
        .ok()
        .and_then(|len| base.checked_add(len))
        .ok_or_else(|| err!(TruncatedInput, "{} bytes after 0x{:x} exceed the 32-bit offset range", buffer.len(), base))
}

/// Zero-pad `buffer` so that `base + buffer.len()` is aligned.
pub fn pad_to(buffer: &mut Vec<u8>, base: u32, alignment: u32) -> Result<usize, BytecodeError>
{
    let here = end_offset(buffer, base)?;
    let pad = (align_to(here, alignment)? - here) as usize;
    buffer.resize(buffer.len() + pad, 0);
    Ok(pad)
}

/// An absolute offset into the original buffer where a `T` lives. Zero means the
/// section is absent. Nothing is parsed until [`Pointer::get`] is called.
pub struct Pointer<T>
{
    offset: u32,
    _item: PhantomData<fn() -> T>,
}

impl<T> Pointer<T>
{
    pub fn new(offset: u32) -> Self
    {
        Pointer { offset, _item: PhantomData }
    }

    pub fn null() -> Self
    {
        Pointer::new(0)
    }

    pub fn offset(&self) -> u32
    {
        self.offset
    }

    pub fn is_null(&self) -> bool
    {
        self.offset == 0
    }
}

impl<T: Readable> Pointer<T>
{
    pub fn get(&self, bytes: &[u8]) -> Result<Option<T>, BytecodeError>
    {
        if self.is_null() {
            return Ok(None);
        }
        let mut ix = self.offset as usize;
        if ix >= bytes.len() {
            fail!(TruncatedInput, "offset 0x{:x} is past end of buffer (0x{:x})", ix, bytes.len());
        }
        T::read(bytes, &mut ix).map(Some)
    }
}

impl<T: Readable> Readable for Pointer<T>
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<Self, BytecodeError>
    {
        Ok(Pointer::new(read_u4(bytes, ix)?))
    }
}

// Manual impls: `T` itself need not be Clone/Debug/Eq for its pointer to be.
impl<T> Clone for Pointer<T>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<T> Copy for Pointer<T> {}

impl<T> PartialEq for Pointer<T>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.offset == other.offset
    }
}

impl<T> Eq for Pointer<T> {}

impl<T> fmt::Debug for Pointer<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "Pointer(0x{:x})", self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[derive(Debug)]
    struct Pair(u16, u16);

    impl Readable for Pair {
        fn read(bytes: &[u8], ix: &mut usize) -> Result<Self, BytecodeError> {
            Ok(Pair(read_u2(bytes, ix)?, read_u2(bytes, ix)?))
        }
    }

    #[test]
    fn endian_reads() {
        let bytes = [0x12, 0x34, 0x56, 0x78];
        let mut ix = 0;
        assert_eq!(read_u4(&bytes, &mut ix).unwrap(), 0x78563412);
        ix = 0;
        assert_eq!(read_be_u4(&bytes, &mut ix).unwrap(), 0x12345678);
        assert_eq!(ix, 4);

        let wide = [1, 0, 0, 0, 2, 0, 0, 0];
        ix = 0;
        assert_eq!(read_u8(&wide, &mut ix).unwrap(), 0x0000_0002_0000_0001);
        ix = 0;
        assert_eq!(read_be_u8(&wide, &mut ix).unwrap(), 0x0100_0000_0200_0000);
    }

    #[test]
    fn short_read_is_truncated_input() {
        let bytes = [0x01];
        let mut ix = 0;
        let e = read_u2(&bytes, &mut ix).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::TruncatedInput);
        assert_eq!(ix, 0);
    }

    #[test]
    fn pointer_dereferences_backwards_and_forwards() {
        // Pair at 4, pointer to it at 0; second pointer at 8 points back to 0.
        let bytes = [4, 0, 0, 0, 1, 0, 2, 0, 0, 0, 0, 0];
        let mut ix = 0;
        let p: Pointer<Pair> = Pointer::read(&bytes, &mut ix).unwrap();
        let pair = p.get(&bytes).unwrap().unwrap();
        assert_eq!((pair.0, pair.1), (1, 2));

        let absent: Pointer<Pair> = Pointer::null();
        assert!(absent.get(&bytes).unwrap().is_none());

        let wild: Pointer<Pair> = Pointer::new(0x100);
        assert_eq!(wild.get(&bytes).unwrap_err().kind(), ErrorKind::TruncatedInput);
    }

    #[test]
    fn alignment() {
        assert_eq!(align_to(0, 4).unwrap(), 0);
        assert_eq!(align_to(5, 4).unwrap(), 8);
        assert_eq!(align_to(8, 4).unwrap(), 8);
        assert_eq!(align_to(7, 1).unwrap(), 7);
        assert_eq!(align_to(u32::MAX - 3, 4).unwrap(), u32::MAX - 3);
        assert_eq!(align_to(u32::MAX - 2, 4).unwrap_err().kind(), ErrorKind::TruncatedInput);

        let mut buf = vec![1, 2, 3];
        assert_eq!(pad_to(&mut buf, 0x70, 4).unwrap(), 1);
        assert_eq!(buf.len(), 4);

        let mut buf = vec![0];
        assert_eq!(pad_to(&mut buf, u32::MAX, 4).unwrap_err().kind(), ErrorKind::TruncatedInput);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn magic_mismatch() {
        let bytes = [0xCA, 0xFE, 0xBA, 0xBF];
        let mut ix = 0;
        let e = expect_magic(&bytes, &mut ix, &[0xCA, 0xFE, 0xBA, 0xBE]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::BadMagic);
    }
}
