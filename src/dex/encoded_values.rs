use crate::dex::{read_uleb128, write_uleb128};
use crate::error::BytecodeError;
use crate::layout::{read_u1, write_u1, write_x, Readable, Writable};

const VALUE_BYTE: u8 = 0x00;
const VALUE_SHORT: u8 = 0x02;
const VALUE_CHAR: u8 = 0x03;
const VALUE_INT: u8 = 0x04;
const VALUE_LONG: u8 = 0x06;
const VALUE_FLOAT: u8 = 0x10;
const VALUE_DOUBLE: u8 = 0x11;
const VALUE_STRING: u8 = 0x17;
const VALUE_TYPE: u8 = 0x18;
const VALUE_FIELD: u8 = 0x19;
const VALUE_METHOD: u8 = 0x1a;
const VALUE_ENUM: u8 = 0x1b;
const VALUE_ARRAY: u8 = 0x1c;
const VALUE_ANNOTATION: u8 = 0x1d;
const VALUE_NULL: u8 = 0x1e;
const VALUE_BOOLEAN: u8 = 0x1f;

/// Annotations and arrays nest; bound the depth so crafted input cannot blow the stack.
const MAX_NESTING: usize = 64;

#[derive(Debug, PartialEq, Clone)]
pub struct EncodedAnnotation {
    pub type_idx: u32,
    pub elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation {
    fn read_nested(bytes: &[u8], ix: &mut usize, depth: usize) -> Result<EncodedAnnotation, BytecodeError> {
        let type_idx = read_uleb128(bytes, ix)?;
        let size = read_uleb128(bytes, ix)? as usize;
        let mut elements = Vec::with_capacity(size.min(bytes.len()));

        for _ in 0..size {
            let name_idx = read_uleb128(bytes, ix)?;
            let value = EncodedValue::read_nested(bytes, ix, depth)?;
            elements.push(AnnotationElement { name_idx, value });
        }

        Ok(EncodedAnnotation { type_idx, elements })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut written_bytes = 0;

        written_bytes += write_uleb128(bytes, self.type_idx);
        written_bytes += write_uleb128(bytes, self.elements.len() as u32);

        for element in &self.elements {
            written_bytes += write_uleb128(bytes, element.name_idx);
            written_bytes += element.value.write(bytes);
        }

        written_bytes
    }
}

impl Readable for EncodedAnnotation {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<Self, BytecodeError> {
        EncodedAnnotation::read_nested(bytes, ix, 0)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct AnnotationElement {
    pub name_idx: u32,
    pub value: EncodedValue,
}

/// `encoded_value`: a one byte header (`value_arg << 5 | value_type`) followed by
/// a variable number of little-endian bytes.
#[derive(Debug, PartialEq, Clone)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(u32),
    Type(u32),
    Field(u32),
    Method(u32),
    Enum(u32),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl EncodedValue
{
    pub fn as_annotation(&self) -> Option<&EncodedAnnotation> {
        match self {
            EncodedValue::Annotation(ann) => Some(ann),
            _ => None,
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedValue, BytecodeError> {
        Self::read_nested(bytes, ix, 0)
    }

    fn read_nested(bytes: &[u8], ix: &mut usize, depth: usize) -> Result<EncodedValue, BytecodeError> {
        if depth > MAX_NESTING {
            fail!(UnknownTag, "encoded value nesting deeper than {} at 0x{:x}", MAX_NESTING, *ix);
        }
        let at = *ix;
        let header_byte = read_u1(bytes, ix)?;
        let value_arg = header_byte >> 5;
        let value_type = header_byte & 0x1F;
        let size = (value_arg + 1) as usize;

        let check = |max: usize| -> Result<(), BytecodeError> {
            if size > max {
                fail!(UnknownTag, "encoded value type 0x{:02x} with size {} at 0x{:x}", value_type, size, at);
            }
            Ok(())
        };

        Ok(match value_type {
            VALUE_BYTE => { check(1)?; EncodedValue::Byte(read_u1(bytes, ix)? as i8) }
            VALUE_SHORT => { check(2)?; EncodedValue::Short(read_signed(bytes, ix, size)? as i16) }
            VALUE_CHAR => { check(2)?; EncodedValue::Char(read_unsigned(bytes, ix, size)? as u16) }
            VALUE_INT => { check(4)?; EncodedValue::Int(read_signed(bytes, ix, size)? as i32) }
            VALUE_LONG => { check(8)?; EncodedValue::Long(read_signed(bytes, ix, size)?) }
            VALUE_FLOAT => {
                check(4)?;
                let bits = read_unsigned(bytes, ix, size)? << (8 * (4 - size));
                EncodedValue::Float(f32::from_bits(bits as u32))
            }
            VALUE_DOUBLE => {
                check(8)?;
                let bits = read_unsigned(bytes, ix, size)? << (8 * (8 - size));
                EncodedValue::Double(f64::from_bits(bits))
            }
            VALUE_STRING => { check(4)?; EncodedValue::String(read_unsigned(bytes, ix, size)? as u32) }
            VALUE_TYPE => { check(4)?; EncodedValue::Type(read_unsigned(bytes, ix, size)? as u32) }
            VALUE_FIELD => { check(4)?; EncodedValue::Field(read_unsigned(bytes, ix, size)? as u32) }
            VALUE_METHOD => { check(4)?; EncodedValue::Method(read_unsigned(bytes, ix, size)? as u32) }
            VALUE_ENUM => { check(4)?; EncodedValue::Enum(read_unsigned(bytes, ix, size)? as u32) }
            VALUE_ARRAY => EncodedValue::Array(read_array_nested(bytes, ix, depth + 1)?),
            VALUE_ANNOTATION => EncodedValue::Annotation(EncodedAnnotation::read_nested(bytes, ix, depth + 1)?),
            VALUE_NULL => EncodedValue::Null,
            VALUE_BOOLEAN => EncodedValue::Boolean(value_arg != 0),
            _ => fail!(UnknownTag, "unknown encoded value type 0x{:02x} at 0x{:x}", value_type, at),
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        match self {
            EncodedValue::Byte(val) => {
                write_u1(bytes, VALUE_BYTE) + write_u1(bytes, *val as u8)
            }
            EncodedValue::Short(v) => write_signed(bytes, VALUE_SHORT, *v as i64),
            EncodedValue::Char(v) => write_unsigned(bytes, VALUE_CHAR, *v as u64),
            EncodedValue::Int(v) => write_signed(bytes, VALUE_INT, *v as i64),
            EncodedValue::Long(v) => write_signed(bytes, VALUE_LONG, *v),
            EncodedValue::Float(v) => write_right_zero_extended(bytes, VALUE_FLOAT, v.to_bits().to_le_bytes().as_slice()),
            EncodedValue::Double(v) => write_right_zero_extended(bytes, VALUE_DOUBLE, v.to_bits().to_le_bytes().as_slice()),
            EncodedValue::String(v) => write_unsigned(bytes, VALUE_STRING, *v as u64),
            EncodedValue::Type(v) => write_unsigned(bytes, VALUE_TYPE, *v as u64),
            EncodedValue::Field(v) => write_unsigned(bytes, VALUE_FIELD, *v as u64),
            EncodedValue::Method(v) => write_unsigned(bytes, VALUE_METHOD, *v as u64),
            EncodedValue::Enum(v) => write_unsigned(bytes, VALUE_ENUM, *v as u64),
            EncodedValue::Array(values) => {
                write_u1(bytes, VALUE_ARRAY) + write_encoded_array(values, bytes)
            }
            EncodedValue::Annotation(value) => {
                write_u1(bytes, VALUE_ANNOTATION) + value.write(bytes)
            }
            EncodedValue::Null => write_u1(bytes, VALUE_NULL),
            EncodedValue::Boolean(val) => write_u1(bytes, VALUE_BOOLEAN | ((*val as u8) << 5)),
        }
    }
}

fn read_unsigned(bytes: &[u8], ix: &mut usize, size: usize) -> Result<u64, BytecodeError> {
    let mut result = 0u64;
    for i in 0..size {
        result |= (read_u1(bytes, ix)? as u64) << (8 * i);
    }
    Ok(result)
}

fn read_signed(bytes: &[u8], ix: &mut usize, size: usize) -> Result<i64, BytecodeError> {
    let raw = read_unsigned(bytes, ix, size)?;
    let shift = 64 - 8 * size as u32;
    Ok(((raw << shift) as i64) >> shift)
}

fn write_signed(bytes: &mut Vec<u8>, value_type: u8, v: i64) -> usize {
    // Smallest size whose sign extension reproduces the value
    let mut size = 1;
    while size < 8 {
        let shift = 64 - 8 * size as u32;
        if (v << shift) >> shift == v { break; }
        size += 1;
    }
    write_u1(bytes, ((size as u8 - 1) << 5) | value_type) + write_x(bytes, &v.to_le_bytes()[..size])
}

fn write_unsigned(bytes: &mut Vec<u8>, value_type: u8, v: u64) -> usize {
    let size = (8 - (v.leading_zeros() / 8) as usize).max(1);
    write_u1(bytes, ((size as u8 - 1) << 5) | value_type) + write_x(bytes, &v.to_le_bytes()[..size])
}

/// Floats keep their high-order bytes; trailing zero low-order bytes are dropped.
fn write_right_zero_extended(bytes: &mut Vec<u8>, value_type: u8, le: &[u8]) -> usize {
    let zeros = le.iter().take_while(|b| **b == 0).count().min(le.len() - 1);
    let kept = &le[zeros..];
    write_u1(bytes, ((kept.len() as u8 - 1) << 5) | value_type) + write_x(bytes, kept)
}

pub fn write_encoded_array(encoded_array: &[EncodedValue], bytes: &mut Vec<u8>) -> usize
{
    let mut c = 0;
    c += write_uleb128(bytes, encoded_array.len() as u32);

    for value in encoded_array {
        c += value.write(bytes);
    }

    c
}

fn read_array_nested(bytes: &[u8], ix: &mut usize, depth: usize) -> Result<Vec<EncodedValue>, BytecodeError>
{
    let size = read_uleb128(bytes, ix)? as usize;

    let mut values = Vec::with_capacity(size.min(bytes.len()));
    for _ in 0..size
    {
        values.push(EncodedValue::read_nested(bytes, ix, depth)?);
    }

    Ok(values)
}

/// `encoded_array_item`, e.g. a class's static field initial values.
#[derive(Debug, PartialEq, Clone)]
pub struct EncodedArrayItem(pub Vec<EncodedValue>);

impl Readable for EncodedArrayItem {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<Self, BytecodeError> {
        Ok(EncodedArrayItem(read_array_nested(bytes, ix, 0)?))
    }
}

impl Writable for EncodedArrayItem {
    fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_encoded_array(&self.0, bytes)
    }
}
