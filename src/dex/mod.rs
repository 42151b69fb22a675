//! Android DEX (version 035) containers: raw model, resolver, Dalvik
//! disassembler and rebuild.

pub(crate) mod annotations;
pub(crate) mod builder;
pub(crate) mod dex_file;
pub(crate) mod encoded_values;
pub mod leb;
pub(crate) mod opcodes;
pub(crate) mod resolve;

pub use annotations::{AnnotationItem, AnnotationSetItem, AnnotationSetRefList, AnnotationsDirectoryItem};
pub use builder::RebuildOptions;
pub use dex_file::*;
pub use encoded_values::{AnnotationElement, EncodedAnnotation, EncodedArrayItem, EncodedValue};
pub use opcodes::DalvikDisassembler;
pub use resolve::{ClassData, ClassDef, DexGraph, FieldRef, MethodRef, Proto, ResolvedField, ResolvedMethod};

use crate::dex::leb::{decode_sleb128, decode_uleb128, decode_uleb128p1, encode_sleb128, encode_uleb128};
use crate::error::{BytecodeError, ResultExt};

// LEB128 reads at a cursor, with the offset attached on failure
pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<u32, BytecodeError>
{
    let start = *ix;
    let (size, val) = decode_uleb128(bytes.get(*ix..).unwrap_or(&[]))
        .context(|| format!("uleb128 at 0x{:x}", start))?;
    *ix += size;
    Ok(val)
}

pub(crate) fn read_sleb128(bytes: &[u8], ix: &mut usize) -> Result<i32, BytecodeError>
{
    let start = *ix;
    let (size, val) = decode_sleb128(bytes.get(*ix..).unwrap_or(&[]))
        .context(|| format!("sleb128 at 0x{:x}", start))?;
    *ix += size;
    Ok(val)
}

pub(crate) fn read_uleb128p1(bytes: &[u8], ix: &mut usize) -> Result<i32, BytecodeError>
{
    let start = *ix;
    let (size, val) = decode_uleb128p1(bytes.get(*ix..).unwrap_or(&[]))
        .context(|| format!("uleb128p1 at 0x{:x}", start))?;
    *ix += size;
    Ok(val)
}

pub(crate) fn write_uleb128(buffer: &mut Vec<u8>, val: u32) -> usize
{
    let encoded = encode_uleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_sleb128(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_sleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}
