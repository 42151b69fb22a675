/* Dex file format structures */

use bitflags::bitflags;
use log::{debug, warn};

use crate::dex::annotations::AnnotationsDirectoryItem;
use crate::dex::encoded_values::EncodedArrayItem;
use crate::dex::{read_sleb128, read_uleb128, read_uleb128p1, write_sleb128, write_uleb128};
use crate::error::{BytecodeError, ResultExt};
use crate::layout::{
    expect_magic, read_counted, read_u1, read_u2, read_u4, read_x, write_u1, write_u2, write_u4, write_x,
    Pointer, Readable, Writable,
};
use crate::mutf8::JavaString;

/* Constants */
pub const DEX_FILE_MAGIC: [u8; 8] = [ 0x64, 0x65, 0x78, 0x0a, 0x30, 0x33, 0x35, 0x00 ];
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;
pub const NO_INDEX: u32 = 0xffffffff;
pub const HEADER_SIZE: u32 = 0x70;

/// What a missing superclass (`NO_INDEX`) resolves to.
pub const DEFAULT_SUPERCLASS: &str = "Ljava/lang/Object;";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DexAccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
        const _ = !0;
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Readable for Header
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<Header, BytecodeError>
    {
        expect_magic(bytes, ix, &DEX_FILE_MAGIC)?;
        if bytes.len() < HEADER_SIZE as usize {
            fail!(TruncatedInput, "Not enough bytes for header ({} < 0x70)", bytes.len());
        }

        let checksum = read_u4(bytes, ix)?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(&read_x(bytes, ix, 20)?);
        let file_size = read_u4(bytes, ix)?;
        let header_size = read_u4(bytes, ix)?;
        let endian_tag = read_u4(bytes, ix)?;
        if endian_tag != ENDIAN_CONSTANT {
            fail!(BadMagic, "Unsupported endian tag 0x{:08x}", endian_tag);
        }

        Ok(Header {
            magic: DEX_FILE_MAGIC,
            checksum,
            signature,
            file_size,
            header_size,
            endian_tag,
            link_size: read_u4(bytes, ix)?,
            link_off: read_u4(bytes, ix)?,
            map_off: read_u4(bytes, ix)?,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
            data_size: read_u4(bytes, ix)?,
            data_off: read_u4(bytes, ix)?,
        })
    }
}

impl Writable for Header
{
    fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_x(bytes, &self.magic);
        c += write_u4(bytes, self.checksum);
        c += write_x(bytes, &self.signature);
        c += write_u4(bytes, self.file_size);
        c += write_u4(bytes, self.header_size);
        c += write_u4(bytes, self.endian_tag);
        c += write_u4(bytes, self.link_size);
        c += write_u4(bytes, self.link_off);
        c += write_u4(bytes, self.map_off);
        c += write_u4(bytes, self.string_ids_size);
        c += write_u4(bytes, self.string_ids_off);
        c += write_u4(bytes, self.type_ids_size);
        c += write_u4(bytes, self.type_ids_off);
        c += write_u4(bytes, self.proto_ids_size);
        c += write_u4(bytes, self.proto_ids_off);
        c += write_u4(bytes, self.field_ids_size);
        c += write_u4(bytes, self.field_ids_off);
        c += write_u4(bytes, self.method_ids_size);
        c += write_u4(bytes, self.method_ids_off);
        c += write_u4(bytes, self.class_defs_size);
        c += write_u4(bytes, self.class_defs_off);
        c += write_u4(bytes, self.data_size);
        c += write_u4(bytes, self.data_off);
        c
    }
}


/// string_data_item: utf16 length followed by NUL-terminated modified UTF-8
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct StringDataItem
{
    pub utf16_size: u32,
    pub data: JavaString,
}

impl Readable for StringDataItem
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<StringDataItem, BytecodeError>
    {
        let utf16_size = read_uleb128(bytes, ix)?;
        let rest = bytes.get(*ix..).unwrap_or(&[]);
        let Some(len) = rest.iter().position(|b| *b == 0) else {
            fail!(TruncatedInput, "unterminated string data at 0x{:x}", *ix);
        };
        let data = JavaString::decode(&rest[..len]);
        *ix += len + 1;
        Ok(StringDataItem { utf16_size, data })
    }
}

impl Writable for StringDataItem
{
    fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_uleb128(bytes, self.utf16_size);
        c += write_x(bytes, &self.data.encode());
        c += write_u1(bytes, 0);
        c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringIdItem
{
    pub string_data_off: Pointer<StringDataItem>,
}

impl Readable for StringIdItem
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<Self, BytecodeError>
    {
        Ok(StringIdItem { string_data_off: Pointer::read(bytes, ix)? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeIdItem
{
    pub descriptor_idx: u32,
}

impl Readable for TypeIdItem
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<Self, BytecodeError>
    {
        Ok(TypeIdItem { descriptor_idx: read_u4(bytes, ix)? })
    }
}

impl Writable for TypeIdItem
{
    fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        write_u4(bytes, self.descriptor_idx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeList(pub Vec<u16>);

impl Readable for TypeList
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<TypeList, BytecodeError>
    {
        let size = read_u4(bytes, ix)? as usize;
        let mut v = Vec::with_capacity(size.min(bytes.len() / 2));
        for _ in 0..size { v.push(read_u2(bytes, ix)?); }
        Ok(TypeList(v))
    }
}

impl Writable for TypeList
{
    fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u4(bytes, self.0.len() as u32);
        for i in &self.0 { c += write_u2(bytes, *i); }
        c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoIdItem {
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    pub parameters_off: Pointer<TypeList>,
}

impl Readable for ProtoIdItem
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<Self, BytecodeError>
    {
        Ok(ProtoIdItem {
            shorty_idx: read_u4(bytes, ix)?,
            return_type_idx: read_u4(bytes, ix)?,
            parameters_off: Pointer::read(bytes, ix)?,
        })
    }
}

impl ProtoIdItem
{
    pub fn write_relocated(&self, bytes: &mut Vec<u8>, parameters_off: u32) -> usize
    {
        write_u4(bytes, self.shorty_idx) + write_u4(bytes, self.return_type_idx) + write_u4(bytes, parameters_off)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldIdItem {
    pub class_idx: u16,
    pub type_idx: u16,
    pub name_idx: u32,
}

impl Readable for FieldIdItem
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<FieldIdItem, BytecodeError>
    {
        Ok(FieldIdItem {
            class_idx: read_u2(bytes, ix)?,
            type_idx: read_u2(bytes, ix)?,
            name_idx: read_u4(bytes, ix)?,
        })
    }
}

impl Writable for FieldIdItem
{
    fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        write_u2(bytes, self.class_idx) + write_u2(bytes, self.type_idx) + write_u4(bytes, self.name_idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodIdItem {
    pub class_idx: u16,
    pub proto_idx: u16,
    pub name_idx: u32,
}

impl Readable for MethodIdItem
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodIdItem, BytecodeError>
    {
        Ok(MethodIdItem {
            class_idx: read_u2(bytes, ix)?,
            proto_idx: read_u2(bytes, ix)?,
            name_idx: read_u4(bytes, ix)?,
        })
    }
}

impl Writable for MethodIdItem
{
    fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        write_u2(bytes, self.class_idx) + write_u2(bytes, self.proto_idx) + write_u4(bytes, self.name_idx)
    }
}


pub const DBG_END_SEQUENCE: u8 = 0x00;
pub const DBG_ADVANCE_PC: u8 = 0x01;
pub const DBG_ADVANCE_LINE: u8 = 0x02;
pub const DBG_START_LOCAL: u8 = 0x03;
pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
pub const DBG_END_LOCAL: u8 = 0x05;
pub const DBG_RESTART_LOCAL: u8 = 0x06;
pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
pub const DBG_SET_FILE: u8 = 0x09;

/// debug_info_item, kept as its raw byte stream. The state machine is walked
/// only to find where the item ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfoItem
{
    pub line_start: u32,
    pub raw: Vec<u8>,
}

impl Readable for DebugInfoItem
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<DebugInfoItem, BytecodeError>
    {
        let start = *ix;
        let line_start = read_uleb128(bytes, ix)?;
        let parameters_size = read_uleb128(bytes, ix)?;
        for _ in 0..parameters_size { read_uleb128p1(bytes, ix)?; }

        loop
        {
            match read_u1(bytes, ix)?
            {
                DBG_END_SEQUENCE => break,
                DBG_ADVANCE_PC | DBG_END_LOCAL | DBG_RESTART_LOCAL => { read_uleb128(bytes, ix)?; }
                DBG_ADVANCE_LINE => { read_sleb128(bytes, ix)?; }
                DBG_START_LOCAL => {
                    read_uleb128(bytes, ix)?;
                    read_uleb128p1(bytes, ix)?;
                    read_uleb128p1(bytes, ix)?;
                }
                DBG_START_LOCAL_EXTENDED => {
                    read_uleb128(bytes, ix)?;
                    read_uleb128p1(bytes, ix)?;
                    read_uleb128p1(bytes, ix)?;
                    read_uleb128p1(bytes, ix)?;
                }
                DBG_SET_FILE => { read_uleb128p1(bytes, ix)?; }
                // prologue/epilogue markers and special opcodes carry no operands
                _ => {}
            }
        }

        Ok(DebugInfoItem { line_start, raw: bytes[start..*ix].to_vec() })
    }
}

impl Writable for DebugInfoItem
{
    fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        write_x(bytes, &self.raw)
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTypeAddrPair {
    pub type_idx: u32,
    pub addr: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    /// Index into the owning code item's `handlers`
    pub handler: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCatchHandler {
    pub handlers: Vec<EncodedTypeAddrPair>,
    pub catch_all_addr: Option<u32>,
}

impl Readable for EncodedCatchHandler {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedCatchHandler, BytecodeError> {
        let size = read_sleb128(bytes, ix)?;
        let count = size.unsigned_abs() as usize;
        let mut pairs = Vec::with_capacity(count.min(bytes.len() / 2));
        for _ in 0..count {
            pairs.push(EncodedTypeAddrPair { type_idx: read_uleb128(bytes, ix)?, addr: read_uleb128(bytes, ix)? });
        }
        let catch_all_addr = if size <= 0 { Some(read_uleb128(bytes, ix)?) } else { None };
        Ok(EncodedCatchHandler { handlers: pairs, catch_all_addr })
    }
}

impl Writable for EncodedCatchHandler {
    fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        let size: i32 = if self.catch_all_addr.is_some() { -(self.handlers.len() as i32) } else { self.handlers.len() as i32 };
        c += write_sleb128(bytes, size);
        for p in &self.handlers {
            c += write_uleb128(bytes, p.type_idx);
            c += write_uleb128(bytes, p.addr);
        }
        if let Some(addr) = self.catch_all_addr { c += write_uleb128(bytes, addr); }
        c
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeItem
{
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub debug_info_off: Pointer<DebugInfoItem>,
    /// Instruction stream in 16-bit code units
    pub insns: Vec<u16>,
    pub tries: Vec<TryItem>,
    pub handlers: Vec<EncodedCatchHandler>,
}

impl Readable for CodeItem
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<CodeItem, BytecodeError>
    {
        let code_item_start = *ix;
        let registers_size = read_u2(bytes, ix)?;
        let ins_size = read_u2(bytes, ix)?;
        let outs_size = read_u2(bytes, ix)?;
        let tries_size = read_u2(bytes, ix)?;
        let debug_info_off = Pointer::read(bytes, ix)?;

        let insns_size = read_u4(bytes, ix)? as usize;
        if insns_size * 2 > bytes.len().saturating_sub(*ix) {
            fail!(TruncatedInput, "insns_size {} at 0x{:x} runs past end of buffer", insns_size, code_item_start);
        }
        let mut insns = Vec::with_capacity(insns_size);
        for _ in 0..insns_size { insns.push(read_u2(bytes, ix)?); }

        let mut tries = vec![];
        let mut handlers = vec![];

        if tries_size > 0 {
            // Optional 2-byte padding so the tries start on a 4-byte boundary
            if (insns_size & 1) != 0 {
                let padding = read_u2(bytes, ix)?;
                if padding != 0 {
                    warn!(
                        "[codeitem] non-zero padding 0x{:04x} at 0x{:x} (code_item_start=0x{:x})",
                        padding, *ix - 2, code_item_start
                    );
                }
            }

            let mut raw_tries = Vec::with_capacity(tries_size as usize);
            for _ in 0..tries_size {
                raw_tries.push((read_u4(bytes, ix)?, read_u2(bytes, ix)?, read_u2(bytes, ix)?));
            }

            // encoded_catch_handler_list; try items address entries by byte offset from its start
            let list_start = *ix;
            let handlers_size = read_uleb128(bytes, ix)? as usize;
            let mut offsets = Vec::with_capacity(handlers_size.min(bytes.len()));
            for i in 0..handlers_size {
                offsets.push(*ix - list_start);
                let h = EncodedCatchHandler::read(bytes, ix).context(|| format!(
                    "EncodedCatchHandler #{}/{} (code_item_start=0x{:x})", i + 1, handlers_size, code_item_start
                ))?;
                handlers.push(h);
            }

            for (ti, (start_addr, insn_count, handler_off)) in raw_tries.into_iter().enumerate() {
                let Some(handler) = offsets.iter().position(|o| *o == handler_off as usize) else {
                    fail!(
                        DanglingReference,
                        "try #{} handler_off {} does not start a handler (code_item_start=0x{:x})",
                        ti, handler_off, code_item_start
                    );
                };
                tries.push(TryItem { start_addr, insn_count, handler });
            }
        }

        Ok(CodeItem { registers_size, ins_size, outs_size, debug_info_off, insns, tries, handlers })
    }
}

impl CodeItem
{
    /// Little-endian byte view of the instruction stream.
    pub fn code_bytes(&self) -> Vec<u8>
    {
        let mut bc = Vec::with_capacity(self.insns.len() * 2);
        for u in &self.insns { bc.extend_from_slice(&u.to_le_bytes()); }
        bc
    }

    /// A copy of this code item with a new instruction stream. Try ranges are kept
    /// as they are and must still fit inside the new stream.
    pub fn with_code(&self, code: &[u8]) -> Result<CodeItem, BytecodeError>
    {
        if code.len() % 2 != 0 {
            fail!(UnsupportedRebuildEdit, "Dalvik body of {} bytes is not whole code units", code.len());
        }
        let insns: Vec<u16> = code.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])).collect();
        for t in &self.tries {
            let end = t.start_addr as usize + t.insn_count as usize;
            if end > insns.len() {
                fail!(
                    UnsupportedRebuildEdit,
                    "try range 0x{:x}..0x{:x} falls outside new body of {} code units",
                    t.start_addr, end, insns.len()
                );
            }
        }
        Ok(CodeItem { insns, ..self.clone() })
    }

    /// Fails when the encoded handler list grows past what a `u16` try
    /// offset can address.
    pub fn write_relocated(&self, bytes: &mut Vec<u8>, debug_info_off: u32) -> Result<usize, BytecodeError>
    {
        let mut c = 0;
        c += write_u2(bytes, self.registers_size);
        c += write_u2(bytes, self.ins_size);
        c += write_u2(bytes, self.outs_size);
        c += write_u2(bytes, self.tries.len() as u16);
        c += write_u4(bytes, debug_info_off);
        c += write_u4(bytes, self.insns.len() as u32);
        for i in &self.insns { c += write_u2(bytes, *i); }

        if self.tries.is_empty() {
            return Ok(c);
        }
        if (self.insns.len() & 1) != 0 {
            c += write_u2(bytes, 0);
        }

        let mut list = vec![];
        let mut offsets = Vec::with_capacity(self.handlers.len());
        write_uleb128(&mut list, self.handlers.len() as u32);
        for (i, h) in self.handlers.iter().enumerate() {
            let Ok(off) = u16::try_from(list.len()) else {
                fail!(UnsupportedRebuildEdit, "catch handler #{} starts at byte {} of the handler list, past u16 range", i, list.len());
            };
            offsets.push(off);
            h.write(&mut list);
        }

        for t in &self.tries {
            c += write_u4(bytes, t.start_addr);
            c += write_u2(bytes, t.insn_count);
            c += write_u2(bytes, offsets.get(t.handler).copied().unwrap_or(0));
        }
        c += write_x(bytes, &list);
        Ok(c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedField
{
    pub field_idx: u32,
    pub access_flags: DexAccessFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMethod
{
    pub method_idx: u32,
    pub access_flags: DexAccessFlags,
    pub code_off: Pointer<CodeItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassDataItem {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

/// Indices in class data are stored as deltas from the previous entry.
fn next_index(prev: u32, bytes: &[u8], ix: &mut usize) -> Result<u32, BytecodeError>
{
    let at = *ix;
    let diff = read_uleb128(bytes, ix)?;
    prev.checked_add(diff).ok_or_else(|| err!(MalformedVarInt, "index delta at 0x{:x} overflows", at))
}

fn read_fields(bytes: &[u8], ix: &mut usize, count: u32) -> Result<Vec<EncodedField>, BytecodeError>
{
    let mut fields = Vec::with_capacity((count as usize).min(bytes.len()));
    let mut index = 0;
    for _ in 0..count {
        index = next_index(index, bytes, ix)?;
        fields.push(EncodedField { field_idx: index, access_flags: DexAccessFlags::from_bits_retain(read_uleb128(bytes, ix)?) });
    }
    Ok(fields)
}

fn read_methods(bytes: &[u8], ix: &mut usize, count: u32) -> Result<Vec<EncodedMethod>, BytecodeError>
{
    let mut methods = Vec::with_capacity((count as usize).min(bytes.len()));
    let mut index = 0;
    for _ in 0..count {
        index = next_index(index, bytes, ix)?;
        let access_flags = DexAccessFlags::from_bits_retain(read_uleb128(bytes, ix)?);
        let code_off = Pointer::new(read_uleb128(bytes, ix)?);
        methods.push(EncodedMethod { method_idx: index, access_flags, code_off });
    }
    Ok(methods)
}

impl Readable for ClassDataItem
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDataItem, BytecodeError>
    {
        let static_field_size = read_uleb128(bytes, ix)?;
        let instance_field_size = read_uleb128(bytes, ix)?;
        let direct_method_size = read_uleb128(bytes, ix)?;
        let virtual_method_size = read_uleb128(bytes, ix)?;

        Ok(ClassDataItem {
            static_fields: read_fields(bytes, ix, static_field_size)?,
            instance_fields: read_fields(bytes, ix, instance_field_size)?,
            direct_methods: read_methods(bytes, ix, direct_method_size)?,
            virtual_methods: read_methods(bytes, ix, virtual_method_size)?,
        })
    }
}

impl ClassDataItem
{
    pub fn methods(&self) -> impl Iterator<Item = &EncodedMethod>
    {
        self.direct_methods.iter().chain(self.virtual_methods.iter())
    }

    pub fn write_relocated(&self, bytes: &mut Vec<u8>, code_off: impl Fn(&EncodedMethod) -> u32) -> usize
    {
        let mut c = 0;
        c += write_uleb128(bytes, self.static_fields.len() as u32);
        c += write_uleb128(bytes, self.instance_fields.len() as u32);
        c += write_uleb128(bytes, self.direct_methods.len() as u32);
        c += write_uleb128(bytes, self.virtual_methods.len() as u32);

        for fields in [&self.static_fields, &self.instance_fields] {
            let mut last = 0;
            for f in fields {
                c += write_uleb128(bytes, f.field_idx.wrapping_sub(last));
                last = f.field_idx;
                c += write_uleb128(bytes, f.access_flags.bits());
            }
        }

        for methods in [&self.direct_methods, &self.virtual_methods] {
            let mut last = 0;
            for m in methods {
                c += write_uleb128(bytes, m.method_idx.wrapping_sub(last));
                last = m.method_idx;
                c += write_uleb128(bytes, m.access_flags.bits());
                c += write_uleb128(bytes, code_off(m));
            }
        }

        c
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassDefItem {
    pub class_idx: u32,
    pub access_flags: DexAccessFlags,
    pub superclass_idx: u32,
    pub interfaces_off: Pointer<TypeList>,
    pub source_file_idx: u32,
    pub annotations_off: Pointer<AnnotationsDirectoryItem>,
    pub class_data_off: Pointer<ClassDataItem>,
    pub static_values_off: Pointer<EncodedArrayItem>,
}

impl Readable for ClassDefItem
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDefItem, BytecodeError>
    {
        Ok(ClassDefItem {
            class_idx: read_u4(bytes, ix)?,
            access_flags: DexAccessFlags::from_bits_retain(read_u4(bytes, ix)?),
            superclass_idx: read_u4(bytes, ix)?,
            interfaces_off: Pointer::read(bytes, ix)?,
            source_file_idx: read_u4(bytes, ix)?,
            annotations_off: Pointer::read(bytes, ix)?,
            class_data_off: Pointer::read(bytes, ix)?,
            static_values_off: Pointer::read(bytes, ix)?,
        })
    }
}

/// Final data-section offsets of everything a class_def_item points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassDefOffsets {
    pub interfaces_off: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

impl ClassDefItem
{
    /// Write a `class_def_item` using provided offsets for referenced sections.
    /// This does not serialize the referenced sections themselves.
    pub fn write_relocated(&self, bytes: &mut Vec<u8>, offsets: &ClassDefOffsets) -> usize {
        let mut c = 0;
        c += write_u4(bytes, self.class_idx);
        c += write_u4(bytes, self.access_flags.bits());
        c += write_u4(bytes, self.superclass_idx);
        c += write_u4(bytes, offsets.interfaces_off);
        c += write_u4(bytes, self.source_file_idx);
        c += write_u4(bytes, offsets.annotations_off);
        c += write_u4(bytes, offsets.class_data_off);
        c += write_u4(bytes, offsets.static_values_off);
        c
    }
}


/// A parsed but unresolved DEX file: the header, the six id tables, and the
/// original bytes every [`Pointer`] is dereferenced against.
#[derive(Debug, Clone)]
pub struct DexFile {
    pub header: Header,
    pub string_ids: Vec<StringIdItem>,
    pub type_ids: Vec<TypeIdItem>,
    pub proto_ids: Vec<ProtoIdItem>,
    pub field_ids: Vec<FieldIdItem>,
    pub method_ids: Vec<MethodIdItem>,
    pub class_defs: Vec<ClassDefItem>,
    pub data: Vec<u8>,
}

fn read_table<T: Readable>(bytes: &[u8], name: &str, size: u32, off: u32, width: usize) -> Result<Vec<T>, BytecodeError>
{
    if size == 0 {
        return Ok(vec![]);
    }
    let end = (off as usize).checked_add(size as usize * width);
    if end.map_or(true, |end| end > bytes.len()) {
        fail!(TruncatedInput, "{} table ({} x {} bytes at 0x{:x}) exceeds file size 0x{:x}", name, size, width, off, bytes.len());
    }
    let mut ix = off as usize;
    debug!("reading {} {} at 0x{:x}", size, name, off);
    read_counted(bytes, &mut ix, size as usize).context(|| name.to_string())
}

impl DexFile {

    pub fn from_bytes(bytes: &[u8]) -> Result<DexFile, BytecodeError>
    {
        let mut ix = 0;
        let header = Header::read(bytes, &mut ix)?;
        if header.file_size as usize != bytes.len() {
            warn!("header file_size 0x{:x} differs from buffer length 0x{:x}", header.file_size, bytes.len());
        }

        Ok(DexFile {
            string_ids: read_table(bytes, "string_ids", header.string_ids_size, header.string_ids_off, 4)?,
            type_ids: read_table(bytes, "type_ids", header.type_ids_size, header.type_ids_off, 4)?,
            proto_ids: read_table(bytes, "proto_ids", header.proto_ids_size, header.proto_ids_off, 12)?,
            field_ids: read_table(bytes, "field_ids", header.field_ids_size, header.field_ids_off, 8)?,
            method_ids: read_table(bytes, "method_ids", header.method_ids_size, header.method_ids_off, 8)?,
            class_defs: read_table(bytes, "class_defs", header.class_defs_size, header.class_defs_off, 32)?,
            header,
            data: bytes.to_vec(),
        })
    }

    /// Follow an offset pointer into this file.
    pub fn deref<T: Readable>(&self, pointer: Pointer<T>) -> Result<Option<T>, BytecodeError>
    {
        pointer.get(&self.data).context(|| format!("item at 0x{:x}", pointer.offset()))
    }

    pub fn string_data(&self, idx: u32) -> Result<StringDataItem, BytecodeError>
    {
        let Some(id) = self.string_ids.get(idx as usize) else {
            fail!(DanglingReference, "string index {} out of range ({} strings)", idx, self.string_ids.len());
        };
        match self.deref(id.string_data_off)? {
            Some(s) => Ok(s),
            None => Err(err!(DanglingReference, "string {} has no string data", idx)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn header_bytes() -> Vec<u8> {
        let header = Header {
            magic: DEX_FILE_MAGIC,
            checksum: 0x11223344,
            signature: [7; 20],
            file_size: HEADER_SIZE,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0, link_off: 0, map_off: 0,
            string_ids_size: 0, string_ids_off: 0,
            type_ids_size: 0, type_ids_off: 0,
            proto_ids_size: 0, proto_ids_off: 0,
            field_ids_size: 0, field_ids_off: 0,
            method_ids_size: 0, method_ids_off: 0,
            class_defs_size: 0, class_defs_off: 0,
            data_size: 0, data_off: 0,
        };
        let mut bytes = vec![];
        header.write(&mut bytes);
        bytes
    }

    #[test]
    fn test_header_round_trip()
    {
        let bytes = header_bytes();
        assert_eq!(bytes.len(), 0x70);
        let mut ix = 0;
        let header = Header::read(&bytes, &mut ix).expect("Failed to parse DEX header");
        let mut encoded_bytes = vec![];
        header.write(&mut encoded_bytes);
        assert_eq!(encoded_bytes, bytes);
    }

    #[test]
    fn corrupted_magic_is_bad_magic()
    {
        let mut bytes = header_bytes();
        bytes[5] = b'9';
        let e = DexFile::from_bytes(&bytes).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::BadMagic);
    }

    #[test]
    fn reverse_endian_rejected()
    {
        let mut bytes = header_bytes();
        bytes[40..44].copy_from_slice(&REVERSE_ENDIAN_CONSTANT.to_le_bytes());
        assert_eq!(DexFile::from_bytes(&bytes).unwrap_err().kind(), ErrorKind::BadMagic);
    }

    #[test]
    fn table_past_end_is_truncated()
    {
        let mut bytes = header_bytes();
        // string_ids_size = 4 at offset 0x70, but the file ends there
        bytes[56..60].copy_from_slice(&4u32.to_le_bytes());
        bytes[60..64].copy_from_slice(&0x70u32.to_le_bytes());
        assert_eq!(DexFile::from_bytes(&bytes).unwrap_err().kind(), ErrorKind::TruncatedInput);
    }

    #[test]
    fn string_data_with_embedded_nul()
    {
        let bytes = [0x03, b'a', 0xC0, 0x80, b'b', 0x00];
        let mut ix = 0;
        let s = StringDataItem::read(&bytes, &mut ix).unwrap();
        assert_eq!(ix, bytes.len());
        assert_eq!(s.data.as_str(), Some("a\0b"));
        let mut out = vec![];
        s.write(&mut out);
        assert_eq!(out, bytes);
    }

    #[test]
    fn code_item_round_trip_with_tries()
    {
        let code = CodeItem {
            registers_size: 2,
            ins_size: 1,
            outs_size: 1,
            debug_info_off: Pointer::null(),
            insns: vec![0x0012, 0x000e, 0x000e],
            tries: vec![
                TryItem { start_addr: 0, insn_count: 1, handler: 1 },
                TryItem { start_addr: 1, insn_count: 1, handler: 0 },
            ],
            handlers: vec![
                EncodedCatchHandler { handlers: vec![], catch_all_addr: Some(2) },
                EncodedCatchHandler {
                    handlers: vec![EncodedTypeAddrPair { type_idx: 3, addr: 2 }],
                    catch_all_addr: None,
                },
            ],
        };
        let mut bytes = vec![];
        let n = code.write_relocated(&mut bytes, 0).unwrap();
        assert_eq!(n, bytes.len());
        // 16 header + 6 insns + 2 padding brings the tries to offset 24
        assert_eq!(bytes[22..24], [0, 0]);

        let mut ix = 0;
        let back = CodeItem::read(&bytes, &mut ix).unwrap();
        assert_eq!(ix, bytes.len());
        assert_eq!(back, code);
    }

    #[test]
    fn handler_list_past_u16_offsets_is_rejected()
    {
        // 3 bytes per handler, so the last ones start past 0xffff
        let code = CodeItem {
            registers_size: 1,
            ins_size: 0,
            outs_size: 0,
            debug_info_off: Pointer::null(),
            insns: vec![0x000e],
            tries: vec![TryItem { start_addr: 0, insn_count: 1, handler: 0 }],
            handlers: vec![EncodedCatchHandler { handlers: vec![], catch_all_addr: Some(0x3fff) }; 30_000],
        };
        let mut bytes = vec![];
        let err = code.write_relocated(&mut bytes, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedRebuildEdit);
    }

    #[test]
    fn code_edit_must_keep_tries_in_range()
    {
        let code = CodeItem {
            registers_size: 1,
            ins_size: 0,
            outs_size: 0,
            debug_info_off: Pointer::null(),
            insns: vec![0, 0, 0x000e],
            tries: vec![TryItem { start_addr: 1, insn_count: 2, handler: 0 }],
            handlers: vec![EncodedCatchHandler { handlers: vec![], catch_all_addr: Some(2) }],
        };
        assert_eq!(code.with_code(&[0x0e, 0x00]).unwrap_err().kind(), ErrorKind::UnsupportedRebuildEdit);
        assert_eq!(code.with_code(&[0x0e]).unwrap_err().kind(), ErrorKind::UnsupportedRebuildEdit);
        let edited = code.with_code(&[0, 0, 0, 0, 0x0e, 0]).unwrap();
        assert_eq!(edited.insns, vec![0, 0, 0x000e]);
    }

    #[test]
    fn class_data_deltas()
    {
        let cd = ClassDataItem {
            static_fields: vec![],
            instance_fields: vec![
                EncodedField { field_idx: 2, access_flags: DexAccessFlags::PRIVATE },
                EncodedField { field_idx: 5, access_flags: DexAccessFlags::FINAL },
            ],
            direct_methods: vec![EncodedMethod {
                method_idx: 1,
                access_flags: DexAccessFlags::PUBLIC | DexAccessFlags::CONSTRUCTOR,
                code_off: Pointer::new(0x1234),
            }],
            virtual_methods: vec![],
        };
        let mut bytes = vec![];
        cd.write_relocated(&mut bytes, |m| m.code_off.offset());
        let mut ix = 0;
        assert_eq!(ClassDataItem::read(&bytes, &mut ix).unwrap(), cd);
    }

    #[test]
    fn debug_info_extent()
    {
        // line_start 1, one parameter (NO_INDEX), advance pc, special opcode, end
        let bytes = [0x01, 0x01, 0x00, DBG_ADVANCE_PC, 0x02, 0x0e, DBG_END_SEQUENCE, 0xAA];
        let mut ix = 0;
        let d = DebugInfoItem::read(&bytes, &mut ix).unwrap();
        assert_eq!(ix, 7);
        assert_eq!(d.line_start, 1);
        assert_eq!(d.raw, bytes[..7].to_vec());
    }
}
