/* JVM class file structures */

use bitflags::bitflags;
use log::{debug, warn};

use crate::classfile::constant_pool::ConstantPool;
use crate::error::{BytecodeError, ResultExt};
use crate::layout::{
    expect_magic, read_be_u2, read_be_u4, read_counted, read_x, write_be_u2, write_be_u4, write_x, Readable, Writable,
};

pub const CLASS_FILE_MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
        const _ = !0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
        const _ = !0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const _ = !0;
    }
}

/// A generic attribute: name index plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub attribute_name_index: u16,
    pub info: Vec<u8>,
}

impl Readable for AttributeInfo {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<AttributeInfo, BytecodeError> {
        let attribute_name_index = read_be_u2(bytes, ix)?;
        let length = read_be_u4(bytes, ix)? as usize;
        let info = read_x(bytes, ix, length).context(|| format!("attribute payload of {} bytes", length))?;
        Ok(AttributeInfo { attribute_name_index, info })
    }
}

impl Writable for AttributeInfo {
    fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_be_u2(bytes, self.attribute_name_index)
            + write_be_u4(bytes, self.info.len() as u32)
            + write_x(bytes, &self.info)
    }
}

fn read_attributes(bytes: &[u8], ix: &mut usize) -> Result<Vec<AttributeInfo>, BytecodeError> {
    let count = read_be_u2(bytes, ix)? as usize;
    read_counted(bytes, ix, count)
}

fn write_attributes(bytes: &mut Vec<u8>, attributes: &[AttributeInfo]) -> usize {
    let mut c = write_be_u2(bytes, attributes.len() as u16);
    for a in attributes {
        c += a.write(bytes);
    }
    c
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl Readable for FieldInfo {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<FieldInfo, BytecodeError> {
        Ok(FieldInfo {
            access_flags: FieldAccessFlags::from_bits_retain(read_be_u2(bytes, ix)?),
            name_index: read_be_u2(bytes, ix)?,
            descriptor_index: read_be_u2(bytes, ix)?,
            attributes: read_attributes(bytes, ix)?,
        })
    }
}

impl Writable for FieldInfo {
    fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_be_u2(bytes, self.access_flags.bits())
            + write_be_u2(bytes, self.name_index)
            + write_be_u2(bytes, self.descriptor_index)
            + write_attributes(bytes, &self.attributes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl Readable for MethodInfo {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodInfo, BytecodeError> {
        Ok(MethodInfo {
            access_flags: MethodAccessFlags::from_bits_retain(read_be_u2(bytes, ix)?),
            name_index: read_be_u2(bytes, ix)?,
            descriptor_index: read_be_u2(bytes, ix)?,
            attributes: read_attributes(bytes, ix)?,
        })
    }
}

impl Writable for MethodInfo {
    fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_be_u2(bytes, self.access_flags.bits())
            + write_be_u2(bytes, self.name_index)
            + write_be_u2(bytes, self.descriptor_index)
            + write_attributes(bytes, &self.attributes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// 0 catches everything
    pub catch_type: u16,
}

/// Payload of a `Code` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn from_bytes(info: &[u8]) -> Result<CodeAttribute, BytecodeError> {
        let mut ix = 0;
        let max_stack = read_be_u2(info, &mut ix)?;
        let max_locals = read_be_u2(info, &mut ix)?;
        let code_length = read_be_u4(info, &mut ix)? as usize;
        let code = read_x(info, &mut ix, code_length).context(|| format!("code of {} bytes", code_length))?;
        let table_length = read_be_u2(info, &mut ix)?;
        let mut exception_table = Vec::with_capacity(table_length as usize);
        for _ in 0..table_length {
            exception_table.push(ExceptionTableEntry {
                start_pc: read_be_u2(info, &mut ix)?,
                end_pc: read_be_u2(info, &mut ix)?,
                handler_pc: read_be_u2(info, &mut ix)?,
                catch_type: read_be_u2(info, &mut ix)?,
            });
        }
        let attributes = read_attributes(info, &mut ix)?;
        if ix != info.len() {
            warn!("Code attribute has {} unused trailing bytes", info.len() - ix);
        }
        Ok(CodeAttribute { max_stack, max_locals, code, exception_table, attributes })
    }

    /// Serialize the payload; `code_length` is taken from the current code.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(12 + self.code.len() + self.exception_table.len() * 8);
        write_be_u2(&mut bytes, self.max_stack);
        write_be_u2(&mut bytes, self.max_locals);
        write_be_u4(&mut bytes, self.code.len() as u32);
        write_x(&mut bytes, &self.code);
        write_be_u2(&mut bytes, self.exception_table.len() as u16);
        for e in &self.exception_table {
            write_be_u2(&mut bytes, e.start_pc);
            write_be_u2(&mut bytes, e.end_pc);
            write_be_u2(&mut bytes, e.handler_pc);
            write_be_u2(&mut bytes, e.catch_type);
        }
        write_attributes(&mut bytes, &self.attributes);
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFileAttribute {
    pub sourcefile_index: u16,
}

impl SourceFileAttribute {
    pub fn from_bytes(info: &[u8]) -> Result<SourceFileAttribute, BytecodeError> {
        if info.len() != 2 {
            fail!(TruncatedInput, "SourceFile attribute must be 2 bytes, found {}", info.len());
        }
        Ok(SourceFileAttribute { sourcefile_index: u16::from_be_bytes([info[0], info[1]]) })
    }

    pub fn from_attribute(attribute: &AttributeInfo) -> Result<SourceFileAttribute, BytecodeError> {
        Self::from_bytes(&attribute.info)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    /// 0 only for `java/lang/Object`
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    pub fn from_bytes(bytes: &[u8]) -> Result<ClassFile, BytecodeError> {
        let mut ix = 0;
        expect_magic(bytes, &mut ix, &CLASS_FILE_MAGIC)?;
        let minor_version = read_be_u2(bytes, &mut ix)?;
        let major_version = read_be_u2(bytes, &mut ix)?;
        debug!("class file version {}.{}", major_version, minor_version);

        let constant_pool = ConstantPool::read(bytes, &mut ix).context(|| "constant pool".to_string())?;
        let access_flags = ClassAccessFlags::from_bits_retain(read_be_u2(bytes, &mut ix)?);
        let this_class = read_be_u2(bytes, &mut ix)?;
        let super_class = read_be_u2(bytes, &mut ix)?;

        let interfaces_count = read_be_u2(bytes, &mut ix)? as usize;
        let mut interfaces = Vec::with_capacity(interfaces_count);
        for _ in 0..interfaces_count {
            interfaces.push(read_be_u2(bytes, &mut ix)?);
        }

        let fields_count = read_be_u2(bytes, &mut ix)? as usize;
        let fields = read_counted(bytes, &mut ix, fields_count).context(|| "fields".to_string())?;
        let methods_count = read_be_u2(bytes, &mut ix)? as usize;
        let methods = read_counted(bytes, &mut ix, methods_count).context(|| "methods".to_string())?;
        let attributes = read_attributes(bytes, &mut ix).context(|| "class attributes".to_string())?;

        if ix != bytes.len() {
            warn!("{} unused bytes after class file end at 0x{:x}", bytes.len() - ix, ix);
        }

        Ok(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }
}

impl Writable for ClassFile {
    fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = write_x(bytes, &CLASS_FILE_MAGIC);
        c += write_be_u2(bytes, self.minor_version);
        c += write_be_u2(bytes, self.major_version);
        c += self.constant_pool.write(bytes);
        c += write_be_u2(bytes, self.access_flags.bits());
        c += write_be_u2(bytes, self.this_class);
        c += write_be_u2(bytes, self.super_class);
        c += write_be_u2(bytes, self.interfaces.len() as u16);
        for i in &self.interfaces {
            c += write_be_u2(bytes, *i);
        }
        c += write_be_u2(bytes, self.fields.len() as u16);
        for f in &self.fields {
            c += f.write(bytes);
        }
        c += write_be_u2(bytes, self.methods.len() as u16);
        for m in &self.methods {
            c += m.write(bytes);
        }
        c += write_attributes(bytes, &self.attributes);
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn code_attribute_round_trip() {
        let code = CodeAttribute {
            max_stack: 2,
            max_locals: 1,
            code: vec![0x2a, 0xb7, 0x00, 0x01, 0xb1],
            exception_table: vec![ExceptionTableEntry { start_pc: 0, end_pc: 4, handler_pc: 4, catch_type: 0 }],
            attributes: vec![AttributeInfo { attribute_name_index: 9, info: vec![0, 0] }],
        };
        let bytes = code.to_bytes();
        assert_eq!(&bytes[4..8], &5u32.to_be_bytes());
        assert_eq!(CodeAttribute::from_bytes(&bytes).unwrap(), code);
    }

    #[test]
    fn code_attribute_too_short() {
        let e = CodeAttribute::from_bytes(&[0, 1, 0, 1, 0, 0, 0, 9, 0xb1]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::TruncatedInput);
    }

    #[test]
    fn source_file_reinterpretation() {
        let a = AttributeInfo { attribute_name_index: 4, info: vec![0x00, 0x07] };
        assert_eq!(SourceFileAttribute::from_attribute(&a).unwrap().sourcefile_index, 7);
        let bad = AttributeInfo { attribute_name_index: 4, info: vec![0x00] };
        assert!(SourceFileAttribute::from_attribute(&bad).is_err());
    }

    #[test]
    fn bad_magic() {
        let e = ClassFile::from_bytes(&[0xCA, 0xFE, 0xBA, 0xBF, 0, 0, 0, 52]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::BadMagic);
    }

    #[test]
    fn attribute_length_past_end() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x10, 0xAA];
        let mut ix = 0;
        assert_eq!(AttributeInfo::read(&bytes, &mut ix).unwrap_err().kind(), ErrorKind::TruncatedInput);
    }
}
