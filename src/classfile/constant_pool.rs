//! The class file constant pool.
//!
//! Slots are 1-based. Long and Double entries take two slots; the second one is
//! kept as [`ConstantInfo::Unusable`] so that every index recorded elsewhere in
//! the file can be used directly.

use log::debug;

use crate::error::{BytecodeError, ResultExt};
use crate::layout::{read_be_u2, read_be_u4, read_be_u8, read_u1, read_x, write_be_u2, write_be_u4, write_be_u8, write_u1, write_x};
use crate::mutf8::JavaString;

pub const CONSTANT_UTF8: u8 = 1;
pub const CONSTANT_INTEGER: u8 = 3;
pub const CONSTANT_FLOAT: u8 = 4;
pub const CONSTANT_LONG: u8 = 5;
pub const CONSTANT_DOUBLE: u8 = 6;
pub const CONSTANT_CLASS: u8 = 7;
pub const CONSTANT_STRING: u8 = 8;
pub const CONSTANT_FIELDREF: u8 = 9;
pub const CONSTANT_METHODREF: u8 = 10;
pub const CONSTANT_INTERFACE_METHODREF: u8 = 11;
pub const CONSTANT_NAME_AND_TYPE: u8 = 12;
pub const CONSTANT_METHOD_HANDLE: u8 = 15;
pub const CONSTANT_METHOD_TYPE: u8 = 16;
pub const CONSTANT_DYNAMIC: u8 = 17;
pub const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
pub const CONSTANT_MODULE: u8 = 19;
pub const CONSTANT_PACKAGE: u8 = 20;

/// One raw pool entry. Numeric constants keep their exact bit patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantInfo {
    Utf8(JavaString),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
    /// Second slot of a Long or Double; never written back
    Unusable,
}

impl ConstantInfo {
    pub fn tag(&self) -> Option<u8> {
        Some(match self {
            ConstantInfo::Utf8(_) => CONSTANT_UTF8,
            ConstantInfo::Integer(_) => CONSTANT_INTEGER,
            ConstantInfo::Float(_) => CONSTANT_FLOAT,
            ConstantInfo::Long(_) => CONSTANT_LONG,
            ConstantInfo::Double(_) => CONSTANT_DOUBLE,
            ConstantInfo::Class { .. } => CONSTANT_CLASS,
            ConstantInfo::String { .. } => CONSTANT_STRING,
            ConstantInfo::Fieldref { .. } => CONSTANT_FIELDREF,
            ConstantInfo::Methodref { .. } => CONSTANT_METHODREF,
            ConstantInfo::InterfaceMethodref { .. } => CONSTANT_INTERFACE_METHODREF,
            ConstantInfo::NameAndType { .. } => CONSTANT_NAME_AND_TYPE,
            ConstantInfo::MethodHandle { .. } => CONSTANT_METHOD_HANDLE,
            ConstantInfo::MethodType { .. } => CONSTANT_METHOD_TYPE,
            ConstantInfo::Dynamic { .. } => CONSTANT_DYNAMIC,
            ConstantInfo::InvokeDynamic { .. } => CONSTANT_INVOKE_DYNAMIC,
            ConstantInfo::Module { .. } => CONSTANT_MODULE,
            ConstantInfo::Package { .. } => CONSTANT_PACKAGE,
            ConstantInfo::Unusable => return None,
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ConstantInfo::Utf8(_) => "Utf8",
            ConstantInfo::Integer(_) => "Integer",
            ConstantInfo::Float(_) => "Float",
            ConstantInfo::Long(_) => "Long",
            ConstantInfo::Double(_) => "Double",
            ConstantInfo::Class { .. } => "Class",
            ConstantInfo::String { .. } => "String",
            ConstantInfo::Fieldref { .. } => "Fieldref",
            ConstantInfo::Methodref { .. } => "Methodref",
            ConstantInfo::InterfaceMethodref { .. } => "InterfaceMethodref",
            ConstantInfo::NameAndType { .. } => "NameAndType",
            ConstantInfo::MethodHandle { .. } => "MethodHandle",
            ConstantInfo::MethodType { .. } => "MethodType",
            ConstantInfo::Dynamic { .. } => "Dynamic",
            ConstantInfo::InvokeDynamic { .. } => "InvokeDynamic",
            ConstantInfo::Module { .. } => "Module",
            ConstantInfo::Package { .. } => "Package",
            ConstantInfo::Unusable => "Unusable",
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, ConstantInfo::Long(_) | ConstantInfo::Double(_))
    }

    fn read(bytes: &[u8], ix: &mut usize) -> Result<ConstantInfo, BytecodeError> {
        let tag = read_u1(bytes, ix)?;
        Ok(match tag {
            CONSTANT_UTF8 => {
                let length = read_be_u2(bytes, ix)? as usize;
                ConstantInfo::Utf8(JavaString::decode(&read_x(bytes, ix, length)?))
            }
            CONSTANT_INTEGER => ConstantInfo::Integer(read_be_u4(bytes, ix)? as i32),
            CONSTANT_FLOAT => ConstantInfo::Float(read_be_u4(bytes, ix)?),
            CONSTANT_LONG => ConstantInfo::Long(read_be_u8(bytes, ix)? as i64),
            CONSTANT_DOUBLE => ConstantInfo::Double(read_be_u8(bytes, ix)?),
            CONSTANT_CLASS => ConstantInfo::Class { name_index: read_be_u2(bytes, ix)? },
            CONSTANT_STRING => ConstantInfo::String { string_index: read_be_u2(bytes, ix)? },
            CONSTANT_FIELDREF => ConstantInfo::Fieldref {
                class_index: read_be_u2(bytes, ix)?,
                name_and_type_index: read_be_u2(bytes, ix)?,
            },
            CONSTANT_METHODREF => ConstantInfo::Methodref {
                class_index: read_be_u2(bytes, ix)?,
                name_and_type_index: read_be_u2(bytes, ix)?,
            },
            CONSTANT_INTERFACE_METHODREF => ConstantInfo::InterfaceMethodref {
                class_index: read_be_u2(bytes, ix)?,
                name_and_type_index: read_be_u2(bytes, ix)?,
            },
            CONSTANT_NAME_AND_TYPE => ConstantInfo::NameAndType {
                name_index: read_be_u2(bytes, ix)?,
                descriptor_index: read_be_u2(bytes, ix)?,
            },
            CONSTANT_METHOD_HANDLE => ConstantInfo::MethodHandle {
                reference_kind: read_u1(bytes, ix)?,
                reference_index: read_be_u2(bytes, ix)?,
            },
            CONSTANT_METHOD_TYPE => ConstantInfo::MethodType { descriptor_index: read_be_u2(bytes, ix)? },
            CONSTANT_DYNAMIC => ConstantInfo::Dynamic {
                bootstrap_method_attr_index: read_be_u2(bytes, ix)?,
                name_and_type_index: read_be_u2(bytes, ix)?,
            },
            CONSTANT_INVOKE_DYNAMIC => ConstantInfo::InvokeDynamic {
                bootstrap_method_attr_index: read_be_u2(bytes, ix)?,
                name_and_type_index: read_be_u2(bytes, ix)?,
            },
            CONSTANT_MODULE => ConstantInfo::Module { name_index: read_be_u2(bytes, ix)? },
            CONSTANT_PACKAGE => ConstantInfo::Package { name_index: read_be_u2(bytes, ix)? },
            other => fail!(UnknownTag, "unknown constant pool tag {} at 0x{:x}", other, *ix - 1),
        })
    }

    fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let Some(tag) = self.tag() else { return 0 };
        let mut c = write_u1(bytes, tag);
        c += match self {
            ConstantInfo::Utf8(s) => {
                let encoded = s.encode();
                write_be_u2(bytes, encoded.len() as u16) + write_x(bytes, &encoded)
            }
            ConstantInfo::Integer(v) => write_be_u4(bytes, *v as u32),
            ConstantInfo::Float(bits) => write_be_u4(bytes, *bits),
            ConstantInfo::Long(v) => write_be_u8(bytes, *v as u64),
            ConstantInfo::Double(bits) => write_be_u8(bytes, *bits),
            ConstantInfo::Class { name_index }
            | ConstantInfo::Module { name_index }
            | ConstantInfo::Package { name_index } => write_be_u2(bytes, *name_index),
            ConstantInfo::MethodType { descriptor_index } => write_be_u2(bytes, *descriptor_index),
            ConstantInfo::MethodHandle { reference_kind, reference_index } => {
                write_u1(bytes, *reference_kind) + write_be_u2(bytes, *reference_index)
            }
            ConstantInfo::Dynamic { bootstrap_method_attr_index, name_and_type_index }
            | ConstantInfo::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
                write_be_u2(bytes, *bootstrap_method_attr_index) + write_be_u2(bytes, *name_and_type_index)
            }
            ConstantInfo::String { string_index } => write_be_u2(bytes, *string_index),
            ConstantInfo::Fieldref { class_index, name_and_type_index }
            | ConstantInfo::Methodref { class_index, name_and_type_index }
            | ConstantInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                write_be_u2(bytes, *class_index) + write_be_u2(bytes, *name_and_type_index)
            }
            ConstantInfo::NameAndType { name_index, descriptor_index } => {
                write_be_u2(bytes, *name_index) + write_be_u2(bytes, *descriptor_index)
            }
            ConstantInfo::Unusable => 0,
        };
        c
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConstantPool {
    /// `entries[i]` is slot `i + 1`
    entries: Vec<ConstantInfo>,
}

impl ConstantPool {
    pub fn new(entries: Vec<ConstantInfo>) -> Self {
        ConstantPool { entries }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ConstantPool, BytecodeError> {
        let count = read_be_u2(bytes, ix)?;
        let mut remaining = count.saturating_sub(1);
        let mut entries = Vec::with_capacity(remaining as usize);
        while remaining > 0 {
            let slot = entries.len() + 1;
            let entry = ConstantInfo::read(bytes, ix).context(|| format!("constant pool slot #{}", slot))?;
            remaining -= 1;
            let wide = entry.is_wide();
            entries.push(entry);
            if wide {
                if remaining == 0 {
                    fail!(TruncatedInput, "wide constant in last slot #{} of a {}-entry pool", slot, count);
                }
                remaining -= 1;
                entries.push(ConstantInfo::Unusable);
            }
        }
        debug!("constant pool: {} slots", entries.len());
        Ok(ConstantPool { entries })
    }

    /// Writes the declared count, then every entry except the tombstones.
    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = write_be_u2(bytes, self.count());
        for e in &self.entries {
            c += e.write(bytes);
        }
        c
    }

    /// The `constant_pool_count` as declared on disk (number of slots + 1).
    pub fn count(&self) -> u16 {
        (self.entries.len() + 1) as u16
    }

    pub fn entries(&self) -> impl Iterator<Item = (u16, &ConstantInfo)> {
        self.entries.iter().enumerate().map(|(i, e)| ((i + 1) as u16, e))
    }

    /// The entry at a 1-based slot. Slot 0, tombstones and out-of-range slots
    /// are all dangling.
    pub fn get(&self, index: u16) -> Result<&ConstantInfo, BytecodeError> {
        let entry = (index as usize)
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .ok_or_else(|| err!(DanglingReference, "constant pool index {} out of range (count {})", index, self.count()))?;
        if let ConstantInfo::Unusable = entry {
            fail!(DanglingReference, "constant pool index {} is the second slot of a wide constant", index);
        }
        Ok(entry)
    }

    pub fn utf8(&self, index: u16) -> Result<&JavaString, BytecodeError> {
        match self.get(index)? {
            ConstantInfo::Utf8(s) => Ok(s),
            other => Err(err!(ResolverTypeMismatch, "constant pool index {} is {}, expected Utf8", index, other.kind_name())),
        }
    }
}
