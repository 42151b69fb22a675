//! Index resolution for class files.
//!
//! The pool is resolved in three passes (leaves, then Class/String/NameAndType,
//! then member references) so every composite entry can hold a shared handle to
//! what it names. Each index is checked against the raw tag it must carry.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::classfile::class_file::{
    AttributeInfo, ClassAccessFlags, ClassFile, CodeAttribute, FieldAccessFlags, MethodAccessFlags, SourceFileAttribute,
};
use crate::classfile::constant_pool::{ConstantInfo, ConstantPool};
use crate::classfile::opcodes::JvmDisassembler;
use crate::error::{BytecodeError, ResultExt};
use crate::instructions::{disassemble_all, quote_literal, AnnotateOptions, IndexRef, Instruction, RefAnnotator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAndType {
    pub name: Arc<str>,
    pub descriptor: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub class: Arc<str>,
    pub name_and_type: Arc<NameAndType>,
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} {}", self.class, self.name_and_type.name, self.name_and_type.descriptor)
    }
}

/// A resolved pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8(Arc<str>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    /// Internal class name
    Class(Arc<str>),
    String(Arc<str>),
    Fieldref(MemberRef),
    Methodref(MemberRef),
    InterfaceMethodref(MemberRef),
    NameAndType(Arc<NameAndType>),
    /// `reference_kind` is the JVMS 4.4.8 kind (1 getField through 9 invokeInterface)
    MethodHandle { reference_kind: u8, reference: MemberRef },
    /// Method descriptor
    MethodType(Arc<str>),
    Dynamic(DynamicRef),
    InvokeDynamic(DynamicRef),
    Module(Arc<str>),
    Package(Arc<str>),
}

/// A call site or dynamic constant. The bootstrap method index points into the
/// `BootstrapMethods` attribute, which is kept opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRef {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type: Arc<NameAndType>,
}

impl fmt::Display for DynamicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{} {}", self.bootstrap_method_attr_index, self.name_and_type.name, self.name_and_type.descriptor)
    }
}

/// Resolved constants by 1-based slot; slot 0 and wide-constant tombstones are `None`.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPool {
    slots: Vec<Option<Arc<Constant>>>,
}

impl ResolvedPool {
    pub fn get(&self, index: u16) -> Result<&Arc<Constant>, BytecodeError> {
        match self.slots.get(index as usize) {
            Some(Some(c)) => Ok(c),
            Some(None) => Err(err!(DanglingReference, "constant pool index {} is not a usable entry", index)),
            None => Err(err!(DanglingReference, "constant pool index {} out of range ({} slots)", index, self.slots.len())),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<Arc<str>, BytecodeError> {
        match &**self.get(index)? {
            Constant::Utf8(s) => Ok(s.clone()),
            other => Err(err!(ResolverTypeMismatch, "constant pool index {} is {:?}, expected Utf8", index, other)),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<Arc<str>, BytecodeError> {
        match &**self.get(index)? {
            Constant::Class(s) => Ok(s.clone()),
            other => Err(err!(ResolverTypeMismatch, "constant pool index {} is {:?}, expected Class", index, other)),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() <= 1
    }
}

/// Check a raw reference points at an entry with the expected tag.
fn expect_kind<'a>(raw: &'a ConstantPool, index: u16, expected: &str, from: u16) -> Result<&'a ConstantInfo, BytecodeError> {
    let entry = raw.get(index).context(|| format!("constant pool slot #{}", from))?;
    if entry.kind_name() != expected {
        fail!(
            ResolverTypeMismatch,
            "constant pool slot #{} refers to #{} ({}), expected {}",
            from, index, entry.kind_name(), expected
        );
    }
    Ok(entry)
}

fn resolve_pool(raw: &ConstantPool) -> Result<ResolvedPool, BytecodeError> {
    let mut slots: Vec<Option<Arc<Constant>>> = vec![None; raw.count() as usize];

    // leaves
    for (i, entry) in raw.entries() {
        let c = match entry {
            ConstantInfo::Utf8(s) => Constant::Utf8(Arc::from(s.to_string_lossy().as_ref())),
            ConstantInfo::Integer(v) => Constant::Integer(*v),
            ConstantInfo::Float(bits) => Constant::Float(f32::from_bits(*bits)),
            ConstantInfo::Long(v) => Constant::Long(*v),
            ConstantInfo::Double(bits) => Constant::Double(f64::from_bits(*bits)),
            _ => continue,
        };
        slots[i as usize] = Some(Arc::new(c));
    }

    let utf8 = |slots: &[Option<Arc<Constant>>], index: u16, from: u16| -> Result<Arc<str>, BytecodeError> {
        expect_kind(raw, index, "Utf8", from)?;
        match slots[index as usize].as_deref() {
            Some(Constant::Utf8(s)) => Ok(s.clone()),
            _ => Err(err!(DanglingReference, "constant pool slot #{} is not resolved", index)),
        }
    };

    // entries that only name Utf8 slots
    for (i, entry) in raw.entries() {
        let c = match entry {
            ConstantInfo::Class { name_index } => Constant::Class(utf8(&slots, *name_index, i)?),
            ConstantInfo::String { string_index } => Constant::String(utf8(&slots, *string_index, i)?),
            ConstantInfo::MethodType { descriptor_index } => Constant::MethodType(utf8(&slots, *descriptor_index, i)?),
            ConstantInfo::Module { name_index } => Constant::Module(utf8(&slots, *name_index, i)?),
            ConstantInfo::Package { name_index } => Constant::Package(utf8(&slots, *name_index, i)?),
            ConstantInfo::NameAndType { name_index, descriptor_index } => Constant::NameAndType(Arc::new(NameAndType {
                name: utf8(&slots, *name_index, i)?,
                descriptor: utf8(&slots, *descriptor_index, i)?,
            })),
            _ => continue,
        };
        slots[i as usize] = Some(Arc::new(c));
    }

    // member references and call sites
    for (i, entry) in raw.entries() {
        let (class_index, name_and_type_index) = match entry {
            ConstantInfo::Dynamic { bootstrap_method_attr_index, name_and_type_index }
            | ConstantInfo::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
                expect_kind(raw, *name_and_type_index, "NameAndType", i)?;
                let name_and_type = match slots[*name_and_type_index as usize].as_deref() {
                    Some(Constant::NameAndType(nat)) => nat.clone(),
                    _ => fail!(DanglingReference, "constant pool slot #{} refers to unresolved entries", i),
                };
                let site = DynamicRef { bootstrap_method_attr_index: *bootstrap_method_attr_index, name_and_type };
                let c = match entry {
                    ConstantInfo::Dynamic { .. } => Constant::Dynamic(site),
                    _ => Constant::InvokeDynamic(site),
                };
                slots[i as usize] = Some(Arc::new(c));
                continue;
            }
            ConstantInfo::Fieldref { class_index, name_and_type_index }
            | ConstantInfo::Methodref { class_index, name_and_type_index }
            | ConstantInfo::InterfaceMethodref { class_index, name_and_type_index } => (*class_index, *name_and_type_index),
            _ => continue,
        };
        expect_kind(raw, class_index, "Class", i)?;
        expect_kind(raw, name_and_type_index, "NameAndType", i)?;
        let member = match (slots[class_index as usize].as_deref(), slots[name_and_type_index as usize].as_deref()) {
            (Some(Constant::Class(class)), Some(Constant::NameAndType(nat))) => {
                MemberRef { class: class.clone(), name_and_type: nat.clone() }
            }
            _ => fail!(DanglingReference, "constant pool slot #{} refers to unresolved entries", i),
        };
        let c = match entry {
            ConstantInfo::Fieldref { .. } => Constant::Fieldref(member),
            ConstantInfo::Methodref { .. } => Constant::Methodref(member),
            _ => Constant::InterfaceMethodref(member),
        };
        slots[i as usize] = Some(Arc::new(c));
    }

    // method handles point at member references
    for (i, entry) in raw.entries() {
        let ConstantInfo::MethodHandle { reference_kind, reference_index } = entry else {
            continue;
        };
        let expected = match reference_kind {
            1..=4 => "Fieldref",
            5 | 8 => "Methodref",
            6 | 7 => match raw.get(*reference_index).context(|| format!("constant pool slot #{}", i))? {
                ConstantInfo::InterfaceMethodref { .. } => "InterfaceMethodref",
                _ => "Methodref",
            },
            9 => "InterfaceMethodref",
            other => fail!(ResolverTypeMismatch, "constant pool slot #{} has method handle kind {}", i, other),
        };
        expect_kind(raw, *reference_index, expected, i)?;
        let reference = match slots[*reference_index as usize].as_deref() {
            Some(Constant::Fieldref(m) | Constant::Methodref(m) | Constant::InterfaceMethodref(m)) => m.clone(),
            _ => fail!(DanglingReference, "constant pool slot #{} refers to unresolved entries", i),
        };
        slots[i as usize] = Some(Arc::new(Constant::MethodHandle { reference_kind: *reference_kind, reference }));
    }

    Ok(ResolvedPool { slots })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// `None` catches everything
    pub catch_type: Option<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeKind {
    Code(Code),
    Opaque(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: Arc<str>,
    pub kind: AttributeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member<F> {
    pub access_flags: F,
    pub name: Arc<str>,
    pub descriptor: Arc<str>,
    pub attributes: Vec<Attribute>,
}

impl<F> Member<F> {
    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|a| match &a.kind {
            AttributeKind::Code(code) => Some(code),
            AttributeKind::Opaque(_) => None,
        })
    }
}

/// A fully resolved class file.
#[derive(Debug, Clone)]
pub struct ClassGraph {
    pub pool: ResolvedPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: Arc<str>,
    pub super_class: Option<Arc<str>>,
    pub interfaces: Vec<Arc<str>>,
    pub fields: Vec<Member<FieldAccessFlags>>,
    pub methods: Vec<Member<MethodAccessFlags>>,
    pub attributes: Vec<Attribute>,
    options: AnnotateOptions,
}

fn resolve_attributes(pool: &ResolvedPool, attributes: &[AttributeInfo]) -> Result<Vec<Attribute>, BytecodeError> {
    attributes.iter().map(|a| resolve_attribute(pool, a)).collect()
}

fn resolve_attribute(pool: &ResolvedPool, attribute: &AttributeInfo) -> Result<Attribute, BytecodeError> {
    let name = pool.utf8(attribute.attribute_name_index).context(|| "attribute name".to_string())?;
    if &*name != "Code" {
        return Ok(Attribute { name, kind: AttributeKind::Opaque(attribute.info.clone()) });
    }
    if attribute.info.is_empty() {
        warn!("empty Code attribute kept opaque");
        return Ok(Attribute { name, kind: AttributeKind::Opaque(vec![]) });
    }

    let raw = CodeAttribute::from_bytes(&attribute.info)?;
    let mut exception_table = Vec::with_capacity(raw.exception_table.len());
    for e in &raw.exception_table {
        let catch_type = match e.catch_type {
            0 => None,
            idx => Some(pool.class_name(idx).context(|| format!("catch type at pc {}", e.handler_pc))?),
        };
        exception_table.push(ExceptionHandler { start_pc: e.start_pc, end_pc: e.end_pc, handler_pc: e.handler_pc, catch_type });
    }
    let code = Code {
        max_stack: raw.max_stack,
        max_locals: raw.max_locals,
        code: raw.code,
        exception_table,
        attributes: resolve_attributes(pool, &raw.attributes).context(|| "Code attribute".to_string())?,
    };
    Ok(Attribute { name, kind: AttributeKind::Code(code) })
}

impl ClassFile {
    pub fn resolve(&self) -> Result<ClassGraph, BytecodeError> {
        let pool = resolve_pool(&self.constant_pool)?;

        let this_class = pool.class_name(self.this_class).context(|| "this_class".to_string())?;
        let super_class = match self.super_class {
            0 => None,
            idx => Some(pool.class_name(idx).context(|| "super_class".to_string())?),
        };
        let interfaces = self.interfaces.iter()
            .map(|i| pool.class_name(*i))
            .collect::<Result<Vec<_>, _>>()
            .context(|| "interfaces".to_string())?;

        let mut fields = Vec::with_capacity(self.fields.len());
        for (i, f) in self.fields.iter().enumerate() {
            let member = (|| -> Result<Member<FieldAccessFlags>, BytecodeError> {
                Ok(Member {
                    access_flags: f.access_flags,
                    name: pool.utf8(f.name_index)?,
                    descriptor: pool.utf8(f.descriptor_index)?,
                    attributes: resolve_attributes(&pool, &f.attributes)?,
                })
            })().context(|| format!("field #{}", i))?;
            fields.push(member);
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for (i, m) in self.methods.iter().enumerate() {
            let member = (|| -> Result<Member<MethodAccessFlags>, BytecodeError> {
                Ok(Member {
                    access_flags: m.access_flags,
                    name: pool.utf8(m.name_index)?,
                    descriptor: pool.utf8(m.descriptor_index)?,
                    attributes: resolve_attributes(&pool, &m.attributes)?,
                })
            })().context(|| format!("method #{}", i))?;
            methods.push(member);
        }

        let attributes = resolve_attributes(&pool, &self.attributes).context(|| "class attributes".to_string())?;
        debug!("resolved class {} ({} fields, {} methods)", this_class, fields.len(), methods.len());

        Ok(ClassGraph {
            pool,
            access_flags: self.access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
            options: AnnotateOptions::default(),
        })
    }
}

impl ClassGraph {
    pub fn method_by_name(&self, name: &str) -> Option<&Member<MethodAccessFlags>> {
        self.methods.iter().find(|m| &*m.name == name)
    }

    /// Name from the `SourceFile` attribute, if present.
    pub fn source_file(&self) -> Result<Option<Arc<str>>, BytecodeError> {
        for a in &self.attributes {
            if &*a.name != "SourceFile" {
                continue;
            }
            if let AttributeKind::Opaque(info) = &a.kind {
                let sf = SourceFileAttribute::from_bytes(info)?;
                return self.pool.utf8(sf.sourcefile_index).map(Some);
            }
        }
        Ok(None)
    }

    pub fn set_annotate_options(&mut self, options: AnnotateOptions) {
        self.options = options;
    }

    pub fn disassemble(&self, code: &Code) -> Result<Vec<Instruction>, BytecodeError> {
        disassemble_all(&code.code, 0, &JvmDisassembler, self)
    }

    pub fn disassemble_from(&self, code: &Code, start: usize) -> Result<Vec<Instruction>, BytecodeError> {
        disassemble_all(&code.code, start, &JvmDisassembler, self)
    }
}

fn handle_kind_name(kind: u8) -> &'static str {
    match kind {
        1 => "REF_getField",
        2 => "REF_getStatic",
        3 => "REF_putField",
        4 => "REF_putStatic",
        5 => "REF_invokeVirtual",
        6 => "REF_invokeStatic",
        7 => "REF_invokeSpecial",
        8 => "REF_newInvokeSpecial",
        _ => "REF_invokeInterface",
    }
}

impl RefAnnotator for ClassGraph {
    fn annotate(&self, reference: IndexRef) -> Result<String, BytecodeError> {
        let index = u16::try_from(reference.index)
            .map_err(|_| err!(DanglingReference, "constant pool index {} out of range", reference.index))?;
        Ok(match &**self.pool.get(index)? {
            Constant::Fieldref(m) | Constant::Methodref(m) | Constant::InterfaceMethodref(m) => m.to_string(),
            Constant::String(s) => quote_literal(s, self.options.max_literal_chars),
            Constant::Utf8(s) => quote_literal(s, self.options.max_literal_chars),
            Constant::Class(name) | Constant::MethodType(name) | Constant::Module(name) | Constant::Package(name) => {
                name.to_string()
            }
            Constant::MethodHandle { reference_kind, reference } => format!("{} {}", handle_kind_name(*reference_kind), reference),
            Constant::Dynamic(site) | Constant::InvokeDynamic(site) => site.to_string(),
            Constant::NameAndType(nat) => format!("{} {}", nat.name, nat.descriptor),
            Constant::Integer(v) => v.to_string(),
            Constant::Float(v) => format!("{}f", v),
            Constant::Long(v) => format!("{}l", v),
            Constant::Double(v) => format!("{}d", v),
        })
    }
}
