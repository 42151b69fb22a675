//! Index resolution for DEX files.
//!
//! [`DexFile::resolve`] is a pure transform from the raw, index-addressed tables
//! to a [`DexGraph`] whose entries hold shared handles (`Arc`) to what they
//! reference. Any index outside its table aborts the whole resolution with
//! `DanglingReference`.

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::dex::dex_file::{
    ClassDataItem, CodeItem, DexAccessFlags, DexFile, EncodedField, EncodedMethod, DEFAULT_SUPERCLASS, NO_INDEX,
};
use crate::dex::encoded_values::EncodedValue;
use crate::dex::opcodes::DalvikDisassembler;
use crate::error::{BytecodeError, ResultExt};
use crate::instructions::{disassemble_all, quote_literal, AnnotateOptions, IndexRef, Instruction, RefAnnotator, ReferenceType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proto {
    pub shorty: Arc<str>,
    pub return_type: Arc<str>,
    pub parameters: Vec<Arc<str>>,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for p in &self.parameters {
            write!(f, "{}", p)?;
        }
        write!(f, "){}", self.return_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub class: Arc<str>,
    pub type_: Arc<str>,
    pub name: Arc<str>,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.class, self.name, self.type_)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    pub class: Arc<str>,
    pub proto: Arc<Proto>,
    pub name: Arc<str>,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{}", self.class, self.name, self.proto)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub field_idx: u32,
    pub field: Arc<FieldRef>,
    pub access_flags: DexAccessFlags,
}

#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub method_idx: u32,
    pub method: Arc<MethodRef>,
    pub access_flags: DexAccessFlags,
    pub code: Option<CodeItem>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassData {
    pub static_fields: Vec<ResolvedField>,
    pub instance_fields: Vec<ResolvedField>,
    pub direct_methods: Vec<ResolvedMethod>,
    pub virtual_methods: Vec<ResolvedMethod>,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub class: Arc<str>,
    pub access_flags: DexAccessFlags,
    pub superclass: Arc<str>,
    pub interfaces: Vec<Arc<str>>,
    pub source_file: Option<Arc<str>>,
    pub static_values: Vec<EncodedValue>,
    pub class_data: Option<ClassData>,
}

impl ClassDef {
    pub fn direct_methods(&self) -> &[ResolvedMethod] {
        self.class_data.as_ref().map_or(&[], |cd| cd.direct_methods.as_slice())
    }

    pub fn virtual_methods(&self) -> &[ResolvedMethod] {
        self.class_data.as_ref().map_or(&[], |cd| cd.virtual_methods.as_slice())
    }

    pub fn method_by_name(&self, name: &str) -> Option<&ResolvedMethod> {
        self.direct_methods().iter().chain(self.virtual_methods()).find(|m| &*m.method.name == name)
    }
}

/// A fully resolved DEX file.
#[derive(Debug, Clone)]
pub struct DexGraph {
    pub strings: Vec<Arc<str>>,
    pub types: Vec<Arc<str>>,
    pub protos: Vec<Arc<Proto>>,
    pub fields: Vec<Arc<FieldRef>>,
    pub methods: Vec<Arc<MethodRef>>,
    pub classes: Vec<ClassDef>,
    options: AnnotateOptions,
}

fn lookup<'a, T>(table: &'a [T], idx: u32, what: &str) -> Result<&'a T, BytecodeError> {
    table.get(idx as usize).ok_or_else(|| {
        err!(DanglingReference, "{} index {} out of range ({} entries)", what, idx, table.len())
    })
}

impl DexFile {
    pub fn resolve(&self) -> Result<DexGraph, BytecodeError> {
        let mut strings: Vec<Arc<str>> = Vec::with_capacity(self.string_ids.len());
        for idx in 0..self.string_ids.len() as u32 {
            let data = self.string_data(idx).context(|| format!("string_ids[{}]", idx))?;
            strings.push(Arc::from(data.data.to_string_lossy().as_ref()));
        }

        let default_super: Arc<str> = Arc::from(DEFAULT_SUPERCLASS);
        let type_name = |types: &[Arc<str>], idx: u32| -> Result<Arc<str>, BytecodeError> {
            if idx == NO_INDEX {
                return Ok(default_super.clone());
            }
            lookup(types, idx, "type").cloned()
        };

        let mut types = Vec::with_capacity(self.type_ids.len());
        for (i, t) in self.type_ids.iter().enumerate() {
            let name = if t.descriptor_idx == NO_INDEX {
                default_super.clone()
            } else {
                lookup(&strings, t.descriptor_idx, "string").context(|| format!("type_ids[{}]", i))?.clone()
            };
            types.push(name);
        }

        let mut protos = Vec::with_capacity(self.proto_ids.len());
        for (i, p) in self.proto_ids.iter().enumerate() {
            let proto = (|| -> Result<Proto, BytecodeError> {
                let shorty = lookup(&strings, p.shorty_idx, "string")?.clone();
                let return_type = lookup(&types, p.return_type_idx, "type")?.clone();
                let parameters = match self.deref(p.parameters_off)? {
                    Some(list) => list.0.iter()
                        .map(|t| lookup(&types, *t as u32, "type").cloned())
                        .collect::<Result<Vec<_>, _>>()?,
                    None => vec![],
                };
                Ok(Proto { shorty, return_type, parameters })
            })().context(|| format!("proto_ids[{}]", i))?;
            protos.push(Arc::new(proto));
        }

        let mut fields = Vec::with_capacity(self.field_ids.len());
        for (i, f) in self.field_ids.iter().enumerate() {
            let field = (|| -> Result<FieldRef, BytecodeError> {
                Ok(FieldRef {
                    class: lookup(&types, f.class_idx as u32, "type")?.clone(),
                    type_: lookup(&types, f.type_idx as u32, "type")?.clone(),
                    name: lookup(&strings, f.name_idx, "string")?.clone(),
                })
            })().context(|| format!("field_ids[{}]", i))?;
            fields.push(Arc::new(field));
        }

        let mut methods = Vec::with_capacity(self.method_ids.len());
        for (i, m) in self.method_ids.iter().enumerate() {
            let method = (|| -> Result<MethodRef, BytecodeError> {
                Ok(MethodRef {
                    class: lookup(&types, m.class_idx as u32, "type")?.clone(),
                    proto: lookup(&protos, m.proto_idx as u32, "proto")?.clone(),
                    name: lookup(&strings, m.name_idx, "string")?.clone(),
                })
            })().context(|| format!("method_ids[{}]", i))?;
            methods.push(Arc::new(method));
        }

        let mut classes = Vec::with_capacity(self.class_defs.len());
        for (i, c) in self.class_defs.iter().enumerate() {
            let class = (|| -> Result<ClassDef, BytecodeError> {
                let interfaces = match self.deref(c.interfaces_off)? {
                    Some(list) => list.0.iter()
                        .map(|t| lookup(&types, *t as u32, "type").cloned())
                        .collect::<Result<Vec<_>, _>>()?,
                    None => vec![],
                };
                let source_file = match c.source_file_idx {
                    NO_INDEX => None,
                    idx => Some(lookup(&strings, idx, "string")?.clone()),
                };
                let class_data = match self.deref(c.class_data_off)? {
                    Some(cd) => Some(self.resolve_class_data(&cd, &fields, &methods)?),
                    None => None,
                };
                Ok(ClassDef {
                    class: lookup(&types, c.class_idx, "type")?.clone(),
                    access_flags: c.access_flags,
                    superclass: type_name(&types, c.superclass_idx)?,
                    interfaces,
                    source_file,
                    static_values: self.deref(c.static_values_off)?.map(|a| a.0).unwrap_or_default(),
                    class_data,
                })
            })().context(|| format!("class_defs[{}]", i))?;
            classes.push(class);
        }

        debug!(
            "resolved {} strings, {} types, {} protos, {} fields, {} methods, {} classes",
            strings.len(), types.len(), protos.len(), fields.len(), methods.len(), classes.len()
        );

        Ok(DexGraph { strings, types, protos, fields, methods, classes, options: AnnotateOptions::default() })
    }

    fn resolve_class_data(
        &self,
        cd: &ClassDataItem,
        fields: &[Arc<FieldRef>],
        methods: &[Arc<MethodRef>],
    ) -> Result<ClassData, BytecodeError> {
        let resolve_fields = |list: &[EncodedField]| {
            list.iter()
                .map(|f| -> Result<ResolvedField, BytecodeError> { Ok(ResolvedField {
                    field_idx: f.field_idx,
                    field: lookup(fields, f.field_idx, "field")?.clone(),
                    access_flags: f.access_flags,
                }) })
                .collect::<Result<Vec<_>, BytecodeError>>()
        };
        let resolve_methods = |list: &[EncodedMethod]| {
            list.iter()
                .map(|m| -> Result<ResolvedMethod, BytecodeError> { Ok(ResolvedMethod {
                    method_idx: m.method_idx,
                    method: lookup(methods, m.method_idx, "method")?.clone(),
                    access_flags: m.access_flags,
                    code: self.deref(m.code_off).context(|| format!("code of method {}", m.method_idx))?,
                }) })
                .collect::<Result<Vec<_>, BytecodeError>>()
        };

        Ok(ClassData {
            static_fields: resolve_fields(&cd.static_fields)?,
            instance_fields: resolve_fields(&cd.instance_fields)?,
            direct_methods: resolve_methods(&cd.direct_methods)?,
            virtual_methods: resolve_methods(&cd.virtual_methods)?,
        })
    }
}

impl DexGraph {
    pub fn string(&self, idx: u32) -> Result<&Arc<str>, BytecodeError> {
        lookup(&self.strings, idx, "string")
    }

    pub fn type_(&self, idx: u32) -> Result<&Arc<str>, BytecodeError> {
        lookup(&self.types, idx, "type")
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|c| &*c.class == name)
    }

    pub fn set_annotate_options(&mut self, options: AnnotateOptions) {
        self.options = options;
    }

    /// Disassemble a method body, annotating every string/type/field/method
    /// reference against this graph.
    pub fn disassemble(&self, code: &CodeItem) -> Result<Vec<Instruction>, BytecodeError> {
        self.disassemble_from(code, 0)
    }

    /// As [`DexGraph::disassemble`], starting at byte offset `start` of the body.
    pub fn disassemble_from(&self, code: &CodeItem, start: usize) -> Result<Vec<Instruction>, BytecodeError> {
        disassemble_all(&code.code_bytes(), start, &DalvikDisassembler, self)
    }
}

impl RefAnnotator for DexGraph {
    fn annotate(&self, reference: IndexRef) -> Result<String, BytecodeError> {
        let idx = reference.index;
        Ok(match reference.kind {
            ReferenceType::String => quote_literal(self.string(idx)?, self.options.max_literal_chars),
            ReferenceType::Type => self.type_(idx)?.to_string(),
            ReferenceType::Field => lookup(&self.fields, idx, "field")?.to_string(),
            ReferenceType::Method => lookup(&self.methods, idx, "method")?.to_string(),
            ReferenceType::MethodProto => lookup(&self.protos, idx, "proto")?.to_string(),
            other => fail!(UnknownTag, "{:?} references are not part of dex 035", other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> DexGraph {
        let s = |v: &str| -> Arc<str> { Arc::from(v) };
        let proto = Arc::new(Proto { shorty: s("VI"), return_type: s("V"), parameters: vec![s("I")] });
        DexGraph {
            strings: vec![s("hello\n"), s("x")],
            types: vec![s("LFoo;"), s("I")],
            protos: vec![proto.clone()],
            fields: vec![Arc::new(FieldRef { class: s("LFoo;"), type_: s("I"), name: s("x") })],
            methods: vec![Arc::new(MethodRef { class: s("LFoo;"), proto, name: s("run") })],
            classes: vec![],
            options: AnnotateOptions::default(),
        }
    }

    #[test]
    fn annotations_render_references() {
        let g = graph();
        let a = |kind, index| g.annotate(IndexRef { kind, index }).unwrap();
        assert_eq!(a(ReferenceType::String, 0), "\"hello\\n\"");
        assert_eq!(a(ReferenceType::Type, 0), "LFoo;");
        assert_eq!(a(ReferenceType::Field, 0), "LFoo;->x:I");
        assert_eq!(a(ReferenceType::Method, 0), "LFoo;->run(I)V");
    }

    #[test]
    fn out_of_range_reference() {
        let g = graph();
        let e = g.annotate(IndexRef { kind: ReferenceType::Method, index: 4 }).unwrap_err();
        assert_eq!(e.kind(), crate::error::ErrorKind::DanglingReference);
    }
}
