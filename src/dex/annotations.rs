//! DEX annotations-related structures and I/O
//!
//! Annotation structures of the DEX format:
//! - annotations_directory_item
//! - annotation_set_item
//! - annotation_set_ref_list
//! - annotation_item (wraps EncodedAnnotation)
//!
//! Every offset is kept as a [`Pointer`]; nothing below the directory is read
//! until asked for.

use crate::dex::encoded_values::EncodedAnnotation;
use crate::error::BytecodeError;
use crate::layout::{read_counted, read_u1, read_u4, write_u1, write_u4, Pointer, Readable, Writable};

/// annotation_item
/// https://source.android.com/docs/core/runtime/dex-format#annotation-item
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationItem {
    /// 0x00 build, 0x01 runtime, 0x02 system
    pub visibility: u8,
    pub annotation: EncodedAnnotation,
}

impl Readable for AnnotationItem {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationItem, BytecodeError> {
        let visibility = read_u1(bytes, ix)?;
        let annotation = EncodedAnnotation::read(bytes, ix)?;
        Ok(AnnotationItem { visibility, annotation })
    }
}

impl Writable for AnnotationItem {
    fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_u1(bytes, self.visibility) + self.annotation.write(bytes)
    }
}

/// annotation_set_item: offsets of annotation_items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationSetItem {
    pub entries: Vec<Pointer<AnnotationItem>>,
}

impl Readable for AnnotationSetItem {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationSetItem, BytecodeError> {
        let size = read_u4(bytes, ix)? as usize;
        Ok(AnnotationSetItem { entries: read_counted(bytes, ix, size)? })
    }
}

/// annotation_set_ref_list: one annotation set per parameter (0 = none)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationSetRefList {
    pub list: Vec<Pointer<AnnotationSetItem>>,
}

impl Readable for AnnotationSetRefList {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationSetRefList, BytecodeError> {
        let size = read_u4(bytes, ix)? as usize;
        Ok(AnnotationSetRefList { list: read_counted(bytes, ix, size)? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAnnotation {
    pub field_idx: u32,
    pub annotations_off: Pointer<AnnotationSetItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodAnnotation {
    pub method_idx: u32,
    pub annotations_off: Pointer<AnnotationSetItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterAnnotation {
    pub method_idx: u32,
    pub annotations_off: Pointer<AnnotationSetRefList>,
}

/// annotations_directory_item
/// https://source.android.com/docs/core/runtime/dex-format#annotations-directory-item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationsDirectoryItem {
    pub class_annotations_off: Pointer<AnnotationSetItem>,
    pub field_annotations: Vec<FieldAnnotation>,
    pub method_annotations: Vec<MethodAnnotation>,
    pub parameter_annotations: Vec<ParameterAnnotation>,
}

impl Readable for AnnotationsDirectoryItem {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationsDirectoryItem, BytecodeError> {
        let class_annotations_off = Pointer::read(bytes, ix)?;
        let fields_size = read_u4(bytes, ix)? as usize;
        let annotated_methods_size = read_u4(bytes, ix)? as usize;
        let annotated_parameters_size = read_u4(bytes, ix)? as usize;

        let mut field_annotations = Vec::with_capacity(fields_size.min(bytes.len() / 8));
        for _ in 0..fields_size {
            field_annotations.push(FieldAnnotation {
                field_idx: read_u4(bytes, ix)?,
                annotations_off: Pointer::read(bytes, ix)?,
            });
        }

        let mut method_annotations = Vec::with_capacity(annotated_methods_size.min(bytes.len() / 8));
        for _ in 0..annotated_methods_size {
            method_annotations.push(MethodAnnotation {
                method_idx: read_u4(bytes, ix)?,
                annotations_off: Pointer::read(bytes, ix)?,
            });
        }

        let mut parameter_annotations = Vec::with_capacity(annotated_parameters_size.min(bytes.len() / 8));
        for _ in 0..annotated_parameters_size {
            parameter_annotations.push(ParameterAnnotation {
                method_idx: read_u4(bytes, ix)?,
                annotations_off: Pointer::read(bytes, ix)?,
            });
        }

        Ok(AnnotationsDirectoryItem {
            class_annotations_off,
            field_annotations,
            method_annotations,
            parameter_annotations,
        })
    }
}

impl AnnotationsDirectoryItem {
    /// Write the directory, translating every set/ref-list pointer through the
    /// supplied relocation functions.
    pub fn write_relocated(
        &self,
        bytes: &mut Vec<u8>,
        set_off: impl Fn(Pointer<AnnotationSetItem>) -> u32,
        ref_list_off: impl Fn(Pointer<AnnotationSetRefList>) -> u32,
    ) -> usize {
        let mut c = 0;
        c += write_u4(bytes, set_off(self.class_annotations_off));
        c += write_u4(bytes, self.field_annotations.len() as u32);
        c += write_u4(bytes, self.method_annotations.len() as u32);
        c += write_u4(bytes, self.parameter_annotations.len() as u32);

        for fa in &self.field_annotations {
            c += write_u4(bytes, fa.field_idx);
            c += write_u4(bytes, set_off(fa.annotations_off));
        }
        for ma in &self.method_annotations {
            c += write_u4(bytes, ma.method_idx);
            c += write_u4(bytes, set_off(ma.annotations_off));
        }
        for pa in &self.parameter_annotations {
            c += write_u4(bytes, pa.method_idx);
            c += write_u4(bytes, ref_list_off(pa.annotations_off));
        }
        c
    }
}
