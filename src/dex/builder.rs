//! DEX rebuild: deterministic re-layout of a parsed file with replacement
//! method bodies applied.
//!
//! The id tables keep their order and indices. The data section is written from
//! scratch in a fixed order, items that shared an offset in the input share one
//! in the output, and a fresh map list and header are produced.

use std::collections::{HashMap, HashSet};

use adler::adler32_slice;
use log::{debug, info};
use sha1::{Digest, Sha1};

use crate::dex::annotations::{AnnotationSetItem, AnnotationSetRefList, AnnotationsDirectoryItem};
use crate::dex::dex_file::{ClassDefOffsets, CodeItem, DexFile, Header, DEX_FILE_MAGIC, ENDIAN_CONSTANT, HEADER_SIZE};
use crate::error::{BytecodeError, ResultExt};
use crate::layout::{end_offset, pad_to, write_u2, write_u4, write_x, Pointer, Writable};
use crate::rebuild::{assemble, CodeEdits};

const TYPE_HEADER_ITEM: u16 = 0x0000;
const TYPE_STRING_ID_ITEM: u16 = 0x0001;
const TYPE_TYPE_ID_ITEM: u16 = 0x0002;
const TYPE_PROTO_ID_ITEM: u16 = 0x0003;
const TYPE_FIELD_ID_ITEM: u16 = 0x0004;
const TYPE_METHOD_ID_ITEM: u16 = 0x0005;
const TYPE_CLASS_DEF_ITEM: u16 = 0x0006;
const TYPE_MAP_LIST: u16 = 0x1000;
const TYPE_TYPE_LIST: u16 = 0x1001;
const TYPE_ANNOTATION_SET_REF_LIST: u16 = 0x1002;
const TYPE_ANNOTATION_SET_ITEM: u16 = 0x1003;
const TYPE_CLASS_DATA_ITEM: u16 = 0x2000;
const TYPE_CODE_ITEM: u16 = 0x2001;
const TYPE_STRING_DATA_ITEM: u16 = 0x2002;
const TYPE_DEBUG_INFO_ITEM: u16 = 0x2003;
const TYPE_ANNOTATION_ITEM: u16 = 0x2004;
const TYPE_ENCODED_ARRAY_ITEM: u16 = 0x2005;
const TYPE_ANNOTATIONS_DIRECTORY_ITEM: u16 = 0x2006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildOptions {
    /// Recompute the Adler-32 checksum and SHA-1 signature. When false the
    /// input's values are copied through unchanged.
    pub update_checksum: bool,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        RebuildOptions { update_checksum: true }
    }
}

#[derive(Debug)]
struct MapItem {
    type_code: u16,
    size: u32,
    offset: u32,
}

impl MapItem {
    fn new(type_code: u16, size: u32, offset: u32) -> Self {
        MapItem { type_code, size, offset }
    }
}

/// The data section under construction, addressed by absolute file offset.
struct DataSection {
    base: u32,
    bytes: Vec<u8>,
    map: Vec<MapItem>,
}

impl DataSection {
    fn new(base: u32) -> Self {
        DataSection { base, bytes: vec![], map: vec![] }
    }

    fn place(
        &mut self,
        type_code: u16,
        alignment: u32,
        item: impl FnOnce(&mut Vec<u8>) -> usize,
    ) -> Result<u32, BytecodeError> {
        pad_to(&mut self.bytes, self.base, alignment)?;
        let offset = end_offset(&self.bytes, self.base)?;
        item(&mut self.bytes);
        match self.map.last_mut() {
            Some(m) if m.type_code == type_code => m.size += 1,
            _ => self.map.push(MapItem::new(type_code, 1, offset)),
        }
        Ok(offset)
    }

    /// Place an item once per original offset; null pointers map to 0.
    fn place_shared(
        &mut self,
        cache: &mut HashMap<u32, u32>,
        original: u32,
        type_code: u16,
        alignment: u32,
        item: impl FnOnce(&mut Vec<u8>) -> usize,
    ) -> Result<u32, BytecodeError> {
        if original == 0 {
            return Ok(0);
        }
        if let Some(offset) = cache.get(&original) {
            return Ok(*offset);
        }
        let offset = self.place(type_code, alignment, item)?;
        cache.insert(original, offset);
        Ok(offset)
    }
}

fn relocated<T>(cache: &HashMap<u32, u32>, pointer: Pointer<T>) -> u32 {
    cache.get(&pointer.offset()).copied().unwrap_or(0)
}

/// Keeps first-seen order while dropping repeated offsets.
fn push_unique<T>(seen: &mut HashSet<u32>, list: &mut Vec<Pointer<T>>, pointer: Pointer<T>) {
    if !pointer.is_null() && seen.insert(pointer.offset()) {
        list.push(pointer);
    }
}

fn compute_sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

impl DexFile {
    /// Replacement code items for every edited method, validated up front so a
    /// bad edit never produces a partial file.
    fn edited_code_items(&self, edits: &CodeEdits) -> Result<HashMap<u32, CodeItem>, BytecodeError> {
        let mut code_offs = HashMap::new();
        for class in &self.class_defs {
            if let Some(cd) = self.deref(class.class_data_off)? {
                for m in cd.methods() {
                    code_offs.insert(m.method_idx, m.code_off);
                }
            }
        }

        let mut edited = HashMap::new();
        for method_idx in edits.methods() {
            let Some(code_off) = code_offs.get(&method_idx) else {
                fail!(UnsupportedRebuildEdit, "method {} is not defined by any class in this file", method_idx);
            };
            let Some(code) = self.deref(*code_off)? else {
                fail!(UnsupportedRebuildEdit, "method {} has no code item to replace", method_idx);
            };
            let body = assemble(edits.get(method_idx).unwrap_or(&[]));
            let code = code.with_code(&body).context(|| format!("edit of method {}", method_idx))?;
            edited.insert(method_idx, code);
        }
        Ok(edited)
    }

    /// Serialize this file with `edits` applied.
    pub fn rebuild(&self, edits: &CodeEdits, options: &RebuildOptions) -> Result<Vec<u8>, BytecodeError> {
        let edited = self.edited_code_items(edits)?;

        let string_ids_size = self.string_ids.len() as u32;
        let type_ids_size = self.type_ids.len() as u32;
        let proto_ids_size = self.proto_ids.len() as u32;
        let field_ids_size = self.field_ids.len() as u32;
        let method_ids_size = self.method_ids.len() as u32;
        let class_defs_size = self.class_defs.len() as u32;

        let mut cursor = HEADER_SIZE;
        let mut section = |count: u32, width: u32| {
            let off = if count == 0 { 0 } else { cursor };
            cursor += count * width;
            off
        };
        let string_ids_off = section(string_ids_size, 4);
        let type_ids_off = section(type_ids_size, 4);
        let proto_ids_off = section(proto_ids_size, 12);
        let field_ids_off = section(field_ids_size, 8);
        let method_ids_off = section(method_ids_size, 8);
        let class_defs_off = section(class_defs_size, 32);
        let data_off = cursor;

        let mut data = DataSection::new(data_off);

        // string_data_item
        let mut string_cache = HashMap::new();
        let mut string_offs = Vec::with_capacity(self.string_ids.len());
        for (i, id) in self.string_ids.iter().enumerate() {
            let item = self.string_data(i as u32)?;
            string_offs.push(data.place_shared(
                &mut string_cache, id.string_data_off.offset(), TYPE_STRING_DATA_ITEM, 1, |b| item.write(b),
            )?);
        }

        // type_list: proto parameters and class interfaces
        let mut type_list_cache = HashMap::new();
        let proto_lists = self.proto_ids.iter().map(|p| p.parameters_off);
        let class_lists = self.class_defs.iter().map(|c| c.interfaces_off);
        for pointer in proto_lists.chain(class_lists) {
            if let Some(list) = self.deref(pointer)? {
                data.place_shared(&mut type_list_cache, pointer.offset(), TYPE_TYPE_LIST, 4, |b| list.write(b))?;
            }
        }

        // Every method with code, in class order
        let mut class_data = Vec::with_capacity(self.class_defs.len());
        for class in &self.class_defs {
            class_data.push(self.deref(class.class_data_off)?);
        }
        let mut methods = vec![];
        for cd in class_data.iter().flatten() {
            for m in cd.methods() {
                let code = match edited.get(&m.method_idx) {
                    Some(code) => Some(code.clone()),
                    None => self.deref(m.code_off).context(|| format!("code of method {}", m.method_idx))?,
                };
                if let Some(code) = code {
                    methods.push((m.method_idx, m.code_off, code));
                }
            }
        }

        // debug_info_item
        let mut debug_cache = HashMap::new();
        for (_, _, code) in &methods {
            if let Some(info) = self.deref(code.debug_info_off)? {
                data.place_shared(&mut debug_cache, code.debug_info_off.offset(), TYPE_DEBUG_INFO_ITEM, 1, |b| info.write(b))?;
            }
        }

        // code_item; edited bodies always get their own item
        let mut code_cache = HashMap::new();
        let mut code_offs = HashMap::new();
        for (method_idx, original, code) in &methods {
            let debug_off = relocated(&debug_cache, code.debug_info_off);
            let mut item = vec![];
            code.write_relocated(&mut item, debug_off).context(|| format!("code of method {}", method_idx))?;
            let off = if edited.contains_key(method_idx) {
                data.place(TYPE_CODE_ITEM, 4, |b| write_x(b, &item))?
            } else {
                data.place_shared(&mut code_cache, original.offset(), TYPE_CODE_ITEM, 4, |b| write_x(b, &item))?
            };
            code_offs.insert(*method_idx, off);
        }

        // Annotations: gather directories, sets, ref lists and items first
        let mut seen = HashSet::new();
        let mut directories: Vec<Pointer<AnnotationsDirectoryItem>> = vec![];
        for class in &self.class_defs {
            push_unique(&mut seen, &mut directories, class.annotations_off);
        }
        let mut seen_sets = HashSet::new();
        let mut seen_ref_lists = HashSet::new();
        let mut sets: Vec<Pointer<AnnotationSetItem>> = vec![];
        let mut ref_lists: Vec<Pointer<AnnotationSetRefList>> = vec![];
        let mut parsed_directories = Vec::with_capacity(directories.len());
        for pointer in &directories {
            let Some(dir) = self.deref(*pointer)? else { continue };
            push_unique(&mut seen_sets, &mut sets, dir.class_annotations_off);
            for fa in &dir.field_annotations { push_unique(&mut seen_sets, &mut sets, fa.annotations_off); }
            for ma in &dir.method_annotations { push_unique(&mut seen_sets, &mut sets, ma.annotations_off); }
            for pa in &dir.parameter_annotations { push_unique(&mut seen_ref_lists, &mut ref_lists, pa.annotations_off); }
            parsed_directories.push((*pointer, dir));
        }
        let mut parsed_ref_lists = Vec::with_capacity(ref_lists.len());
        for pointer in &ref_lists {
            let Some(list) = self.deref(*pointer)? else { continue };
            for set in &list.list { push_unique(&mut seen_sets, &mut sets, *set); }
            parsed_ref_lists.push((*pointer, list));
        }
        let mut parsed_sets = Vec::with_capacity(sets.len());
        let mut seen_items = HashSet::new();
        let mut items = vec![];
        for pointer in &sets {
            let Some(set) = self.deref(*pointer)? else { continue };
            for item in &set.entries { push_unique(&mut seen_items, &mut items, *item); }
            parsed_sets.push((*pointer, set));
        }

        // annotation_item
        let mut item_cache = HashMap::new();
        for pointer in &items {
            if let Some(item) = self.deref(*pointer)? {
                data.place_shared(&mut item_cache, pointer.offset(), TYPE_ANNOTATION_ITEM, 1, |b| item.write(b))?;
            }
        }

        // annotation_set_item
        let mut set_cache = HashMap::new();
        for (pointer, set) in &parsed_sets {
            data.place_shared(&mut set_cache, pointer.offset(), TYPE_ANNOTATION_SET_ITEM, 4, |b| {
                let mut c = write_u4(b, set.entries.len() as u32);
                for e in &set.entries { c += write_u4(b, relocated(&item_cache, *e)); }
                c
            })?;
        }

        // annotation_set_ref_list
        let mut ref_list_cache = HashMap::new();
        for (pointer, list) in &parsed_ref_lists {
            data.place_shared(&mut ref_list_cache, pointer.offset(), TYPE_ANNOTATION_SET_REF_LIST, 4, |b| {
                let mut c = write_u4(b, list.list.len() as u32);
                for s in &list.list { c += write_u4(b, relocated(&set_cache, *s)); }
                c
            })?;
        }

        // annotations_directory_item
        let mut directory_cache = HashMap::new();
        for (pointer, dir) in &parsed_directories {
            data.place_shared(&mut directory_cache, pointer.offset(), TYPE_ANNOTATIONS_DIRECTORY_ITEM, 4, |b| {
                dir.write_relocated(b, |s| relocated(&set_cache, s), |r| relocated(&ref_list_cache, r))
            })?;
        }

        // encoded_array_item
        let mut array_cache = HashMap::new();
        for class in &self.class_defs {
            if let Some(values) = self.deref(class.static_values_off)? {
                data.place_shared(&mut array_cache, class.static_values_off.offset(), TYPE_ENCODED_ARRAY_ITEM, 1, |b| values.write(b))?;
            }
        }

        // class_data_item
        let mut class_data_cache = HashMap::new();
        for (class, cd) in self.class_defs.iter().zip(&class_data) {
            if let Some(cd) = cd {
                data.place_shared(&mut class_data_cache, class.class_data_off.offset(), TYPE_CLASS_DATA_ITEM, 1, |b| {
                    cd.write_relocated(b, |m| code_offs.get(&m.method_idx).copied().unwrap_or(0))
                })?;
            }
        }

        // map_list
        pad_to(&mut data.bytes, data_off, 4)?;
        let map_off = end_offset(&data.bytes, data_off)?;
        let mut map = vec![MapItem::new(TYPE_HEADER_ITEM, 1, 0)];
        for (type_code, size, offset) in [
            (TYPE_STRING_ID_ITEM, string_ids_size, string_ids_off),
            (TYPE_TYPE_ID_ITEM, type_ids_size, type_ids_off),
            (TYPE_PROTO_ID_ITEM, proto_ids_size, proto_ids_off),
            (TYPE_FIELD_ID_ITEM, field_ids_size, field_ids_off),
            (TYPE_METHOD_ID_ITEM, method_ids_size, method_ids_off),
            (TYPE_CLASS_DEF_ITEM, class_defs_size, class_defs_off),
        ] {
            if size > 0 {
                map.push(MapItem::new(type_code, size, offset));
            }
        }
        map.append(&mut data.map);
        map.push(MapItem::new(TYPE_MAP_LIST, 1, map_off));
        map.sort_by_key(|item| item.offset);

        write_u4(&mut data.bytes, map.len() as u32);
        for item in &map {
            write_u2(&mut data.bytes, item.type_code);
            write_u2(&mut data.bytes, 0);
            write_u4(&mut data.bytes, item.size);
            write_u4(&mut data.bytes, item.offset);
        }

        // id tables
        let mut file = vec![0u8; HEADER_SIZE as usize];
        for off in &string_offs { write_u4(&mut file, *off); }
        for t in &self.type_ids { t.write(&mut file); }
        for p in &self.proto_ids { p.write_relocated(&mut file, relocated(&type_list_cache, p.parameters_off)); }
        for f in &self.field_ids { f.write(&mut file); }
        for m in &self.method_ids { m.write(&mut file); }
        for c in &self.class_defs {
            c.write_relocated(&mut file, &ClassDefOffsets {
                interfaces_off: relocated(&type_list_cache, c.interfaces_off),
                annotations_off: relocated(&directory_cache, c.annotations_off),
                class_data_off: relocated(&class_data_cache, c.class_data_off),
                static_values_off: relocated(&array_cache, c.static_values_off),
            });
        }
        debug_assert_eq!(file.len() as u32, data_off);
        let data_size = data.bytes.len() as u32;
        file.extend_from_slice(&data.bytes);

        let mut header = Header {
            magic: DEX_FILE_MAGIC,
            checksum: self.header.checksum,
            signature: self.header.signature,
            file_size: file.len() as u32,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0,
            link_off: 0,
            map_off,
            string_ids_size,
            string_ids_off,
            type_ids_size,
            type_ids_off,
            proto_ids_size,
            proto_ids_off,
            field_ids_size,
            field_ids_off,
            method_ids_size,
            method_ids_off,
            class_defs_size,
            class_defs_off,
            data_size,
            data_off,
        };
        overwrite_header(&mut file, &header);

        if options.update_checksum {
            header.signature = compute_sha1(&file[32..]);
            overwrite_header(&mut file, &header);
            header.checksum = adler32_slice(&file[12..]);
            overwrite_header(&mut file, &header);
        }

        debug!("data section: {} map entries, map at 0x{:x}", map.len(), map_off);
        info!("rebuilt dex: {} bytes, {} method bodies replaced", file.len(), edited.len());
        Ok(file)
    }
}

fn overwrite_header(buf: &mut [u8], header: &Header) {
    let mut header_bytes = Vec::with_capacity(HEADER_SIZE as usize);
    header.write(&mut header_bytes);
    buf[..HEADER_SIZE as usize].copy_from_slice(&header_bytes);
}
