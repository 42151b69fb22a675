//! Small containers assembled byte by byte, so every offset in them is known.

use crate::dex::leb::encode_uleb128;
use crate::dex::{Header, DEX_FILE_MAGIC, ENDIAN_CONSTANT, HEADER_SIZE, NO_INDEX};
use crate::layout::Writable;

pub const DEX_STRINGS: [&str; 4] = ["<init>", "Hello", "LHello;", "V"];
pub const DEX_CHECKSUM: u32 = 0xdeadbeef;

/// `const-string v0, string@1; return-void`
pub const DEX_INIT_BODY: [u16; 3] = [0x001a, 0x0001, 0x000e];

fn le_u2(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn le_u4(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// A dex with one class `LHello;` that declares no superclass. With `with_method`
/// the class has a single direct `<init>` carrying [`DEX_INIT_BODY`]; without it
/// the class has no class data at all.
pub fn hello_dex(with_method: bool) -> Vec<u8> {
    let string_ids_off = HEADER_SIZE;
    let type_ids_off = string_ids_off + 4 * 4;
    let proto_ids_off = type_ids_off + 2 * 4;
    let method_ids_off = proto_ids_off + 12;
    let class_defs_off = method_ids_off + 8;
    let data_off = class_defs_off + 32;

    let mut data = vec![];
    let code_off = data_off;
    le_u2(&mut data, 2); // registers
    le_u2(&mut data, 1); // ins
    le_u2(&mut data, 0); // outs
    le_u2(&mut data, 0); // tries
    le_u4(&mut data, 0); // debug_info_off
    le_u4(&mut data, DEX_INIT_BODY.len() as u32);
    for unit in DEX_INIT_BODY {
        le_u2(&mut data, unit);
    }

    let mut string_offs = vec![];
    for s in DEX_STRINGS {
        string_offs.push(data_off + data.len() as u32);
        data.extend(encode_uleb128(s.len() as u32));
        data.extend_from_slice(s.as_bytes());
        data.push(0);
    }

    let class_data_off = if with_method {
        let off = data_off + data.len() as u32;
        data.extend_from_slice(&[0, 0, 1, 0]);
        data.extend(encode_uleb128(0)); // method_idx_diff
        data.extend(encode_uleb128(0x10001)); // public constructor
        data.extend(encode_uleb128(code_off));
        off
    } else {
        0
    };

    let mut tables = vec![];
    for off in &string_offs {
        le_u4(&mut tables, *off);
    }
    le_u4(&mut tables, 2); // LHello;
    le_u4(&mut tables, 3); // V
    le_u4(&mut tables, 3); // proto shorty "V"
    le_u4(&mut tables, 1); // returns V
    le_u4(&mut tables, 0); // no parameters
    le_u2(&mut tables, 0); // method class
    le_u2(&mut tables, 0); // method proto
    le_u4(&mut tables, 0); // method name "<init>"
    le_u4(&mut tables, 0); // class_idx
    le_u4(&mut tables, 0x1); // public
    le_u4(&mut tables, NO_INDEX); // superclass
    le_u4(&mut tables, 0); // interfaces
    le_u4(&mut tables, NO_INDEX); // source file
    le_u4(&mut tables, 0); // annotations
    le_u4(&mut tables, class_data_off);
    le_u4(&mut tables, 0); // static values

    let file_size = data_off + data.len() as u32;
    let header = Header {
        magic: DEX_FILE_MAGIC,
        checksum: DEX_CHECKSUM,
        signature: [0x5a; 20],
        file_size,
        header_size: HEADER_SIZE,
        endian_tag: ENDIAN_CONSTANT,
        link_size: 0,
        link_off: 0,
        map_off: 0,
        string_ids_size: DEX_STRINGS.len() as u32,
        string_ids_off,
        type_ids_size: 2,
        type_ids_off,
        proto_ids_size: 1,
        proto_ids_off,
        field_ids_size: 0,
        field_ids_off: 0,
        method_ids_size: 1,
        method_ids_off,
        class_defs_size: 1,
        class_defs_off,
        data_size: data.len() as u32,
        data_off,
    };

    let mut file = vec![];
    header.write(&mut file);
    file.extend(tables);
    assert_eq!(file.len() as u32, data_off);
    file.extend(data);
    file
}

pub const RICH_STRINGS: [&str; 11] = [
    "<init>", "I", "LAnno;", "LRich;", "Ljava/lang/Runnable;", "Rich.java", "V", "VL", "count", "run", "value",
];
/// Method id of `LRich;->run(Ljava/lang/Runnable;)V`
pub const RICH_RUN: u32 = 1;
/// `nop; nop; return-void`, an odd unit count so the tries are padded
pub const RICH_RUN_BODY: [u16; 3] = [0x0000, 0x0000, 0x000e];

fn align4(data: &mut Vec<u8>, data_off: u32) -> u32 {
    while (data_off as usize + data.len()) % 4 != 0 {
        data.push(0);
    }
    data_off + data.len() as u32
}

/// A dex with one class `LRich;` that uses every data item the rebuild
/// relocates: an interface list shared with a proto, a debug_info_item shared
/// by two code items, tries with a typed and a catch-all handler, an
/// annotation set referenced from the class, a field, a method and a
/// parameter ref-list, and static values.
pub fn rich_dex() -> Vec<u8> {
    let string_ids_off = HEADER_SIZE;
    let type_ids_off = string_ids_off + RICH_STRINGS.len() as u32 * 4;
    let proto_ids_off = type_ids_off + 5 * 4;
    let field_ids_off = proto_ids_off + 2 * 12;
    let method_ids_off = field_ids_off + 8;
    let class_defs_off = method_ids_off + 2 * 8;
    let data_off = class_defs_off + 32;

    let mut data = vec![];

    let type_list_off = align4(&mut data, data_off);
    le_u4(&mut data, 1);
    le_u2(&mut data, 3); // Ljava/lang/Runnable;

    let debug_off = data_off + data.len() as u32;
    data.extend_from_slice(&[0x01, 0x00, 0x07, 0x0e, 0x00]);

    let init_off = align4(&mut data, data_off);
    le_u2(&mut data, 1); // registers
    le_u2(&mut data, 1); // ins
    le_u2(&mut data, 0); // outs
    le_u2(&mut data, 0); // tries
    le_u4(&mut data, debug_off);
    le_u4(&mut data, 1);
    le_u2(&mut data, 0x000e);

    let run_off = align4(&mut data, data_off);
    le_u2(&mut data, 2);
    le_u2(&mut data, 2);
    le_u2(&mut data, 0);
    le_u2(&mut data, 2);
    le_u4(&mut data, debug_off);
    le_u4(&mut data, RICH_RUN_BODY.len() as u32);
    for unit in RICH_RUN_BODY {
        le_u2(&mut data, unit);
    }
    le_u2(&mut data, 0); // padding
    le_u4(&mut data, 0);
    le_u2(&mut data, 1);
    le_u2(&mut data, 1); // handler at byte 1 of the list
    le_u4(&mut data, 1);
    le_u2(&mut data, 1);
    le_u2(&mut data, 4); // handler at byte 4 of the list
    // two handlers: Runnable at 2, then catch-all at 2
    data.extend_from_slice(&[0x02, 0x01, 0x03, 0x02, 0x00, 0x02]);

    let mut string_offs = vec![];
    for s in RICH_STRINGS {
        string_offs.push(data_off + data.len() as u32);
        data.extend(encode_uleb128(s.len() as u32));
        data.extend_from_slice(s.as_bytes());
        data.push(0);
    }

    // runtime-visible LAnno;(value = 7)
    let item_off = data_off + data.len() as u32;
    data.extend_from_slice(&[0x01, 0x01, 0x01, 0x0a, 0x04, 0x07]);

    let set_off = align4(&mut data, data_off);
    le_u4(&mut data, 1);
    le_u4(&mut data, item_off);

    let ref_list_off = align4(&mut data, data_off);
    le_u4(&mut data, 2);
    le_u4(&mut data, set_off);
    le_u4(&mut data, 0);

    let directory_off = align4(&mut data, data_off);
    le_u4(&mut data, set_off);
    le_u4(&mut data, 1);
    le_u4(&mut data, 1);
    le_u4(&mut data, 1);
    le_u4(&mut data, 0); // field count
    le_u4(&mut data, set_off);
    le_u4(&mut data, RICH_RUN);
    le_u4(&mut data, set_off);
    le_u4(&mut data, RICH_RUN);
    le_u4(&mut data, ref_list_off);

    // static values: { 5 }
    let static_values_off = data_off + data.len() as u32;
    data.extend_from_slice(&[0x01, 0x04, 0x05]);

    let class_data_off = data_off + data.len() as u32;
    data.extend_from_slice(&[1, 0, 1, 1]);
    data.extend(encode_uleb128(0));
    data.extend(encode_uleb128(0x9)); // public static
    data.extend(encode_uleb128(0));
    data.extend(encode_uleb128(0x10001));
    data.extend(encode_uleb128(init_off));
    data.extend(encode_uleb128(RICH_RUN));
    data.extend(encode_uleb128(0x1));
    data.extend(encode_uleb128(run_off));

    let mut tables = vec![];
    for off in &string_offs {
        le_u4(&mut tables, *off);
    }
    for descriptor_idx in [1, 2, 3, 4, 6] {
        le_u4(&mut tables, descriptor_idx);
    }
    le_u4(&mut tables, 6); // shorty "V"
    le_u4(&mut tables, 4); // returns V
    le_u4(&mut tables, 0);
    le_u4(&mut tables, 7); // shorty "VL"
    le_u4(&mut tables, 4);
    le_u4(&mut tables, type_list_off);
    le_u2(&mut tables, 2); // LRich;
    le_u2(&mut tables, 0); // I
    le_u4(&mut tables, 8); // count
    le_u2(&mut tables, 2);
    le_u2(&mut tables, 0);
    le_u4(&mut tables, 0); // <init>
    le_u2(&mut tables, 2);
    le_u2(&mut tables, 1);
    le_u4(&mut tables, 9); // run
    le_u4(&mut tables, 2); // class_idx
    le_u4(&mut tables, 0x1);
    le_u4(&mut tables, NO_INDEX);
    le_u4(&mut tables, type_list_off);
    le_u4(&mut tables, 5); // Rich.java
    le_u4(&mut tables, directory_off);
    le_u4(&mut tables, class_data_off);
    le_u4(&mut tables, static_values_off);

    let file_size = data_off + data.len() as u32;
    let header = Header {
        magic: DEX_FILE_MAGIC,
        checksum: DEX_CHECKSUM,
        signature: [0x5a; 20],
        file_size,
        header_size: HEADER_SIZE,
        endian_tag: ENDIAN_CONSTANT,
        link_size: 0,
        link_off: 0,
        map_off: 0,
        string_ids_size: RICH_STRINGS.len() as u32,
        string_ids_off,
        type_ids_size: 5,
        type_ids_off,
        proto_ids_size: 2,
        proto_ids_off,
        field_ids_size: 1,
        field_ids_off,
        method_ids_size: 2,
        method_ids_off,
        class_defs_size: 1,
        class_defs_off,
        data_size: data.len() as u32,
        data_off,
    };

    let mut file = vec![];
    header.write(&mut file);
    file.extend(tables);
    assert_eq!(file.len() as u32, data_off);
    file.extend(data);
    file
}

fn be_u2(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn be_u4(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn utf8(buf: &mut Vec<u8>, s: &str) {
    buf.push(1);
    be_u2(buf, s.len() as u16);
    buf.extend_from_slice(s.as_bytes());
}

fn code_attribute(buf: &mut Vec<u8>, max_stack: u16, max_locals: u16, code: &[u8], exceptions: &[[u16; 4]]) {
    be_u2(buf, HELLO_CODE);
    be_u4(buf, (12 + code.len() + exceptions.len() * 8) as u32);
    be_u2(buf, max_stack);
    be_u2(buf, max_locals);
    be_u4(buf, code.len() as u32);
    buf.extend_from_slice(code);
    be_u2(buf, exceptions.len() as u16);
    for e in exceptions {
        for v in e {
            be_u2(buf, *v);
        }
    }
    be_u2(buf, 0);
}

/// Pool slot of the `Code` attribute name in [`hello_class`].
pub const HELLO_CODE: u16 = 7;
/// Pool slot of the `Long` constant; slot 15 is its tombstone.
pub const HELLO_LONG: u16 = 14;

pub const HELLO_INIT_CODE: [u8; 5] = [0x2a, 0xb7, 0x00, 0x09, 0xb1];
/// `ldc #12; ldc2_w #14; pop2; pop; return`, guarded by one catch-all entry
pub const HELLO_MAIN_CODE: [u8; 8] = [0x12, 0x0c, 0x14, 0x00, 0x0e, 0x58, 0x57, 0xb1];

/// class `Hello` with methods `<init>`, `main` and `stub`; `stub` carries a
/// Code attribute whose payload is empty.
pub fn hello_class() -> Vec<u8> {
    let mut b = vec![0xca, 0xfe, 0xba, 0xbe];
    be_u2(&mut b, 0);
    be_u2(&mut b, 52);

    be_u2(&mut b, 19);
    utf8(&mut b, "Hello"); // 1
    b.push(7);
    be_u2(&mut b, 1); // 2
    utf8(&mut b, "java/lang/Object"); // 3
    b.push(7);
    be_u2(&mut b, 3); // 4
    utf8(&mut b, "<init>"); // 5
    utf8(&mut b, "()V"); // 6
    utf8(&mut b, "Code"); // 7
    b.push(12);
    be_u2(&mut b, 5);
    be_u2(&mut b, 6); // 8
    b.push(10);
    be_u2(&mut b, 4);
    be_u2(&mut b, 8); // 9
    utf8(&mut b, "main"); // 10
    utf8(&mut b, "([Ljava/lang/String;)V"); // 11
    b.push(8);
    be_u2(&mut b, 13); // 12
    utf8(&mut b, "Hello, world"); // 13
    b.push(5);
    b.extend_from_slice(&42i64.to_be_bytes()); // 14, 15
    utf8(&mut b, "SourceFile"); // 16
    utf8(&mut b, "Hello.java"); // 17
    utf8(&mut b, "stub"); // 18

    be_u2(&mut b, 0x0021); // public super
    be_u2(&mut b, 2);
    be_u2(&mut b, 4);
    be_u2(&mut b, 0); // interfaces
    be_u2(&mut b, 0); // fields

    be_u2(&mut b, 3);
    be_u2(&mut b, 0x0001);
    be_u2(&mut b, 5);
    be_u2(&mut b, 6);
    be_u2(&mut b, 1);
    code_attribute(&mut b, 1, 1, &HELLO_INIT_CODE, &[]);

    be_u2(&mut b, 0x0009);
    be_u2(&mut b, 10);
    be_u2(&mut b, 11);
    be_u2(&mut b, 1);
    code_attribute(&mut b, 4, 1, &HELLO_MAIN_CODE, &[[0, 7, 7, 0]]);

    be_u2(&mut b, 0x0001);
    be_u2(&mut b, 18);
    be_u2(&mut b, 6);
    be_u2(&mut b, 1);
    be_u2(&mut b, HELLO_CODE);
    be_u4(&mut b, 0);

    be_u2(&mut b, 1);
    be_u2(&mut b, 16);
    be_u4(&mut b, 2);
    be_u2(&mut b, 17);
    b
}
