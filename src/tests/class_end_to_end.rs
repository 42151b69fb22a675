use crate::classfile::{AttributeKind, ClassFile, Constant};
use crate::error::ErrorKind;
use crate::instructions::AnnotateOptions;
use crate::rebuild::CodeEdits;
use crate::tests::fixtures::{hello_class, HELLO_CODE, HELLO_INIT_CODE, HELLO_LONG, HELLO_MAIN_CODE};
use crate::Container;

fn parse() -> ClassFile {
    match Container::parse(&hello_class()).expect("parse hello class") {
        Container::Class(class) => class,
        other => panic!("expected a class file, got {:?}", other),
    }
}

#[test]
fn resolves_names_and_attributes() {
    let graph = parse().resolve().expect("resolve hello class");
    assert_eq!(&*graph.this_class, "Hello");
    assert_eq!(graph.super_class.as_deref(), Some("java/lang/Object"));
    let names: Vec<&str> = graph.methods.iter().map(|m| &*m.name).collect();
    assert_eq!(names, vec!["<init>", "main", "stub"]);
    assert_eq!(&*graph.methods[1].descriptor, "([Ljava/lang/String;)V");
    assert_eq!(graph.source_file().expect("source file").as_deref(), Some("Hello.java"));

    let main = graph.method_by_name("main").and_then(|m| m.code()).expect("main has code");
    assert_eq!(main.code, HELLO_MAIN_CODE);
    assert_eq!(main.exception_table.len(), 1);
    assert_eq!(main.exception_table[0].catch_type, None);
}

#[test]
fn long_constant_leaves_a_tombstone() {
    let graph = parse().resolve().expect("resolve hello class");
    assert!(matches!(&**graph.pool.get(HELLO_LONG).expect("long"), Constant::Long(42)));
    let err = graph.pool.get(HELLO_LONG + 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DanglingReference);
    assert_eq!(&*graph.pool.utf8(HELLO_LONG + 2).expect("entry after the long"), "SourceFile");
}

#[test]
fn empty_code_attribute_stays_opaque() {
    let graph = parse().resolve().expect("resolve hello class");
    let stub = graph.method_by_name("stub").expect("stub method");
    assert!(stub.code().is_none());
    assert_eq!(stub.attributes.len(), 1);
    assert_eq!(stub.attributes[0].kind, AttributeKind::Opaque(vec![]));
}

#[test]
fn disassembly_is_annotated_from_the_pool() {
    let graph = parse().resolve().expect("resolve hello class");

    let init = graph.method_by_name("<init>").and_then(|m| m.code()).expect("init code");
    let insns = graph.disassemble(init).expect("disassemble <init>");
    let mnemonics: Vec<&str> = insns.iter().map(|i| i.mnemonic.as_str()).collect();
    assert_eq!(mnemonics, vec!["aload_0", "invokespecial #9", "return"]);
    assert_eq!(insns[1].annotation.as_deref(), Some("java/lang/Object.<init> ()V"));
    assert_eq!(insns[2].offset, 4);

    let main = graph.method_by_name("main").and_then(|m| m.code()).expect("main code");
    let insns = graph.disassemble(main).expect("disassemble main");
    assert_eq!(insns[0].annotation.as_deref(), Some("\"Hello, world\""));
    assert_eq!(insns[1].mnemonic, "ldc2_w #14");
    assert_eq!(insns[1].annotation.as_deref(), Some("42l"));
    assert!(insns[2..].iter().all(|i| i.annotation.is_none()));

    // disassembling again starts over
    assert_eq!(graph.disassemble(main).expect("second pass"), insns);
}

#[test]
fn disassembly_can_start_mid_body() {
    let graph = parse().resolve().expect("resolve hello class");
    let main = graph.method_by_name("main").and_then(|m| m.code()).expect("main code");
    let all = graph.disassemble(main).expect("disassemble main");
    let tail = graph.disassemble_from(main, 2).expect("disassemble from ldc2_w");
    assert_eq!(tail, all[1..]);
    assert_eq!(tail[0].offset, 2);
    assert_eq!(tail[0].annotation.as_deref(), Some("42l"));
}

#[test]
fn long_literals_are_elided() {
    let mut graph = parse().resolve().expect("resolve hello class");
    graph.set_annotate_options(AnnotateOptions { max_literal_chars: 5 });
    let main = graph.method_by_name("main").and_then(|m| m.code()).cloned().expect("main code");
    let insns = graph.disassemble(&main).expect("disassemble main");
    assert_eq!(insns[0].annotation.as_deref(), Some("\"Hello\"..."));
}

#[test]
fn rebuild_without_edits_is_byte_identical() {
    let bytes = hello_class();
    let class = ClassFile::from_bytes(&bytes).expect("parse");
    assert_eq!(class.rebuild(&CodeEdits::new()).expect("rebuild"), bytes);
}

#[test]
fn raw_nul_in_a_utf8_entry_survives_rebuild() {
    let mut bytes = hello_class();
    let at = bytes.windows(12).position(|w| w == b"Hello, world").expect("literal in pool");
    bytes[at + 5] = 0;

    let class = ClassFile::from_bytes(&bytes).expect("parse");
    assert_eq!(class.rebuild(&CodeEdits::new()).expect("rebuild"), bytes);

    let graph = class.resolve().expect("resolve");
    let main = graph.method_by_name("main").and_then(|m| m.code()).expect("main code");
    let insns = graph.disassemble(main).expect("disassemble main");
    assert_eq!(insns[0].annotation.as_deref(), Some("\"Hello\\u0000 world\""));
}

#[test]
fn rebuild_with_disassembled_body_is_byte_identical() {
    let bytes = hello_class();
    let class = ClassFile::from_bytes(&bytes).expect("parse");
    let graph = class.resolve().expect("resolve");
    let main = graph.methods[1].code().expect("main code");

    let mut edits = CodeEdits::new();
    edits.replace(1, graph.disassemble(main).expect("disassemble"));
    assert_eq!(class.rebuild(&edits).expect("rebuild"), bytes);
}

#[test]
fn rebuild_replaces_a_body() {
    let class = parse();
    let graph = class.resolve().expect("resolve");
    let init = graph.methods[0].code().expect("init code");
    let ret = graph.disassemble(init).expect("disassemble").pop().expect("return");

    let mut edits = CodeEdits::new();
    edits.replace(0, vec![ret]);
    let rebuilt = class.rebuild(&edits).expect("rebuild");
    assert_eq!(rebuilt.len(), hello_class().len() - (HELLO_INIT_CODE.len() - 1));

    let reparsed = ClassFile::from_bytes(&rebuilt).expect("reparse").resolve().expect("resolve");
    let code = reparsed.methods[0].code().expect("init code");
    assert_eq!(code.code, vec![0xb1]);
    assert_eq!(code.max_stack, 1);
    assert_eq!(reparsed.methods[1].code().expect("main code").code, HELLO_MAIN_CODE);
    assert_eq!(reparsed.method_by_name("stub").expect("stub").attributes[0].kind, AttributeKind::Opaque(vec![]));
}

#[test]
fn rebuild_rejects_unsupported_edits() {
    let class = parse();
    let graph = class.resolve().expect("resolve");
    let init = graph.methods[0].code().expect("init code");
    let ret = graph.disassemble(init).expect("disassemble").pop().expect("return");

    let rejected = |method: u32| {
        let mut edits = CodeEdits::new();
        edits.replace(method, vec![ret.clone()]);
        class.rebuild(&edits).unwrap_err().kind()
    };
    // the exception range of main no longer fits
    assert_eq!(rejected(1), ErrorKind::UnsupportedRebuildEdit);
    // stub has no code to replace
    assert_eq!(rejected(2), ErrorKind::UnsupportedRebuildEdit);
    assert_eq!(rejected(7), ErrorKind::UnsupportedRebuildEdit);
}

#[test]
fn code_attribute_name_is_shared() {
    let class = parse();
    let names: Vec<u16> = class.methods.iter().map(|m| m.attributes[0].attribute_name_index).collect();
    assert_eq!(names, vec![HELLO_CODE; 3]);
}
