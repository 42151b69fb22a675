//! # classdex
//!
//! Parse, resolve, disassemble and rebuild Android DEX files and JVM class files.
//!
//! Both formats go through the same stages: the raw bytes are parsed into an
//! index-addressed model (`DexFile`, `ClassFile`), a resolution pass turns that
//! into a graph of shared handles (`DexGraph`, `ClassGraph`), method bodies can be
//! disassembled into annotated [`instructions::Instruction`] lists, and a rebuild
//! takes the original model plus a set of replacement bodies ([`CodeEdits`]) and
//! produces fresh bytes.
//!
//! # Examples
//!
//! ```no_run
//!  use classdex::{CodeEdits, Container};
//!
//!  let bytes = std::fs::read("Hello.class").unwrap();
//!  if let Container::Class(class) = Container::parse(&bytes).unwrap() {
//!      let graph = class.resolve().unwrap();
//!      if let Some(code) = graph.method_by_name("main").and_then(|m| m.code()) {
//!          for insn in graph.disassemble(code).unwrap() {
//!              println!("{}", insn);
//!          }
//!      }
//!      assert_eq!(class.rebuild(&CodeEdits::new()).unwrap(), bytes);
//!  }
//! ```

#[macro_use]
pub mod error;
pub mod classfile;
pub mod dex;
pub mod instructions;
pub mod layout;
pub mod mutf8;
pub mod rebuild;
#[cfg(test)]
mod tests;

pub use classfile::{ClassFile, ClassGraph};
pub use dex::{DexFile, DexGraph, RebuildOptions};
pub use error::{BytecodeError, ErrorKind};
pub use rebuild::CodeEdits;

/// Either container, chosen by its leading magic.
#[derive(Debug, Clone)]
pub enum Container {
    Dex(DexFile),
    Class(ClassFile),
}

impl Container {
    pub fn parse(bytes: &[u8]) -> Result<Container, BytecodeError> {
        if bytes.starts_with(b"dex\n") {
            DexFile::from_bytes(bytes).map(Container::Dex)
        } else if bytes.starts_with(&classfile::CLASS_FILE_MAGIC) {
            ClassFile::from_bytes(bytes).map(Container::Class)
        } else {
            let head = &bytes[..bytes.len().min(4)];
            Err(err!(BadMagic, "unrecognised container magic {:02x?}", head))
        }
    }
}
