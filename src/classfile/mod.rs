//! JVM class files: raw model, constant pool resolver, bytecode disassembler
//! and rebuild.

pub(crate) mod class_file;
pub(crate) mod constant_pool;
pub(crate) mod opcodes;
pub(crate) mod resolve;
mod writer;

pub use class_file::*;
pub use constant_pool::{ConstantInfo, ConstantPool};
pub use opcodes::JvmDisassembler;
pub use resolve::{
    Attribute, AttributeKind, ClassGraph, Code, Constant, DynamicRef, ExceptionHandler, Member, MemberRef, NameAndType, ResolvedPool,
};
