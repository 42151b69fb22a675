use once_cell::sync::Lazy;

use crate::error::BytecodeError;
use crate::instructions::{take, Disassembler, IndexRef, Instruction, ReferenceType};

/// Operand layout following a JVM opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    Implicit,
    /// u1 local variable index (u2 under `wide`)
    Local,
    Byte,
    Short,
    /// u1 constant pool index (`ldc`)
    Constant1,
    Constant2,
    Branch2,
    Branch4,
    /// local index and signed increment
    Iinc,
    /// primitive array type code
    NewArray,
    InvokeInterface,
    InvokeDynamic,
    MultiANewArray,
    TableSwitch,
    LookupSwitch,
    Wide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JvmOpcode {
    pub value: u8,
    pub name: &'static str,
    pub operands: Operands,
}

fn put_run(table: &mut [Option<JvmOpcode>], first: u8, names: &[&'static str], operands: Operands) {
    for (i, name) in names.iter().enumerate() {
        let value = first + i as u8;
        table[value as usize] = Some(JvmOpcode { value, name, operands });
    }
}

pub static JVM_OPCODES: Lazy<Vec<Option<JvmOpcode>>> = Lazy::new(|| {
    use Operands::*;

    let mut t: Vec<Option<JvmOpcode>> = vec![Option::None; 256];
    put_run(&mut t, 0x00, &[
        "nop", "aconst_null", "iconst_m1", "iconst_0", "iconst_1", "iconst_2", "iconst_3", "iconst_4", "iconst_5",
        "lconst_0", "lconst_1", "fconst_0", "fconst_1", "fconst_2", "dconst_0", "dconst_1",
    ], Implicit);
    put_run(&mut t, 0x10, &["bipush"], Byte);
    put_run(&mut t, 0x11, &["sipush"], Short);
    put_run(&mut t, 0x12, &["ldc"], Constant1);
    put_run(&mut t, 0x13, &["ldc_w", "ldc2_w"], Constant2);
    put_run(&mut t, 0x15, &["iload", "lload", "fload", "dload", "aload"], Local);
    put_run(&mut t, 0x1a, &[
        "iload_0", "iload_1", "iload_2", "iload_3", "lload_0", "lload_1", "lload_2", "lload_3",
        "fload_0", "fload_1", "fload_2", "fload_3", "dload_0", "dload_1", "dload_2", "dload_3",
        "aload_0", "aload_1", "aload_2", "aload_3",
        "iaload", "laload", "faload", "daload", "aaload", "baload", "caload", "saload",
    ], Implicit);
    put_run(&mut t, 0x36, &["istore", "lstore", "fstore", "dstore", "astore"], Local);
    put_run(&mut t, 0x3b, &[
        "istore_0", "istore_1", "istore_2", "istore_3", "lstore_0", "lstore_1", "lstore_2", "lstore_3",
        "fstore_0", "fstore_1", "fstore_2", "fstore_3", "dstore_0", "dstore_1", "dstore_2", "dstore_3",
        "astore_0", "astore_1", "astore_2", "astore_3",
        "iastore", "lastore", "fastore", "dastore", "aastore", "bastore", "castore", "sastore",
        "pop", "pop2", "dup", "dup_x1", "dup_x2", "dup2", "dup2_x1", "dup2_x2", "swap",
        "iadd", "ladd", "fadd", "dadd", "isub", "lsub", "fsub", "dsub",
        "imul", "lmul", "fmul", "dmul", "idiv", "ldiv", "fdiv", "ddiv",
        "irem", "lrem", "frem", "drem", "ineg", "lneg", "fneg", "dneg",
        "ishl", "lshl", "ishr", "lshr", "iushr", "lushr", "iand", "land", "ior", "lor", "ixor", "lxor",
    ], Implicit);
    put_run(&mut t, 0x84, &["iinc"], Iinc);
    put_run(&mut t, 0x85, &[
        "i2l", "i2f", "i2d", "l2i", "l2f", "l2d", "f2i", "f2l", "f2d", "d2i", "d2l", "d2f", "i2b", "i2c", "i2s",
        "lcmp", "fcmpl", "fcmpg", "dcmpl", "dcmpg",
    ], Implicit);
    put_run(&mut t, 0x99, &[
        "ifeq", "ifne", "iflt", "ifge", "ifgt", "ifle",
        "if_icmpeq", "if_icmpne", "if_icmplt", "if_icmpge", "if_icmpgt", "if_icmple", "if_acmpeq", "if_acmpne",
        "goto", "jsr",
    ], Branch2);
    put_run(&mut t, 0xa9, &["ret"], Local);
    put_run(&mut t, 0xaa, &["tableswitch"], TableSwitch);
    put_run(&mut t, 0xab, &["lookupswitch"], LookupSwitch);
    put_run(&mut t, 0xac, &["ireturn", "lreturn", "freturn", "dreturn", "areturn", "return"], Implicit);
    put_run(&mut t, 0xb2, &[
        "getstatic", "putstatic", "getfield", "putfield", "invokevirtual", "invokespecial", "invokestatic",
    ], Constant2);
    put_run(&mut t, 0xb9, &["invokeinterface"], InvokeInterface);
    put_run(&mut t, 0xba, &["invokedynamic"], InvokeDynamic);
    put_run(&mut t, 0xbb, &["new"], Constant2);
    put_run(&mut t, 0xbc, &["newarray"], NewArray);
    put_run(&mut t, 0xbd, &["anewarray"], Constant2);
    put_run(&mut t, 0xbe, &["arraylength", "athrow"], Implicit);
    put_run(&mut t, 0xc0, &["checkcast", "instanceof"], Constant2);
    put_run(&mut t, 0xc2, &["monitorenter", "monitorexit"], Implicit);
    put_run(&mut t, 0xc4, &["wide"], Wide);
    put_run(&mut t, 0xc5, &["multianewarray"], MultiANewArray);
    put_run(&mut t, 0xc6, &["ifnull", "ifnonnull"], Branch2);
    put_run(&mut t, 0xc8, &["goto_w", "jsr_w"], Branch4);
    t
});

pub fn jvm_opcode(value: u8) -> Option<&'static JvmOpcode> {
    JVM_OPCODES[value as usize].as_ref()
}

#[inline] fn be_u2(raw: &[u8], at: usize) -> u16 { u16::from_be_bytes([raw[at], raw[at + 1]]) }
#[inline] fn be_i4(raw: &[u8], at: usize) -> i32 { i32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]) }

fn array_type(code: u8) -> &'static str {
    match code {
        4 => "boolean",
        5 => "char",
        6 => "float",
        7 => "double",
        8 => "byte",
        9 => "short",
        10 => "int",
        11 => "long",
        _ => "?",
    }
}

/// Decodes JVM bytecode. Branch targets are printed as absolute offsets.
#[derive(Debug, Default, Clone, Copy)]
pub struct JvmDisassembler;

impl JvmDisassembler {
    fn switch(&self, code: &[u8], offset: usize, name: &str, table: bool) -> Result<(Vec<u8>, String), BytecodeError> {
        // operands start on the next 4-byte boundary from the start of the code
        let pad = (4 - (offset + 1) % 4) % 4;
        let fixed = 1 + pad + if table { 12 } else { 8 };
        let head = take(code, offset, fixed, name)?;
        let base = 1 + pad;
        let default = offset as i64 + be_i4(&head, base) as i64;

        let (entries, text) = if table {
            let low = be_i4(&head, base + 4) as i64;
            let high = be_i4(&head, base + 8) as i64;
            if high < low {
                fail!(CodeTruncated, "{} at 0x{:x} has high {} below low {}", name, offset, high, low);
            }
            (high - low + 1, format!("{} {}..{} default={}", name, low, high, default))
        } else {
            let npairs = be_i4(&head, base + 4) as i64;
            if npairs < 0 {
                fail!(CodeTruncated, "{} at 0x{:x} has negative pair count {}", name, offset, npairs);
            }
            (npairs * 2, format!("{} npairs={} default={}", name, npairs, default))
        };

        let len = usize::try_from(fixed as i64 + entries * 4).unwrap_or(usize::MAX);
        Ok((take(code, offset, len, name)?, text))
    }
}

impl Disassembler for JvmDisassembler {
    fn disassemble(&self, code: &[u8], offset: usize) -> Result<Instruction, BytecodeError> {
        let op = take(code, offset, 1, "instruction")?[0];
        let Some(opcode) = jvm_opcode(op) else {
            fail!(UnknownTag, "unknown JVM opcode 0x{:02x} at 0x{:x}", op, offset);
        };
        let name = opcode.name;
        let constant = |index: u32| Some(IndexRef { kind: ReferenceType::Constant, index });

        let (raw, mnemonic, reference) = match opcode.operands {
            Operands::Implicit => (take(code, offset, 1, name)?, name.to_string(), None),
            Operands::Local => {
                let raw = take(code, offset, 2, name)?;
                let m = format!("{} {}", name, raw[1]);
                (raw, m, None)
            }
            Operands::Byte => {
                let raw = take(code, offset, 2, name)?;
                let m = format!("{} {}", name, raw[1] as i8);
                (raw, m, None)
            }
            Operands::Short => {
                let raw = take(code, offset, 3, name)?;
                let m = format!("{} {}", name, be_u2(&raw, 1) as i16);
                (raw, m, None)
            }
            Operands::Constant1 => {
                let raw = take(code, offset, 2, name)?;
                let index = raw[1] as u32;
                (raw, format!("{} #{}", name, index), constant(index))
            }
            Operands::Constant2 => {
                let raw = take(code, offset, 3, name)?;
                let index = be_u2(&raw, 1) as u32;
                (raw, format!("{} #{}", name, index), constant(index))
            }
            Operands::Branch2 => {
                let raw = take(code, offset, 3, name)?;
                let target = offset as i64 + be_u2(&raw, 1) as i16 as i64;
                (raw, format!("{} {}", name, target), None)
            }
            Operands::Branch4 => {
                let raw = take(code, offset, 5, name)?;
                let target = offset as i64 + be_i4(&raw, 1) as i64;
                (raw, format!("{} {}", name, target), None)
            }
            Operands::Iinc => {
                let raw = take(code, offset, 3, name)?;
                let m = format!("{} {}, {}", name, raw[1], raw[2] as i8);
                (raw, m, None)
            }
            Operands::NewArray => {
                let raw = take(code, offset, 2, name)?;
                let m = format!("{} {}", name, array_type(raw[1]));
                (raw, m, None)
            }
            Operands::InvokeInterface => {
                let raw = take(code, offset, 5, name)?;
                let index = be_u2(&raw, 1) as u32;
                (raw.clone(), format!("{} #{}, {}", name, index, raw[3]), constant(index))
            }
            Operands::InvokeDynamic => {
                let raw = take(code, offset, 5, name)?;
                let index = be_u2(&raw, 1) as u32;
                (raw, format!("{} #{}", name, index), constant(index))
            }
            Operands::MultiANewArray => {
                let raw = take(code, offset, 4, name)?;
                let index = be_u2(&raw, 1) as u32;
                (raw.clone(), format!("{} #{}, {}", name, index, raw[3]), constant(index))
            }
            Operands::TableSwitch => {
                let (raw, m) = self.switch(code, offset, name, true)?;
                (raw, m, None)
            }
            Operands::LookupSwitch => {
                let (raw, m) = self.switch(code, offset, name, false)?;
                (raw, m, None)
            }
            Operands::Wide => {
                let inner = take(code, offset, 2, name)?[1];
                match jvm_opcode(inner) {
                    Some(o) if o.operands == Operands::Iinc => {
                        let raw = take(code, offset, 6, "wide iinc")?;
                        let m = format!("wide iinc {}, {}", be_u2(&raw, 2), be_u2(&raw, 4) as i16);
                        (raw, m, None)
                    }
                    Some(o) if o.operands == Operands::Local => {
                        let raw = take(code, offset, 4, "wide")?;
                        let m = format!("wide {} {}", o.name, be_u2(&raw, 2));
                        (raw, m, None)
                    }
                    _ => fail!(UnknownTag, "opcode 0x{:02x} cannot be widened (at 0x{:x})", inner, offset),
                }
            }
        };

        Ok(Instruction { offset, raw, mnemonic, reference, annotation: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn table_shape() {
        assert_eq!(jvm_opcode(0x2d).map(|o| o.name), Some("aload_3"));
        assert_eq!(jvm_opcode(0x4e).map(|o| o.name), Some("astore_3"));
        assert_eq!(jvm_opcode(0x83).map(|o| o.name), Some("lxor"));
        assert_eq!(jvm_opcode(0x98).map(|o| o.name), Some("dcmpg"));
        assert_eq!(jvm_opcode(0xb1).map(|o| o.name), Some("return"));
        assert_eq!(jvm_opcode(0xc9).map(|o| o.name), Some("jsr_w"));
        assert!(jvm_opcode(0xca).is_none());
    }

    #[test]
    fn invoke_references_constant() {
        let code = [0x2a, 0xb7, 0x00, 0x01, 0xb1];
        let d = JvmDisassembler;
        let i = d.disassemble(&code, 1).unwrap();
        assert_eq!(i.raw, vec![0xb7, 0x00, 0x01]);
        assert_eq!(i.mnemonic, "invokespecial #1");
        assert_eq!(i.reference, Some(IndexRef { kind: ReferenceType::Constant, index: 1 }));
    }

    #[test]
    fn tableswitch_alignment() {
        // tableswitch at offset 1: two padding bytes, default, low 0, high 1, two targets
        let mut code = vec![0x03, 0xaa, 0x00, 0x00];
        for v in [20i32, 0, 1, 24, 28] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        let i = JvmDisassembler.disassemble(&code, 1).unwrap();
        assert_eq!(i.raw.len(), 1 + 2 + 12 + 8);
        assert_eq!(i.mnemonic, "tableswitch 0..1 default=21");
    }

    #[test]
    fn lookupswitch_needs_all_pairs() {
        let mut code = vec![0xab, 0x00, 0x00, 0x00];
        for v in [8i32, 2, 1, 10] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        assert_eq!(JvmDisassembler.disassemble(&code, 0).unwrap_err().kind(), ErrorKind::CodeTruncated);
    }

    #[test]
    fn wide_forms() {
        let d = JvmDisassembler;
        let i = d.disassemble(&[0xc4, 0x84, 0x01, 0x00, 0xff, 0xfe], 0).unwrap();
        assert_eq!(i.mnemonic, "wide iinc 256, -2");
        let i = d.disassemble(&[0xc4, 0x15, 0x01, 0x02], 0).unwrap();
        assert_eq!(i.mnemonic, "wide iload 258");
        assert_eq!(d.disassemble(&[0xc4, 0x00], 0).unwrap_err().kind(), ErrorKind::UnknownTag);
    }

    #[test]
    fn branch_targets_are_absolute() {
        let code = [0x00, 0x00, 0xa7, 0xff, 0xfe];
        assert_eq!(JvmDisassembler.disassemble(&code, 2).unwrap().mnemonic, "goto 0");
    }
}
