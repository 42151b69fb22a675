use once_cell::sync::Lazy;

use crate::error::BytecodeError;
use crate::instructions::{take, Disassembler, IndexRef, Instruction, ReferenceType};

/// Dalvik instruction formats, named after the encoding ids in the bytecode docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Format10t,
    Format10x,
    Format11n,
    Format11x,
    Format12x,
    Format20t,
    Format21c,
    Format21h,
    Format21s,
    Format21t,
    Format22b,
    Format22c,
    Format22s,
    Format22t,
    Format22x,
    Format23x,
    Format30t,
    Format31c,
    Format31i,
    Format31t,
    Format32x,
    Format35c,
    Format3rc,
    Format51l,
}

impl Format {
    /// Encoded size in bytes.
    pub const fn size(&self) -> usize {
        match self {
            Format::Format10t
            | Format::Format10x
            | Format::Format11n
            | Format::Format11x
            | Format::Format12x => 2,

            Format::Format20t
            | Format::Format21c
            | Format::Format21h
            | Format::Format21s
            | Format::Format21t
            | Format::Format22b
            | Format::Format22c
            | Format::Format22s
            | Format::Format22t
            | Format::Format22x
            | Format::Format23x => 4,

            Format::Format30t
            | Format::Format31c
            | Format::Format31i
            | Format::Format31t
            | Format::Format32x
            | Format::Format35c
            | Format::Format3rc => 6,

            Format::Format51l => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub value: u8,
    pub name: &'static str,
    pub format: Format,
    pub reference: Option<ReferenceType>,
}

fn put(table: &mut [Option<Opcode>], value: u8, name: &'static str, format: Format, reference: Option<ReferenceType>) {
    table[value as usize] = Some(Opcode { value, name, format, reference });
}

fn put_run(table: &mut [Option<Opcode>], first: u8, names: &[&'static str], format: Format, reference: Option<ReferenceType>) {
    for (i, name) in names.iter().enumerate() {
        put(table, first + i as u8, name, format, reference);
    }
}

const BINOPS: [&str; 32] = [
    "add-int", "sub-int", "mul-int", "div-int", "rem-int", "and-int", "or-int", "xor-int",
    "shl-int", "shr-int", "ushr-int",
    "add-long", "sub-long", "mul-long", "div-long", "rem-long", "and-long", "or-long", "xor-long",
    "shl-long", "shr-long", "ushr-long",
    "add-float", "sub-float", "mul-float", "div-float", "rem-float",
    "add-double", "sub-double", "mul-double", "div-double", "rem-double",
];

const BINOPS_2ADDR: [&str; 32] = [
    "add-int/2addr", "sub-int/2addr", "mul-int/2addr", "div-int/2addr", "rem-int/2addr",
    "and-int/2addr", "or-int/2addr", "xor-int/2addr", "shl-int/2addr", "shr-int/2addr", "ushr-int/2addr",
    "add-long/2addr", "sub-long/2addr", "mul-long/2addr", "div-long/2addr", "rem-long/2addr",
    "and-long/2addr", "or-long/2addr", "xor-long/2addr", "shl-long/2addr", "shr-long/2addr", "ushr-long/2addr",
    "add-float/2addr", "sub-float/2addr", "mul-float/2addr", "div-float/2addr", "rem-float/2addr",
    "add-double/2addr", "sub-double/2addr", "mul-double/2addr", "div-double/2addr", "rem-double/2addr",
];

/// Version 035 opcode table; `None` marks unused opcodes.
pub static OPCODES: Lazy<Vec<Option<Opcode>>> = Lazy::new(|| {
    use Format::*;
    use ReferenceType as R;

    let mut t = vec![None; 256];
    put(&mut t, 0x00, "nop", Format10x, None);
    put(&mut t, 0x01, "move", Format12x, None);
    put(&mut t, 0x02, "move/from16", Format22x, None);
    put(&mut t, 0x03, "move/16", Format32x, None);
    put(&mut t, 0x04, "move-wide", Format12x, None);
    put(&mut t, 0x05, "move-wide/from16", Format22x, None);
    put(&mut t, 0x06, "move-wide/16", Format32x, None);
    put(&mut t, 0x07, "move-object", Format12x, None);
    put(&mut t, 0x08, "move-object/from16", Format22x, None);
    put(&mut t, 0x09, "move-object/16", Format32x, None);
    put_run(&mut t, 0x0a, &["move-result", "move-result-wide", "move-result-object", "move-exception"], Format11x, None);
    put(&mut t, 0x0e, "return-void", Format10x, None);
    put_run(&mut t, 0x0f, &["return", "return-wide", "return-object"], Format11x, None);
    put(&mut t, 0x12, "const/4", Format11n, None);
    put(&mut t, 0x13, "const/16", Format21s, None);
    put(&mut t, 0x14, "const", Format31i, None);
    put(&mut t, 0x15, "const/high16", Format21h, None);
    put(&mut t, 0x16, "const-wide/16", Format21s, None);
    put(&mut t, 0x17, "const-wide/32", Format31i, None);
    put(&mut t, 0x18, "const-wide", Format51l, None);
    put(&mut t, 0x19, "const-wide/high16", Format21h, None);
    put(&mut t, 0x1a, "const-string", Format21c, Some(R::String));
    put(&mut t, 0x1b, "const-string/jumbo", Format31c, Some(R::String));
    put(&mut t, 0x1c, "const-class", Format21c, Some(R::Type));
    put(&mut t, 0x1d, "monitor-enter", Format11x, None);
    put(&mut t, 0x1e, "monitor-exit", Format11x, None);
    put(&mut t, 0x1f, "check-cast", Format21c, Some(R::Type));
    put(&mut t, 0x20, "instance-of", Format22c, Some(R::Type));
    put(&mut t, 0x21, "array-length", Format12x, None);
    put(&mut t, 0x22, "new-instance", Format21c, Some(R::Type));
    put(&mut t, 0x23, "new-array", Format22c, Some(R::Type));
    put(&mut t, 0x24, "filled-new-array", Format35c, Some(R::Type));
    put(&mut t, 0x25, "filled-new-array/range", Format3rc, Some(R::Type));
    put(&mut t, 0x26, "fill-array-data", Format31t, None);
    put(&mut t, 0x27, "throw", Format11x, None);
    put(&mut t, 0x28, "goto", Format10t, None);
    put(&mut t, 0x29, "goto/16", Format20t, None);
    put(&mut t, 0x2a, "goto/32", Format30t, None);
    put(&mut t, 0x2b, "packed-switch", Format31t, None);
    put(&mut t, 0x2c, "sparse-switch", Format31t, None);
    put_run(&mut t, 0x2d, &["cmpl-float", "cmpg-float", "cmpl-double", "cmpg-double", "cmp-long"], Format23x, None);
    put_run(&mut t, 0x32, &["if-eq", "if-ne", "if-lt", "if-ge", "if-gt", "if-le"], Format22t, None);
    put_run(&mut t, 0x38, &["if-eqz", "if-nez", "if-ltz", "if-gez", "if-gtz", "if-lez"], Format21t, None);
    put_run(&mut t, 0x44, &[
        "aget", "aget-wide", "aget-object", "aget-boolean", "aget-byte", "aget-char", "aget-short",
        "aput", "aput-wide", "aput-object", "aput-boolean", "aput-byte", "aput-char", "aput-short",
    ], Format23x, None);
    put_run(&mut t, 0x52, &[
        "iget", "iget-wide", "iget-object", "iget-boolean", "iget-byte", "iget-char", "iget-short",
        "iput", "iput-wide", "iput-object", "iput-boolean", "iput-byte", "iput-char", "iput-short",
    ], Format22c, Some(R::Field));
    put_run(&mut t, 0x60, &[
        "sget", "sget-wide", "sget-object", "sget-boolean", "sget-byte", "sget-char", "sget-short",
        "sput", "sput-wide", "sput-object", "sput-boolean", "sput-byte", "sput-char", "sput-short",
    ], Format21c, Some(R::Field));
    put_run(&mut t, 0x6e, &["invoke-virtual", "invoke-super", "invoke-direct", "invoke-static", "invoke-interface"],
        Format35c, Some(R::Method));
    put_run(&mut t, 0x74, &[
        "invoke-virtual/range", "invoke-super/range", "invoke-direct/range", "invoke-static/range", "invoke-interface/range",
    ], Format3rc, Some(R::Method));
    put_run(&mut t, 0x7b, &[
        "neg-int", "not-int", "neg-long", "not-long", "neg-float", "neg-double",
        "int-to-long", "int-to-float", "int-to-double", "long-to-int", "long-to-float", "long-to-double",
        "float-to-int", "float-to-long", "float-to-double", "double-to-int", "double-to-long", "double-to-float",
        "int-to-byte", "int-to-char", "int-to-short",
    ], Format12x, None);
    put_run(&mut t, 0x90, &BINOPS, Format23x, None);
    put_run(&mut t, 0xb0, &BINOPS_2ADDR, Format12x, None);
    put_run(&mut t, 0xd0, &[
        "add-int/lit16", "rsub-int", "mul-int/lit16", "div-int/lit16",
        "rem-int/lit16", "and-int/lit16", "or-int/lit16", "xor-int/lit16",
    ], Format22s, None);
    put_run(&mut t, 0xd8, &[
        "add-int/lit8", "rsub-int/lit8", "mul-int/lit8", "div-int/lit8", "rem-int/lit8", "and-int/lit8",
        "or-int/lit8", "xor-int/lit8", "shl-int/lit8", "shr-int/lit8", "ushr-int/lit8",
    ], Format22b, None);
    t
});

pub fn opcode(value: u8) -> Option<&'static Opcode> {
    OPCODES[value as usize].as_ref()
}

const PACKED_SWITCH_PAYLOAD: u16 = 0x0100;
const SPARSE_SWITCH_PAYLOAD: u16 = 0x0200;
const ARRAY_PAYLOAD: u16 = 0x0300;

#[inline] fn unit(raw: &[u8], i: usize) -> u16 { u16::from_le_bytes([raw[i * 2], raw[i * 2 + 1]]) }
#[inline] fn unit32(raw: &[u8], i: usize) -> u32 { unit(raw, i) as u32 | (unit(raw, i + 1) as u32) << 16 }

fn ref_text(kind: ReferenceType, index: u32) -> String {
    let prefix = match kind {
        ReferenceType::String => "string",
        ReferenceType::Type => "type",
        ReferenceType::Field => "field",
        ReferenceType::Method => "method",
        ReferenceType::MethodProto => "proto",
        ReferenceType::CallSite => "call_site",
        ReferenceType::MethodHandle => "method_handle",
        ReferenceType::Constant => "constant",
    };
    format!("{}@{}", prefix, index)
}

/// Decodes Dalvik (dex 035) instructions, including the switch and
/// array-data payload pseudo-instructions.
#[derive(Debug, Default, Clone, Copy)]
pub struct DalvikDisassembler;

impl DalvikDisassembler {
    fn payload(&self, code: &[u8], offset: usize, ident: u16) -> Result<Instruction, BytecodeError> {
        let head = take(code, offset, 4, "payload header")?;
        let size = unit(&head, 1) as u64;
        let (name, units) = match ident {
            PACKED_SWITCH_PAYLOAD => ("packed-switch-payload", size * 2 + 4),
            SPARSE_SWITCH_PAYLOAD => ("sparse-switch-payload", size * 4 + 2),
            _ => {
                let head = take(code, offset, 8, "array-payload header")?;
                let count = unit32(&head, 2) as u64;
                ("array-payload", (count * size).div_ceil(2) + 4)
            }
        };
        let len = usize::try_from(units * 2).unwrap_or(usize::MAX);
        let raw = take(code, offset, len, name)?;
        let mnemonic = match ident {
            ARRAY_PAYLOAD => format!("{} width={} count={}", name, size, unit32(&raw, 2)),
            _ => format!("{} size={}", name, size),
        };
        Ok(Instruction { offset, raw, mnemonic, reference: None, annotation: None })
    }
}

impl Disassembler for DalvikDisassembler {
    fn disassemble(&self, code: &[u8], offset: usize) -> Result<Instruction, BytecodeError> {
        let first = take(code, offset, 2, "instruction")?;
        let op = first[0];
        let hi = first[1];

        if op == 0x00 && hi != 0x00 {
            let ident = u16::from_le_bytes([op, hi]);
            if matches!(ident, PACKED_SWITCH_PAYLOAD | SPARSE_SWITCH_PAYLOAD | ARRAY_PAYLOAD) {
                return self.payload(code, offset, ident);
            }
            fail!(UnknownTag, "unknown payload identifier 0x{:04x} at 0x{:x}", ident, offset);
        }

        let Some(opcode) = opcode(op) else {
            fail!(UnknownTag, "unused opcode 0x{:02x} at 0x{:x}", op, offset);
        };
        let raw = take(code, offset, opcode.format.size(), opcode.name)?;

        let a4 = hi & 0x0f;
        let b4 = hi >> 4;
        let mut index = None;

        use Format::*;
        let operands = match opcode.format {
            Format10x => String::new(),
            Format12x => format!("v{}, v{}", a4, b4),
            Format11n => format!("v{}, #{}", a4, ((hi as i8) >> 4)),
            Format11x => format!("v{}", hi),
            Format10t => format!("{:+}", hi as i8),
            Format20t => format!("{:+}", unit(&raw, 1) as i16),
            Format22x => format!("v{}, v{}", hi, unit(&raw, 1)),
            Format21t => format!("v{}, {:+}", hi, unit(&raw, 1) as i16),
            Format21s => format!("v{}, #{}", hi, unit(&raw, 1) as i16),
            Format21h => {
                if opcode.value == 0x19 {
                    format!("v{}, #0x{:x}", hi, (unit(&raw, 1) as u64) << 48)
                } else {
                    format!("v{}, #0x{:x}", hi, (unit(&raw, 1) as u32) << 16)
                }
            }
            Format21c => {
                index = Some(unit(&raw, 1) as u32);
                format!("v{}", hi)
            }
            Format23x => format!("v{}, v{}, v{}", hi, raw[2], raw[3]),
            Format22b => format!("v{}, v{}, #{}", hi, raw[2], raw[3] as i8),
            Format22t => format!("v{}, v{}, {:+}", a4, b4, unit(&raw, 1) as i16),
            Format22s => format!("v{}, v{}, #{}", a4, b4, unit(&raw, 1) as i16),
            Format22c => {
                index = Some(unit(&raw, 1) as u32);
                format!("v{}, v{}", a4, b4)
            }
            Format30t => format!("{:+}", unit32(&raw, 1) as i32),
            Format32x => format!("v{}, v{}", unit(&raw, 1), unit(&raw, 2)),
            Format31i => format!("v{}, #{}", hi, unit32(&raw, 1) as i32),
            Format31t => format!("v{}, {:+}", hi, unit32(&raw, 1) as i32),
            Format31c => {
                index = Some(unit32(&raw, 1));
                format!("v{}", hi)
            }
            Format35c => {
                index = Some(unit(&raw, 1) as u32);
                let regs_unit = unit(&raw, 2);
                let all = [regs_unit & 0xf, (regs_unit >> 4) & 0xf, (regs_unit >> 8) & 0xf, regs_unit >> 12, a4 as u16];
                let count = (b4 as usize).min(5);
                let regs: Vec<String> = all[..count].iter().map(|r| format!("v{}", r)).collect();
                format!("{{{}}}", regs.join(", "))
            }
            Format3rc => {
                index = Some(unit(&raw, 1) as u32);
                let first = unit(&raw, 2) as u32;
                match hi {
                    0 => String::from("{}"),
                    n => format!("{{v{} .. v{}}}", first, first + n as u32 - 1),
                }
            }
            Format51l => {
                let lo = unit32(&raw, 1) as u64;
                let high = unit32(&raw, 3) as u64;
                format!("v{}, #{}", hi, (high << 32 | lo) as i64)
            }
        };

        let reference = match (opcode.reference, index) {
            (Some(kind), Some(index)) => Some(IndexRef { kind, index }),
            _ => None,
        };

        let mut mnemonic = String::from(opcode.name);
        let mut parts = vec![];
        if !operands.is_empty() { parts.push(operands); }
        if let Some(r) = reference { parts.push(ref_text(r.kind, r.index)); }
        if !parts.is_empty() {
            mnemonic.push(' ');
            mnemonic.push_str(&parts.join(", "));
        }

        Ok(Instruction { offset, raw, mnemonic, reference, annotation: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn table_shape() {
        assert_eq!(OPCODES.len(), 256);
        assert_eq!(opcode(0x6e).map(|o| o.name), Some("invoke-virtual"));
        assert_eq!(opcode(0xaf).map(|o| o.name), Some("rem-double"));
        assert_eq!(opcode(0xcf).map(|o| o.name), Some("rem-double/2addr"));
        assert_eq!(opcode(0xe2).map(|o| o.name), Some("ushr-int/lit8"));
        assert!(opcode(0x3e).is_none());
        assert!(opcode(0x73).is_none());
        assert!(opcode(0xe3).is_none());
    }

    #[test]
    fn const_string_carries_reference() {
        let code = [0x1a, 0x00, 0x05, 0x00];
        let i = DalvikDisassembler.disassemble(&code, 0).unwrap();
        assert_eq!(i.raw.len(), 4);
        assert_eq!(i.mnemonic, "const-string v0, string@5");
        assert_eq!(i.reference, Some(IndexRef { kind: ReferenceType::String, index: 5 }));
    }

    #[test]
    fn invoke_registers() {
        // invoke-direct {v1, v2}, method@3
        let code = [0x70, 0x20, 0x03, 0x00, 0x21, 0x00];
        let i = DalvikDisassembler.disassemble(&code, 0).unwrap();
        assert_eq!(i.mnemonic, "invoke-direct {v1, v2}, method@3");
        assert_eq!(i.reference.map(|r| r.kind), Some(ReferenceType::Method));
    }

    #[test]
    fn literals_and_branches() {
        let d = DalvikDisassembler;
        assert_eq!(d.disassemble(&[0x12, 0xf1], 0).unwrap().mnemonic, "const/4 v1, #-1");
        assert_eq!(d.disassemble(&[0x28, 0xfe], 0).unwrap().mnemonic, "goto -2");
        assert_eq!(d.disassemble(&[0x0e, 0x00], 0).unwrap().mnemonic, "return-void");
    }

    #[test]
    fn payload_lengths() {
        // packed-switch-payload, 2 targets: 4 + 2*2 = 8 units
        let mut code = vec![0x00, 0x01, 0x02, 0x00];
        code.extend_from_slice(&[0u8; 12]);
        let i = DalvikDisassembler.disassemble(&code, 0).unwrap();
        assert_eq!(i.raw.len(), 16);

        // array payload, width 1, 3 elements: 4 + 2 = 6 units
        let mut code = vec![0x00, 0x03, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00];
        code.extend_from_slice(&[1, 2, 3, 0]);
        let i = DalvikDisassembler.disassemble(&code, 0).unwrap();
        assert_eq!(i.raw.len(), 12);
        assert_eq!(i.mnemonic, "array-payload width=1 count=3");
    }

    #[test]
    fn unused_and_truncated() {
        let d = DalvikDisassembler;
        assert_eq!(d.disassemble(&[0x3e, 0x00], 0).unwrap_err().kind(), ErrorKind::UnknownTag);
        assert_eq!(d.disassemble(&[0x1a, 0x00, 0x05], 0).unwrap_err().kind(), ErrorKind::CodeTruncated);
    }
}
