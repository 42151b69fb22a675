//! Instruction streams: walking a code range with a [`Disassembler`] and
//! annotating each pool/index reference against the resolved tables.

use crate::error::{BytecodeError, ResultExt};

/// What kind of table an instruction's index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    /// JVM constant pool slot; the pool entry carries its own kind
    Constant,
    String,
    Type,
    Field,
    Method,
    MethodProto,
    CallSite,
    MethodHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRef {
    pub kind: ReferenceType,
    pub index: u32,
}

/// One decoded instruction. `raw` is the exact encoding; a rebuild concatenates
/// the `raw` bytes of a body's instructions in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub raw: Vec<u8>,
    pub mnemonic: String,
    pub reference: Option<IndexRef>,
    pub annotation: Option<String>,
}

impl Instruction {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}: {}", self.offset, self.mnemonic)?;
        if let Some(a) = &self.annotation {
            write!(f, " // {}", a)?;
        }
        Ok(())
    }
}

/// Decodes a single instruction of one instruction set.
pub trait Disassembler {
    /// Decode the instruction starting at `offset` within `code`. `code` is the
    /// whole method body so alignment-sensitive encodings can see their base.
    fn disassemble(&self, code: &[u8], offset: usize) -> Result<Instruction, BytecodeError>;
}

/// Renders a reference into human readable text using resolved tables.
pub trait RefAnnotator {
    fn annotate(&self, reference: IndexRef) -> Result<String, BytecodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotateOptions {
    /// Visible characters of a string literal kept before it is elided
    pub max_literal_chars: usize,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        AnnotateOptions { max_literal_chars: 32 }
    }
}

/// Disassemble `code` from `start` to its end. Offsets in the result are
/// relative to the start of `code`, so `start` must be an instruction boundary.
/// The result is fully materialized; calling again simply starts over.
pub fn disassemble_all(
    code: &[u8],
    start: usize,
    dis: &impl Disassembler,
    annotator: &impl RefAnnotator,
) -> Result<Vec<Instruction>, BytecodeError> {
    if start > code.len() {
        fail!(CodeTruncated, "start offset 0x{:x} is past the end of {} bytes of code", start, code.len());
    }
    let mut out = Vec::new();
    let mut offset = start;
    while offset < code.len() {
        let mut insn = dis.disassemble(code, offset)?;
        if insn.raw.is_empty() {
            fail!(CodeTruncated, "zero-length instruction at offset 0x{:x}", offset);
        }
        if offset + insn.raw.len() > code.len() {
            fail!(
                CodeTruncated,
                "instruction {} at 0x{:x} needs {} bytes, only {} remain",
                insn.mnemonic, offset, insn.raw.len(), code.len() - offset
            );
        }
        if let Some(r) = insn.reference {
            insn.annotation = Some(
                annotator
                    .annotate(r)
                    .context(|| format!("{} at 0x{:x}", insn.mnemonic, offset))?,
            );
        }
        offset += insn.raw.len();
        out.push(insn);
    }
    Ok(out)
}

/// Slice `len` bytes of an instruction, failing with `CodeTruncated`.
pub(crate) fn take(code: &[u8], offset: usize, len: usize, name: &str) -> Result<Vec<u8>, BytecodeError> {
    match code.get(offset..offset.saturating_add(len)) {
        Some(b) => Ok(b.to_vec()),
        None => Err(err!(
            CodeTruncated,
            "{} at 0x{:x} needs {} bytes, only {} remain",
            name, offset, len, code.len().saturating_sub(offset)
        )),
    }
}

/// Quote and escape a string literal for display, eliding past `max_chars`.
pub fn quote_literal(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars * 2) + 5);
    out.push('"');
    for (i, ch) in s.chars().enumerate() {
        if i == max_chars {
            out.push_str("\"...");
            return out;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // C0 and C1 control blocks
            c if (c as u32) < 0x20 || (0x7F..=0x9F).contains(&(c as u32)) => {
                out.push_str(&format!("\\u{:04x}", c as u32))
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
