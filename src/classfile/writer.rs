//! Class file rebuild.
//!
//! Unedited structures are written back from the raw model, so a rebuild with
//! no edits reproduces the input. Tombstone slots are skipped on write; the
//! declared pool count still covers them so no index changes.

use log::info;

use crate::classfile::class_file::{AttributeInfo, ClassFile, CodeAttribute};
use crate::error::{BytecodeError, ResultExt};
use crate::layout::Writable;
use crate::rebuild::{assemble, CodeEdits};

const MAX_CODE_LENGTH: usize = 65535;

impl ClassFile {
    fn code_attribute_slot(&self, method: usize) -> Result<usize, BytecodeError> {
        let Some(m) = self.methods.get(method) else {
            fail!(UnsupportedRebuildEdit, "method #{} does not exist ({} methods)", method, self.methods.len());
        };
        for (i, a) in m.attributes.iter().enumerate() {
            let name = self.constant_pool.utf8(a.attribute_name_index)?;
            if name.as_str() == Some("Code") && !a.info.is_empty() {
                return Ok(i);
            }
        }
        fail!(UnsupportedRebuildEdit, "method #{} has no code to replace", method)
    }

    fn replace_code(attribute: &AttributeInfo, body: Vec<u8>) -> Result<AttributeInfo, BytecodeError> {
        if body.len() > MAX_CODE_LENGTH {
            fail!(UnsupportedRebuildEdit, "body of {} bytes exceeds the {} byte code limit", body.len(), MAX_CODE_LENGTH);
        }
        let mut code = CodeAttribute::from_bytes(&attribute.info)?;
        let len = body.len();
        for e in &code.exception_table {
            if e.end_pc as usize > len || e.start_pc as usize >= len || e.handler_pc as usize >= len {
                fail!(
                    UnsupportedRebuildEdit,
                    "exception range {}..{} (handler {}) falls outside new body of {} bytes",
                    e.start_pc, e.end_pc, e.handler_pc, len
                );
            }
        }
        code.code = body;
        Ok(AttributeInfo { attribute_name_index: attribute.attribute_name_index, info: code.to_bytes() })
    }

    /// Serialize this class with `edits` applied. Keys are indices into `methods`.
    pub fn rebuild(&self, edits: &CodeEdits) -> Result<Vec<u8>, BytecodeError> {
        let mut methods = self.methods.clone();
        for key in edits.methods() {
            let method = key as usize;
            let slot = self.code_attribute_slot(method)?;
            let body = assemble(edits.get(key).unwrap_or(&[]));
            methods[method].attributes[slot] = Self::replace_code(&methods[method].attributes[slot], body)
                .context(|| format!("edit of method #{}", method))?;
        }

        let rebuilt = ClassFile { methods, ..self.clone() };
        let mut bytes = vec![];
        rebuilt.write(&mut bytes);
        info!("rebuilt class file: {} bytes, {} method bodies replaced", bytes.len(), edits.len());
        Ok(bytes)
    }
}
