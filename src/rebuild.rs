//! The edit set consumed by the rebuild pipelines.
//!
//! Rebuild never touches a parsed model: it reads the model immutably, applies
//! these replacement bodies on the fly and produces a fresh buffer.

use std::collections::BTreeMap;

use crate::instructions::Instruction;

/// Replacement instruction lists keyed by method.
///
/// For class files the key is the index into the `methods` table; for DEX it is
/// the `method_idx` of the encoded method.
#[derive(Debug, Default, Clone)]
pub struct CodeEdits
{
    bodies: BTreeMap<u32, Vec<Instruction>>,
}

impl CodeEdits
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn replace(&mut self, method: u32, instructions: Vec<Instruction>) -> &mut Self
    {
        self.bodies.insert(method, instructions);
        self
    }

    pub fn get(&self, method: u32) -> Option<&[Instruction]>
    {
        self.bodies.get(&method).map(|v| v.as_slice())
    }

    pub fn is_empty(&self) -> bool
    {
        self.bodies.is_empty()
    }

    pub fn len(&self) -> usize
    {
        self.bodies.len()
    }

    pub fn methods(&self) -> impl Iterator<Item = u32> + '_
    {
        self.bodies.keys().copied()
    }
}

/// Concatenate the raw encodings of a replacement body.
pub fn assemble(instructions: &[Instruction]) -> Vec<u8>
{
    let mut code = Vec::with_capacity(instructions.iter().map(|i| i.raw.len()).sum());
    for i in instructions {
        code.extend_from_slice(&i.raw);
    }
    code
}
