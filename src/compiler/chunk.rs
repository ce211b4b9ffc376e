// Kettle Bytecode Containers
// Instruction buffers, the constant pool, and compiled functions

use super::opcode::{read_operands, OpCode};
use crate::error::Span;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// A flat buffer of encoded instructions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an encoded instruction and return its starting offset
    pub fn push(&mut self, instruction: &[u8]) -> usize {
        let position = self.0.len();
        self.0.extend_from_slice(instruction);
        position
    }

    /// Overwrite bytes in place, used to back-patch jump targets
    pub fn replace_at(&mut self, offset: usize, bytes: &[u8]) {
        self.0[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

impl Deref for Instructions {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl FromIterator<Vec<u8>> for Instructions {
    fn from_iter<I: IntoIterator<Item = Vec<u8>>>(iter: I) -> Self {
        Self(iter.into_iter().flatten().collect())
    }
}

/// Disassembly: one `offset mnemonic operands` line per instruction
impl fmt::Display for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut offset = 0;

        while offset < self.0.len() {
            let op = match OpCode::try_from(self.0[offset]) {
                Ok(op) => op,
                Err(byte) => {
                    writeln!(f, "{:04} ERROR: unknown opcode {}", offset, byte)?;
                    offset += 1;
                    continue;
                }
            };

            let def = op.definition();
            let Some((operands, read)) = read_operands(&def, &self.0[offset + 1..]) else {
                writeln!(f, "{:04} ERROR: truncated operands for {}", offset, def.name)?;
                break;
            };

            write!(f, "{:04} {}", offset, def.name)?;
            for operand in &operands {
                write!(f, " {}", operand)?;
            }
            writeln!(f)?;

            offset += 1 + read;
        }

        Ok(())
    }
}

/// Values stored in the constant pool
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    Function(Rc<CompiledFunction>),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Integer(n) => write!(f, "{}", n),
            Constant::Float(n) => write!(f, "{:?}", n),
            Constant::String(s) => write!(f, "{:?}", s),
            Constant::Function(func) => write!(f, "{}", func.display_name()),
        }
    }
}

/// A function body ready for execution
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    /// One span per instruction byte
    pub spans: Vec<Span>,
    pub num_locals: usize,
    pub num_parameters: usize,
    pub name: Option<String>,
}

impl CompiledFunction {
    pub fn span_at(&self, offset: usize) -> Span {
        self.spans.get(offset).copied().unwrap_or_default()
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("<fn {}>", name),
            None => "<fn>".to_string(),
        }
    }
}

/// Compiler output: the top-level instructions and the shared constant pool
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BytecodeProgram {
    pub instructions: Instructions,
    pub spans: Vec<Span>,
    pub constants: Vec<Constant>,
}

impl BytecodeProgram {
    /// Disassemble the program and every function in its constant pool
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = format!(
            "--- {} ---\n{} bytes, {} constants\n{}",
            name,
            self.instructions.len(),
            self.constants.len(),
            self.instructions
        );

        for (index, constant) in self.constants.iter().enumerate() {
            if let Constant::Function(func) = constant {
                out.push_str(&format!(
                    "\n--- {} (constant {}) ---\n{} locals, {} parameters\n{}",
                    func.display_name(),
                    index,
                    func.num_locals,
                    func.num_parameters,
                    func.instructions
                ));
            }
        }

        out
    }
}
