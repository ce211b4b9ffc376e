// Kettle Binary Format
// Serializes compiled programs to `.ktlc` files and reads them back
//
// Constant envelope: [tag u32 LE][size u32 LE, variable-length types only][payload]
// Program file: "KTLC", version byte, constants, instructions, spans

use crate::compiler::chunk::{BytecodeProgram, CompiledFunction, Constant, Instructions};
use crate::error::{Position, Span};
use std::rc::Rc;
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"KTLC";
pub const VERSION: u8 = 1;

pub const TAG_INTEGER: u32 = 1;
pub const TAG_FLOAT: u32 = 2;
pub const TAG_STRING: u32 = 3;
pub const TAG_FUNCTION: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid header: not a Kettle bytecode file")]
    InvalidHeader,
    #[error("unsupported bytecode version {0} (expected {VERSION})")]
    UnsupportedVersion(u8),
    #[error("unknown value type tag {0}")]
    UnknownValueType(u32),
    #[error("cannot decompile: {0}")]
    Malformed(String),
}

fn malformed(what: impl Into<String>) -> DecodeError {
    DecodeError::Malformed(what.into())
}

/// Types that write themselves into a byte buffer
pub trait Compilable {
    fn compile(&self, out: &mut Vec<u8>);
}

/// Types that read themselves from a byte buffer, advancing `pos`
pub trait Decompilable: Sized {
    fn decompile(bytes: &[u8], pos: &mut usize) -> Result<Self, DecodeError>;
}

// ==================== Cursor Helpers ====================

fn read_bytes<'a>(bytes: &'a [u8], pos: &mut usize, len: usize, what: &str) -> Result<&'a [u8], DecodeError> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| malformed(format!("unexpected end of input reading {}", what)))?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_u8(bytes: &[u8], pos: &mut usize, what: &str) -> Result<u8, DecodeError> {
    Ok(read_bytes(bytes, pos, 1, what)?[0])
}

fn read_u32(bytes: &[u8], pos: &mut usize, what: &str) -> Result<u32, DecodeError> {
    let raw = read_bytes(bytes, pos, 4, what)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_len(bytes: &[u8], pos: &mut usize, what: &str) -> Result<usize, DecodeError> {
    Ok(read_u32(bytes, pos, what)? as usize)
}

fn read_u64(bytes: &[u8], pos: &mut usize, what: &str) -> Result<u64, DecodeError> {
    let raw = read_bytes(bytes, pos, 8, what)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(u64::from_le_bytes(buf))
}

fn read_string(bytes: &[u8], pos: &mut usize, what: &str) -> Result<String, DecodeError> {
    let len = read_len(bytes, pos, what)?;
    let raw = read_bytes(bytes, pos, len, what)?;
    String::from_utf8(raw.to_vec()).map_err(|_| malformed(format!("{} is not valid UTF-8", what)))
}

fn write_u32(out: &mut Vec<u8>, value: usize) {
    out.extend_from_slice(&(value as u32).to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len());
    out.extend_from_slice(bytes);
}

// ==================== Spans ====================

impl Compilable for Position {
    fn compile(&self, out: &mut Vec<u8>) {
        write_u32(out, self.line);
        write_u32(out, self.column);
        write_u32(out, self.offset);
    }
}

impl Decompilable for Position {
    fn decompile(bytes: &[u8], pos: &mut usize) -> Result<Self, DecodeError> {
        let line = read_len(bytes, pos, "span")?;
        let column = read_len(bytes, pos, "span")?;
        let offset = read_len(bytes, pos, "span")?;
        Ok(Position::new(line, column, offset))
    }
}

impl Compilable for Span {
    fn compile(&self, out: &mut Vec<u8>) {
        self.start.compile(out);
        self.end.compile(out);
    }
}

impl Decompilable for Span {
    fn decompile(bytes: &[u8], pos: &mut usize) -> Result<Self, DecodeError> {
        let start = Position::decompile(bytes, pos)?;
        let end = Position::decompile(bytes, pos)?;
        Ok(Span::new(start, end))
    }
}

fn compile_spans(spans: &[Span], out: &mut Vec<u8>) {
    write_u32(out, spans.len());
    for span in spans {
        span.compile(out);
    }
}

fn decompile_spans(bytes: &[u8], pos: &mut usize) -> Result<Vec<Span>, DecodeError> {
    let count = read_len(bytes, pos, "span count")?;
    // Each span is six u32 fields
    if count.saturating_mul(24) > bytes.len().saturating_sub(*pos) {
        return Err(malformed("span table is longer than the input"));
    }
    (0..count).map(|_| Span::decompile(bytes, pos)).collect()
}

// ==================== Functions ====================

impl Compilable for CompiledFunction {
    fn compile(&self, out: &mut Vec<u8>) {
        write_u32(out, self.num_locals);
        write_u32(out, self.num_parameters);
        match &self.name {
            Some(name) => {
                out.push(1);
                write_bytes(out, name.as_bytes());
            }
            None => out.push(0),
        }
        write_bytes(out, &self.instructions);
        compile_spans(&self.spans, out);
    }
}

impl Decompilable for CompiledFunction {
    fn decompile(bytes: &[u8], pos: &mut usize) -> Result<Self, DecodeError> {
        let num_locals = read_len(bytes, pos, "local count")?;
        let num_parameters = read_len(bytes, pos, "parameter count")?;
        if num_parameters > num_locals {
            return Err(malformed("function has more parameters than locals"));
        }

        let name = match read_u8(bytes, pos, "function name flag")? {
            0 => None,
            1 => Some(read_string(bytes, pos, "function name")?),
            flag => return Err(malformed(format!("invalid function name flag {}", flag))),
        };

        let len = read_len(bytes, pos, "instruction length")?;
        let instructions = Instructions::from(read_bytes(bytes, pos, len, "instructions")?.to_vec());
        let spans = decompile_spans(bytes, pos)?;

        Ok(CompiledFunction {
            instructions,
            spans,
            num_locals,
            num_parameters,
            name,
        })
    }
}

// ==================== Constants ====================

impl Compilable for Constant {
    fn compile(&self, out: &mut Vec<u8>) {
        match self {
            Constant::Integer(n) => {
                out.extend_from_slice(&TAG_INTEGER.to_le_bytes());
                out.extend_from_slice(&n.to_le_bytes());
            }
            Constant::Float(n) => {
                out.extend_from_slice(&TAG_FLOAT.to_le_bytes());
                out.extend_from_slice(&n.to_le_bytes());
            }
            Constant::String(s) => {
                out.extend_from_slice(&TAG_STRING.to_le_bytes());
                write_bytes(out, s.as_bytes());
            }
            Constant::Function(func) => {
                let mut payload = Vec::new();
                func.compile(&mut payload);
                out.extend_from_slice(&TAG_FUNCTION.to_le_bytes());
                write_bytes(out, &payload);
            }
        }
    }
}

impl Decompilable for Constant {
    fn decompile(bytes: &[u8], pos: &mut usize) -> Result<Self, DecodeError> {
        let tag = read_u32(bytes, pos, "value tag")?;

        match tag {
            TAG_INTEGER => Ok(Constant::Integer(read_u64(bytes, pos, "integer")? as i64)),
            TAG_FLOAT => Ok(Constant::Float(f64::from_bits(read_u64(bytes, pos, "float")?))),
            TAG_STRING => {
                let s = read_string(bytes, pos, "string")?;
                Ok(Constant::String(Rc::from(s)))
            }
            TAG_FUNCTION => {
                let size = read_len(bytes, pos, "function size")?;
                let payload = read_bytes(bytes, pos, size, "function")?;

                let mut inner = 0;
                let func = CompiledFunction::decompile(payload, &mut inner)?;
                if inner != payload.len() {
                    return Err(malformed("trailing bytes in function payload"));
                }
                Ok(Constant::Function(Rc::new(func)))
            }
            other => Err(DecodeError::UnknownValueType(other)),
        }
    }
}

// ==================== Programs ====================

/// Serialize a compiled program to the `.ktlc` format
pub fn serialize(program: &BytecodeProgram) -> Vec<u8> {
    let mut out = Vec::with_capacity(program.instructions.len() * 2 + 64);
    out.extend_from_slice(MAGIC);
    out.push(VERSION);

    write_u32(&mut out, program.constants.len());
    for constant in &program.constants {
        constant.compile(&mut out);
    }

    write_bytes(&mut out, &program.instructions);
    compile_spans(&program.spans, &mut out);
    out
}

/// Read a program written by `serialize`
pub fn deserialize(bytes: &[u8]) -> Result<BytecodeProgram, DecodeError> {
    if bytes.len() < MAGIC.len() + 1 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(DecodeError::InvalidHeader);
    }
    let version = bytes[MAGIC.len()];
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let mut pos = MAGIC.len() + 1;

    let count = read_len(bytes, &mut pos, "constant count")?;
    let mut constants = Vec::with_capacity(count.min(bytes.len()));
    for _ in 0..count {
        constants.push(Constant::decompile(bytes, &mut pos)?);
    }

    let len = read_len(bytes, &mut pos, "instruction length")?;
    let instructions = Instructions::from(read_bytes(bytes, &mut pos, len, "instructions")?.to_vec());
    let spans = decompile_spans(bytes, &mut pos)?;

    if pos != bytes.len() {
        return Err(malformed(format!("{} trailing bytes", bytes.len() - pos)));
    }

    Ok(BytecodeProgram {
        instructions,
        spans,
        constants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::opcode::{make, OpCode};

    fn decompile_constant(bytes: &[u8]) -> Result<Constant, DecodeError> {
        Constant::decompile(bytes, &mut 0)
    }

    #[test]
    fn test_constant_envelope_layout() {
        let mut out = Vec::new();
        Constant::Integer(-2).compile(&mut out);
        assert_eq!(&out[..4], &[1, 0, 0, 0]);
        assert_eq!(&out[4..], &(-2i64).to_le_bytes());

        let mut out = Vec::new();
        Constant::String(Rc::from("hi")).compile(&mut out);
        assert_eq!(out, vec![3, 0, 0, 0, 2, 0, 0, 0, b'h', b'i']);
    }

    #[test]
    fn test_function_constant_survives() {
        let func = CompiledFunction {
            instructions: vec![make(OpCode::GetLocal, &[0]), make(OpCode::ReturnValue, &[])]
                .into_iter()
                .collect(),
            spans: vec![Span::single(2, 3, 10); 3],
            num_locals: 1,
            num_parameters: 1,
            name: Some("id".to_string()),
        };
        let constant = Constant::Function(Rc::new(func));

        let mut out = Vec::new();
        constant.compile(&mut out);
        assert_eq!(decompile_constant(&out).unwrap(), constant);
    }

    #[test]
    fn test_unknown_tag() {
        let bytes = [9, 0, 0, 0, 1, 2, 3];
        assert_eq!(decompile_constant(&bytes), Err(DecodeError::UnknownValueType(9)));
    }

    #[test]
    fn test_malformed_payloads() {
        // Integer with only four payload bytes
        let err = decompile_constant(&[1, 0, 0, 0, 1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
        assert!(err.to_string().starts_with("cannot decompile"));

        // String whose size runs past the end
        let err = decompile_constant(&[3, 0, 0, 0, 10, 0, 0, 0, b'a']).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));

        // Invalid UTF-8
        let err = decompile_constant(&[3, 0, 0, 0, 1, 0, 0, 0, 0xff]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));

        // Function whose declared size is larger than its payload
        let err = decompile_constant(&[4, 0, 0, 0, 2, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_program_file() {
        let program = BytecodeProgram {
            instructions: vec![make(OpCode::Constant, &[0]), make(OpCode::Pop, &[])]
                .into_iter()
                .collect(),
            spans: vec![Span::single(1, 1, 0); 4],
            constants: vec![Constant::Float(1.5), Constant::String(Rc::from("x"))],
        };

        let bytes = serialize(&program);
        assert_eq!(&bytes[..5], b"KTLC\x01");
        assert_eq!(deserialize(&bytes).unwrap(), program);
    }

    #[test]
    fn test_program_header_errors() {
        assert_eq!(deserialize(b"NOPE\x01"), Err(DecodeError::InvalidHeader));
        assert_eq!(deserialize(b"KT"), Err(DecodeError::InvalidHeader));
        assert_eq!(deserialize(b"KTLC\x07"), Err(DecodeError::UnsupportedVersion(7)));

        let mut bytes = serialize(&BytecodeProgram::default());
        bytes.push(0);
        assert!(matches!(deserialize(&bytes), Err(DecodeError::Malformed(_))));
    }
}
