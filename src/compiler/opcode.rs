// Kettle Bytecode Instructions
// Opcodes, their operand widths, and big-endian operand encoding

use smallvec::SmallVec;

/// Bytecode operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // Constants and stack operations
    Constant, // Push constant onto stack
    Pop,      // Pop top of stack

    // Arithmetic operations
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Literals
    True,
    False,
    Null,

    // Comparison operations
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,

    // Prefix operations
    Minus, // -a
    Bang,  // !a

    // Control flow (absolute targets)
    JumpNotTruthy,
    Jump,

    // Variables
    GetGlobal,
    SetGlobal,
    AssignGlobal,
    GetLocal,
    SetLocal,
    AssignLocal,
    GetBuiltin,
    GetFree,

    // Collections
    Array,
    Hash,
    Index,

    // Functions
    Call,
    ReturnValue,
    Return,
    Closure,
    CurrentClosure,
}

impl OpCode {
    pub const ALL: [OpCode; 34] = [
        OpCode::Constant,
        OpCode::Pop,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Mod,
        OpCode::True,
        OpCode::False,
        OpCode::Null,
        OpCode::Equal,
        OpCode::NotEqual,
        OpCode::GreaterThan,
        OpCode::GreaterEqual,
        OpCode::Minus,
        OpCode::Bang,
        OpCode::JumpNotTruthy,
        OpCode::Jump,
        OpCode::GetGlobal,
        OpCode::SetGlobal,
        OpCode::AssignGlobal,
        OpCode::GetLocal,
        OpCode::SetLocal,
        OpCode::AssignLocal,
        OpCode::GetBuiltin,
        OpCode::GetFree,
        OpCode::Array,
        OpCode::Hash,
        OpCode::Index,
        OpCode::Call,
        OpCode::ReturnValue,
        OpCode::Return,
        OpCode::Closure,
        OpCode::CurrentClosure,
    ];

    /// Mnemonic and operand widths for this opcode
    pub fn definition(&self) -> Definition {
        let (name, operand_widths): (&'static str, &'static [usize]) = match self {
            OpCode::Constant => ("OpConstant", &[2]),
            OpCode::Pop => ("OpPop", &[]),
            OpCode::Add => ("OpAdd", &[]),
            OpCode::Sub => ("OpSub", &[]),
            OpCode::Mul => ("OpMul", &[]),
            OpCode::Div => ("OpDiv", &[]),
            OpCode::Mod => ("OpMod", &[]),
            OpCode::True => ("OpTrue", &[]),
            OpCode::False => ("OpFalse", &[]),
            OpCode::Null => ("OpNull", &[]),
            OpCode::Equal => ("OpEqual", &[]),
            OpCode::NotEqual => ("OpNotEqual", &[]),
            OpCode::GreaterThan => ("OpGreaterThan", &[]),
            OpCode::GreaterEqual => ("OpGreaterEqual", &[]),
            OpCode::Minus => ("OpMinus", &[]),
            OpCode::Bang => ("OpBang", &[]),
            OpCode::JumpNotTruthy => ("OpJumpNotTruthy", &[2]),
            OpCode::Jump => ("OpJump", &[2]),
            OpCode::GetGlobal => ("OpGetGlobal", &[2]),
            OpCode::SetGlobal => ("OpSetGlobal", &[2]),
            OpCode::AssignGlobal => ("OpAssignGlobal", &[2]),
            OpCode::GetLocal => ("OpGetLocal", &[1]),
            OpCode::SetLocal => ("OpSetLocal", &[1]),
            OpCode::AssignLocal => ("OpAssignLocal", &[1]),
            OpCode::GetBuiltin => ("OpGetBuiltin", &[1]),
            OpCode::GetFree => ("OpGetFree", &[1]),
            OpCode::Array => ("OpArray", &[2]),
            OpCode::Hash => ("OpHash", &[2]),
            OpCode::Index => ("OpIndex", &[]),
            OpCode::Call => ("OpCall", &[1]),
            OpCode::ReturnValue => ("OpReturnValue", &[]),
            OpCode::Return => ("OpReturn", &[]),
            OpCode::Closure => ("OpClosure", &[2, 1]),
            OpCode::CurrentClosure => ("OpCurrentClosure", &[]),
        };
        Definition {
            name,
            operand_widths,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        OpCode::ALL.get(byte as usize).copied().ok_or(byte)
    }
}

/// Operand layout of an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub name: &'static str,
    pub operand_widths: &'static [usize],
}

impl Definition {
    /// Total instruction length including the opcode byte
    pub fn width(&self) -> usize {
        1 + self.operand_widths.iter().sum::<usize>()
    }
}

/// Operands decoded from one instruction
pub type Operands = SmallVec<[usize; 2]>;

/// Encode one instruction: opcode byte, then each operand big-endian at its declared width.
/// Missing operands encode as zero; values wider than the slot are truncated.
pub fn make(op: OpCode, operands: &[usize]) -> Vec<u8> {
    let def = op.definition();
    let mut bytes = Vec::with_capacity(def.width());
    bytes.push(op as u8);

    for (i, width) in def.operand_widths.iter().enumerate() {
        let operand = operands.get(i).copied().unwrap_or(0);
        match width {
            2 => bytes.extend_from_slice(&(operand as u16).to_be_bytes()),
            1 => bytes.push(operand as u8),
            _ => {}
        }
    }

    bytes
}

/// Decode the operands following an opcode. Returns `None` when `bytes` is too short.
pub fn read_operands(def: &Definition, bytes: &[u8]) -> Option<(Operands, usize)> {
    let mut operands = Operands::new();
    let mut offset = 0;

    for width in def.operand_widths {
        match width {
            2 => operands.push(read_u16(bytes, offset)? as usize),
            1 => operands.push(read_u8(bytes, offset)? as usize),
            _ => {}
        }
        offset += width;
    }

    Some((operands, offset))
}

pub fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let hi = *bytes.get(offset)?;
    let lo = *bytes.get(offset + 1)?;
    Some(u16::from_be_bytes([hi, lo]))
}

pub fn read_u8(bytes: &[u8], offset: usize) -> Option<u8> {
    bytes.get(offset).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_are_dense() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as u8 as usize, i);
            assert_eq!(OpCode::try_from(i as u8), Ok(*op));
        }
        assert_eq!(OpCode::try_from(OpCode::ALL.len() as u8), Err(34));
        assert_eq!(OpCode::try_from(255), Err(255));
    }

    #[test]
    fn test_make() {
        assert_eq!(
            make(OpCode::Constant, &[65534]),
            vec![OpCode::Constant as u8, 255, 254]
        );
        assert_eq!(make(OpCode::Add, &[]), vec![OpCode::Add as u8]);
        assert_eq!(make(OpCode::GetLocal, &[255]), vec![OpCode::GetLocal as u8, 255]);
        assert_eq!(
            make(OpCode::Closure, &[65534, 255]),
            vec![OpCode::Closure as u8, 255, 254, 255]
        );
    }

    #[test]
    fn test_read_operands_inverts_make() {
        for op in OpCode::ALL {
            let def = op.definition();
            for fill in [0usize, 1, usize::MAX] {
                // Largest value each width can hold, then small ones
                let operands: Vec<usize> = def
                    .operand_widths
                    .iter()
                    .map(|width| fill.min((1 << (8 * width)) - 1))
                    .collect();

                let instruction = make(op, &operands);
                assert_eq!(instruction.len(), def.width(), "{}", def.name);
                assert_eq!(instruction[0], op as u8);

                let (read, consumed) = read_operands(&def, &instruction[1..]).unwrap();
                assert_eq!(consumed, def.width() - 1, "{}", def.name);
                assert_eq!(read.as_slice(), operands.as_slice(), "{}", def.name);
            }
        }
    }

    #[test]
    fn test_read_operands_truncated() {
        let def = OpCode::Closure.definition();
        assert!(read_operands(&def, &[0, 1]).is_none());
    }
}
