// Kettle Compiler Module
// Lowers the AST into bytecode for the VM

pub mod chunk;
mod compiler;
pub mod opcode;
pub mod symbol_table;

pub use chunk::{BytecodeProgram, CompiledFunction, Constant, Instructions};
pub use compiler::{Compiler, CompilerState};
pub use opcode::OpCode;
