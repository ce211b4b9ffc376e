// Kettle Programming Language
// A small expression language compiled to bytecode for a stack VM

pub mod ast;
pub mod binary;
pub mod builtins;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod vm;

use ast::Program;
use compiler::{BytecodeProgram, Compiler, CompilerState};
use error::KettleResult;
use lexer::Scanner;
use parser::Parser;
use tracing::debug;
use vm::{Globals, NativeHost, Value, Vm, VmConfig};

pub use error::KettleError;

/// Scan and parse one source unit
pub fn parse_source(source: &str, file: &str) -> KettleResult<Program> {
    let tokens = Scanner::new(source, file).scan_tokens()?;
    Parser::new(tokens, file, source).parse()
}

/// Scan, parse and compile one source unit
pub fn compile_source(source: &str, file: &str) -> KettleResult<BytecodeProgram> {
    let program = parse_source(source, file)?;
    Compiler::new(file, source).compile(&program)
}

/// Compile and run a source unit with default limits
pub fn run(source: &str) -> KettleResult<Value> {
    run_with_config(source, "<script>", VmConfig::default())
}

pub fn run_with_config(source: &str, file: &str, config: VmConfig) -> KettleResult<Value> {
    let bytecode = compile_source(source, file)?;
    Vm::with_host(bytecode, NativeHost, config)
        .with_source(file, source)
        .run()
}

/// Compiler state and globals carried from one input to the next
pub struct Session {
    state: CompilerState,
    globals: Globals<Value>,
    config: VmConfig,
    file: String,
}

impl Session {
    pub fn new(file: impl Into<String>, config: VmConfig) -> Self {
        Self {
            state: CompilerState::default(),
            globals: Vec::new(),
            config,
            file: file.into(),
        }
    }

    /// Compile and run one input. Its declarations are kept only when it
    /// runs to completion; a runtime error still keeps values assigned to
    /// existing globals before the failure.
    pub fn eval(&mut self, source: &str) -> KettleResult<Value> {
        let program = parse_source(source, &self.file)?;

        let mut compiler = Compiler::with_state(&self.file, source, self.state.clone());
        let bytecode = compiler.compile(&program)?;
        let state = compiler.into_state();

        let globals = std::mem::take(&mut self.globals);
        let mut vm = Vm::with_host(bytecode, NativeHost, self.config)
            .with_globals(globals)
            .with_source(&self.file, source);
        let result = vm.run();
        self.globals = vm.into_globals();

        if result.is_ok() {
            self.state = state;
            debug!(constants = self.state.constants.len(), "session input committed");
        }
        result
    }

    pub fn reset(&mut self) {
        self.state = CompilerState::default();
        self.globals.clear();
    }

    pub fn config(&self) -> VmConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_run() {
        assert_eq!(run("1 + 2").unwrap(), Value::Integer(3));
        assert_eq!(run("").unwrap(), Value::Null);
    }

    #[test]
    fn test_session_keeps_bindings() {
        let mut session = Session::new("<repl>", VmConfig::default());
        session.eval("let a = 40;").unwrap();
        session.eval("var b = fn(x) { x + a };").unwrap();
        assert_eq!(session.eval("b(2)").unwrap(), Value::Integer(42));
        session.eval("b = fn(x) { x };").unwrap();
        assert_eq!(session.eval("b(2)").unwrap(), Value::Integer(2));
    }

    #[test]
    fn test_session_survives_errors() {
        let mut session = Session::new("<repl>", VmConfig::default());
        session.eval("let a = 1;").unwrap();

        let err = session.eval("let c = 2; missing;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedName);
        // The failed input defined nothing
        assert!(session.eval("let c = 3;").is_ok());

        let err = session.eval("1 / 0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        assert_eq!(session.eval("a + c").unwrap(), Value::Integer(4));

        session.reset();
        assert_eq!(session.eval("a").unwrap_err().kind, ErrorKind::UnresolvedName);
    }

    #[test]
    fn test_failed_run_discards_declarations() {
        let mut session = Session::new("<repl>", VmConfig::default());
        session.eval("var total = 1;").unwrap();

        let err = session.eval("total = 5; let x = 1 / 0;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        assert_eq!(session.eval("x").unwrap_err().kind, ErrorKind::UnresolvedName);
        assert_eq!(session.eval("total").unwrap(), Value::Integer(5));

        session.eval("let x = 2;").unwrap();
        assert_eq!(session.eval("x + total").unwrap(), Value::Integer(7));
    }
}
