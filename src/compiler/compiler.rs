// Kettle Compiler
// Single-pass AST to bytecode compiler with closure capture through the symbol table

use super::chunk::{BytecodeProgram, CompiledFunction, Constant, Instructions};
use super::opcode::{make, OpCode};
use super::symbol_table::{Symbol, SymbolError, SymbolScope, SymbolTable};
use crate::ast::*;
use crate::builtins::BUILTINS;
use crate::error::{ErrorKind, KettleError, KettleResult, Span};
use std::rc::Rc;
use tracing::{debug, instrument, trace};

const MAX_U16_OPERAND: usize = u16::MAX as usize;
const MAX_U8_OPERAND: usize = u8::MAX as usize;

/// Placeholder jump target, back-patched once the real target is known
const PENDING_JUMP: usize = 9999;

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: OpCode,
    position: usize,
}

/// Instruction buffer of the function currently being compiled
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    spans: Vec<Span>,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

/// What survives between compilation units (one per REPL line)
#[derive(Debug, Clone)]
pub struct CompilerState {
    pub symbol_table: SymbolTable,
    pub constants: Vec<Constant>,
}

impl Default for CompilerState {
    fn default() -> Self {
        let symbol_table = SymbolTable::with_builtins(BUILTINS.iter().map(|def| def.name));
        Self {
            symbol_table,
            constants: Vec::new(),
        }
    }
}

/// The Kettle bytecode compiler
pub struct Compiler {
    constants: Vec<Constant>,
    symbol_table: SymbolTable,
    scope: CompilationScope,
    enclosing: Vec<CompilationScope>,
    file: String,
    source: String,
}

impl Compiler {
    pub fn new(file: impl Into<String>, source: impl Into<String>) -> Self {
        Self::with_state(file, source, CompilerState::default())
    }

    /// Resume from the symbols and constants of an earlier unit
    pub fn with_state(
        file: impl Into<String>,
        source: impl Into<String>,
        state: CompilerState,
    ) -> Self {
        Self {
            constants: state.constants,
            symbol_table: state.symbol_table,
            scope: CompilationScope::default(),
            enclosing: Vec::new(),
            file: file.into(),
            source: source.into(),
        }
    }

    pub fn into_state(self) -> CompilerState {
        CompilerState {
            symbol_table: self.symbol_table.into_root(),
            constants: self.constants,
        }
    }

    /// Compile a program to bytecode
    #[instrument(skip_all, name = "compile", fields(file = %self.file))]
    pub fn compile(&mut self, program: &Program) -> KettleResult<BytecodeProgram> {
        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }

        let scope = std::mem::take(&mut self.scope);
        debug!(
            bytes = scope.instructions.len(),
            constants = self.constants.len(),
            "compiled program"
        );

        Ok(BytecodeProgram {
            instructions: scope.instructions,
            spans: scope.spans,
            constants: self.constants.clone(),
        })
    }

    // ==================== Statements ====================

    fn compile_stmt(&mut self, stmt: &Stmt) -> KettleResult<()> {
        match stmt {
            Stmt::Expression { expr, span } => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Pop, &[], *span);
            }

            Stmt::Let {
                name,
                mutability,
                value,
                span,
            } => self.compile_let(name, *mutability, value, *span)?,

            Stmt::Assign { name, value, span } => self.compile_assign(name, value, *span)?,

            Stmt::Return { value, span } => match value {
                Some(value) => {
                    self.compile_expr(value)?;
                    self.emit(OpCode::ReturnValue, &[], *span);
                }
                None => {
                    self.emit(OpCode::Return, &[], *span);
                }
            },
        }

        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> KettleResult<()> {
        for stmt in &block.statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_let(
        &mut self,
        name: &str,
        mutability: Mutability,
        value: &Expr,
        span: Span,
    ) -> KettleResult<()> {
        // Defined before the value is compiled so a function body can refer to its binding
        let symbol = self
            .symbol_table
            .define(name, mutability)
            .map_err(|e| self.symbol_error(e, span))?;

        if let (Mutability::Let, Expr::Function(func)) = (mutability, value) {
            self.symbol_table.record_arity(name, func.params.len());
        }

        self.compile_expr(value)?;

        if symbol.scope == SymbolScope::Global {
            let index = self.check_operand(symbol.index, MAX_U16_OPERAND, "global variables", span)?;
            self.emit(OpCode::SetGlobal, &[index], span);
        } else {
            let index = self.check_operand(symbol.index, MAX_U8_OPERAND, "local variables", span)?;
            self.emit(OpCode::SetLocal, &[index], span);
        }

        Ok(())
    }

    fn compile_assign(&mut self, name: &str, value: &Expr, span: Span) -> KettleResult<()> {
        let symbol = self
            .symbol_table
            .resolve(name)
            .map_err(|e| self.symbol_error(e, span))?;

        let constant = symbol.mutability == Mutability::Let
            || matches!(symbol.scope, SymbolScope::Builtin | SymbolScope::Function);
        if constant {
            return Err(self
                .error(
                    ErrorKind::AssignToConstant,
                    format!("Cannot assign to constant '{}'", name),
                    span,
                )
                .with_help(format!("Declare it with 'var {} = ...' to allow reassignment", name)));
        }

        if symbol.scope == SymbolScope::Free {
            return Err(self
                .error(
                    ErrorKind::AssignToCaptured,
                    format!("Cannot assign to captured variable '{}'", name),
                    span,
                )
                .with_help("Closures capture outer variables by value"));
        }

        self.compile_expr(value)?;

        if symbol.scope == SymbolScope::Global {
            self.emit(OpCode::AssignGlobal, &[symbol.index], span);
        } else {
            self.emit(OpCode::AssignLocal, &[symbol.index], span);
        }

        Ok(())
    }

    // ==================== Expressions ====================

    fn compile_expr(&mut self, expr: &Expr) -> KettleResult<()> {
        match expr {
            Expr::Integer { value, span } => {
                let index = self.add_constant(Constant::Integer(*value), *span)?;
                self.emit(OpCode::Constant, &[index], *span);
            }
            Expr::Float { value, span } => {
                let index = self.add_constant(Constant::Float(*value), *span)?;
                self.emit(OpCode::Constant, &[index], *span);
            }
            Expr::String { value, span } => {
                let index = self.add_constant(Constant::String(Rc::from(value.as_str())), *span)?;
                self.emit(OpCode::Constant, &[index], *span);
            }
            Expr::Boolean { value, span } => {
                let op = if *value { OpCode::True } else { OpCode::False };
                self.emit(op, &[], *span);
            }
            Expr::Null { span } => {
                self.emit(OpCode::Null, &[], *span);
            }

            Expr::Identifier { name, span } => {
                let symbol = self
                    .symbol_table
                    .resolve(name)
                    .map_err(|e| self.symbol_error(e, *span))?;
                self.load_symbol(&symbol, *span);
            }

            Expr::Unary { op, operand, span } => {
                self.compile_expr(operand)?;
                let opcode = match op {
                    UnaryOp::Negate => OpCode::Minus,
                    UnaryOp::Not => OpCode::Bang,
                };
                self.emit(opcode, &[], *span);
            }

            Expr::Binary {
                left,
                op,
                right,
                span,
            } => self.compile_binary(left, *op, right, *span)?,

            Expr::If {
                condition,
                then_branch,
                else_branch,
                span,
            } => self.compile_if(condition, then_branch, else_branch.as_ref(), *span)?,

            Expr::Function(func) => self.compile_function(func)?,

            Expr::Call { callee, args, span } => self.compile_call(callee, args, *span)?,

            Expr::Array { elements, span } => {
                for element in elements {
                    self.compile_expr(element)?;
                }
                let count = self.check_operand(elements.len(), MAX_U16_OPERAND, "array elements", *span)?;
                self.emit(OpCode::Array, &[count], *span);
            }

            Expr::Hash { pairs, span } => {
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                let count = self.check_operand(pairs.len() * 2, MAX_U16_OPERAND, "hash entries", *span)?;
                self.emit(OpCode::Hash, &[count], *span);
            }

            Expr::Index {
                object,
                index,
                span,
            } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(OpCode::Index, &[], *span);
            }
        }

        Ok(())
    }

    fn compile_binary(
        &mut self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        span: Span,
    ) -> KettleResult<()> {
        // `a < b` compiles as `b > a`
        let (opcode, swapped) = match op {
            BinaryOp::Add => (OpCode::Add, false),
            BinaryOp::Sub => (OpCode::Sub, false),
            BinaryOp::Mul => (OpCode::Mul, false),
            BinaryOp::Div => (OpCode::Div, false),
            BinaryOp::Mod => (OpCode::Mod, false),
            BinaryOp::Equal => (OpCode::Equal, false),
            BinaryOp::NotEqual => (OpCode::NotEqual, false),
            BinaryOp::Greater => (OpCode::GreaterThan, false),
            BinaryOp::GreaterEqual => (OpCode::GreaterEqual, false),
            BinaryOp::Less => (OpCode::GreaterThan, true),
            BinaryOp::LessEqual => (OpCode::GreaterEqual, true),
        };

        if swapped {
            self.compile_expr(right)?;
            self.compile_expr(left)?;
        } else {
            self.compile_expr(left)?;
            self.compile_expr(right)?;
        }
        self.emit(opcode, &[], span);

        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        then_branch: &Block,
        else_branch: Option<&Block>,
        span: Span,
    ) -> KettleResult<()> {
        self.compile_expr(condition)?;

        let then_jump = self.emit(OpCode::JumpNotTruthy, &[PENDING_JUMP], span);
        self.compile_branch(then_branch)?;

        let else_jump = self.emit(OpCode::Jump, &[PENDING_JUMP], span);
        self.patch_jump(then_jump, OpCode::JumpNotTruthy)?;

        match else_branch {
            Some(block) => self.compile_branch(block)?,
            None => {
                self.emit(OpCode::Null, &[], span);
            }
        }

        self.patch_jump(else_jump, OpCode::Jump)
    }

    /// Compile an `if` arm so that it leaves exactly one value on the stack
    fn compile_branch(&mut self, block: &Block) -> KettleResult<()> {
        let start = self.scope.instructions.len();
        self.compile_block(block)?;

        let ends_in_pop = self.last_instruction_is(OpCode::Pop)
            && self
                .scope
                .last_instruction
                .is_some_and(|last| last.position >= start);
        if ends_in_pop {
            self.remove_last_pop();
        } else {
            self.emit(OpCode::Null, &[], block.span);
        }

        Ok(())
    }

    fn compile_function(&mut self, func: &FunctionLiteral) -> KettleResult<()> {
        let span = func.span;
        let num_parameters =
            self.check_operand(func.params.len(), MAX_U8_OPERAND, "parameters", span)?;

        self.enter_scope();

        if let Some(name) = &func.name {
            self.symbol_table.define_function_name(name, num_parameters);
        }

        for param in &func.params {
            self.symbol_table
                .define(&param.name, Mutability::Let)
                .map_err(|e| self.symbol_error(e, param.span))?;
        }

        self.compile_block(&func.body)?;

        if self.last_instruction_is(OpCode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(OpCode::ReturnValue) && !self.last_instruction_is(OpCode::Return)
        {
            self.emit(OpCode::Return, &[], func.body.span);
        }

        let free_symbols = self.symbol_table.free_symbols().to_vec();
        let num_locals = self.symbol_table.num_definitions();
        let (instructions, spans) = self.leave_scope();

        self.check_operand(num_locals, MAX_U8_OPERAND + 1, "local variables", span)?;
        let free_count = self.check_operand(free_symbols.len(), MAX_U8_OPERAND, "captured variables", span)?;

        for symbol in &free_symbols {
            self.load_symbol(symbol, span);
        }

        let compiled = CompiledFunction {
            instructions,
            spans,
            num_locals,
            num_parameters,
            name: func.name.clone(),
        };
        let index = self.add_constant(Constant::Function(Rc::new(compiled)), span)?;
        self.emit(OpCode::Closure, &[index, free_count], span);

        Ok(())
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> KettleResult<()> {
        let argc = self.check_operand(args.len(), MAX_U8_OPERAND, "call arguments", span)?;

        match callee {
            Expr::Identifier {
                name,
                span: name_span,
            } => {
                let symbol = self
                    .symbol_table
                    .resolve(name)
                    .map_err(|e| self.symbol_error(e, *name_span))?;

                if let Some(arity) = symbol.arity {
                    if arity != argc {
                        return Err(self.error(
                            ErrorKind::ArityMismatch,
                            format!(
                                "Function '{}' expects {} argument(s) but got {}",
                                name, arity, argc
                            ),
                            span,
                        ));
                    }
                }

                self.load_symbol(&symbol, *name_span);
            }
            _ => self.compile_expr(callee)?,
        }

        for arg in args {
            self.compile_expr(arg)?;
        }
        self.emit(OpCode::Call, &[argc], span);

        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol, span: Span) {
        match symbol.scope {
            SymbolScope::Global => self.emit(OpCode::GetGlobal, &[symbol.index], span),
            SymbolScope::Local => self.emit(OpCode::GetLocal, &[symbol.index], span),
            SymbolScope::Free => self.emit(OpCode::GetFree, &[symbol.index], span),
            SymbolScope::Builtin => self.emit(OpCode::GetBuiltin, &[symbol.index], span),
            SymbolScope::Function => self.emit(OpCode::CurrentClosure, &[], span),
        };
    }

    // ==================== Scopes ====================

    fn enter_scope(&mut self) {
        let enclosing = std::mem::take(&mut self.scope);
        self.enclosing.push(enclosing);

        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);

        trace!(depth = self.enclosing.len(), "enter scope");
    }

    fn leave_scope(&mut self) -> (Instructions, Vec<Span>) {
        let enclosing = self.enclosing.pop().unwrap_or_default();
        let scope = std::mem::replace(&mut self.scope, enclosing);

        let table = std::mem::take(&mut self.symbol_table);
        self.symbol_table = table.into_outer().unwrap_or_default();

        trace!(depth = self.enclosing.len(), bytes = scope.instructions.len(), "leave scope");
        (scope.instructions, scope.spans)
    }

    // ==================== Emit Helpers ====================

    fn emit(&mut self, op: OpCode, operands: &[usize], span: Span) -> usize {
        let instruction = make(op, operands);
        let scope = &mut self.scope;

        let position = scope.instructions.push(&instruction);
        scope
            .spans
            .extend(std::iter::repeat(span).take(instruction.len()));

        scope.previous_instruction = scope.last_instruction.take();
        scope.last_instruction = Some(EmittedInstruction {
            opcode: op,
            position,
        });

        position
    }

    fn last_instruction_is(&self, op: OpCode) -> bool {
        matches!(self.scope.last_instruction, Some(last) if last.opcode == op)
    }

    fn remove_last_pop(&mut self) {
        let scope = &mut self.scope;
        if let Some(last) = scope.last_instruction {
            scope.instructions.truncate(last.position);
            scope.spans.truncate(last.position);
            scope.last_instruction = scope.previous_instruction.take();
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = &mut self.scope;
        if let Some(last) = scope.last_instruction.as_mut() {
            scope
                .instructions
                .replace_at(last.position, &make(OpCode::ReturnValue, &[]));
            last.opcode = OpCode::ReturnValue;
        }
    }

    /// Point the jump at `position` to the end of the current buffer
    fn patch_jump(&mut self, position: usize, op: OpCode) -> KettleResult<()> {
        let target = self.scope.instructions.len();
        let span = self.scope.spans.get(position).copied().unwrap_or_default();
        let target = self.check_operand(target, MAX_U16_OPERAND, "bytes of jump distance", span)?;
        self.scope.instructions.replace_at(position, &make(op, &[target]));
        Ok(())
    }

    fn add_constant(&mut self, constant: Constant, span: Span) -> KettleResult<usize> {
        let index = self.constants.len();
        self.check_operand(index, MAX_U16_OPERAND, "constants", span)?;
        self.constants.push(constant);
        Ok(index)
    }

    fn check_operand(&self, value: usize, max: usize, what: &str, span: Span) -> KettleResult<usize> {
        if value > max {
            return Err(self.error(
                ErrorKind::OperandOverflow,
                format!("Too many {} (limit is {})", what, max),
                span,
            ));
        }
        Ok(value)
    }

    // ==================== Errors ====================

    fn error(&self, kind: ErrorKind, message: impl Into<String>, span: Span) -> KettleError {
        KettleError::new(kind, message, span, &self.file).with_source(&self.source)
    }

    fn symbol_error(&self, err: SymbolError, span: Span) -> KettleError {
        match err {
            SymbolError::Redeclared(ref name) => self
                .error(ErrorKind::Redeclaration, err.to_string(), span)
                .with_help(format!("Use '{} = ...' to update an existing 'var' binding", name)),
            SymbolError::Unresolved(_) => self.error(ErrorKind::UnresolvedName, err.to_string(), span),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn parse(source: &str) -> Program {
        let tokens = Scanner::new(source, "<test>").scan_tokens().unwrap();
        Parser::new(tokens, "<test>", source).parse().unwrap()
    }

    fn compile(source: &str) -> KettleResult<BytecodeProgram> {
        Compiler::new("<test>", source).compile(&parse(source))
    }

    fn instructions(parts: Vec<Vec<u8>>) -> Instructions {
        parts.into_iter().collect()
    }

    fn assert_instructions(actual: &Instructions, expected: Vec<Vec<u8>>) {
        assert_eq!(actual.to_string(), instructions(expected).to_string());
    }

    fn function(constant: &Constant) -> &CompiledFunction {
        match constant {
            Constant::Function(func) => func,
            other => panic!("expected function constant, got {:?}", other),
        }
    }

    #[test]
    fn test_expression_statements_pop() {
        let program = compile("1; 2;").unwrap();
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Pop, &[]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Pop, &[]),
            ],
        );
        assert_eq!(program.constants, vec![Constant::Integer(1), Constant::Integer(2)]);
        assert_eq!(program.spans.len(), program.instructions.len());
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let program = compile("1 + 2 * 3").unwrap();
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Mul, &[]),
                make(OpCode::Add, &[]),
                make(OpCode::Pop, &[]),
            ],
        );

        // Operands of `<` are swapped
        let program = compile("1 < 2").unwrap();
        assert_eq!(program.constants, vec![Constant::Integer(2), Constant::Integer(1)]);
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::GreaterThan, &[]),
                make(OpCode::Pop, &[]),
            ],
        );

        let program = compile("!true; -1.5").unwrap();
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::True, &[]),
                make(OpCode::Bang, &[]),
                make(OpCode::Pop, &[]),
                make(OpCode::Constant, &[0]),
                make(OpCode::Minus, &[]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_conditional_back_patching() {
        let program = compile("if (true) { 10 } else { 20 }; 3333;").unwrap();
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::True, &[]),               // 0000
                make(OpCode::JumpNotTruthy, &[10]),    // 0001
                make(OpCode::Constant, &[0]),          // 0004
                make(OpCode::Jump, &[13]),             // 0007
                make(OpCode::Constant, &[1]),          // 0010
                make(OpCode::Pop, &[]),                // 0013
                make(OpCode::Constant, &[2]),          // 0014
                make(OpCode::Pop, &[]),                // 0017
            ],
        );

        let program = compile("if (true) { 10 }; 3333;").unwrap();
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::True, &[]),               // 0000
                make(OpCode::JumpNotTruthy, &[10]),    // 0001
                make(OpCode::Constant, &[0]),          // 0004
                make(OpCode::Jump, &[11]),             // 0007
                make(OpCode::Null, &[]),               // 0010
                make(OpCode::Pop, &[]),                // 0011
                make(OpCode::Constant, &[1]),          // 0012
                make(OpCode::Pop, &[]),                // 0015
            ],
        );
    }

    #[test]
    fn test_empty_branch_yields_null() {
        let program = compile("if (true) { } else { let x = 1; }").unwrap();
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::True, &[]),               // 0000
                make(OpCode::JumpNotTruthy, &[8]),     // 0001
                make(OpCode::Null, &[]),               // 0004
                make(OpCode::Jump, &[15]),             // 0005
                make(OpCode::Constant, &[0]),          // 0008
                make(OpCode::SetGlobal, &[0]),         // 0011
                make(OpCode::Null, &[]),               // 0014
                make(OpCode::Pop, &[]),                // 0015
            ],
        );
    }

    #[test]
    fn test_global_bindings_and_assignment() {
        let program = compile("let one = 1; var two = 2; two = one; two;").unwrap();
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::SetGlobal, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::SetGlobal, &[1]),
                make(OpCode::GetGlobal, &[0]),
                make(OpCode::AssignGlobal, &[1]),
                make(OpCode::GetGlobal, &[1]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_collections_and_index() {
        let program = compile("[1, 2][0]; {1: 2, 3: 4}").unwrap();
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Array, &[2]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Index, &[]),
                make(OpCode::Pop, &[]),
                make(OpCode::Constant, &[3]),
                make(OpCode::Constant, &[4]),
                make(OpCode::Constant, &[5]),
                make(OpCode::Constant, &[6]),
                make(OpCode::Hash, &[4]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_functions_and_implicit_return() {
        let program = compile("fn() { 5 + 10 }").unwrap();
        let func = function(&program.constants[2]);
        assert_instructions(
            &func.instructions,
            vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Add, &[]),
                make(OpCode::ReturnValue, &[]),
            ],
        );
        assert_instructions(
            &program.instructions,
            vec![make(OpCode::Closure, &[2, 0]), make(OpCode::Pop, &[])],
        );

        let program = compile("fn() { }").unwrap();
        assert_instructions(
            &function(&program.constants[0]).instructions,
            vec![make(OpCode::Return, &[])],
        );

        let program = compile("fn() { let a = 1; }").unwrap();
        assert_instructions(
            &function(&program.constants[1]).instructions,
            vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::SetLocal, &[0]),
                make(OpCode::Return, &[]),
            ],
        );
    }

    #[test]
    fn test_locals() {
        let program = compile("fn(a) { var b = a; b = 2; b }").unwrap();
        let func = function(&program.constants[1]);
        assert_eq!(func.num_parameters, 1);
        assert_eq!(func.num_locals, 2);
        assert_instructions(
            &func.instructions,
            vec![
                make(OpCode::GetLocal, &[0]),
                make(OpCode::SetLocal, &[1]),
                make(OpCode::Constant, &[0]),
                make(OpCode::AssignLocal, &[1]),
                make(OpCode::GetLocal, &[1]),
                make(OpCode::ReturnValue, &[]),
            ],
        );
    }

    #[test]
    fn test_closures_emit_free_loads_in_capture_order() {
        let program = compile("fn(a, b) { fn(c) { b + a + c } }").unwrap();

        let inner = function(&program.constants[0]);
        assert_instructions(
            &inner.instructions,
            vec![
                make(OpCode::GetFree, &[0]),
                make(OpCode::GetFree, &[1]),
                make(OpCode::Add, &[]),
                make(OpCode::GetLocal, &[0]),
                make(OpCode::Add, &[]),
                make(OpCode::ReturnValue, &[]),
            ],
        );

        let outer = function(&program.constants[1]);
        assert_instructions(
            &outer.instructions,
            vec![
                make(OpCode::GetLocal, &[1]),
                make(OpCode::GetLocal, &[0]),
                make(OpCode::Closure, &[0, 2]),
                make(OpCode::ReturnValue, &[]),
            ],
        );
    }

    #[test]
    fn test_nested_closures_capture_through_free() {
        let program = compile("fn(a) { fn(b) { fn(c) { a + b + c } } }").unwrap();

        let innermost = function(&program.constants[0]);
        assert_instructions(
            &innermost.instructions,
            vec![
                make(OpCode::GetFree, &[0]),
                make(OpCode::GetFree, &[1]),
                make(OpCode::Add, &[]),
                make(OpCode::GetLocal, &[0]),
                make(OpCode::Add, &[]),
                make(OpCode::ReturnValue, &[]),
            ],
        );

        let middle = function(&program.constants[1]);
        assert_instructions(
            &middle.instructions,
            vec![
                make(OpCode::GetFree, &[0]),
                make(OpCode::GetLocal, &[0]),
                make(OpCode::Closure, &[0, 2]),
                make(OpCode::ReturnValue, &[]),
            ],
        );
    }

    #[test]
    fn test_recursive_function_uses_current_closure() {
        let program = compile("let countDown = fn(x) { countDown(x - 1); }; countDown(1);").unwrap();
        let func = function(&program.constants[1]);
        assert_instructions(
            &func.instructions,
            vec![
                make(OpCode::CurrentClosure, &[]),
                make(OpCode::GetLocal, &[0]),
                make(OpCode::Constant, &[0]),
                make(OpCode::Sub, &[]),
                make(OpCode::Call, &[1]),
                make(OpCode::ReturnValue, &[]),
            ],
        );
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::Closure, &[1, 0]),
                make(OpCode::SetGlobal, &[0]),
                make(OpCode::GetGlobal, &[0]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Call, &[1]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_builtins() {
        let program = compile("len([]); push([], 1);").unwrap();
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::GetBuiltin, &[0]),
                make(OpCode::Array, &[0]),
                make(OpCode::Call, &[1]),
                make(OpCode::Pop, &[]),
                make(OpCode::GetBuiltin, &[5]),
                make(OpCode::Array, &[0]),
                make(OpCode::Constant, &[0]),
                make(OpCode::Call, &[2]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_assignment_to_let_is_rejected() {
        let err = compile("let a = 5; a = 10; a;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AssignToConstant);
        assert_eq!(err.span.start.line, 1);
        assert_eq!(err.span.start.column, 12);

        let err = compile("len = 1;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AssignToConstant);
    }

    #[test]
    fn test_assignment_to_captured_is_rejected() {
        let err = compile("fn() { var x = 1; fn() { x = 2; } }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AssignToCaptured);
    }

    #[test]
    fn test_name_errors() {
        let err = compile("let a = 1;\nb;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedName);
        assert_eq!(err.message, "Cannot resolve name 'b'");
        assert_eq!(err.span.start.line, 2);

        let err = compile("var x = 1; let x = 2;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redeclaration);

        let err = compile("fn(a, a) { a }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redeclaration);
    }

    #[test]
    fn test_arity_checked_for_named_functions() {
        let err = compile("let add = fn(a, b) { a + b }; add(1);").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArityMismatch);
        assert_eq!(err.message, "Function 'add' expects 2 argument(s) but got 1");

        let err = compile("let f = fn(n) { f() };").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArityMismatch);

        // Captured bindings keep their arity
        let err = compile("fn() { let g = fn() { 1 }; fn() { g(2) } }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArityMismatch);

        // `var` bindings may be rebound, so they are checked at run time
        assert!(compile("var h = fn(a) { a }; h(1, 2);").is_ok());
    }

    #[test]
    fn test_state_carries_across_units() {
        let mut compiler = Compiler::new("<repl>", "");
        compiler.compile(&parse("let a = 1;")).unwrap();
        let state = compiler.into_state();

        let mut compiler = Compiler::with_state("<repl>", "", state);
        let program = compiler.compile(&parse("a + 2")).unwrap();
        assert_eq!(program.constants, vec![Constant::Integer(1), Constant::Integer(2)]);
        assert_instructions(
            &program.instructions,
            vec![
                make(OpCode::GetGlobal, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Add, &[]),
                make(OpCode::Pop, &[]),
            ],
        );
    }
}
