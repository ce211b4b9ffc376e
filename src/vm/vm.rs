// Kettle Virtual Machine
// Stack-based VM executing compiled bytecode through a pluggable host

use super::frame::Frame;
use super::host::{Closure, HostError, HostOps};
use super::native::NativeHost;
use crate::compiler::chunk::{BytecodeProgram, CompiledFunction};
use crate::compiler::opcode::{read_operands, OpCode, Operands};
use crate::error::{ErrorKind, KettleError, KettleResult, StackFrame};
use std::rc::Rc;
use tracing::{debug, instrument, trace};

pub const DEFAULT_STACK_SIZE: usize = 2048;
pub const DEFAULT_MAX_FRAMES: usize = 1024;
pub const DEFAULT_GLOBALS_SIZE: usize = 65536;

/// Static resource bounds of one VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    pub stack_size: usize,
    pub max_frames: usize,
    pub globals_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_frames: DEFAULT_MAX_FRAMES,
            globals_size: DEFAULT_GLOBALS_SIZE,
        }
    }
}

/// Global slots, indexed by the compiler's global symbol indices
pub type Globals<V> = Vec<Option<V>>;

fn malformed(message: impl Into<String>) -> HostError {
    HostError::new(ErrorKind::MalformedBytecode, message)
}

/// The Kettle Virtual Machine
pub struct Vm<H: HostOps = NativeHost> {
    host: H,
    config: VmConfig,
    constants: Vec<H::Value>,
    stack: Vec<H::Value>,
    frames: Vec<Frame<H::Value>>,
    globals: Globals<H::Value>,
    last_popped: Option<H::Value>,
    file: String,
    source: String,
}

impl Vm<NativeHost> {
    pub fn new(program: BytecodeProgram) -> Self {
        Self::with_host(program, NativeHost, VmConfig::default())
    }
}

impl<H: HostOps> Vm<H> {
    pub fn with_host(program: BytecodeProgram, host: H, config: VmConfig) -> Self {
        let constants = program
            .constants
            .iter()
            .map(|constant| host.load_constant(constant))
            .collect();

        let main = CompiledFunction {
            instructions: program.instructions,
            spans: program.spans,
            num_locals: 0,
            num_parameters: 0,
            name: None,
        };
        let main = Rc::new(Closure::new(Rc::new(main), Vec::new()));

        let mut frames = Vec::with_capacity(config.max_frames.min(64));
        frames.push(Frame::new(main, 0));

        Self {
            host,
            config,
            constants,
            stack: Vec::with_capacity(config.stack_size.min(1024)),
            frames,
            globals: Vec::new(),
            last_popped: None,
            file: "<script>".to_string(),
            source: String::new(),
        }
    }

    /// Start from globals left behind by an earlier run
    pub fn with_globals(mut self, globals: Globals<H::Value>) -> Self {
        self.globals = globals;
        self
    }

    /// File name and source text used when rendering runtime errors
    pub fn with_source(mut self, file: impl Into<String>, source: impl Into<String>) -> Self {
        self.file = file.into();
        self.source = source.into();
        self
    }

    pub fn into_globals(self) -> Globals<H::Value> {
        self.globals
    }

    /// The value most recently removed by `OpPop`
    pub fn last_popped(&self) -> Option<&H::Value> {
        self.last_popped.as_ref()
    }

    /// Execute until the main frame runs off its end or returns.
    ///
    /// The result is the value of a top-level `return`, otherwise the last
    /// popped value, otherwise null.
    #[instrument(skip_all, name = "vm.run", fields(file = %self.file))]
    pub fn run(&mut self) -> KettleResult<H::Value> {
        loop {
            let Some(frame) = self.frames.last() else {
                break;
            };

            if frame.is_finished() {
                if self.frames.len() == 1 {
                    break;
                }
                let err = malformed("Function body ended without a return");
                return Err(self.error(err));
            }

            match self.step() {
                Ok(Some(value)) => {
                    debug!("main frame returned");
                    return Ok(value);
                }
                Ok(None) => {}
                Err(err) => return Err(self.error(err)),
            }
        }

        debug!(stack = self.stack.len(), "run finished");
        Ok(self
            .last_popped
            .clone()
            .unwrap_or_else(|| self.host.null()))
    }

    /// Decode the instruction at `ip` and advance past it
    fn fetch(&mut self) -> Result<(OpCode, Operands), HostError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| malformed("No active frame"))?;
        let start = frame.ip;
        let code = &frame.closure.function.instructions;

        let byte = code
            .get(start)
            .copied()
            .ok_or_else(|| malformed("Instruction pointer out of range"))?;
        let op = OpCode::try_from(byte).map_err(|byte| {
            HostError::new(ErrorKind::UnknownOpcode, format!("Unknown opcode {}", byte))
        })?;

        let def = op.definition();
        let (operands, read) = read_operands(&def, &code[start + 1..])
            .ok_or_else(|| malformed(format!("Truncated operands for {}", def.name)))?;

        frame.ip = start + 1 + read;
        Ok((op, operands))
    }

    /// Execute one instruction. Returns `Some` when the main frame returns.
    fn step(&mut self) -> Result<Option<H::Value>, HostError> {
        let (op, operands) = self.fetch()?;
        let operand = |i: usize| operands.get(i).copied().unwrap_or(0);

        match op {
            OpCode::Constant => {
                let value = self
                    .constants
                    .get(operand(0))
                    .cloned()
                    .ok_or_else(|| malformed(format!("No constant at index {}", operand(0))))?;
                self.push(value)?;
            }

            OpCode::Pop => {
                let value = self.pop()?;
                self.last_popped = Some(value);
            }

            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Equal
            | OpCode::NotEqual
            | OpCode::GreaterThan
            | OpCode::GreaterEqual => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.host.binary_operation(lhs, rhs, op)?;
                self.push(result)?;
            }

            OpCode::Minus | OpCode::Bang => {
                let rhs = self.pop()?;
                let result = self.host.unary_operation(rhs, op)?;
                self.push(result)?;
            }

            OpCode::True => self.push(self.host.lang_bool(true))?,
            OpCode::False => self.push(self.host.lang_bool(false))?,
            OpCode::Null => self.push(self.host.null())?,

            OpCode::Jump => self.jump(operand(0))?,

            OpCode::JumpNotTruthy => {
                let condition = self.pop()?;
                if !self.host.is_truthy(&condition) {
                    self.jump(operand(0))?;
                }
            }

            OpCode::GetGlobal => {
                let value = self
                    .globals
                    .get(operand(0))
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| self.host.null());
                self.push(value)?;
            }

            OpCode::SetGlobal | OpCode::AssignGlobal => {
                let value = self.pop()?;
                self.set_global(operand(0), value)?;
            }

            OpCode::GetLocal => {
                let slot = self.local_slot(operand(0))?;
                let value = self.stack[slot].clone();
                self.push(value)?;
            }

            OpCode::SetLocal | OpCode::AssignLocal => {
                let value = self.pop()?;
                let slot = self.local_slot(operand(0))?;
                self.stack[slot] = value;
            }

            OpCode::GetBuiltin => {
                let builtin = self.host.builtin(operand(0))?;
                self.push(builtin)?;
            }

            OpCode::GetFree => {
                let value = self
                    .current_closure()?
                    .free
                    .get(operand(0))
                    .cloned()
                    .ok_or_else(|| malformed(format!("No free variable at index {}", operand(0))))?;
                self.push(value)?;
            }

            OpCode::Array => {
                let elements = self.take(operand(0))?;
                let array = self.host.build_array(elements);
                self.push(array)?;
            }

            OpCode::Hash => {
                let count = operand(0);
                if count % 2 != 0 {
                    return Err(malformed(format!("Odd element count {} for hash", count)));
                }

                let mut flat = self.take(count)?.into_iter();
                let mut pairs = Vec::with_capacity(count / 2);
                while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                    pairs.push((key, value));
                }

                let hash = self.host.build_hash(pairs)?;
                self.push(hash)?;
            }

            OpCode::Index => {
                let index = self.pop()?;
                let container = self.pop()?;
                let result = self.host.index(container, index)?;
                self.push(result)?;
            }

            OpCode::Call => self.call(operand(0))?,

            OpCode::ReturnValue => {
                let value = self.pop()?;
                return self.return_from_frame(value);
            }

            OpCode::Return => {
                let value = self.host.null();
                return self.return_from_frame(value);
            }

            OpCode::Closure => self.push_closure(operand(0), operand(1))?,

            OpCode::CurrentClosure => {
                let closure = self.current_closure()?;
                let value = self.host.wrap_closure(closure);
                self.push(value)?;
            }
        }

        Ok(None)
    }

    // ==================== Helper Methods ====================

    fn push(&mut self, value: H::Value) -> Result<(), HostError> {
        if self.stack.len() >= self.config.stack_size {
            return Err(HostError::new(ErrorKind::StackOverflow, "Stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<H::Value, HostError> {
        self.stack
            .pop()
            .ok_or_else(|| malformed("Stack underflow"))
    }

    /// Remove the top `count` values, preserving push order
    fn take(&mut self, count: usize) -> Result<Vec<H::Value>, HostError> {
        let start = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| malformed("Stack underflow"))?;
        Ok(self.stack.split_off(start))
    }

    fn jump(&mut self, target: usize) -> Result<(), HostError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| malformed("No active frame"))?;
        if target > frame.instructions().len() {
            return Err(malformed(format!("Jump target {} out of range", target)));
        }
        frame.ip = target;
        Ok(())
    }

    fn current_frame(&self) -> Result<&Frame<H::Value>, HostError> {
        self.frames.last().ok_or_else(|| malformed("No active frame"))
    }

    fn current_closure(&self) -> Result<Rc<Closure<H::Value>>, HostError> {
        Ok(self.current_frame()?.closure.clone())
    }

    fn local_slot(&self, index: usize) -> Result<usize, HostError> {
        let slot = self.current_frame()?.base_pointer + index;
        if slot >= self.stack.len() {
            return Err(malformed(format!("No local at index {}", index)));
        }
        Ok(slot)
    }

    fn set_global(&mut self, index: usize, value: H::Value) -> Result<(), HostError> {
        if index >= self.config.globals_size {
            return Err(malformed(format!("Global index {} out of range", index)));
        }
        if index >= self.globals.len() {
            self.globals.resize(index + 1, None);
        }
        self.globals[index] = Some(value);
        Ok(())
    }

    fn call(&mut self, argc: usize) -> Result<(), HostError> {
        let callee_slot = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| malformed("Stack underflow"))?;
        let callee = self.stack[callee_slot].clone();

        if let Some(closure) = self.host.as_closure(&callee) {
            return self.call_closure(closure, argc);
        }

        let args = &self.stack[callee_slot + 1..];
        match self.host.execute_builtin(&callee, args) {
            Some(result) => {
                let value = result?;
                self.stack.truncate(callee_slot);
                self.push(value)
            }
            None => Err(HostError::new(
                ErrorKind::NotCallable,
                format!("Calling non-function: {}", self.host.type_name(&callee)),
            )),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure<H::Value>>, argc: usize) -> Result<(), HostError> {
        let function = &closure.function;
        if argc != function.num_parameters {
            return Err(HostError::new(
                ErrorKind::WrongArgumentCount,
                format!(
                    "Wrong number of arguments: want={}, got={}",
                    function.num_parameters, argc
                ),
            ));
        }

        if self.frames.len() >= self.config.max_frames {
            return Err(HostError::new(
                ErrorKind::FrameOverflow,
                format!("Call depth exceeded {} frames", self.config.max_frames),
            ));
        }

        let base_pointer = self.stack.len() - argc;
        for _ in argc..function.num_locals {
            self.push(self.host.null())?;
        }

        trace!(
            function = %function.display_name(),
            depth = self.frames.len() + 1,
            base_pointer,
            "push frame"
        );
        self.frames.push(Frame::new(closure, base_pointer));
        Ok(())
    }

    fn return_from_frame(&mut self, value: H::Value) -> Result<Option<H::Value>, HostError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| malformed("Return with no active frame"))?;

        if self.frames.is_empty() {
            return Ok(Some(value));
        }

        trace!(depth = self.frames.len(), "pop frame");
        self.stack.truncate(frame.base_pointer.saturating_sub(1));
        self.push(value)?;
        Ok(None)
    }

    fn push_closure(&mut self, constant: usize, free_count: usize) -> Result<(), HostError> {
        let function = self
            .constants
            .get(constant)
            .and_then(|value| self.host.decode_function(value))
            .ok_or_else(|| malformed(format!("Constant {} is not a function", constant)))?;

        let free = self.take(free_count)?;
        let closure = self.host.wrap_closure(Rc::new(Closure::new(function, free)));
        self.push(closure)
    }

    // ==================== Errors ====================

    /// Locate a host error at the failing instruction and attach a stack trace
    fn error(&self, err: HostError) -> KettleError {
        let span = self
            .frames
            .last()
            .map(Frame::current_span)
            .unwrap_or_default();

        let stack_trace = self
            .frames
            .iter()
            .enumerate()
            .rev()
            .map(|(depth, frame)| {
                let name = if depth == 0 {
                    "<main>".to_string()
                } else {
                    frame.closure.display_name()
                };
                let span = frame.current_span();
                StackFrame::new(name, &self.file, span.start.line, span.start.column)
            })
            .collect();

        KettleError::runtime_error(err.kind, err.message, span, &self.file)
            .with_source(&self.source)
            .with_stack_trace(stack_trace)
    }
}
