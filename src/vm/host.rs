// Kettle Host Bridge
// The VM is generic over how values are represented and operated on

use crate::compiler::chunk::{CompiledFunction, Constant};
use crate::compiler::OpCode;
use crate::error::ErrorKind;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// A failed host operation. The VM attaches the span and stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HostError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn builtin(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BuiltinError, message)
    }
}

/// A compiled function paired with the values it captured
pub struct Closure<V> {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<V>,
}

impl<V> Closure<V> {
    pub fn new(function: Rc<CompiledFunction>, free: Vec<V>) -> Self {
        Self { function, free }
    }

    pub fn display_name(&self) -> String {
        self.function.display_name()
    }
}

impl<V: fmt::Debug> fmt::Debug for Closure<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("function", &self.function.display_name())
            .field("free", &self.free)
            .finish()
    }
}

/// Everything the VM needs from the value domain.
///
/// The VM only moves values around, calls closures, and manages frames.
/// Arithmetic, truthiness, collections, indexing and builtins are the host's.
pub trait HostOps {
    type Value: Clone + fmt::Debug;

    /// Apply a binary opcode (`Add` through `GreaterEqual`)
    fn binary_operation(
        &mut self,
        lhs: Self::Value,
        rhs: Self::Value,
        op: OpCode,
    ) -> Result<Self::Value, HostError>;

    /// Apply `Minus` or `Bang`
    fn unary_operation(&mut self, rhs: Self::Value, op: OpCode) -> Result<Self::Value, HostError>;

    fn is_truthy(&self, value: &Self::Value) -> bool;

    fn lang_bool(&self, value: bool) -> Self::Value;

    fn null(&self) -> Self::Value;

    fn build_array(&mut self, elements: Vec<Self::Value>) -> Self::Value;

    fn build_hash(&mut self, pairs: Vec<(Self::Value, Self::Value)>) -> Result<Self::Value, HostError>;

    fn index(&mut self, container: Self::Value, index: Self::Value) -> Result<Self::Value, HostError>;

    /// Run `candidate` if it is a builtin; `None` means it is not one
    fn execute_builtin(
        &mut self,
        candidate: &Self::Value,
        args: &[Self::Value],
    ) -> Option<Result<Self::Value, HostError>>;

    fn builtin(&self, index: usize) -> Result<Self::Value, HostError>;

    fn load_constant(&self, constant: &Constant) -> Self::Value;

    fn decode_function(&self, value: &Self::Value) -> Option<Rc<CompiledFunction>>;

    fn wrap_closure(&self, closure: Rc<Closure<Self::Value>>) -> Self::Value;

    fn as_closure(&self, value: &Self::Value) -> Option<Rc<Closure<Self::Value>>>;

    /// Name used in runtime error messages
    fn type_name(&self, _value: &Self::Value) -> &'static str {
        "value"
    }
}
