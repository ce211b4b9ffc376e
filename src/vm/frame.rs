// Kettle Call Frames

use super::host::Closure;
use crate::error::Span;
use std::rc::Rc;

/// Call frame for function execution
pub struct Frame<V> {
    pub closure: Rc<Closure<V>>,
    /// Offset of the next byte to read
    pub ip: usize,
    /// Stack index of the first argument; the callee sits just below it
    pub base_pointer: usize,
}

impl<V> Frame<V> {
    pub fn new(closure: Rc<Closure<V>>, base_pointer: usize) -> Self {
        Self {
            closure,
            ip: 0,
            base_pointer,
        }
    }

    pub fn instructions(&self) -> &[u8] {
        &self.closure.function.instructions
    }

    pub fn is_finished(&self) -> bool {
        self.ip >= self.instructions().len()
    }

    /// Span of the instruction most recently fetched
    pub fn current_span(&self) -> Span {
        self.closure.function.span_at(self.ip.saturating_sub(1))
    }
}
