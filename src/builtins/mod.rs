// Kettle Built-in Functions
// The index of each entry is its OpGetBuiltin operand

mod array;
mod console;

use crate::vm::{HostError, Value};
use std::fmt;

pub type BuiltinFn = fn(&[Value]) -> Result<Value, HostError>;

pub struct BuiltinDef {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for BuiltinDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuiltinDef({})", self.name)
    }
}

/// Builtins in index order. Compiler and VM both depend on this order.
pub static BUILTINS: [BuiltinDef; 6] = [
    BuiltinDef {
        name: "len",
        func: array::len,
    },
    BuiltinDef {
        name: "puts",
        func: console::puts,
    },
    BuiltinDef {
        name: "first",
        func: array::first,
    },
    BuiltinDef {
        name: "last",
        func: array::last,
    },
    BuiltinDef {
        name: "rest",
        func: array::rest,
    },
    BuiltinDef {
        name: "push",
        func: array::push,
    },
];

pub(crate) fn check_arity(name: &str, expected: usize, args: &[Value]) -> Result<(), HostError> {
    if args.len() != expected {
        return Err(HostError::builtin(format!(
            "{}() expects {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_order() {
        let names: Vec<&str> = BUILTINS.iter().map(|def| def.name).collect();
        assert_eq!(names, ["len", "puts", "first", "last", "rest", "push"]);
    }
}
