// Kettle Runtime Values
// Values of the native host, shared through Rc and immutable once built

use super::host::Closure;
use crate::builtins::BuiltinDef;
use crate::compiler::chunk::CompiledFunction;
use rustc_hash::FxHashMap;
use std::fmt;
use std::rc::Rc;

/// Runtime value types
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    Array(Rc<Vec<Value>>),
    Hash(Rc<FxHashMap<HashKey, Value>>),
    Builtin(&'static BuiltinDef),
    /// A function constant before it is wrapped by `OpClosure`
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure<Value>>),
}

/// The closed set of values usable as hash keys. Keys order integers
/// before strings before booleans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashKey {
    Integer(i64),
    String(Rc<str>),
    Boolean(bool),
}

impl HashKey {
    pub fn from_value(value: &Value) -> Option<HashKey> {
        match value {
            Value::Integer(n) => Some(HashKey::Integer(*n)),
            Value::String(s) => Some(HashKey::String(s.clone())),
            Value::Boolean(b) => Some(HashKey::Boolean(*b)),
            _ => None,
        }
    }
}

/// Hash entries ordered by key, for stable output
pub fn sorted_entries(pairs: &FxHashMap<HashKey, Value>) -> Vec<(&HashKey, &Value)> {
    let mut entries: Vec<_> = pairs.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKey::Integer(n) => write!(f, "{}", n),
            HashKey::String(s) => write!(f, "{:?}", s),
            HashKey::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Hash(_) => "Hash",
            Value::Builtin(_) => "Builtin",
            Value::CompiledFunction(_) => "CompiledFunction",
            Value::Closure(_) => "Closure",
        }
    }

    /// Only `false` and `null` are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Boolean(false))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(items))
    }

    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::CompiledFunction(a), Value::CompiledFunction(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{:?}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Hash(pairs) => {
                let items: Vec<String> = sorted_entries(pairs)
                    .into_iter()
                    .map(|(k, v)| format!("{}: {}", k, v.repr()))
                    .collect();
                write!(f, "{{{}}}", items.join(", "))
            }
            Value::Builtin(def) => write!(f, "<builtin {}>", def.name),
            Value::CompiledFunction(func) => write!(f, "{}", func.display_name()),
            Value::Closure(closure) => write!(f, "{}", closure.display_name()),
        }
    }
}

impl Value {
    /// Source-like form used inside collections, where strings are quoted
    pub fn repr(&self) -> String {
        match self {
            Value::String(s) => format!("{:?}", s),
            other => other.to_string(),
        }
    }
}
