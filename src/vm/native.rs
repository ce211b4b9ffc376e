// Kettle Native Host
// Arithmetic, comparison, collections and builtins for the built-in value type

use super::host::{Closure, HostError, HostOps};
use super::value::{HashKey, Value};
use crate::builtins::BUILTINS;
use crate::compiler::chunk::{CompiledFunction, Constant};
use crate::compiler::OpCode;
use crate::error::ErrorKind;
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// The default host used by `Vm::new`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeHost;

fn symbol(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "+",
        OpCode::Sub => "-",
        OpCode::Mul => "*",
        OpCode::Div => "/",
        OpCode::Mod => "%",
        OpCode::Equal => "==",
        OpCode::NotEqual => "!=",
        OpCode::GreaterThan => ">",
        OpCode::GreaterEqual => ">=",
        OpCode::Minus => "-",
        OpCode::Bang => "!",
        _ => "?",
    }
}

fn unsupported(lhs: &Value, rhs: &Value, op: OpCode) -> HostError {
    HostError::type_error(format!(
        "Unsupported operand types for {}: {} and {}",
        symbol(op),
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn integer_op(a: i64, b: i64, op: OpCode) -> Result<Value, HostError> {
    let value = match op {
        OpCode::Add => Value::Integer(a.wrapping_add(b)),
        OpCode::Sub => Value::Integer(a.wrapping_sub(b)),
        OpCode::Mul => Value::Integer(a.wrapping_mul(b)),
        OpCode::Div | OpCode::Mod if b == 0 => {
            return Err(HostError::new(ErrorKind::DivisionByZero, "Division by zero"));
        }
        OpCode::Div => Value::Integer(a.wrapping_div(b)),
        OpCode::Mod => Value::Integer(a.wrapping_rem(b)),
        OpCode::GreaterThan => Value::Boolean(a > b),
        OpCode::GreaterEqual => Value::Boolean(a >= b),
        _ => return Err(unsupported(&Value::Integer(a), &Value::Integer(b), op)),
    };
    Ok(value)
}

fn float_op(a: f64, b: f64, op: OpCode) -> Result<Value, HostError> {
    let value = match op {
        OpCode::Add => Value::Float(a + b),
        OpCode::Sub => Value::Float(a - b),
        OpCode::Mul => Value::Float(a * b),
        OpCode::Div => Value::Float(a / b),
        OpCode::Mod => Value::Float(a % b),
        OpCode::GreaterThan => Value::Boolean(a > b),
        OpCode::GreaterEqual => Value::Boolean(a >= b),
        _ => return Err(unsupported(&Value::Float(a), &Value::Float(b), op)),
    };
    Ok(value)
}

fn string_op(a: &str, b: &str, op: OpCode) -> Option<Value> {
    match op {
        OpCode::Add => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Some(Value::String(Rc::from(joined)))
        }
        OpCode::GreaterThan => Some(Value::Boolean(a > b)),
        OpCode::GreaterEqual => Some(Value::Boolean(a >= b)),
        _ => None,
    }
}

impl HostOps for NativeHost {
    type Value = Value;

    fn binary_operation(&mut self, lhs: Value, rhs: Value, op: OpCode) -> Result<Value, HostError> {
        match op {
            OpCode::Equal => return Ok(Value::Boolean(lhs == rhs)),
            OpCode::NotEqual => return Ok(Value::Boolean(lhs != rhs)),
            _ => {}
        }

        match (&lhs, &rhs) {
            (Value::Integer(a), Value::Integer(b)) => integer_op(*a, *b, op),
            (Value::Float(a), Value::Float(b)) => float_op(*a, *b, op),
            (Value::Integer(a), Value::Float(b)) => float_op(*a as f64, *b, op),
            (Value::Float(a), Value::Integer(b)) => float_op(*a, *b as f64, op),
            (Value::String(a), Value::String(b)) => {
                string_op(a, b, op).ok_or_else(|| unsupported(&lhs, &rhs, op))
            }
            _ => Err(unsupported(&lhs, &rhs, op)),
        }
    }

    fn unary_operation(&mut self, rhs: Value, op: OpCode) -> Result<Value, HostError> {
        match (op, &rhs) {
            (OpCode::Bang, value) => Ok(Value::Boolean(!value.is_truthy())),
            (OpCode::Minus, Value::Integer(n)) => Ok(Value::Integer(n.wrapping_neg())),
            (OpCode::Minus, Value::Float(n)) => Ok(Value::Float(-n)),
            _ => Err(HostError::type_error(format!(
                "Unsupported operand type for unary {}: {}",
                symbol(op),
                rhs.type_name()
            ))),
        }
    }

    fn is_truthy(&self, value: &Value) -> bool {
        value.is_truthy()
    }

    fn lang_bool(&self, value: bool) -> Value {
        Value::Boolean(value)
    }

    fn null(&self) -> Value {
        Value::Null
    }

    fn build_array(&mut self, elements: Vec<Value>) -> Value {
        Value::array(elements)
    }

    fn build_hash(&mut self, pairs: Vec<(Value, Value)>) -> Result<Value, HostError> {
        let mut map = FxHashMap::default();
        map.reserve(pairs.len());

        for (key, value) in pairs {
            let key = HashKey::from_value(&key).ok_or_else(|| {
                HostError::new(
                    ErrorKind::UnhashableKey,
                    format!("Unusable as hash key: {}", key.type_name()),
                )
            })?;
            map.insert(key, value);
        }

        Ok(Value::Hash(Rc::new(map)))
    }

    fn index(&mut self, container: Value, index: Value) -> Result<Value, HostError> {
        match (&container, &index) {
            (Value::Array(items), Value::Integer(i)) => Ok(usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null)),
            (Value::Hash(pairs), key) => {
                let key = HashKey::from_value(key).ok_or_else(|| {
                    HostError::new(
                        ErrorKind::UnhashableKey,
                        format!("Unusable as hash key: {}", key.type_name()),
                    )
                })?;
                Ok(pairs.get(&key).cloned().unwrap_or(Value::Null))
            }
            _ => Err(HostError::new(
                ErrorKind::NotIndexable,
                format!(
                    "Index operator not supported: {}[{}]",
                    container.type_name(),
                    index.type_name()
                ),
            )),
        }
    }

    fn execute_builtin(&mut self, candidate: &Value, args: &[Value]) -> Option<Result<Value, HostError>> {
        match candidate {
            Value::Builtin(def) => Some((def.func)(args)),
            _ => None,
        }
    }

    fn builtin(&self, index: usize) -> Result<Value, HostError> {
        BUILTINS.get(index).map(Value::Builtin).ok_or_else(|| {
            HostError::new(
                ErrorKind::MalformedBytecode,
                format!("No builtin at index {}", index),
            )
        })
    }

    fn load_constant(&self, constant: &Constant) -> Value {
        match constant {
            Constant::Integer(n) => Value::Integer(*n),
            Constant::Float(n) => Value::Float(*n),
            Constant::String(s) => Value::String(s.clone()),
            Constant::Function(func) => Value::CompiledFunction(func.clone()),
        }
    }

    fn decode_function(&self, value: &Value) -> Option<Rc<CompiledFunction>> {
        match value {
            Value::CompiledFunction(func) => Some(func.clone()),
            _ => None,
        }
    }

    fn wrap_closure(&self, closure: Rc<Closure<Value>>) -> Value {
        Value::Closure(closure)
    }

    fn as_closure(&self, value: &Value) -> Option<Rc<Closure<Value>>> {
        match value {
            Value::Closure(closure) => Some(closure.clone()),
            _ => None,
        }
    }

    fn type_name(&self, value: &Value) -> &'static str {
        value.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(lhs: Value, rhs: Value, op: OpCode) -> Result<Value, HostError> {
        NativeHost.binary_operation(lhs, rhs, op)
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(binary(Value::Integer(7), Value::Integer(2), OpCode::Div).unwrap(), Value::Integer(3));
        assert_eq!(binary(Value::Integer(7), Value::Integer(2), OpCode::Mod).unwrap(), Value::Integer(1));
        assert_eq!(
            binary(Value::Integer(i64::MAX), Value::Integer(1), OpCode::Add).unwrap(),
            Value::Integer(i64::MIN)
        );

        let err = binary(Value::Integer(1), Value::Integer(0), OpCode::Div).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        let err = binary(Value::Integer(1), Value::Integer(0), OpCode::Mod).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
    }

    #[test]
    fn test_mixed_numbers_promote() {
        assert_eq!(binary(Value::Integer(1), Value::Float(0.5), OpCode::Add).unwrap(), Value::Float(1.5));
        assert_eq!(binary(Value::Float(1.0), Value::Integer(2), OpCode::GreaterThan).unwrap(), Value::Boolean(false));
        assert_eq!(binary(Value::Float(1.0), Value::Float(0.0), OpCode::Div).unwrap(), Value::Float(f64::INFINITY));
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            binary(Value::string("ab"), Value::string("cd"), OpCode::Add).unwrap(),
            Value::string("abcd")
        );
        assert_eq!(
            binary(Value::string("b"), Value::string("a"), OpCode::GreaterThan).unwrap(),
            Value::Boolean(true)
        );

        let err = binary(Value::string("a"), Value::string("b"), OpCode::Sub).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert_eq!(err.message, "Unsupported operand types for -: String and String");

        let err = binary(Value::string("a"), Value::Integer(1), OpCode::Add).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_equality_is_structural() {
        let a = Value::array(vec![Value::Integer(1)]);
        let b = Value::array(vec![Value::Integer(1)]);
        assert_eq!(binary(a, b, OpCode::Equal).unwrap(), Value::Boolean(true));
        assert_eq!(binary(Value::Null, Value::Boolean(false), OpCode::NotEqual).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_unary() {
        let mut host = NativeHost;
        assert_eq!(host.unary_operation(Value::Integer(5), OpCode::Minus).unwrap(), Value::Integer(-5));
        assert_eq!(host.unary_operation(Value::Null, OpCode::Bang).unwrap(), Value::Boolean(true));
        assert_eq!(host.unary_operation(Value::Integer(0), OpCode::Bang).unwrap(), Value::Boolean(false));
        assert_eq!(
            host.unary_operation(Value::Boolean(true), OpCode::Minus).unwrap_err().kind,
            ErrorKind::TypeError
        );
    }

    #[test]
    fn test_hash_build_and_index() {
        let mut host = NativeHost;
        let hash = host
            .build_hash(vec![
                (Value::string("one"), Value::Integer(1)),
                (Value::Integer(2), Value::Integer(2)),
                (Value::Boolean(true), Value::Integer(3)),
            ])
            .unwrap();

        assert_eq!(host.index(hash.clone(), Value::string("one")).unwrap(), Value::Integer(1));
        assert_eq!(host.index(hash.clone(), Value::Boolean(true)).unwrap(), Value::Integer(3));
        assert_eq!(host.index(hash.clone(), Value::Integer(9)).unwrap(), Value::Null);
        assert_eq!(
            host.index(hash, Value::array(vec![])).unwrap_err().kind,
            ErrorKind::UnhashableKey
        );

        let err = host
            .build_hash(vec![(Value::array(vec![]), Value::Null)])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnhashableKey);
    }

    #[test]
    fn test_array_index() {
        let mut host = NativeHost;
        let items = Value::array(vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(host.index(items.clone(), Value::Integer(1)).unwrap(), Value::Integer(2));
        assert_eq!(host.index(items.clone(), Value::Integer(2)).unwrap(), Value::Null);
        assert_eq!(host.index(items.clone(), Value::Integer(-1)).unwrap(), Value::Null);
        assert_eq!(
            host.index(Value::string("abc"), Value::Integer(0)).unwrap_err().kind,
            ErrorKind::NotIndexable
        );
        assert_eq!(
            host.index(items, Value::string("x")).unwrap_err().kind,
            ErrorKind::NotIndexable
        );
    }

    #[test]
    fn test_builtins_by_index() {
        let mut host = NativeHost;
        let len = host.builtin(0).unwrap();
        let result = host.execute_builtin(&len, &[Value::string("abc")]).unwrap();
        assert_eq!(result.unwrap(), Value::Integer(3));

        assert!(host.execute_builtin(&Value::Integer(1), &[]).is_none());
        assert_eq!(host.builtin(6).unwrap_err().kind, ErrorKind::MalformedBytecode);
    }
}
