// Collection builtins
// Provides: len, first, last, rest, push

use super::check_arity;
use crate::vm::{HostError, Value};

fn expect_array<'a>(name: &str, value: &'a Value) -> Result<&'a [Value], HostError> {
    value.as_array().ok_or_else(|| {
        HostError::builtin(format!(
            "argument to '{}' must be Array, got {}",
            name,
            value.type_name()
        ))
    })
}

pub fn len(args: &[Value]) -> Result<Value, HostError> {
    check_arity("len", 1, args)?;

    match &args[0] {
        Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
        Value::Array(items) => Ok(Value::Integer(items.len() as i64)),
        Value::Hash(pairs) => Ok(Value::Integer(pairs.len() as i64)),
        other => Err(HostError::builtin(format!(
            "argument to 'len' not supported, got {}",
            other.type_name()
        ))),
    }
}

pub fn first(args: &[Value]) -> Result<Value, HostError> {
    check_arity("first", 1, args)?;
    let items = expect_array("first", &args[0])?;
    Ok(items.first().cloned().unwrap_or(Value::Null))
}

pub fn last(args: &[Value]) -> Result<Value, HostError> {
    check_arity("last", 1, args)?;
    let items = expect_array("last", &args[0])?;
    Ok(items.last().cloned().unwrap_or(Value::Null))
}

pub fn rest(args: &[Value]) -> Result<Value, HostError> {
    check_arity("rest", 1, args)?;
    let items = expect_array("rest", &args[0])?;

    if items.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::array(items[1..].to_vec()))
}

pub fn push(args: &[Value]) -> Result<Value, HostError> {
    check_arity("push", 2, args)?;
    let items = expect_array("push", &args[0])?;

    let mut pushed = Vec::with_capacity(items.len() + 1);
    pushed.extend_from_slice(items);
    pushed.push(args[1].clone());
    Ok(Value::array(pushed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn ints(values: &[i64]) -> Value {
        Value::array(values.iter().map(|n| Value::Integer(*n)).collect())
    }

    #[test]
    fn test_len() {
        assert_eq!(len(&[ints(&[1, 2, 3])]).unwrap(), Value::Integer(3));
        assert_eq!(len(&[Value::string("héllo")]).unwrap(), Value::Integer(5));

        let err = len(&[Value::Integer(1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BuiltinError);
        assert_eq!(err.message, "argument to 'len' not supported, got Integer");

        let err = len(&[]).unwrap_err();
        assert_eq!(err.message, "len() expects 1 argument(s), got 0");
    }

    #[test]
    fn test_first_last_rest() {
        let items = ints(&[1, 2, 3]);
        assert_eq!(first(&[items.clone()]).unwrap(), Value::Integer(1));
        assert_eq!(last(&[items.clone()]).unwrap(), Value::Integer(3));
        assert_eq!(rest(&[items]).unwrap(), ints(&[2, 3]));

        let empty = ints(&[]);
        assert_eq!(first(&[empty.clone()]).unwrap(), Value::Null);
        assert_eq!(last(&[empty.clone()]).unwrap(), Value::Null);
        assert_eq!(rest(&[empty]).unwrap(), Value::Null);

        assert!(first(&[Value::string("abc")]).is_err());
    }

    #[test]
    fn test_push_returns_new_array() {
        let original = ints(&[1]);
        let pushed = push(&[original.clone(), Value::Integer(2)]).unwrap();
        assert_eq!(pushed, ints(&[1, 2]));
        assert_eq!(original, ints(&[1]));

        assert!(push(&[Value::Null, Value::Integer(2)]).is_err());
    }
}
