// Console builtins
// Provides: puts

use crate::vm::{HostError, Value};
use std::io::Write;

/// Print each argument on its own line
pub fn puts(args: &[Value]) -> Result<Value, HostError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for arg in args {
        writeln!(out, "{}", arg)
            .map_err(|e| HostError::builtin(format!("puts failed: {}", e)))?;
    }
    out.flush().ok();

    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_puts_returns_null() {
        assert_eq!(puts(&[Value::Integer(1), Value::string("two")]).unwrap(), Value::Null);
        assert_eq!(puts(&[]).unwrap(), Value::Null);
    }
}
