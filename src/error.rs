// Kettle Error Handling Module
// Located errors for the syntax, compile and runtime phases

use colored::*;
use std::fmt;

/// Represents a position in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

/// Represents a span in the source code (start to end position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn single(line: usize, column: usize, offset: usize) -> Self {
        let pos = Position::new(line, column, offset);
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Span covering both `self` and `other`
    pub fn to(self, other: Span) -> Self {
        Self {
            start: self.start,
            end: other.end,
        }
    }
}

/// Which stage of the pipeline raised an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Syntax,
    Compile,
    Runtime,
}

/// Types of errors in Kettle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,

    // Compile time
    UnresolvedName,
    Redeclaration,
    AssignToConstant,
    AssignToCaptured,
    ArityMismatch,
    OperandOverflow,

    // Run time
    StackOverflow,
    FrameOverflow,
    UnknownOpcode,
    MalformedBytecode,
    UnhashableKey,
    NotCallable,
    WrongArgumentCount,
    NotIndexable,
    TypeError,
    DivisionByZero,
    BuiltinError,
}

impl ErrorKind {
    pub fn phase(&self) -> Phase {
        match self {
            ErrorKind::SyntaxError => Phase::Syntax,
            ErrorKind::UnresolvedName
            | ErrorKind::Redeclaration
            | ErrorKind::AssignToConstant
            | ErrorKind::AssignToCaptured
            | ErrorKind::ArityMismatch
            | ErrorKind::OperandOverflow => Phase::Compile,
            _ => Phase::Runtime,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::UnresolvedName => "NameError",
            ErrorKind::Redeclaration => "RedeclarationError",
            ErrorKind::AssignToConstant => "AssignmentError",
            ErrorKind::AssignToCaptured => "AssignmentError",
            ErrorKind::ArityMismatch => "ArgumentError",
            ErrorKind::OperandOverflow => "CompileError",
            ErrorKind::StackOverflow => "StackOverflow",
            ErrorKind::FrameOverflow => "FrameOverflow",
            ErrorKind::UnknownOpcode => "BytecodeError",
            ErrorKind::MalformedBytecode => "BytecodeError",
            ErrorKind::UnhashableKey => "KeyError",
            ErrorKind::NotCallable => "TypeError",
            ErrorKind::WrongArgumentCount => "ArgumentError",
            ErrorKind::NotIndexable => "IndexError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::DivisionByZero => "DivisionByZero",
            ErrorKind::BuiltinError => "BuiltinError",
        };
        write!(f, "{}", name)
    }
}

/// A stack frame for error traces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function_name: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl StackFrame {
    pub fn new(
        function_name: impl Into<String>,
        file: impl Into<String>,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  at {} ({}:{}:{})",
            self.function_name, self.file, self.line, self.column
        )
    }
}

/// Main error type for Kettle
#[derive(Debug, Clone)]
pub struct KettleError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub file: String,
    pub help: Option<String>,
    pub stack_trace: Vec<StackFrame>,
    source_lines: Vec<String>,
}

impl KettleError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        span: Span,
        file: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            file: file.into(),
            help: None,
            stack_trace: Vec::new(),
            source_lines: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.kind.phase()
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source_lines = source.lines().map(String::from).collect();
        self
    }

    pub fn with_stack_trace(mut self, trace: Vec<StackFrame>) -> Self {
        self.stack_trace = trace;
        self
    }

    /// Format the error for terminal display
    pub fn format(&self) -> String {
        let mut output = String::new();

        // Header: Kind: message at file:line:column
        let header = format!(
            "{}: {} at {}:{}:{}",
            self.kind.to_string().red().bold(),
            self.message.white().bold(),
            self.file,
            self.span.start.line,
            self.span.start.column
        );
        output.push_str(&header);
        output.push('\n');

        // Source context: the line before, the error line, the line after
        if !self.source_lines.is_empty() {
            let error_line = self.span.start.line;
            let start_line = if error_line > 1 { error_line - 1 } else { 1 };
            let end_line = (error_line + 1).min(self.source_lines.len());

            output.push('\n');

            for line_num in start_line..=end_line {
                let Some(line_content) = self.source_lines.get(line_num - 1) else {
                    continue;
                };
                let line_num_str = format!("{:>4} |", line_num);

                if line_num == error_line {
                    output.push_str(&format!("{} {}\n", line_num_str.red(), line_content));

                    let spaces = " ".repeat(6 + self.span.start.column);
                    let caret_len = if self.span.end.line == self.span.start.line
                        && self.span.end.column > self.span.start.column
                    {
                        self.span.end.column - self.span.start.column
                    } else {
                        1
                    };
                    let carets = "^".repeat(caret_len);
                    output.push_str(&format!("{}{}\n", spaces, carets.red().bold()));
                } else {
                    output.push_str(&format!("{} {}\n", line_num_str.dimmed(), line_content));
                }
            }
        }

        if let Some(ref help) = self.help {
            output.push_str(&format!("\n      {}: {}\n", "Help".cyan().bold(), help));
        }

        if !self.stack_trace.is_empty() {
            output.push_str(&format!("\n{}:\n", "Stack trace".yellow().bold()));
            for frame in &self.stack_trace {
                output.push_str(&format!("{}\n", frame));
            }
        }

        output
    }
}

impl fmt::Display for KettleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

impl std::error::Error for KettleError {}

/// Result type for Kettle operations
pub type KettleResult<T> = Result<T, KettleError>;

// Convenience constructors for common errors
impl KettleError {
    pub fn syntax_error(message: impl Into<String>, span: Span, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message, span, file)
    }

    pub fn name_error(name: &str, span: Span, file: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnresolvedName,
            format!("Cannot resolve name '{}'", name),
            span,
            file,
        )
    }

    pub fn runtime_error(
        kind: ErrorKind,
        message: impl Into<String>,
        span: Span,
        file: impl Into<String>,
    ) -> Self {
        Self::new(kind, message, span, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_are_distinct() {
        assert_eq!(ErrorKind::SyntaxError.phase(), Phase::Syntax);
        assert_eq!(ErrorKind::AssignToConstant.phase(), Phase::Compile);
        assert_eq!(ErrorKind::ArityMismatch.phase(), Phase::Compile);
        assert_eq!(ErrorKind::WrongArgumentCount.phase(), Phase::Runtime);
        assert_eq!(ErrorKind::StackOverflow.phase(), Phase::Runtime);
    }

    #[test]
    fn test_format_points_at_column() {
        colored::control::set_override(false);
        let span = Span::new(Position::new(2, 5, 0), Position::new(2, 8, 0));
        let err = KettleError::name_error("foo", span, "main.ktl")
            .with_source("let a = 1;\nlet foo2 = foo;\n")
            .with_help("declare it with let or var");

        let text = err.format();
        assert!(text.starts_with("NameError: Cannot resolve name 'foo' at main.ktl:2:5"));
        assert!(text.contains("   2 | let foo2 = foo;"));
        assert!(text.contains(&format!("\n{}^^^\n", " ".repeat(11))));
        assert!(text.contains("Help: declare it with let or var"));
    }
}
