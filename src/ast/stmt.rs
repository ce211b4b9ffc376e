// Kettle Statement AST Nodes

use super::Expr;
use crate::error::Span;
use std::fmt;

/// Binding mutability: `let` bindings are constant, `var` bindings may be reassigned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Let,
    Var,
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::Let => write!(f, "let"),
            Mutability::Var => write!(f, "var"),
        }
    }
}

/// Statement nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Declaration: `let name = value;` or `var name = value;`
    Let {
        name: String,
        mutability: Mutability,
        value: Expr,
        span: Span,
    },

    /// Assignment to an existing binding: `name = value;`
    Assign {
        name: String,
        value: Expr,
        span: Span,
    },

    Return {
        value: Option<Expr>,
        span: Span,
    },

    Expression {
        expr: Expr,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Expression { span, .. } => *span,
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Let {
                name,
                mutability,
                value,
                ..
            } => write!(f, "{} {} = {};", mutability, name, value),
            Stmt::Assign { name, value, .. } => write!(f, "{} = {};", name, value),
            Stmt::Return { value: Some(value), .. } => write!(f, "return {};", value),
            Stmt::Return { value: None, .. } => write!(f, "return;"),
            Stmt::Expression { expr, .. } => write!(f, "{}", expr),
        }
    }
}

/// A braced list of statements
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.statements.is_empty() {
            return write!(f, "{{ }}");
        }
        let body: Vec<String> = self.statements.iter().map(|s| s.to_string()).collect();
        write!(f, "{{ {} }}", body.join(" "))
    }
}

/// A complete program (list of statements)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body: Vec<String> = self.statements.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", body.join(" "))
    }
}
