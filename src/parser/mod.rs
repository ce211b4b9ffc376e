// Kettle Parser
// Pratt (top-down operator precedence) parser that converts tokens into an AST

use crate::ast::*;
use crate::error::{KettleError, KettleResult, Span};
use crate::lexer::{Token, TokenKind};

/// Binding power of infix operators, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,      // == !=
    LessGreater, // < <= > >=
    Sum,         // + -
    Product,     // * / %
    Prefix,      // -x !x
    Call,        // f(x)
    Index,       // a[i]
}

fn precedence_of(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equals,
        TokenKind::Less | TokenKind::LessEqual | TokenKind::Greater | TokenKind::GreaterEqual => {
            Precedence::LessGreater
        }
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Product,
        TokenKind::LeftParen => Precedence::Call,
        TokenKind::LeftBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

/// Pratt parser for Kettle
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    file: String,
    source: String,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, file: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            tokens,
            current: 0,
            file: file.into(),
            source: source.into(),
        }
    }

    /// Parse the entire program
    pub fn parse(&mut self) -> KettleResult<Program> {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            statements.push(self.statement()?);
        }

        Ok(Program { statements })
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> KettleResult<Stmt> {
        if self.check(&TokenKind::Let) {
            self.let_declaration(Mutability::Let)
        } else if self.check(&TokenKind::Var) {
            self.let_declaration(Mutability::Var)
        } else if self.check(&TokenKind::Return) {
            self.return_statement()
        } else if matches!(self.peek().kind, TokenKind::Identifier(_))
            && self.check_ahead(1, &TokenKind::Equal)
        {
            self.assignment()
        } else {
            self.expression_statement()
        }
    }

    fn let_declaration(&mut self, mutability: Mutability) -> KettleResult<Stmt> {
        let start = self.advance().span;
        let name = self
            .consume_identifier(&format!("Expected variable name after '{}'", mutability))?
            .lexeme
            .clone();
        self.consume(&TokenKind::Equal, "Expected '=' after variable name")
            .map_err(|e| e.with_help(format!("Declare with '{} {} = value;'", mutability, name)))?;

        let mut value = self.expression(Precedence::Lowest)?;
        if let Expr::Function(func) = &mut value {
            func.name = Some(name.clone());
        }
        self.match_token(&TokenKind::Semicolon);

        Ok(Stmt::Let {
            name,
            mutability,
            value,
            span: start.to(self.previous().span),
        })
    }

    fn assignment(&mut self) -> KettleResult<Stmt> {
        let target = self.advance().clone();
        self.advance(); // '='

        let value = self.expression(Precedence::Lowest)?;
        self.match_token(&TokenKind::Semicolon);

        Ok(Stmt::Assign {
            name: target.lexeme,
            value,
            span: target.span.to(self.previous().span),
        })
    }

    fn return_statement(&mut self) -> KettleResult<Stmt> {
        let start = self.advance().span;

        let value = if self.check(&TokenKind::Semicolon)
            || self.check(&TokenKind::RightBrace)
            || self.is_at_end()
        {
            None
        } else {
            Some(self.expression(Precedence::Lowest)?)
        };
        self.match_token(&TokenKind::Semicolon);

        Ok(Stmt::Return {
            value,
            span: start.to(self.previous().span),
        })
    }

    fn expression_statement(&mut self) -> KettleResult<Stmt> {
        let expr = self.expression(Precedence::Lowest)?;
        let span = expr.span();
        self.match_token(&TokenKind::Semicolon);
        Ok(Stmt::Expression { expr, span })
    }

    fn block(&mut self) -> KettleResult<Block> {
        let start = self
            .consume(&TokenKind::LeftBrace, "Expected '{' to start a block")?
            .span;
        let mut statements = Vec::new();

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.statement()?);
        }

        let end = self
            .consume(&TokenKind::RightBrace, "Expected '}' after block")?
            .span;
        Ok(Block {
            statements,
            span: start.to(end),
        })
    }

    // ==================== Expressions ====================

    fn expression(&mut self, precedence: Precedence) -> KettleResult<Expr> {
        let mut left = self.prefix()?;

        while !self.is_at_end() && precedence < precedence_of(&self.peek().kind) {
            left = self.infix(left)?;
        }

        Ok(left)
    }

    fn prefix(&mut self) -> KettleResult<Expr> {
        if self.is_at_end() {
            return Err(self.error("Expected expression, found end of input"));
        }

        let token = self.advance().clone();
        let span = token.span;

        let expr = match token.kind {
            TokenKind::Identifier(name) => Expr::Identifier { name, span },
            TokenKind::Integer(value) => Expr::Integer { value, span },
            TokenKind::Float(value) => Expr::Float { value, span },
            TokenKind::String(value) => Expr::String { value, span },
            TokenKind::True => Expr::Boolean { value: true, span },
            TokenKind::False => Expr::Boolean { value: false, span },
            TokenKind::Null => Expr::Null { span },

            TokenKind::Bang => self.unary(UnaryOp::Not, span)?,
            TokenKind::Minus => self.unary(UnaryOp::Negate, span)?,

            TokenKind::LeftParen => {
                let expr = self.expression(Precedence::Lowest)?;
                self.consume(&TokenKind::RightParen, "Expected ')' after expression")?;
                expr
            }

            TokenKind::If => self.if_expression(span)?,
            TokenKind::Fn => self.function_literal(span)?,

            TokenKind::LeftBracket => {
                let elements = self.expression_list(&TokenKind::RightBracket, "]")?;
                Expr::Array {
                    elements,
                    span: span.to(self.previous().span),
                }
            }

            TokenKind::LeftBrace => self.hash_literal(span)?,

            _ => {
                return Err(self.error_at(
                    &token,
                    &format!("Expected expression, found '{}'", token.kind),
                ));
            }
        };

        Ok(expr)
    }

    fn unary(&mut self, op: UnaryOp, start: Span) -> KettleResult<Expr> {
        let operand = self.expression(Precedence::Prefix)?;
        Ok(Expr::Unary {
            op,
            span: start.to(operand.span()),
            operand: Box::new(operand),
        })
    }

    fn infix(&mut self, left: Expr) -> KettleResult<Expr> {
        let token = self.advance().clone();

        match token.kind {
            TokenKind::LeftParen => {
                let args = self.expression_list(&TokenKind::RightParen, ")")?;
                Ok(Expr::Call {
                    span: left.span().to(self.previous().span),
                    callee: Box::new(left),
                    args,
                })
            }
            TokenKind::LeftBracket => {
                let index = self.expression(Precedence::Lowest)?;
                self.consume(&TokenKind::RightBracket, "Expected ']' after index")?;
                Ok(Expr::Index {
                    span: left.span().to(self.previous().span),
                    object: Box::new(left),
                    index: Box::new(index),
                })
            }
            ref kind => {
                let op = BinaryOp::from_token(kind)
                    .ok_or_else(|| self.error_at(&token, &format!("Unexpected operator '{}'", kind)))?;
                let right = self.expression(precedence_of(kind))?;
                Ok(Expr::Binary {
                    span: left.span().to(right.span()),
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                })
            }
        }
    }

    fn if_expression(&mut self, start: Span) -> KettleResult<Expr> {
        self.consume(&TokenKind::LeftParen, "Expected '(' after 'if'")?;
        let condition = self.expression(Precedence::Lowest)?;
        self.consume(&TokenKind::RightParen, "Expected ')' after condition")?;

        let then_branch = self.block()?;

        let else_branch = if self.match_token(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                // `else if` is sugar for an else block holding a single if expression
                let if_span = self.advance().span;
                let nested = self.if_expression(if_span)?;
                let span = nested.span();
                Some(Block {
                    statements: vec![Stmt::Expression { expr: nested, span }],
                    span,
                })
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };

        Ok(Expr::If {
            condition: Box::new(condition),
            then_branch,
            else_branch,
            span: start.to(self.previous().span),
        })
    }

    fn function_literal(&mut self, start: Span) -> KettleResult<Expr> {
        self.consume(&TokenKind::LeftParen, "Expected '(' after 'fn'")?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let param = self.consume_identifier("Expected parameter name")?;
                params.push(Param {
                    name: param.lexeme.clone(),
                    span: param.span,
                });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expected ')' after parameters")?;

        let body = self.block()?;

        Ok(Expr::Function(FunctionLiteral {
            name: None,
            params,
            span: start.to(body.span),
            body,
        }))
    }

    fn hash_literal(&mut self, start: Span) -> KettleResult<Expr> {
        let mut pairs = Vec::new();

        while !self.check(&TokenKind::RightBrace) {
            let key = self.expression(Precedence::Lowest)?;
            self.consume(&TokenKind::Colon, "Expected ':' after hash key")?;
            let value = self.expression(Precedence::Lowest)?;
            pairs.push((key, value));

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        let end = self
            .consume(&TokenKind::RightBrace, "Expected '}' after hash literal")?
            .span;
        Ok(Expr::Hash {
            pairs,
            span: start.to(end),
        })
    }

    /// Comma separated expressions up to and including `end`
    fn expression_list(&mut self, end: &TokenKind, closer: &str) -> KettleResult<Vec<Expr>> {
        let mut items = Vec::new();

        if self.match_token(end) {
            return Ok(items);
        }

        loop {
            items.push(self.expression(Precedence::Lowest)?);
            if !self.match_token(&TokenKind::Comma) || self.check(end) {
                break;
            }
        }

        self.consume(end, &format!("Expected '{}' after list", closer))?;
        Ok(items)
    }

    // ==================== Helpers ====================

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        if self.is_at_end() {
            return false;
        }
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    /// Check token at offset n ahead (0 = current, 1 = next, etc)
    fn check_ahead(&self, n: usize, kind: &TokenKind) -> bool {
        match self.tokens.get(self.current + n) {
            Some(token) => std::mem::discriminant(&token.kind) == std::mem::discriminant(kind),
            None => false,
        }
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> KettleResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> KettleResult<&Token> {
        if matches!(self.peek().kind, TokenKind::Identifier(_)) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> KettleError {
        self.error_at(self.peek(), message)
    }

    fn error_at(&self, token: &Token, message: &str) -> KettleError {
        KettleError::syntax_error(message, token.span, &self.file).with_source(&self.source)
    }
}
