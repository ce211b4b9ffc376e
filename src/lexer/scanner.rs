// Kettle Scanner (Lexer)
// Converts source code into tokens

use crate::error::{KettleError, KettleResult, Position, Span};
use crate::lexer::token::{Token, TokenKind};

/// Scanner that tokenizes Kettle source code
pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
    file: String,
}

impl Scanner {
    pub fn new(source: &str, file: impl Into<String>) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
            file: file.into(),
        }
    }

    /// Scan all tokens from the source
    pub fn scan_tokens(mut self) -> KettleResult<Vec<Token>> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_column = self.column;
            self.scan_token()?;
        }

        self.tokens.push(Token::new(
            TokenKind::Eof,
            "",
            Span::single(self.line, self.column, self.current),
        ));

        Ok(self.tokens)
    }

    fn scan_token(&mut self) -> KettleResult<()> {
        let c = self.advance();

        match c {
            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            '[' => self.add_token(TokenKind::LeftBracket),
            ']' => self.add_token(TokenKind::RightBracket),
            ',' => self.add_token(TokenKind::Comma),
            ';' => self.add_token(TokenKind::Semicolon),
            ':' => self.add_token(TokenKind::Colon),
            '+' => self.add_token(TokenKind::Plus),
            '-' => self.add_token(TokenKind::Minus),
            '*' => self.add_token(TokenKind::Star),
            '%' => self.add_token(TokenKind::Percent),
            '/' => {
                if self.match_char('/') {
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else {
                    self.add_token(TokenKind::Slash);
                }
            }
            '=' => {
                let kind = if self.match_char('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.add_token(kind);
            }
            '!' => {
                let kind = if self.match_char('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.add_token(kind);
            }
            '<' => {
                let kind = if self.match_char('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.add_token(kind);
            }
            '>' => {
                let kind = if self.match_char('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.add_token(kind);
            }

            '\n' => {
                self.line += 1;
                self.column = 1;
            }
            ' ' | '\r' | '\t' => {}

            '"' => self.string()?,

            c if c.is_ascii_digit() => self.number()?,
            c if c.is_alphabetic() || c == '_' => self.identifier(),

            _ => {
                return Err(self
                    .error(&format!("Unexpected character '{}'", c))
                    .with_help("Remove or replace this character"));
            }
        }

        Ok(())
    }

    fn string(&mut self) -> KettleResult<()> {
        let mut value = String::new();

        loop {
            if self.is_at_end() {
                return Err(self
                    .error("Unterminated string")
                    .with_help("Add '\"' to close the string"));
            }

            let c = self.advance();
            match c {
                '"' => break,
                '\n' => {
                    self.line += 1;
                    self.column = 1;
                    value.push('\n');
                }
                '\\' => {
                    if self.is_at_end() {
                        return Err(self.error("Unterminated string"));
                    }
                    let escaped = match self.advance() {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '"' => '"',
                        '\\' => '\\',
                        other => {
                            return Err(self.error(&format!("Unknown escape sequence '\\{}'", other)));
                        }
                    };
                    value.push(escaped);
                }
                c => value.push(c),
            }
        }

        self.add_token(TokenKind::String(value));
        Ok(())
    }

    fn number(&mut self) -> KettleResult<()> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        let mut is_float = false;
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.advance();

            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let kind = if is_float {
            lexeme
                .parse()
                .map(TokenKind::Float)
                .map_err(|_| self.error(&format!("Invalid number '{}'", lexeme)))?
        } else {
            lexeme
                .parse()
                .map(TokenKind::Integer)
                .map_err(|_| self.error(&format!("Integer literal '{}' is out of range", lexeme)))?
        };

        self.add_token(kind);
        Ok(())
    }

    fn identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        let kind = TokenKind::keyword_or_identifier(&text);
        self.add_token(kind);
    }

    // Helper methods
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    fn peek(&self) -> char {
        self.source.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.source.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() != expected || self.is_at_end() {
            false
        } else {
            self.current += 1;
            self.column += 1;
            true
        }
    }

    fn current_span(&self) -> Span {
        Span::new(
            Position::new(self.start_line, self.start_column, self.start),
            Position::new(self.line, self.column, self.current),
        )
    }

    fn add_token(&mut self, kind: TokenKind) {
        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let span = self.current_span();
        self.tokens.push(Token::new(kind, lexeme, span));
    }

    fn error(&self, message: &str) -> KettleError {
        KettleError::syntax_error(message, self.current_span(), &self.file)
    }
}
