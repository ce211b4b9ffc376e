// Kettle Token Definitions

use crate::error::Span;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Integer(i64),
    Float(f64),
    String(String),
    Identifier(String),

    // Keywords
    Fn,
    Let,
    Var,
    If,
    Else,
    Return,
    True,
    False,
    Null,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Equal,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    Semicolon,

    Eof,
}

const KEYWORDS: [(&str, TokenKind); 9] = [
    ("fn", TokenKind::Fn),
    ("let", TokenKind::Let),
    ("var", TokenKind::Var),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("return", TokenKind::Return),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("null", TokenKind::Null),
];

impl TokenKind {
    /// Keyword token for `word`, or an identifier
    pub fn keyword_or_identifier(word: &str) -> TokenKind {
        KEYWORDS
            .iter()
            .find(|(text, _)| *text == word)
            .map(|(_, kind)| kind.clone())
            .unwrap_or_else(|| TokenKind::Identifier(word.to_string()))
    }

    /// Source text of tokens that carry no payload
    pub fn fixed_text(&self) -> Option<&'static str> {
        if let Some((text, _)) = KEYWORDS.iter().find(|(_, kind)| kind == self) {
            return Some(text);
        }

        let text = match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Bang => "!",
            Self::Equal => "=",
            Self::EqualEqual => "==",
            Self::BangEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::LeftParen => "(",
            Self::RightParen => ")",
            Self::LeftBrace => "{",
            Self::RightBrace => "}",
            Self::LeftBracket => "[",
            Self::RightBracket => "]",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::Semicolon => ";",
            Self::Eof => "end of input",
            _ => return None,
        };
        Some(text)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(text) = self.fixed_text() {
            return f.write_str(text);
        }
        match self {
            Self::Integer(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{:?}", n),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Identifier(name) => f.write_str(name),
            _ => Ok(()),
        }
    }
}

/// A scanned token and where it came from
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(TokenKind::keyword_or_identifier("var"), TokenKind::Var);
        assert_eq!(TokenKind::keyword_or_identifier("null"), TokenKind::Null);
        assert_eq!(
            TokenKind::keyword_or_identifier("kettle"),
            TokenKind::Identifier("kettle".to_string())
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(TokenKind::Fn.to_string(), "fn");
        assert_eq!(TokenKind::GreaterEqual.to_string(), ">=");
        assert_eq!(TokenKind::Eof.to_string(), "end of input");
        assert_eq!(TokenKind::Float(2.0).to_string(), "2.0");
        assert_eq!(TokenKind::String("a".to_string()).to_string(), "\"a\"");
    }
}
