use std::fmt;

use thiserror::Error;

use crate::{PrimitiveType, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    ParenOpen,
    ParenClose,
    BracketOpen,
    BracketClose,
    CurlyOpen,
    CurlyClose,

    Comma,
    Colon,
    Semicolon,
    Dot,
    Arrow,

    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equals,
    NotEquals,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    AndAnd,
    OrOr,
    Bang,
    Tilde,
    At,
    Caret,
    Ampersand,
    Pipe,
    ShiftLeft,
    ShiftRight,

    Integer,
    Float,
    Str,
    Ident,

    Use,
    As,
    If,
    Else,
    While,
    Return,
    Break,
    Continue,
    Cast,
    Extern,
    Struct,
    Union,
    Enum,
    True,
    False,
    Primitive(PrimitiveType),

    Eof,
    Error(LexError),
}

/// Why the scanner produced an error token
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LexError {
    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("token is too large")]
    OversizedToken,

    #[error("number prefix without digits")]
    MissingDigits,

    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
}

/// Payload carried by literal and identifier tokens
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Literal<'src> {
    #[default]
    None,
    Unsigned(u64),
    Float(f64),
    Text(&'src str),
}

/// A single token, borrowed from the source text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub span: Span,
    /// The exact matched source slice
    pub text: &'src str,
    pub literal: Literal<'src>,
}

impl<'src> Token<'src> {
    /// Placeholder token for synthesized nodes
    pub fn synthetic(kind: TokenKind, span: Span) -> Self {
        Token {
            kind,
            span,
            text: "",
            literal: Literal::None,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    /// Identifier or string contents
    pub fn text_payload(&self) -> Option<&'src str> {
        match self.literal {
            Literal::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::ParenOpen => "(",
            TokenKind::ParenClose => ")",
            TokenKind::BracketOpen => "[",
            TokenKind::BracketClose => "]",
            TokenKind::CurlyOpen => "{",
            TokenKind::CurlyClose => "}",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::Dot => ".",
            TokenKind::Arrow => "->",
            TokenKind::Assign => "=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Equals => "==",
            TokenKind::NotEquals => "!=",
            TokenKind::Less => "<",
            TokenKind::Greater => ">",
            TokenKind::LessEq => "<=",
            TokenKind::GreaterEq => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::Tilde => "~",
            TokenKind::At => "@",
            TokenKind::Caret => "^",
            TokenKind::Ampersand => "&",
            TokenKind::Pipe => "|",
            TokenKind::ShiftLeft => "<<",
            TokenKind::ShiftRight => ">>",
            TokenKind::Integer => "integer literal",
            TokenKind::Float => "float literal",
            TokenKind::Str => "string literal",
            TokenKind::Ident => "identifier",
            TokenKind::Use => "use",
            TokenKind::As => "as",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::Return => "return",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Cast => "cast",
            TokenKind::Extern => "extern",
            TokenKind::Struct => "struct",
            TokenKind::Union => "union",
            TokenKind::Enum => "enum",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Primitive(prim) => return write!(f, "{prim}"),
            TokenKind::Eof => "end of file",
            TokenKind::Error(_) => "invalid token",
        };
        f.write_str(s)
    }
}
