//! On-demand scanner
//!
//! Tokens are produced one at a time by [`Scanner::advance`]. The whole
//! scanner is a source reference plus a small [`ScannerState`], so lookahead
//! is done by advancing a copy and throwing it away.

use super::token::{LexError, Literal, Token, TokenKind};
use crate::{PrimitiveType, Span};

/// Longest identifier the scanner accepts
pub const MAX_IDENT_LEN: usize = 256;

/// Most digits accepted in a single numeric literal
pub const MAX_NUMBER_DIGITS: usize = 64;

const KEYWORDS: [(&str, TokenKind); 26] = [
    ("use", TokenKind::Use),
    ("as", TokenKind::As),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("return", TokenKind::Return),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("cast", TokenKind::Cast),
    ("extern", TokenKind::Extern),
    ("struct", TokenKind::Struct),
    ("union", TokenKind::Union),
    ("enum", TokenKind::Enum),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("u8", TokenKind::Primitive(PrimitiveType::U8)),
    ("u16", TokenKind::Primitive(PrimitiveType::U16)),
    ("u32", TokenKind::Primitive(PrimitiveType::U32)),
    ("u64", TokenKind::Primitive(PrimitiveType::U64)),
    ("i8", TokenKind::Primitive(PrimitiveType::I8)),
    ("i16", TokenKind::Primitive(PrimitiveType::I16)),
    ("i32", TokenKind::Primitive(PrimitiveType::I32)),
    ("i64", TokenKind::Primitive(PrimitiveType::I64)),
    ("f32", TokenKind::Primitive(PrimitiveType::F32)),
    ("f64", TokenKind::Primitive(PrimitiveType::F64)),
    ("bool", TokenKind::Primitive(PrimitiveType::Bool)),
];

/// Cursor position inside the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerState {
    pub pos: usize,
    pub line: u32,
    pub col: u32,
}

impl Default for ScannerState {
    fn default() -> Self {
        Self {
            pos: 0,
            line: 1,
            col: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scanner<'src> {
    source: &'src str,
    state: ScannerState,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            state: ScannerState::default(),
        }
    }

    pub fn source(&self) -> &'src str {
        self.source
    }

    pub fn snapshot(&self) -> ScannerState {
        self.state
    }

    pub fn restore(&mut self, state: ScannerState) {
        self.state = state;
    }

    /// The next token, leaving the cursor where it is
    pub fn peek(&self) -> Token<'src> {
        let mut probe = *self;
        probe.advance()
    }

    /// The token after the next one, leaving the cursor where it is
    pub fn peek_second(&self) -> Token<'src> {
        let mut probe = *self;
        probe.advance();
        probe.advance()
    }

    /// Consume and return the next token
    pub fn advance(&mut self) -> Token<'src> {
        self.skip_trivia();
        let start = self.state;

        let Some(c) = self.current() else {
            return self.make(start, TokenKind::Eof, Literal::None);
        };

        match c {
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.identifier(start),
            b'0'..=b'9' => self.number(start),
            b'"' => self.string(start),
            _ => self.operator(start),
        }
    }

    fn current(&self) -> Option<u8> {
        self.byte_at(0)
    }

    fn byte_at(&self, offset: usize) -> Option<u8> {
        self.source.as_bytes().get(self.state.pos + offset).copied()
    }

    fn bump(&mut self) {
        if let Some(c) = self.current() {
            self.state.pos += 1;
            if c == b'\n' {
                self.state.line += 1;
                self.state.col = 1;
            } else {
                self.state.col += 1;
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.current(), self.byte_at(1)) {
                (Some(c), _) if c.is_ascii_whitespace() => self.bump(),
                (Some(b'/'), Some(b'/')) => {
                    while matches!(self.current(), Some(c) if c != b'\n') {
                        self.bump();
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    self.bump();
                    self.bump();
                    loop {
                        match (self.current(), self.byte_at(1)) {
                            (None, _) => break,
                            (Some(b'*'), Some(b'/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            _ => self.bump(),
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn make(&self, start: ScannerState, kind: TokenKind, literal: Literal<'src>) -> Token<'src> {
        let span = Span {
            start: start.pos,
            end: self.state.pos,
            start_line: start.line,
            start_col: start.col,
            end_line: self.state.line,
            end_col: self.state.col,
        };
        Token {
            kind,
            span,
            text: &self.source[start.pos..self.state.pos],
            literal,
        }
    }

    fn error(&self, start: ScannerState, error: LexError) -> Token<'src> {
        self.make(start, TokenKind::Error(error), Literal::None)
    }

    fn identifier(&mut self, start: ScannerState) -> Token<'src> {
        while matches!(self.current(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.bump();
        }

        let text = &self.source[start.pos..self.state.pos];
        if text.len() > MAX_IDENT_LEN {
            return self.error(start, LexError::OversizedToken);
        }

        match match_keyword(text) {
            Some(TokenKind::True) => self.make(start, TokenKind::True, Literal::Unsigned(1)),
            Some(TokenKind::False) => self.make(start, TokenKind::False, Literal::Unsigned(0)),
            Some(kind) => self.make(start, kind, Literal::None),
            None => self.make(start, TokenKind::Ident, Literal::Text(text)),
        }
    }

    fn number(&mut self, start: ScannerState) -> Token<'src> {
        let base = match (self.current(), self.byte_at(1)) {
            (Some(b'0'), Some(b'x' | b'X')) => 16,
            (Some(b'0'), Some(b'b' | b'B')) => 2,
            _ => 10,
        };
        if base != 10 {
            self.bump();
            self.bump();
        }

        let digits = self.digits(base);
        if digits.is_empty() {
            return self.error(start, LexError::MissingDigits);
        }
        if digits.len() > MAX_NUMBER_DIGITS {
            return self.error(start, LexError::OversizedToken);
        }
        let Some(integer) = power_sum(&digits, base) else {
            return self.error(start, LexError::OversizedToken);
        };

        let has_fraction = base == 10
            && self.current() == Some(b'.')
            && self.byte_at(1).is_some_and(|c| digit_value(c, base).is_some());
        if !has_fraction {
            return self.make(start, TokenKind::Integer, Literal::Unsigned(integer));
        }

        self.bump();
        let fraction = self.digits(base);
        if fraction.len() > MAX_NUMBER_DIGITS {
            return self.error(start, LexError::OversizedToken);
        }
        let numerator = fraction
            .iter()
            .fold(0.0f64, |acc, &d| acc * base as f64 + d as f64);
        let value = integer as f64 + numerator / (base as f64).powi(fraction.len() as i32);

        self.make(start, TokenKind::Float, Literal::Float(value))
    }

    fn digits(&mut self, base: u64) -> Vec<u64> {
        let mut digits = Vec::new();
        while let Some(d) = self.current().and_then(|c| digit_value(c, base)) {
            digits.push(d);
            self.bump();
        }
        digits
    }

    fn string(&mut self, start: ScannerState) -> Token<'src> {
        self.bump();
        loop {
            match self.current() {
                None => return self.error(start, LexError::UnterminatedString),
                Some(b'"') => break,
                // escapes are kept verbatim, only the quote is skipped over
                Some(b'\\') => {
                    self.bump();
                    self.bump();
                }
                Some(_) => self.bump(),
            }
        }
        let contents = &self.source[start.pos + 1..self.state.pos];
        self.bump();
        self.make(start, TokenKind::Str, Literal::Text(contents))
    }

    fn operator(&mut self, start: ScannerState) -> Token<'src> {
        let Some(c) = self.current() else {
            return self.make(start, TokenKind::Eof, Literal::None);
        };

        if !c.is_ascii() {
            let ch = self.source[start.pos..].chars().next().unwrap_or('\u{FFFD}');
            for _ in 0..ch.len_utf8() {
                self.bump();
            }
            return self.error(start, LexError::UnexpectedChar(ch));
        }

        self.bump();
        let kind = match c {
            b'(' => TokenKind::ParenOpen,
            b')' => TokenKind::ParenClose,
            b'[' => TokenKind::BracketOpen,
            b']' => TokenKind::BracketClose,
            b'{' => TokenKind::CurlyOpen,
            b'}' => TokenKind::CurlyClose,
            b',' => TokenKind::Comma,
            b':' => TokenKind::Colon,
            b';' => TokenKind::Semicolon,
            b'.' => TokenKind::Dot,
            b'+' => TokenKind::Plus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'~' => TokenKind::Tilde,
            b'@' => TokenKind::At,
            b'^' => TokenKind::Caret,
            b'-' => self.followed_by(b'>', TokenKind::Arrow, TokenKind::Minus),
            b'=' => self.followed_by(b'=', TokenKind::Equals, TokenKind::Assign),
            b'!' => self.followed_by(b'=', TokenKind::NotEquals, TokenKind::Bang),
            b'&' => self.followed_by(b'&', TokenKind::AndAnd, TokenKind::Ampersand),
            b'|' => self.followed_by(b'|', TokenKind::OrOr, TokenKind::Pipe),
            b'<' => match self.current() {
                Some(b'=') => self.followed_by(b'=', TokenKind::LessEq, TokenKind::Less),
                _ => self.followed_by(b'<', TokenKind::ShiftLeft, TokenKind::Less),
            },
            b'>' => match self.current() {
                Some(b'=') => self.followed_by(b'=', TokenKind::GreaterEq, TokenKind::Greater),
                _ => self.followed_by(b'>', TokenKind::ShiftRight, TokenKind::Greater),
            },
            other => TokenKind::Error(LexError::UnexpectedChar(other as char)),
        };

        self.make(start, kind, Literal::None)
    }

    /// One byte of lookahead for two-character operators
    fn followed_by(&mut self, second: u8, long: TokenKind, short: TokenKind) -> TokenKind {
        if self.current() == Some(second) {
            self.bump();
            long
        } else {
            short
        }
    }
}

/// Column-wise keyword elimination
///
/// All keywords start out as candidates. At every column the candidates whose
/// byte differs from the word are dropped; the word is a keyword when a
/// candidate of exactly its length survives the last column.
fn match_keyword(word: &str) -> Option<TokenKind> {
    let word = word.as_bytes();
    let mut candidates: u64 = (1 << KEYWORDS.len()) - 1;

    for (column, byte) in word.iter().enumerate() {
        let mut remaining = candidates;
        while remaining != 0 {
            let i = remaining.trailing_zeros() as usize;
            remaining &= remaining - 1;
            if KEYWORDS[i].0.as_bytes().get(column) != Some(byte) {
                candidates &= !(1 << i);
            }
        }
        if candidates == 0 {
            return None;
        }
    }

    let mut remaining = candidates;
    while remaining != 0 {
        let i = remaining.trailing_zeros() as usize;
        remaining &= remaining - 1;
        if KEYWORDS[i].0.len() == word.len() {
            return Some(KEYWORDS[i].1);
        }
    }
    None
}

fn digit_value(c: u8, base: u64) -> Option<u64> {
    let value = match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => return None,
    } as u64;
    (value < base).then_some(value)
}

/// Sum of `digit * base^position`, `None` on overflow
fn power_sum(digits: &[u64], base: u64) -> Option<u64> {
    digits
        .iter()
        .rev()
        .enumerate()
        .try_fold(0u64, |acc, (position, &digit)| {
            if digit == 0 {
                return Some(acc);
            }
            let weight = base.checked_pow(u32::try_from(position).ok()?)?;
            acc.checked_add(digit.checked_mul(weight)?)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(src);
        let mut kinds = Vec::new();
        loop {
            let token = scanner.advance();
            if token.is_eof() {
                return kinds;
            }
            kinds.push(token.kind);
        }
    }

    #[test]
    fn keywords_are_eliminated_column_wise() {
        assert_eq!(match_keyword("while"), Some(TokenKind::While));
        assert_eq!(match_keyword("u64"), Some(TokenKind::Primitive(PrimitiveType::U64)));
        assert_eq!(match_keyword("u6"), None);
        assert_eq!(match_keyword("whiles"), None);
        assert_eq!(match_keyword("us"), None);
        assert_eq!(match_keyword("as"), Some(TokenKind::As));
        assert_eq!(match_keyword(""), None);
    }

    #[test]
    fn identifiers_and_keywords() {
        assert_eq!(
            kinds("while while_ whil _x u8"),
            vec![
                TokenKind::While,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Primitive(PrimitiveType::U8),
            ]
        );
    }

    #[test]
    fn numbers_in_every_base() {
        let mut scanner = Scanner::new("0x1F 0b101 42 3.25 7.x");
        assert_eq!(scanner.advance().literal, Literal::Unsigned(31));
        assert_eq!(scanner.advance().literal, Literal::Unsigned(5));
        assert_eq!(scanner.advance().literal, Literal::Unsigned(42));
        assert_eq!(scanner.advance().literal, Literal::Float(3.25));

        let seven = scanner.advance();
        assert_eq!(seven.kind, TokenKind::Integer);
        assert_eq!(seven.literal, Literal::Unsigned(7));
        assert_eq!(scanner.advance().kind, TokenKind::Dot);
        assert_eq!(scanner.advance().kind, TokenKind::Ident);
    }

    #[test]
    fn number_overflow_is_an_error_token() {
        let mut scanner = Scanner::new("18446744073709551616 18446744073709551615");
        assert_eq!(
            scanner.advance().kind,
            TokenKind::Error(LexError::OversizedToken)
        );
        assert_eq!(scanner.advance().literal, Literal::Unsigned(u64::MAX));
    }

    #[test]
    fn prefix_without_digits() {
        assert_eq!(kinds("0x"), vec![TokenKind::Error(LexError::MissingDigits)]);
    }

    #[test]
    fn two_character_operators() {
        assert_eq!(
            kinds("== != >= <= && || << >> -> = ! > < & | -"),
            vec![
                TokenKind::Equals,
                TokenKind::NotEquals,
                TokenKind::GreaterEq,
                TokenKind::LessEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::ShiftLeft,
                TokenKind::ShiftRight,
                TokenKind::Arrow,
                TokenKind::Assign,
                TokenKind::Bang,
                TokenKind::Greater,
                TokenKind::Less,
                TokenKind::Ampersand,
                TokenKind::Pipe,
                TokenKind::Minus,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a // line\n /* block\n comment */ b /* open"),
            vec![TokenKind::Ident, TokenKind::Ident]
        );
    }

    #[test]
    fn strings_keep_escapes_verbatim() {
        let mut scanner = Scanner::new(r#""a\"b\n" x"#);
        let token = scanner.advance();
        assert_eq!(token.kind, TokenKind::Str);
        assert_eq!(token.literal, Literal::Text(r#"a\"b\n"#));
        assert_eq!(scanner.advance().kind, TokenKind::Ident);
    }

    #[test]
    fn unterminated_string() {
        let mut scanner = Scanner::new("\"abc");
        let token = scanner.advance();
        assert_eq!(token.kind, TokenKind::Error(LexError::UnterminatedString));
        assert_eq!(token.text, "\"abc");
        assert!(scanner.advance().is_eof());
    }

    #[test]
    fn unexpected_characters_resynchronise() {
        assert_eq!(
            kinds("a $ b é c"),
            vec![
                TokenKind::Ident,
                TokenKind::Error(LexError::UnexpectedChar('$')),
                TokenKind::Ident,
                TokenKind::Error(LexError::UnexpectedChar('é')),
                TokenKind::Ident,
            ]
        );
    }

    #[test]
    fn oversized_identifier() {
        let long = "a".repeat(MAX_IDENT_LEN + 1);
        assert_eq!(kinds(&long), vec![TokenKind::Error(LexError::OversizedToken)]);
    }

    #[test]
    fn peeking_leaves_the_cursor_alone() {
        let mut scanner = Scanner::new("x : u64 = 5;");
        scanner.advance();
        let before = scanner.snapshot();

        assert_eq!(scanner.peek().kind, TokenKind::Colon);
        assert_eq!(
            scanner.peek_second().kind,
            TokenKind::Primitive(PrimitiveType::U64)
        );
        assert_eq!(scanner.snapshot(), before);
        assert_eq!(scanner.advance().kind, TokenKind::Colon);
    }

    #[test]
    fn spans_track_lines_and_columns() {
        let mut scanner = Scanner::new("a\n  bc");
        scanner.advance();
        let token = scanner.advance();
        assert_eq!(token.text, "bc");
        assert_eq!((token.span.start_line, token.span.start_col), (2, 3));
        assert_eq!((token.span.end_line, token.span.end_col), (2, 5));
        assert_eq!(token.span.range(), 4..6);
    }
}
