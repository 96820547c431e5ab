//! Prefix-preserving lexer for the preprocessor.
//!
//! Every token records the whitespace and `#` comments that preceded it,
//! so the preprocessor can emit its output with the original layout
//! intact. The lexer is stateless with respect to semantics; it does not
//! know what a register or a label is.
use std::fmt;

use crate::tokens::{is_directive, is_preprocessor, is_reserved, Token, TokenKind};

/// Characters that open an operator token.
const OPERATOR_CHARS: &[u8] = b"+-*/%@|<>^!.=:";

/// Number notation accepted by the lexer.
///
/// `Motorola` additionally accepts `$1F`, `Rca` accepts `#1F`; both appear
/// in sources converted from historic CHIP-8 tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Chip8,
    Chip8Strict,
    Motorola,
    Rca,
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
}

impl LexError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for LexError {}

pub struct Lexer<'s> {
    filename: String,
    source: &'s str,
    cursor: usize,
    token: Token<'s>,
    mode: Mode,
    tab_size: u32,
}

impl<'s> Lexer<'s> {
    pub fn new(filename: impl Into<String>, source: &'s str) -> Self {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        let mut token = Token::default();
        token.line = 1;
        token.column = 1;
        Self {
            filename: filename.into(),
            source,
            cursor: 0,
            token,
            mode: Mode::default(),
            tab_size: 1,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn token(&self) -> &Token<'s> {
        &self.token
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Cheap match against the current token's raw text.
    pub fn expect(&self, literal: &str) -> bool {
        self.token.raw == literal
    }

    fn peek(&self) -> u8 {
        self.source.as_bytes().get(self.cursor).copied().unwrap_or(0)
    }

    fn get(&mut self) -> u8 {
        let c = self.peek();
        if c != 0 {
            self.cursor += 1;
        }
        c
    }

    /// Absorb whitespace and comments into the token prefix.
    ///
    /// When `preproc` is set, the prefix is trimmed to start after the
    /// first newline so that a preprocessor directive's own line does not
    /// travel with the next token.
    fn skip_whitespace(&mut self, mut preproc: bool) {
        let mut start = self.cursor;
        self.token.prefix_line = self.token.line;
        loop {
            let p = self.peek();
            if !(p.is_ascii_whitespace() || p == b'#') {
                break;
            }
            let mut c = self.get();
            self.token.column += if c == b'\t' { self.tab_size } else { 1 };
            if c == b'#' {
                while c != 0 && c != b'\n' {
                    c = self.get();
                }
            }
            if c == b'\n' {
                self.token.line += 1;
                self.token.column = 1;
                if preproc {
                    start = self.cursor;
                    self.token.prefix_line = self.token.line;
                    preproc = false;
                }
            }
        }
        self.token.prefix = &self.source[start..self.cursor];
    }

    /// Consume and classify one token.
    pub fn next_token(&mut self, preproc: bool) -> Result<TokenKind, LexError> {
        self.token.column += self.token.raw.len() as u32;
        self.skip_whitespace(preproc);

        if self.peek() == b'"' {
            return self.parse_string();
        }

        let start = self.cursor;
        while self.peek() != 0 && !self.peek().is_ascii_whitespace() {
            self.get();
        }
        let raw = &self.source[start..self.cursor];
        if self.peek() == 0 && raw.is_empty() {
            self.token.raw = &self.source[self.source.len()..];
            self.token.kind = TokenKind::Eof;
            return Ok(self.token.kind);
        }
        self.token.raw = raw;
        self.token.text = raw.to_string();

        // Longest-prefix float parse, then the radix notations.
        let (number, mut consumed) = parse_f64_prefix(raw);
        self.token.number = number;
        let bytes = raw.as_bytes();
        if consumed > 0 && consumed < raw.len() {
            if bytes[0] == b'0' && raw.len() > 2 && bytes[1] == b'x' {
                if let Ok(n) = i64::from_str_radix(&raw[2..], 16) {
                    self.token.number = n as f64;
                    consumed = raw.len();
                }
            } else if bytes[0] == b'0' && raw.len() > 2 && bytes[1] == b'b' {
                if let Ok(n) = i64::from_str_radix(&raw[2..], 2) {
                    self.token.number = n as f64;
                    consumed = raw.len();
                }
            } else if bytes[0] == b'-' && raw.len() > 3 && bytes[1] == b'0' && bytes[2] == b'x' {
                if let Ok(n) = i64::from_str_radix(&raw[3..], 16) {
                    self.token.number = -(n as f64);
                    consumed = raw.len();
                }
            } else if bytes[0] == b'-' && raw.len() > 3 && bytes[1] == b'0' && bytes[2] == b'b' {
                if let Ok(n) = i64::from_str_radix(&raw[3..], 2) {
                    self.token.number = -(n as f64);
                    consumed = raw.len();
                }
            } else if (self.token.number == 8.0 || self.token.number == 16.0)
                && bytes[consumed] == b'x'
            {
                self.token.kind = TokenKind::SpriteSize;
                return Ok(self.token.kind);
            }
        } else if consumed == 0 {
            if self.mode == Mode::Rca && bytes[0] == b'#' {
                if let Ok(n) = i64::from_str_radix(&raw[1..], 16) {
                    self.token.number = n as f64;
                    consumed = raw.len();
                }
            } else if self.mode == Mode::Motorola && bytes[0] == b'$' {
                if let Ok(n) = i64::from_str_radix(&raw[1..], 16) {
                    self.token.number = n as f64;
                    consumed = raw.len();
                }
            }
        }
        if consumed == raw.len() && !raw.is_empty() {
            self.token.kind = TokenKind::Number;
            return Ok(self.token.kind);
        }
        if bytes[0].is_ascii_digit() {
            return Err(LexError::new(format!(
                "The number could not be parsed: {}",
                raw
            )));
        }

        if bytes[0] == b':' {
            if is_directive(raw) {
                self.token.kind = TokenKind::Directive;
                return Ok(self.token.kind);
            }
            if is_preprocessor(raw) {
                // The directive owns its line; trailing blanks belong to it.
                let trimmed = self.token.prefix.trim_end_matches([' ', '\t']);
                self.token.prefix = trimmed;
                self.token.kind = TokenKind::Preprocessor;
                return Ok(self.token.kind);
            }
            if raw.len() > 1 && bytes[1] != b'=' {
                return Err(LexError::new(format!("Unknown directive: {}", raw)));
            }
        }
        if bytes[0] == b'{' {
            self.token.kind = TokenKind::LCurly;
            return Ok(self.token.kind);
        }
        if bytes[0] == b'}' {
            self.token.kind = TokenKind::RCurly;
            return Ok(self.token.kind);
        }
        if OPERATOR_CHARS.contains(&bytes[0]) {
            self.token.kind = TokenKind::Operator;
            return Ok(self.token.kind);
        }
        if is_reserved(raw) {
            self.token.kind = if raw.len() > 1 && bytes[1].is_ascii_alphabetic() {
                TokenKind::Keyword
            } else {
                TokenKind::Operator
            };
            return Ok(self.token.kind);
        }
        for &b in bytes {
            if !(b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
                if self.mode == Mode::Chip8 {
                    self.token.kind = TokenKind::String;
                    return Ok(self.token.kind);
                }
                return Err(LexError::new(format!("Invalid token: {}", raw)));
            }
        }
        self.token.kind = TokenKind::Identifier;
        Ok(self.token.kind)
    }

    /// Double-quoted string with C-style escapes. Bad escapes and
    /// unterminated strings fail with a precise column.
    fn parse_string(&mut self) -> Result<TokenKind, LexError> {
        let start = self.cursor;
        let quote = self.get();
        debug_assert_eq!(quote, b'"');
        let mut result: Vec<u8> = Vec::new();
        loop {
            let c = self.peek();
            if c == 0 {
                self.token.column += (self.cursor - start) as u32;
                return Err(LexError::new("Missing a closing \" in a string literal."));
            }
            if c == quote {
                break;
            }
            if c == b'\\' {
                self.get();
                let e = self.peek();
                match e {
                    0 => {
                        self.token.column += (self.cursor - start) as u32;
                        return Err(LexError::new("Unexpected end after escaping backslash."));
                    }
                    b'\n' | b'\r' => {
                        self.token.column += (self.cursor - start) as u32;
                        return Err(LexError::new(
                            "Unexpected end of line after escaping backslash.",
                        ));
                    }
                    b'n' => result.push(b'\n'),
                    b'r' => result.push(b'\r'),
                    b't' => result.push(b'\t'),
                    b'v' => result.push(0x0B),
                    b'0' => result.push(0),
                    b'\\' => result.push(b'\\'),
                    b'"' => result.push(b'"'),
                    _ => {
                        self.token.column += (self.cursor - start) as u32;
                        return Err(LexError::new(format!(
                            "Unrecognized escape character '{}' in a string literal.",
                            e as char
                        )));
                    }
                }
                self.get();
            } else if c == b'\n' || c == b'\r' {
                self.token.column += (self.cursor - start) as u32;
                return Err(LexError::new("Missing a closing \" in a string literal."));
            } else {
                result.push(c);
                self.get();
            }
        }
        self.get(); // closing quote
        self.token.text = String::from_utf8_lossy(&result).into_owned();
        self.token.raw = &self.source[start..self.cursor];
        self.token.kind = TokenKind::String;
        Ok(self.token.kind)
    }

    /// Skip to and including the next newline. Used after preprocessor
    /// directives so their line does not leak into the output.
    pub fn consume_rest_of_line(&mut self) {
        while matches!(self.peek(), b' ' | b'\t') {
            self.get();
        }
        if self.peek() == b'#' {
            while self.peek() != 0 && self.peek() != b'\n' {
                self.get();
            }
        }
        if self.peek() == b'\n' {
            self.get();
            self.token.line += 1;
        }
    }
}

/// Parse the longest prefix of `word` that is a valid float, returning the
/// value and the byte length consumed.
fn parse_f64_prefix(word: &str) -> (f64, usize) {
    for end in (1..=word.len()).rev() {
        if !word.is_char_boundary(end) {
            continue;
        }
        if let Ok(n) = word[..end].parse::<f64>() {
            return (n, end);
        }
    }
    (0.0, 0)
}

#[cfg(test)]
mod test {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new("test.8o", source);
        let mut out = Vec::new();
        loop {
            let kind = lexer.next_token(false).unwrap();
            if kind == TokenKind::Eof {
                break;
            }
            out.push(kind);
        }
        out
    }

    #[test]
    fn test_basic_kinds() {
        use TokenKind as TK;
        assert_eq!(
            kinds(": main va := 0xBC loop again"),
            &[
                TK::Directive,
                TK::Identifier,
                TK::Identifier,
                TK::Operator,
                TK::Number,
                TK::Keyword,
                TK::Keyword
            ]
        );
    }

    #[test]
    fn test_radix_and_sprite_size() {
        let mut lexer = Lexer::new("t", "0b1010 -0x10 16x16 8x3");
        assert_eq!(lexer.next_token(false).unwrap(), TokenKind::Number);
        assert_eq!(lexer.token().number, 10.0);
        assert_eq!(lexer.next_token(false).unwrap(), TokenKind::Number);
        assert_eq!(lexer.token().number, -16.0);
        assert_eq!(lexer.next_token(false).unwrap(), TokenKind::SpriteSize);
        assert_eq!(lexer.token().sprite_size(), Some((16, 16)));
        assert_eq!(lexer.next_token(false).unwrap(), TokenKind::SpriteSize);
        assert_eq!(lexer.token().sprite_size(), Some((8, 3)));
    }

    #[test]
    fn test_mode_hex() {
        let mut lexer = Lexer::new("t", "#1F");
        lexer.set_mode(Mode::Rca);
        assert_eq!(lexer.next_token(false).unwrap(), TokenKind::Number);
        assert_eq!(lexer.token().number, 31.0);

        let mut lexer = Lexer::new("t", "$1F");
        lexer.set_mode(Mode::Motorola);
        assert_eq!(lexer.next_token(false).unwrap(), TokenKind::Number);
        assert_eq!(lexer.token().number, 31.0);
    }

    #[test]
    fn test_prefix_preserved() {
        let mut lexer = Lexer::new("t", "va  # set it\n  vb");
        lexer.next_token(false).unwrap();
        assert_eq!(lexer.token().raw, "va");
        lexer.next_token(false).unwrap();
        assert_eq!(lexer.token().raw, "vb");
        assert_eq!(lexer.token().prefix, "  # set it\n  ");
        assert_eq!(lexer.token().line, 2);
    }

    #[test]
    fn test_string_escapes() {
        let mut lexer = Lexer::new("t", r#""a\tb\"c""#);
        assert_eq!(lexer.next_token(false).unwrap(), TokenKind::String);
        assert_eq!(lexer.token().text, "a\tb\"c");

        let mut lexer = Lexer::new("t", r#""bad\q""#);
        assert!(lexer.next_token(false).is_err());

        let mut lexer = Lexer::new("t", "\"unterminated");
        assert!(lexer.next_token(false).is_err());
    }

    #[test]
    fn test_unknown_directive() {
        let mut lexer = Lexer::new("t", ":nonsense");
        assert!(lexer.next_token(false).is_err());
    }

    #[test]
    fn test_preproc_prefix_trim() {
        // The newline before a preprocessor token stays in the prefix, but
        // trailing indentation on the directive's own line is dropped.
        let mut lexer = Lexer::new("t", "va\n   :include \"f\"");
        lexer.next_token(false).unwrap();
        assert_eq!(lexer.next_token(false).unwrap(), TokenKind::Preprocessor);
        assert_eq!(lexer.token().prefix, "\n");
    }
}
