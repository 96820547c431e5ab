//! Token scanner for the assembler stage.
//!
//! Tokens are whitespace-delimited words pulled on demand into a queue so
//! macro expansion can splice pre-scanned bodies back in front. `#` starts
//! a comment running to the end of the line; the preprocessor's line-origin
//! markers are ordinary comments at this stage.
use smol_str::SmolStr;

use super::tokens::{Token, TokenId, TokenValue};
use super::Program;

impl<'s> Program<'s> {
    pub(crate) fn is_end(&self) -> bool {
        self.tokens.is_empty() && self.cursor >= self.source.len()
    }

    fn next_char(&mut self) -> u8 {
        if self.cursor >= self.source.len() {
            return 0;
        }
        let c = self.source[self.cursor];
        if c == b'\n' {
            self.source_line += 1;
            self.source_pos = 0;
        } else {
            self.source_pos += 1;
        }
        self.cursor += 1;
        c
    }

    pub(crate) fn peek_char(&self) -> u8 {
        if self.cursor >= self.source.len() {
            0
        } else {
            self.source[self.cursor]
        }
    }

    pub(crate) fn skip_whitespace(&mut self) {
        loop {
            let c = self.peek_char();
            if c == b'#' {
                // line comment
                self.next_char();
                loop {
                    let cc = self.peek_char();
                    if cc == 0 || cc == b'\n' {
                        break;
                    }
                    self.next_char();
                }
            } else if c != b' ' && c != b'\t' && c != b'\r' && c != b'\n' {
                break;
            }
            self.next_char();
        }
    }

    pub(crate) fn fetch_token(&mut self) {
        if self.is_end() {
            self.is_error = true;
            self.error = "Unexpected EOF.".to_string();
            return;
        }
        if self.is_error {
            return;
        }
        let line = self.source_line;
        let pos = self.source_pos;

        if self.peek_char() == b'"' {
            self.next_char();
            let mut buffer: Vec<u8> = Vec::new();
            loop {
                let c = self.next_char();
                if c == 0 {
                    self.is_error = true;
                    self.error = "Missing a closing \" in a string literal.".to_string();
                    self.error_line = self.source_line;
                    self.error_pos = self.source_pos;
                    return;
                }
                if c == b'"' {
                    self.next_char();
                    break;
                }
                if c == b'\\' {
                    let ec = self.next_char();
                    if ec == 0 {
                        self.is_error = true;
                        self.error = "Missing a closing \" in a string literal.".to_string();
                        self.error_line = self.source_line;
                        self.error_pos = self.source_pos;
                        return;
                    }
                    match ec {
                        b't' => buffer.push(b'\t'),
                        b'n' => buffer.push(b'\n'),
                        b'r' => buffer.push(b'\r'),
                        b'v' => buffer.push(0x0B),
                        b'0' => buffer.push(0),
                        b'\\' => buffer.push(b'\\'),
                        b'"' => buffer.push(b'"'),
                        _ => {
                            self.is_error = true;
                            self.error = format!(
                                "Unrecognized escape character '{}' in a string literal.",
                                ec as char
                            );
                            self.error_line = self.source_line;
                            self.error_pos = self.source_pos.saturating_sub(1);
                            return;
                        }
                    }
                } else {
                    buffer.push(c);
                }
            }
            let text = String::from_utf8_lossy(&buffer).into_owned();
            self.tokens.push_back(Token {
                line,
                pos,
                tid: TokenId::StringLiteral,
                value: TokenValue::Text(SmolStr::new(text)),
            });
        } else {
            let start = self.cursor;
            let mut len = 0;
            loop {
                let c = self.next_char();
                if c == b' ' || c == b'\t' || c == b'\r' || c == b'\n' || c == b'#' || c == 0 {
                    break;
                }
                len += 1;
            }
            let word = String::from_utf8_lossy(&self.source[start..start + len]).into_owned();
            let bytes = word.as_bytes();
            let leading_digit = !bytes.is_empty()
                && (bytes[0].is_ascii_digit()
                    || (bytes[0] == b'-' && bytes.len() > 1 && bytes[1].is_ascii_digit()));
            if leading_digit {
                match parse_number(&word) {
                    Some(n) => self.tokens.push_back(Token {
                        line,
                        pos,
                        tid: TokenId::Unknown,
                        value: TokenValue::Number(n),
                    }),
                    None => {
                        self.is_error = true;
                        self.error = format!("Expected a valid number, but found '{}'.", word);
                        self.error_line = self.source_line;
                        self.error_pos = self.source_pos.saturating_sub(len as u32);
                        return;
                    }
                }
            } else {
                self.tokens.push_back(Token::text(line, pos, SmolStr::new(word)));
            }
        }
        self.skip_whitespace();
    }

    /// Consume the front token. Errors yield an end-of-file token.
    pub(crate) fn next(&mut self) -> Token {
        if self.tokens.is_empty() {
            self.fetch_token();
        }
        if self.is_error {
            return Token::end(self.source_line, self.source_pos);
        }
        let t = self.tokens.pop_front().expect("fetch_token pushed a token");
        self.error_line = t.line;
        self.error_pos = t.pos;
        t
    }

    pub(crate) fn peek(&mut self) -> Token {
        if self.tokens.is_empty() {
            self.fetch_token();
        }
        if self.is_error {
            return Token::end(self.source_line, self.source_pos);
        }
        self.tokens.front().expect("fetch_token pushed a token").clone()
    }

    /// Look ahead `index` tokens and test for a literal word.
    pub(crate) fn peek_match(&mut self, name: &str, index: usize) -> bool {
        while !self.is_error && !self.is_end() && self.tokens.len() < index + 1 {
            self.fetch_token();
        }
        if self.is_end() || self.is_error {
            return false;
        }
        self.tokens.get(index).map(|t| t.matches(name)).unwrap_or(false)
    }

    pub(crate) fn match_tok(&mut self, name: &str) -> bool {
        if self.peek_match(name, 0) {
            self.tokens.pop_front();
            return true;
        }
        false
    }

    pub(crate) fn eat(&mut self) {
        self.tokens.pop_front();
    }

    pub(crate) fn expect(&mut self, name: &str) {
        if self.is_error {
            return;
        }
        let t = self.next();
        if !t.matches(name) {
            self.raise(format!("Expected {}, got {}.", name, t.format_value()));
        }
    }

    pub(crate) fn check_name(&mut self, name: &str, kind: &str) -> bool {
        if self.is_error {
            return false;
        }
        if name.starts_with("OCTO_") || super::tokens::is_reserved(name) {
            self.raise(format!(
                "The name '{}' is reserved and cannot be used for a {}.",
                name, kind
            ));
            return false;
        }
        true
    }

    pub(crate) fn string(&mut self) -> SmolStr {
        if self.is_error {
            return SmolStr::default();
        }
        let t = self.next();
        match t.str_value() {
            Some(s) => s.clone(),
            None => {
                self.raise(format!("Expected a string, got {}.", t.num() as i64));
                SmolStr::default()
            }
        }
    }

    pub(crate) fn identifier(&mut self, kind: &str) -> SmolStr {
        if self.is_error {
            return SmolStr::default();
        }
        let t = self.next();
        let name = match t.str_value() {
            Some(s) => s.clone(),
            None => {
                self.raise(format!(
                    "Expected a name for a {}, got {}.",
                    kind,
                    t.num() as i64
                ));
                return SmolStr::default();
            }
        };
        if !self.check_name(&name, kind) {
            return SmolStr::default();
        }
        name
    }

    pub(crate) fn is_register(&self, name: &str) -> bool {
        if self.aliases.contains_key(name) {
            return true;
        }
        let bytes = name.as_bytes();
        bytes.len() == 2 && (bytes[0] == b'v' || bytes[0] == b'V') && bytes[1].is_ascii_hexdigit()
    }

    pub(crate) fn peek_is_register(&mut self) -> bool {
        let t = self.peek();
        match t.str_value() {
            Some(s) => self.is_register(s),
            None => false,
        }
    }

    pub(crate) fn register_or_alias(&mut self) -> u8 {
        if self.is_error {
            return 0;
        }
        let t = self.next();
        let name = match t.str_value() {
            Some(s) if self.is_register(s) => s.clone(),
            _ => {
                self.raise(format!("Expected register, got {}.", t.format_value()));
                return 0;
            }
        };
        if let Some(&v) = self.aliases.get(&name) {
            return v;
        }
        let c = name.as_bytes()[1].to_ascii_lowercase();
        if c.is_ascii_digit() {
            c - b'0'
        } else {
            10 + (c - b'a')
        }
    }
}

/// Parse a numeric literal: decimal (sign, fraction, exponent), `0x` hex
/// and `0b` binary, each with an optional leading `-`.
fn parse_number(word: &str) -> Option<f64> {
    if let Ok(n) = word.parse::<f64>() {
        return Some(n);
    }
    let radix_digits = |prefix: &str, radix: u32, negative: bool| -> Option<f64> {
        let digits = word.strip_prefix(prefix)?;
        if digits.is_empty() {
            return None;
        }
        i64::from_str_radix(digits, radix)
            .ok()
            .map(|n| if negative { -(n as f64) } else { n as f64 })
    };
    radix_digits("0b", 2, false)
        .or_else(|| radix_digits("0x", 16, false))
        .or_else(|| radix_digits("-0b", 2, true))
        .or_else(|| radix_digits("-0x", 16, true))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number("-7"), Some(-7.0));
        assert_eq!(parse_number("1.5"), Some(1.5));
        assert_eq!(parse_number("0x1F"), Some(31.0));
        assert_eq!(parse_number("-0x10"), Some(-16.0));
        assert_eq!(parse_number("0b1010"), Some(10.0));
        assert_eq!(parse_number("-0b11"), Some(-3.0));
        assert_eq!(parse_number("0xZZ"), None);
        assert_eq!(parse_number("12abc"), None);
    }

    #[test]
    fn test_scan_words_and_strings() {
        let mut p = Program::new("va := 0xBC # comment\n\"a\\nb\"", 0x200);
        let t = p.next();
        assert_eq!(t.str_value().map(|s| s.as_str()), Some("va"));
        let t = p.next();
        assert_eq!(t.tid, TokenId::Assign);
        let t = p.next();
        assert_eq!(t.num(), 0xBC as f64);
        let t = p.next();
        assert_eq!(t.tid, TokenId::StringLiteral);
        assert_eq!(t.str_value().map(|s| s.as_str()), Some("a\nb"));
        assert!(p.is_end());
    }

    #[test]
    fn test_bad_escape() {
        let mut p = Program::new("\"oops\\q\"", 0x200);
        p.next();
        assert!(p.is_error());
        assert!(p.error_message().contains("escape"));
    }
}
