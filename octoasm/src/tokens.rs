//! Preprocessor-level tokens.
//!
//! Unlike the assembler's scanner, these tokens keep the raw source slice
//! and the whitespace/comment run that preceded them, so the preprocessor
//! can reproduce the layout of its input exactly.

/// Classification of a preprocessor token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenKind {
    #[default]
    None,
    Number,
    String,
    Directive,
    Identifier,
    Operator,
    Keyword,
    Preprocessor,
    /// A `8xN` / `16xN` sprite dimension hint.
    SpriteSize,
    LCurly,
    RCurly,
    Eof,
}

#[derive(Debug, Clone, Default)]
pub struct Token<'s> {
    pub kind: TokenKind,
    pub number: f64,
    /// Unescaped string contents, or the token text.
    pub text: String,
    /// The token exactly as written.
    pub raw: &'s str,
    /// Whitespace and comments between the previous token and this one.
    pub prefix: &'s str,
    /// Line the prefix starts on.
    pub prefix_line: u32,
    pub line: u32,
    pub column: u32,
}

impl<'s> Token<'s> {
    /// Width and height of a sprite-size token (`8x4`, `16x16`).
    pub fn sprite_size(&self) -> Option<(u32, u32)> {
        let (w, h) = self.text.split_once('x')?;
        Some((w.parse().ok()?, h.parse().ok()?))
    }
}

/// Directives handled by the preprocessor itself.
pub fn is_preprocessor(name: &str) -> bool {
    matches!(
        name,
        ":include" | ":segment" | ":if" | ":else" | ":end" | ":unless" | ":dump-options"
            | ":config" | ":asm"
    )
}

/// Directives passed through to the assembler.
pub fn is_directive(name: &str) -> bool {
    matches!(
        name,
        ":" | ":alias"
            | ":assert"
            | ":breakpoint"
            | ":byte"
            | ":calc"
            | ":call"
            | ":const"
            | ":macro"
            | ":monitor"
            | ":next"
            | ":org"
            | ":pointer"
            | ":pointer16"
            | ":pointer24"
            | ":proto"
            | ":stringmode"
            | ":unpack"
    )
}

/// Reserved operators and statement keywords of the assembly language.
#[rustfmt::skip]
pub fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        "!=" | "&=" | "+=" | "-=" | "-key" | ":=" | ";" | "<" | "<<=" | "<=" | "=-" | "=="
            | ">" | ">=" | ">>=" | "^=" | "|="
            | "again" | "audio" | "bcd" | "begin" | "bighex" | "buzzer" | "clear" | "delay"
            | "else" | "end" | "hex" | "hires" | "if" | "jump" | "jump0" | "key" | "load"
            | "loadflags" | "loop" | "lores" | "native" | "pitch" | "plane" | "random"
            | "return" | "save" | "saveflags" | "scroll-down" | "scroll-left"
            | "scroll-right" | "scroll-up" | "sprite" | "then" | "while"
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_classification_sets() {
        assert!(is_preprocessor(":include"));
        assert!(is_preprocessor(":dump-options"));
        assert!(!is_preprocessor(":const"));
        assert!(is_directive(":const"));
        assert!(is_directive(":"));
        assert!(!is_directive(":if"));
        assert!(is_reserved("scroll-down"));
        assert!(!is_reserved("main"));
    }

    #[test]
    fn test_sprite_size() {
        let token = Token {
            text: "16x12".to_string(),
            ..Token::default()
        };
        assert_eq!(token.sprite_size(), Some((16, 12)));
        let token = Token {
            text: "8xAB".to_string(),
            ..Token::default()
        };
        assert_eq!(token.sprite_size(), None);
    }
}
