//! Assembler tokens and reserved words.
use std::fmt;

use smol_str::SmolStr;

/// Identity of a reserved word, operator or directive.
///
/// Every whitespace-delimited word the scanner produces is checked against
/// this set once, so statement dispatch can match on a small integer instead
/// of re-comparing strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[rustfmt::skip]
pub enum TokenId {
    Unknown,
    StringLiteral,

    // ------------------------------------------------------------------------
    // Operators
    Assign,       // :=
    AssignOr,     // |=
    AssignAnd,    // &=
    AssignXor,    // ^=
    AssignSub,    // -=
    AssignRsub,   // =-
    AssignAdd,    // +=
    AssignShr,    // >>=
    AssignShl,    // <<=
    Equal,        // ==
    Unequal,      // !=
    Less,         // <
    Greater,      // >
    LessEqual,    // <=
    GreaterEqual, // >=

    // ------------------------------------------------------------------------
    // Preprocessor directives (rejected by the assembler stage)
    PreInclude,     // :include
    PreSegment,     // :segment
    PreIf,          // :if
    PreElse,        // :else
    PreEnd,         // :end
    PreUnless,      // :unless
    PreDumpOptions, // :dump-options
    PreConfig,      // :config
    PreAsm,         // :asm

    // ------------------------------------------------------------------------
    // Directives
    Colon,      // :
    Next,       // :next
    Unpack,     // :unpack
    Breakpoint, // :breakpoint
    Proto,      // :proto
    Alias,      // :alias
    Const,      // :const
    Org,        // :org
    Macro,      // :macro
    Calc,       // :calc
    Byte,       // :byte
    Call,       // :call
    StringMode, // :stringmode
    Assert,     // :assert
    Monitor,    // :monitor
    Pointer,    // :pointer
    Pointer16,  // :pointer16
    Pointer24,  // :pointer24
    Semicolon,  // ;

    // ------------------------------------------------------------------------
    // Statements
    Key,         // key
    NotKey,      // -key
    Hex,         // hex
    BigHex,      // bighex
    Random,      // random
    Delay,       // delay
    Return,      // return
    Clear,       // clear
    Bcd,         // bcd
    Save,        // save
    Load,        // load
    Buzzer,      // buzzer
    If,          // if
    Then,        // then
    Begin,       // begin
    Else,        // else
    End,         // end
    Exit,        // exit
    Jump,        // jump
    Jump0,       // jump0
    Native,      // native
    Sprite,      // sprite
    Loop,        // loop
    While,       // while
    Again,       // again
    ScrollDown,  // scroll-down
    ScrollUp,    // scroll-up
    ScrollRight, // scroll-right
    ScrollLeft,  // scroll-left
    Lores,       // lores
    Hires,       // hires
    LoadFlags,   // loadflags
    SaveFlags,   // saveflags
    IReg,        // i
    Audio,       // audio
    Plane,       // plane
    Pitch,       // pitch
}

impl TokenId {
    #[rustfmt::skip]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            ":="            => Some(Self::Assign),
            "|="            => Some(Self::AssignOr),
            "&="            => Some(Self::AssignAnd),
            "^="            => Some(Self::AssignXor),
            "-="            => Some(Self::AssignSub),
            "=-"            => Some(Self::AssignRsub),
            "+="            => Some(Self::AssignAdd),
            ">>="           => Some(Self::AssignShr),
            "<<="           => Some(Self::AssignShl),
            "=="            => Some(Self::Equal),
            "!="            => Some(Self::Unequal),
            "<"             => Some(Self::Less),
            ">"             => Some(Self::Greater),
            "<="            => Some(Self::LessEqual),
            ">="            => Some(Self::GreaterEqual),
            ":include"      => Some(Self::PreInclude),
            ":segment"      => Some(Self::PreSegment),
            ":if"           => Some(Self::PreIf),
            ":else"         => Some(Self::PreElse),
            ":end"          => Some(Self::PreEnd),
            ":unless"       => Some(Self::PreUnless),
            ":dump-options" => Some(Self::PreDumpOptions),
            ":config"       => Some(Self::PreConfig),
            ":asm"          => Some(Self::PreAsm),
            ":"             => Some(Self::Colon),
            ":next"         => Some(Self::Next),
            ":unpack"       => Some(Self::Unpack),
            ":breakpoint"   => Some(Self::Breakpoint),
            ":proto"        => Some(Self::Proto),
            ":alias"        => Some(Self::Alias),
            ":const"        => Some(Self::Const),
            ":org"          => Some(Self::Org),
            ":macro"        => Some(Self::Macro),
            ":calc"         => Some(Self::Calc),
            ":byte"         => Some(Self::Byte),
            ":call"         => Some(Self::Call),
            ":stringmode"   => Some(Self::StringMode),
            ":assert"       => Some(Self::Assert),
            ":monitor"      => Some(Self::Monitor),
            ":pointer"      => Some(Self::Pointer),
            ":pointer16"    => Some(Self::Pointer16),
            ":pointer24"    => Some(Self::Pointer24),
            ";"             => Some(Self::Semicolon),
            "key"           => Some(Self::Key),
            "-key"          => Some(Self::NotKey),
            "hex"           => Some(Self::Hex),
            "bighex"        => Some(Self::BigHex),
            "random"        => Some(Self::Random),
            "delay"         => Some(Self::Delay),
            "return"        => Some(Self::Return),
            "clear"         => Some(Self::Clear),
            "bcd"           => Some(Self::Bcd),
            "save"          => Some(Self::Save),
            "load"          => Some(Self::Load),
            "buzzer"        => Some(Self::Buzzer),
            "if"            => Some(Self::If),
            "then"          => Some(Self::Then),
            "begin"         => Some(Self::Begin),
            "else"          => Some(Self::Else),
            "end"           => Some(Self::End),
            "exit"          => Some(Self::Exit),
            "jump"          => Some(Self::Jump),
            "jump0"         => Some(Self::Jump0),
            "native"        => Some(Self::Native),
            "sprite"        => Some(Self::Sprite),
            "loop"          => Some(Self::Loop),
            "while"         => Some(Self::While),
            "again"         => Some(Self::Again),
            "scroll-down"   => Some(Self::ScrollDown),
            "scroll-up"     => Some(Self::ScrollUp),
            "scroll-right"  => Some(Self::ScrollRight),
            "scroll-left"   => Some(Self::ScrollLeft),
            "lores"         => Some(Self::Lores),
            "hires"         => Some(Self::Hires),
            "loadflags"     => Some(Self::LoadFlags),
            "saveflags"     => Some(Self::SaveFlags),
            "i"             => Some(Self::IReg),
            "audio"         => Some(Self::Audio),
            "plane"         => Some(Self::Plane),
            "pitch"         => Some(Self::Pitch),
            _               => None,
        }
    }
}

/// True when `name` may not be redefined by user code.
pub fn is_reserved(name: &str) -> bool {
    TokenId::parse(name).is_some()
}

/// Payload of a scanned token.
///
/// String literals and bare words share the `Text` variant; the scanner
/// does not know what a register or a label is, and quoted strings are
/// legal wherever an identifier is expected (`:breakpoint loop-top`).
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Number(f64),
    Text(SmolStr),
    End,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub line: u32,
    pub pos: u32,
    pub tid: TokenId,
    pub value: TokenValue,
}

impl Token {
    pub fn end(line: u32, pos: u32) -> Self {
        Self {
            line,
            pos,
            tid: TokenId::Unknown,
            value: TokenValue::End,
        }
    }

    /// Synthetic numeric token, used for macro parameter bindings.
    pub fn number(n: f64) -> Self {
        Self {
            line: 0,
            pos: 0,
            tid: TokenId::Unknown,
            value: TokenValue::Number(n),
        }
    }

    pub fn text(line: u32, pos: u32, text: SmolStr) -> Self {
        let tid = TokenId::parse(&text).unwrap_or(TokenId::Unknown);
        Self {
            line,
            pos,
            tid,
            value: TokenValue::Text(text),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self.value, TokenValue::Number(_))
    }

    pub fn num(&self) -> f64 {
        match self.value {
            TokenValue::Number(n) => n,
            _ => 0.0,
        }
    }

    /// Text payload, `None` for numbers and end-of-file.
    pub fn str_value(&self) -> Option<&SmolStr> {
        match &self.value {
            TokenValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        matches!(&self.value, TokenValue::Text(s) if s == name)
    }

    /// Render the token for an error message.
    pub fn format_value(&self) -> String {
        match &self.value {
            TokenValue::End => "<end of file>".to_string(),
            TokenValue::Text(s) => format!("'{}'", s),
            TokenValue::Number(n) => format!("{}", *n as i64),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_value())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reserved_words() {
        assert!(is_reserved(":="));
        assert!(is_reserved("scroll-down"));
        assert!(is_reserved("i"));
        assert!(is_reserved(":stringmode"));
        assert!(!is_reserved("main"));
        assert!(!is_reserved("v0"));
    }

    #[test]
    fn test_token_reclassification() {
        let t = Token::text(1, 1, SmolStr::new("loop"));
        assert_eq!(t.tid, TokenId::Loop);
        let t = Token::text(1, 1, SmolStr::new("player-x"));
        assert_eq!(t.tid, TokenId::Unknown);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(Token::number(12.7).format_value(), "12");
        assert_eq!(Token::end(0, 0).format_value(), "<end of file>");
        let t = Token::text(1, 1, SmolStr::new("begin"));
        assert_eq!(t.format_value(), "'begin'");
    }
}
