//! Single-pass Octo assembler.
//!
//! [`Program`] consumes a preprocessed source buffer and emits a flat ROM
//! image. Forward references are held as prototypes and back-patched when
//! the label resolves; structured control flow (`if`/`begin`/`else`/`end`,
//! `loop`/`while`/`again`) is tracked with patch-address stacks instead of
//! a syntax tree.
//!
//! Errors do not unwind. Deep calls set a one-shot error flag and return;
//! every operation checks the flag first and is a no-op once it is set, so
//! nothing is ever emitted after an error has been raised.
mod eval;
mod scan;
mod tokens;
mod types;
mod values;

pub use self::tokens::{is_reserved, Token, TokenId, TokenValue};
pub use self::types::{
    Assembly, Constant, FlowControl, FlowKind, Macro, Monitor, MonitorKind, ProtoRef, Prototype,
    StringMode,
};

use std::collections::{HashMap, VecDeque};
use std::fmt;

use smol_str::SmolStr;

/// Highest supported ROM address plus one (MegaChip address space).
pub const RAM_MAX: usize = 16 * 1024 * 1024;
pub const RAM_MASK: usize = RAM_MAX - 1;

/// Error produced by a failed compile. Line and position are 1-based.
#[derive(Debug, Clone)]
pub struct AsmError {
    pub message: String,
    pub line: u32,
    pub pos: u32,
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{}): {}", self.line, self.pos, self.message)
    }
}

impl std::error::Error for AsmError {}

pub struct Program<'s> {
    // scanner
    source: &'s [u8],
    cursor: usize,
    source_line: u32,
    source_pos: u32,
    tokens: VecDeque<Token>,

    // emission
    has_main: bool,
    start_address: usize,
    here: usize,
    length: usize,
    rom: Vec<u8>,
    used: Vec<bool>,
    rom_line_map: Vec<u32>,

    // symbol tables
    constants: HashMap<SmolStr, Constant>,
    aliases: HashMap<SmolStr, u8>,
    protos: HashMap<SmolStr, Prototype>,
    macros: HashMap<SmolStr, Macro>,
    string_modes: HashMap<SmolStr, StringMode>,

    // control flow
    loops: Vec<FlowControl>,
    branches: Vec<FlowControl>,
    whiles: Vec<FlowControl>,

    // debugging
    breakpoints: HashMap<u32, SmolStr>,
    monitors: HashMap<SmolStr, Monitor>,

    // error state
    is_error: bool,
    error: String,
    error_line: u32,
    error_pos: u32,
}

impl<'s> Program<'s> {
    pub fn new(text: &'s str, start_address: usize) -> Self {
        let mut source = text.as_bytes();
        if source.starts_with(&[0xEF, 0xBB, 0xBF]) {
            source = &source[3..]; // UTF-8 BOM
        }

        let mut program = Self {
            source,
            cursor: 0,
            source_line: 0,
            source_pos: 0,
            tokens: VecDeque::new(),
            has_main: true,
            start_address,
            here: start_address,
            length: 0,
            rom: vec![0; 65536],
            used: vec![false; 65536],
            rom_line_map: vec![0xFFFF_FFFF; 65536],
            constants: HashMap::new(),
            aliases: HashMap::new(),
            protos: HashMap::new(),
            macros: HashMap::new(),
            string_modes: HashMap::new(),
            loops: Vec::new(),
            branches: Vec::new(),
            whiles: Vec::new(),
            breakpoints: HashMap::new(),
            monitors: HashMap::new(),
            is_error: false,
            error: String::new(),
            error_line: 0,
            error_pos: 0,
        };
        program.skip_whitespace();

        for (key, value) in [
            ("1", 0x1),
            ("2", 0x2),
            ("3", 0x3),
            ("4", 0xC),
            ("Q", 0x4),
            ("W", 0x5),
            ("E", 0x6),
            ("R", 0xD),
            ("A", 0x7),
            ("S", 0x8),
            ("D", 0x9),
            ("F", 0xE),
            ("Z", 0xA),
            ("X", 0x0),
            ("C", 0xB),
            ("V", 0xF),
        ] {
            program.constants.insert(
                SmolStr::new(format!("OCTO_KEY_{key}")),
                Constant {
                    value: value as f64,
                    is_mutable: false,
                },
            );
        }
        program.aliases.insert(SmolStr::new("unpack-hi"), 0);
        program.aliases.insert(SmolStr::new("unpack-lo"), 1);
        program
    }

    /// Run the compiler over the whole input.
    ///
    /// On success the ROM is trimmed of trailing unused bytes and the
    /// reserved two-byte prefix has been patched with a jump to `main`
    /// (or reclaimed when `main` sits at the start address).
    pub fn compile(&mut self) -> Result<(), AsmError> {
        self.instruction(0x00, 0x00); // reserve a jump slot for main
        while !self.is_end() && !self.is_error {
            self.error_line = self.source_line;
            self.error_pos = self.source_pos;
            self.compile_statement();
        }
        if self.is_error {
            return Err(self.take_error());
        }

        while self.length > self.start_address && !self.used[self.length - 1] {
            self.length -= 1;
        }
        self.error_line = self.source_line;
        self.error_pos = self.source_pos;

        if self.has_main {
            match self.constants.get("main").map(|main| main.value as usize) {
                Some(dest) => self.jump(self.start_address, dest),
                None => {
                    self.raise("This program is missing a 'main' label.");
                    return Err(self.take_error());
                }
            }
        }
        if let Some((name, line, pos)) = self
            .protos
            .iter()
            .next()
            .map(|(name, proto)| (name.clone(), proto.line, proto.pos))
        {
            self.error_line = line;
            self.error_pos = pos;
            self.is_error = true;
            self.error = format!("Undefined forward reference: {}", name);
            return Err(self.take_error());
        }
        if let Some(frame) = self.loops.last().copied() {
            self.error_line = frame.line;
            self.error_pos = frame.pos;
            self.raise("This 'loop' does not have a matching 'again'.");
            return Err(self.take_error());
        }
        if let Some(frame) = self.branches.last().copied() {
            self.error_line = frame.line;
            self.error_pos = frame.pos;
            self.is_error = true;
            self.error = format!("This '{}' does not have a matching 'end'.", frame.kind);
            return Err(self.take_error());
        }
        Ok(())
    }

    /// Move the finished ROM and its debug metadata out of the compiler.
    pub fn into_assembly(self) -> Assembly {
        Assembly {
            start_address: self.start_address,
            length: self.length,
            rom: self.rom,
            used: self.used,
            line_map: self.rom_line_map,
            breakpoints: self.breakpoints,
            monitors: self.monitors,
            source_lines: self.source_line,
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn error_message(&self) -> &str {
        &self.error
    }

    /// 1-based line of the error, 0 when there is none.
    pub fn error_line(&self) -> u32 {
        if self.is_error {
            self.error_line + 1
        } else {
            0
        }
    }

    pub fn error_pos(&self) -> u32 {
        if self.is_error {
            self.error_pos + 1
        } else {
            0
        }
    }

    pub fn rom_start_address(&self) -> usize {
        self.start_address
    }

    pub fn is_register_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    fn take_error(&self) -> AsmError {
        AsmError {
            message: self.error.clone(),
            line: self.error_line + 1,
            pos: self.error_pos + 1,
        }
    }

    /// Record an error unless one is already pending. The first error wins.
    pub(crate) fn raise(&mut self, msg: impl Into<String>) {
        if !self.is_error {
            self.is_error = true;
            self.error = msg.into();
        }
    }

    //-----------------------------------------------------------
    //  Conditionals
    //-----------------------------------------------------------

    /// Emit the register/immediate compare half of a pseudo-conditional.
    /// These always scratch vF.
    fn pseudo_conditional(&mut self, reg: u8, sub: u8, comp: u8) {
        if self.peek_is_register() {
            let rhs = self.register_or_alias();
            self.instruction(0x8F, rhs << 4);
        } else {
            let v = self.value_8bit();
            self.instruction(0x6F, v as u8);
        }
        self.instruction(0x8F, (reg << 4) | sub);
        self.instruction(comp, 0);
    }

    /// Compile the compare of `if`/`while`. `negated` selects the opposite
    /// skip polarity, used when the branch target is the fall-through path.
    fn conditional(&mut self, negated: bool) {
        let reg = self.register_or_alias();
        let shown = self.peek().format_value();
        if self.is_error {
            return;
        }
        let n = self.string();

        let ca = |pos: &str, neg: &str| -> bool { n == if negated { neg } else { pos } };

        if ca("==", "!=") {
            if self.peek_is_register() {
                let rhs = self.register_or_alias();
                self.instruction(0x90 | reg, rhs << 4);
            } else {
                let v = self.value_8bit();
                self.instruction(0x40 | reg, v as u8);
            }
        } else if ca("!=", "==") {
            if self.peek_is_register() {
                let rhs = self.register_or_alias();
                self.instruction(0x50 | reg, rhs << 4);
            } else {
                let v = self.value_8bit();
                self.instruction(0x30 | reg, v as u8);
            }
        } else if ca("key", "-key") {
            self.instruction(0xE0 | reg, 0xA1);
        } else if ca("-key", "key") {
            self.instruction(0xE0 | reg, 0x9E);
        } else if ca(">", "<=") {
            self.pseudo_conditional(reg, 0x5, 0x4F);
        } else if ca("<", ">=") {
            self.pseudo_conditional(reg, 0x7, 0x4F);
        } else if ca(">=", "<") {
            self.pseudo_conditional(reg, 0x7, 0x3F);
        } else if ca("<=", ">") {
            self.pseudo_conditional(reg, 0x5, 0x3F);
        } else {
            self.raise(format!("Expected conditional operator, got {}.", shown));
        }
    }

    //-----------------------------------------------------------
    //  Macro machinery
    //-----------------------------------------------------------

    /// Collect a `{ ... }` delimited token body.
    fn macro_body(&mut self, desc: &str, name: &str, body: &mut Vec<Token>) {
        if self.is_error {
            return;
        }
        self.expect("{");
        if self.is_error {
            self.error = format!("Expected '{{' for definition of {} '{}'.", desc, name);
            return;
        }
        let mut depth = 1;
        while !self.is_end() {
            let t = self.peek();
            if t.matches("{") {
                depth += 1;
            }
            if t.matches("}") {
                depth -= 1;
            }
            if depth == 0 {
                break;
            }
            let t = self.next();
            body.push(t);
        }
        self.expect("}");
        if self.is_error {
            self.error = format!("Expected '}}' for definition of {} '{}'.", desc, name);
        }
    }

    /// Splice a macro body into the front of the token queue, substituting
    /// bound parameter tokens. Bindings happen at splice time, so `CALLS`
    /// reflects this invocation.
    fn expand_macro(&mut self, name: &SmolStr) {
        self.eat();
        let (calls, args, body) = {
            let m = self.macros.get_mut(name).expect("macro looked up by caller");
            let calls = m.calls;
            m.calls += 1;
            (calls, m.args.clone(), m.body.clone())
        };

        let mut bindings: HashMap<SmolStr, Token> = HashMap::new();
        bindings.insert(SmolStr::new("CALLS"), Token::number(calls as f64));
        for arg in args {
            if self.is_end() {
                self.error_line = self.source_line;
                self.error_pos = self.source_pos;
                self.raise(format!(
                    "Not enough arguments for expansion of macro '{}'.",
                    name
                ));
                break;
            }
            let t = self.next();
            bindings.entry(arg).or_insert(t);
        }
        for (z, bt) in body.into_iter().enumerate() {
            let tok = bt
                .str_value()
                .and_then(|s| bindings.get(s))
                .cloned()
                .unwrap_or(bt);
            self.tokens.insert(z, tok);
        }
    }

    /// Splice one expansion per character of the input string, with the
    /// synthetic `CALLS`/`CHAR`/`INDEX`/`VALUE` bindings.
    fn expand_string_mode(&mut self, name: &SmolStr) {
        self.eat();
        let text_base = self.source_pos;
        let text_quote = self.peek_char() == b'"';
        let text = self.string();
        let mut splice_index = 0;
        for (tz, ch) in text.as_str().bytes().enumerate() {
            let c = ch as usize;
            let expansion = {
                let s = self
                    .string_modes
                    .get_mut(name)
                    .expect("string mode looked up by caller");
                match &s.modes[c] {
                    Some(m) => {
                        let body = m.body.clone();
                        let value = s.values[c];
                        let calls = s.calls;
                        s.calls += 1;
                        Some((calls, value, body))
                    }
                    None => None,
                }
            };
            let (calls, value, body) = match expansion {
                Some(expansion) => expansion,
                None => {
                    self.error_pos = text_base + tz as u32 + if text_quote { 1 } else { 0 };
                    self.raise(format!(
                        "String mode '{}' is not defined for the character '{}'.",
                        name, ch as char
                    ));
                    return;
                }
            };
            let mut bindings: HashMap<SmolStr, Token> = HashMap::new();
            bindings.insert(SmolStr::new("CALLS"), Token::number(calls as f64));
            bindings.insert(SmolStr::new("CHAR"), Token::number(c as f64));
            bindings.insert(SmolStr::new("INDEX"), Token::number(tz as f64));
            bindings.insert(SmolStr::new("VALUE"), Token::number(value as f64));
            for bt in body {
                let tok = bt
                    .str_value()
                    .and_then(|s| bindings.get(s))
                    .cloned()
                    .unwrap_or(bt);
                self.tokens.insert(splice_index, tok);
                splice_index += 1;
            }
        }
    }

    //-----------------------------------------------------------
    //  Statement dispatch
    //-----------------------------------------------------------

    fn compile_statement(&mut self) {
        if self.is_error {
            return;
        }
        let peeked = self.peek();
        let (peek_line, peek_pos) = (peeked.line, peeked.pos);

        if self.peek_is_register() {
            let r = self.register_or_alias();
            if self.match_tok(":=") {
                if self.peek_is_register() {
                    let rhs = self.register_or_alias();
                    self.instruction(0x80 | r, rhs << 4);
                } else if self.match_tok("random") {
                    let v = self.value_8bit();
                    self.instruction(0xC0 | r, v as u8);
                } else if self.match_tok("key") {
                    self.instruction(0xF0 | r, 0x0A);
                } else if self.match_tok("delay") {
                    self.instruction(0xF0 | r, 0x07);
                } else {
                    let v = self.value_8bit();
                    self.instruction(0x60 | r, v as u8);
                }
            } else if self.match_tok("+=") {
                if self.peek_is_register() {
                    let rhs = self.register_or_alias();
                    self.instruction(0x80 | r, (rhs << 4) | 0x4);
                } else {
                    let v = self.value_8bit();
                    self.instruction(0x70 | r, v as u8);
                }
            } else if self.match_tok("-=") {
                if self.peek_is_register() {
                    let rhs = self.register_or_alias();
                    self.instruction(0x80 | r, (rhs << 4) | 0x5);
                } else {
                    let v = self.value_8bit();
                    self.instruction(0x70 | r, (1 + !v) as u8);
                }
            } else if self.match_tok("|=") {
                let rhs = self.register_or_alias();
                self.instruction(0x80 | r, (rhs << 4) | 0x1);
            } else if self.match_tok("&=") {
                let rhs = self.register_or_alias();
                self.instruction(0x80 | r, (rhs << 4) | 0x2);
            } else if self.match_tok("^=") {
                let rhs = self.register_or_alias();
                self.instruction(0x80 | r, (rhs << 4) | 0x3);
            } else if self.match_tok("=-") {
                let rhs = self.register_or_alias();
                self.instruction(0x80 | r, (rhs << 4) | 0x7);
            } else if self.match_tok(">>=") {
                let rhs = self.register_or_alias();
                self.instruction(0x80 | r, (rhs << 4) | 0x6);
            } else if self.match_tok("<<=") {
                let rhs = self.register_or_alias();
                self.instruction(0x80 | r, (rhs << 4) | 0xE);
            } else {
                let t = self.next();
                if !self.is_error {
                    self.raise(format!("Unrecognized operator {}.", t.format_value()));
                }
            }
            return;
        }

        if !self.is_error && !self.is_end() && self.tokens.is_empty() {
            self.fetch_token();
        }
        if self.is_end() || self.is_error {
            return;
        }
        let tid = self.tokens.front().map(|t| t.tid).unwrap_or(TokenId::Unknown);
        match tid {
            TokenId::Colon => {
                self.eat();
                self.resolve_label(0);
            }
            TokenId::Next => {
                self.eat();
                self.resolve_label(1);
            }
            TokenId::Unpack => {
                self.eat();
                let a = if self.match_tok("long") {
                    self.value_16bit(true, 0)
                } else {
                    let v = self.value_4bit();
                    (v << 12) | self.value_12bit()
                };
                let rh = self.aliases["unpack-hi"];
                let rl = self.aliases["unpack-lo"];
                self.instruction(0x60 | rh, (a >> 8) as u8);
                self.instruction(0x60 | rl, a as u8);
            }
            TokenId::Breakpoint => {
                self.eat();
                let name = self.string();
                if !self.is_error {
                    self.breakpoints.insert(self.here as u32, name);
                }
            }
            TokenId::Monitor => {
                self.eat();
                let mut shown = self.peek().format_value();
                let kind;
                let base;
                let mut len = -1;
                let mut format = SmolStr::default();
                if self.peek_is_register() {
                    kind = MonitorKind::Register;
                    base = self.register_or_alias() as i32;
                    if self.peek().is_number() {
                        len = self.value_4bit();
                    } else {
                        format = self.string();
                    }
                } else {
                    kind = MonitorKind::Memory;
                    base = self.value_16bit(false, 0);
                    if self.peek().is_number() {
                        len = self.value_16bit(false, 0);
                    } else {
                        format = self.string();
                    }
                }
                if self.is_error {
                    return;
                }
                if shown.ends_with('\'') {
                    shown.pop();
                }
                let name = SmolStr::new(shown.strip_prefix('\'').unwrap_or(&shown));
                self.monitors.insert(
                    name,
                    Monitor {
                        kind,
                        base,
                        len,
                        format,
                    },
                );
            }
            TokenId::Assert => {
                self.eat();
                let message = if self.peek_match("{", 0) {
                    SmolStr::default()
                } else {
                    self.string()
                };
                if self.calculated("assertion") as i64 == 0 {
                    if !message.is_empty() {
                        self.raise(format!("Assertion failed: {}", message));
                    } else {
                        self.raise("Assertion failed.");
                    }
                }
            }
            TokenId::Proto => {
                // deprecated
                self.eat();
                self.next();
            }
            TokenId::Alias => {
                self.eat();
                let n = self.identifier("alias");
                if self.is_error {
                    return;
                }
                if self.constants.contains_key(&n) {
                    self.raise(format!("The name '{}' is already used by a constant.", n));
                    return;
                }
                let v = if self.peek_match("{", 0) {
                    self.calculated("ANONYMOUS") as i64
                } else {
                    self.register_or_alias() as i64
                };
                if !(0..=15).contains(&v) {
                    self.raise("Register index must be in the range [0,F].");
                    return;
                }
                self.aliases.insert(n, v as u8);
            }
            TokenId::Byte => {
                self.eat();
                let v = if self.peek_match("{", 0) {
                    self.calculated("ANONYMOUS") as i32
                } else {
                    self.value_8bit()
                };
                self.append(v as u8);
            }
            TokenId::Pointer | TokenId::Pointer16 => {
                self.eat();
                let a = if self.peek_match("{", 0) {
                    self.calculated("ANONYMOUS") as i32
                } else {
                    self.value_16bit(true, 0)
                };
                self.instruction((a >> 8) as u8, a as u8);
            }
            TokenId::Pointer24 => {
                self.eat();
                let a = if self.peek_match("{", 0) {
                    self.calculated("ANONYMOUS") as i32
                } else {
                    self.value_24bit(true, 0)
                };
                self.append((a >> 16) as u8);
                self.instruction((a >> 8) as u8, a as u8);
            }
            TokenId::Org => {
                self.eat();
                self.here = if self.peek_match("{", 0) {
                    RAM_MASK & self.calculated("ANONYMOUS") as usize
                } else {
                    self.value_16bit(false, 0) as usize
                };
            }
            TokenId::Call => {
                self.eat();
                let nnn = if self.peek_match("{", 0) {
                    0xFFF & self.calculated("ANONYMOUS") as i32
                } else {
                    self.value_12bit()
                };
                self.immediate(0x20, nnn);
            }
            TokenId::Const => {
                self.eat();
                let n = self.identifier("constant");
                if self.is_error {
                    return;
                }
                if self.constants.contains_key(&n) {
                    self.raise(format!("The name '{}' has already been defined.", n));
                    return;
                }
                let value = self.value_constant();
                self.constants.insert(n, value);
            }
            TokenId::Calc => {
                self.eat();
                let n = self.identifier("calculated constant");
                if self.is_error {
                    return;
                }
                if let Some(prev) = self.constants.get(&n) {
                    if !prev.is_mutable {
                        self.raise(format!("Cannot redefine the name '{}' with :calc.", n));
                        return;
                    }
                }
                let value = self.calculated(&n);
                self.constants.insert(
                    n,
                    Constant {
                        value,
                        is_mutable: true,
                    },
                );
            }
            TokenId::Semicolon | TokenId::Return => {
                self.eat();
                self.instruction(0x00, 0xEE);
            }
            TokenId::Clear => {
                self.eat();
                self.instruction(0x00, 0xE0);
            }
            TokenId::Bcd => {
                self.eat();
                let r = self.register_or_alias();
                self.instruction(0xF0 | r, 0x33);
            }
            TokenId::Delay => {
                self.eat();
                self.expect(":=");
                let r = self.register_or_alias();
                self.instruction(0xF0 | r, 0x15);
            }
            TokenId::Buzzer => {
                self.eat();
                self.expect(":=");
                let r = self.register_or_alias();
                self.instruction(0xF0 | r, 0x18);
            }
            TokenId::Pitch => {
                self.eat();
                self.expect(":=");
                let r = self.register_or_alias();
                self.instruction(0xF0 | r, 0x3A);
            }
            TokenId::Jump0 => {
                self.eat();
                let nnn = self.value_12bit();
                self.immediate(0xB0, nnn);
            }
            TokenId::Jump => {
                self.eat();
                let nnn = self.value_12bit();
                self.immediate(0x10, nnn);
            }
            TokenId::Native => {
                self.eat();
                let nnn = self.value_12bit();
                self.immediate(0x00, nnn);
            }
            TokenId::Audio => {
                self.eat();
                self.instruction(0xF0, 0x02);
            }
            TokenId::ScrollDown => {
                self.eat();
                let n = self.value_4bit();
                self.instruction(0x00, 0xC0 | n as u8);
            }
            TokenId::ScrollUp => {
                self.eat();
                let n = self.value_4bit();
                self.instruction(0x00, 0xD0 | n as u8);
            }
            TokenId::ScrollRight => {
                self.eat();
                self.instruction(0x00, 0xFB);
            }
            TokenId::ScrollLeft => {
                self.eat();
                self.instruction(0x00, 0xFC);
            }
            TokenId::Exit => {
                self.eat();
                self.instruction(0x00, 0xFD);
            }
            TokenId::Lores => {
                self.eat();
                self.instruction(0x00, 0xFE);
            }
            TokenId::Hires => {
                self.eat();
                self.instruction(0x00, 0xFF);
            }
            TokenId::Sprite => {
                self.eat();
                let x = self.register_or_alias();
                let y = self.register_or_alias();
                let n = self.value_4bit();
                self.instruction(0xD0 | x, (y << 4) | n as u8);
            }
            TokenId::Plane => {
                self.eat();
                let n = self.value_4bit();
                if n > 15 {
                    self.raise(format!("The plane bitmask must be [0,15], was {}.", n));
                }
                self.instruction(0xF0 | n as u8, 0x01);
            }
            TokenId::SaveFlags => {
                self.eat();
                let r = self.register_or_alias();
                self.instruction(0xF0 | r, 0x75);
            }
            TokenId::LoadFlags => {
                self.eat();
                let r = self.register_or_alias();
                self.instruction(0xF0 | r, 0x85);
            }
            TokenId::Save => {
                self.eat();
                let r = self.register_or_alias();
                if self.match_tok("-") {
                    let rhs = self.register_or_alias();
                    self.instruction(0x50 | r, (rhs << 4) | 0x02);
                } else {
                    self.instruction(0xF0 | r, 0x55);
                }
            }
            TokenId::Load => {
                self.eat();
                let r = self.register_or_alias();
                if self.match_tok("-") {
                    let rhs = self.register_or_alias();
                    self.instruction(0x50 | r, (rhs << 4) | 0x03);
                } else {
                    self.instruction(0xF0 | r, 0x65);
                }
            }
            TokenId::IReg => {
                self.eat();
                if self.match_tok(":=") {
                    if self.match_tok("long") {
                        let a = self.value_16bit(true, 2);
                        self.instruction(0xF0, 0x00);
                        self.instruction((a >> 8) as u8, a as u8);
                    } else if self.match_tok("hex") {
                        let r = self.register_or_alias();
                        self.instruction(0xF0 | r, 0x29);
                    } else if self.match_tok("bighex") {
                        let r = self.register_or_alias();
                        self.instruction(0xF0 | r, 0x30);
                    } else {
                        let nnn = self.value_12bit();
                        self.immediate(0xA0, nnn);
                    }
                } else if self.match_tok("+=") {
                    let r = self.register_or_alias();
                    self.instruction(0xF0 | r, 0x1E);
                } else {
                    let t = self.next();
                    self.raise(format!(
                        "{} is not an operator that can target the i register.",
                        t.format_value()
                    ));
                }
            }
            TokenId::If => {
                self.eat();
                let index = if self.peek_match("key", 1) || self.peek_match("-key", 1) {
                    2
                } else {
                    3
                };
                if self.peek_match("then", index) {
                    self.conditional(false);
                    self.expect("then");
                } else if self.peek_match("begin", index) {
                    self.conditional(true);
                    self.expect("begin");
                    self.branches.push(FlowControl {
                        addr: Some(self.here),
                        line: self.source_line,
                        pos: self.source_pos,
                        kind: FlowKind::Begin,
                    });
                    self.instruction(0x00, 0x00);
                } else {
                    for _ in 0..=index {
                        if !self.is_end() {
                            self.next();
                        }
                    }
                    self.raise("Expected 'then' or 'begin'.");
                }
            }
            TokenId::Else => {
                self.eat();
                let frame = match self.branches.pop() {
                    Some(frame) => frame,
                    None => {
                        self.raise("This 'else' does not have a matching 'begin'.");
                        return;
                    }
                };
                let dest = self.here + 2;
                self.jump(frame.addr.unwrap_or(0), dest);
                self.branches.push(FlowControl {
                    addr: Some(self.here),
                    line: peek_line,
                    pos: peek_pos,
                    kind: FlowKind::Else,
                });
                self.instruction(0x00, 0x00);
            }
            TokenId::End => {
                self.eat();
                let frame = match self.branches.pop() {
                    Some(frame) => frame,
                    None => {
                        self.raise("This 'end' does not have a matching 'begin'.");
                        return;
                    }
                };
                let dest = self.here;
                self.jump(frame.addr.unwrap_or(0), dest);
            }
            TokenId::Loop => {
                self.eat();
                self.loops.push(FlowControl {
                    addr: Some(self.here),
                    line: peek_line,
                    pos: peek_pos,
                    kind: FlowKind::Loop,
                });
                self.whiles.push(FlowControl {
                    addr: None, // sentinel marking the loop boundary
                    line: peek_line,
                    pos: peek_pos,
                    kind: FlowKind::Loop,
                });
            }
            TokenId::While => {
                self.eat();
                if self.loops.is_empty() {
                    self.raise("This 'while' is not within a loop.");
                    return;
                }
                self.conditional(true);
                self.whiles.push(FlowControl {
                    addr: Some(self.here),
                    line: peek_line,
                    pos: peek_pos,
                    kind: FlowKind::While,
                });
                self.immediate(0x10, 0); // forward jump, patched by 'again'
            }
            TokenId::Again => {
                self.eat();
                let frame = match self.loops.pop() {
                    Some(frame) => frame,
                    None => {
                        self.raise("This 'again' does not have a matching 'loop'.");
                        return;
                    }
                };
                self.immediate(0x10, frame.addr.unwrap_or(0) as i32);
                while let Some(w) = self.whiles.pop() {
                    match w.addr {
                        Some(addr) => {
                            let dest = self.here;
                            self.jump(addr, dest);
                        }
                        None => break,
                    }
                }
            }
            TokenId::Macro => {
                self.eat();
                let n = self.identifier("macro");
                if self.is_error {
                    return;
                }
                if self.macros.contains_key(&n) {
                    self.raise(format!("The name '{}' has already been defined.", n));
                    return;
                }
                let mut m = Macro::default();
                while !self.is_error && !self.is_end() && !self.peek_match("{", 0) {
                    let arg = self.identifier("macro argument");
                    m.args.push(arg);
                }
                let mut body = Vec::new();
                self.macro_body("macro", &n, &mut body);
                m.body = body;
                self.macros.insert(n, m);
            }
            TokenId::StringMode => {
                self.eat();
                let n = self.identifier("stringmode");
                if self.is_error {
                    return;
                }
                let alpha_base = self.source_pos;
                let alpha_quote = self.peek_char() == b'"';
                let alphabet = self.string();
                let mut body = Vec::new(); // every character gets its own copy
                self.macro_body("string mode", &n, &mut body);
                if self.is_error {
                    return;
                }
                let mut collision = None;
                let s = self.string_modes.entry(n.clone()).or_default();
                for (z, ch) in alphabet.as_str().bytes().enumerate() {
                    let c = ch as usize;
                    if s.modes[c].is_some() {
                        collision = Some((z, ch));
                        break;
                    }
                    s.values[c] = z as u8;
                    s.modes[c] = Some(Box::new(Macro {
                        calls: 0,
                        args: Vec::new(),
                        body: body.clone(),
                    }));
                }
                if let Some((z, ch)) = collision {
                    self.error_pos = alpha_base + z as u32 + if alpha_quote { 1 } else { 0 };
                    self.raise(format!(
                        "String mode '{}' is already defined for the character '{}'.",
                        n, ch as char
                    ));
                }
            }
            _ => {
                let t = self.peek();
                if self.is_error {
                    return;
                }
                if t.is_number() {
                    let n = t.num() as i32;
                    self.next();
                    if !(-128..=255).contains(&n) {
                        self.raise(format!(
                            "Literal value '{}' does not fit in a byte- must be in range [-128,255].",
                            n
                        ));
                    }
                    self.append(n as u8);
                    return;
                }
                let n = t.str_value().cloned().unwrap_or_default();
                if self.macros.contains_key(&n) {
                    self.expand_macro(&n);
                } else if self.string_modes.contains_key(&n) {
                    self.expand_string_mode(&n);
                } else {
                    let nnn = self.value_12bit();
                    self.immediate(0x20, nnn);
                }
            }
        }
    }
}
