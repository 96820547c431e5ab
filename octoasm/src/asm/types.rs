//! Symbol table records and the assembler output.
use std::collections::HashMap;
use std::fmt;

use smol_str::SmolStr;

use super::tokens::Token;

/// A named compile-time value.
///
/// Constants written with `:const` (and label definitions) are frozen;
/// `:calc` constants may be reassigned by a later `:calc`.
#[derive(Debug, Clone, Copy)]
pub struct Constant {
    pub value: f64,
    pub is_mutable: bool,
}

/// One unresolved use of a forward-declared label.
#[derive(Debug, Clone, Copy)]
pub struct ProtoRef {
    pub addr: usize,
    pub bits: u8,
}

/// A forward-declared label: where it was first referenced, and every
/// patch site waiting for its address.
#[derive(Debug, Clone)]
pub struct Prototype {
    pub line: u32,
    pub pos: u32,
    pub addrs: Vec<ProtoRef>,
}

/// A user macro. The body is stored as already-scanned tokens and spliced
/// back into the token queue at expansion time; it is never re-scanned.
#[derive(Debug, Clone, Default)]
pub struct Macro {
    pub calls: u32,
    pub args: Vec<SmolStr>,
    pub body: Vec<Token>,
}

/// A character-indexed code generator defined with `:stringmode`.
///
/// Each alphabet character owns a private copy of the body so that its
/// expansions are independent of its siblings.
pub struct StringMode {
    pub calls: u32,
    pub values: [u8; 256],
    pub modes: [Option<Box<Macro>>; 256],
}

impl Default for StringMode {
    fn default() -> Self {
        const NONE: Option<Box<Macro>> = None;
        Self {
            calls: 0,
            values: [0; 256],
            modes: [NONE; 256],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Begin,
    Else,
    Loop,
    While,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Else => write!(f, "else"),
            Self::Loop => write!(f, "loop"),
            Self::While => write!(f, "while"),
        }
    }
}

/// A pending control-flow frame.
///
/// `addr` is the slot awaiting a back-patched jump; `None` is the sentinel
/// a `loop` pushes onto the `while` stack so `again` knows where to stop
/// draining.
#[derive(Debug, Clone, Copy)]
pub struct FlowControl {
    pub addr: Option<usize>,
    pub line: u32,
    pub pos: u32,
    pub kind: FlowKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorKind {
    Register,
    Memory,
}

/// Debugger watch annotation. Emits no bytes.
#[derive(Debug, Clone)]
pub struct Monitor {
    pub kind: MonitorKind,
    pub base: i32,
    /// Element count, or -1 when `format` carries a format string instead.
    pub len: i32,
    pub format: SmolStr,
}

/// The finished product of a successful compile: the ROM image plus the
/// per-address metadata external debuggers consume.
pub struct Assembly {
    pub(crate) start_address: usize,
    pub(crate) length: usize,
    pub(crate) rom: Vec<u8>,
    pub(crate) used: Vec<bool>,
    pub(crate) line_map: Vec<u32>,
    pub(crate) breakpoints: HashMap<u32, SmolStr>,
    pub(crate) monitors: HashMap<SmolStr, Monitor>,
    pub(crate) source_lines: u32,
}

impl Assembly {
    pub fn start_address(&self) -> usize {
        self.start_address
    }

    /// The emitted byte range, start address through the last used byte.
    pub fn data(&self) -> &[u8] {
        &self.rom[self.start_address..self.length]
    }

    pub fn code_size(&self) -> usize {
        self.length - self.start_address
    }

    pub fn last_address_used(&self) -> usize {
        self.length.saturating_sub(1)
    }

    /// Number of lines in the (preprocessed) source that was compiled.
    pub fn num_source_lines(&self) -> u32 {
        self.source_lines
    }

    /// Zero-based source line that produced `addr`, or `0xFFFF_FFFF`.
    pub fn line_for_addr(&self, addr: u32) -> u32 {
        self.line_map
            .get(addr as usize)
            .copied()
            .unwrap_or(0xFFFF_FFFF)
    }

    pub fn breakpoint_for_addr(&self, addr: u32) -> Option<&str> {
        self.breakpoints.get(&addr).map(|s| s.as_str())
    }

    pub fn breakpoints(&self) -> &HashMap<u32, SmolStr> {
        &self.breakpoints
    }

    pub fn monitors(&self) -> &HashMap<SmolStr, Monitor> {
        &self.monitors
    }

    pub fn is_used(&self, addr: usize) -> bool {
        self.used.get(addr).copied().unwrap_or(false)
    }
}
