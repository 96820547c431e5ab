//! Octo preprocessor.
//!
//! Reads tokens from a stack of files (the include chain is the call
//! stack), passing raw text through to one of two output segments while
//! intercepting its own directives: `:include` (source and image files),
//! `:segment code|data`, conditional `:if`/`:unless`/`:else`/`:end`
//! blocks, and `:const` definitions that later conditionals may test.
//!
//! When line-info generation is on, `#@line[depth,line,file]` comments are
//! inserted wherever the output stops tracking its origin; the assembler's
//! diagnostics replay them to point errors at the original files.
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::diag::{CompileResult, Location, LocationRole, Severity};
use crate::lexer::Lexer;
use crate::tokens::{Token, TokenKind};

const IMAGE_EXTENSIONS: &[&str] = &["png", "gif", "bmp", "jpg", "jpeg", "tga"];

/// Preprocessing failure with the include chain that led to it.
#[derive(Debug, Clone)]
pub struct PrepError {
    pub message: String,
    pub locations: Vec<Location>,
}

impl fmt::Display for PrepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PrepError {}

impl From<PrepError> for CompileResult {
    fn from(err: PrepError) -> Self {
        CompileResult {
            severity: Severity::Error,
            message: err.message,
            locations: err.locations,
        }
    }
}

/// A value bound with `-D` or captured from a `:const` line.
#[derive(Debug, Clone)]
pub enum Define {
    Number(f64),
    Text(String),
}

impl Define {
    /// Truth for `:if`/`:unless`: non-zero number or non-empty string.
    fn is_true(&self) -> bool {
        match self {
            Define::Number(n) => n.abs() > 1e-7,
            Define::Text(s) => !s.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Code,
    Data,
}

/// Tri-state emission inside conditional blocks.
///
/// `Inactive` means the surrounding frame is live but this branch failed
/// its test; `SkipAll` means some outer frame already failed, so `:else`
/// must not revive us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmitMode {
    Active,
    Inactive,
    SkipAll,
}

struct Frame {
    filename: String,
    line: u32,
    column: u32,
}

pub struct Preprocessor {
    collect: String,
    collect_location_stack: Vec<(u32, String)>,
    current_segment: Segment,
    code_segments: Vec<String>,
    data_segments: Vec<String>,
    emit_mode: Vec<EmitMode>,
    symbols: BTreeMap<String, Define>,
    include_paths: Vec<PathBuf>,
    generate_line_infos: bool,
    frames: Vec<Frame>,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            collect: String::new(),
            collect_location_stack: Vec::new(),
            current_segment: Segment::Code,
            code_segments: Vec::new(),
            data_segments: Vec::new(),
            emit_mode: Vec::new(),
            symbols: BTreeMap::new(),
            include_paths: Vec::new(),
            generate_line_infos: true,
            frames: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.collect.clear();
        self.collect_location_stack.clear();
        self.current_segment = Segment::Code;
        self.code_segments.clear();
        self.data_segments.clear();
        self.emit_mode.clear();
        self.symbols.clear();
        self.frames.clear();
    }

    pub fn set_include_paths(&mut self, paths: &[PathBuf]) {
        self.include_paths = paths.to_vec();
    }

    pub fn generate_line_infos(&mut self, value: bool) {
        self.generate_line_infos = value;
    }

    pub fn define(&mut self, name: impl Into<String>, value: Define) {
        self.symbols.insert(name.into(), value);
    }

    pub fn is_true(&self, name: &str) -> bool {
        self.symbols.get(name).map(Define::is_true).unwrap_or(false)
    }

    pub fn defined_value(&self, name: &str) -> Option<f64> {
        match self.symbols.get(name)? {
            Define::Number(n) => Some(*n),
            Define::Text(_) => None,
        }
    }

    /// Preprocess a file from disk, resolving it against the including
    /// file's directory and the configured include paths.
    pub fn preprocess_file(&mut self, path: &Path) -> Result<(), PrepError> {
        let resolved = self.resolve_file(path)?;
        debug!("preprocessing '{}' ...", resolved.display());
        let bytes = fs::read(&resolved).map_err(|err| {
            self.fail(format!("Could not read file '{}': {}", resolved.display(), err))
        })?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        self.process(&resolved.to_string_lossy(), &content)
    }

    /// Preprocess an in-memory buffer.
    pub fn preprocess_source(&mut self, filename: &str, source: &str) -> Result<(), PrepError> {
        self.process(filename, source)
    }

    /// Concatenate the flushed segments: all code segments first, then all
    /// data segments, each in flush order.
    pub fn dump_segments(&self) -> String {
        let mut output = String::new();
        let mut ending_ws_lines = 2;
        for segment in self.code_segments.iter().chain(self.data_segments.iter()) {
            if segment.is_empty() {
                continue;
            }
            if !self.generate_line_infos {
                let separation = ending_ws_lines + whitespace_lines_at_start(segment);
                for _ in separation..2 {
                    output.push('\n');
                }
            }
            output.push_str(segment);
            if !segment.ends_with('\n') {
                output.push('\n');
            }
            if !self.generate_line_infos {
                ending_ws_lines = whitespace_lines_at_end(segment);
            }
        }
        output
    }

    fn process(&mut self, filename: &str, source: &str) -> Result<(), PrepError> {
        self.frames.push(Frame {
            filename: filename.to_string(),
            line: 1,
            column: 1,
        });
        let result = self.process_inner(source);
        self.frames.pop();
        result
    }

    fn process_inner(&mut self, source: &str) -> Result<(), PrepError> {
        let filename = self
            .frames
            .last()
            .expect("process pushed a frame")
            .filename
            .clone();
        let mut lex = Lexer::new(filename, source);
        self.current_segment = Segment::Code;

        let mut kind = self.advance(&mut lex, false)?;
        loop {
            match kind {
                TokenKind::Eof => {
                    self.write_prefix(lex.token());
                    break;
                }
                TokenKind::Preprocessor => {
                    self.write_prefix(lex.token());
                    if lex.expect(":include") {
                        let next = self.advance(&mut lex, false)?;
                        if next != TokenKind::String {
                            return Err(self.fail("Expected string after ':include'."));
                        }
                        let target = lex.token().text.clone();
                        let resolved = self.resolve_file(Path::new(&target))?;
                        if is_image(&resolved) {
                            kind = self.include_image(&mut lex, &resolved)?;
                        } else {
                            self.flush_segment();
                            let old_segment = self.current_segment;
                            self.preprocess_file(&resolved)?;
                            self.current_segment = old_segment;
                            kind = self.advance(&mut lex, true)?;
                        }
                    } else if lex.expect(":segment") {
                        let next = self.advance(&mut lex, false)?;
                        let raw = lex.token().raw;
                        if next != TokenKind::Identifier || (raw != "data" && raw != "code") {
                            return Err(self.fail("Expected 'data' or 'code' after ':segment'."));
                        }
                        self.flush_segment();
                        self.current_segment = if raw == "code" {
                            Segment::Code
                        } else {
                            Segment::Data
                        };
                        kind = self.advance(&mut lex, true)?;
                    } else if lex.expect(":if") {
                        let option = self.advance(&mut lex, false)?;
                        if option != TokenKind::Identifier {
                            return Err(self.fail("Identifier expected after ':if'."));
                        }
                        let frame = if !self.active() {
                            EmitMode::SkipAll
                        } else if self.is_true(lex.token().raw) {
                            EmitMode::Active
                        } else {
                            EmitMode::Inactive
                        };
                        self.emit_mode.push(frame);
                        kind = self.advance(&mut lex, true)?;
                    } else if lex.expect(":unless") {
                        let option = self.advance(&mut lex, false)?;
                        if option != TokenKind::Identifier {
                            return Err(self.fail("Identifier expected after ':unless'."));
                        }
                        let frame = if !self.active() {
                            EmitMode::SkipAll
                        } else if !self.is_true(lex.token().raw) {
                            EmitMode::Active
                        } else {
                            EmitMode::Inactive
                        };
                        self.emit_mode.push(frame);
                        kind = self.advance(&mut lex, true)?;
                    } else if lex.expect(":else") {
                        match self.emit_mode.last_mut() {
                            Some(top) => {
                                *top = if *top == EmitMode::Inactive {
                                    EmitMode::Active
                                } else {
                                    EmitMode::SkipAll
                                };
                            }
                            None => {
                                return Err(
                                    self.fail("Use of ':else' without ':if' or ':unless'.")
                                );
                            }
                        }
                        kind = self.advance(&mut lex, true)?;
                    } else if lex.expect(":end") {
                        if self.emit_mode.pop().is_none() {
                            return Err(self.fail("Use of ':end' without ':if' or ':unless'."));
                        }
                        kind = self.advance(&mut lex, true)?;
                    } else if lex.expect(":dump-options") {
                        // ignored for now
                        kind = self.advance(&mut lex, true)?;
                    } else {
                        warn!("ignoring unsupported directive {}", lex.token().raw);
                        lex.consume_rest_of_line();
                        kind = self.advance(&mut lex, true)?;
                    }
                }
                TokenKind::Directive if lex.expect(":const") && self.active() => {
                    self.write_prefix(lex.token());
                    self.write_raw(lex.token());
                    let name_kind = self.advance(&mut lex, false)?;
                    if name_kind != TokenKind::Identifier && name_kind != TokenKind::String {
                        return Err(self.fail("Identifier expected after ':const'."));
                    }
                    let const_name = lex.token().raw.to_string();
                    self.write_prefix(lex.token());
                    self.write_raw(lex.token());
                    let value_kind = self.advance(&mut lex, false)?;
                    if value_kind != TokenKind::Identifier && value_kind != TokenKind::Number {
                        return Err(
                            self.fail("Number or identifier expected after ':const <name>'.")
                        );
                    }
                    self.write_prefix(lex.token());
                    self.write_raw(lex.token());
                    if value_kind == TokenKind::Number {
                        self.define(const_name, Define::Number(lex.token().number));
                    }
                    kind = self.advance(&mut lex, false)?;
                }
                _ => {
                    self.write_prefix(lex.token());
                    self.write_raw(lex.token());
                    kind = self.advance(&mut lex, false)?;
                }
            }
        }
        self.flush_segment();
        Ok(())
    }

    /// Fetch the next token, keeping the include-chain positions in sync.
    fn advance(&mut self, lex: &mut Lexer<'_>, preproc: bool) -> Result<TokenKind, PrepError> {
        match lex.next_token(preproc) {
            Ok(kind) => {
                self.sync_position(lex.token());
                Ok(kind)
            }
            Err(err) => {
                self.sync_position(lex.token());
                Err(self.fail(err.message))
            }
        }
    }

    fn sync_position(&mut self, token: &Token<'_>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = token.line;
            frame.column = token.column;
        }
    }

    /// Build an error carrying the current include chain, innermost first.
    fn fail(&self, message: impl Into<String>) -> PrepError {
        let mut locations = Vec::new();
        for (index, frame) in self.frames.iter().rev().enumerate() {
            locations.push(Location {
                file: frame.filename.clone(),
                line: frame.line,
                column: frame.column,
                role: if index == 0 {
                    LocationRole::Root
                } else {
                    LocationRole::Included
                },
            });
        }
        PrepError {
            message: message.into(),
            locations,
        }
    }

    fn active(&self) -> bool {
        self.emit_mode
            .last()
            .map(|mode| *mode == EmitMode::Active)
            .unwrap_or(true)
    }

    fn resolve_file(&self, file: &Path) -> Result<PathBuf, PrepError> {
        if file.is_absolute() {
            if file.exists() {
                return Ok(file.to_path_buf());
            }
        } else {
            if let Some(frame) = self.frames.last() {
                if let Some(parent) = Path::new(&frame.filename).parent() {
                    let candidate = parent.join(file);
                    if candidate.exists() {
                        return Ok(candidate);
                    }
                }
            }
            if file.exists() {
                return Ok(file.to_path_buf());
            }
            for path in &self.include_paths {
                let candidate = path.join(file);
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }
        Err(self.fail(format!("File not found: '{}'", file.display())))
    }

    //-----------------------------------------------------------
    //  Output collection
    //-----------------------------------------------------------

    fn write_prefix(&mut self, token: &Token<'_>) {
        if !token.prefix.is_empty() {
            let prefix = token.prefix.to_string();
            self.do_write(&prefix, Some(token.prefix_line));
        }
    }

    fn write_raw(&mut self, token: &Token<'_>) {
        if !token.raw.is_empty() {
            let raw = token.raw.to_string();
            self.do_write(&raw, Some(token.line));
        }
    }

    /// Generated text has no source line of its own; no marker is
    /// produced for it.
    fn write_generated(&mut self, text: &str) {
        if !text.is_empty() {
            self.do_write(text, None);
        }
    }

    fn do_write(&mut self, text: &str, line: Option<u32>) {
        if self.generate_line_infos {
            if let Some(line) = line {
                let stale = match (self.collect_location_stack.last(), self.frames.last()) {
                    (Some((last_line, last_file)), Some(frame)) => {
                        *last_line != line || *last_file != frame.filename
                    }
                    _ => true,
                };
                if stale {
                    let mut location_stack: Vec<(u32, String)> = self
                        .frames
                        .iter()
                        .map(|frame| (frame.line, frame.filename.clone()))
                        .collect();
                    if let Some(last) = location_stack.last_mut() {
                        last.0 = line;
                    }
                    let mut common = 0;
                    while common < self.collect_location_stack.len()
                        && common < location_stack.len()
                        && self.collect_location_stack[common] == location_stack[common]
                    {
                        common += 1;
                    }
                    if self.active() {
                        self.collect.push('\n');
                        for (index, (marker_line, marker_file)) in
                            location_stack.iter().enumerate().skip(common)
                        {
                            self.collect.push_str(&format!(
                                "#@line[{},{},{}]\n",
                                index + 1,
                                marker_line,
                                marker_file
                            ));
                        }
                    }
                    self.collect_location_stack = location_stack;
                }
            }
        }
        if let Some(last) = self.collect_location_stack.last_mut() {
            last.0 += text.matches('\n').count() as u32;
        }
        if self.active() {
            self.collect.push_str(text);
        }
    }

    fn flush_segment(&mut self) {
        let segment = std::mem::take(&mut self.collect);
        match self.current_segment {
            Segment::Code => self.code_segments.push(segment),
            Segment::Data => self.data_segments.push(segment),
        }
        self.collect_location_stack.clear();
    }

    //-----------------------------------------------------------
    //  Image includes
    //-----------------------------------------------------------

    /// Expand an image file into sprite data, one `:` label per sprite
    /// (named `STEM-COL-ROW`) and one `0b` byte per 8-pixel column per row.
    fn include_image(
        &mut self,
        lex: &mut Lexer<'_>,
        path: &Path,
    ) -> Result<TokenKind, PrepError> {
        let mut size_hint: Option<(u32, u32)> = None;
        let mut gen_labels = true;
        let mut debug_sprites = false;

        let mut kind = self.advance(lex, true)?;
        loop {
            match kind {
                TokenKind::SpriteSize => {
                    size_hint = Some(lex.token().sprite_size().ok_or_else(|| {
                        self.fail(format!(
                            "Bad sprite size for image include: '{}'",
                            lex.token().raw
                        ))
                    })?);
                }
                TokenKind::Identifier if lex.token().text == "no-labels" => gen_labels = false,
                TokenKind::Identifier if lex.token().text == "debug" => debug_sprites = true,
                _ => break,
            }
            kind = self.advance(lex, true)?;
        }

        let img = image::open(path)
            .map_err(|_| self.fail(format!("Could not load image: '{}'", path.display())))?
            .to_luma8();
        let (width, height) = img.dimensions();

        let (sprite_width, sprite_height) = match size_hint {
            Some(hint) => hint,
            None if width == 16 && height == 16 => (16, 16),
            None => {
                let mut rows = 1;
                while height % rows != 0 || height / rows >= 16 {
                    rows += 1;
                }
                (8, height / rows)
            }
        };
        if sprite_width == 0 || sprite_height == 0 {
            return Err(self.fail(format!(
                "Bad sprite size for image include: '{}x{}'",
                sprite_width, sprite_height
            )));
        }
        if width % sprite_width != 0 {
            return Err(self.fail(format!("Image needs to be divisible by {}.", sprite_width)));
        }
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        if debug_sprites {
            debug!("Sprite dimension: {}x{}", sprite_width, sprite_height);
        }

        let mut y = 0;
        while y < height {
            let mut x = 0;
            while x < width {
                if gen_labels {
                    self.write_generated(&format!(
                        "\n: {}-{}-{}\n",
                        stem,
                        x / 8,
                        y / sprite_height
                    ));
                }
                for row in 0..sprite_height {
                    self.write_generated(" ");
                    let mut debug_row = String::new();
                    for col in 0..sprite_width / 8 {
                        let mut value: u8 = 0;
                        for bit in 0..8 {
                            let px = img.get_pixel(x + col * 8 + bit, y + row)[0];
                            if px > 128 {
                                value |= 0x80 >> bit;
                            }
                            if debug_sprites {
                                debug_row.push_str(if px > 128 { "██" } else { "░░" });
                            }
                        }
                        self.write_generated(&format!(" 0b{:08b}", value));
                    }
                    if debug_sprites {
                        debug!("{}", debug_row);
                    }
                    self.write_generated("\n");
                }
                x += sprite_width;
            }
            y += sprite_height;
        }
        Ok(kind)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|extension| {
            let extension = extension.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.iter().any(|known| *known == extension)
        })
        .unwrap_or(false)
}

fn whitespace_lines_at_start(text: &str) -> usize {
    let mut count = 0;
    for c in text.chars() {
        if !c.is_whitespace() {
            break;
        }
        if c == '\n' {
            count += 1;
        }
    }
    count
}

fn whitespace_lines_at_end(text: &str) -> usize {
    let mut count = 0;
    for c in text.chars().rev() {
        if !c.is_whitespace() {
            break;
        }
        if c == '\n' {
            count += 1;
        }
    }
    count
}
