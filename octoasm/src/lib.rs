//! Assembler tool-chain for the CHIP-8 family of virtual machines.
//!
//! The pipeline: source text runs through the [`prep::Preprocessor`]
//! (includes, conditionals, segments, image expansion), the flattened
//! output is compiled by the single-pass [`asm::Program`] assembler, and
//! the result is exposed with a [`debug::DebugInfo`] map for external
//! debuggers. [`Compiler`] drives the whole pipeline and reports
//! structured [`diag::CompileResult`] diagnostics.
pub mod asm;
pub mod debug;
pub mod diag;
pub mod lexer;
pub mod options;
pub mod prep;
pub mod tokens;

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::asm::{Assembly, Program};
use crate::debug::DebugInfo;
use crate::diag::{CompileResult, SourceLocation};
use crate::prep::{Define, PrepError, Preprocessor};

pub const IMPL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default load address of CHIP-8 programs.
pub const DEFAULT_START_ADDRESS: usize = 0x200;

pub mod prelude {
    pub use crate::asm::{Assembly, Program};
    pub use crate::debug::DebugInfo;
    pub use crate::diag::{CompileResult, Location, LocationRole, Severity};
    pub use crate::lexer::{Lexer, Mode};
    pub use crate::prep::{Define, Preprocessor};
    pub use crate::Compiler;
}

/// Start address for a source or ROM path, judged by its extension.
/// CHIP-8X programs load at `0x300`.
pub fn start_address_for_file(path: &Path) -> usize {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("c8x") => 0x300,
        _ => DEFAULT_START_ADDRESS,
    }
}

/// Drives preprocess → assemble → debug-map for one program.
pub struct Compiler {
    prep: Preprocessor,
    start_address: usize,
    generate_line_infos: bool,
    result: CompileResult,
    preprocessed: Option<String>,
    assembly: Option<Assembly>,
    debug_info: Option<DebugInfo>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            prep: Preprocessor::new(),
            start_address: DEFAULT_START_ADDRESS,
            generate_line_infos: true,
            result: CompileResult::default(),
            preprocessed: None,
            assembly: None,
            debug_info: None,
        }
    }

    pub fn set_start_address(&mut self, start_address: usize) {
        self.start_address = start_address;
    }

    pub fn set_include_paths(&mut self, paths: &[PathBuf]) {
        self.prep.set_include_paths(paths);
    }

    /// Bind a preprocessor symbol, as the `-D` command line option does.
    pub fn define(&mut self, name: impl Into<String>, value: Define) {
        self.prep.define(name, value);
    }

    pub fn generate_line_infos(&mut self, value: bool) {
        self.generate_line_infos = value;
        self.prep.generate_line_infos(value);
    }

    pub fn result(&self) -> &CompileResult {
        &self.result
    }

    pub fn is_error(&self) -> bool {
        self.result.is_error()
    }

    /// Preprocess and compile a set of files; segments from all of them
    /// are concatenated before assembly.
    pub fn compile_files(&mut self, files: &[PathBuf]) -> &CompileResult {
        for file in files {
            if let Err(err) = self.prep.preprocess_file(file) {
                return self.fail_prep(err);
            }
        }
        let filename = files
            .first()
            .map(|file| file.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source = self.prep.dump_segments();
        self.assemble(&filename, source)
    }

    pub fn compile_file(&mut self, file: &Path) -> &CompileResult {
        let files = [file.to_path_buf()];
        self.compile_files(&files)
    }

    /// Preprocess and compile an in-memory source buffer.
    pub fn compile_source(&mut self, filename: &str, source: &str) -> &CompileResult {
        if let Err(err) = self.prep.preprocess_source(filename, source) {
            return self.fail_prep(err);
        }
        let flattened = self.prep.dump_segments();
        self.assemble(filename, flattened)
    }

    /// Compile text that has already been preprocessed (or never needs it).
    pub fn assemble_source(&mut self, filename: &str, source: &str) -> &CompileResult {
        self.assemble(filename, source.to_string())
    }

    /// Preprocess only; fetch the result with [`Compiler::dump_segments`].
    pub fn preprocess_file(&mut self, file: &Path) -> &CompileResult {
        if let Err(err) = self.prep.preprocess_file(file) {
            return self.fail_prep(err);
        }
        self.result.reset();
        &self.result
    }

    pub fn dump_segments(&self) -> String {
        self.prep.dump_segments()
    }

    fn fail_prep(&mut self, err: PrepError) -> &CompileResult {
        self.result = err.into();
        &self.result
    }

    fn assemble(&mut self, filename: &str, source: String) -> &CompileResult {
        debug!("compiling ...");
        self.assembly = None;
        self.debug_info = None;
        let mut program = Program::new(&source, self.start_address);
        match program.compile() {
            Ok(()) => {
                let assembly = program.into_assembly();
                info!("generated {} bytes of output", assembly.code_size());
                self.debug_info = Some(DebugInfo::new(&assembly));
                self.assembly = Some(assembly);
                self.result.reset();
            }
            Err(err) => {
                let location = SourceLocation {
                    file: filename.to_string(),
                    line: err.line,
                    column: err.pos,
                };
                self.result =
                    diag::synthesize(&location, &source, &err.message, self.generate_line_infos);
            }
        }
        self.preprocessed = Some(source);
        &self.result
    }

    /// The flattened source the assembler last consumed.
    pub fn preprocessed_source(&self) -> Option<&str> {
        self.preprocessed.as_deref()
    }

    pub fn assembly(&self) -> Option<&Assembly> {
        self.assembly.as_ref()
    }

    pub fn code(&self) -> &[u8] {
        self.assembly.as_ref().map(Assembly::data).unwrap_or(&[])
    }

    pub fn code_size(&self) -> usize {
        self.assembly.as_ref().map(Assembly::code_size).unwrap_or(0)
    }

    pub fn sha1_hex(&self) -> &str {
        self.debug_info.as_ref().map(DebugInfo::sha1_hex).unwrap_or("")
    }

    pub fn line_for_addr(&self, addr: u32) -> u32 {
        self.assembly
            .as_ref()
            .map(|assembly| assembly.line_for_addr(addr))
            .unwrap_or(debug::UNMAPPED)
    }

    pub fn addr_for_line(&self, line: u32) -> (u32, u32) {
        self.debug_info
            .as_ref()
            .map(|info| info.addr_for_line(line))
            .unwrap_or((debug::UNMAPPED, debug::UNMAPPED))
    }

    pub fn breakpoint_for_addr(&self, addr: u32) -> Option<&str> {
        self.assembly
            .as_ref()
            .and_then(|assembly| assembly.breakpoint_for_addr(addr))
    }
}
