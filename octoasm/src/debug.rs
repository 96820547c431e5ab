//! Source-level debug metadata for a finished assembly.
//!
//! External debuggers consume four queries: line-for-address,
//! address-range-for-line, breakpoint-for-address and a content hash. The
//! hash covers the emitted bytes *and* the breakpoint labels, so two ROMs
//! with identical bytes but different breakpoints hash differently.
use sha1::{Digest, Sha1};

use crate::asm::Assembly;

pub const UNMAPPED: u32 = 0xFFFF_FFFF;

pub struct DebugInfo {
    sha1_hex: String,
    line_coverage: Vec<(u32, u32)>,
}

impl DebugInfo {
    pub fn new(assembly: &Assembly) -> Self {
        Self {
            sha1_hex: content_hash(assembly),
            line_coverage: line_coverage(assembly),
        }
    }

    /// Hex SHA-1 over the code bytes mixed with `addr:name` breakpoint
    /// records.
    pub fn sha1_hex(&self) -> &str {
        &self.sha1_hex
    }

    /// Smallest and largest address produced from a source line, or
    /// `(UNMAPPED, UNMAPPED)` when the line emitted nothing.
    pub fn addr_for_line(&self, line: u32) -> (u32, u32) {
        self.line_coverage
            .get(line as usize)
            .copied()
            .unwrap_or((UNMAPPED, UNMAPPED))
    }
}

fn content_hash(assembly: &Assembly) -> String {
    let mut hasher = Sha1::new();
    hasher.update(assembly.data());
    for addr in 0..=assembly.last_address_used() as u32 {
        if let Some(name) = assembly.breakpoint_for_addr(addr) {
            hasher.update(format!("{:04x}:{}", addr, name).as_bytes());
        }
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

fn line_coverage(assembly: &Assembly) -> Vec<(u32, u32)> {
    let mut coverage = vec![(UNMAPPED, UNMAPPED); assembly.num_source_lines() as usize + 1];
    for addr in 0..=assembly.last_address_used() as u32 {
        let line = assembly.line_for_addr(addr);
        if let Some(range) = coverage.get_mut(line as usize) {
            if range.0 == UNMAPPED || range.0 > addr {
                range.0 = addr;
            }
            if range.1 == UNMAPPED || range.1 < addr {
                range.1 = addr;
            }
        }
    }
    coverage
}
