//! Structured compile diagnostics.
//!
//! A [`CompileResult`] carries a severity, a message and a stack of source
//! locations running outward: the innermost frame is where the problem is,
//! each `:include` contributes a frame, and macro instantiation may add
//! more. When the assembler reports an error against preprocessed text,
//! [`synthesize`] walks the `#@line[depth,line,file]` markers the
//! preprocessor left behind to rebuild the original file positions.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Ok,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationRole {
    Root,
    Included,
    Instantiated,
}

#[derive(Debug, Clone)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub role: LocationRole,
}

/// A position in a concrete source file, before marker reconstruction.
#[derive(Debug, Clone, Default)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CompileResult {
    pub severity: Severity,
    pub message: String,
    pub locations: Vec<Location>,
}

impl CompileResult {
    pub fn reset(&mut self) {
        self.severity = Severity::Ok;
        self.message.clear();
        self.locations.clear();
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn error(message: impl Into<String>, locations: Vec<Location>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            locations,
        }
    }
}

impl fmt::Display for CompileResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Ok => "ok",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match self.locations.first() {
            Some(root) => write!(
                f,
                "{}:{}:{}: {}: {}",
                root.file, root.line, root.column, tag, self.message
            )?,
            None => write!(f, "{}: {}", tag, self.message)?,
        }
        for frame in self.locations.iter().skip(1) {
            let origin = match frame.role {
                LocationRole::Included => "included from",
                LocationRole::Instantiated => "instantiated from",
                LocationRole::Root => "from",
            };
            write!(f, "\n{}:{}: info: {}", frame.file, frame.line, origin)?;
        }
        Ok(())
    }
}

/// File position parsed out of a `#@line[depth,line,file]` marker.
#[derive(Debug, Clone, Default)]
struct FilePos {
    file: String,
    depth: i32,
    line: u32,
}

/// Parse the interior of a marker. Returns a zero-line `FilePos` when the
/// text is not a well-formed marker.
fn extract_file_pos(info: &str) -> FilePos {
    let inner = match info.strip_prefix("#@line[") {
        Some(inner) => inner,
        None => return FilePos::default(),
    };
    let mut parts = inner.splitn(3, ',');
    let depth = parts.next().and_then(|p| p.parse::<i32>().ok());
    let line = parts.next().and_then(|p| p.parse::<u32>().ok());
    match (depth, line, parts.next()) {
        (Some(depth), Some(line), Some(file)) => FilePos {
            file: file.to_string(),
            depth,
            line,
        },
        _ => FilePos::default(),
    }
}

/// Build an error result for a location in preprocessed text.
///
/// `location.line` is 1-based within `source`. When line markers were
/// generated, the marker stream up to the error line is replayed to
/// recover the original include chain; otherwise the location is reported
/// as-is.
pub fn synthesize(
    location: &SourceLocation,
    source: &str,
    message: &str,
    generate_line_infos: bool,
) -> CompileResult {
    if generate_line_infos {
        let bytes = source.as_bytes();
        let mut stack: Vec<FilePos> = Vec::new();
        let mut ep = FilePos::default();
        let mut line = 1u32;
        let mut file_line = 1u32;
        let mut i = 0usize;
        while i < bytes.len() && line != location.line {
            if bytes[i] == b'\n' {
                line += 1;
                file_line += 1;
            }
            if bytes.len() - i > 10 && bytes[i + 1] == b'#' && bytes[i + 2] == b'@' {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j] != b'\n' && bytes[j] != b']' {
                    j += 1;
                }
                if j < bytes.len() && bytes[j] == b']' {
                    ep = extract_file_pos(&source[i + 1..j]);
                    if let Some(top) = stack.last_mut() {
                        top.line = file_line;
                    }
                    if ep.line != 0 {
                        while stack.last().map(|t| t.depth > ep.depth).unwrap_or(false) {
                            stack.pop();
                        }
                        if stack.last().map(|t| t.depth < ep.depth).unwrap_or(true) {
                            stack.push(ep.clone());
                        } else {
                            *stack.last_mut().expect("stack checked non-empty") = ep.clone();
                        }
                        file_line = ep.line.saturating_sub(1);
                    }
                }
            }
            i += 1;
        }
        if !ep.file.is_empty() {
            let mut locations = Vec::new();
            let mut inner = true;
            while let Some(top) = stack.pop() {
                locations.push(Location {
                    file: top.file,
                    line: if inner { file_line } else { top.line },
                    column: if inner { location.column } else { 0 },
                    role: if inner {
                        LocationRole::Root
                    } else {
                        LocationRole::Included
                    },
                });
                inner = false;
            }
            return CompileResult::error(message, locations);
        }
    }
    CompileResult::error(
        message,
        vec![Location {
            file: location.file.clone(),
            line: location.line,
            column: location.column,
            role: LocationRole::Root,
        }],
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_extract_file_pos() {
        let fp = extract_file_pos("#@line[2,14,lib/util.8o");
        assert_eq!(fp.depth, 2);
        assert_eq!(fp.line, 14);
        assert_eq!(fp.file, "lib/util.8o");

        assert_eq!(extract_file_pos("#@line[garbage").line, 0);
    }

    #[test]
    fn test_synthesize_through_markers() {
        // Lines 1-2 come from main.8o, the marker switches to util.8o at
        // its line 5, and the error sits two lines into that region.
        let source = "\n#@line[1,1,main.8o]\n: main\n\n#@line[2,5,util.8o]\nva := 99\nbad bad\n";
        let location = SourceLocation {
            file: "out.8o".to_string(),
            line: 7,
            column: 3,
        };
        let result = synthesize(&location, source, "Undefined name.", true);
        assert_eq!(result.severity, Severity::Error);
        assert_eq!(result.locations.len(), 2);
        assert_eq!(result.locations[0].file, "util.8o");
        assert_eq!(result.locations[0].role, LocationRole::Root);
        assert_eq!(result.locations[0].line, 6);
        assert_eq!(result.locations[0].column, 3);
        assert_eq!(result.locations[1].file, "main.8o");
        assert_eq!(result.locations[1].role, LocationRole::Included);
    }

    #[test]
    fn test_synthesize_without_markers() {
        let location = SourceLocation {
            file: "prog.8o".to_string(),
            line: 3,
            column: 1,
        };
        let result = synthesize(&location, "a\nb\nc\n", "boom", false);
        assert_eq!(result.locations.len(), 1);
        assert_eq!(result.locations[0].file, "prog.8o");
        assert_eq!(result.locations[0].line, 3);
    }
}
