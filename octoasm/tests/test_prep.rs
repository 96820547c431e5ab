use std::fs;
use std::path::PathBuf;

use octoasm::diag::LocationRole;
use octoasm::prep::Define;
use octoasm::Compiler;

/// Fresh scratch directory for tests that need real files on disk.
fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("octoasm-test-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_include_chain_compiles() {
    let dir = temp_dir("include");
    fs::write(dir.join("util.8o"), ": blit\n  sprite v0 v1 8\n;\n").unwrap();
    fs::write(dir.join("main.8o"), ": main\n  blit\n;\n:include \"util.8o\"\n").unwrap();

    let mut compiler = Compiler::new();
    let result = compiler.compile_file(&dir.join("main.8o"));
    assert!(!result.is_error(), "{result}");
    assert_eq!(
        compiler.code(),
        [0x22, 0x04, 0x00, 0xEE, 0xD0, 0x18, 0x00, 0xEE]
    );
}

#[test]
fn test_error_chain_through_includes() {
    let dir = temp_dir("chain");
    fs::write(dir.join("bad.8o"), "va := undefined-name\n").unwrap();
    fs::write(dir.join("main.8o"), ": main ;\n:include \"bad.8o\"\n").unwrap();

    let mut compiler = Compiler::new();
    let result = compiler.compile_file(&dir.join("main.8o"));
    assert!(result.is_error());
    assert!(result.message.contains("undefined-name"), "{result}");
    assert!(result.locations.len() >= 2, "{result}");
    assert!(result.locations[0].file.ends_with("bad.8o"));
    assert_eq!(result.locations[0].role, LocationRole::Root);
    let outer = result.locations.last().unwrap();
    assert!(outer.file.ends_with("main.8o"));
    assert_eq!(outer.role, LocationRole::Included);
}

#[test]
fn test_missing_include_is_reported() {
    let dir = temp_dir("missing");
    fs::write(dir.join("main.8o"), ": main ;\n:include \"nope.8o\"\n").unwrap();

    let mut compiler = Compiler::new();
    let result = compiler.compile_file(&dir.join("main.8o"));
    assert!(result.is_error());
    assert!(result.message.contains("File not found"), "{result}");
}

#[test]
fn test_include_search_path() {
    let dir = temp_dir("searchpath");
    let libs = dir.join("libs");
    fs::create_dir_all(&libs).unwrap();
    fs::write(libs.join("util.8o"), ": blit ;\n").unwrap();
    fs::write(dir.join("main.8o"), ": main blit ;\n:include \"util.8o\"\n").unwrap();

    let mut compiler = Compiler::new();
    compiler.set_include_paths(&[libs]);
    let result = compiler.compile_file(&dir.join("main.8o"));
    assert!(!result.is_error(), "{result}");
}

#[test]
fn test_defines_drive_conditionals() {
    let mut compiler = Compiler::new();
    compiler.define("TURBO", Define::Number(1.0));
    let source = ": main\n:if TURBO\nva := 1\n:else\nva := 2\n:end\n;\n";
    let result = compiler.compile_source("main.8o", source);
    assert!(!result.is_error(), "{result}");
    assert_eq!(compiler.code(), [0x6A, 0x01, 0x00, 0xEE]);

    let mut compiler = Compiler::new();
    let result = compiler.compile_source("main.8o", source);
    assert!(!result.is_error(), "{result}");
    assert_eq!(compiler.code(), [0x6A, 0x02, 0x00, 0xEE]);
}

#[test]
fn test_segment_reordering_compiles() {
    // Data segments are appended after all code segments, so the sprite
    // bytes land behind the instructions regardless of source order.
    let source = ": main\n  i := glyph\n;\n:segment data\n: glyph\n  0xF0 0x90 0xF0\n:segment code\n";
    let mut compiler = Compiler::new();
    let result = compiler.compile_source("main.8o", source);
    assert!(!result.is_error(), "{result}");
    assert_eq!(compiler.code(), [0xA2, 0x04, 0x00, 0xEE, 0xF0, 0x90, 0xF0]);
}

#[test]
fn test_preprocessed_source_round_trip() {
    let dir = temp_dir("roundtrip");
    fs::write(
        dir.join("main.8o"),
        ": main  # entry\n  va := 1\n  loop again\n",
    )
    .unwrap();

    let mut compiler = Compiler::new();
    compiler.generate_line_infos(false);
    let result = compiler.preprocess_file(&dir.join("main.8o"));
    assert!(!result.is_error(), "{result}");
    let flattened = compiler.dump_segments();
    assert_eq!(flattened, ": main  # entry\n  va := 1\n  loop again\n");
}
