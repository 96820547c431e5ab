use octoasm::Compiler;

fn assemble(source: &str) -> Vec<u8> {
    let mut compiler = Compiler::new();
    let result = compiler.compile_source("test.8o", source);
    assert!(!result.is_error(), "unexpected error: {}", result);
    compiler.code().to_vec()
}

fn assemble_err(source: &str) -> String {
    let mut compiler = Compiler::new();
    let result = compiler.compile_source("test.8o", source);
    assert!(result.is_error(), "expected an error");
    result.message.clone()
}

#[test]
fn test_tiny_program() {
    // main lands on the start address, so the reserved trampoline is
    // reclaimed and the ROM starts with main's first instruction.
    let rom = assemble(": main\n  va := 0xBC\n  loop again\n");
    assert_eq!(rom, [0x6A, 0xBC, 0x12, 0x02]);
}

#[test]
fn test_trampoline_kept_when_main_is_not_first() {
    let rom = assemble(":byte 1\n: main v0 := 5\n");
    assert_eq!(rom, [0x12, 0x03, 0x01, 0x60, 0x05]);
}

#[test]
fn test_forward_reference_12bit() {
    let rom = assemble(": main  jump later\n  :byte 0 :byte 0\n: later  ;\n");
    assert_eq!(rom, [0x12, 0x04, 0x00, 0x00, 0x00, 0xEE]);
}

#[test]
fn test_bare_label_call_forward() {
    let rom = assemble(": main\nfoo\n;\n: foo ;\n");
    assert_eq!(rom, [0x22, 0x04, 0x00, 0xEE, 0x00, 0xEE]);
}

#[test]
fn test_macro_expansion_with_calls() {
    let rom = assemble(":macro PUSH x { v0 := x }\n: main  PUSH 1  PUSH 2\n");
    assert_eq!(rom, [0x60, 0x01, 0x60, 0x02]);

    let rom = assemble(":macro tag { :byte CALLS }\n: main tag tag tag\n");
    assert_eq!(rom, [0x00, 0x01, 0x02]);
}

#[test]
fn test_macro_missing_arguments() {
    let message = assemble_err(":macro two a b { :byte a :byte b }\n: main two 1");
    assert!(message.contains("Not enough arguments"), "{message}");
}

#[test]
fn test_string_mode() {
    let rom = assemble(
        ":stringmode nibble \"0123456789ABCDEF\" { :byte VALUE }\n: main  nibble \"1A2\"\n",
    );
    assert_eq!(rom, [0x01, 0x0A, 0x02]);
}

#[test]
fn test_string_mode_synthetic_bindings() {
    let rom = assemble(
        ":stringmode ascii \"AB\" { :byte CHAR :byte INDEX :byte VALUE }\n: main ascii \"BA\"\n",
    );
    assert_eq!(rom, [66, 0, 1, 65, 1, 0]);
}

#[test]
fn test_string_mode_unknown_character() {
    let message = assemble_err(
        ":stringmode nibble \"0123456789ABCDEF\" { :byte VALUE }\n: main nibble \"1x\"\n",
    );
    assert!(
        message.contains("not defined for the character 'x'"),
        "{message}"
    );
}

#[test]
fn test_overlap_error() {
    let message = assemble_err(":org 0x200  :byte 1  :org 0x200  :byte 2\n");
    assert!(message.contains("Data overlap"), "{message}");
    assert!(message.contains("0x200"), "{message}");

    let message = assemble_err(": main\nva := 1\nvb := 2\n:org 0x202\nv0 := 3\n");
    assert!(message.contains("Data overlap"), "{message}");
    assert!(message.contains("0x202"), "{message}");
}

#[test]
fn test_org_forward_is_fine() {
    let rom = assemble(": main\nva := 1\n:org 0x208\n:byte 0xEE\n");
    assert_eq!(rom.len(), 9);
    assert_eq!(&rom[..2], &[0x6A, 0x01]);
    assert_eq!(rom[8], 0xEE);
}

#[test]
fn test_unresolved_prototype() {
    let message = assemble_err(": main  jump nowhere\n");
    assert!(
        message.contains("Undefined forward reference: nowhere"),
        "{message}"
    );
}

#[test]
fn test_missing_main() {
    let message = assemble_err(": start\nva := 1\n;\n");
    assert!(message.contains("missing a 'main' label"), "{message}");
}

#[test]
fn test_4bit_range_boundary() {
    let rom = assemble(": main scroll-down 15\n");
    assert_eq!(rom, [0x00, 0xCF]);

    let message = assemble_err(": main scroll-down 16\n");
    assert!(message.contains("does not fit in 4 bits"), "{message}");
}

#[test]
fn test_8bit_range_boundary() {
    let rom = assemble(": main v0 := -128\n");
    assert_eq!(rom, [0x60, 0x80]);

    let message = assemble_err(": main v0 := 256\n");
    assert!(message.contains("does not fit in a byte"), "{message}");
}

#[test]
fn test_register_operations() {
    let rom = assemble(
        ": main\nv0 := v1\nv0 += v1\nv0 -= v1\nv0 |= v1\nv0 &= v1\nv0 ^= v1\n\
         v0 =- v1\nv0 >>= v1\nv0 <<= v1\nv0 += 5\nv0 -= 5\n;\n",
    );
    assert_eq!(
        rom,
        [
            0x80, 0x10, 0x80, 0x14, 0x80, 0x15, 0x80, 0x11, 0x80, 0x12, 0x80, 0x13, 0x80, 0x17,
            0x80, 0x16, 0x80, 0x1E, 0x70, 0x05, 0x70, 0xFB, 0x00, 0xEE
        ]
    );
}

#[test]
fn test_statement_surface() {
    let rom = assemble(
        ": main\nclear\nbcd v2\ndelay := v3\nbuzzer := v3\nv4 := delay\nv5 := key\n\
         v6 := random 0x0F\ni := hex v7\ni := bighex v8\ni += v9\nsprite v1 v2 3\n\
         save v3\nload v4\nsave v1 - v2\nload v1 - v2\nsaveflags v2\nloadflags v2\n\
         audio\nplane 3\npitch := v1\nscroll-down 4\nscroll-up 5\nscroll-right\n\
         scroll-left\nexit\nlores\nhires\nnative 0x123\njump0 0x234\n:call 0x456\n",
    );
    assert_eq!(
        rom,
        [
            0x00, 0xE0, 0xF2, 0x33, 0xF3, 0x15, 0xF3, 0x18, 0xF4, 0x07, 0xF5, 0x0A, 0xC6, 0x0F,
            0xF7, 0x29, 0xF8, 0x30, 0xF9, 0x1E, 0xD1, 0x23, 0xF3, 0x55, 0xF4, 0x65, 0x51, 0x22,
            0x51, 0x23, 0xF2, 0x75, 0xF2, 0x85, 0xF0, 0x02, 0xF3, 0x01, 0xF1, 0x3A, 0x00, 0xC4,
            0x00, 0xD5, 0x00, 0xFB, 0x00, 0xFC, 0x00, 0xFD, 0x00, 0xFE, 0x00, 0xFF, 0x01, 0x23,
            0xB2, 0x34, 0x24, 0x56
        ]
    );
}

#[test]
fn test_if_then_polarity() {
    let rom = assemble(": main\nif v0 == 5 then clear\n;\n");
    assert_eq!(rom, [0x40, 0x05, 0x00, 0xE0, 0x00, 0xEE]);

    let rom = assemble(": main\nif v0 != v1 then clear\n;\n");
    assert_eq!(rom, [0x50, 0x10, 0x00, 0xE0, 0x00, 0xEE]);

    let rom = assemble(": main\nif v0 key then clear\n;\n");
    assert_eq!(rom, [0xE0, 0xA1, 0x00, 0xE0, 0x00, 0xEE]);

    let rom = assemble(": main\nif v0 -key then clear\n;\n");
    assert_eq!(rom, [0xE0, 0x9E, 0x00, 0xE0, 0x00, 0xEE]);
}

#[test]
fn test_pseudo_conditional_scratches_vf() {
    let rom = assemble(": main\nif v0 > 5 then clear\n;\n");
    assert_eq!(
        rom,
        [0x6F, 0x05, 0x8F, 0x05, 0x4F, 0x00, 0x00, 0xE0, 0x00, 0xEE]
    );
}

#[test]
fn test_if_begin_else_end() {
    let rom = assemble(": main\nif v0 == 1 begin\n  v1 := 2\nelse\n  v1 := 3\nend\n;\n");
    assert_eq!(
        rom,
        [0x30, 0x01, 0x12, 0x08, 0x61, 0x02, 0x12, 0x0A, 0x61, 0x03, 0x00, 0xEE]
    );
}

#[test]
fn test_loop_while_again() {
    let rom = assemble(": main\nloop\n  while v0 != 0\n  v0 += 1\nagain\n;\n");
    assert_eq!(
        rom,
        [0x40, 0x00, 0x12, 0x08, 0x70, 0x01, 0x12, 0x00, 0x00, 0xEE]
    );
}

#[test]
fn test_dangling_control_flow() {
    let message = assemble_err(": main\nloop\n;\n");
    assert!(message.contains("'loop' does not have a matching 'again'"), "{message}");

    let message = assemble_err(": main\nagain\n");
    assert!(message.contains("'again' does not have a matching 'loop'"), "{message}");

    let message = assemble_err(": main\nif v0 == 1 begin\n;\n");
    assert!(message.contains("does not have a matching 'end'"), "{message}");

    let message = assemble_err(": main\nend\n");
    assert!(message.contains("'end' does not have a matching 'begin'"), "{message}");

    let message = assemble_err(": main\nwhile v0 == 1\n;\n");
    assert!(message.contains("'while' is not within a loop"), "{message}");
}

#[test]
fn test_i_long_forward_reference() {
    let rom = assemble(": main\ni := long data\n;\n: data :byte 0xAA\n");
    assert_eq!(rom, [0xF0, 0x00, 0x02, 0x06, 0x00, 0xEE, 0xAA]);
}

#[test]
fn test_pointer_directives() {
    let rom = assemble(": main\n:pointer data\n;\n: data :byte 1\n");
    assert_eq!(rom, [0x02, 0x04, 0x00, 0xEE, 0x01]);

    let rom = assemble(": main\n:pointer24 data\n;\n: data :byte 1\n");
    assert_eq!(rom, [0x00, 0x02, 0x05, 0x00, 0xEE, 0x01]);
}

#[test]
fn test_unpack() {
    let rom = assemble(": main\n:unpack 0xA label\n;\n: label :byte 1\n");
    assert_eq!(rom, [0x60, 0xA2, 0x61, 0x06, 0x00, 0xEE, 0x01]);

    let rom = assemble(": main\n:unpack long label\n;\n: label :byte 1\n");
    assert_eq!(rom, [0x60, 0x02, 0x61, 0x06, 0x00, 0xEE, 0x01]);
}

#[test]
fn test_unpack_custom_aliases() {
    let rom = assemble(
        ":alias unpack-hi v5\n:alias unpack-lo v6\n: main\n:unpack 0x2 label\n;\n: label\n",
    );
    // 0x206 is past the last emitted byte; the label still patches.
    assert_eq!(rom, [0x65, 0x22, 0x66, 0x06, 0x00, 0xEE]);
}

#[test]
fn test_next_label() {
    let rom = assemble(": main\n:next half\nv0 := 0xAB\n:byte { half }\n");
    assert_eq!(rom, [0x60, 0xAB, 0x01]);
}

#[test]
fn test_const_and_calc() {
    let rom = assemble(":const speed 0x42\n: main\nva := speed\n;\n");
    assert_eq!(rom, [0x6A, 0x42, 0x00, 0xEE]);

    // :calc may re-bind a mutable constant, :const may not be redefined.
    let rom = assemble(
        ":calc x { 1 }\n:calc x { x + 1 }\n: main\nva := x\n;\n",
    );
    assert_eq!(rom, [0x6A, 0x02, 0x00, 0xEE]);

    let message = assemble_err(":const x 1\n:const x 2\n: main ;\n");
    assert!(message.contains("already been defined"), "{message}");

    let message = assemble_err(":const x 1\n:calc x { 2 }\n: main ;\n");
    assert!(message.contains("Cannot redefine"), "{message}");
}

#[test]
fn test_calc_is_right_associative() {
    // No precedence climbing: binary operators consume the whole rest of
    // the expression, so 3 - 1 - 1 is 3 - (1 - 1).
    let rom = assemble(":calc x { 3 - 1 - 1 }\n: main\nva := x\n;\n");
    assert_eq!(rom, [0x6A, 0x03, 0x00, 0xEE]);
}

#[test]
fn test_calc_terminals_and_rom_peek() {
    let rom = assemble(": main\n:byte { 5 min 3 }\n:byte { @ 0x200 }\n");
    assert_eq!(rom, [0x03, 0x03]);

    let rom = assemble(": main\n:byte { HERE & 0xFF }\n");
    assert_eq!(rom, [0x00]);
}

#[test]
fn test_calc_forward_reference_is_fatal() {
    let message = assemble_err(": main\njump later\n:calc x { later }\n: later ;\n");
    assert!(message.contains("forward declaration"), "{message}");
}

#[test]
fn test_assert() {
    let message = assemble_err(": main\n:assert \"math is broken\" { 1 == 2 }\n;\n");
    assert!(message.contains("Assertion failed: math is broken"), "{message}");

    let rom = assemble(": main\n:assert { 2 == 2 }\n;\n");
    assert_eq!(rom, [0x00, 0xEE]);
}

#[test]
fn test_alias() {
    let rom = assemble(":alias px v3\n: main\npx := 9\n;\n");
    assert_eq!(rom, [0x63, 0x09, 0x00, 0xEE]);

    let rom = assemble(":alias py { 4 }\n: main\npy := 2\n;\n");
    assert_eq!(rom, [0x64, 0x02, 0x00, 0xEE]);

    let message = assemble_err(":alias bad { 16 }\n: main ;\n");
    assert!(message.contains("range [0,F]"), "{message}");
}

#[test]
fn test_reserved_names_rejected() {
    let message = assemble_err(":const loop 1\n: main ;\n");
    assert!(message.contains("reserved"), "{message}");

    let message = assemble_err(":const OCTO_THING 1\n: main ;\n");
    assert!(message.contains("reserved"), "{message}");

    let message = assemble_err(":alias foo v1\n: foo\n: main ;\n");
    assert!(message.contains("already used by an alias"), "{message}");
}

#[test]
fn test_value_errors_name_the_problem() {
    let message = assemble_err(": main\nva := vb2\n;\n");
    assert!(message.contains("undefined name 'vb2'"), "{message}");

    let message = assemble_err(": main\nva := loop\n;\n");
    assert!(message.contains("keyword 'loop'"), "{message}");
}

#[test]
fn test_custom_start_address() {
    let mut compiler = Compiler::new();
    compiler.set_start_address(0x300);
    let result = compiler.compile_source("test.c8x", ": main\nva := 1\nloop again\n");
    assert!(!result.is_error(), "{result}");
    assert_eq!(compiler.code(), [0x6A, 0x01, 0x13, 0x02]);
}

#[test]
fn test_rom_growth_past_64k() {
    let mut compiler = Compiler::new();
    let result = compiler.compile_source(
        "test.8o",
        ": main ;\n:org { 0x10000 }\n:byte 5\n",
    );
    assert!(!result.is_error(), "{result}");
    let rom = compiler.code();
    assert_eq!(rom.len(), 0x10001 - 0x200);
    assert_eq!(rom[rom.len() - 1], 5);
    assert_eq!(&rom[..2], &[0x00, 0xEE]);
}

#[test]
fn test_breakpoints_and_content_hash() {
    let mut with_bp = Compiler::new();
    with_bp.generate_line_infos(false);
    let result = with_bp.compile_source(
        "test.8o",
        ": main\n:breakpoint here-we-go\nva := 1\n;\n",
    );
    assert!(!result.is_error(), "{result}");
    assert_eq!(with_bp.breakpoint_for_addr(0x200), Some("here-we-go"));
    assert_eq!(with_bp.breakpoint_for_addr(0x202), None);

    let mut without_bp = Compiler::new();
    without_bp.generate_line_infos(false);
    without_bp.compile_source("test.8o", ": main\nva := 1\n;\n");

    assert_eq!(with_bp.code(), without_bp.code());
    assert_ne!(with_bp.sha1_hex(), without_bp.sha1_hex());
}

#[test]
fn test_line_map() {
    let mut compiler = Compiler::new();
    compiler.generate_line_infos(false);
    let result = compiler.compile_source("test.8o", ": main\nva := 1\nvb := 2\n;\n");
    assert!(!result.is_error(), "{result}");
    // The map records the scanner position at emission time: fetching the
    // last operand token of a line also consumes its newline, so bytes of
    // line N land on zero-based line N+1 of the flattened source.
    assert_eq!(compiler.line_for_addr(0x200), 2);
    assert_eq!(compiler.line_for_addr(0x202), 3);
    assert_eq!(compiler.line_for_addr(0x204), 4);
    assert_eq!(compiler.line_for_addr(0x1FF), 0xFFFF_FFFF);

    assert_eq!(compiler.addr_for_line(2), (0x200, 0x201));
    assert_eq!(compiler.addr_for_line(3), (0x202, 0x203));
    assert_eq!(compiler.addr_for_line(0), (0xFFFF_FFFF, 0xFFFF_FFFF));
}

#[test]
fn test_monitors_are_metadata_only() {
    let mut compiler = Compiler::new();
    let result = compiler.compile_source(
        "test.8o",
        ": main\n:monitor va 4\n:monitor 0x300 16\n;\n",
    );
    assert!(!result.is_error(), "{result}");
    assert_eq!(compiler.code(), [0x00, 0xEE]);
    let assembly = compiler.assembly().unwrap();
    assert_eq!(assembly.monitors().len(), 2);
}

#[test]
fn test_monitor_with_format_string() {
    let mut compiler = Compiler::new();
    let result = compiler.compile_source(
        "test.8o",
        ": main\n:monitor 0x280 \"%2x %2x\"\n;\n",
    );
    assert!(!result.is_error(), "{result}");
    let assembly = compiler.assembly().unwrap();
    let monitor = assembly.monitors().values().next().unwrap();
    assert_eq!(monitor.len, -1);
    assert_eq!(monitor.format.as_str(), "%2x %2x");
}

#[test]
fn test_error_location_points_at_line() {
    let mut compiler = Compiler::new();
    compiler.generate_line_infos(false);
    let result = compiler.compile_source("test.8o", ": main\nva := 1\njump nowhere\n");
    assert!(result.is_error());
    assert_eq!(result.locations.len(), 1);
    // The undefined forward reference is reported where it was used.
    assert_eq!(result.locations[0].line, 3);
}
