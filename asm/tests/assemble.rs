use asm::{assemble, AssembledProgram, Severity, TextPosition};

fn validate(program: &AssembledProgram, text: &[u32], data: &[u32]) {
    assert!(
        program.diagnostics.is_empty(),
        "expected no diagnostics, got {:?}",
        program.diagnostics
    );
    assert_eq!(program.text, text, "text section mismatch");
    assert_eq!(program.data, data, "data section mismatch");
}

#[test]
fn itype_program() {
    let source = "
\t.text
\t\taddi x1, x0, 1
\t\taddi x2, x0, 2
\t";
    validate(&assemble(source), &[0x00100093, 0x00200113], &[]);
}

#[test]
fn branches_and_labels() {
    let source = "
\t.text
\t\tlabel1: addi x1, x0, 1
\t\taddi x2, x0, 2
\t\tbeq x1, x2, label1 # should evaluate to -8
\t";
    validate(&assemble(source), &[0x00100093, 0x00200113, 0xFE208CE3], &[]);
}

#[test]
fn jumps() {
    let source = "
\t.text
\t\tjal x1, label1
\t\taddi x2, x0, 2
\t\tlabel1: addi x3, x0, 3
\t";
    validate(&assemble(source), &[0x008000EF, 0x00200113, 0x00300193], &[]);
}

#[test]
fn data_word() {
    let source = "
\t.data
\tMyWord: .word 0x12345678
\t";
    validate(&assemble(source), &[], &[0x12345678]);
}

#[test]
fn data_string() {
    let source = "
\t.data
\tMyString: .ascii \"Hello World!\"
\t";
    validate(
        &assemble(source),
        &[],
        &[0x6C6C6548, 0x6F57206F, 0x21646C72, 0x00000000],
    );
}

#[test]
fn data_label_reference() {
    let source = "
\t.data
\tMyWord: .word 0x12345678
\t.text
\tlw x1, MyWord(gp)
\t";
    validate(&assemble(source), &[0x0001A083], &[0x12345678]);
}

#[test]
fn register_aliases_expand() {
    // zero/sp/a0 spellings must encode identically to x0/x2/x10
    let a = assemble(".text\naddi a0, zero, 5\n");
    let b = assemble(".text\naddi x10, x0, 5\n");
    assert!(a.diagnostics.is_empty());
    assert_eq!(a.text, b.text);
}

#[test]
fn nop_expands() {
    let a = assemble(".text\nnop\n");
    let b = assemble(".text\naddi x0, x0, 0\n");
    assert!(a.diagnostics.is_empty());
    assert_eq!(a.text, b.text);
}

#[test]
fn srai_sets_function_bit() {
    let program = assemble(".text\nsrai x5, x6, 3\n");
    assert!(program.diagnostics.is_empty());
    // srli with bit 10 of the immediate set
    assert_eq!(program.text, &[0x40335293]);
}

#[test]
fn space_rounds_up_alloc_does_not() {
    let program = assemble(".data\nbuf: .space 5\n");
    assert_eq!(program.data.len(), 2);

    let program = assemble(".data\nbuf: .alloc 5\n");
    assert_eq!(program.data.len(), 5);
}

#[test]
fn word_lists() {
    let program = assemble(".data\ntbl: .word 1, 2, 3, -1\n");
    assert!(program.diagnostics.is_empty());
    assert_eq!(program.data, &[1, 2, 3, 0xFFFFFFFF]);
}

#[test]
fn immediate_overflow_reported() {
    let program = assemble(".text\naddi x1, x0, 5000\n");
    assert_eq!(program.diagnostics.len(), 1);
    assert_eq!(program.diagnostics[0].severity, Severity::Error);
    assert!(program.text.is_empty(), "overflowing instruction must be dropped");
}

#[test]
fn negative_immediate_bounds() {
    assert!(assemble(".text\naddi x1, x0, -2048\n").diagnostics.is_empty());
    assert_eq!(assemble(".text\naddi x1, x0, -2049\n").diagnostics.len(), 1);
    assert!(assemble(".text\naddi x1, x0, 2047\n").diagnostics.is_empty());
}

#[test]
fn hex_immediates_sign_extend() {
    // 0xFFF in a 12-bit signed field reads as -1
    let a = assemble(".text\naddi x1, x0, 0xFFF\n");
    let b = assemble(".text\naddi x1, x0, -1\n");
    assert!(a.diagnostics.is_empty(), "{:?}", a.diagnostics);
    assert_eq!(a.text, b.text);
}

#[test]
fn invalid_instruction_reported() {
    let program = assemble(".text\nfrobnicate x1, x2, x3\n");
    assert_eq!(program.diagnostics.len(), 1);
    assert!(program.diagnostics[0].message.contains("frobnicate"));
}

#[test]
fn invalid_register_reported() {
    let program = assemble(".text\nadd x1, x99, x3\n");
    assert_eq!(program.diagnostics.len(), 1);
    assert!(program.diagnostics[0].message.contains("x99"));
}

#[test]
fn special_register_write_drops_instruction() {
    let program = assemble(".text\nadd sp, x1, x2\nadd x5, x1, x2\n");
    assert_eq!(program.diagnostics.len(), 1);
    assert_eq!(program.diagnostics[0].severity, Severity::Warning);
    // only the second instruction survives, at address 0
    assert_eq!(program.text.len(), 1);
}

#[test]
fn jal_requires_label() {
    let program = assemble(".text\njal x1, 16\n");
    assert_eq!(program.diagnostics.len(), 1);
    assert_eq!(program.diagnostics[0].severity, Severity::Warning);
    assert!(program.text.is_empty());
}

#[test]
fn branch_to_missing_label() {
    let program = assemble(".text\nbeq x1, x2, nowhere\n");
    assert_eq!(program.diagnostics.len(), 1);
    assert!(program.diagnostics[0].message.contains("nowhere"));
}

#[test]
fn label_too_far_reported() {
    let mut source = String::from(".text\nstart: addi x1, x0, 1\n");
    for _ in 0..1100 {
        source.push_str("addi x2, x0, 2\n");
    }
    source.push_str("beq x1, x2, start\n");
    let program = assemble(&source);
    assert_eq!(program.diagnostics.len(), 1);
    assert!(program.diagnostics[0].message.contains("too far"));
}

#[test]
fn diagnostics_do_not_stop_assembly() {
    let program = assemble(".text\nadd x1, x99, x3\naddi x1, x0, 1\n");
    assert_eq!(program.diagnostics.len(), 1);
    assert_eq!(program.text, &[0x00100093]);
}

#[test]
fn label_kinds_recorded() {
    let source = ".data\nD: .word 1\n.text\nT: addi x1, x0, 1\n";
    let program = assemble(source);
    assert_eq!(program.labels["D"], 0);
    assert_eq!(program.labels["T"], 0);
    assert_eq!(program.label_kinds["D"], asm::LabelKind::Data);
    assert_eq!(program.label_kinds["T"], asm::LabelKind::Text);
}

#[test]
fn reassembly_is_stable() {
    let source = ".text\nl: addi x1, x0, 1\nbeq x1, x0, l\n";
    let reformatted = ".text\n   l:    addi x1, x0, 1\n   beq x1, x0, l\n";
    assert_eq!(assemble(source).text, assemble(reformatted).text);
}

// ----------------------------------------------------------------------------
// Hover

#[test]
fn hover_on_mnemonic() {
    let program = assemble(".text\naddi x1, x0, 1\n");
    let text = program
        .evaluate_hover(TextPosition { line: 1, character: 1 })
        .expect("hover on mnemonic");
    assert!(text.contains("Addition Immediate"));
}

#[test]
fn hover_on_register_operand() {
    let program = assemble(".text\naddi x1, x0, 1\n");
    let text = program
        .evaluate_hover(TextPosition { line: 1, character: 5 })
        .expect("hover on rd");
    assert!(text.contains("Return Address Register"));
}

#[test]
fn hover_on_label_definition() {
    let program = assemble(".text\nloop: addi x1, x0, 1\n");
    let text = program
        .evaluate_hover(TextPosition { line: 1, character: 2 })
        .expect("hover on label definition");
    assert!(text.contains("Definition of label `loop`"));
}

#[test]
fn hover_on_blank_line_is_none() {
    let program = assemble(".text\naddi x1, x0, 1\n\n");
    assert!(program
        .evaluate_hover(TextPosition { line: 2, character: 0 })
        .is_none());
}
