use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextPosition {
    pub line: usize,
    pub character: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextRange {
    pub start: TextPosition,
    pub end: TextPosition,
}

impl TextRange {
    pub fn new(line: usize, start: usize, end: usize) -> TextRange {
        TextRange {
            start: TextPosition { line, character: start },
            end: TextPosition { line, character: end },
        }
    }
}

/// LSP severity values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl Serialize for Severity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub range: TextRange,
    pub message: String,
    pub source: &'static str,
    pub severity: Severity,
}

impl Diagnostic {
    fn error(range: TextRange, message: String) -> Diagnostic {
        Diagnostic { range, message, source: "Assembler", severity: Severity::Error }
    }

    fn warning(range: TextRange, message: String) -> Diagnostic {
        Diagnostic { range, message, source: "Assembler", severity: Severity::Warning }
    }
}

/// Shrinks the range to the non-whitespace span of the offending token.
fn adjust_range(mut r: TextRange, text: &str) -> (TextRange, &str) {
    let mut text = text;
    while let Some(rest) = text.strip_prefix(' ') {
        text = rest;
        r.start.character += 1;
    }
    while let Some(rest) = text.strip_suffix(' ') {
        text = rest;
        r.end.character -= 1;
    }
    (r, text)
}

// ----------------------------------------------------------------------------
// Errors

pub fn invalid_data_section_value(value: &str, r: TextRange) -> Diagnostic {
    let (r, value) = adjust_range(r, value);
    Diagnostic::error(r, format!("Invalid data section value: \"{value}\""))
}

pub fn invalid_data_section(section_type: &str, r: TextRange) -> Diagnostic {
    Diagnostic::error(r, format!("Invalid data section: \"{section_type}\""))
}

pub fn invalid_symbol_name(symbol: &str, context: &str, r: TextRange) -> Diagnostic {
    let (r, symbol) = adjust_range(r, symbol);
    Diagnostic::error(r, format!("Invalid symbol name: \"{symbol}\", {context}"))
}

pub fn unresolved_symbol_name(symbol: &str, r: TextRange) -> Diagnostic {
    let (r, symbol) = adjust_range(r, symbol);
    Diagnostic::error(r, format!("Unresolved symbol name: \"{symbol}\", "))
}

pub fn invalid_integer_literal(literal: &str, r: TextRange) -> Diagnostic {
    let (r, literal) = adjust_range(r, literal);
    Diagnostic::error(r, format!("Expected integer literal, got: \"{literal}\""))
}

pub fn invalid_unsigned_integer_literal(literal: &str, r: TextRange) -> Diagnostic {
    let (r, literal) = adjust_range(r, literal);
    Diagnostic::error(r, format!("Expected unsigned integer literal, got: \"{literal}\""))
}

pub fn invalid_register(register: &str, r: TextRange) -> Diagnostic {
    let (r, register) = adjust_range(r, register);
    Diagnostic::error(r, format!("Expected register, got: \"{register}\""))
}

pub fn immediate_overflow(value: &str, max_size: u32, r: TextRange) -> Diagnostic {
    let (r, value) = adjust_range(r, value);
    let half = 1i64 << (max_size - 1);
    Diagnostic::error(
        r,
        format!("Immediate value \"{value}\" is out of range of {max_size} bits [-{half}, {half})"),
    )
}

pub fn unsigned_immediate_overflow(value: &str, max_size: u32, r: TextRange) -> Diagnostic {
    let (r, value) = adjust_range(r, value);
    let full = 1i64 << max_size;
    Diagnostic::error(
        r,
        format!("Immediate value \"{value}\" is too large. Must be less than {max_size} bits ({full})"),
    )
}

pub fn invalid_instruction_format(format: &str, opcode: &str, r: TextRange) -> Diagnostic {
    Diagnostic::error(r, format!("Invalid instruction format for {opcode}\nFormat: {format}"))
}

pub fn invalid_instruction(instruction: &str, r: TextRange) -> Diagnostic {
    let (r, instruction) = adjust_range(r, instruction);
    Diagnostic::error(r, format!("Invalid instruction: \"{instruction}\""))
}

pub fn invalid_expression(expression: &str, r: TextRange) -> Diagnostic {
    let (r, expression) = adjust_range(r, expression);
    Diagnostic::error(r, format!("Invalid expression: \"{expression}\""))
}

pub fn other(message: String, r: TextRange) -> Diagnostic {
    Diagnostic::error(r, message)
}

pub fn label_too_far(label: &str, r: TextRange) -> Diagnostic {
    let (r, label) = adjust_range(r, label);
    Diagnostic::error(
        r,
        format!("Label \"{label}\" is too far away and the immediate value overflows. Use jal or auipc instead"),
    )
}

// ----------------------------------------------------------------------------
// Warnings

pub fn unused_label(label: &str, r: TextRange) -> Diagnostic {
    let (r, label) = adjust_range(r, label);
    Diagnostic::warning(r, format!("Unused label: \"{label}\""))
}

pub fn unintended_sign_extension(value: &str, r: TextRange) -> Diagnostic {
    let (r, value) = adjust_range(r, value);
    Diagnostic::warning(r, format!("Possible unintended sign extension of \"{value}\""))
}

pub fn explicit_number_literal_for_label(r: TextRange) -> Diagnostic {
    Diagnostic::warning(r, "Explicit number literal used instead of label".to_string())
}

pub fn label_used_for_number_literal(r: TextRange) -> Diagnostic {
    Diagnostic::warning(
        r,
        "Label used instead of numeric literal for instructions expecting a numeric literal".to_string(),
    )
}

pub fn immediate_bits_will_be_discarded(value: &str, r: TextRange) -> Diagnostic {
    let (r, value) = adjust_range(r, value);
    Diagnostic::warning(r, format!("Lower 12 bits of \"{value}\" will be discarded"))
}

pub fn modifying_special_register(register: &str, r: TextRange) -> Diagnostic {
    let (r, register) = adjust_range(r, register);
    Diagnostic::warning(
        r,
        format!("Modifying special register \"{register}\". The instruction will not be assembled"),
    )
}
