use indexmap::IndexMap;
use std::collections::HashMap;

use arch::{
    decode_btype, decode_itype, decode_jtype, decode_stype, decode_utype, get_opcode, make_btype,
    make_itype, make_jtype, make_rtype, make_stype, make_utype, OPCODE_AUIPC, OPCODE_BTYPE,
    OPCODE_ITYPE, OPCODE_JAL, OPCODE_JALR, OPCODE_LUI, OPCODE_MEM_ITYPE, OPCODE_STYPE,
};

use crate::diag::{self, Diagnostic, TextRange};
use crate::eval::{is_valid_symbol_name, EvalError, EvalKind, Evaluation};

/// The registers that user code is warned away from clobbering.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub special_registers: Vec<String>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        AssemblerConfig {
            special_registers: ["zero", "ra", "sp", "gp", "tp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Text,
    Data,
}

#[derive(Debug, Clone)]
struct LinkRequest {
    label: String,
    /// Address of the emitted word, relative to the start of the text section.
    address: u32,
    /// Branches resolve PC-relative; everything else resolves absolute.
    is_branch: bool,
}

#[derive(Debug, Default)]
pub struct AssembledProgram {
    /// Label name to address. Text labels are byte offsets into the text
    /// section; data labels are byte offsets into the data section (the
    /// loader adds the data base).
    pub labels: IndexMap<String, u32>,
    pub label_kinds: IndexMap<String, LabelKind>,
    pub label_lines: IndexMap<String, usize>,
    /// Text byte address to source line. Populated only for instructions.
    pub address_to_line: IndexMap<u32, usize>,
    pub text: Vec<u32>,
    pub data: Vec<u32>,
    pub diagnostics: Vec<Diagnostic>,

    pub(crate) lines: Vec<String>,
    /// Characters consumed from the front of each line by a label prefix.
    pub(crate) line_deltas: HashMap<usize, usize>,
    link_requests: Vec<LinkRequest>,
    current_address: u32,
    special_registers: Vec<String>,
}

pub fn assemble(input: &str) -> AssembledProgram {
    assemble_with_config(input, &AssemblerConfig::default())
}

pub fn assemble_with_config(input: &str, config: &AssemblerConfig) -> AssembledProgram {
    let mut program = AssembledProgram {
        lines: input.split('\n').map(str::to_string).collect(),
        special_registers: config.special_registers.clone(),
        ..Default::default()
    };

    // labels first, so the line parser can tell symbols from labels
    program.extract_labels();
    program.parse_lines();
    program.resolve_link_requests();
    program
}

/// Trims the cutset from both ends and reports how many characters were
/// removed from the front.
fn trim_front_count(s: &str) -> (&str, usize) {
    let cutset: &[char] = &[' ', '\t', '\r'];
    let trimmed = s.trim_matches(cutset);
    (trimmed, s.len() - s.trim_start_matches(cutset).len())
}

impl AssembledProgram {
    fn extract_labels(&mut self) {
        for i in 0..self.lines.len() {
            let original = self.lines[i].clone();
            let (line, diff) = trim_front_count(&original);
            let line = match line.find('#') {
                Some(p) => &line[..p],
                None => line,
            };
            if let Some(colon) = line.find(':') {
                let label = &line[..colon];
                if let Err(reason) = is_valid_symbol_name(label) {
                    self.diagnostics.push(diag::invalid_symbol_name(
                        label,
                        reason,
                        TextRange::new(i, diff, diff + colon + 1),
                    ));
                    continue;
                }
                // line number as a placeholder; pass 2 assigns the address
                self.labels.insert(label.to_string(), i as u32);
                self.label_lines.insert(label.to_string(), i);
                self.lines[i] = line[colon + 1..].to_string();
                self.line_deltas.insert(i, colon + 1);
            }
        }
    }

    fn parse_lines(&mut self) {
        let mut text_section = false;
        for i in 0..self.lines.len() {
            let original = self.lines[i].clone();
            let (line, mut diff) = trim_front_count(&original);
            if let Some(&old) = self.line_deltas.get(&i) {
                diff += old;
            }

            // tabs were one column wide in the original text
            let mut line = line.replace('\t', " ");

            // a line that is nothing but a macro (say, nop) expands in place
            if let Some(expansion) = arch::tables::MACROS.get(line.to_ascii_lowercase().as_str()) {
                line = expansion.clone();
            }

            let line = line.split('#').next().unwrap_or("");
            let line = line.trim_end_matches([' ', '\t', '\r']);

            let directive = line.trim_start_matches([' ', '\t', '\r']);
            if directive.starts_with(".text") || directive.starts_with(".data") {
                text_section = directive.starts_with(".text");
            } else if text_section {
                // a label on this line gets the current text address
                let here: Vec<String> = self
                    .label_lines
                    .iter()
                    .filter(|(_, &l)| l == i)
                    .map(|(k, _)| k.clone())
                    .collect();
                for label in here {
                    self.labels.insert(label.clone(), self.current_address);
                    self.label_kinds.insert(label, LabelKind::Text);
                }

                if line.is_empty() {
                    continue;
                }

                let opcode = line
                    .split(' ')
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                let emitted = match opcode.as_str() {
                    "add" | "sub" | "xor" | "or" | "and" | "sll" | "srl" | "sra" | "slt"
                    | "sltu" | "mul" | "mulhsu" | "mulh" | "mulu" | "mulhu" | "div" | "divu"
                    | "rem" | "remu" => self.parse_rtype(line, diff, i, &opcode),
                    "addi" | "slti" | "sltiu" | "xori" | "ori" | "andi" | "slli" | "srli"
                    | "srai" | "jalr" => self.parse_itype(line, diff, i, &opcode),
                    "lb" | "lh" | "lw" | "lbu" | "lhu" => {
                        self.parse_itype_mem(line, diff, i, &opcode)
                    }
                    "sb" | "sh" | "sw" => self.parse_stype(line, diff, i, &opcode),
                    "beq" | "bne" | "blt" | "bge" | "bltu" | "bgeu" => {
                        self.parse_btype(line, diff, i, &opcode)
                    }
                    "jal" => self.parse_jtype(line, diff, i, &opcode),
                    "lui" | "auipc" => self.parse_utype(line, diff, i, &opcode),
                    "ecall" | "ebreak" => self.parse_no_args(line, diff, i, &opcode),
                    _ => {
                        self.diagnostics.push(diag::invalid_instruction(
                            &opcode,
                            TextRange::new(i, diff, diff + opcode.len()),
                        ));
                        None
                    }
                };
                if let Some(code) = emitted {
                    self.text.push(code);
                }
            } else {
                // a label on this line gets the current data offset
                let here: Vec<String> = self
                    .label_lines
                    .iter()
                    .filter(|(_, &l)| l == i)
                    .map(|(k, _)| k.clone())
                    .collect();
                for label in here {
                    self.labels.insert(label.clone(), (self.data.len() * 4) as u32);
                    self.label_kinds.insert(label, LabelKind::Data);
                }

                if line.is_empty() {
                    continue;
                }

                self.parse_data_line(line, diff, i);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Text-section parsers, one per syntactic family

    fn parse_rtype(&mut self, line: &str, diff: usize, line_num: usize, opcode: &str) -> Option<u32> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 3 {
            self.diagnostics.push(diag::invalid_instruction_format(
                "<opcode> <reg>, <reg>, <reg>",
                opcode,
                TextRange::new(line_num, diff, diff + line.len()),
            ));
            return None;
        }
        let space = match parts[0].find(' ') {
            Some(p) => p,
            None => {
                self.diagnostics.push(diag::invalid_instruction_format(
                    "<opcode> <reg>, <reg>, <reg>",
                    opcode,
                    TextRange::new(line_num, diff, diff + parts[0].len()),
                ));
                return None;
            }
        };
        let operand1 = &parts[0][space + 1..];

        let dest = match self.evaluate(operand1, 0, false) {
            Ok(r) if r.kind == EvalKind::Register => r,
            _ => {
                let offset = diff + opcode.len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    operand1,
                    TextRange::new(line_num, offset, offset + operand1.len()),
                ));
                return None;
            }
        };
        if self.special_registers.iter().any(|r| r == operand1) {
            let offset = diff + opcode.len() + 1;
            self.diagnostics.push(diag::modifying_special_register(
                operand1,
                TextRange::new(line_num, offset, offset + operand1.len()),
            ));
            return None;
        }

        let op1 = match self.evaluate(parts[1], 0, false) {
            Ok(r) if r.kind == EvalKind::Register => r,
            _ => {
                let offset = diff + opcode.len() + 1 + operand1.len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    parts[1],
                    TextRange::new(line_num, offset, offset + parts[1].len()),
                ));
                return None;
            }
        };
        let op2 = match self.evaluate(parts[2], 0, false) {
            Ok(r) if r.kind == EvalKind::Register => r,
            _ => {
                let offset = diff + opcode.len() + 1 + operand1.len() + 1 + parts[1].len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    parts[2],
                    TextRange::new(line_num, offset, offset + parts[2].len()),
                ));
                return None;
            }
        };

        let (op_num, funct7, funct3) = match opcode {
            "add" => (0b0110011, 0b0000000, 0b000),
            "sub" => (0b0110011, 0b0100000, 0b000),
            "xor" => (0b0110011, 0b0000000, 0b100),
            "or" => (0b0110011, 0b0000000, 0b110),
            "and" => (0b0110011, 0b0000000, 0b111),
            "sll" => (0b0110011, 0b0000000, 0b001),
            "srl" => (0b0110011, 0b0000000, 0b101),
            "sra" => (0b0110011, 0b0100000, 0b101),
            "slt" => (0b0110011, 0b0000000, 0b010),
            "sltu" => (0b0110011, 0b0000000, 0b011),
            "mul" => (0b0110011, 0b0000001, 0b000),
            "div" => (0b0110011, 0b0000001, 0b100),
            "divu" => (0b0110011, 0b0000001, 0b101),
            "rem" => (0b0110011, 0b0000001, 0b110),
            "remu" => (0b0110011, 0b0000001, 0b111),
            // "mulu" appears on some reference cards; it encodes as mulhu
            "mulu" | "mulhu" => (0b0110011, 0b0000001, 0b011),
            "mulh" => (0b0110011, 0b0000001, 0b001),
            "mulhsu" => (0b0110011, 0b0000001, 0b010),
            _ => unreachable!(),
        };

        self.address_to_line.insert(self.current_address, line_num);
        self.current_address += 4;
        Some(make_rtype(
            op_num,
            dest.value as u32,
            op1.value as u32,
            op2.value as u32,
            funct7,
            funct3,
        ))
    }

    fn parse_itype(&mut self, line: &str, diff: usize, line_num: usize, opcode: &str) -> Option<u32> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 3 {
            self.diagnostics.push(diag::invalid_instruction_format(
                "<opcode> <reg>, <reg>, <imm>",
                opcode,
                TextRange::new(line_num, diff, diff + line.len()),
            ));
            return None;
        }
        let space = match parts[0].find(' ') {
            Some(p) => p,
            None => {
                self.diagnostics.push(diag::invalid_instruction_format(
                    "<opcode> <reg>, <reg>, <imm>",
                    opcode,
                    TextRange::new(line_num, diff, diff + parts[0].len()),
                ));
                return None;
            }
        };
        let operand1 = &parts[0][space + 1..];

        let (de_op, funct3, unsigned, is_sra) = match opcode {
            "addi" => (0b0010011, 0b000, false, false),
            "xori" => (0b0010011, 0b100, false, false),
            "ori" => (0b0010011, 0b110, false, false),
            "andi" => (0b0010011, 0b111, false, false),
            "slli" => (0b0010011, 0b001, true, false),
            "srli" => (0b0010011, 0b101, true, false),
            "srai" => (0b0010011, 0b101, true, true),
            "slti" => (0b0010011, 0b010, false, false),
            "sltiu" => (0b0010011, 0b011, true, false),
            "jalr" => (0b1100111, 0b000, false, false),
            _ => unreachable!(),
        };

        let dest = match self.evaluate(operand1, 0, false) {
            Ok(r) if r.kind == EvalKind::Register => r,
            _ => {
                let offset = diff + opcode.len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    operand1,
                    TextRange::new(line_num, offset, offset + operand1.len()),
                ));
                return None;
            }
        };
        let op1 = match self.evaluate(parts[1], 0, false) {
            Ok(r) if r.kind == EvalKind::Register => r,
            _ => {
                let offset = diff + opcode.len() + 1 + operand1.len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    parts[1],
                    TextRange::new(line_num, offset, offset + parts[1].len()),
                ));
                return None;
            }
        };

        let op2_res = self.evaluate(parts[2], 12, !unsigned);
        let imm_overflow = matches!(op2_res, Err(EvalError::ImmediateOverflow(_)));
        let had_error = op2_res.is_err();
        let mut op2 = op2_res.unwrap_or(Evaluation {
            value: 0,
            kind: EvalKind::IntegerLiteral,
            matched: String::new(),
        });

        let imm_type_valid = if unsigned {
            matches!(op2.kind, EvalKind::UnsignedIntegerLiteral | EvalKind::Label)
        } else {
            op2.kind != EvalKind::Register
        };
        // overflow errors are handled below so the message can carry the range
        if (had_error && !imm_overflow) || !imm_type_valid {
            let offset = diff + opcode.len() + 1 + operand1.len() + 1 + parts[1].len() + 1;
            let range = TextRange::new(line_num, offset, offset + parts[2].len());
            self.diagnostics.push(if unsigned {
                diag::invalid_unsigned_integer_literal(parts[2], range)
            } else {
                diag::invalid_integer_literal(parts[2], range)
            });
            return None;
        }

        if !unsigned && op2.kind == EvalKind::UnsignedIntegerLiteral {
            op2.kind = EvalKind::IntegerLiteral;
        }
        match op2.kind {
            EvalKind::IntegerLiteral | EvalKind::Label => {
                if imm_overflow || op2.value > 2047 || op2.value < -2048 {
                    let offset = diff + opcode.len() + 1 + operand1.len() + 1 + parts[1].len() + 1;
                    self.diagnostics.push(diag::immediate_overflow(
                        parts[2],
                        12,
                        TextRange::new(line_num, offset, offset + parts[2].len()),
                    ));
                    return None;
                }
            }
            EvalKind::UnsignedIntegerLiteral => {
                let offset = diff + opcode.len() + 1 + operand1.len() + 1 + parts[1].len() + 1;
                if imm_overflow || op2.value > 4095 {
                    self.diagnostics.push(diag::unsigned_immediate_overflow(
                        parts[2],
                        12,
                        TextRange::new(line_num, offset, offset + parts[2].len()),
                    ));
                    return None;
                } else if !unsigned && op2.value > 2047 {
                    self.diagnostics.push(diag::unintended_sign_extension(
                        parts[2],
                        TextRange::new(line_num, offset, offset + parts[2].len()),
                    ));
                }
            }
            EvalKind::Register => {}
        }

        if op2.kind == EvalKind::Label {
            self.link_requests.push(LinkRequest {
                address: self.current_address,
                label: op2.matched.clone(),
                is_branch: false,
            });
        }

        let mut imm = op2.value as u32;
        if is_sra {
            // bit 10 distinguishes srai from srli
            imm |= 0b010000000000;
        }

        self.address_to_line.insert(self.current_address, line_num);
        self.current_address += 4;
        Some(make_itype(de_op, dest.value as u32, op1.value as u32, imm, funct3))
    }

    fn parse_itype_mem(&mut self, line: &str, diff: usize, line_num: usize, opcode: &str) -> Option<u32> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 2 {
            self.diagnostics.push(diag::invalid_instruction_format(
                "<opcode> <reg>, <imm>(<reg>)",
                opcode,
                TextRange::new(line_num, diff, diff + line.len()),
            ));
            return None;
        }
        let space = match parts[0].find(' ') {
            Some(p) => p,
            None => {
                self.diagnostics.push(diag::invalid_instruction_format(
                    "<opcode> <reg>, <imm>(<reg>)",
                    opcode,
                    TextRange::new(line_num, diff, diff + parts[0].len()),
                ));
                return None;
            }
        };
        let operand1 = &parts[0][space + 1..];

        let (open, close) = match (parts[1].find('('), parts[1].find(')')) {
            (Some(o), Some(c)) if o < c => (o, c),
            _ => {
                let start = diff + parts[0].len() + 1;
                self.diagnostics.push(diag::invalid_instruction_format(
                    "<opcode> <reg>, <imm>(<reg>)",
                    opcode,
                    TextRange::new(line_num, start, start + parts[1].len()),
                ));
                return None;
            }
        };
        let operand2 = &parts[1][..open];
        let operand3 = &parts[1][open + 1..close];

        let dest = match self.evaluate(operand1, 0, false) {
            Ok(r) => r,
            Err(_) => {
                let offset = diff + opcode.len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    operand1,
                    TextRange::new(line_num, offset, offset + operand1.len()),
                ));
                return None;
            }
        };

        let op2 = self.evaluate_reporting(operand2, 12, true, line_num, diff + parts[0].len() + 1)?;
        if op2.kind == EvalKind::Register {
            let start = diff + parts[0].len() + 1;
            self.diagnostics.push(diag::invalid_integer_literal(
                operand2,
                TextRange::new(line_num, start, start + operand2.len()),
            ));
            return None;
        }

        let op3 = match self.evaluate(operand3, 0, false) {
            Ok(r) if r.kind == EvalKind::Register => r,
            _ => {
                let offset = diff + line.find('(').unwrap_or(0) + 1;
                self.diagnostics.push(diag::invalid_register(
                    operand3,
                    TextRange::new(line_num, offset, offset + operand3.len()),
                ));
                return None;
            }
        };

        if op2.value < -2048 || op2.value > 2047 {
            let offset = diff + parts[0].len() + 1;
            self.diagnostics.push(diag::immediate_overflow(
                operand2,
                12,
                TextRange::new(line_num, offset, offset + operand2.len()),
            ));
            return None;
        }

        if op2.kind == EvalKind::Label {
            self.link_requests.push(LinkRequest {
                address: self.current_address,
                label: op2.matched.clone(),
                is_branch: false,
            });
        }

        let (de_op, funct3) = match opcode {
            "lb" => (0b0000011, 0b000),
            "lh" => (0b0000011, 0b001),
            "lw" => (0b0000011, 0b010),
            "lbu" => (0b0000011, 0b100),
            "lhu" => (0b0000011, 0b101),
            _ => unreachable!(),
        };

        self.address_to_line.insert(self.current_address, line_num);
        self.current_address += 4;
        Some(make_itype(
            de_op,
            dest.value as u32,
            op3.value as u32,
            op2.value as u32,
            funct3,
        ))
    }

    fn parse_stype(&mut self, line: &str, diff: usize, line_num: usize, opcode: &str) -> Option<u32> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 2 {
            self.diagnostics.push(diag::invalid_instruction_format(
                "<opcode> <reg>, <imm>(<reg>)",
                opcode,
                TextRange::new(line_num, diff, diff + line.len()),
            ));
            return None;
        }
        let space = match parts[0].find(' ') {
            Some(p) => p,
            None => {
                self.diagnostics.push(diag::invalid_instruction_format(
                    "<opcode> <reg>, <imm>(<reg>)",
                    opcode,
                    TextRange::new(line_num, diff, diff + parts[0].len()),
                ));
                return None;
            }
        };
        let operand1 = &parts[0][space + 1..];

        let (open, close) = match (parts[1].find('('), parts[1].find(')')) {
            (Some(o), Some(c)) if o < c => (o, c),
            _ => {
                let start = diff + parts[0].len() + 1;
                self.diagnostics.push(diag::invalid_instruction_format(
                    "<opcode> <reg>, <imm>(<reg>)",
                    opcode,
                    TextRange::new(line_num, start, start + parts[1].len()),
                ));
                return None;
            }
        };
        let operand2 = &parts[1][..open];
        let operand3 = &parts[1][open + 1..close];

        let src = match self.evaluate(operand1, 0, false) {
            Ok(r) => r,
            Err(_) => {
                let offset = diff + opcode.len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    operand1,
                    TextRange::new(line_num, offset, offset + operand1.len()),
                ));
                return None;
            }
        };

        let op2 = self.evaluate_reporting(operand2, 12, true, line_num, diff + parts[0].len() + 1)?;
        if op2.kind == EvalKind::Register {
            let start = diff + parts[0].len() + 1;
            self.diagnostics.push(diag::invalid_integer_literal(
                operand2,
                TextRange::new(line_num, start, start + operand2.len()),
            ));
            return None;
        }

        let op3 = match self.evaluate(operand3, 0, false) {
            Ok(r) if r.kind == EvalKind::Register => r,
            _ => {
                let offset = diff + line.find('(').unwrap_or(0) + 1;
                self.diagnostics.push(diag::invalid_register(
                    operand3,
                    TextRange::new(line_num, offset, offset + operand3.len()),
                ));
                return None;
            }
        };

        if op2.value < -2048 || op2.value > 2047 {
            let offset = diff + parts[0].len() + 1;
            self.diagnostics.push(diag::immediate_overflow(
                operand2,
                12,
                TextRange::new(line_num, offset, offset + operand2.len()),
            ));
            return None;
        }

        if op2.kind == EvalKind::Label {
            self.link_requests.push(LinkRequest {
                address: self.current_address,
                label: op2.matched.clone(),
                is_branch: false,
            });
        }

        let (de_op, funct3) = match opcode {
            "sb" => (0b0100011, 0b000),
            "sh" => (0b0100011, 0b001),
            "sw" => (0b0100011, 0b010),
            _ => unreachable!(),
        };

        self.address_to_line.insert(self.current_address, line_num);
        self.current_address += 4;
        Some(make_stype(
            de_op,
            op3.value as u32,
            src.value as u32,
            op2.value as u32,
            funct3,
        ))
    }

    fn parse_btype(&mut self, line: &str, diff: usize, line_num: usize, opcode: &str) -> Option<u32> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 3 {
            self.diagnostics.push(diag::invalid_instruction_format(
                "<opcode> <reg>, <reg>, <imm>",
                opcode,
                TextRange::new(line_num, diff, diff + line.len()),
            ));
            return None;
        }
        let operand1 = &parts[0][parts[0].find(' ').map_or(0, |p| p + 1)..];

        let src = match self.evaluate(operand1, 0, false) {
            Ok(r) => r,
            Err(_) => {
                let offset = diff + opcode.len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    operand1,
                    TextRange::new(line_num, offset, offset + operand1.len()),
                ));
                return None;
            }
        };
        let op2 = match self.evaluate(parts[1], 0, false) {
            Ok(r) if r.kind == EvalKind::Register => r,
            _ => {
                let offset = diff + parts[0].len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    parts[1],
                    TextRange::new(line_num, offset, offset + parts[1].len()),
                ));
                return None;
            }
        };

        let op3 = self.evaluate_reporting(
            parts[2],
            12,
            true,
            line_num,
            diff + parts[0].len() + 1 + parts[1].len() + 1,
        )?;
        if op3.kind == EvalKind::Register {
            let start = diff + parts[0].len() + 1 + parts[1].len() + 1;
            self.diagnostics.push(diag::invalid_integer_literal(
                parts[2],
                TextRange::new(
                    line_num,
                    start,
                    diff + parts[0].len() + 1 + parts[1].len() + parts[2].len(),
                ),
            ));
            return None;
        }

        // branch offsets get 13 bits
        if op3.value < -4096 || op3.value > 4095 {
            let offset = diff + parts[0].len() + 1 + parts[1].len() + 1;
            self.diagnostics.push(diag::immediate_overflow(
                parts[2],
                13,
                TextRange::new(line_num, offset, offset + parts[2].len()),
            ));
            return None;
        }

        if op3.kind == EvalKind::Label {
            self.link_requests.push(LinkRequest {
                address: self.current_address,
                label: op3.matched.clone(),
                is_branch: true,
            });
        }

        let (de_op, funct3) = match opcode {
            "beq" => (0b1100011, 0b000),
            "bne" => (0b1100011, 0b001),
            "blt" => (0b1100011, 0b100),
            "bge" => (0b1100011, 0b101),
            "bltu" => (0b1100011, 0b110),
            "bgeu" => (0b1100011, 0b111),
            _ => unreachable!(),
        };

        self.address_to_line.insert(self.current_address, line_num);
        self.current_address += 4;
        Some(make_btype(
            de_op,
            src.value as u32,
            op2.value as u32,
            op3.value as u32,
            funct3,
        ))
    }

    fn parse_jtype(&mut self, line: &str, diff: usize, line_num: usize, opcode: &str) -> Option<u32> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 2 {
            self.diagnostics.push(diag::invalid_instruction_format(
                "<opcode> <register>, <imm>",
                opcode,
                TextRange::new(line_num, diff, diff + line.len()),
            ));
            return None;
        }
        let operand1 = &parts[0][parts[0].find(' ').map_or(0, |p| p + 1)..];

        let src = match self.evaluate(operand1, 0, false) {
            Ok(r) if r.kind == EvalKind::Register => r,
            _ => {
                let offset = diff + opcode.len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    operand1,
                    TextRange::new(line_num, offset, offset + operand1.len()),
                ));
                return None;
            }
        };

        let op2 = self.evaluate_reporting(parts[1], 20, true, line_num, diff + parts[0].len() + 1)?;
        match op2.kind {
            EvalKind::IntegerLiteral | EvalKind::UnsignedIntegerLiteral => {
                let offset = diff + parts[0].len() + 1;
                self.diagnostics.push(diag::explicit_number_literal_for_label(
                    TextRange::new(line_num, offset, offset + parts[1].len()),
                ));
                return None;
            }
            EvalKind::Register => {
                let offset = diff + parts[0].len() + 1;
                self.diagnostics.push(diag::invalid_integer_literal(
                    parts[1],
                    TextRange::new(line_num, offset, offset + parts[1].len()),
                ));
                return None;
            }
            EvalKind::Label => {
                self.link_requests.push(LinkRequest {
                    address: self.current_address,
                    label: op2.matched.clone(),
                    is_branch: true,
                });
            }
        }

        self.address_to_line.insert(self.current_address, line_num);
        self.current_address += 4;
        Some(make_jtype(0b1101111, src.value as u32, op2.value as u32))
    }

    fn parse_utype(&mut self, line: &str, diff: usize, line_num: usize, opcode: &str) -> Option<u32> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 2 {
            self.diagnostics.push(diag::invalid_instruction_format(
                "<opcode> <register>, <imm>",
                opcode,
                TextRange::new(line_num, diff, diff + line.len()),
            ));
            return None;
        }
        let operand1 = &parts[0][parts[0].find(' ').map_or(0, |p| p + 1)..];

        let src = match self.evaluate(operand1, 0, false) {
            Ok(r) if r.kind == EvalKind::Register => r,
            _ => {
                let offset = diff + opcode.len() + 1;
                self.diagnostics.push(diag::invalid_register(
                    operand1,
                    TextRange::new(line_num, offset, offset + operand1.len()),
                ));
                return None;
            }
        };

        let mut op2 = self.evaluate_reporting(parts[1], 20, false, line_num, diff + parts[0].len() + 1)?;
        if op2.kind == EvalKind::Register {
            let offset = diff + parts[0].len() + 1;
            self.diagnostics.push(diag::invalid_integer_literal(
                parts[1],
                TextRange::new(line_num, offset, offset + parts[1].len()),
            ));
            return None;
        }

        if op2.kind == EvalKind::Label {
            self.link_requests.push(LinkRequest {
                address: self.current_address,
                label: op2.matched.clone(),
                is_branch: false,
            });
        }

        // range checks run on the full 32-bit constant
        op2.value = op2.value.wrapping_shl(12);

        match op2.kind {
            EvalKind::UnsignedIntegerLiteral => {
                if op2.value > 0xFFFFFFFF {
                    let offset = diff + parts[0].len() + 1;
                    self.diagnostics.push(diag::unsigned_immediate_overflow(
                        parts[1],
                        20,
                        TextRange::new(line_num, offset, offset + parts[1].len()),
                    ));
                    return None;
                }
                if op2.value & 0xFFF != 0 {
                    let offset = diff + parts[0].len() + 1;
                    self.diagnostics.push(diag::immediate_bits_will_be_discarded(
                        parts[1],
                        TextRange::new(line_num, offset, offset + parts[1].len()),
                    ));
                }
            }
            EvalKind::IntegerLiteral | EvalKind::Label => {
                if op2.value > 0x7FFFFFFF || op2.value < -0x80000000 {
                    let offset = diff + parts[0].len() + 1;
                    self.diagnostics.push(diag::immediate_overflow(
                        parts[1],
                        20,
                        TextRange::new(line_num, offset, offset + parts[1].len()),
                    ));
                    return None;
                }
                if op2.value & 0xFFF != 0 {
                    let offset = diff + parts[0].len() + 1;
                    self.diagnostics.push(diag::immediate_bits_will_be_discarded(
                        parts[1],
                        TextRange::new(line_num, offset, offset + parts[1].len()),
                    ));
                }
            }
            EvalKind::Register => {}
        }

        let de_op = match opcode {
            "lui" => 0b0110111,
            "auipc" => 0b0010111,
            _ => unreachable!(),
        };

        self.address_to_line.insert(self.current_address, line_num);
        self.current_address += 4;
        Some(make_utype(de_op, src.value as u32, (op2.value >> 12) as u32))
    }

    fn parse_no_args(&mut self, line: &str, diff: usize, line_num: usize, opcode: &str) -> Option<u32> {
        if line.split(' ').count() != 1 {
            self.diagnostics.push(diag::invalid_instruction_format(
                "<opcode>",
                opcode,
                TextRange::new(line_num, diff, diff + line.len()),
            ));
            return None;
        }

        let imm = match opcode {
            "ecall" => 0,
            "ebreak" => 1,
            _ => unreachable!(),
        };

        self.address_to_line.insert(self.current_address, line_num);
        self.current_address += 4;
        Some(make_itype(0b1110011, 0, 0, imm, 0))
    }

    // ------------------------------------------------------------------------
    // Data section

    fn parse_data_line(&mut self, line: &str, diff: usize, line_num: usize) {
        let d_type = line.split(' ').next().unwrap_or("").to_ascii_lowercase();
        let rest = &line[line.find(' ').map_or(0, |p| p + 1)..];
        let values: Vec<&str> = rest.split(',').collect();

        match d_type.as_str() {
            ".word" => {
                let mut char_offset = diff + d_type.len() + 1;
                for value in &values {
                    let result = self.evaluate_reporting(value, 64, false, line_num, char_offset);
                    char_offset += value.len() + 1;
                    let result = result.unwrap_or(Evaluation {
                        value: 0,
                        kind: EvalKind::IntegerLiteral,
                        matched: String::new(),
                    });
                    if matches!(result.kind, EvalKind::Label | EvalKind::Register) {
                        self.diagnostics.push(diag::invalid_data_section_value(
                            value,
                            TextRange::new(line_num, char_offset, char_offset + value.len()),
                        ));
                    }
                    self.data.push(result.value as u32);
                }
            }
            ".ascii" => {
                let char_offset = diff + d_type.len() + 1;
                let value = rest;
                if !(value.len() >= 2 && value.starts_with('"') && value.ends_with('"')) {
                    self.diagnostics.push(diag::invalid_data_section_value(
                        value,
                        TextRange::new(line_num, char_offset, char_offset + value.len()),
                    ));
                    return;
                }
                let value = value[1..value.len() - 1].replace("\\n", "\n");
                let mut bytes = value.into_bytes();
                bytes.push(0);
                for (i, byte) in bytes.iter().enumerate() {
                    // four characters per word, little-endian
                    if i % 4 == 0 {
                        self.data.push(*byte as u32);
                    } else {
                        let last = self.data.len() - 1;
                        self.data[last] |= (*byte as u32) << ((i % 4) * 8);
                    }
                }
            }
            ".space" => {
                let offset = diff + d_type.len() + 1;
                if let Some(result) = self.evaluate_reporting(values[0], 64, false, line_num, offset) {
                    if matches!(result.kind, EvalKind::Label | EvalKind::Register) {
                        self.diagnostics.push(diag::invalid_data_section_value(
                            values[0],
                            TextRange::new(line_num, offset, offset + values[0].len()),
                        ));
                    }
                    let words = if result.value > 0 { (result.value + 3) / 4 } else { 0 };
                    for _ in 0..words {
                        self.data.push(0);
                    }
                }
            }
            ".alloc" => {
                let offset = diff + d_type.len() + 1;
                if let Some(result) = self.evaluate_reporting(values[0], 64, false, line_num, offset) {
                    if matches!(result.kind, EvalKind::Label | EvalKind::Register) {
                        self.diagnostics.push(diag::invalid_data_section_value(
                            values[0],
                            TextRange::new(line_num, offset, offset + values[0].len()),
                        ));
                    }
                    for _ in 0..result.value.max(0) {
                        self.data.push(0);
                    }
                }
            }
            _ => {
                self.diagnostics.push(diag::invalid_data_section(
                    &d_type,
                    TextRange::new(line_num, diff, diff + d_type.len()),
                ));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Link fix-up

    fn resolve_link_requests(&mut self) {
        let requests = std::mem::take(&mut self.link_requests);
        for request in &requests {
            let label_addr = self.labels.get(&request.label).copied().unwrap_or(0);
            let address = request.address;
            let instruction = self.text[(address / 4) as usize];
            let opcode = get_opcode(instruction);

            if opcode == OPCODE_ITYPE || opcode == OPCODE_MEM_ITYPE || opcode == OPCODE_JALR {
                let (opcode, rd, rs1, _, funct3) = decode_itype(instruction);
                let is_text = self.label_kinds.get(&request.label) == Some(&LabelKind::Text);
                let imm = if request.is_branch || is_text {
                    let offset = label_addr.wrapping_sub(address) as i32;
                    if offset > 4095 || offset < -4096 {
                        self.report_label_too_far(request, address);
                        return;
                    }
                    offset as u32
                } else {
                    // data labels stay absolute; the loader adds the data base
                    label_addr
                };
                self.text[(address / 4) as usize] = make_itype(opcode, rd, rs1, imm, funct3);
            } else if opcode == OPCODE_JAL {
                let (opcode, rd, _) = decode_jtype(instruction);
                let offset = label_addr.wrapping_sub(address) as i32;
                if offset > 0xFFFFF || offset < -0x100000 {
                    self.report_label_too_far(request, address);
                    return;
                }
                self.text[(address / 4) as usize] = make_jtype(opcode, rd, offset as u32);
            } else if opcode == OPCODE_STYPE {
                let (opcode, rs1, rs2, _, funct3) = decode_stype(instruction);
                self.text[(address / 4) as usize] =
                    make_stype(opcode, rs1, rs2, label_addr, funct3);
            } else if opcode == OPCODE_BTYPE {
                let (opcode, rs1, rs2, _, funct3) = decode_btype(instruction);
                let offset = label_addr.wrapping_sub(address) as i32;
                if offset > 4095 || offset < -4096 {
                    self.report_label_too_far(request, address);
                    return;
                }
                self.text[(address / 4) as usize] =
                    make_btype(opcode, rs1, rs2, offset as u32, funct3);
            } else if opcode == OPCODE_LUI || opcode == OPCODE_AUIPC {
                let (opcode, rd, _) = decode_utype(instruction);
                // absolute; the label's address becomes the upper immediate
                self.text[(address / 4) as usize] = make_utype(opcode, rd, label_addr);
            }
        }
    }

    fn report_label_too_far(&mut self, request: &LinkRequest, address: u32) {
        let line_num = self.address_to_line.get(&address).copied().unwrap_or(0);
        let char_pos = self
            .lines
            .get(line_num)
            .and_then(|l| l.find(&request.label))
            .unwrap_or(0);
        let delta = self.line_deltas.get(&line_num).copied().unwrap_or(0);
        self.diagnostics.push(diag::label_too_far(
            &request.label,
            TextRange::new(
                line_num,
                delta + char_pos,
                delta + char_pos + request.label.len(),
            ),
        ));
    }
}
