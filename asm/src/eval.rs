use thiserror::Error;

use crate::diag;
use crate::parser::AssembledProgram;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    IntegerLiteral,
    UnsignedIntegerLiteral,
    Register,
    Label,
}

/// A classified operand. `matched` keeps the original text so emitters can
/// file link requests without re-parsing.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub value: i64,
    pub kind: EvalKind,
    pub matched: String,
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid number literal: {0}")]
    InvalidNumberLiteral(String),

    #[error("Unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    #[error("Immediate overflow: {0}")]
    ImmediateOverflow(String),

    #[error("{0}")]
    Other(String),
}

impl AssembledProgram {
    /// Classifies an operand token as a label, register, or integer literal,
    /// checking literal width against the instruction field it will occupy.
    pub fn evaluate(&self, token: &str, field_width: u32, signed: bool) -> Result<Evaluation, EvalError> {
        let mut token = token.trim();
        if token.is_empty() {
            return Err(EvalError::InvalidExpression(token.to_string()));
        }

        // macros first (register aliases, nop)
        if let Some(expansion) = arch::tables::MACROS.get(token.to_ascii_lowercase().as_str()) {
            token = expansion.as_str();
        }

        if let Some(&value) = self.labels.get(token) {
            return Ok(Evaluation {
                value: value as i64,
                kind: EvalKind::Label,
                matched: token.to_string(),
            });
        }

        if let Some(&reg) = arch::tables::REGISTER_NAMES.get(token.to_ascii_lowercase().as_str()) {
            return Ok(Evaluation {
                value: reg as i64,
                kind: EvalKind::Register,
                matched: token.to_string(),
            });
        }

        if token.len() > 2 && token.starts_with('0') && (token.as_bytes()[1] | 0x20) == b'x' {
            let digits = &token[2..];
            if digits.len() > (field_width / 4) as usize {
                return Err(EvalError::ImmediateOverflow(token.to_string()));
            }
            if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(EvalError::InvalidNumberLiteral(token.to_string()));
            }

            let raw = u64::from_str_radix(digits, 16)
                .map_err(|e| EvalError::Other(e.to_string()))?;
            let most_significant = raw >> (4 * (digits.len() as u32 - 1));

            // a set top bit inside a full-width signed field reads as negative
            if signed
                && most_significant > 7
                && digits.len() == (field_width / 4) as usize
                && (field_width == 12 || field_width == 20)
            {
                let value = ((raw as i64) << (64 - field_width)) >> (64 - field_width);
                return Ok(Evaluation {
                    value,
                    kind: EvalKind::IntegerLiteral,
                    matched: token.to_string(),
                });
            }

            return Ok(Evaluation {
                value: raw as i64,
                kind: EvalKind::UnsignedIntegerLiteral,
                matched: token.to_string(),
            });
        }

        if !token.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
            return Err(EvalError::UnresolvedSymbol(token.to_string()));
        }
        let value = token
            .parse::<i64>()
            .map_err(|e| EvalError::Other(e.to_string()))?;

        Ok(Evaluation {
            value,
            kind: if value >= 0 {
                EvalKind::UnsignedIntegerLiteral
            } else {
                EvalKind::IntegerLiteral
            },
            matched: token.to_string(),
        })
    }

    /// Like `evaluate`, but converts a failure into the matching diagnostic at
    /// the given position.
    pub fn evaluate_reporting(
        &mut self,
        token: &str,
        field_width: u32,
        signed: bool,
        line: usize,
        char_pos: usize,
    ) -> Option<Evaluation> {
        let range = diag::TextRange::new(line, char_pos, char_pos + token.len());
        match self.evaluate(token, field_width, signed) {
            Ok(result) => Some(result),
            Err(e) => {
                self.diagnostics.push(match e {
                    EvalError::UnresolvedSymbol(_) => diag::unresolved_symbol_name(token, range),
                    EvalError::InvalidNumberLiteral(_) => diag::invalid_integer_literal(token, range),
                    EvalError::InvalidExpression(_) => diag::invalid_expression(token, range),
                    EvalError::ImmediateOverflow(_) => {
                        diag::immediate_overflow(token, field_width, range)
                    }
                    EvalError::Other(message) => diag::other(message, range),
                });
                None
            }
        }
    }
}

pub fn is_valid_symbol_name(name: &str) -> Result<(), &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("symbol names must not be empty");
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err("symbol names must only contain alphanumeric characters and underscores");
    }
    Ok(())
}
