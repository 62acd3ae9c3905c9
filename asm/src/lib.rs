//! Two-pass RV32IM assembler with editor-grade diagnostics.
//!
//! `assemble` turns source text into text/data word arrays, a label table,
//! and a diagnostics list; `AssembledProgram::evaluate_hover` classifies the
//! token at a source position for editor tooltips.

pub mod diag;
pub mod eval;
pub mod hover;
pub mod parser;

pub use diag::{Diagnostic, Severity, TextPosition, TextRange};
pub use eval::{EvalError, EvalKind, Evaluation};
pub use parser::{assemble, assemble_with_config, AssembledProgram, AssemblerConfig, LabelKind};
