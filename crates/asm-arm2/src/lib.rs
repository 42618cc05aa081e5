//! Two-pass ARM2 assembler and disassembler.
//!
//! The pipeline: preprocessor (includes, conditionals, macros) → lexer →
//! two-pass parser (pass 1 assigns addresses and sizes literal pools,
//! pass 2 resolves symbols) → encoder (32-bit words, data directives,
//! literal pools). Errors accumulate across the whole run; a program is
//! produced only when there are none.
//!
//! ```
//! use asm_arm2::Assembler;
//!
//! let program = Assembler::new()
//!     .assemble_source("MOV R0, #42\nSWI #0\n", "demo.s")
//!     .expect("assembles");
//! assert_eq!(program.entry_point, 0x8000);
//! ```

mod ast;
mod disasm;
mod encoder;
mod error;
mod lexer;
mod mnemonic;
mod parser;
mod preprocess;
mod program;
mod symbols;

pub use disasm::{disassemble, reglist};
pub use encoder::encode_rotated_imm;
pub use error::{AsmError, AsmErrorKind, SourceLoc};
pub use parser::{DATA_BASE, TEXT_BASE};
pub use program::{Chunk, Program, SourceMap, SourceMapEntry};
pub use symbols::{Symbol, SymbolKind, SymbolTable};

use preprocess::{Line, Preprocessor};
use std::collections::HashMap;
use std::path::Path;

/// The assembler front door. Holds preprocessor defines.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    defines: Vec<String>,
}

impl Assembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a preprocessor define (for `.ifdef`).
    #[must_use]
    pub fn define(mut self, name: impl Into<String>) -> Self {
        self.defines.push(name.into());
        self
    }

    /// Assemble a file from disk. `.include` resolves relative to it.
    pub fn assemble_file(&self, path: &Path) -> Result<Program, Vec<AsmError>> {
        let lines = Preprocessor::new(&self.defines).process_file(path)?;
        Self::assemble_lines(lines)
    }

    /// Assemble in-memory source.
    pub fn assemble_source(&self, source: &str, filename: &str) -> Result<Program, Vec<AsmError>> {
        let lines = Preprocessor::new(&self.defines).process_source(source, filename)?;
        Self::assemble_lines(lines)
    }

    fn assemble_lines(lines: Vec<Line>) -> Result<Program, Vec<AsmError>> {
        // Keep the text of every line so diagnostics and the source map
        // can show it.
        let mut line_text: HashMap<(String, u32), String> = HashMap::new();
        for line in &lines {
            line_text.insert((line.file.to_string(), line.number), line.text.clone());
        }

        let (tokens, mut errors) = lexer::tokenize(&lines);
        let (output, parse_errors) = parser::parse(&tokens);
        errors.extend(parse_errors);
        let (mut program, encode_errors) = encoder::encode(output);
        errors.extend(encode_errors);

        if errors.is_empty() {
            // Attach source text to the map now that assembly succeeded
            let entries = std::mem::take(&mut program.source_map);
            program.source_map = entries.with_text(&line_text);
            Ok(program)
        } else {
            for err in &mut errors {
                if err.source_line.is_empty() {
                    if let Some(text) = line_text.get(&(err.loc.file.clone(), err.loc.line)) {
                        err.source_line = text.clone();
                    }
                }
            }
            Err(errors)
        }
    }
}
