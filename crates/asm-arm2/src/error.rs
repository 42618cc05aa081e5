//! Assembler error catalogue.
//!
//! Errors accumulate during assembly: the assembler keeps going after a
//! faulty line so one run reports everything, but produces no program if
//! any error exists. Every error carries the source location and the raw
//! line for display.

use std::fmt;

/// A position in an assembly source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

impl SourceLoc {
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// The closed set of assembler failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmErrorKind {
    Syntax,
    UndefinedSymbol,
    DuplicateLabel,
    InvalidDirective,
    InvalidInstruction,
    InvalidOperand,
    CircularInclude,
    MacroExpansion,
    FileIo,
}

impl fmt::Display for AsmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Syntax => "syntax error",
            Self::UndefinedSymbol => "undefined symbol",
            Self::DuplicateLabel => "duplicate label",
            Self::InvalidDirective => "invalid directive",
            Self::InvalidInstruction => "invalid instruction",
            Self::InvalidOperand => "invalid operand",
            Self::CircularInclude => "circular include",
            Self::MacroExpansion => "macro expansion error",
            Self::FileIo => "file I/O error",
        };
        write!(f, "{name}")
    }
}

/// One assembler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmError {
    pub kind: AsmErrorKind,
    pub message: String,
    pub loc: SourceLoc,
    /// The raw source line, for display under the diagnostic.
    pub source_line: String,
}

impl AsmError {
    #[must_use]
    pub fn new(
        kind: AsmErrorKind,
        message: impl Into<String>,
        loc: SourceLoc,
        source_line: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            loc,
            source_line: source_line.into(),
        }
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.loc, self.kind, self.message)?;
        if !self.source_line.is_empty() {
            write!(f, "\n  {}", self.source_line)?;
        }
        Ok(())
    }
}

impl std::error::Error for AsmError {}
