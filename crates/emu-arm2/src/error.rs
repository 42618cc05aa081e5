//! Runtime and session error catalogues.

use asm_arm2::AsmError;
use cpu_arm2::AccessKind;
use std::fmt;

/// What went wrong during guest execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// PC pointed at unmapped, non-executable, or misaligned memory.
    InvalidFetch { addr: u32 },
    /// Word or halfword access off its natural boundary.
    UnalignedAccess { addr: u32, size: u8 },
    /// Access outside every segment.
    SegmentFault { addr: u32, kind: AccessKind },
    /// Segment exists but denies the access.
    PermissionDenied { addr: u32, kind: AccessKind },
    /// Coprocessor or undefined instruction space.
    UnsupportedInstruction { word: u32 },
    /// SWI number outside the catalogue.
    InvalidSwi { number: u32 },
    /// Division by zero in a guest-visible computation.
    ArithmeticDivByZero,
    /// Store below the stack segment floor.
    StackOverflow { addr: u32 },
}

impl RuntimeErrorKind {
    /// Guard band below the stack floor treated as stack overflow rather
    /// than a plain segment fault.
    const STACK_GUARD: u32 = 0x1000;

    /// Map a bus fault, promoting writes just below the stack floor to
    /// `StackOverflow`.
    #[must_use]
    pub fn from_fault(fault: cpu_arm2::MemFault, stack_floor: Option<u32>) -> Self {
        use cpu_arm2::MemFault;
        match fault {
            MemFault::Unmapped { addr, kind } => {
                if kind == AccessKind::Write {
                    if let Some(floor) = stack_floor {
                        if addr < floor && addr >= floor.saturating_sub(Self::STACK_GUARD) {
                            return Self::StackOverflow { addr };
                        }
                    }
                }
                Self::SegmentFault { addr, kind }
            }
            MemFault::Unaligned { addr, size } => Self::UnalignedAccess { addr, size },
            MemFault::Permission { addr, kind } => Self::PermissionDenied { addr, kind },
        }
    }
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFetch { addr } => write!(f, "invalid fetch at {addr:#010X}"),
            Self::UnalignedAccess { addr, size } => {
                write!(f, "unaligned {size}-byte access at {addr:#010X}")
            }
            Self::SegmentFault { addr, kind } => {
                write!(f, "segment fault: {kind} at {addr:#010X}")
            }
            Self::PermissionDenied { addr, kind } => {
                write!(f, "permission denied: {kind} at {addr:#010X}")
            }
            Self::UnsupportedInstruction { word } => {
                write!(f, "unsupported instruction {word:#010X}")
            }
            Self::InvalidSwi { number } => write!(f, "invalid SWI {number:#X}"),
            Self::ArithmeticDivByZero => write!(f, "division by zero"),
            Self::StackOverflow { addr } => write!(f, "stack overflow at {addr:#010X}"),
        }
    }
}

/// A runtime error with its execution context: the PC and the
/// disassembled instruction, as frontends display them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub pc: u32,
    /// Disassembly of the faulting instruction, when fetchable.
    pub instruction: String,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at PC={:#010X}", self.kind, self.pc)?;
        if !self.instruction.is_empty() {
            write!(f, " ({})", self.instruction)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Failures of the session facade.
#[derive(Debug)]
pub enum SessionError {
    /// Operation requires a loaded program.
    NoProgramLoaded,
    /// Unknown session id (API surface).
    SessionNotFound(String),
    /// Operation not valid in the current execution state.
    InvalidSessionState(String),
    /// Breakpoint address does not hold an instruction.
    InvalidBreakpointAddress(u32),
    /// Expression did not parse or evaluate.
    InvalidExpression(String),
    /// Assembly failed; all diagnostics attached.
    ProgramLoad(Vec<AsmError>),
    /// Guest execution failed.
    Runtime(RuntimeError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProgramLoaded => write!(f, "no program loaded"),
            Self::SessionNotFound(id) => write!(f, "session {id:?} not found"),
            Self::InvalidSessionState(what) => write!(f, "invalid session state: {what}"),
            Self::InvalidBreakpointAddress(addr) => {
                write!(f, "address {addr:#010X} is not an executable instruction")
            }
            Self::InvalidExpression(msg) => write!(f, "invalid expression: {msg}"),
            Self::ProgramLoad(errors) => match errors.first() {
                Some(first) => write!(f, "program load failed: {first}"),
                None => write!(f, "program load failed"),
            },
            Self::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<RuntimeError> for SessionError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}
