//! ARM2 machine emulator: segmented memory, SWI operating-system layer,
//! debugger kernel, thread-safe session service, diagnostics, and the
//! JSON-RPC session server. The CPU core lives in `cpu-arm2` and the
//! assembler in `asm-arm2`; this crate assembles them into the machine
//! that frontends drive.

pub mod api;
pub mod command;
pub mod config;
pub mod coverage;
pub mod debugger;
pub mod error;
pub mod eval;
pub mod machine;
pub mod memory;
pub mod session;
pub mod stats;
pub mod swi;
pub mod trace;

pub use debugger::{Breakpoint, Debugger, WatchKind, WatchTarget, Watchpoint};
pub use error::{RuntimeError, RuntimeErrorKind, SessionError};
pub use machine::{Machine, MachineStep, StepOutcome};
pub use memory::{Memory, Perms, Segment};
pub use session::{Event, ExecState, Session};
