//! ARM2 CPU emulator.
//!
//! Implements the user-mode ARM2 instruction set (circa 1986 Acorn): the 16
//! data-processing operations with the barrel shifter, single and block data
//! transfers, halfword transfers, branches, multiplies (including the ARMv3M
//! long forms), PSR transfers, and SWI reporting.
//!
//! Deliberate departures from the silicon:
//!
//! - Full 32-bit PC with a separate CPSR record, instead of the original
//!   26-bit PC with packed flags. All user-mode semantics are preserved;
//!   R15 operand reads still observe `pc + 8`.
//! - No coprocessor, SWP, interrupt banking, or supervisor modes. The
//!   coprocessor space decodes to an error the machine layer reports.
//! - Cycles are counted with a fixed per-form table, not timed.

mod alu;
mod bus;
mod decode;
mod execute;
mod flags;
mod registers;

pub use alu::{add32, rotated_imm, rotated_imm_carry, shift_imm, shift_reg, sub32, AluResult,
    ShiftKind, ShiftResult};
pub use bus::{AccessKind, Bus, FlatBus, MemFault};
pub use decode::{
    decode, Decoded, DpOp, HalfOffset, Instruction, MsrSource, Operand2, ShiftAmount,
    TransferOffset,
};
pub use execute::{Arm2, CpuError, Step, StepEvent};
pub use flags::Condition;
pub use registers::{Cpsr, Registers, LR, PC, SP};
