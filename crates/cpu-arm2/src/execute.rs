//! Fetch/decode/execute for the ARM2 core.
//!
//! One `step()` call executes one instruction. R15 reads observe `pc + 8`
//! (the two-stage pipeline the programmer's model exposes); writes to R15
//! change control flow at the next fetch. SWI is not executed here: the
//! step reports it to the caller with PC still at the SWI instruction, and
//! the machine layer advances PC once the call completes. That lets a
//! blocking console read suspend and retry without rewinding state.

use crate::alu;
use crate::bus::{Bus, MemFault};
use crate::decode::{
    decode, Decoded, DpOp, HalfOffset, Instruction, MsrSource, Operand2, ShiftAmount,
    TransferOffset,
};
use crate::registers::{Registers, LR, PC};
use std::fmt;

/// A runtime failure inside the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuError {
    /// Instruction fetch failed: PC unmapped, non-executable, or unaligned.
    Fetch { addr: u32, fault: MemFault },
    /// A data access faulted.
    Mem { fault: MemFault },
    /// Coprocessor or undefined instruction space.
    Unsupported { word: u32, addr: u32 },
}

impl fmt::Display for CpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch { addr, fault } => write!(f, "instruction fetch at {addr:#010X}: {fault}"),
            Self::Mem { fault } => write!(f, "{fault}"),
            Self::Unsupported { word, addr } => {
                write!(f, "unsupported instruction {word:#010X} at {addr:#010X}")
            }
        }
    }
}

impl std::error::Error for CpuError {}

/// What a step did, beyond ordinary register/memory effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// Instruction executed normally.
    Executed,
    /// Condition failed; instruction skipped.
    Skipped,
    /// SWI reached. PC still points at the SWI instruction; the caller
    /// dispatches the call and advances PC on completion.
    Swi(u32),
}

/// Result of one instruction step.
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub event: StepEvent,
    /// Cycles consumed (counted, not timed).
    pub cycles: u32,
    /// Bitmap of registers the instruction read.
    pub regs_read: u16,
    /// Bitmap of registers the instruction wrote.
    pub regs_written: u16,
}

/// The ARM2 CPU.
#[derive(Debug, Clone)]
pub struct Arm2 {
    /// Register file and flags.
    pub regs: Registers,
    /// Total cycles executed since reset.
    cycles: u64,
    /// Total instructions executed since reset.
    instructions: u64,

    // Per-step bookkeeping
    regs_read: u16,
    regs_written: u16,
    pc_modified: bool,
}

impl Default for Arm2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Arm2 {
    /// Create a CPU in reset state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            cycles: 0,
            instructions: 0,
            regs_read: 0,
            regs_written: 0,
            pc_modified: false,
        }
    }

    /// Reset registers, flags, and counters.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Total cycles executed since reset.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Total instructions executed since reset.
    #[must_use]
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Read a register as an operand. R15 observes `pc + 8`.
    fn reg(&mut self, n: u8) -> u32 {
        let n = n as usize & 15;
        self.regs_read |= 1 << n;
        if n == PC {
            self.regs.r[PC].wrapping_add(8)
        } else {
            self.regs.r[n]
        }
    }

    /// Write a register. Writes to R15 are word-aligned and redirect
    /// control flow at the next fetch.
    fn set_reg(&mut self, n: u8, value: u32) {
        let n = n as usize & 15;
        self.regs_written |= 1 << n;
        if n == PC {
            self.regs.r[PC] = value & !3;
            self.pc_modified = true;
        } else {
            self.regs.r[n] = value;
        }
    }

    /// Execute one instruction.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> Result<Step, CpuError> {
        self.regs_read = 0;
        self.regs_written = 0;
        self.pc_modified = false;

        let pc = self.regs.r[PC];
        let word = bus.fetch(pc).map_err(|fault| CpuError::Fetch { addr: pc, fault })?;
        let Decoded { cond, op } = decode(word);

        if !cond.passes(&self.regs.cpsr) {
            self.regs.r[PC] = pc.wrapping_add(4);
            self.cycles += 1;
            self.instructions += 1;
            return Ok(Step {
                event: StepEvent::Skipped,
                cycles: 1,
                regs_read: 0,
                regs_written: 0,
            });
        }

        if let Instruction::Swi { comment } = op {
            // PC deliberately left at the SWI; see module docs.
            self.instructions += 1;
            self.cycles += 3;
            return Ok(Step {
                event: StepEvent::Swi(comment),
                cycles: 3,
                regs_read: 0,
                regs_written: 0,
            });
        }

        let cycles = self.execute(bus, pc, op)?;

        if !self.pc_modified {
            self.regs.r[PC] = pc.wrapping_add(4);
        }
        self.cycles += u64::from(cycles);
        self.instructions += 1;

        Ok(Step {
            event: StepEvent::Executed,
            cycles,
            regs_read: self.regs_read,
            regs_written: self.regs_written,
        })
    }

    fn execute<B: Bus>(&mut self, bus: &mut B, pc: u32, op: Instruction) -> Result<u32, CpuError> {
        match op {
            Instruction::DataProcessing { op, s, rn, rd, op2 } => {
                Ok(self.exec_data_processing(op, s, rn, rd, op2))
            }
            Instruction::Multiply {
                accumulate,
                s,
                rd,
                rn,
                rs,
                rm,
            } => Ok(self.exec_multiply(accumulate, s, rd, rn, rs, rm)),
            Instruction::MultiplyLong {
                signed,
                accumulate,
                s,
                rd_hi,
                rd_lo,
                rs,
                rm,
            } => Ok(self.exec_multiply_long(signed, accumulate, s, rd_hi, rd_lo, rs, rm)),
            Instruction::SingleTransfer {
                load,
                byte,
                pre,
                up,
                writeback,
                rn,
                rd,
                offset,
            } => self
                .exec_single_transfer(bus, load, byte, pre, up, writeback, rn, rd, offset)
                .map_err(|fault| CpuError::Mem { fault }),
            Instruction::HalfTransfer {
                load,
                signed,
                half,
                pre,
                up,
                writeback,
                rn,
                rd,
                offset,
            } => self
                .exec_half_transfer(bus, load, signed, half, pre, up, writeback, rn, rd, offset)
                .map_err(|fault| CpuError::Mem { fault }),
            Instruction::BlockTransfer {
                load,
                pre,
                up,
                s_bit: _,
                writeback,
                rn,
                regs,
            } => self
                .exec_block_transfer(bus, load, pre, up, writeback, rn, regs)
                .map_err(|fault| CpuError::Mem { fault }),
            Instruction::Branch { link, offset } => {
                if link {
                    self.set_reg(LR as u8, pc.wrapping_add(4));
                }
                let target = pc.wrapping_add(8).wrapping_add(offset as u32);
                self.set_reg(PC as u8, target);
                Ok(3)
            }
            Instruction::BranchExchange { rm } => {
                // The mode bit is ignored: this core has no Thumb state.
                let target = self.reg(rm) & !1;
                self.set_reg(PC as u8, target);
                Ok(3)
            }
            Instruction::Mrs { rd } => {
                let bits = self.regs.cpsr.bits();
                self.set_reg(rd, bits);
                Ok(1)
            }
            Instruction::Msr { flags, src } => {
                let value = match src {
                    MsrSource::Register(rm) => self.reg(rm),
                    MsrSource::Immediate { imm8, rotate } => alu::rotated_imm(imm8, rotate),
                };
                if flags {
                    self.regs.cpsr.set_bits(value);
                }
                Ok(1)
            }
            Instruction::Swi { .. } => unreachable!("SWI handled in step()"),
            Instruction::Coprocessor { word } | Instruction::Undefined { word } => {
                Err(CpuError::Unsupported { word, addr: pc })
            }
        }
    }

    /// Evaluate operand 2, producing the value and the shifter carry-out.
    fn eval_op2(&mut self, op2: Operand2) -> (u32, bool) {
        let carry_in = self.regs.cpsr.c;
        match op2 {
            Operand2::Immediate { imm8, rotate } => (
                alu::rotated_imm(imm8, rotate),
                alu::rotated_imm_carry(imm8, rotate, carry_in),
            ),
            Operand2::Register { rm, shift, amount } => {
                let value = self.reg(rm);
                let r = match amount {
                    ShiftAmount::Immediate(n) => alu::shift_imm(shift, value, n, carry_in),
                    ShiftAmount::Register(rs) => {
                        let n = self.reg(rs) & 0xFF;
                        alu::shift_reg(shift, value, n, carry_in)
                    }
                };
                (r.value, r.carry)
            }
        }
    }

    fn exec_data_processing(&mut self, op: DpOp, s: bool, rn: u8, rd: u8, op2: Operand2) -> u32 {
        let reg_shift = matches!(
            op2,
            Operand2::Register {
                amount: ShiftAmount::Register(_),
                ..
            }
        );
        let (op2_val, shifter_carry) = self.eval_op2(op2);
        let rn_val = if op.is_move() { 0 } else { self.reg(rn) };
        let c = self.regs.cpsr.c;

        enum Outcome {
            Logical(u32),
            Arith(alu::AluResult),
        }

        let outcome = match op {
            DpOp::And | DpOp::Tst => Outcome::Logical(rn_val & op2_val),
            DpOp::Eor | DpOp::Teq => Outcome::Logical(rn_val ^ op2_val),
            DpOp::Orr => Outcome::Logical(rn_val | op2_val),
            DpOp::Bic => Outcome::Logical(rn_val & !op2_val),
            DpOp::Mov => Outcome::Logical(op2_val),
            DpOp::Mvn => Outcome::Logical(!op2_val),
            DpOp::Sub | DpOp::Cmp => Outcome::Arith(alu::sub32(rn_val, op2_val, true)),
            DpOp::Rsb => Outcome::Arith(alu::sub32(op2_val, rn_val, true)),
            DpOp::Add | DpOp::Cmn => Outcome::Arith(alu::add32(rn_val, op2_val, false)),
            DpOp::Adc => Outcome::Arith(alu::add32(rn_val, op2_val, c)),
            DpOp::Sbc => Outcome::Arith(alu::sub32(rn_val, op2_val, c)),
            DpOp::Rsc => Outcome::Arith(alu::sub32(op2_val, rn_val, c)),
        };

        let value = match outcome {
            Outcome::Logical(v) => v,
            Outcome::Arith(r) => r.value,
        };

        let writes_dest = !op.is_compare();
        if writes_dest {
            self.set_reg(rd, value);
        }

        // Flag writes are suppressed when Rd is R15 (no SPSR on this core).
        if s && !(writes_dest && rd as usize == PC) {
            self.regs.cpsr.n = value & (1 << 31) != 0;
            self.regs.cpsr.z = value == 0;
            match outcome {
                Outcome::Logical(_) => self.regs.cpsr.c = shifter_carry,
                Outcome::Arith(r) => {
                    self.regs.cpsr.c = r.carry;
                    self.regs.cpsr.v = r.overflow;
                }
            }
        }

        let mut cycles = 1;
        if reg_shift {
            cycles += 1;
        }
        if writes_dest && rd as usize == PC {
            cycles += 2;
        }
        cycles
    }

    fn exec_multiply(&mut self, accumulate: bool, s: bool, rd: u8, rn: u8, rs: u8, rm: u8) -> u32 {
        let mut value = self.reg(rm).wrapping_mul(self.reg(rs));
        if accumulate {
            value = value.wrapping_add(self.reg(rn));
        }
        self.set_reg(rd, value);
        if s {
            self.regs.cpsr.n = value & (1 << 31) != 0;
            self.regs.cpsr.z = value == 0;
        }
        3
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_multiply_long(
        &mut self,
        signed: bool,
        accumulate: bool,
        s: bool,
        rd_hi: u8,
        rd_lo: u8,
        rs: u8,
        rm: u8,
    ) -> u32 {
        let rm_val = self.reg(rm);
        let rs_val = self.reg(rs);
        let mut product = if signed {
            (i64::from(rm_val as i32) * i64::from(rs_val as i32)) as u64
        } else {
            u64::from(rm_val) * u64::from(rs_val)
        };
        if accumulate {
            let acc = (u64::from(self.reg(rd_hi)) << 32) | u64::from(self.reg(rd_lo));
            product = product.wrapping_add(acc);
        }
        self.set_reg(rd_lo, product as u32);
        self.set_reg(rd_hi, (product >> 32) as u32);
        if s {
            self.regs.cpsr.n = product & (1 << 63) != 0;
            self.regs.cpsr.z = product == 0;
        }
        4
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_single_transfer<B: Bus>(
        &mut self,
        bus: &mut B,
        load: bool,
        byte: bool,
        pre: bool,
        up: bool,
        writeback: bool,
        rn: u8,
        rd: u8,
        offset: TransferOffset,
    ) -> Result<u32, MemFault> {
        let base = self.reg(rn);
        let off = match offset {
            TransferOffset::Immediate(imm) => imm,
            TransferOffset::Register { rm, shift, amount } => {
                let v = self.reg(rm);
                alu::shift_imm(shift, v, amount, self.regs.cpsr.c).value
            }
        };
        let ea = if up {
            base.wrapping_add(off)
        } else {
            base.wrapping_sub(off)
        };
        let addr = if pre { ea } else { base };

        if load {
            let value = if byte {
                u32::from(bus.read_byte(addr)?)
            } else {
                bus.read_word(addr)?
            };
            // Writeback before the destination so an LDR that loads its own
            // base still ends with the loaded value.
            if !pre || writeback {
                self.set_reg(rn, ea);
            }
            self.set_reg(rd, value);
        } else {
            let value = self.reg(rd);
            if byte {
                bus.write_byte(addr, value as u8)?;
            } else {
                bus.write_word(addr, value)?;
            }
            if !pre || writeback {
                self.set_reg(rn, ea);
            }
        }

        Ok(if load { 3 } else { 2 })
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_half_transfer<B: Bus>(
        &mut self,
        bus: &mut B,
        load: bool,
        signed: bool,
        half: bool,
        pre: bool,
        up: bool,
        writeback: bool,
        rn: u8,
        rd: u8,
        offset: HalfOffset,
    ) -> Result<u32, MemFault> {
        let base = self.reg(rn);
        let off = match offset {
            HalfOffset::Immediate(imm) => imm,
            HalfOffset::Register(rm) => self.reg(rm),
        };
        let ea = if up {
            base.wrapping_add(off)
        } else {
            base.wrapping_sub(off)
        };
        let addr = if pre { ea } else { base };

        if load {
            let value = match (signed, half) {
                (false, true) => u32::from(bus.read_half(addr)?),
                (true, false) => bus.read_byte(addr)? as i8 as i32 as u32,
                (true, true) => bus.read_half(addr)? as i16 as i32 as u32,
                (false, false) => unreachable!("SH=00 is not a halfword transfer"),
            };
            if !pre || writeback {
                self.set_reg(rn, ea);
            }
            self.set_reg(rd, value);
        } else {
            let value = self.reg(rd);
            bus.write_half(addr, value as u16)?;
            if !pre || writeback {
                self.set_reg(rn, ea);
            }
        }

        Ok(if load { 3 } else { 2 })
    }

    fn exec_block_transfer<B: Bus>(
        &mut self,
        bus: &mut B,
        load: bool,
        pre: bool,
        up: bool,
        writeback: bool,
        rn: u8,
        regs: u16,
    ) -> Result<u32, MemFault> {
        let base = self.reg(rn);
        let count = regs.count_ones();

        // Lowest register always occupies the lowest address. Descending
        // forms pre-compute the bottom of the block.
        let lowest = match (pre, up) {
            (false, true) => base,                              // IA
            (true, true) => base.wrapping_add(4),               // IB
            (false, false) => base.wrapping_sub(4 * count).wrapping_add(4), // DA
            (true, false) => base.wrapping_sub(4 * count),      // DB
        };
        let final_base = if up {
            base.wrapping_add(4 * count)
        } else {
            base.wrapping_sub(4 * count)
        };

        let mut addr = lowest;
        if load {
            for n in 0..16u8 {
                if regs & (1 << n) == 0 {
                    continue;
                }
                let value = bus.read_word(addr)?;
                self.set_reg(n, value);
                addr = addr.wrapping_add(4);
            }
            // A loaded base wins over writeback.
            if writeback && regs & (1 << rn) == 0 {
                self.set_reg(rn, final_base);
            }
        } else {
            for n in 0..16u8 {
                if regs & (1 << n) == 0 {
                    continue;
                }
                // Stores of the base register use its pre-transfer value.
                let value = if n == rn { base } else { self.reg(n) };
                bus.write_word(addr, value)?;
                addr = addr.wrapping_add(4);
            }
            if writeback {
                self.set_reg(rn, final_base);
            }
        }

        Ok(count + if load { 2 } else { 1 })
    }
}
