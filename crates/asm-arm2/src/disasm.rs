//! Disassembler: 32-bit words back to assembly text.
//!
//! Built on the CPU crate's decoder so text and execution can never
//! disagree about what a word means. Branch targets are rendered as
//! absolute addresses, which needs the instruction's own address.

use cpu_arm2::{
    decode, Decoded, HalfOffset, Instruction, MsrSource, Operand2, ShiftAmount, ShiftKind,
    TransferOffset,
};

/// Register display name.
fn reg(n: u8) -> &'static str {
    const NAMES: [&str; 16] = [
        "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", "R10", "R11", "R12", "SP",
        "LR", "PC",
    ];
    NAMES[n as usize & 15]
}

/// Disassemble one instruction word at `addr`.
#[must_use]
pub fn disassemble(word: u32, addr: u32) -> String {
    let Decoded { cond, op } = decode(word);
    let c = cond.suffix();

    match op {
        Instruction::DataProcessing { op, s, rn, rd, op2 } => {
            let s_sfx = if s && !op.is_compare() { "S" } else { "" };
            let op2_text = operand2(op2);
            if op.is_compare() {
                format!("{}{c} {}, {op2_text}", op.mnemonic(), reg(rn))
            } else if op.is_move() {
                format!("{}{c}{s_sfx} {}, {op2_text}", op.mnemonic(), reg(rd))
            } else {
                format!("{}{c}{s_sfx} {}, {}, {op2_text}", op.mnemonic(), reg(rd), reg(rn))
            }
        }
        Instruction::Multiply {
            accumulate,
            s,
            rd,
            rn,
            rs,
            rm,
        } => {
            let s_sfx = if s { "S" } else { "" };
            if accumulate {
                format!("MLA{c}{s_sfx} {}, {}, {}, {}", reg(rd), reg(rm), reg(rs), reg(rn))
            } else {
                format!("MUL{c}{s_sfx} {}, {}, {}", reg(rd), reg(rm), reg(rs))
            }
        }
        Instruction::MultiplyLong {
            signed,
            accumulate,
            s,
            rd_hi,
            rd_lo,
            rs,
            rm,
        } => {
            let name = match (signed, accumulate) {
                (false, false) => "UMULL",
                (false, true) => "UMLAL",
                (true, false) => "SMULL",
                (true, true) => "SMLAL",
            };
            let s_sfx = if s { "S" } else { "" };
            format!(
                "{name}{c}{s_sfx} {}, {}, {}, {}",
                reg(rd_lo),
                reg(rd_hi),
                reg(rm),
                reg(rs)
            )
        }
        Instruction::SingleTransfer {
            load,
            byte,
            pre,
            up,
            writeback,
            rn,
            rd,
            offset,
        } => {
            let name = if load { "LDR" } else { "STR" };
            let b = if byte { "B" } else { "" };
            let addr_text = address_text(rn, pre, up, writeback, &transfer_offset(offset));
            format!("{name}{c}{b} {}, {addr_text}", reg(rd))
        }
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
        } => {
            let name = if load { "LDR" } else { "STR" };
            let sfx = match (signed, half) {
                (false, true) => "H",
                (true, false) => "SB",
                (true, true) => "SH",
                (false, false) => "?",
            };
            let off_text = match offset {
                HalfOffset::Immediate(imm) => OffsetText::Imm(imm),
                HalfOffset::Register(rm) => OffsetText::Reg(rm, None),
            };
            let addr_text = address_text(rn, pre, up, writeback, &off_text);
            format!("{name}{c}{sfx} {}, {addr_text}", reg(rd))
        }
        Instruction::BlockTransfer {
            load,
            pre,
            up,
            s_bit: _,
            writeback,
            rn,
            regs,
        } => {
            let name = if load { "LDM" } else { "STM" };
            let mode = match (pre, up) {
                (false, true) => "IA",
                (true, true) => "IB",
                (false, false) => "DA",
                (true, false) => "DB",
            };
            let wb = if writeback { "!" } else { "" };
            format!("{name}{c}{mode} {}{wb}, {}", reg(rn), reglist(regs))
        }
        Instruction::Branch { link, offset } => {
            let name = if link { "BL" } else { "B" };
            let target = addr.wrapping_add(8).wrapping_add(offset as u32);
            format!("{name}{c} {target:#010X}")
        }
        Instruction::BranchExchange { rm } => format!("BX{c} {}", reg(rm)),
        Instruction::Mrs { rd } => format!("MRS{c} {}, CPSR", reg(rd)),
        Instruction::Msr { flags: _, src } => match src {
            MsrSource::Register(rm) => format!("MSR{c} CPSR, {}", reg(rm)),
            MsrSource::Immediate { imm8, rotate } => {
                let value = cpu_arm2::rotated_imm(imm8, rotate);
                format!("MSR{c} CPSR, #{value:#X}")
            }
        },
        Instruction::Swi { comment } => format!("SWI{c} {comment:#X}"),
        Instruction::Coprocessor { word } => format!("; coprocessor {word:#010X}"),
        Instruction::Undefined { word } => format!("; undefined {word:#010X}"),
    }
}

enum OffsetText {
    Imm(u32),
    Reg(u8, Option<(ShiftKind, u32)>),
}

fn transfer_offset(offset: TransferOffset) -> OffsetText {
    match offset {
        TransferOffset::Immediate(imm) => OffsetText::Imm(imm),
        TransferOffset::Register { rm, shift, amount } => {
            if amount == 0 && shift == ShiftKind::Lsl {
                OffsetText::Reg(rm, None)
            } else {
                OffsetText::Reg(rm, Some((shift, amount)))
            }
        }
    }
}

fn address_text(rn: u8, pre: bool, up: bool, writeback: bool, offset: &OffsetText) -> String {
    let sign = if up { "" } else { "-" };
    let off = match offset {
        OffsetText::Imm(0) => String::new(),
        OffsetText::Imm(imm) => format!(", #{sign}{imm}"),
        OffsetText::Reg(rm, None) => format!(", {sign}{}", reg(*rm)),
        OffsetText::Reg(rm, Some((kind, amount))) => {
            format!(", {sign}{}, {} #{amount}", reg(*rm), kind.mnemonic())
        }
    };
    if pre {
        let wb = if writeback { "!" } else { "" };
        format!("[{}{off}]{wb}", reg(rn))
    } else {
        format!("[{}]{}", reg(rn), off)
    }
}

fn operand2(op2: Operand2) -> String {
    match op2 {
        Operand2::Immediate { imm8, rotate } => {
            let value = cpu_arm2::rotated_imm(imm8, rotate);
            format!("#{value}")
        }
        Operand2::Register { rm, shift, amount } => match amount {
            ShiftAmount::Immediate(0) if shift == ShiftKind::Lsl => reg(rm).to_string(),
            ShiftAmount::Immediate(0) if shift == ShiftKind::Ror => format!("{}, RRX", reg(rm)),
            ShiftAmount::Immediate(0) => {
                // LSR/ASR #0 encode a shift by 32
                format!("{}, {} #32", reg(rm), shift.mnemonic())
            }
            ShiftAmount::Immediate(n) => format!("{}, {} #{n}", reg(rm), shift.mnemonic()),
            ShiftAmount::Register(rs) => format!("{}, {} {}", reg(rm), shift.mnemonic(), reg(rs)),
        },
    }
}

/// Render a register-list bitmap with ranges (`{R0-R3, LR}`).
#[must_use]
pub fn reglist(regs: u16) -> String {
    let mut parts = Vec::new();
    let mut n = 0u8;
    while n < 16 {
        if regs & (1 << n) == 0 {
            n += 1;
            continue;
        }
        let start = n;
        while n + 1 < 16 && regs & (1 << (n + 1)) != 0 {
            n += 1;
        }
        if n > start + 1 {
            parts.push(format!("{}-{}", reg(start), reg(n)));
        } else if n == start + 1 {
            parts.push(reg(start).to_string());
            parts.push(reg(n).to_string());
        } else {
            parts.push(reg(start).to_string());
        }
        n += 1;
    }
    format!("{{{}}}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_processing() {
        assert_eq!(disassemble(0xE3A0_002A, 0x8000), "MOV R0, #42");
        assert_eq!(disassemble(0xE090_1002, 0x8000), "ADDS R1, R0, R2");
        assert_eq!(disassemble(0x0350_0005, 0x8000), "CMPEQ R0, #5");
    }

    #[test]
    fn shifted_operand() {
        // MOV R1, R0, LSR #1
        assert_eq!(disassemble(0xE1A0_10A0, 0x8000), "MOV R1, R0, LSR #1");
    }

    #[test]
    fn memory_forms() {
        assert_eq!(disassemble(0xE5A0_1004, 0x8000), "STR R1, [R0, #4]!");
        assert_eq!(disassemble(0xE490_1004, 0x8000), "LDR R1, [R0], #4");
        assert_eq!(disassemble(0xE5D0_1001, 0x8000), "LDRB R1, [R0, #1]");
    }

    #[test]
    fn block_and_branch() {
        assert_eq!(disassemble(0xE92D_4003, 0x8000), "STMDB SP!, {R0, R1, LR}");
        assert_eq!(disassemble(0xE8BD_800F, 0x8000), "LDMIA SP!, {R0-R3, PC}");
        assert_eq!(disassemble(0xEB00_0002, 0x8000), "BL 0x00008010");
    }

    #[test]
    fn swi_and_bx() {
        assert_eq!(disassemble(0xEF00_0000, 0x8000), "SWI 0x0");
        assert_eq!(disassemble(0xE12F_FF1E, 0x8000), "BX LR");
    }

    #[test]
    fn reglist_ranges() {
        assert_eq!(reglist(0x800F), "{R0-R3, PC}");
        assert_eq!(reglist(0x0003), "{R0, R1}");
        assert_eq!(reglist(0x4000), "{LR}");
    }
}
