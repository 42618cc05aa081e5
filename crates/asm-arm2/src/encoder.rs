//! Binary encoder: parsed items to 32-bit ARM words and data bytes.
//!
//! Runs after pass 1 has fixed every address. Each instruction becomes
//! exactly one word; directives become their byte payloads; literal pools
//! become their deduplicated constant words. Encoding failures accumulate
//! like every other assembler error.

use crate::ast::{
    AddrOffset, Address, AsmOp2, AsmShift, DataSpec, Expr, InstrKind, Item, MsrOperand,
    ParsedInstruction, Pool,
};
use crate::error::{AsmError, AsmErrorKind, SourceLoc};
use crate::parser::ParseOutput;
use crate::program::{Chunk, Program, SourceMap, SourceMapEntry};
use crate::symbols::SymbolTable;
use cpu_arm2::{DpOp, ShiftKind};

/// Encode a parse output into a program image.
pub fn encode(output: ParseOutput) -> (Program, Vec<AsmError>) {
    let mut errors = Vec::new();
    let mut chunks = ChunkBuilder::new();
    let mut source_map = SourceMap::default();

    let ParseOutput {
        items,
        symbols,
        pools,
        origin,
        entry_point,
    } = output;

    for item in &items {
        match item {
            Item::Instruction(instr) => {
                let word = encode_instruction(instr, &symbols, &pools, &mut errors);
                chunks.push(instr.address, &word.to_le_bytes(), &instr.loc, &mut errors);
                source_map.push(SourceMapEntry {
                    address: instr.address,
                    size: 4,
                    file: instr.loc.file.clone(),
                    line: instr.loc.line,
                    text: String::new(),
                    is_instruction: true,
                });
            }
            Item::Data {
                address, spec, loc, ..
            } => {
                let bytes = encode_data(spec, &symbols, *address, loc, &mut errors);
                if !bytes.is_empty() {
                    chunks.push(*address, &bytes, loc, &mut errors);
                    source_map.push(SourceMapEntry {
                        address: *address,
                        size: bytes.len() as u32,
                        file: loc.file.clone(),
                        line: loc.line,
                        text: String::new(),
                        is_instruction: false,
                    });
                }
            }
            Item::Pool { index, .. } => {
                let pool = &pools[*index];
                for (i, literal) in pool.literals.iter().enumerate() {
                    let addr = pool.entry_address(i);
                    match eval_u32(&literal.expr, &symbols, addr) {
                        Ok(value) => {
                            chunks.push(addr, &value.to_le_bytes(), &literal.loc, &mut errors);
                        }
                        Err(msg) => errors.push(AsmError::new(
                            AsmErrorKind::UndefinedSymbol,
                            msg,
                            literal.loc.clone(),
                            String::new(),
                        )),
                    }
                }
                if !pool.literals.is_empty() {
                    source_map.push(SourceMapEntry {
                        address: pool.address,
                        size: 4 * pool.literals.len() as u32,
                        file: pool.literals[0].loc.file.clone(),
                        line: pool.literals[0].loc.line,
                        text: "<literal pool>".to_string(),
                        is_instruction: false,
                    });
                }
            }
        }
    }

    source_map.finish();
    let program = Program {
        origin,
        entry_point,
        chunks: chunks.finish(),
        symbols,
        source_map,
    };
    (program, errors)
}

/// Accumulates bytes into address-sorted, merged chunks.
struct ChunkBuilder {
    chunks: Vec<Chunk>,
}

impl ChunkBuilder {
    fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    fn push(&mut self, address: u32, bytes: &[u8], loc: &SourceLoc, errors: &mut Vec<AsmError>) {
        if bytes.is_empty() {
            return;
        }
        // Items arrive in source order; within a section addresses ascend,
        // so appending to the chunk that ends here covers the common case.
        if let Some(last) = self
            .chunks
            .iter_mut()
            .find(|c| c.end() == address)
        {
            last.bytes.extend_from_slice(bytes);
            return;
        }
        let overlaps = self
            .chunks
            .iter()
            .any(|c| address < c.end() && address + bytes.len() as u32 > c.address);
        if overlaps {
            errors.push(AsmError::new(
                AsmErrorKind::InvalidDirective,
                format!("output overlaps existing bytes at {address:#010X}"),
                loc.clone(),
                String::new(),
            ));
            return;
        }
        self.chunks.push(Chunk {
            address,
            bytes: bytes.to_vec(),
        });
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.chunks.sort_by_key(|c| c.address);
        // Merge runs that became adjacent after sorting
        let mut merged: Vec<Chunk> = Vec::with_capacity(self.chunks.len());
        for chunk in self.chunks {
            match merged.last_mut() {
                Some(prev) if prev.end() == chunk.address => {
                    prev.bytes.extend_from_slice(&chunk.bytes);
                }
                _ => merged.push(chunk),
            }
        }
        merged
    }
}

fn eval_u32(expr: &Expr, symbols: &SymbolTable, at: u32) -> Result<u32, String> {
    let v = expr.eval(symbols, at)?;
    if !(-(1i64 << 31)..1i64 << 32).contains(&v) {
        return Err(format!("value {v} does not fit in 32 bits"));
    }
    Ok(v as u32)
}

fn encode_data(
    spec: &DataSpec,
    symbols: &SymbolTable,
    address: u32,
    loc: &SourceLoc,
    errors: &mut Vec<AsmError>,
) -> Vec<u8> {
    let mut push_err = |msg: String| {
        errors.push(AsmError::new(
            AsmErrorKind::InvalidOperand,
            msg,
            loc.clone(),
            String::new(),
        ));
    };
    match spec {
        DataSpec::Words(exprs) => {
            let mut out = Vec::with_capacity(4 * exprs.len());
            for e in exprs {
                match eval_u32(e, symbols, address) {
                    Ok(v) => out.extend_from_slice(&v.to_le_bytes()),
                    Err(msg) => {
                        push_err(msg);
                        out.extend_from_slice(&[0; 4]);
                    }
                }
            }
            out
        }
        DataSpec::Halves(exprs) => {
            let mut out = Vec::with_capacity(2 * exprs.len());
            for e in exprs {
                match e.eval(symbols, address) {
                    Ok(v) if (-0x8000..0x1_0000).contains(&v) => {
                        out.extend_from_slice(&(v as u16).to_le_bytes());
                    }
                    Ok(v) => {
                        push_err(format!("value {v} does not fit in 16 bits"));
                        out.extend_from_slice(&[0; 2]);
                    }
                    Err(msg) => {
                        push_err(msg);
                        out.extend_from_slice(&[0; 2]);
                    }
                }
            }
            out
        }
        DataSpec::Bytes(exprs) => {
            let mut out = Vec::with_capacity(exprs.len());
            for e in exprs {
                match e.eval(symbols, address) {
                    Ok(v) if (-0x80..0x100).contains(&v) => out.push(v as u8),
                    Ok(v) => {
                        push_err(format!("value {v} does not fit in 8 bits"));
                        out.push(0);
                    }
                    Err(msg) => {
                        push_err(msg);
                        out.push(0);
                    }
                }
            }
            out
        }
        DataSpec::Ascii(bytes) => bytes.clone(),
        DataSpec::Space(n) => vec![0; *n as usize],
    }
}

/// Encode one instruction to its 32-bit word. Failures push an error and
/// return a recognizable filler so later diagnostics still line up.
fn encode_instruction(
    instr: &ParsedInstruction,
    symbols: &SymbolTable,
    pools: &[Pool],
    errors: &mut Vec<AsmError>,
) -> u32 {
    match try_encode(instr, symbols, pools) {
        Ok(word) => word,
        Err((kind, msg)) => {
            errors.push(AsmError::new(kind, msg, instr.loc.clone(), String::new()));
            0
        }
    }
}

type EncodeResult = Result<u32, (AsmErrorKind, String)>;

fn invalid(msg: impl Into<String>) -> (AsmErrorKind, String) {
    (AsmErrorKind::InvalidOperand, msg.into())
}

fn try_encode(instr: &ParsedInstruction, symbols: &SymbolTable, pools: &[Pool]) -> EncodeResult {
    let cond = instr.cond.bits() << 28;
    let at = instr.address;

    match &instr.kind {
        InstrKind::Dp { op, s, rd, rn, op2 } => {
            encode_dp(cond, *op, *s, *rd, *rn, op2, symbols, at)
        }
        InstrKind::Mul { s, rd, rm, rs } => Ok(cond
            | (u32::from(*s) << 20)
            | (u32::from(*rd) << 16)
            | (u32::from(*rs) << 8)
            | 0x90
            | u32::from(*rm)),
        InstrKind::Mla { s, rd, rm, rs, rn } => Ok(cond
            | (1 << 21)
            | (u32::from(*s) << 20)
            | (u32::from(*rd) << 16)
            | (u32::from(*rn) << 12)
            | (u32::from(*rs) << 8)
            | 0x90
            | u32::from(*rm)),
        InstrKind::MulLong {
            signed,
            accumulate,
            s,
            rd_lo,
            rd_hi,
            rm,
            rs,
        } => Ok(cond
            | (1 << 23)
            | (u32::from(*signed) << 22)
            | (u32::from(*accumulate) << 21)
            | (u32::from(*s) << 20)
            | (u32::from(*rd_hi) << 16)
            | (u32::from(*rd_lo) << 12)
            | (u32::from(*rs) << 8)
            | 0x90
            | u32::from(*rm)),
        InstrKind::Mem {
            load,
            byte,
            rd,
            addr,
        } => encode_mem(cond, *load, *byte, *rd, addr, instr, symbols, pools),
        InstrKind::MemHalf {
            load,
            signed,
            half,
            rd,
            addr,
        } => encode_mem_half(cond, *load, *signed, *half, *rd, addr, instr, symbols),
        InstrKind::Block {
            load,
            mode,
            rn,
            writeback,
            regs,
        } => {
            let (p, u) = mode.bits();
            Ok(cond
                | (0b100 << 25)
                | (u32::from(p) << 24)
                | (u32::from(u) << 23)
                | (u32::from(*writeback) << 21)
                | (u32::from(*load) << 20)
                | (u32::from(*rn) << 16)
                | u32::from(*regs))
        }
        InstrKind::Branch { link, target } => {
            let target = eval_u32(target, symbols, at).map_err(invalid)?;
            let offset = i64::from(target) - i64::from(at.wrapping_add(8));
            if offset % 4 != 0 {
                return Err(invalid(format!("branch target {target:#010X} is not word-aligned")));
            }
            let words = offset / 4;
            if !(-(1 << 23)..1 << 23).contains(&words) {
                return Err(invalid("branch target out of range (±32 MiB)"));
            }
            Ok(cond
                | (0b101 << 25)
                | (u32::from(*link) << 24)
                | ((words as u32) & 0x00FF_FFFF))
        }
        InstrKind::Bx { rm } => Ok(cond | 0x012F_FF10 | u32::from(*rm)),
        InstrKind::Mrs { rd } => Ok(cond | 0x010F_0000 | (u32::from(*rd) << 12)),
        InstrKind::Msr { src } => match src {
            MsrOperand::Reg(rm) => Ok(cond | 0x0128_F000 | u32::from(*rm)),
            MsrOperand::Imm(expr) => {
                let value = eval_u32(expr, symbols, at).map_err(invalid)?;
                let (imm8, rotate) = encode_rotated_imm(value)
                    .ok_or_else(|| invalid(format!("immediate {value:#X} not representable")))?;
                Ok(cond | 0x0328_F000 | (rotate << 8) | imm8)
            }
        },
        InstrKind::Swi { comment } => {
            let value = eval_u32(comment, symbols, at).map_err(invalid)?;
            if value > 0x00FF_FFFF {
                return Err(invalid("SWI comment exceeds 24 bits"));
            }
            Ok(cond | 0x0F00_0000 | value)
        }
    }
}

/// Find `(imm8, rotate)` with `value == imm8 ror (2 * rotate)`.
#[must_use]
pub fn encode_rotated_imm(value: u32) -> Option<(u32, u32)> {
    for rotate in 0..16 {
        let imm8 = value.rotate_left(2 * rotate);
        if imm8 <= 0xFF {
            return Some((imm8, rotate));
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn encode_dp(
    cond: u32,
    op: DpOp,
    s: bool,
    rd: u8,
    rn: u8,
    op2: &AsmOp2,
    symbols: &SymbolTable,
    at: u32,
) -> EncodeResult {
    let mut op = op;
    let base = |op: DpOp| {
        cond | (op.bits() << 21)
            | (u32::from(s || op.is_compare()) << 20)
            | (u32::from(rn) << 16)
            | (u32::from(rd) << 12)
    };

    let op2_bits = match op2 {
        AsmOp2::Imm(expr) => {
            let value = eval_u32(expr, symbols, at).map_err(invalid)?;
            match encode_rotated_imm(value) {
                Some((imm8, rotate)) => (1 << 25) | (rotate << 8) | imm8,
                None => {
                    // MOV of an unencodable value becomes MVN of its
                    // complement (and vice versa). ARM2 has no MOVW.
                    let flipped = match op {
                        DpOp::Mov => Some(DpOp::Mvn),
                        DpOp::Mvn => Some(DpOp::Mov),
                        _ => None,
                    };
                    let Some(new_op) = flipped else {
                        return Err(invalid(format!(
                            "immediate {value:#X} not representable"
                        )));
                    };
                    let Some((imm8, rotate)) = encode_rotated_imm(!value) else {
                        return Err(invalid(format!(
                            "immediate {value:#X} not representable"
                        )));
                    };
                    op = new_op;
                    (1 << 25) | (rotate << 8) | imm8
                }
            }
        }
        AsmOp2::Reg { rm, shift } => {
            encode_shift_bits(shift.as_ref(), symbols, at)? | u32::from(*rm)
        }
    };

    Ok(base(op) | op2_bits)
}

/// Shift field bits 11:4 for a register operand.
fn encode_shift_bits(
    shift: Option<&AsmShift>,
    symbols: &SymbolTable,
    at: u32,
) -> Result<u32, (AsmErrorKind, String)> {
    let Some(shift) = shift else {
        return Ok(0);
    };
    match shift {
        AsmShift::Rrx => Ok(ShiftKind::Ror.bits() << 5),
        AsmShift::ByReg { kind, rs } => {
            Ok((u32::from(*rs) << 8) | (kind.bits() << 5) | (1 << 4))
        }
        AsmShift::ByImm { kind, amount } => {
            let n = eval_u32(amount, symbols, at).map_err(invalid)?;
            let encoded = match kind {
                ShiftKind::Lsl => {
                    if n > 31 {
                        return Err(invalid("LSL amount must be 0-31"));
                    }
                    n
                }
                ShiftKind::Lsr | ShiftKind::Asr => match n {
                    0 => return Ok(0), // no-op shift
                    1..=31 => n,
                    32 => 0,
                    _ => {
                        return Err(invalid(format!(
                            "{} amount must be 1-32",
                            kind.mnemonic()
                        )));
                    }
                },
                ShiftKind::Ror => match n {
                    0 => return Ok(0),
                    1..=31 => n,
                    _ => return Err(invalid("ROR amount must be 1-31")),
                },
            };
            Ok((encoded << 7) | (kind.bits() << 5))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn encode_mem(
    cond: u32,
    load: bool,
    byte: bool,
    rd: u8,
    addr: &Address,
    instr: &ParsedInstruction,
    symbols: &SymbolTable,
    pools: &[Pool],
) -> EncodeResult {
    let at = instr.address;
    let base = cond
        | (0b01 << 26)
        | (u32::from(byte) << 22)
        | (u32::from(load) << 20)
        | (u32::from(rd) << 12);

    let with_imm = |p: bool, w: bool, rn: u8, offset: i64| -> EncodeResult {
        let up = offset >= 0;
        let magnitude = offset.unsigned_abs();
        if magnitude > 4095 {
            return Err(invalid(format!("offset {offset} exceeds 12 bits")));
        }
        Ok(base
            | (u32::from(p) << 24)
            | (u32::from(up) << 23)
            | (u32::from(w) << 21)
            | (u32::from(rn) << 16)
            | magnitude as u32)
    };

    match addr {
        Address::Pre {
            rn,
            offset,
            writeback,
        } => encode_mem_offset(base, *rn, offset, true, *writeback, symbols, at, with_imm),
        Address::Post { rn, offset } => {
            encode_mem_offset(base, *rn, offset, false, false, symbols, at, with_imm)
        }
        Address::PcRelative { target } => {
            let target = eval_u32(target, symbols, at).map_err(invalid)?;
            let offset = i64::from(target) - i64::from(at.wrapping_add(8));
            with_imm(true, false, 15, offset)
        }
        Address::Literal { text, expr: _ } => {
            if !load || byte {
                return Err(invalid("=literal is only valid with LDR"));
            }
            let pool = pools
                .iter()
                .filter(|p| p.section == instr.section && p.address >= at)
                .min_by_key(|p| p.address)
                .ok_or_else(|| invalid("no literal pool in range (missing .ltorg?)"))?;
            let entry = pool
                .find(text)
                .ok_or_else(|| invalid("literal missing from pool"))?;
            let offset = i64::from(pool.entry_address(entry)) - i64::from(at.wrapping_add(8));
            if offset.unsigned_abs() > 4095 {
                return Err(invalid("literal pool out of range"));
            }
            with_imm(true, false, 15, offset)
        }
    }
}

/// Shared pre/post offset encoding for word/byte transfers.
#[allow(clippy::too_many_arguments)]
fn encode_mem_offset(
    base: u32,
    rn: u8,
    offset: &AddrOffset,
    pre: bool,
    writeback: bool,
    symbols: &SymbolTable,
    at: u32,
    with_imm: impl Fn(bool, bool, u8, i64) -> EncodeResult,
) -> EncodeResult {
    match offset {
        AddrOffset::Imm { expr, negative } => {
            let v = expr.eval(symbols, at).map_err(invalid)?;
            let v = if *negative { -v } else { v };
            with_imm(pre, writeback, rn, v)
        }
        AddrOffset::Reg {
            rm,
            negative,
            shift,
        } => {
            if matches!(shift, Some(AsmShift::ByReg { .. })) {
                return Err(invalid("register-shifted offsets must use an immediate amount"));
            }
            let shift_bits = encode_shift_bits(shift.as_ref(), symbols, at)?;
            Ok(base
                | (1 << 25)
                | (u32::from(pre) << 24)
                | (u32::from(!negative) << 23)
                | (u32::from(writeback) << 21)
                | (u32::from(rn) << 16)
                | shift_bits
                | u32::from(*rm))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn encode_mem_half(
    cond: u32,
    load: bool,
    signed: bool,
    half: bool,
    rd: u8,
    addr: &Address,
    instr: &ParsedInstruction,
    symbols: &SymbolTable,
) -> EncodeResult {
    let at = instr.address;
    let sh = (u32::from(signed) << 6) | (u32::from(half) << 5);
    let base = cond
        | (u32::from(load) << 20)
        | (u32::from(rd) << 12)
        | 0x90
        | sh;

    let with_imm = |p: bool, w: bool, rn: u8, offset: i64| -> EncodeResult {
        let up = offset >= 0;
        let magnitude = offset.unsigned_abs();
        if magnitude > 255 {
            return Err(invalid(format!("offset {offset} exceeds 8 bits")));
        }
        let m = magnitude as u32;
        Ok(base
            | (u32::from(p) << 24)
            | (u32::from(up) << 23)
            | (1 << 22)
            | (u32::from(w) << 21)
            | (u32::from(rn) << 16)
            | ((m & 0xF0) << 4)
            | (m & 0xF))
    };

    let with_reg = |p: bool, w: bool, rn: u8, rm: u8, up: bool| -> EncodeResult {
        Ok(base
            | (u32::from(p) << 24)
            | (u32::from(up) << 23)
            | (u32::from(w) << 21)
            | (u32::from(rn) << 16)
            | u32::from(rm))
    };

    match addr {
        Address::Pre {
            rn,
            offset,
            writeback,
        } => match offset {
            AddrOffset::Imm { expr, negative } => {
                let v = expr.eval(symbols, at).map_err(invalid)?;
                with_imm(true, *writeback, *rn, if *negative { -v } else { v })
            }
            AddrOffset::Reg {
                rm,
                negative,
                shift,
            } => {
                if shift.is_some() {
                    return Err(invalid("halfword transfers take unshifted register offsets"));
                }
                with_reg(true, *writeback, *rn, *rm, !negative)
            }
        },
        Address::Post { rn, offset } => match offset {
            AddrOffset::Imm { expr, negative } => {
                let v = expr.eval(symbols, at).map_err(invalid)?;
                with_imm(false, false, *rn, if *negative { -v } else { v })
            }
            AddrOffset::Reg {
                rm,
                negative,
                shift,
            } => {
                if shift.is_some() {
                    return Err(invalid("halfword transfers take unshifted register offsets"));
                }
                with_reg(false, false, *rn, *rm, !negative)
            }
        },
        Address::PcRelative { target } => {
            let target = eval_u32(target, symbols, at).map_err(invalid)?;
            let offset = i64::from(target) - i64::from(at.wrapping_add(8));
            with_imm(true, false, 15, offset)
        }
        Address::Literal { .. } => Err(invalid("=literal is only valid with LDR")),
    }
}
