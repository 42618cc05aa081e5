//! Mnemonic splitting: base operation, condition suffix, flag suffix.
//!
//! ARM mnemonics pack up to three fields into one word (`ADDEQS` = ADD,
//! if-equal, set-flags). Splitting is ambiguous in places (`BLS` is B/LS,
//! not BL/S), so candidates are tried longest-base-first with a validity
//! check on the remainder, backtracking to shorter bases.

use crate::ast::BlockMode;
use cpu_arm2::{Condition, DpOp};

/// Base operation families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Dp(DpOp),
    Mul,
    Mla,
    MulLong { signed: bool, accumulate: bool },
    Mem { load: bool },
    Block { load: bool },
    Push,
    Pop,
    B,
    Bl,
    Bx,
    Mrs,
    Msr,
    Swi,
    Nop,
}

/// Memory access width parsed from an LDR/STR suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemSize {
    Word,
    Byte,
    Half,
    SignedByte,
    SignedHalf,
}

/// A fully split mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedMnemonic {
    pub family: Family,
    pub cond: Condition,
    pub s: bool,
    /// Access width for the Mem family.
    pub size: MemSize,
    /// Addressing mode for the Block family (default IA).
    pub mode: BlockMode,
}

impl ParsedMnemonic {
    fn new(family: Family, cond: Condition, s: bool) -> Self {
        Self {
            family,
            cond,
            s,
            size: MemSize::Word,
            mode: BlockMode::Ia,
        }
    }
}

/// Split a mnemonic, or `None` if it is not an instruction.
#[must_use]
pub fn parse_mnemonic(text: &str) -> Option<ParsedMnemonic> {
    let up = text.to_ascii_uppercase();

    // Longest bases first; the validity check on the remainder resolves
    // collisions like BLS/BLT vs BL and BICS vs B.
    const DP_BASES: [(&str, DpOp); 16] = [
        ("AND", DpOp::And),
        ("EOR", DpOp::Eor),
        ("SUB", DpOp::Sub),
        ("RSB", DpOp::Rsb),
        ("ADD", DpOp::Add),
        ("ADC", DpOp::Adc),
        ("SBC", DpOp::Sbc),
        ("RSC", DpOp::Rsc),
        ("TST", DpOp::Tst),
        ("TEQ", DpOp::Teq),
        ("CMP", DpOp::Cmp),
        ("CMN", DpOp::Cmn),
        ("ORR", DpOp::Orr),
        ("MOV", DpOp::Mov),
        ("BIC", DpOp::Bic),
        ("MVN", DpOp::Mvn),
    ];

    const LONG_MULS: [(&str, bool, bool); 4] = [
        ("UMULL", false, false),
        ("SMULL", true, false),
        ("UMLAL", false, true),
        ("SMLAL", true, true),
    ];

    for (base, signed, accumulate) in LONG_MULS {
        if let Some(rest) = up.strip_prefix(base) {
            if let Some((cond, s)) = cond_s(rest) {
                return Some(ParsedMnemonic::new(
                    Family::MulLong { signed, accumulate },
                    cond,
                    s,
                ));
            }
        }
    }

    for (base, op) in DP_BASES {
        if let Some(rest) = up.strip_prefix(base) {
            if let Some((cond, s)) = cond_s(rest) {
                // Compares set flags implicitly; a redundant S is accepted.
                let s = s || op.is_compare();
                return Some(ParsedMnemonic::new(Family::Dp(op), cond, s));
            }
        }
    }

    for (base, load) in [("LDR", true), ("STR", false)] {
        if let Some(rest) = up.strip_prefix(base) {
            if let Some((cond, size)) = mem_suffix(rest, load) {
                let mut m = ParsedMnemonic::new(Family::Mem { load }, cond, false);
                m.size = size;
                return Some(m);
            }
        }
    }

    for (base, load) in [("LDM", true), ("STM", false)] {
        if let Some(rest) = up.strip_prefix(base) {
            if let Some((cond, mode)) = block_suffix(rest, load) {
                let mut m = ParsedMnemonic::new(Family::Block { load }, cond, false);
                m.mode = mode;
                return Some(m);
            }
        }
    }

    for (base, family) in [
        ("PUSH", Family::Push),
        ("POP", Family::Pop),
        ("MUL", Family::Mul),
        ("MLA", Family::Mla),
    ] {
        if let Some(rest) = up.strip_prefix(base) {
            if let Some((cond, s)) = cond_s(rest) {
                if matches!(family, Family::Push | Family::Pop) && s {
                    continue;
                }
                return Some(ParsedMnemonic::new(family, cond, s));
            }
        }
    }

    for (base, family) in [
        ("MRS", Family::Mrs),
        ("MSR", Family::Msr),
        ("SWI", Family::Swi),
        ("SVC", Family::Swi),
        ("NOP", Family::Nop),
        ("BX", Family::Bx),
        ("BL", Family::Bl),
        ("B", Family::B),
    ] {
        if let Some(rest) = up.strip_prefix(base) {
            if let Some(cond) = cond_only(rest) {
                return Some(ParsedMnemonic::new(family, cond, false));
            }
        }
    }

    None
}

/// Parse `[cond][S]` in either order.
fn cond_s(rest: &str) -> Option<(Condition, bool)> {
    if rest.is_empty() {
        return Some((Condition::Al, false));
    }
    if rest == "S" {
        return Some((Condition::Al, true));
    }
    if let Some(cond) = Condition::from_suffix(rest) {
        return Some((cond, false));
    }
    if rest.len() == 3 {
        if let Some(pre) = rest.strip_suffix('S') {
            if let Some(cond) = Condition::from_suffix(pre) {
                return Some((cond, true));
            }
        }
        if let Some(post) = rest.strip_prefix('S') {
            if let Some(cond) = Condition::from_suffix(post) {
                return Some((cond, true));
            }
        }
    }
    None
}

/// Parse a bare condition (or nothing).
fn cond_only(rest: &str) -> Option<Condition> {
    if rest.is_empty() {
        Some(Condition::Al)
    } else {
        Condition::from_suffix(rest)
    }
}

/// Parse `[cond][size]` or `[size][cond]` for LDR/STR.
fn mem_suffix(rest: &str, load: bool) -> Option<(Condition, MemSize)> {
    const SIZES: [(&str, MemSize); 5] = [
        ("SB", MemSize::SignedByte),
        ("SH", MemSize::SignedHalf),
        ("B", MemSize::Byte),
        ("H", MemSize::Half),
        ("", MemSize::Word),
    ];
    for (sfx, size) in SIZES {
        // Signed loads only; there is no signed store.
        let signed = matches!(size, MemSize::SignedByte | MemSize::SignedHalf);
        if signed && !load {
            continue;
        }
        if let Some(pre) = rest.strip_suffix(sfx) {
            if let Some(cond) = cond_only(pre) {
                return Some((cond, size));
            }
        }
        if !sfx.is_empty() {
            if let Some(post) = rest.strip_prefix(sfx) {
                if let Some(cond) = cond_only(post) {
                    return Some((cond, size));
                }
            }
        }
    }
    None
}

/// Parse `[cond][mode]` or `[mode][cond]` for LDM/STM. Mode defaults to IA.
fn block_suffix(rest: &str, load: bool) -> Option<(Condition, BlockMode)> {
    if rest.is_empty() {
        return Some((Condition::Al, BlockMode::Ia));
    }
    if rest.len() == 2 {
        if let Some(mode) = BlockMode::from_suffix(rest, load) {
            return Some((Condition::Al, mode));
        }
        if let Some(cond) = Condition::from_suffix(rest) {
            return Some((cond, BlockMode::Ia));
        }
        return None;
    }
    if rest.len() == 4 {
        let (a, b) = rest.split_at(2);
        if let (Some(cond), Some(mode)) = (Condition::from_suffix(a), BlockMode::from_suffix(b, load))
        {
            return Some((cond, mode));
        }
        if let (Some(mode), Some(cond)) = (BlockMode::from_suffix(a, load), Condition::from_suffix(b))
        {
            return Some((cond, mode));
        }
    }
    None
}
