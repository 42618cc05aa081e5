//! ALU and barrel shifter operations for the ARM2.
//!
//! The barrel shifter sits in front of the ALU: every data-processing
//! operand 2 passes through it, producing both the shifted value and a
//! carry-out. The carry-out becomes the C flag for flag-setting logical
//! operations; arithmetic operations compute their own carry.

/// Result of a barrel shift: shifted value plus carry-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftResult {
    pub value: u32,
    pub carry: bool,
}

/// Result of an arithmetic ALU operation with flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluResult {
    pub value: u32,
    pub carry: bool,
    pub overflow: bool,
}

/// Shift type field values (bits 6:5 of a shifted-register operand).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    /// Logical shift left.
    Lsl = 0,
    /// Logical shift right.
    Lsr = 1,
    /// Arithmetic shift right.
    Asr = 2,
    /// Rotate right. `ROR #0` encodes RRX (rotate right extended).
    Ror = 3,
}

impl ShiftKind {
    /// Decode from the 2-bit shift type field.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }

    /// The 2-bit encoding.
    #[must_use]
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Assembler mnemonic.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Lsl => "LSL",
            Self::Lsr => "LSR",
            Self::Asr => "ASR",
            Self::Ror => "ROR",
        }
    }
}

/// Barrel shift with an immediate amount (0-31 as encoded).
///
/// Amount 0 is special-cased per the ARM ARM: `LSL #0` passes the value
/// through with the old carry, `LSR #0` and `ASR #0` mean a shift by 32,
/// and `ROR #0` is RRX.
#[must_use]
pub fn shift_imm(kind: ShiftKind, value: u32, amount: u32, carry_in: bool) -> ShiftResult {
    match kind {
        ShiftKind::Lsl => {
            if amount == 0 {
                ShiftResult {
                    value,
                    carry: carry_in,
                }
            } else {
                ShiftResult {
                    value: value << amount,
                    carry: value & (1 << (32 - amount)) != 0,
                }
            }
        }
        ShiftKind::Lsr => {
            if amount == 0 {
                // LSR #32
                ShiftResult {
                    value: 0,
                    carry: value & (1 << 31) != 0,
                }
            } else {
                ShiftResult {
                    value: value >> amount,
                    carry: value & (1 << (amount - 1)) != 0,
                }
            }
        }
        ShiftKind::Asr => {
            if amount == 0 {
                // ASR #32: result is all sign bits
                let sign = value & (1 << 31) != 0;
                ShiftResult {
                    value: if sign { 0xFFFF_FFFF } else { 0 },
                    carry: sign,
                }
            } else {
                ShiftResult {
                    value: ((value as i32) >> amount) as u32,
                    carry: value & (1 << (amount - 1)) != 0,
                }
            }
        }
        ShiftKind::Ror => {
            if amount == 0 {
                // RRX: carry into bit 31, bit 0 out
                ShiftResult {
                    value: (value >> 1) | (u32::from(carry_in) << 31),
                    carry: value & 1 != 0,
                }
            } else {
                ShiftResult {
                    value: value.rotate_right(amount),
                    carry: value & (1 << (amount - 1)) != 0,
                }
            }
        }
    }
}

/// Barrel shift with a register amount (bottom byte of Rs).
///
/// Register amounts have no special zero encoding: 0 passes the value
/// through unchanged, 32 and above follow the documented large-shift rules.
#[must_use]
pub fn shift_reg(kind: ShiftKind, value: u32, amount: u32, carry_in: bool) -> ShiftResult {
    let amount = amount & 0xFF;
    if amount == 0 {
        return ShiftResult {
            value,
            carry: carry_in,
        };
    }
    match kind {
        ShiftKind::Lsl => {
            if amount < 32 {
                ShiftResult {
                    value: value << amount,
                    carry: value & (1 << (32 - amount)) != 0,
                }
            } else if amount == 32 {
                ShiftResult {
                    value: 0,
                    carry: value & 1 != 0,
                }
            } else {
                ShiftResult {
                    value: 0,
                    carry: false,
                }
            }
        }
        ShiftKind::Lsr => {
            if amount < 32 {
                ShiftResult {
                    value: value >> amount,
                    carry: value & (1 << (amount - 1)) != 0,
                }
            } else if amount == 32 {
                ShiftResult {
                    value: 0,
                    carry: value & (1 << 31) != 0,
                }
            } else {
                ShiftResult {
                    value: 0,
                    carry: false,
                }
            }
        }
        ShiftKind::Asr => {
            if amount < 32 {
                ShiftResult {
                    value: ((value as i32) >> amount) as u32,
                    carry: value & (1 << (amount - 1)) != 0,
                }
            } else {
                let sign = value & (1 << 31) != 0;
                ShiftResult {
                    value: if sign { 0xFFFF_FFFF } else { 0 },
                    carry: sign,
                }
            }
        }
        ShiftKind::Ror => {
            let eff = amount % 32;
            if eff == 0 {
                ShiftResult {
                    value,
                    carry: value & (1 << 31) != 0,
                }
            } else {
                ShiftResult {
                    value: value.rotate_right(eff),
                    carry: value & (1 << (eff - 1)) != 0,
                }
            }
        }
    }
}

/// Rotate an 8-bit immediate right by `2 * rotate`, the DP immediate form.
#[must_use]
pub fn rotated_imm(imm8: u32, rotate: u32) -> u32 {
    (imm8 & 0xFF).rotate_right(2 * (rotate & 0xF))
}

/// Carry-out of a DP immediate operand: bit 31 of the rotated value when
/// the rotation is non-zero, otherwise the old carry.
#[must_use]
pub fn rotated_imm_carry(imm8: u32, rotate: u32, carry_in: bool) -> bool {
    if rotate & 0xF == 0 {
        carry_in
    } else {
        rotated_imm(imm8, rotate) & (1 << 31) != 0
    }
}

/// 32-bit add with carry-in, computing C and V.
#[must_use]
pub fn add32(a: u32, b: u32, carry_in: bool) -> AluResult {
    let c = u32::from(carry_in);
    let wide = u64::from(a) + u64::from(b) + u64::from(c);
    let value = wide as u32;

    // Overflow: operands same sign, result different sign
    let overflow = ((a ^ value) & (b ^ value)) & (1 << 31) != 0;

    AluResult {
        value,
        carry: wide > 0xFFFF_FFFF,
        overflow,
    }
}

/// 32-bit subtract `a - b - !carry_in`, computing C and V.
///
/// ARM subtraction carry is NOT-borrow: C is set when no borrow occurred.
/// Plain SUB/CMP pass `carry_in = true`; SBC/RSC pass the current C flag.
#[must_use]
pub fn sub32(a: u32, b: u32, carry_in: bool) -> AluResult {
    let borrow = u32::from(!carry_in);
    let value = a.wrapping_sub(b).wrapping_sub(borrow);

    // No borrow when a >= b + borrow in unsigned arithmetic
    let carry = u64::from(a) >= u64::from(b) + u64::from(borrow);

    // Overflow: operands differ in sign and result's sign matches b
    let overflow = ((a ^ b) & (a ^ value)) & (1 << 31) != 0;

    AluResult {
        value,
        carry,
        overflow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsl_zero_keeps_carry() {
        let r = shift_imm(ShiftKind::Lsl, 0x8000_0001, 0, true);
        assert_eq!(r.value, 0x8000_0001);
        assert!(r.carry);
    }

    #[test]
    fn lsr_zero_means_32() {
        let r = shift_imm(ShiftKind::Lsr, 0x8000_0000, 0, false);
        assert_eq!(r.value, 0);
        assert!(r.carry);
    }

    #[test]
    fn asr_zero_fills_sign() {
        let r = shift_imm(ShiftKind::Asr, 0x8000_0000, 0, false);
        assert_eq!(r.value, 0xFFFF_FFFF);
        assert!(r.carry);
    }

    #[test]
    fn ror_zero_is_rrx() {
        let r = shift_imm(ShiftKind::Ror, 0x0000_0003, 0, true);
        assert_eq!(r.value, 0x8000_0001);
        assert!(r.carry);
    }

    #[test]
    fn reg_shift_by_33_lsl() {
        let r = shift_reg(ShiftKind::Lsl, 0xFFFF_FFFF, 33, true);
        assert_eq!(r.value, 0);
        assert!(!r.carry);
    }

    #[test]
    fn add_carry_and_overflow() {
        let r = add32(0x7FFF_FFFF, 1, false);
        assert_eq!(r.value, 0x8000_0000);
        assert!(!r.carry);
        assert!(r.overflow);

        let r = add32(0xFFFF_FFFF, 1, false);
        assert_eq!(r.value, 0);
        assert!(r.carry);
        assert!(!r.overflow);
    }

    #[test]
    fn sub_borrow_semantics() {
        // 5 - 3: no borrow, C set
        let r = sub32(5, 3, true);
        assert_eq!(r.value, 2);
        assert!(r.carry);

        // 3 - 5: borrow, C clear
        let r = sub32(3, 5, true);
        assert_eq!(r.value, 0xFFFF_FFFE);
        assert!(!r.carry);

        // signed overflow: INT_MIN - 1
        let r = sub32(0x8000_0000, 1, true);
        assert_eq!(r.value, 0x7FFF_FFFF);
        assert!(r.overflow);
    }

    #[test]
    fn rotated_immediate() {
        assert_eq!(rotated_imm(0xFF, 0), 0xFF);
        assert_eq!(rotated_imm(0xFF, 15), 0x3FC);
        assert_eq!(rotated_imm(0x01, 1), 0x4000_0000);
    }
}
