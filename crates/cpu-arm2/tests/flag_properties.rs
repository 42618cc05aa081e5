//! Property tests for arithmetic flag computation.
//!
//! The carry and overflow rules are checked against wide-arithmetic
//! references over arbitrary 32-bit operand pairs.

use cpu_arm2::{add32, rotated_imm, sub32};
use proptest::prelude::*;

proptest! {
    #[test]
    fn add_carry_matches_wide_reference(a: u32, b: u32, cin: bool) {
        let r = add32(a, b, cin);
        let wide = u64::from(a) + u64::from(b) + u64::from(cin);
        prop_assert_eq!(r.value, wide as u32);
        prop_assert_eq!(r.carry, wide > u64::from(u32::MAX));
    }

    #[test]
    fn add_overflow_matches_signed_reference(a: u32, b: u32, cin: bool) {
        let r = add32(a, b, cin);
        let wide = i64::from(a as i32) + i64::from(b as i32) + i64::from(cin);
        prop_assert_eq!(r.overflow, wide < i64::from(i32::MIN) || wide > i64::from(i32::MAX));
    }

    #[test]
    fn sub_carry_is_not_borrow(a: u32, b: u32) {
        let r = sub32(a, b, true);
        prop_assert_eq!(r.value, a.wrapping_sub(b));
        prop_assert_eq!(r.carry, a >= b);
    }

    #[test]
    fn sub_overflow_matches_signed_reference(a: u32, b: u32, cin: bool) {
        let r = sub32(a, b, cin);
        let wide = i64::from(a as i32) - i64::from(b as i32) - i64::from(!cin);
        prop_assert_eq!(r.overflow, wide < i64::from(i32::MIN) || wide > i64::from(i32::MAX));
    }

    #[test]
    fn sbc_matches_wide_reference(a: u32, b: u32, cin: bool) {
        let r = sub32(a, b, cin);
        let expected = a.wrapping_sub(b).wrapping_sub(u32::from(!cin));
        prop_assert_eq!(r.value, expected);
    }

    #[test]
    fn rotated_immediate_decodes_to_encoded_value(imm8 in 0u32..256, rotate in 0u32..16) {
        // Any (imm8, rotate) pair decodes to imm8 rotated right by 2*rotate;
        // re-rotating left recovers imm8.
        let value = rotated_imm(imm8, rotate);
        prop_assert_eq!(value.rotate_left(2 * rotate), imm8);
    }
}
