// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Shift, add and saturation primitives shared by every data-processing executor.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftType {
    Lsl,
    Lsr,
    Asr,
    Ror,
    Rrx,
}

impl ShiftType {
    /// Register-shift encodings (LSL/LSR/ASR/ROR) in the two-bit `type` field.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => ShiftType::Lsl,
            1 => ShiftType::Lsr,
            2 => ShiftType::Asr,
            _ => ShiftType::Ror,
        }
    }
}

/// Shift with carry out. An amount of zero passes value and carry through,
/// except for RRX which always rotates by one through the carry.
pub fn shift_c(value: u32, kind: ShiftType, amount: u32, carry_in: bool) -> (u32, bool) {
    if amount == 0 && kind != ShiftType::Rrx {
        return (value, carry_in);
    }
    match kind {
        ShiftType::Lsl => match amount {
            1..=31 => (value << amount, (value >> (32 - amount)) & 1 != 0),
            32 => (0, value & 1 != 0),
            _ => (0, false),
        },
        ShiftType::Lsr => match amount {
            1..=31 => (value >> amount, (value >> (amount - 1)) & 1 != 0),
            32 => (0, value >> 31 != 0),
            _ => (0, false),
        },
        ShiftType::Asr => {
            if amount >= 32 {
                let fill = ((value as i32) >> 31) as u32;
                (fill, fill & 1 != 0)
            } else {
                (
                    ((value as i32) >> amount) as u32,
                    (value >> (amount - 1)) & 1 != 0,
                )
            }
        }
        ShiftType::Ror => {
            let result = value.rotate_right(amount % 32);
            (result, result >> 31 != 0)
        }
        ShiftType::Rrx => ((value >> 1) | ((carry_in as u32) << 31), value & 1 != 0),
    }
}

pub fn shift(value: u32, kind: ShiftType, amount: u32, carry_in: bool) -> u32 {
    shift_c(value, kind, amount, carry_in).0
}

/// 33-bit addition returning (result, carry out, signed overflow).
pub fn add_with_carry(x: u32, y: u32, carry_in: bool) -> (u32, bool, bool) {
    let unsigned_sum = x as u64 + y as u64 + carry_in as u64;
    let signed_sum = x as i32 as i64 + y as i32 as i64 + carry_in as i64;
    let result = unsigned_sum as u32;
    let carry = result as u64 != unsigned_sum;
    let overflow = result as i32 as i64 != signed_sum;
    (result, carry, overflow)
}

/// Immediate shift decoding for the `type:imm5` fields.
pub fn decode_imm_shift(kind: u32, imm5: u32) -> (ShiftType, u32) {
    match kind & 3 {
        0 => (ShiftType::Lsl, imm5),
        1 => (ShiftType::Lsr, if imm5 == 0 { 32 } else { imm5 }),
        2 => (ShiftType::Asr, if imm5 == 0 { 32 } else { imm5 }),
        _ => {
            if imm5 == 0 {
                (ShiftType::Rrx, 1)
            } else {
                (ShiftType::Ror, imm5)
            }
        }
    }
}

/// Thumb-2 modified immediate constant with carry out.
pub fn thumb_expand_imm_c(imm12: u32, carry_in: bool) -> (u32, bool) {
    let imm8 = imm12 & 0xFF;
    if imm12 >> 10 == 0 {
        let value = match (imm12 >> 8) & 3 {
            0 => imm8,
            1 => (imm8 << 16) | imm8,
            2 => (imm8 << 24) | (imm8 << 8),
            _ => imm8 * 0x0101_0101,
        };
        (value, carry_in)
    } else {
        let unrotated = 0x80 | (imm12 & 0x7F);
        shift_c(unrotated, ShiftType::Ror, (imm12 >> 7) & 0x1F, carry_in)
    }
}

/// Clamp to the signed `bits`-wide range, reporting whether it saturated.
pub fn signed_sat_q(value: i64, bits: u32) -> (i64, bool) {
    let max = (1i64 << (bits - 1)) - 1;
    let min = -(1i64 << (bits - 1));
    if value > max {
        (max, true)
    } else if value < min {
        (min, true)
    } else {
        (value, false)
    }
}

/// Clamp to the unsigned `bits`-wide range, reporting whether it saturated.
pub fn unsigned_sat_q(value: i64, bits: u32) -> (i64, bool) {
    let max = if bits >= 63 {
        i64::MAX
    } else {
        (1i64 << bits) - 1
    };
    if value > max {
        (max, true)
    } else if value < 0 {
        (0, true)
    } else {
        (value, false)
    }
}

pub fn sign_extend(value: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsl_zero_keeps_carry() {
        assert_eq!(shift_c(0x1234, ShiftType::Lsl, 0, true), (0x1234, true));
        assert_eq!(shift_c(0x1234, ShiftType::Lsl, 0, false), (0x1234, false));
    }

    #[test]
    fn test_shift_carry_out_is_last_bit_shifted() {
        let v = 0b1011_0000u32;
        for amount in 1..32 {
            let expected = (v >> (amount - 1)) & 1 != 0;
            assert_eq!(shift_c(v, ShiftType::Lsr, amount, false).1, expected);
            assert_eq!(shift_c(v, ShiftType::Asr, amount, false).1, expected);
        }
        assert_eq!(shift_c(0x8000_0001, ShiftType::Lsl, 1, false), (2, true));
        assert_eq!(shift_c(0x8000_0000, ShiftType::Lsr, 32, false), (0, true));
        assert_eq!(shift_c(0x8000_0000, ShiftType::Asr, 40, false), (0xFFFF_FFFF, true));
    }

    #[test]
    fn test_rrx() {
        assert_eq!(shift_c(0x0000_0003, ShiftType::Rrx, 1, true), (0x8000_0001, true));
        assert_eq!(shift_c(0x0000_0002, ShiftType::Rrx, 1, false), (0x0000_0001, false));
    }

    #[test]
    fn test_ror_is_periodic() {
        let v = 0xDEAD_BEEF;
        for amount in 1..32 {
            assert_eq!(
                shift_c(v, ShiftType::Ror, amount, false),
                shift_c(v, ShiftType::Ror, amount + 32, false)
            );
        }
    }

    #[test]
    fn test_add_with_carry_flags() {
        assert_eq!(add_with_carry(0x8000_0000, 0x8000_0000, false), (0, true, true));
        assert_eq!(add_with_carry(0x7FFF_FFFF, 1, false), (0x8000_0000, false, true));
        assert_eq!(add_with_carry(0xFFFF_FFFF, 0, true), (0, true, false));
    }

    #[test]
    fn test_subtraction_via_inverted_operand() {
        let samples = [0u32, 1, 2, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_FFFE, 0xFFFF_FFFF, 12345];
        for &a in &samples {
            for &b in &samples {
                let (result, carry, _) = add_with_carry(a, !b, true);
                assert_eq!(result, a.wrapping_sub(b));
                assert_eq!(carry, a >= b, "carry is NOT borrow for {a:#x} - {b:#x}");
            }
        }
    }

    #[test]
    fn test_thumb_expand_imm() {
        assert_eq!(thumb_expand_imm_c(0x0AB, false), (0xAB, false));
        assert_eq!(thumb_expand_imm_c(0x1AB, false).0, 0x00AB_00AB);
        assert_eq!(thumb_expand_imm_c(0x2AB, false).0, 0xAB00_AB00);
        assert_eq!(thumb_expand_imm_c(0x3AB, false).0, 0xABAB_ABAB);
        // 0x4FF: rotate 0xFF by 9 -> 0x7F80_0000, carry = bit 31 = 0
        assert_eq!(thumb_expand_imm_c(0x4FF, true), (0x7F80_0000, false));
    }

    #[test]
    fn test_saturation() {
        assert_eq!(signed_sat_q(200, 8), (127, true));
        assert_eq!(signed_sat_q(-200, 8), (-128, true));
        assert_eq!(signed_sat_q(-5, 8), (-5, false));
        assert_eq!(unsigned_sat_q(300, 8), (255, true));
        assert_eq!(unsigned_sat_q(-1, 8), (0, true));
        assert_eq!(unsigned_sat_q(17, 8), (17, false));
    }
}
