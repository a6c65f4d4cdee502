// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use proptest::prelude::*;
use thumbsim_core::bus::SystemBus;
use thumbsim_core::cpu::alu::{
    add_with_carry, shift_c, sign_extend, signed_sat_q, thumb_expand_imm_c, ShiftType,
};
use thumbsim_core::cpu::CortexM;
use thumbsim_core::decoder::tables;

proptest! {
    #[test]
    fn test_subtract_is_add_of_complement(a in any::<u32>(), b in any::<u32>()) {
        let (result, carry, overflow) = add_with_carry(a, !b, true);
        prop_assert_eq!(result, a.wrapping_sub(b));
        prop_assert_eq!(carry, a >= b);
        prop_assert_eq!(overflow, (a as i32).checked_sub(b as i32).is_none());
    }

    #[test]
    fn test_add_flags_match_wide_arithmetic(a in any::<u32>(), b in any::<u32>(), c in any::<bool>()) {
        let (result, carry, overflow) = add_with_carry(a, b, c);
        let wide = a as u64 + b as u64 + c as u64;
        prop_assert_eq!(result, wide as u32);
        prop_assert_eq!(carry, wide > u32::MAX as u64);
        let signed = a as i32 as i64 + b as i32 as i64 + c as i64;
        prop_assert_eq!(overflow, signed != result as i32 as i64);
    }

    #[test]
    fn test_rotation_inverts(value in any::<u32>(), amount in 1u32..32) {
        let (rotated, _) = shift_c(value, ShiftType::Ror, amount, false);
        let (back, _) = shift_c(rotated, ShiftType::Ror, 32 - amount, false);
        prop_assert_eq!(back, value);
    }

    #[test]
    fn test_logical_shifts_match_native(value in any::<u32>(), amount in 1u32..32) {
        prop_assert_eq!(shift_c(value, ShiftType::Lsl, amount, false).0, value << amount);
        prop_assert_eq!(shift_c(value, ShiftType::Lsr, amount, false).0, value >> amount);
        prop_assert_eq!(
            shift_c(value, ShiftType::Asr, amount, false).0,
            ((value as i32) >> amount) as u32
        );
    }

    #[test]
    fn test_rotated_immediates_have_eight_significant_bits(imm12 in 0x400u32..0x1000) {
        let (value, _) = thumb_expand_imm_c(imm12, false);
        prop_assert_eq!(value.count_ones(), (0x80 | (imm12 & 0x7F)).count_ones());
    }

    #[test]
    fn test_saturation_stays_in_range(value in any::<i64>(), bits in 1u32..33) {
        let (clamped, saturated) = signed_sat_q(value >> 16, bits);
        let max = (1i64 << (bits - 1)) - 1;
        let min = -(1i64 << (bits - 1));
        prop_assert!(clamped >= min && clamped <= max);
        prop_assert_eq!(saturated, clamped != value >> 16);
    }

    #[test]
    fn test_sign_extend_keeps_low_bits(value in any::<u32>(), bits in 1u32..32) {
        let mask = (1u32 << bits) - 1;
        let extended = sign_extend(value & mask, bits);
        prop_assert_eq!(extended & mask, value & mask);
        let negative = value & (1 << (bits - 1)) != 0;
        prop_assert_eq!(extended >> 31 == 1, negative);
    }

    #[test]
    fn test_executed_adds_matches_alu(a in any::<u32>(), b in any::<u32>()) {
        let mut bus = SystemBus::new();
        let mut cpu = CortexM::default();
        cpu.regs.r0 = a;
        cpu.regs.r1 = b;
        // ADDS R2, R0, R1
        tables().decode_16(0x1842)(&mut cpu, &mut bus, 0x1842).unwrap();
        let (result, carry, overflow) = add_with_carry(a, b, false);
        prop_assert_eq!(cpu.regs.r2, result);
        prop_assert_eq!(cpu.regs.c, carry);
        prop_assert_eq!(cpu.regs.v, overflow);
        prop_assert_eq!(cpu.regs.z, result == 0);
        prop_assert_eq!(cpu.regs.n, result >> 31 == 1);
    }
}
