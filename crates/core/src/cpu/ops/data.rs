// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Data-processing executors: ALU operations, moves, shifts, extends,
//! bit-field and saturation instructions.

use super::{bit, bits, branch, set_flags_16, unpredictable_operands};
use crate::cpu::alu::{
    add_with_carry, decode_imm_shift, shift, shift_c, sign_extend, signed_sat_q,
    thumb_expand_imm_c, unsigned_sat_q, ShiftType,
};
use crate::cpu::registers::PC;
use crate::cpu::CortexM;
use crate::decoder::Executor;
use crate::{Bus, SimResult};

// Thumb-2 data-processing `op` field values.
pub const AND: u32 = 0b0000;
pub const BIC: u32 = 0b0001;
pub const ORR: u32 = 0b0010;
pub const ORN: u32 = 0b0011;
pub const EOR: u32 = 0b0100;
pub const ADD: u32 = 0b1000;
pub const ADC: u32 = 0b1010;
pub const SBC: u32 = 0b1011;
pub const SUB: u32 = 0b1101;
pub const RSB: u32 = 0b1110;

/// `(result, carry, overflow)`. Logical operations take their carry from the
/// shifter and leave overflow alone.
fn alu(cpu: &CortexM, opcode: u32, a: u32, b: u32, shifter_carry: bool) -> (u32, bool, bool) {
    let (c, v) = (cpu.regs.c, cpu.regs.v);
    match opcode {
        AND => (a & b, shifter_carry, v),
        BIC => (a & !b, shifter_carry, v),
        ORR => (a | b, shifter_carry, v),
        ORN => (a | !b, shifter_carry, v),
        EOR => (a ^ b, shifter_carry, v),
        ADD => add_with_carry(a, b, false),
        ADC => add_with_carry(a, b, c),
        SBC => add_with_carry(a, !b, c),
        SUB => add_with_carry(a, !b, true),
        RSB => add_with_carry(!a, b, true),
        _ => (0, c, v),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    /// Rd = Rn op operand
    Write,
    /// TST, TEQ, CMN, CMP: flags only
    Test,
    /// MOV, MVN: Rn reads as zero
    Move,
}

fn dp_common(cpu: &mut CortexM, op: u32, opcode: u32, form: Form, operand: u32, carry: bool) {
    let rn = bits(op, 19, 16);
    let rd = bits(op, 11, 8);
    let a = if form == Form::Move { 0 } else { cpu.read_reg(rn) };
    let (result, c, v) = alu(cpu, opcode, a, operand, carry);
    if form != Form::Test {
        cpu.write_reg(rd, result);
    }
    if bit(op, 20) {
        cpu.regs.set_nzcv(result, c, v);
    }
}

/// Alias selection shared by the register and immediate forms.
fn form_of(opcode: u32, op: u32) -> Form {
    match opcode {
        AND | EOR | ADD | SUB if bits(op, 11, 8) == 15 && bit(op, 20) => Form::Test,
        ORR | ORN if bits(op, 19, 16) == 15 => Form::Move,
        _ => Form::Write,
    }
}

// --- 32-bit, shifted register ---

fn dp_shifted(cpu: &mut CortexM, op: u32, opcode: u32, form: Form) {
    let imm5 = (bits(op, 14, 12) << 2) | bits(op, 7, 6);
    let (kind, amount) = decode_imm_shift(bits(op, 5, 4), imm5);
    let (operand, carry) = shift_c(cpu.read_reg(bits(op, 3, 0)), kind, amount, cpu.regs.c);
    dp_common(cpu, op, opcode, form, operand, carry);
}

pub fn dp_reg<const OP: u32>(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    dp_shifted(cpu, op, OP, Form::Write);
    Ok(())
}

pub fn dp_reg_test<const OP: u32>(
    cpu: &mut CortexM,
    _bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    dp_shifted(cpu, op, OP, Form::Test);
    Ok(())
}

pub fn dp_reg_move<const OP: u32>(
    cpu: &mut CortexM,
    _bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    dp_shifted(cpu, op, OP, Form::Move);
    Ok(())
}

/// TST/AND, TEQ/EOR, CMN/ADD, CMP/SUB, MOV/ORR and MVN/ORN.
pub fn decode_dp_reg<const OP: u32>(op: u32) -> Executor {
    match form_of(OP, op) {
        Form::Test => dp_reg_test::<OP>,
        Form::Move => dp_reg_move::<OP>,
        Form::Write => dp_reg::<OP>,
    }
}

// --- 32-bit, modified immediate ---

fn dp_modified_imm(cpu: &mut CortexM, op: u32, opcode: u32, form: Form) {
    let imm12 = (bits(op, 26, 26) << 11) | (bits(op, 14, 12) << 8) | bits(op, 7, 0);
    let (operand, carry) = thumb_expand_imm_c(imm12, cpu.regs.c);
    dp_common(cpu, op, opcode, form, operand, carry);
}

pub fn dp_imm<const OP: u32>(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    dp_modified_imm(cpu, op, OP, Form::Write);
    Ok(())
}

pub fn dp_imm_test<const OP: u32>(
    cpu: &mut CortexM,
    _bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    dp_modified_imm(cpu, op, OP, Form::Test);
    Ok(())
}

pub fn dp_imm_move<const OP: u32>(
    cpu: &mut CortexM,
    _bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    dp_modified_imm(cpu, op, OP, Form::Move);
    Ok(())
}

/// Immediate data processing shares its slots with branches; second
/// halfword bit 15 tells them apart.
pub fn decode_dp_imm<const OP: u32>(op: u32) -> Executor {
    if bit(op, 15) {
        return branch::decode_branch_misc(op);
    }
    match form_of(OP, op) {
        Form::Test => dp_imm_test::<OP>,
        Form::Move => dp_imm_move::<OP>,
        Form::Write => dp_imm::<OP>,
    }
}

// --- 32-bit, plain binary immediate ---

fn imm12(op: u32) -> u32 {
    (bits(op, 26, 26) << 11) | (bits(op, 14, 12) << 8) | bits(op, 7, 0)
}

fn imm16(op: u32) -> u32 {
    (bits(op, 19, 16) << 12) | imm12(op)
}

pub fn addw(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let result = cpu.read_reg(bits(op, 19, 16)).wrapping_add(imm12(op));
    cpu.write_reg(bits(op, 11, 8), result);
    Ok(())
}

pub fn subw(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let result = cpu.read_reg(bits(op, 19, 16)).wrapping_sub(imm12(op));
    cpu.write_reg(bits(op, 11, 8), result);
    Ok(())
}

pub fn adr_add32(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let result = cpu.align_pc().wrapping_add(imm12(op));
    cpu.write_reg(bits(op, 11, 8), result);
    Ok(())
}

pub fn adr_sub32(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let result = cpu.align_pc().wrapping_sub(imm12(op));
    cpu.write_reg(bits(op, 11, 8), result);
    Ok(())
}

pub fn decode_addw(op: u32) -> Executor {
    if bit(op, 15) {
        branch::decode_branch_misc(op)
    } else if bits(op, 19, 16) == 15 {
        adr_add32
    } else {
        addw
    }
}

pub fn decode_subw(op: u32) -> Executor {
    if bit(op, 15) {
        branch::decode_branch_misc(op)
    } else if bits(op, 19, 16) == 15 {
        adr_sub32
    } else {
        subw
    }
}

pub fn movw(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    cpu.write_reg(bits(op, 11, 8), imm16(op));
    Ok(())
}

pub fn movt(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rd = bits(op, 11, 8);
    let low = cpu.read_reg(rd) & 0xFFFF;
    cpu.write_reg(rd, (imm16(op) << 16) | low);
    Ok(())
}

/// `sh:0` and `imm3:imm2` of SSAT/USAT.
fn saturate_operand(cpu: &CortexM, op: u32) -> i64 {
    let imm5 = (bits(op, 14, 12) << 2) | bits(op, 7, 6);
    let (kind, amount) = decode_imm_shift(bits(op, 21, 21) << 1, imm5);
    shift(cpu.read_reg(bits(op, 19, 16)), kind, amount, cpu.regs.c) as i32 as i64
}

pub fn ssat(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let operand = saturate_operand(cpu, op);
    let (result, saturated) = signed_sat_q(operand, bits(op, 4, 0) + 1);
    cpu.write_reg(bits(op, 11, 8), result as u32);
    if saturated {
        cpu.regs.q = true;
    }
    Ok(())
}

pub fn usat(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let operand = saturate_operand(cpu, op);
    let (result, saturated) = unsigned_sat_q(operand, bits(op, 4, 0));
    cpu.write_reg(bits(op, 11, 8), result as u32);
    if saturated {
        cpu.regs.q = true;
    }
    Ok(())
}

fn low_mask(width: u32) -> u32 {
    u32::MAX >> (32 - width)
}

/// `(lsb, width)` of SBFX/UBFX, or `None` if the field runs past bit 31.
fn extract_field(op: u32) -> Option<(u32, u32)> {
    let lsb = (bits(op, 14, 12) << 2) | bits(op, 7, 6);
    let width = bits(op, 4, 0) + 1;
    (lsb + width <= 32).then_some((lsb, width))
}

pub fn sbfx(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (lsb, width) = extract_field(op).ok_or_else(|| unpredictable_operands(cpu, op))?;
    let field = (cpu.read_reg(bits(op, 19, 16)) >> lsb) & low_mask(width);
    cpu.write_reg(bits(op, 11, 8), sign_extend(field, width));
    Ok(())
}

pub fn ubfx(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (lsb, width) = extract_field(op).ok_or_else(|| unpredictable_operands(cpu, op))?;
    let field = (cpu.read_reg(bits(op, 19, 16)) >> lsb) & low_mask(width);
    cpu.write_reg(bits(op, 11, 8), field);
    Ok(())
}

fn insert_field(cpu: &mut CortexM, op: u32, source: u32) -> SimResult<()> {
    let lsb = (bits(op, 14, 12) << 2) | bits(op, 7, 6);
    let msb = bits(op, 4, 0);
    if msb < lsb {
        return Err(unpredictable_operands(cpu, op));
    }
    let mask = low_mask(msb - lsb + 1) << lsb;
    let rd = bits(op, 11, 8);
    let result = (cpu.read_reg(rd) & !mask) | ((source << lsb) & mask);
    cpu.write_reg(rd, result);
    Ok(())
}

pub fn bfi(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let source = cpu.read_reg(bits(op, 19, 16));
    insert_field(cpu, op, source)
}

pub fn bfc(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    insert_field(cpu, op, 0)
}

pub fn decode_bfi(op: u32) -> Executor {
    if bit(op, 15) {
        branch::decode_branch_misc(op)
    } else if bits(op, 19, 16) == 15 {
        bfc
    } else {
        bfi
    }
}

macro_rules! or_branch {
    ($($decoder:ident => $executor:ident),* $(,)?) => {
        $(
            pub fn $decoder(op: u32) -> Executor {
                if bit(op, 15) {
                    branch::decode_branch_misc(op)
                } else {
                    $executor
                }
            }
        )*
    };
}

or_branch! {
    decode_movw => movw,
    decode_movt => movt,
    decode_ssat => ssat,
    decode_usat => usat,
    decode_sbfx => sbfx,
    decode_ubfx => ubfx,
}

// --- 32-bit, register ---

/// LSL/LSR/ASR/ROR{S}.W Rd, Rn, Rm
pub fn shift_reg_w(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let kind = ShiftType::from_bits(bits(op, 22, 21));
    let amount = cpu.read_reg(bits(op, 3, 0)) & 0xFF;
    let (result, carry) = shift_c(cpu.read_reg(bits(op, 19, 16)), kind, amount, cpu.regs.c);
    cpu.write_reg(bits(op, 11, 8), result);
    if bit(op, 20) {
        cpu.regs.set_nzc(result, carry);
    }
    Ok(())
}

/// Rm rotated by `rotate * 8`.
fn rotated_rm(cpu: &CortexM, op: u32) -> u32 {
    cpu.read_reg(bits(op, 3, 0))
        .rotate_right(bits(op, 5, 4) * 8)
}

pub fn sxth_w(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = rotated_rm(cpu, op) as u16 as i16 as i32 as u32;
    cpu.write_reg(bits(op, 11, 8), value);
    Ok(())
}

pub fn uxth_w(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = rotated_rm(cpu, op) & 0xFFFF;
    cpu.write_reg(bits(op, 11, 8), value);
    Ok(())
}

pub fn sxtb_w(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = rotated_rm(cpu, op) as u8 as i8 as i32 as u32;
    cpu.write_reg(bits(op, 11, 8), value);
    Ok(())
}

pub fn uxtb_w(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = rotated_rm(cpu, op) & 0xFF;
    cpu.write_reg(bits(op, 11, 8), value);
    Ok(())
}

fn rev16_value(value: u32) -> u32 {
    ((value & 0x00FF_00FF) << 8) | ((value >> 8) & 0x00FF_00FF)
}

fn revsh_value(value: u32) -> u32 {
    (value as u16).swap_bytes() as i16 as i32 as u32
}

pub fn rev_w(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = cpu.read_reg(bits(op, 3, 0)).swap_bytes();
    cpu.write_reg(bits(op, 11, 8), value);
    Ok(())
}

pub fn rev16_w(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = rev16_value(cpu.read_reg(bits(op, 3, 0)));
    cpu.write_reg(bits(op, 11, 8), value);
    Ok(())
}

pub fn rbit(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = cpu.read_reg(bits(op, 3, 0)).reverse_bits();
    cpu.write_reg(bits(op, 11, 8), value);
    Ok(())
}

pub fn revsh_w(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = revsh_value(cpu.read_reg(bits(op, 3, 0)));
    cpu.write_reg(bits(op, 11, 8), value);
    Ok(())
}

pub fn clz(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = cpu.read_reg(bits(op, 3, 0)).leading_zeros();
    cpu.write_reg(bits(op, 11, 8), value);
    Ok(())
}

/// Data-processing (register): op1 = first halfword bits [7:4], op2 =
/// second halfword bits [7:4].
pub fn decode_dp_register(op: u32) -> Executor {
    if bits(op, 15, 12) != 0b1111 {
        return super::misc::unpredictable;
    }
    let op1 = bits(op, 23, 20);
    let op2 = bits(op, 7, 4);
    let rn_is_pc = bits(op, 19, 16) == 15;
    match (op1, op2) {
        (0b0000..=0b0111, 0b0000) => shift_reg_w,
        (0b0000, 0b1000..=0b1111) if rn_is_pc => sxth_w,
        (0b0001, 0b1000..=0b1111) if rn_is_pc => uxth_w,
        (0b0100, 0b1000..=0b1111) if rn_is_pc => sxtb_w,
        (0b0101, 0b1000..=0b1111) if rn_is_pc => uxtb_w,
        (0b1000..=0b1111, 0b0000..=0b0111) => super::parallel::decode_parallel(op),
        (0b1000..=0b1011, 0b1000..=0b1011) => match (op1 & 3, op2 & 3) {
            (0b00, 0b00) => super::parallel::qadd,
            (0b00, 0b01) => super::parallel::qdadd,
            (0b00, 0b10) => super::parallel::qsub,
            (0b00, 0b11) => super::parallel::qdsub,
            (0b01, 0b00) => rev_w,
            (0b01, 0b01) => rev16_w,
            (0b01, 0b10) => rbit,
            (0b01, 0b11) => revsh_w,
            (0b10, 0b00) => super::parallel::sel,
            (0b11, 0b00) => clz,
            _ => super::misc::unpredictable,
        },
        _ => super::misc::unpredictable,
    }
}

// --- 16-bit ---

/// LSLS/LSRS/ASRS Rd, Rm, #imm5
pub fn shift_imm16<const KIND: u32>(
    cpu: &mut CortexM,
    _bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let (kind, amount) = decode_imm_shift(KIND, bits(op, 10, 6));
    let (result, carry) = shift_c(cpu.read_reg(bits(op, 5, 3)), kind, amount, cpu.regs.c);
    cpu.write_reg(bits(op, 2, 0), result);
    if set_flags_16(cpu) {
        cpu.regs.set_nzc(result, carry);
    }
    Ok(())
}

/// ADDS/SUBS Rd, Rn, Rm
pub fn add_sub_reg16<const OP: u32>(
    cpu: &mut CortexM,
    _bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let a = cpu.read_reg(bits(op, 5, 3));
    let b = cpu.read_reg(bits(op, 8, 6));
    let (result, c, v) = alu(cpu, OP, a, b, cpu.regs.c);
    cpu.write_reg(bits(op, 2, 0), result);
    if set_flags_16(cpu) {
        cpu.regs.set_nzcv(result, c, v);
    }
    Ok(())
}

/// ADDS/SUBS Rd, Rn, #imm3
pub fn add_sub_imm3<const OP: u32>(
    cpu: &mut CortexM,
    _bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let a = cpu.read_reg(bits(op, 5, 3));
    let (result, c, v) = alu(cpu, OP, a, bits(op, 8, 6), cpu.regs.c);
    cpu.write_reg(bits(op, 2, 0), result);
    if set_flags_16(cpu) {
        cpu.regs.set_nzcv(result, c, v);
    }
    Ok(())
}

/// ADDS/SUBS Rdn, #imm8
pub fn add_sub_imm8<const OP: u32>(
    cpu: &mut CortexM,
    _bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let rdn = bits(op, 10, 8);
    let (result, c, v) = alu(cpu, OP, cpu.read_reg(rdn), bits(op, 7, 0), cpu.regs.c);
    cpu.write_reg(rdn, result);
    if set_flags_16(cpu) {
        cpu.regs.set_nzcv(result, c, v);
    }
    Ok(())
}

pub fn mov_imm8(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let result = bits(op, 7, 0);
    cpu.write_reg(bits(op, 10, 8), result);
    if set_flags_16(cpu) {
        cpu.regs.set_nz(result);
    }
    Ok(())
}

pub fn cmp_imm8(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (result, c, v) = add_with_carry(cpu.read_reg(bits(op, 10, 8)), !bits(op, 7, 0), true);
    cpu.regs.set_nzcv(result, c, v);
    Ok(())
}

/// AND, EOR, ADC, SBC, ORR, BIC: Rdn = Rdn op Rm
pub fn dp16<const OP: u32>(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rdn = bits(op, 2, 0);
    let b = cpu.read_reg(bits(op, 5, 3));
    let (result, c, v) = alu(cpu, OP, cpu.read_reg(rdn), b, cpu.regs.c);
    cpu.write_reg(rdn, result);
    if set_flags_16(cpu) {
        cpu.regs.set_nzcv(result, c, v);
    }
    Ok(())
}

/// TST (AND), CMN (ADD) and CMP (SUB) on low registers.
pub fn dp16_test<const OP: u32>(
    cpu: &mut CortexM,
    _bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let b = cpu.read_reg(bits(op, 5, 3));
    let (result, c, v) = alu(cpu, OP, cpu.read_reg(bits(op, 2, 0)), b, cpu.regs.c);
    cpu.regs.set_nzcv(result, c, v);
    Ok(())
}

/// LSLS/LSRS/ASRS/RORS Rdn, Rm
pub fn shift_reg_n<const KIND: u32>(
    cpu: &mut CortexM,
    _bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let rdn = bits(op, 2, 0);
    let amount = cpu.read_reg(bits(op, 5, 3)) & 0xFF;
    let (result, carry) = shift_c(
        cpu.read_reg(rdn),
        ShiftType::from_bits(KIND),
        amount,
        cpu.regs.c,
    );
    cpu.write_reg(rdn, result);
    if set_flags_16(cpu) {
        cpu.regs.set_nzc(result, carry);
    }
    Ok(())
}

/// RSBS Rd, Rn, #0
pub fn rsb_imm16(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (result, c, v) = alu(cpu, RSB, cpu.read_reg(bits(op, 5, 3)), 0, cpu.regs.c);
    cpu.write_reg(bits(op, 2, 0), result);
    if set_flags_16(cpu) {
        cpu.regs.set_nzcv(result, c, v);
    }
    Ok(())
}

pub fn mvn16(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let result = !cpu.read_reg(bits(op, 5, 3));
    cpu.write_reg(bits(op, 2, 0), result);
    if set_flags_16(cpu) {
        cpu.regs.set_nz(result);
    }
    Ok(())
}

/// `DN:Rdn` of the high-register forms.
fn high_rdn(op: u32) -> u32 {
    (bits(op, 7, 7) << 3) | bits(op, 2, 0)
}

/// ADD Rdn, Rm with any registers, SP and PC included.
pub fn add_hi(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rdn = high_rdn(op);
    let result = cpu.read_reg(rdn).wrapping_add(cpu.read_reg(bits(op, 6, 3)));
    if rdn == PC as u32 {
        cpu.alu_write_pc(result);
    } else {
        cpu.write_reg(rdn, result);
    }
    Ok(())
}

pub fn cmp_hi(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let a = cpu.read_reg(high_rdn(op));
    let b = cpu.read_reg(bits(op, 6, 3));
    let (result, c, v) = add_with_carry(a, !b, true);
    cpu.regs.set_nzcv(result, c, v);
    Ok(())
}

pub fn mov_hi(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rd = high_rdn(op);
    let value = cpu.read_reg(bits(op, 6, 3));
    if rd == PC as u32 {
        cpu.alu_write_pc(value);
    } else {
        cpu.write_reg(rd, value);
    }
    Ok(())
}

pub fn adr16(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let result = cpu.align_pc().wrapping_add(bits(op, 7, 0) << 2);
    cpu.write_reg(bits(op, 10, 8), result);
    Ok(())
}

/// ADD Rd, SP, #imm8
pub fn add_sp_imm8(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let result = cpu.regs.sp().wrapping_add(bits(op, 7, 0) << 2);
    cpu.write_reg(bits(op, 10, 8), result);
    Ok(())
}

/// ADD SP, SP, #imm7
pub fn add_sp_imm7(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let sp = cpu.regs.sp().wrapping_add(bits(op, 6, 0) << 2);
    *cpu.regs.active_sp() = sp;
    Ok(())
}

/// SUB SP, SP, #imm7
pub fn sub_sp_imm7(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let sp = cpu.regs.sp().wrapping_sub(bits(op, 6, 0) << 2);
    *cpu.regs.active_sp() = sp;
    Ok(())
}

pub fn sxth_n(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = cpu.read_reg(bits(op, 5, 3)) as u16 as i16 as i32 as u32;
    cpu.write_reg(bits(op, 2, 0), value);
    Ok(())
}

pub fn sxtb_n(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = cpu.read_reg(bits(op, 5, 3)) as u8 as i8 as i32 as u32;
    cpu.write_reg(bits(op, 2, 0), value);
    Ok(())
}

pub fn uxth_n(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = cpu.read_reg(bits(op, 5, 3)) & 0xFFFF;
    cpu.write_reg(bits(op, 2, 0), value);
    Ok(())
}

pub fn uxtb_n(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = cpu.read_reg(bits(op, 5, 3)) & 0xFF;
    cpu.write_reg(bits(op, 2, 0), value);
    Ok(())
}

pub fn rev_n(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = cpu.read_reg(bits(op, 5, 3)).swap_bytes();
    cpu.write_reg(bits(op, 2, 0), value);
    Ok(())
}

pub fn rev16_n(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = rev16_value(cpu.read_reg(bits(op, 5, 3)));
    cpu.write_reg(bits(op, 2, 0), value);
    Ok(())
}

pub fn revsh_n(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = revsh_value(cpu.read_reg(bits(op, 5, 3)));
    cpu.write_reg(bits(op, 2, 0), value);
    Ok(())
}
