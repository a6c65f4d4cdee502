// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{bit, bits, misc};
use crate::cpu::alu::sign_extend;
use crate::cpu::registers::PC;
use crate::cpu::CortexM;
use crate::decoder::Executor;
use crate::{Bus, SimResult};

fn branch_relative(cpu: &mut CortexM, offset: u32) {
    let target = cpu.read_reg(PC as u32).wrapping_add(offset);
    cpu.branch_write_pc(target);
}

/// B<cond> <label> (T1)
pub fn b_cond16(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    if cpu.regs.condition_passed(bits(op, 11, 8)) {
        branch_relative(cpu, sign_extend(bits(op, 7, 0) << 1, 9));
    }
    Ok(())
}

/// B <label> (T2)
pub fn b16(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    branch_relative(cpu, sign_extend(bits(op, 10, 0) << 1, 12));
    Ok(())
}

pub fn bx(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let target = cpu.read_reg(bits(op, 6, 3));
    cpu.bx_write_pc(bus, target)
}

pub fn blx_reg(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let target = cpu.read_reg(bits(op, 6, 3));
    cpu.regs.lr = cpu.regs.pc | 1;
    cpu.blx_write_pc(target);
    Ok(())
}

/// CBZ/CBNZ Rn, <label>
pub fn cbz_cbnz(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let nonzero = bit(op, 11);
    let offset = (bits(op, 9, 9) << 6) | (bits(op, 7, 3) << 1);
    if (cpu.read_reg(bits(op, 2, 0)) != 0) == nonzero {
        branch_relative(cpu, offset);
    }
    Ok(())
}

/// B<cond>.W (T3): S:J2:J1:imm6:imm11:0
pub fn b_cond32(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    if !cpu.regs.condition_passed(bits(op, 25, 22)) {
        return Ok(());
    }
    let imm = (bits(op, 26, 26) << 20)
        | (bits(op, 11, 11) << 19)
        | (bits(op, 13, 13) << 18)
        | (bits(op, 21, 16) << 12)
        | (bits(op, 10, 0) << 1);
    branch_relative(cpu, sign_extend(imm, 21));
    Ok(())
}

/// S:I1:I2:imm10:imm11:0 with I1 = NOT(J1 XOR S) and I2 = NOT(J2 XOR S).
fn t4_offset(op: u32) -> u32 {
    let s = bits(op, 26, 26);
    let i1 = !(bits(op, 13, 13) ^ s) & 1;
    let i2 = !(bits(op, 11, 11) ^ s) & 1;
    let imm = (s << 24) | (i1 << 23) | (i2 << 22) | (bits(op, 25, 16) << 12) | (bits(op, 10, 0) << 1);
    sign_extend(imm, 25)
}

/// B.W <label> (T4)
pub fn b32(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    branch_relative(cpu, t4_offset(op));
    Ok(())
}

pub fn bl(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    cpu.regs.lr = cpu.regs.pc | 1;
    branch_relative(cpu, t4_offset(op));
    Ok(())
}

/// TBB [Rn, Rm]
pub fn tbb(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu
        .read_reg(bits(op, 19, 16))
        .wrapping_add(cpu.read_reg(bits(op, 3, 0)));
    let entry = cpu.read_mem_u(bus, addr, 1)?;
    branch_relative(cpu, entry << 1);
    Ok(())
}

/// TBH [Rn, Rm, LSL #1]
pub fn tbh(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu
        .read_reg(bits(op, 19, 16))
        .wrapping_add(cpu.read_reg(bits(op, 3, 0)) << 1);
    let entry = cpu.read_mem_u(bus, addr, 2)?;
    branch_relative(cpu, entry << 1);
    Ok(())
}

/// Branches and miscellaneous control: `op` is first halfword bits [10:4],
/// `op1` second halfword bits [14:12].
pub fn decode_branch_misc(opcode: u32) -> Executor {
    let op = bits(opcode, 26, 20);
    let op1 = bits(opcode, 14, 12);
    if op1 == 0b010 && op == 0b111_1111 {
        return misc::udf_w;
    }
    match op1 {
        0b000 | 0b010 if op & 0b011_1000 != 0b011_1000 => b_cond32,
        0b000 | 0b010 => match op {
            0b011_1000 | 0b011_1001 => misc::msr,
            0b011_1010 => misc::nop,
            0b011_1011 => misc::decode_misc_control(opcode),
            0b011_1110 | 0b011_1111 => misc::mrs,
            _ => misc::unpredictable,
        },
        0b001 | 0b011 => b32,
        0b101 | 0b111 => bl,
        // BLX <imm> switches to ARM state
        _ => misc::udf_w,
    }
}
