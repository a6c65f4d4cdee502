// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{bits, set_flags_16};
use crate::cpu::CortexM;
use crate::decoder::Executor;
use crate::nvic::USAGE_FAULT;
use crate::peripherals::nvic::CCR_DIV_0_TRP;
use crate::{Bus, SimResult};

/// MULS Rdm, Rn, Rdm
pub fn mul16(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rdm = bits(op, 2, 0);
    let result = cpu.read_reg(bits(op, 5, 3)).wrapping_mul(cpu.read_reg(rdm));
    cpu.write_reg(rdm, result);
    if set_flags_16(cpu) {
        cpu.regs.set_nz(result);
    }
    Ok(())
}

struct Operands {
    rn: u32,
    rm: u32,
    ra: u32,
    rd: u32,
}

fn operands(cpu: &CortexM, op: u32) -> Operands {
    Operands {
        rn: cpu.read_reg(bits(op, 19, 16)),
        rm: cpu.read_reg(bits(op, 3, 0)),
        ra: cpu.read_reg(bits(op, 15, 12)),
        rd: bits(op, 11, 8),
    }
}

pub fn mul_w(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let o = operands(cpu, op);
    cpu.write_reg(o.rd, o.rn.wrapping_mul(o.rm));
    Ok(())
}

/// MLA Rd, Rn, Rm, Ra
pub fn mla(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let o = operands(cpu, op);
    cpu.write_reg(o.rd, o.rn.wrapping_mul(o.rm).wrapping_add(o.ra));
    Ok(())
}

/// MLS Rd, Rn, Rm, Ra
pub fn mls(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let o = operands(cpu, op);
    cpu.write_reg(o.rd, o.ra.wrapping_sub(o.rn.wrapping_mul(o.rm)));
    Ok(())
}

/// Multiply and accumulate: op1 = first halfword bits [6:4], op2 = second
/// halfword bits [5:4].
pub fn decode_multiply(op: u32) -> Executor {
    match (bits(op, 22, 20), bits(op, 5, 4)) {
        (0b000, 0b00) if bits(op, 15, 12) == 0b1111 => mul_w,
        (0b000, 0b00) => mla,
        (0b000, 0b01) => mls,
        _ => super::misc::unpredictable,
    }
}

/// RdLo = op[15:12], RdHi = op[11:8].
fn write_long(cpu: &mut CortexM, op: u32, value: u64) {
    cpu.write_reg(bits(op, 15, 12), value as u32);
    cpu.write_reg(bits(op, 11, 8), (value >> 32) as u32);
}

fn read_long(cpu: &CortexM, op: u32) -> u64 {
    ((cpu.read_reg(bits(op, 11, 8)) as u64) << 32) | cpu.read_reg(bits(op, 15, 12)) as u64
}

fn long_operands(cpu: &CortexM, op: u32) -> (u32, u32) {
    (cpu.read_reg(bits(op, 19, 16)), cpu.read_reg(bits(op, 3, 0)))
}

pub fn smull(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (n, m) = long_operands(cpu, op);
    let result = (n as i32 as i64).wrapping_mul(m as i32 as i64);
    write_long(cpu, op, result as u64);
    Ok(())
}

pub fn umull(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (n, m) = long_operands(cpu, op);
    write_long(cpu, op, (n as u64) * (m as u64));
    Ok(())
}

pub fn smlal(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (n, m) = long_operands(cpu, op);
    let product = (n as i32 as i64).wrapping_mul(m as i32 as i64);
    let result = (read_long(cpu, op) as i64).wrapping_add(product);
    write_long(cpu, op, result as u64);
    Ok(())
}

pub fn umlal(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (n, m) = long_operands(cpu, op);
    let result = read_long(cpu, op).wrapping_add((n as u64) * (m as u64));
    write_long(cpu, op, result);
    Ok(())
}

/// `false` when the division must not complete: a zero divisor with
/// CCR.DIV_0_TRP set raises UsageFault instead.
fn divisor_ok(cpu: &mut CortexM, divisor: u32) -> bool {
    if divisor == 0 && cpu.nvic.state.ccr() & CCR_DIV_0_TRP != 0 {
        tracing::debug!("Divide by zero at {:#x}", cpu.regs.instr_addr);
        cpu.throw(USAGE_FAULT);
        return false;
    }
    true
}

/// SDIV Rd, Rn, Rm. Division by zero yields 0 unless trapped.
pub fn sdiv(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (n, m) = long_operands(cpu, op);
    if !divisor_ok(cpu, m) {
        return Ok(());
    }
    let result = if m == 0 {
        0
    } else {
        (n as i32).wrapping_div(m as i32) as u32
    };
    cpu.write_reg(bits(op, 11, 8), result);
    Ok(())
}

pub fn udiv(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (n, m) = long_operands(cpu, op);
    if !divisor_ok(cpu, m) {
        return Ok(());
    }
    cpu.write_reg(bits(op, 11, 8), n.checked_div(m).unwrap_or(0));
    Ok(())
}

/// Long multiply and divide: op1 = first halfword bits [6:4], op2 = second
/// halfword bits [7:4].
pub fn decode_long_multiply(op: u32) -> Executor {
    match (bits(op, 22, 20), bits(op, 7, 4)) {
        (0b000, 0b0000) => smull,
        (0b001, 0b1111) => sdiv,
        (0b010, 0b0000) => umull,
        (0b011, 0b1111) => udiv,
        (0b100, 0b0000) => smlal,
        (0b110, 0b0000) => umlal,
        _ => super::misc::unpredictable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SystemBus;

    fn run(cpu: &mut CortexM, op: u32) {
        let mut bus = SystemBus::new();
        let executor = decode_long_multiply(op);
        executor(cpu, &mut bus, op).unwrap();
    }

    #[test]
    fn test_signed_long_multiply() {
        let mut cpu = CortexM::default();
        cpu.regs.r2 = (-3i32) as u32;
        cpu.regs.r3 = 5;
        // SMULL R0, R1, R2, R3
        run(&mut cpu, 0xFB82_0103);
        assert_eq!(cpu.regs.r0, (-15i32) as u32);
        assert_eq!(cpu.regs.r1, 0xFFFF_FFFF);
    }

    #[test]
    fn test_unsigned_multiply_accumulate_long() {
        let mut cpu = CortexM::default();
        cpu.regs.r0 = 0xFFFF_FFFF;
        cpu.regs.r1 = 0;
        cpu.regs.r2 = 2;
        cpu.regs.r3 = 1;
        // UMLAL R0, R1, R2, R3
        run(&mut cpu, 0xFBE2_0103);
        assert_eq!((cpu.regs.r0, cpu.regs.r1), (1, 1));
    }

    #[test]
    fn test_division_edge_cases() {
        let mut cpu = CortexM::default();
        cpu.regs.r1 = 0x8000_0000;
        cpu.regs.r2 = 0xFFFF_FFFF;
        // SDIV R0, R1, R2
        run(&mut cpu, 0xFB91_F0F2);
        assert_eq!(cpu.regs.r0, 0x8000_0000);

        cpu.regs.r2 = 0;
        cpu.regs.r0 = 7;
        // UDIV R0, R1, R2 by zero, untrapped
        run(&mut cpu, 0xFBB1_F0F2);
        assert_eq!(cpu.regs.r0, 0);
    }

    #[test]
    fn test_trapped_divide_by_zero_leaves_destination() {
        let mut cpu = CortexM::default();
        cpu.nvic
            .state
            .ccr
            .store(CCR_DIV_0_TRP, std::sync::atomic::Ordering::SeqCst);
        cpu.regs.r0 = 7;
        cpu.regs.r1 = 10;
        run(&mut cpu, 0xFBB1_F0F2);
        assert_eq!(cpu.regs.r0, 7);
        assert!(cpu.nvic.pending_count() > 0);
    }

    #[test]
    fn test_mla_and_mls() {
        let mut bus = SystemBus::new();
        let mut cpu = CortexM::default();
        cpu.regs.r1 = 3;
        cpu.regs.r2 = 4;
        cpu.regs.r3 = 100;
        // MLA R0, R1, R2, R3
        let op = 0xFB01_3002;
        decode_multiply(op)(&mut cpu, &mut bus, op).unwrap();
        assert_eq!(cpu.regs.r0, 112);
        // MLS R0, R1, R2, R3
        let op = 0xFB01_3012;
        decode_multiply(op)(&mut cpu, &mut bus, op).unwrap();
        assert_eq!(cpu.regs.r0, 88);
    }
}
