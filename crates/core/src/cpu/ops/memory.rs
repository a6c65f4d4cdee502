// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Loads and stores: single, multiple, dual and exclusive.

use super::{bit, bits, unpredictable_operands};
use crate::cpu::cortex_m::check_aligned;
use crate::cpu::registers::{PC, SP};
use crate::cpu::CortexM;
use crate::decoder::Executor;
use crate::{Bus, SimResult};

fn extend(value: u32, size: u32, signed: bool) -> u32 {
    match (size, signed) {
        (1, true) => value as u8 as i8 as i32 as u32,
        (2, true) => value as u16 as i16 as i32 as u32,
        _ => value,
    }
}

/// Register write-back of a load. Loads into PC interwork.
fn load_into(cpu: &mut CortexM, bus: &mut dyn Bus, rt: u32, value: u32) -> SimResult<()> {
    if rt == PC as u32 {
        cpu.load_write_pc(bus, value)
    } else {
        cpu.write_reg(rt, value);
        Ok(())
    }
}

fn load_single(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    rt: u32,
    addr: u32,
    size: u32,
    signed: bool,
) -> SimResult<()> {
    let value = cpu.read_mem_u(bus, addr, size)?;
    load_into(cpu, bus, rt, extend(value, size, signed))
}

// --- 16-bit ---

/// LDR Rt, [PC, #imm8]
pub fn ldr_literal16(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu.align_pc().wrapping_add(bits(op, 7, 0) << 2);
    load_single(cpu, bus, bits(op, 10, 8), addr, 4, false)
}

fn reg_offset_addr16(cpu: &CortexM, op: u32) -> u32 {
    cpu.read_reg(bits(op, 5, 3))
        .wrapping_add(cpu.read_reg(bits(op, 8, 6)))
}

/// STR/STRH/STRB Rt, [Rn, Rm]
pub fn str_reg16<const SIZE: u32>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let addr = reg_offset_addr16(cpu, op);
    let value = cpu.read_reg(bits(op, 2, 0));
    cpu.write_mem_u(bus, addr, value, SIZE)
}

/// LDR/LDRH/LDRB/LDRSH/LDRSB Rt, [Rn, Rm]
pub fn ldr_reg16<const SIZE: u32, const SIGNED: bool>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let addr = reg_offset_addr16(cpu, op);
    load_single(cpu, bus, bits(op, 2, 0), addr, SIZE, SIGNED)
}

/// STR/STRH/STRB Rt, [Rn, #imm5 * SIZE]
pub fn str_imm16<const SIZE: u32>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let addr = cpu
        .read_reg(bits(op, 5, 3))
        .wrapping_add(bits(op, 10, 6) * SIZE);
    let value = cpu.read_reg(bits(op, 2, 0));
    cpu.write_mem_u(bus, addr, value, SIZE)
}

pub fn ldr_imm16<const SIZE: u32>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let addr = cpu
        .read_reg(bits(op, 5, 3))
        .wrapping_add(bits(op, 10, 6) * SIZE);
    load_single(cpu, bus, bits(op, 2, 0), addr, SIZE, false)
}

/// STR Rt, [SP, #imm8]
pub fn str_sp16(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu.regs.sp().wrapping_add(bits(op, 7, 0) << 2);
    let value = cpu.read_reg(bits(op, 10, 8));
    cpu.write_mem_u(bus, addr, value, 4)
}

/// LDR Rt, [SP, #imm8]
pub fn ldr_sp16(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu.regs.sp().wrapping_add(bits(op, 7, 0) << 2);
    load_single(cpu, bus, bits(op, 10, 8), addr, 4, false)
}

// --- multiple ---

/// Store the registers in `list` upward from `start`.
fn store_multiple(cpu: &mut CortexM, bus: &mut dyn Bus, start: u32, list: u32) -> SimResult<()> {
    check_aligned(start, 4)?;
    let mut addr = start;
    for reg in (0..16).filter(|r| list & (1 << r) != 0) {
        let value = cpu.read_reg(reg);
        cpu.write_mem_a(bus, addr, value, 4)?;
        addr = addr.wrapping_add(4);
    }
    Ok(())
}

/// Load the registers in `list` upward from `start`. `writeback` lands
/// before a PC load so that an exception return sees the final SP.
fn load_multiple(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    start: u32,
    list: u32,
    writeback: Option<(u32, u32)>,
) -> SimResult<()> {
    let mut values = [0u32; 16];
    let mut addr = start;
    for reg in (0..16).filter(|r| list & (1 << r) != 0) {
        values[reg as usize] = cpu.read_mem_a(bus, addr, 4)?;
        addr = addr.wrapping_add(4);
    }
    for reg in (0..15).filter(|r| list & (1 << r) != 0) {
        cpu.write_reg(reg, values[reg as usize]);
    }
    if let Some((rn, value)) = writeback {
        cpu.write_reg(rn, value);
    }
    if list & (1 << PC) != 0 {
        cpu.load_write_pc(bus, values[PC])?;
    }
    Ok(())
}

fn check_list(cpu: &CortexM, op: u32, list: u32) -> SimResult<()> {
    if list == 0 {
        return Err(unpredictable_operands(cpu, op));
    }
    Ok(())
}

/// PUSH {registers, LR}
pub fn push16(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let list = bits(op, 7, 0) | (bits(op, 8, 8) << 14);
    check_list(cpu, op, list)?;
    let start = cpu.regs.sp().wrapping_sub(4 * list.count_ones());
    store_multiple(cpu, bus, start, list)?;
    cpu.write_reg(SP as u32, start);
    Ok(())
}

/// POP {registers, PC}
pub fn pop16(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let list = bits(op, 7, 0) | (bits(op, 8, 8) << 15);
    check_list(cpu, op, list)?;
    let sp = cpu.regs.sp();
    let end = sp.wrapping_add(4 * list.count_ones());
    load_multiple(cpu, bus, sp, list, Some((SP as u32, end)))
}

/// STMIA Rn!, {registers}
pub fn stm16(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rn = bits(op, 10, 8);
    let list = bits(op, 7, 0);
    check_list(cpu, op, list)?;
    let start = cpu.read_reg(rn);
    store_multiple(cpu, bus, start, list)?;
    cpu.write_reg(rn, start.wrapping_add(4 * list.count_ones()));
    Ok(())
}

/// LDMIA Rn{!}, {registers}: write-back unless Rn is in the list.
pub fn ldm16(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rn = bits(op, 10, 8);
    let list = bits(op, 7, 0);
    check_list(cpu, op, list)?;
    let start = cpu.read_reg(rn);
    let writeback =
        (list & (1 << rn) == 0).then(|| (rn, start.wrapping_add(4 * list.count_ones())));
    load_multiple(cpu, bus, start, list, writeback)
}

fn list32(op: u32) -> u32 {
    bits(op, 15, 0) & !(1 << SP)
}

fn writeback_to(op: u32, rn: u32, list: u32, value: u32) -> Option<(u32, u32)> {
    (bit(op, 21) && list & (1 << rn) == 0).then_some((rn, value))
}

/// STM.W Rn{!}, {registers}
pub fn stm_w(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rn = bits(op, 19, 16);
    let list = list32(op) & !(1 << PC);
    check_list(cpu, op, list)?;
    let start = cpu.read_reg(rn);
    store_multiple(cpu, bus, start, list)?;
    if bit(op, 21) {
        cpu.write_reg(rn, start.wrapping_add(4 * list.count_ones()));
    }
    Ok(())
}

/// STMDB Rn{!}, {registers}
pub fn stmdb_w(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rn = bits(op, 19, 16);
    let list = list32(op) & !(1 << PC);
    check_list(cpu, op, list)?;
    let start = cpu.read_reg(rn).wrapping_sub(4 * list.count_ones());
    store_multiple(cpu, bus, start, list)?;
    if bit(op, 21) {
        cpu.write_reg(rn, start);
    }
    Ok(())
}

/// LDM.W Rn{!}, {registers}
pub fn ldm_w(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rn = bits(op, 19, 16);
    let list = list32(op);
    check_list(cpu, op, list)?;
    let start = cpu.read_reg(rn);
    let end = start.wrapping_add(4 * list.count_ones());
    load_multiple(cpu, bus, start, list, writeback_to(op, rn, list, end))
}

/// LDMDB Rn{!}, {registers}
pub fn ldmdb_w(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let rn = bits(op, 19, 16);
    let list = list32(op);
    check_list(cpu, op, list)?;
    let start = cpu.read_reg(rn).wrapping_sub(4 * list.count_ones());
    load_multiple(cpu, bus, start, list, writeback_to(op, rn, list, start))
}

/// PUSH.W is STMDB SP! and POP.W is LDM SP!; same semantics, named apart
/// for tracing.
pub fn push_w(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    stmdb_w(cpu, bus, op)
}

pub fn pop_w(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    ldm_w(cpu, bus, op)
}

fn sp_writeback(op: u32) -> bool {
    bits(op, 19, 16) == SP as u32 && bit(op, 21)
}

pub fn decode_ldm(op: u32) -> Executor {
    if sp_writeback(op) {
        pop_w
    } else {
        ldm_w
    }
}

pub fn decode_stmdb(op: u32) -> Executor {
    if sp_writeback(op) {
        push_w
    } else {
        stmdb_w
    }
}

// --- 32-bit single ---

fn rt_rn(op: u32) -> (u32, u32) {
    (bits(op, 15, 12), bits(op, 19, 16))
}

/// `(address, write-back value)` for the imm8 form with P, U and W bits.
fn imm8_addressing(cpu: &CortexM, op: u32) -> (u32, Option<u32>) {
    let base = cpu.read_reg(bits(op, 19, 16));
    let imm = bits(op, 7, 0);
    let offset_addr = if bit(op, 9) {
        base.wrapping_add(imm)
    } else {
        base.wrapping_sub(imm)
    };
    let addr = if bit(op, 10) { offset_addr } else { base };
    (addr, bit(op, 8).then_some(offset_addr))
}

fn reg_offset_addr32(cpu: &CortexM, op: u32) -> u32 {
    let offset = cpu.read_reg(bits(op, 3, 0)) << bits(op, 5, 4);
    cpu.read_reg(bits(op, 19, 16)).wrapping_add(offset)
}

/// STR{B,H}.W Rt, [Rn, #imm12]
pub fn str_imm12<const SIZE: u32>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let (rt, rn) = rt_rn(op);
    let addr = cpu.read_reg(rn).wrapping_add(bits(op, 11, 0));
    let value = cpu.read_reg(rt);
    cpu.write_mem_u(bus, addr, value, SIZE)
}

/// STR{B,H}{T} Rt, [Rn, #+/-imm8]{!} and post-indexed forms.
pub fn str_imm8<const SIZE: u32>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let (rt, rn) = rt_rn(op);
    let (addr, writeback) = imm8_addressing(cpu, op);
    let value = cpu.read_reg(rt);
    cpu.write_mem_u(bus, addr, value, SIZE)?;
    if let Some(wb) = writeback {
        cpu.write_reg(rn, wb);
    }
    Ok(())
}

/// STR{B,H}.W Rt, [Rn, Rm, LSL #imm2]
pub fn str_reg32<const SIZE: u32>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let addr = reg_offset_addr32(cpu, op);
    let value = cpu.read_reg(bits(op, 15, 12));
    cpu.write_mem_u(bus, addr, value, SIZE)
}

pub fn decode_store<const SIZE: u32>(op: u32) -> Executor {
    if bit(op, 11) {
        str_imm8::<SIZE>
    } else if bits(op, 11, 6) == 0 {
        str_reg32::<SIZE>
    } else {
        super::misc::unpredictable
    }
}

pub fn ldr_imm12<const SIZE: u32, const SIGNED: bool>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let (rt, rn) = rt_rn(op);
    let addr = cpu.read_reg(rn).wrapping_add(bits(op, 11, 0));
    load_single(cpu, bus, rt, addr, SIZE, SIGNED)
}

/// LDR{S}{B,H}{T} with an 8-bit offset. Write-back lands before a PC load.
pub fn ldr_imm8<const SIZE: u32, const SIGNED: bool>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let (rt, rn) = rt_rn(op);
    let (addr, writeback) = imm8_addressing(cpu, op);
    let value = extend(cpu.read_mem_u(bus, addr, SIZE)?, SIZE, SIGNED);
    if let Some(wb) = writeback {
        cpu.write_reg(rn, wb);
    }
    load_into(cpu, bus, rt, value)
}

pub fn ldr_reg32<const SIZE: u32, const SIGNED: bool>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let addr = reg_offset_addr32(cpu, op);
    load_single(cpu, bus, bits(op, 15, 12), addr, SIZE, SIGNED)
}

/// LDR{S}{B,H}.W Rt, [PC, #+/-imm12]
pub fn ldr_literal32<const SIZE: u32, const SIGNED: bool>(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
) -> SimResult<()> {
    let base = cpu.align_pc();
    let addr = if bit(op, 23) {
        base.wrapping_add(bits(op, 11, 0))
    } else {
        base.wrapping_sub(bits(op, 11, 0))
    };
    load_single(cpu, bus, bits(op, 15, 12), addr, SIZE, SIGNED)
}

/// Single loads: literal, imm12, imm8 with P/U/W, or register offset.
/// Byte and halfword loads into PC are the PLD/PLI hints.
pub fn decode_load<const SIZE: u32, const SIGNED: bool>(op: u32) -> Executor {
    let (rt, rn) = rt_rn(op);
    if rt == PC as u32 && SIZE < 4 {
        return super::misc::nop;
    }
    if rn == PC as u32 {
        ldr_literal32::<SIZE, SIGNED>
    } else if bit(op, 23) {
        ldr_imm12::<SIZE, SIGNED>
    } else if bit(op, 11) {
        if bits(op, 10, 8) == 0b000 {
            super::misc::unpredictable
        } else {
            ldr_imm8::<SIZE, SIGNED>
        }
    } else if bits(op, 11, 6) == 0 {
        ldr_reg32::<SIZE, SIGNED>
    } else {
        super::misc::unpredictable
    }
}

// --- dual ---

/// `(address, write-back value)` for LDRD/STRD. A PC base is word aligned.
fn dual_addressing(cpu: &CortexM, op: u32) -> (u32, Option<u32>) {
    let rn = bits(op, 19, 16);
    let base = if rn == PC as u32 {
        cpu.align_pc()
    } else {
        cpu.read_reg(rn)
    };
    let imm = bits(op, 7, 0) << 2;
    let offset_addr = if bit(op, 23) {
        base.wrapping_add(imm)
    } else {
        base.wrapping_sub(imm)
    };
    let addr = if bit(op, 24) { offset_addr } else { base };
    (addr, bit(op, 21).then_some(offset_addr))
}

pub fn strd(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (addr, writeback) = dual_addressing(cpu, op);
    let first = cpu.read_reg(bits(op, 15, 12));
    let second = cpu.read_reg(bits(op, 11, 8));
    cpu.write_mem_a(bus, addr, first, 4)?;
    cpu.write_mem_a(bus, addr.wrapping_add(4), second, 4)?;
    if let Some(wb) = writeback {
        cpu.write_reg(bits(op, 19, 16), wb);
    }
    Ok(())
}

pub fn ldrd(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (addr, writeback) = dual_addressing(cpu, op);
    let first = cpu.read_mem_a(bus, addr, 4)?;
    let second = cpu.read_mem_a(bus, addr.wrapping_add(4), 4)?;
    cpu.write_reg(bits(op, 15, 12), first);
    cpu.write_reg(bits(op, 11, 8), second);
    if let Some(wb) = writeback {
        cpu.write_reg(bits(op, 19, 16), wb);
    }
    Ok(())
}

// --- exclusive ---

fn exclusive_load(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32, addr: u32, size: u32) -> SimResult<()> {
    let value = cpu.read_mem_a(bus, addr, size)?;
    cpu.exclusive.set_exclusive_monitors(addr, size);
    cpu.write_reg(bits(op, 15, 12), value);
    Ok(())
}

/// Store only if the reservation holds; `rd` gets 0 on success, 1 otherwise.
fn exclusive_store(
    cpu: &mut CortexM,
    bus: &mut dyn Bus,
    op: u32,
    rd: u32,
    addr: u32,
    size: u32,
) -> SimResult<()> {
    // Alignment is checked before the monitor is consulted
    check_aligned(addr, size)?;
    let status = if cpu.exclusive.exclusive_monitors_pass(addr, size) {
        let value = cpu.read_reg(bits(op, 15, 12));
        cpu.write_mem_a(bus, addr, value, size)?;
        0
    } else {
        1
    };
    cpu.write_reg(rd, status);
    Ok(())
}

/// LDREX Rt, [Rn, #imm8]
pub fn ldrex(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu
        .read_reg(bits(op, 19, 16))
        .wrapping_add(bits(op, 7, 0) << 2);
    exclusive_load(cpu, bus, op, addr, 4)
}

/// STREX Rd, Rt, [Rn, #imm8]
pub fn strex(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu
        .read_reg(bits(op, 19, 16))
        .wrapping_add(bits(op, 7, 0) << 2);
    exclusive_store(cpu, bus, op, bits(op, 11, 8), addr, 4)
}

pub fn ldrexb(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu.read_reg(bits(op, 19, 16));
    exclusive_load(cpu, bus, op, addr, 1)
}

pub fn ldrexh(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu.read_reg(bits(op, 19, 16));
    exclusive_load(cpu, bus, op, addr, 2)
}

pub fn strexb(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu.read_reg(bits(op, 19, 16));
    exclusive_store(cpu, bus, op, bits(op, 3, 0), addr, 1)
}

pub fn strexh(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu.read_reg(bits(op, 19, 16));
    exclusive_store(cpu, bus, op, bits(op, 3, 0), addr, 2)
}

/// STREXB/STREXH, or TBB/TBH/LDREXB/LDREXH, on second halfword bits [7:4].
pub fn decode_exclusive_table_branch(op: u32) -> Executor {
    match (bit(op, 20), bits(op, 7, 4)) {
        (false, 0b0100) => strexb,
        (false, 0b0101) => strexh,
        (true, 0b0000) => super::branch::tbb,
        (true, 0b0001) => super::branch::tbh,
        (true, 0b0100) => ldrexb,
        (true, 0b0101) => ldrexh,
        _ => super::misc::unpredictable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SystemBus;

    fn setup() -> (CortexM, SystemBus) {
        let mut cpu = CortexM::default();
        cpu.regs.msp = 0x2000_1000;
        cpu.regs.instr_addr = 0x2000_0000;
        (cpu, SystemBus::new())
    }

    #[test]
    fn test_push_pop_round_trip() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.r4 = 0x44;
        cpu.regs.r5 = 0x55;
        cpu.regs.lr = 0x2000_0101;
        // PUSH {R4, R5, LR}
        push16(&mut cpu, &mut bus, 0xB530).unwrap();
        assert_eq!(cpu.regs.msp, 0x2000_0FF4);
        assert_eq!(bus.read_u32(0x2000_0FF4).unwrap(), 0x44);
        assert_eq!(bus.read_u32(0x2000_0FFC).unwrap(), 0x2000_0101);

        cpu.regs.r4 = 0;
        cpu.regs.r5 = 0;
        // POP {R4, R5, PC}
        pop16(&mut cpu, &mut bus, 0xBD30).unwrap();
        assert_eq!((cpu.regs.r4, cpu.regs.r5), (0x44, 0x55));
        assert_eq!(cpu.regs.pc, 0x2000_0100);
        assert_eq!(cpu.regs.msp, 0x2000_1000);
    }

    #[test]
    fn test_ldm_without_writeback_when_base_loaded() {
        let (mut cpu, mut bus) = setup();
        bus.write_u32(0x2000_0200, 1).unwrap();
        bus.write_u32(0x2000_0204, 0x2000_0300).unwrap();
        cpu.regs.r1 = 0x2000_0200;
        // LDM R1, {R0, R1}
        ldm16(&mut cpu, &mut bus, 0xC903).unwrap();
        assert_eq!(cpu.regs.r0, 1);
        assert_eq!(cpu.regs.r1, 0x2000_0300);
    }

    #[test]
    fn test_exclusive_pair() {
        let (mut cpu, mut bus) = setup();
        bus.write_u32(0x2000_0100, 7).unwrap();
        cpu.regs.r0 = 0x2000_0100;
        cpu.regs.r2 = 9;
        // LDREX R1, [R0]
        ldrex(&mut cpu, &mut bus, 0xE850_1F00).unwrap();
        assert_eq!(cpu.regs.r1, 7);
        // STREX R3, R2, [R0]
        strex(&mut cpu, &mut bus, 0xE840_2300).unwrap();
        assert_eq!(cpu.regs.r3, 0);
        assert_eq!(bus.read_u32(0x2000_0100).unwrap(), 9);
        // Reservation consumed
        cpu.regs.r2 = 11;
        strex(&mut cpu, &mut bus, 0xE840_2300).unwrap();
        assert_eq!(cpu.regs.r3, 1);
        assert_eq!(bus.read_u32(0x2000_0100).unwrap(), 9);
    }

    #[test]
    fn test_misaligned_multiple_is_rejected() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.r0 = 0x2000_0102;
        // STMIA R0!, {R1}
        assert!(matches!(
            stm16(&mut cpu, &mut bus, 0xC002),
            Err(crate::SimulationError::UnalignedAccess { .. })
        ));
        assert_eq!(cpu.regs.r0, 0x2000_0102);
    }

    #[test]
    fn test_post_indexed_load() {
        let (mut cpu, mut bus) = setup();
        bus.write_u32(0x2000_0100, 0xFFFF_FF80).unwrap();
        cpu.regs.r1 = 0x2000_0100;
        // LDRSB R0, [R1], #4
        let op = 0xF911_0B04;
        decode_load::<1, true>(op)(&mut cpu, &mut bus, op).unwrap();
        assert_eq!(cpu.regs.r0, 0xFFFF_FF80);
        assert_eq!(cpu.regs.r1, 0x2000_0104);
    }

    #[test]
    fn test_ldrd_literal_is_word_aligned() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.instr_addr = 0x2000_0002;
        bus.write_u32(0x2000_0010, 0xAAAA).unwrap();
        bus.write_u32(0x2000_0014, 0xBBBB).unwrap();
        // LDRD R0, R1, [PC, #12]
        ldrd(&mut cpu, &mut bus, 0xE9DF_0103).unwrap();
        assert_eq!((cpu.regs.r0, cpu.regs.r1), (0xAAAA, 0xBBBB));
    }
}
