// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! SIMD lane arithmetic on byte and halfword lanes, plus the saturating
//! word operations.

use super::{bit, bits};
use crate::cpu::alu::{sign_extend, signed_sat_q, unsigned_sat_q};
use crate::cpu::CortexM;
use crate::decoder::Executor;
use crate::{Bus, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefix {
    /// S/U: modular, sets GE
    Plain,
    /// Q/UQ: saturating
    Saturate,
    /// SH/UH: halving
    Halve,
}

/// Lane recipe: width and, per output lane, `(a lane, b lane, add)`.
fn recipe(op1: u32) -> Option<(u32, &'static [(u32, u32, bool)])> {
    const ADD8: [(u32, u32, bool); 4] = [(0, 0, true), (1, 1, true), (2, 2, true), (3, 3, true)];
    const SUB8: [(u32, u32, bool); 4] = [(0, 0, false), (1, 1, false), (2, 2, false), (3, 3, false)];
    match op1 {
        0b000 => Some((8, &ADD8)),
        0b001 => Some((16, &[(0, 0, true), (1, 1, true)])),
        0b010 => Some((16, &[(0, 1, false), (1, 0, true)])), // ASX
        0b100 => Some((8, &SUB8)),
        0b101 => Some((16, &[(0, 0, false), (1, 1, false)])),
        0b110 => Some((16, &[(0, 1, true), (1, 0, false)])), // SAX
        _ => None,
    }
}

fn prefix(op: u32) -> Option<Prefix> {
    match bits(op, 5, 4) {
        0b00 => Some(Prefix::Plain),
        0b01 => Some(Prefix::Saturate),
        0b10 => Some(Prefix::Halve),
        _ => None,
    }
}

fn lane(value: u32, index: u32, width: u32, unsigned: bool) -> i64 {
    let raw = (value >> (index * width)) & ((1u32 << width) - 1);
    if unsigned {
        raw as i64
    } else {
        sign_extend(raw, width) as i32 as i64
    }
}

/// {S,U}{,Q,H}{ADD8,ADD16,ASX,SAX,SUB8,SUB16} Rd, Rn, Rm
pub fn add_sub_lanes(cpu: &mut CortexM, bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (Some((width, lanes)), Some(prefix)) = (recipe(bits(op, 22, 20)), prefix(op)) else {
        return super::misc::unpredictable(cpu, bus, op);
    };
    let unsigned = bit(op, 6);
    let a = cpu.read_reg(bits(op, 19, 16));
    let b = cpu.read_reg(bits(op, 3, 0));
    let mask = (1u32 << width) - 1;
    let ge_per_lane = width / 8;

    let mut result = 0u32;
    let mut ge = 0u8;
    for (index, &(a_lane, b_lane, add)) in lanes.iter().enumerate() {
        let x = lane(a, a_lane, width, unsigned);
        let y = lane(b, b_lane, width, unsigned);
        let raw = if add { x + y } else { x - y };
        let value = match prefix {
            Prefix::Plain => {
                let ge_set = if unsigned && add {
                    raw >= 1 << width
                } else {
                    raw >= 0
                };
                if ge_set {
                    let lane_bits = (1u8 << ge_per_lane) - 1;
                    ge |= lane_bits << (index as u32 * ge_per_lane);
                }
                raw
            }
            Prefix::Saturate if unsigned => unsigned_sat_q(raw, width).0,
            Prefix::Saturate => signed_sat_q(raw, width).0,
            Prefix::Halve => raw >> 1,
        };
        result |= (value as u32 & mask) << (index as u32 * width);
    }

    cpu.write_reg(bits(op, 11, 8), result);
    if prefix == Prefix::Plain {
        cpu.regs.ge = ge;
    }
    Ok(())
}

/// Parallel add/subtract with the prefix in second halfword bits [6:4].
pub fn decode_parallel(op: u32) -> Executor {
    if recipe(bits(op, 22, 20)).is_some() && prefix(op).is_some() {
        add_sub_lanes
    } else {
        super::misc::unpredictable
    }
}

/// `(Rd, R[m], R[n])` for the saturating word operations.
fn q_operands(cpu: &CortexM, op: u32) -> (u32, i64, i64) {
    (
        bits(op, 11, 8),
        cpu.read_reg(bits(op, 3, 0)) as i32 as i64,
        cpu.read_reg(bits(op, 19, 16)) as i32 as i64,
    )
}

fn write_saturated(cpu: &mut CortexM, rd: u32, (value, saturated): (i64, bool)) {
    cpu.write_reg(rd, value as u32);
    if saturated {
        cpu.regs.q = true;
    }
}

/// QADD Rd, Rm, Rn
pub fn qadd(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (rd, m, n) = q_operands(cpu, op);
    write_saturated(cpu, rd, signed_sat_q(m + n, 32));
    Ok(())
}

pub fn qsub(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (rd, m, n) = q_operands(cpu, op);
    write_saturated(cpu, rd, signed_sat_q(m - n, 32));
    Ok(())
}

/// QDADD Rd, Rm, Rn: Rm + sat(2 * Rn)
pub fn qdadd(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (rd, m, n) = q_operands(cpu, op);
    let (doubled, sat1) = signed_sat_q(2 * n, 32);
    let (value, sat2) = signed_sat_q(m + doubled, 32);
    write_saturated(cpu, rd, (value, sat1 || sat2));
    Ok(())
}

pub fn qdsub(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let (rd, m, n) = q_operands(cpu, op);
    let (doubled, sat1) = signed_sat_q(2 * n, 32);
    let (value, sat2) = signed_sat_q(m - doubled, 32);
    write_saturated(cpu, rd, (value, sat1 || sat2));
    Ok(())
}

/// SEL Rd, Rn, Rm: byte i from Rn when GE[i] is set, else from Rm.
pub fn sel(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let n = cpu.read_reg(bits(op, 19, 16));
    let m = cpu.read_reg(bits(op, 3, 0));
    let result = (0..4).fold(0u32, |acc, i| {
        let source = if cpu.regs.ge & (1 << i) != 0 { n } else { m };
        acc | (source & (0xFF << (i * 8)))
    });
    cpu.write_reg(bits(op, 11, 8), result);
    Ok(())
}
