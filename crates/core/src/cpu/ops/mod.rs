// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Instruction executors and the sub-decoders that pick between them.
//!
//! Executors receive the raw opcode: a 16-bit encoding in the low halfword,
//! or `first << 16 | second` for 32-bit encodings, so bit 16 of a 32-bit
//! opcode is bit 0 of its first halfword.

pub mod branch;
pub mod data;
pub mod memory;
pub mod misc;
pub mod multiply;
pub mod parallel;

use crate::cpu::CortexM;
use crate::SimulationError;

/// Bits `hi..=lo` of `op`.
#[inline(always)]
pub(crate) fn bits(op: u32, hi: u32, lo: u32) -> u32 {
    (op >> lo) & (u32::MAX >> (31 - (hi - lo)))
}

#[inline(always)]
pub(crate) fn bit(op: u32, n: u32) -> bool {
    (op >> n) & 1 != 0
}

/// 16-bit flag-setting encodings only set flags outside an IT block.
#[inline(always)]
pub(crate) fn set_flags_16(cpu: &CortexM) -> bool {
    !cpu.regs.in_it_block()
}

/// Error for an encoding whose operands make it UNPREDICTABLE.
pub(crate) fn unpredictable_operands(cpu: &CortexM, op: u32) -> SimulationError {
    SimulationError::Unpredictable {
        opcode: op,
        addr: cpu.regs.instr_addr,
    }
}
