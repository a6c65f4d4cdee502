// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use thumbsim_core::bus::SystemBus;
use thumbsim_core::cpu::CortexM;
use thumbsim_core::decoder::{is_16bit_code, tables};

fn scratch_core() -> CortexM {
    let mut cpu = CortexM::default();
    // Every base register points into RAM
    for n in 0..13 {
        cpu.write_reg(n, 0x2000_1000);
    }
    cpu.regs.msp = 0x2000_4000;
    cpu.regs.lr = 0x2000_0101;
    cpu.regs.instr_addr = 0x2000_0000;
    cpu.regs.pc = 0x2000_0002;
    cpu
}

#[test]
fn test_every_first_halfword_has_a_length() {
    let t = tables();
    for first in 0..=u16::MAX {
        let instr = t.decode(first, 0);
        let expected = if is_16bit_code(first as u32) { 2 } else { 4 };
        assert_eq!(instr.length, expected, "halfword {:#06x}", first);
        if expected == 4 {
            assert_eq!(instr.opcode >> 16, first as u32);
        }
    }
}

#[test]
fn test_every_16bit_encoding_executes_without_panicking() {
    let mut bus = SystemBus::new();
    for op in 0..=u16::MAX as u32 {
        if !is_16bit_code(op) {
            continue;
        }
        let mut cpu = scratch_core();
        // Ok or a reported error; both are acceptable here
        let _ = tables().decode_16(op)(&mut cpu, &mut bus, op);
    }
}

#[test]
fn test_32bit_space_executes_without_panicking() {
    let mut bus = SystemBus::new();
    let seconds = [0x0000u16, 0x0F0F, 0x1234, 0x8000, 0x8F4F, 0xF000, 0xF0F0, 0xFFFF];
    for first in 0xE800..=u16::MAX {
        for &second in &seconds {
            let mut cpu = scratch_core();
            cpu.regs.pc = 0x2000_0004;
            let instr = tables().decode(first, second);
            let _ = (instr.executor)(&mut cpu, &mut bus, instr.opcode);
        }
    }
}
