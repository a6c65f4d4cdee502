// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Architectural register file of the Cortex-M3 core.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const SP: usize = 13;
pub const LR: usize = 14;
pub const PC: usize = 15;

/// xPSR bit recording that the exception frame was realigned to 8 bytes.
pub const XPSR_FRAME_ALIGN: u32 = 1 << 9;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Control: u32 {
        /// Thread mode is unprivileged.
        const NPRIV = 1 << 0;
        /// Thread mode uses the process stack.
        const SPSEL = 1 << 1;
    }
}

/// Which of the two banked stack pointers is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StackBank {
    #[default]
    Main,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Thread,
    Handler,
}

/// Mode and exception-nesting side state. Never visible to the guest directly.
#[derive(Debug, Clone, Default)]
pub struct ExecState {
    pub mode: Mode,
    /// The instruction just executed opened an IT block; skip the IT advance.
    pub it_defined: bool,
    /// Active exception numbers, innermost last.
    pub active: VecDeque<u32>,
}

impl ExecState {
    pub fn current_exception(&self) -> Option<u32> {
        self.active.back().copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub r12: u32,
    pub msp: u32,
    pub psp: u32,
    pub lr: u32,
    /// Address of the next instruction to fetch.
    pub pc: u32,
    /// Address of the instruction being executed.
    pub instr_addr: u32,
    pub bank: StackBank,

    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
    pub q: bool,
    pub ge: u8,
    pub it_state: u8,
    pub ipsr: u32,
    pub thumb: bool,

    pub primask: bool,
    pub faultmask: bool,
    pub basepri: u8,
    pub control: Control,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            thumb: true,
            ..Default::default()
        }
    }

    /// Architectural register read. R15 reads as the current instruction address + 4.
    pub fn read_reg(&self, n: usize) -> u32 {
        match n {
            0 => self.r0,
            1 => self.r1,
            2 => self.r2,
            3 => self.r3,
            4 => self.r4,
            5 => self.r5,
            6 => self.r6,
            7 => self.r7,
            8 => self.r8,
            9 => self.r9,
            10 => self.r10,
            11 => self.r11,
            12 => self.r12,
            SP => self.sp(),
            LR => self.lr,
            PC => self.instr_addr.wrapping_add(4),
            _ => 0,
        }
    }

    /// Plain register write. Writes to R15 only move the fetch address; use the
    /// core's PC write helpers when interworking or exception return matter.
    pub fn write_reg(&mut self, n: usize, value: u32) {
        match n {
            0 => self.r0 = value,
            1 => self.r1 = value,
            2 => self.r2 = value,
            3 => self.r3 = value,
            4 => self.r4 = value,
            5 => self.r5 = value,
            6 => self.r6 = value,
            7 => self.r7 = value,
            8 => self.r8 = value,
            9 => self.r9 = value,
            10 => self.r10 = value,
            11 => self.r11 = value,
            12 => self.r12 = value,
            SP => *self.active_sp() = value & !3,
            LR => self.lr = value,
            PC => self.pc = value & !1,
            _ => {}
        }
    }

    pub fn sp(&self) -> u32 {
        match self.bank {
            StackBank::Main => self.msp,
            StackBank::Process => self.psp,
        }
    }

    pub fn active_sp(&mut self) -> &mut u32 {
        match self.bank {
            StackBank::Main => &mut self.msp,
            StackBank::Process => &mut self.psp,
        }
    }

    /// Handler mode always runs on MSP; Thread mode follows CONTROL.SPSEL.
    pub fn select_stack(&mut self, mode: Mode) {
        self.bank = if mode == Mode::Handler || !self.control.contains(Control::SPSEL) {
            StackBank::Main
        } else {
            StackBank::Process
        };
    }

    pub fn set_nz(&mut self, result: u32) {
        self.n = result & 0x8000_0000 != 0;
        self.z = result == 0;
    }

    pub fn set_nzc(&mut self, result: u32, carry: bool) {
        self.set_nz(result);
        self.c = carry;
    }

    pub fn set_nzcv(&mut self, result: u32, carry: bool, overflow: bool) {
        self.set_nz(result);
        self.c = carry;
        self.v = overflow;
    }

    pub fn condition_passed(&self, cond: u32) -> bool {
        let result = match (cond >> 1) & 0x7 {
            0b000 => self.z,
            0b001 => self.c,
            0b010 => self.n,
            0b011 => self.v,
            0b100 => self.c && !self.z,
            0b101 => self.n == self.v,
            0b110 => self.n == self.v && !self.z,
            _ => true,
        };
        if cond & 1 == 1 && cond != 0xF {
            !result
        } else {
            result
        }
    }

    pub fn in_it_block(&self) -> bool {
        self.it_state & 0x0F != 0
    }

    pub fn last_in_it_block(&self) -> bool {
        self.it_state & 0x0F == 0x08
    }

    /// Condition of the current IT slot, or AL outside a block.
    pub fn current_cond(&self) -> u32 {
        if self.in_it_block() {
            (self.it_state >> 4) as u32
        } else {
            0xE
        }
    }

    pub fn advance_it(&mut self) {
        if self.it_state & 0x07 == 0 {
            self.it_state = 0;
        } else {
            let low = (self.it_state << 1) & 0x1F;
            self.it_state = (self.it_state & 0xE0) | low;
        }
    }

    pub fn apsr(&self) -> u32 {
        ((self.n as u32) << 31)
            | ((self.z as u32) << 30)
            | ((self.c as u32) << 29)
            | ((self.v as u32) << 28)
            | ((self.q as u32) << 27)
            | ((self.ge as u32 & 0xF) << 16)
    }

    pub fn epsr(&self) -> u32 {
        let it = self.it_state as u32;
        ((it & 0x3) << 25) | ((self.thumb as u32) << 24) | ((it >> 2) << 10)
    }

    pub fn xpsr(&self) -> u32 {
        self.apsr() | self.epsr() | (self.ipsr & 0x1FF)
    }

    pub fn set_apsr(&mut self, value: u32) {
        self.n = value & (1 << 31) != 0;
        self.z = value & (1 << 30) != 0;
        self.c = value & (1 << 29) != 0;
        self.v = value & (1 << 28) != 0;
        self.q = value & (1 << 27) != 0;
        self.ge = ((value >> 16) & 0xF) as u8;
    }

    pub fn set_xpsr(&mut self, value: u32) {
        self.set_apsr(value);
        self.it_state = (((value >> 25) & 0x3) | (((value >> 10) & 0x3F) << 2)) as u8;
        self.thumb = value & (1 << 24) != 0;
        self.ipsr = value & 0x1FF;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sp_writes_are_word_aligned() {
        let mut regs = RegisterFile::new();
        regs.write_reg(SP, 0x2000_0FFF);
        assert_eq!(regs.msp, 0x2000_0FFC);
        assert_eq!(regs.read_reg(SP), 0x2000_0FFC);
    }

    #[test]
    fn test_pc_reads_ahead() {
        let mut regs = RegisterFile::new();
        regs.instr_addr = 0x100;
        regs.pc = 0x102;
        assert_eq!(regs.read_reg(PC), 0x104);
    }

    #[test]
    fn test_stack_bank_selection() {
        let mut regs = RegisterFile::new();
        regs.msp = 0x2000_1000;
        regs.psp = 0x2000_0800;
        regs.control.insert(Control::SPSEL);

        regs.select_stack(Mode::Thread);
        assert_eq!(regs.sp(), 0x2000_0800);
        *regs.active_sp() -= 8;
        assert_eq!(regs.psp, 0x2000_07F8);

        regs.select_stack(Mode::Handler);
        assert_eq!(regs.sp(), 0x2000_1000);
    }

    #[test]
    fn test_xpsr_split_and_compose() {
        let mut regs = RegisterFile::new();
        // N, C, IT = 0b0100_1100 (ITE-ish mask), Thumb, IPSR 15
        let it: u32 = 0b0100_1100;
        let xpsr = (1 << 31) | (1 << 29) | ((it & 3) << 25) | (1 << 24) | ((it >> 2) << 10) | 15;
        regs.set_xpsr(xpsr);
        assert!(regs.n && regs.c && !regs.z && !regs.v);
        assert_eq!(regs.it_state, 0b0100_1100);
        assert_eq!(regs.ipsr, 15);
        assert_eq!(regs.xpsr(), xpsr);
    }

    #[test]
    fn test_it_advance_exhausts() {
        let mut regs = RegisterFile::new();
        // ITT EQ: firstcond 0000, mask 0100
        regs.it_state = 0b0000_0100;
        assert!(regs.in_it_block());
        regs.advance_it();
        assert_eq!(regs.it_state, 0b0000_1000);
        assert!(regs.last_in_it_block());
        regs.advance_it();
        assert_eq!(regs.it_state, 0);
        assert!(!regs.in_it_block());
    }

    #[test]
    fn test_condition_codes() {
        let mut regs = RegisterFile::new();
        regs.z = true;
        assert!(regs.condition_passed(0x0)); // EQ
        assert!(!regs.condition_passed(0x1)); // NE
        regs.z = false;
        regs.n = true;
        regs.v = false;
        assert!(regs.condition_passed(0xB)); // LT
        assert!(!regs.condition_passed(0xA)); // GE
        assert!(regs.condition_passed(0xE)); // AL
    }
}
