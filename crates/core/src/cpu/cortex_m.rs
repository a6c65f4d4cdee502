// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::cpu::exclusive::ExclusiveMonitor;
use crate::cpu::registers::{ExecState, Mode, RegisterFile, LR, PC, SP};
use crate::decoder::{is_16bit_code, DecodeTables};
use crate::nvic::{Nvic, HARD_FAULT, USAGE_FAULT};
use crate::peripherals::nvic::{NvicState, CCR_UNALIGN_TRP};
use crate::snapshot::CpuSnapshot;
use crate::{Bus, Cpu, SimResult, SimulationError, SimulationObserver};
use std::sync::Arc;

/// Vectors in the stock table: 16 system entries and 64 IRQs.
const DEFAULT_VECTOR_COUNT: u32 = 16 + 64;

#[derive(Debug)]
pub struct CortexM {
    pub regs: RegisterFile,
    pub exec: ExecState,
    pub nvic: Nvic,
    pub exclusive: ExclusiveMonitor,
    tables: &'static DecodeTables,
    /// Address of a BKPT hit during the current step.
    halt_request: Option<u32>,
    /// Exception left through EXC_RETURN during the current step.
    returned_from: Option<u32>,
    /// Return address to stack for a synchronous fault raised this step.
    pub(crate) fault_return: Option<u32>,
    pub cycles: u64,
    pub trace_instructions: bool,
}

impl Default for CortexM {
    fn default() -> Self {
        Self::new(Nvic::new(
            Arc::new(NvicState::default()),
            DEFAULT_VECTOR_COUNT,
        ))
    }
}

impl CortexM {
    pub fn new(nvic: Nvic) -> Self {
        Self {
            regs: RegisterFile::new(),
            exec: ExecState::default(),
            nvic,
            exclusive: ExclusiveMonitor::new(),
            tables: crate::decoder::tables(),
            halt_request: None,
            returned_from: None,
            fault_return: None,
            cycles: 0,
            trace_instructions: false,
        }
    }

    pub fn read_reg(&self, n: u32) -> u32 {
        self.regs.read_reg(n as usize)
    }

    pub fn write_reg(&mut self, n: u32, value: u32) {
        self.regs.write_reg(n as usize, value)
    }

    pub fn is_privileged(&self) -> bool {
        self.exec.mode == Mode::Handler
            || !self
                .regs
                .control
                .contains(crate::cpu::registers::Control::NPRIV)
    }

    /// Word-aligned PC value used by literal loads and ADR.
    pub fn align_pc(&self) -> u32 {
        self.regs.read_reg(PC) & !3
    }

    /// Unaligned-tolerant access used by single loads and stores.
    pub fn read_mem_u(&mut self, bus: &dyn Bus, addr: u32, size: u32) -> SimResult<u32> {
        self.check_unaligned_trap(addr, size)?;
        bus.read(addr, size)
    }

    pub fn write_mem_u(
        &mut self,
        bus: &mut dyn Bus,
        addr: u32,
        value: u32,
        size: u32,
    ) -> SimResult<()> {
        self.check_unaligned_trap(addr, size)?;
        bus.write(addr, value, size)
    }

    /// Aligned access used by multiple, exclusive and dual transfers and by
    /// exception stacking.
    pub fn read_mem_a(&self, bus: &dyn Bus, addr: u32, size: u32) -> SimResult<u32> {
        check_aligned(addr, size)?;
        bus.read(addr, size)
    }

    pub fn write_mem_a(&self, bus: &mut dyn Bus, addr: u32, value: u32, size: u32) -> SimResult<()> {
        check_aligned(addr, size)?;
        bus.write(addr, value, size)
    }

    fn check_unaligned_trap(&mut self, addr: u32, size: u32) -> SimResult<()> {
        if size > 1 && addr % size != 0 && self.nvic.state.ccr() & CCR_UNALIGN_TRP != 0 {
            self.throw(USAGE_FAULT);
            return Err(SimulationError::UnalignedAccess { addr, size });
        }
        Ok(())
    }

    /// Raise an exception from inside an instruction. A full pending store is
    /// logged and the request dropped.
    pub fn throw(&mut self, vector: u32) {
        if (HARD_FAULT..=USAGE_FAULT).contains(&vector) {
            // Faults return to the instruction that raised them
            self.fault_return = Some(self.regs.instr_addr);
        }
        if let Err(e) = self.nvic.throw_exception(vector) {
            tracing::warn!("Exception {} dropped: {}", vector, e);
        }
    }

    pub fn branch_write_pc(&mut self, addr: u32) {
        self.regs.pc = addr & !1;
    }

    /// Interworking branch. EXC_RETURN values in Handler mode leave the
    /// current exception.
    pub fn bx_write_pc(&mut self, bus: &mut dyn Bus, addr: u32) -> SimResult<()> {
        if self.exec.mode == Mode::Handler && addr >> 28 == 0xF {
            return self.exception_return(bus, addr);
        }
        self.blx_write_pc(addr);
        Ok(())
    }

    pub fn blx_write_pc(&mut self, addr: u32) {
        if addr & 1 == 0 {
            // INVSTATE: the core cannot leave Thumb state
            self.regs.thumb = false;
            tracing::warn!("Interworking branch to ARM state at {:#x}", addr);
            self.throw(USAGE_FAULT);
            // The branch completes; the fault belongs to the target
            self.fault_return = Some(addr & !1);
        }
        self.regs.pc = addr & !1;
    }

    pub fn load_write_pc(&mut self, bus: &mut dyn Bus, addr: u32) -> SimResult<()> {
        self.bx_write_pc(bus, addr)
    }

    pub fn alu_write_pc(&mut self, addr: u32) {
        self.branch_write_pc(addr)
    }

    /// Executor side of BKPT: stop the debug loop on this instruction.
    pub fn request_halt(&mut self, addr: u32) {
        self.halt_request = Some(addr);
    }

    pub(crate) fn note_exception_return(&mut self, vector: u32) {
        self.returned_from = Some(vector);
    }

    /// Pull pending requests out of the SCS, then enter the winning exception.
    fn poll_exceptions(
        &mut self,
        bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
    ) {
        self.nvic.sync_scs_requests();
        let priority = self.execution_priority();
        let vector = self.nvic.check_exception(priority);
        if vector == 0 {
            return;
        }
        match self.handle_exception(bus, vector) {
            Ok(()) => {
                for observer in observers {
                    observer.on_exception_entry(vector);
                }
            }
            Err(e) => tracing::error!("Exception {} entry failed: {}", vector, e),
        }
    }
}

pub(crate) fn check_aligned(addr: u32, size: u32) -> SimResult<()> {
    if addr % size != 0 {
        tracing::warn!("Unaligned {}-byte access at {:#x}", size, addr);
        return Err(SimulationError::UnalignedAccess { addr, size });
    }
    Ok(())
}

/// Extra debugger-visible registers after R0-R15.
const XPSR_ID: u8 = 16;
const MSP_ID: u8 = 17;
const PSP_ID: u8 = 18;
const PRIMASK_ID: u8 = 19;
const BASEPRI_ID: u8 = 20;
const FAULTMASK_ID: u8 = 21;
const CONTROL_ID: u8 = 22;

impl Cpu for CortexM {
    fn reset(&mut self, bus: &mut dyn Bus) -> SimResult<()> {
        self.regs = RegisterFile::new();
        self.exec = ExecState::default();
        self.nvic.reset();
        self.exclusive.clear_exclusive_local();
        self.halt_request = None;
        self.returned_from = None;
        self.fault_return = None;

        let vtor = self.nvic.state.vtor();
        if let Ok(sp) = bus.read_u32(vtor) {
            self.regs.msp = sp & !3;
        }
        if let Ok(pc) = bus.read_u32(vtor.wrapping_add(4)) {
            self.regs.pc = pc & !1;
            // An empty vector table leaves raw images in Thumb state
            self.regs.thumb = pc & 1 == 1 || pc == 0;
        }

        Ok(())
    }

    fn step(
        &mut self,
        bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
    ) -> SimResult<()> {
        let pc = self.regs.pc;
        let first = bus
            .read_u16(pc)
            .map_err(|_| SimulationError::EndOfProgram(pc))?;
        let second = if is_16bit_code(first as u32) {
            0
        } else {
            bus.read_u16(pc.wrapping_add(2))
                .map_err(|_| SimulationError::EndOfProgram(pc))?
        };
        let instruction = self.tables.decode(first, second);

        for observer in observers {
            observer.on_step_start(pc, instruction.opcode);
        }
        if self.trace_instructions {
            tracing::debug!("PC={:#x}, Opcode={:#x}", pc, instruction.opcode);
        }

        self.regs.instr_addr = pc;
        self.regs.pc = pc.wrapping_add(instruction.length);
        self.exec.it_defined = false;
        self.fault_return = None;

        if !self.regs.thumb {
            self.throw(USAGE_FAULT);
        } else if !self.regs.in_it_block() || self.regs.condition_passed(self.regs.current_cond())
        {
            if let Err(e) = (instruction.executor)(self, bus, instruction.opcode) {
                tracing::warn!("Instruction {:#x} at {:#x}: {}", instruction.opcode, pc, e);
            }
        }

        if !self.exec.it_defined {
            self.regs.advance_it();
        }

        self.cycles += 1;
        for observer in observers {
            observer.on_step_end(1);
        }
        if let Some(vector) = self.returned_from.take() {
            for observer in observers {
                observer.on_exception_return(vector);
            }
        }

        self.poll_exceptions(bus, observers);
        Ok(())
    }

    fn set_pc(&mut self, val: u32) {
        self.regs.pc = val & !1;
    }

    fn get_pc(&self) -> u32 {
        self.regs.pc
    }

    fn set_sp(&mut self, val: u32) {
        self.regs.write_reg(SP, val);
    }

    fn set_exception_pending(&mut self, exception_num: u32) {
        self.throw(exception_num);
    }

    fn take_halt_request(&mut self) -> Option<u32> {
        self.halt_request.take()
    }

    fn get_register(&self, id: u8) -> u32 {
        match id {
            0..=14 => self.regs.read_reg(id as usize),
            15 => self.regs.pc,
            XPSR_ID => self.regs.xpsr(),
            MSP_ID => self.regs.msp,
            PSP_ID => self.regs.psp,
            PRIMASK_ID => self.regs.primask as u32,
            BASEPRI_ID => self.regs.basepri as u32,
            FAULTMASK_ID => self.regs.faultmask as u32,
            CONTROL_ID => self.regs.control.bits(),
            _ => 0,
        }
    }

    fn set_register(&mut self, id: u8, val: u32) {
        match id {
            0..=14 => self.regs.write_reg(id as usize, val),
            15 => self.set_pc(val),
            XPSR_ID => self.regs.set_xpsr(val),
            MSP_ID => self.regs.msp = val & !3,
            PSP_ID => self.regs.psp = val & !3,
            PRIMASK_ID => self.regs.primask = val & 1 != 0,
            BASEPRI_ID => self.regs.basepri = val as u8,
            FAULTMASK_ID => self.regs.faultmask = val & 1 != 0,
            CONTROL_ID => {
                self.regs.control = crate::cpu::registers::Control::from_bits_truncate(val);
                self.regs.select_stack(self.exec.mode);
            }
            _ => {}
        }
    }

    fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            registers: (0..13)
                .map(|n| self.regs.read_reg(n))
                .chain([self.regs.sp(), self.regs.lr, self.regs.pc])
                .collect(),
            xpsr: self.regs.xpsr(),
            msp: self.regs.msp,
            psp: self.regs.psp,
            primask: self.regs.primask,
            faultmask: self.regs.faultmask,
            basepri: self.regs.basepri,
            control: self.regs.control.bits(),
            mode: self.exec.mode,
            active: self.exec.active.iter().copied().collect(),
            vtor: self.nvic.state.vtor(),
        }
    }

    fn apply_snapshot(&mut self, s: &CpuSnapshot) {
        self.regs.msp = s.msp;
        self.regs.psp = s.psp;
        self.regs.primask = s.primask;
        self.regs.faultmask = s.faultmask;
        self.regs.basepri = s.basepri;
        self.regs.control = crate::cpu::registers::Control::from_bits_truncate(s.control);
        self.exec.mode = s.mode;
        self.regs.select_stack(s.mode);
        if s.registers.len() >= 16 {
            for (n, value) in s.registers.iter().take(13).enumerate() {
                self.regs.write_reg(n, *value);
            }
            self.regs.write_reg(SP, s.registers[SP]);
            self.regs.lr = s.registers[LR];
            self.regs.pc = s.registers[PC];
        }
        self.regs.set_xpsr(s.xpsr);
        self.nvic.restore_active(&s.active);
        self.exec.active = s.active.iter().copied().collect();
        self.nvic
            .state
            .vtor
            .store(s.vtor, std::sync::atomic::Ordering::SeqCst);
    }

    fn get_register_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for i in 0..13 {
            names.push(format!("R{}", i));
        }
        for name in [
            "SP", "LR", "PC", "xPSR", "MSP", "PSP", "PRIMASK", "BASEPRI", "FAULTMASK", "CONTROL",
        ] {
            names.push(name.to_string());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SystemBus;

    fn core_at(bus: &mut SystemBus, code: &[u16]) -> CortexM {
        let mut cpu = CortexM::default();
        for (i, hw) in code.iter().enumerate() {
            bus.write_u16(0x2000_0000 + i as u32 * 2, *hw).unwrap();
        }
        cpu.regs.pc = 0x2000_0000;
        cpu.regs.msp = 0x2000_8000;
        cpu
    }

    #[test]
    fn test_fetch_outside_memory_ends_program() {
        let mut bus = SystemBus::new();
        let mut cpu = CortexM::default();
        cpu.regs.pc = 0x6000_0000;
        assert!(matches!(
            cpu.step(&mut bus, &[]),
            Err(SimulationError::EndOfProgram(0x6000_0000))
        ));
    }

    #[test]
    fn test_pc_advances_by_encoding_length() {
        let mut bus = SystemBus::new();
        // MOVS R0, #1 ; MOV.W R1, #2
        let mut cpu = core_at(&mut bus, &[0x2001, 0xF04F, 0x0102]);
        cpu.step(&mut bus, &[]).unwrap();
        assert_eq!(cpu.regs.pc, 0x2000_0002);
        cpu.step(&mut bus, &[]).unwrap();
        assert_eq!(cpu.regs.pc, 0x2000_0006);
        assert_eq!(cpu.regs.r0, 1);
        assert_eq!(cpu.regs.r1, 2);
    }

    #[test]
    fn test_reset_reads_vector_table() {
        let mut bus = SystemBus::new();
        for (i, b) in 0x2000_4000u32
            .to_le_bytes()
            .iter()
            .chain(0x0000_0101u32.to_le_bytes().iter())
            .enumerate()
        {
            bus.poke_u8(i as u32, *b).unwrap();
        }
        let mut cpu = CortexM::default();
        cpu.reset(&mut bus).unwrap();
        assert_eq!(cpu.regs.msp, 0x2000_4000);
        assert_eq!(cpu.regs.pc, 0x100);
        assert!(cpu.regs.thumb);
        assert_eq!(cpu.exec.mode, Mode::Thread);
    }

    #[test]
    fn test_aligned_access_rejects_misalignment() {
        let mut bus = SystemBus::new();
        let cpu = CortexM::default();
        assert!(matches!(
            cpu.read_mem_a(&bus, 0x2000_0002, 4),
            Err(SimulationError::UnalignedAccess { addr: 0x2000_0002, size: 4 })
        ));
        cpu.write_mem_a(&mut bus, 0x2000_0004, 7, 4).unwrap();
        assert_eq!(cpu.read_mem_a(&bus, 0x2000_0004, 4).unwrap(), 7);
    }

    #[test]
    fn test_bx_to_even_address_faults() {
        let mut bus = SystemBus::new();
        let mut cpu = CortexM::default();
        cpu.bx_write_pc(&mut bus, 0x2000_0100).unwrap();
        assert!(!cpu.regs.thumb);
        assert_eq!(cpu.regs.pc, 0x2000_0100);
    }
}
