// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! System and control instructions: hints, barriers, IT, special registers
//! and the exception-raising encodings.

use super::{bit, bits};
use crate::cpu::registers::{Control, Mode};
use crate::cpu::CortexM;
use crate::decoder::Executor;
use crate::nvic::{SVCALL, USAGE_FAULT};
use crate::{Bus, SimResult};

/// Unallocated or UNPREDICTABLE encodings run as a no-op.
pub fn unpredictable(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    tracing::warn!(
        "Unpredictable instruction {:#x} at {:#x} ignored",
        op,
        cpu.regs.instr_addr
    );
    Ok(())
}

/// NOP, YIELD, WFE, WFI, SEV, PLD, PLI and the barriers.
pub fn nop(_cpu: &mut CortexM, _bus: &mut dyn Bus, _op: u32) -> SimResult<()> {
    Ok(())
}

/// IT{x{y{z}}} <firstcond>
pub fn it(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    cpu.regs.it_state = bits(op, 7, 0) as u8;
    cpu.exec.it_defined = true;
    Ok(())
}

/// IT when the mask is non-zero, a hint otherwise.
pub fn decode_it_hint(op: u32) -> Executor {
    if bits(op, 3, 0) != 0 {
        it
    } else {
        nop
    }
}

/// CPSIE/CPSID {i, f}
pub fn cps(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    if !cpu.is_privileged() {
        return Ok(());
    }
    let disable = bit(op, 4);
    if bit(op, 1) {
        cpu.regs.primask = disable;
    }
    if bit(op, 0) && (!disable || cpu.execution_priority() > -1) {
        cpu.regs.faultmask = disable;
    }
    Ok(())
}

/// BKPT #imm8: halt on this instruction. The debugger steps over it.
pub fn bkpt(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let addr = cpu.regs.instr_addr;
    tracing::debug!("BKPT #{} at {:#x}", bits(op, 7, 0), addr);
    cpu.request_halt(addr);
    cpu.regs.pc = addr;
    Ok(())
}

pub fn svc(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    tracing::debug!("SVC #{}", bits(op, 7, 0));
    cpu.throw(SVCALL);
    Ok(())
}

/// UDF #imm8
pub fn udf16(cpu: &mut CortexM, _bus: &mut dyn Bus, _op: u32) -> SimResult<()> {
    cpu.throw(USAGE_FAULT);
    Ok(())
}

/// UDF.W #imm16, and permanently undefined 32-bit space.
pub fn udf_w(cpu: &mut CortexM, _bus: &mut dyn Bus, _op: u32) -> SimResult<()> {
    cpu.throw(USAGE_FAULT);
    Ok(())
}

// SYSm encodings
const SYSM_MSP: u32 = 8;
const SYSM_PSP: u32 = 9;
const SYSM_PRIMASK: u32 = 16;
const SYSM_BASEPRI: u32 = 17;
const SYSM_BASEPRI_MAX: u32 = 18;
const SYSM_FAULTMASK: u32 = 19;
const SYSM_CONTROL: u32 = 20;

/// MRS Rd, <spec_reg>
pub fn mrs(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let sysm = bits(op, 7, 0);
    let privileged = cpu.is_privileged();
    let regs = &cpu.regs;
    let value = match sysm {
        0..=7 => {
            let mut value = 0;
            if sysm & 0b100 == 0 {
                value |= regs.apsr();
            }
            if sysm & 0b001 != 0 {
                value |= regs.ipsr & 0x1FF;
            }
            // EPSR reads as zero
            value
        }
        SYSM_MSP if privileged => regs.msp,
        SYSM_PSP if privileged => regs.psp,
        SYSM_PRIMASK => regs.primask as u32,
        SYSM_BASEPRI | SYSM_BASEPRI_MAX => regs.basepri as u32,
        SYSM_FAULTMASK => regs.faultmask as u32,
        SYSM_CONTROL => regs.control.bits(),
        _ => 0,
    };
    cpu.write_reg(bits(op, 11, 8), value);
    Ok(())
}

/// MSR <spec_reg>, Rn
pub fn msr(cpu: &mut CortexM, _bus: &mut dyn Bus, op: u32) -> SimResult<()> {
    let value = cpu.read_reg(bits(op, 19, 16));
    let sysm = bits(op, 7, 0);
    let mask = bits(op, 11, 10);

    if sysm <= 7 {
        if sysm & 0b100 == 0 {
            let apsr = cpu.regs.apsr();
            let mut merged = apsr;
            if mask & 0b10 != 0 {
                merged = (merged & !0xF800_0000) | (value & 0xF800_0000);
            }
            if mask & 0b01 != 0 {
                merged = (merged & !0x000F_0000) | (value & 0x000F_0000);
            }
            cpu.regs.set_apsr(merged);
        }
        return Ok(());
    }
    if !cpu.is_privileged() {
        return Ok(());
    }

    match sysm {
        SYSM_MSP => cpu.regs.msp = value & !3,
        SYSM_PSP => cpu.regs.psp = value & !3,
        SYSM_PRIMASK => cpu.regs.primask = value & 1 != 0,
        SYSM_BASEPRI => cpu.regs.basepri = value as u8,
        SYSM_BASEPRI_MAX => {
            let new = value as u8;
            if new != 0 && (cpu.regs.basepri == 0 || new < cpu.regs.basepri) {
                cpu.regs.basepri = new;
            }
        }
        SYSM_FAULTMASK => {
            if cpu.execution_priority() > -1 {
                cpu.regs.faultmask = value & 1 != 0;
            }
        }
        SYSM_CONTROL => {
            let requested = Control::from_bits_truncate(value);
            cpu.regs
                .control
                .set(Control::NPRIV, requested.contains(Control::NPRIV));
            if cpu.exec.mode == Mode::Thread {
                cpu.regs
                    .control
                    .set(Control::SPSEL, requested.contains(Control::SPSEL));
                cpu.regs.select_stack(Mode::Thread);
            }
        }
        _ => tracing::warn!("MSR to unknown special register {}", sysm),
    }
    Ok(())
}

pub fn clrex(cpu: &mut CortexM, _bus: &mut dyn Bus, _op: u32) -> SimResult<()> {
    cpu.exclusive.clear_exclusive_local();
    Ok(())
}

/// CLREX, DSB, DMB, ISB on second halfword bits [7:4].
pub fn decode_misc_control(op: u32) -> Executor {
    match bits(op, 7, 4) {
        0b0010 => clrex,
        // DSB, DMB, ISB: no memory reordering to order
        0b0100..=0b0110 => nop,
        _ => unpredictable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SystemBus;
    use crate::cpu::registers::StackBank;

    #[test]
    fn test_mrs_msr_primask_and_control() {
        let mut bus = SystemBus::new();
        let mut cpu = CortexM::default();
        cpu.regs.r0 = 1;
        // MSR PRIMASK, R0
        msr(&mut cpu, &mut bus, 0xF380_8810).unwrap();
        assert!(cpu.regs.primask);
        // MRS R1, PRIMASK
        mrs(&mut cpu, &mut bus, 0xF3EF_8110).unwrap();
        assert_eq!(cpu.regs.r1, 1);

        cpu.regs.msp = 0x2000_1000;
        cpu.regs.psp = 0x2000_0800;
        cpu.regs.r0 = 2;
        // MSR CONTROL, R0: switch thread mode to PSP
        msr(&mut cpu, &mut bus, 0xF380_8814).unwrap();
        assert_eq!(cpu.regs.bank, StackBank::Process);
        assert_eq!(cpu.regs.sp(), 0x2000_0800);
    }

    #[test]
    fn test_unprivileged_msr_is_ignored() {
        let mut bus = SystemBus::new();
        let mut cpu = CortexM::default();
        cpu.regs.control.insert(Control::NPRIV);
        cpu.regs.r0 = 1;
        msr(&mut cpu, &mut bus, 0xF380_8810).unwrap();
        assert!(!cpu.regs.primask);
    }

    #[test]
    fn test_basepri_max_only_raises() {
        let mut bus = SystemBus::new();
        let mut cpu = CortexM::default();
        cpu.regs.basepri = 0x40;
        cpu.regs.r0 = 0x80;
        // MSR BASEPRI_MAX, R0
        msr(&mut cpu, &mut bus, 0xF380_8812).unwrap();
        assert_eq!(cpu.regs.basepri, 0x40);
        cpu.regs.r0 = 0x20;
        msr(&mut cpu, &mut bus, 0xF380_8812).unwrap();
        assert_eq!(cpu.regs.basepri, 0x20);
    }

    #[test]
    fn test_cps_masks() {
        let mut bus = SystemBus::new();
        let mut cpu = CortexM::default();
        // CPSID i
        cps(&mut cpu, &mut bus, 0xB672).unwrap();
        assert!(cpu.regs.primask);
        // CPSIE i
        cps(&mut cpu, &mut bus, 0xB662).unwrap();
        assert!(!cpu.regs.primask);
        // CPSID f
        cps(&mut cpu, &mut bus, 0xB671).unwrap();
        assert!(cpu.regs.faultmask);
    }

    #[test]
    fn test_it_records_state() {
        let mut bus = SystemBus::new();
        let mut cpu = CortexM::default();
        // ITE EQ
        let op = 0xBF0C;
        decode_it_hint(op)(&mut cpu, &mut bus, op).unwrap();
        assert_eq!(cpu.regs.it_state, 0x0C);
        assert!(cpu.exec.it_defined);
        // NOP hint leaves it alone
        cpu.regs.it_state = 0;
        decode_it_hint(0xBF00)(&mut cpu, &mut bus, 0xBF00).unwrap();
        assert_eq!(cpu.regs.it_state, 0);
    }
}
