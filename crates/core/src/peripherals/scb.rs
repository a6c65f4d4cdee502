// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::peripherals::nvic::{
    NvicState, ICSR_NMIPENDSET, ICSR_PENDSTCLR, ICSR_PENDSTSET, ICSR_PENDSVCLR, ICSR_PENDSVSET,
};
use crate::SimResult;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub const SCB_BASE: u32 = 0xE000_ED00;
/// Covers CPUID..AFSR plus STIR at 0xE000_EF00.
pub const SCB_SIZE: u32 = 0x204;

const AIRCR_VECTKEY: u32 = 0x05FA;
const STIR_OFFSET: u32 = 0x200;

/// System Control Block (SCB) and the software trigger register.
#[derive(Debug, serde::Serialize)]
pub struct Scb {
    pub cpuid: u32,
    pub scr: u32,
    pub cfsr: u32,
    pub hfsr: u32,
    /// Bytes of the AIRCR word being written; applied once the key byte lands.
    aircr_latch: u32,
    #[serde(skip)]
    pub state: Arc<NvicState>,
}

impl Scb {
    pub fn new(state: Arc<NvicState>) -> Self {
        Self {
            cpuid: 0x412F_C231, // Cortex-M3 r2p1
            scr: 0,
            cfsr: 0,
            hfsr: 0,
            aircr_latch: 0,
            state,
        }
    }

    fn icsr(&self) -> u32 {
        let requests = self.state.icsr_requests.load(Ordering::SeqCst);
        let mut icsr = self.state.vect_active.load(Ordering::SeqCst) & 0x1FF;
        if requests & ICSR_PENDSVSET != 0 {
            icsr |= ICSR_PENDSVSET;
        }
        if requests & ICSR_PENDSTSET != 0 {
            icsr |= ICSR_PENDSTSET;
        }
        if requests & ICSR_NMIPENDSET != 0 {
            icsr |= ICSR_NMIPENDSET;
        }
        icsr
    }

    fn shcsr(&self) -> u32 {
        let active = self.state.system_active.load(Ordering::SeqCst);
        // MEMFAULTACT, BUSFAULTACT, USGFAULTACT, SVCALLACT, MONITORACT, PENDSVACT, SYSTICKACT
        let act_bits = [(4, 0), (5, 1), (6, 3), (11, 7), (12, 8), (14, 10), (15, 11)];
        let mut value = self.state.shcsr.load(Ordering::SeqCst) & 0x0007_0000;
        for (vector, bit) in act_bits {
            if active & (1 << vector) != 0 {
                value |= 1 << bit;
            }
        }
        value
    }

    fn read_reg(&self, offset: u32) -> u32 {
        match offset {
            0x00 => self.cpuid,
            0x04 => self.icsr(),
            0x08 => self.state.vtor(),
            0x0C => (0xFA05 << 16) | (self.state.aircr.load(Ordering::SeqCst) & 0x700),
            0x10 => self.scr,
            0x14 => self.state.ccr(),
            0x18..=0x20 => self.state.shpr[((offset - 0x18) / 4) as usize].load(Ordering::SeqCst),
            0x24 => self.shcsr(),
            0x28 => self.cfsr,
            0x2C => self.hfsr,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        match offset {
            0x08 => self.state.vtor.store(value & !0x7F, Ordering::SeqCst),
            0x0C => {
                if value >> 16 == AIRCR_VECTKEY {
                    self.state.set_prigroup((value >> 8) & 0x7);
                } else {
                    tracing::debug!("AIRCR write without VECTKEY ignored: {:#x}", value);
                }
            }
            0x10 => self.scr = value & 0x16,
            0x14 => self.state.ccr.store(value & 0x31B, Ordering::SeqCst),
            0x18..=0x20 => {
                // SHPR1 byte 0 belongs to MemManage; reserved bytes read as zero
                self.state.shpr[((offset - 0x18) / 4) as usize].store(value, Ordering::SeqCst)
            }
            0x24 => self
                .state
                .shcsr
                .store(value & 0x0007_0000, Ordering::SeqCst),
            // write-one-to-clear status
            0x28 => self.cfsr &= !value,
            0x2C => self.hfsr &= !value,
            _ => {}
        }
    }

    fn write_icsr_byte(&mut self, byte_offset: u32, value: u8) {
        let bits = (value as u32) << (byte_offset * 8);
        let requests = &self.state.icsr_requests;
        for (set, clear) in [(ICSR_PENDSVSET, ICSR_PENDSVCLR), (ICSR_PENDSTSET, ICSR_PENDSTCLR)] {
            if bits & set != 0 {
                requests.fetch_and(!clear, Ordering::SeqCst);
                requests.fetch_or(set, Ordering::SeqCst);
            } else if bits & clear != 0 {
                requests.fetch_and(!set, Ordering::SeqCst);
                requests.fetch_or(clear, Ordering::SeqCst);
            }
        }
        if bits & ICSR_NMIPENDSET != 0 {
            requests.fetch_or(ICSR_NMIPENDSET, Ordering::SeqCst);
        }
    }
}

impl crate::Peripheral for Scb {
    fn read(&self, offset: u32) -> SimResult<u8> {
        let reg_offset = offset & !3;
        let byte_offset = offset % 4;
        let reg_val = self.read_reg(reg_offset);
        Ok(((reg_val >> (byte_offset * 8)) & 0xFF) as u8)
    }

    fn write(&mut self, offset: u32, value: u8) -> SimResult<()> {
        let reg_offset = offset & !3;
        let byte_offset = offset % 4;

        match reg_offset {
            0x04 => self.write_icsr_byte(byte_offset, value),
            STIR_OFFSET => {
                if byte_offset == 0 {
                    self.state.set_pending(16 + value as u32);
                }
            }
            _ => {
                let mut reg_val = self.read_reg(reg_offset);
                let mask = 0xFF << (byte_offset * 8);
                reg_val &= !mask;
                reg_val |= (value as u32) << (byte_offset * 8);
                if reg_offset == 0x0C {
                    self.aircr_latch = (self.aircr_latch & !mask) | (value as u32) << (byte_offset * 8);
                    if byte_offset == 3 {
                        self.write_reg(reg_offset, self.aircr_latch);
                    }
                    return Ok(());
                }
                self.write_reg(reg_offset, reg_val);
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.insert("vtor".to_string(), self.state.vtor().into());
            obj.insert("icsr".to_string(), self.icsr().into());
            obj.insert("shcsr".to_string(), self.shcsr().into());
        }
        value
    }
}
