// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Peripheral, SimResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const NVIC_BASE: u32 = 0xE000_E100;
pub const NVIC_SIZE: u32 = 0x400;

/// ICSR set-pending request bits.
pub const ICSR_NMIPENDSET: u32 = 1 << 31;
pub const ICSR_PENDSVSET: u32 = 1 << 28;
pub const ICSR_PENDSVCLR: u32 = 1 << 27;
pub const ICSR_PENDSTSET: u32 = 1 << 26;
pub const ICSR_PENDSTCLR: u32 = 1 << 25;

/// SHCSR enable bits for the configurable faults.
pub const SHCSR_MEMFAULTENA: u32 = 1 << 16;
pub const SHCSR_BUSFAULTENA: u32 = 1 << 17;
pub const SHCSR_USGFAULTENA: u32 = 1 << 18;

/// CCR trap enables.
pub const CCR_UNALIGN_TRP: u32 = 1 << 3;
pub const CCR_DIV_0_TRP: u32 = 1 << 4;
pub const CCR_STKALIGN: u32 = 1 << 9;

/// System Control Space state shared between the bus-visible register blocks
/// and the core's exception controller.
#[derive(Debug)]
pub struct NvicState {
    pub iser: [AtomicU32; 8],
    pub ispr: [AtomicU32; 8],
    pub iabr: [AtomicU32; 8],
    /// IRQ priority bytes, four per word.
    pub ipr: [AtomicU32; 60],
    /// SHPR1..SHPR3: priority bytes of exceptions 4..15.
    pub shpr: [AtomicU32; 3],
    pub shcsr: AtomicU32,
    /// Pending ICSR set/clear requests not yet seen by the core.
    pub icsr_requests: AtomicU32,
    /// Active bitmap of exceptions 0..31, mirrored for SHCSR/ICSR reads.
    pub system_active: AtomicU32,
    pub vect_active: AtomicU32,
    pub aircr: AtomicU32,
    pub ccr: AtomicU32,
    pub vtor: AtomicU32,
}

impl Default for NvicState {
    fn default() -> Self {
        Self {
            iser: std::array::from_fn(|_| AtomicU32::new(0)),
            ispr: std::array::from_fn(|_| AtomicU32::new(0)),
            iabr: std::array::from_fn(|_| AtomicU32::new(0)),
            ipr: std::array::from_fn(|_| AtomicU32::new(0)),
            shpr: std::array::from_fn(|_| AtomicU32::new(0)),
            shcsr: AtomicU32::new(0),
            icsr_requests: AtomicU32::new(0),
            system_active: AtomicU32::new(0),
            vect_active: AtomicU32::new(0),
            aircr: AtomicU32::new(0),
            ccr: AtomicU32::new(CCR_STKALIGN),
            vtor: AtomicU32::new(0),
        }
    }
}

fn irq_slot(vector: u32) -> Option<(usize, u32)> {
    if vector < 16 {
        return None;
    }
    let irq = vector - 16;
    let idx = (irq / 32) as usize;
    (idx < 8).then_some((idx, 1 << (irq % 32)))
}

impl NvicState {
    pub fn prigroup(&self) -> u32 {
        (self.aircr.load(Ordering::SeqCst) >> 8) & 0x7
    }

    pub fn set_prigroup(&self, prigroup: u32) {
        let aircr = self.aircr.load(Ordering::SeqCst) & !(0x7 << 8);
        self.aircr
            .store(aircr | ((prigroup & 0x7) << 8), Ordering::SeqCst);
    }

    pub fn vtor(&self) -> u32 {
        self.vtor.load(Ordering::SeqCst)
    }

    /// Programmable priority byte for exceptions 4 and up.
    pub fn priority(&self, vector: u32) -> u8 {
        let (word, byte) = if (4..16).contains(&vector) {
            (&self.shpr[((vector - 4) / 4) as usize], (vector % 4) * 8)
        } else if vector >= 16 && vector < 16 + 240 {
            let irq = vector - 16;
            (&self.ipr[(irq / 4) as usize], (irq % 4) * 8)
        } else {
            return 0;
        };
        ((word.load(Ordering::SeqCst) >> byte) & 0xFF) as u8
    }

    pub fn set_priority(&self, vector: u32, priority: u8) {
        let (word, byte) = if (4..16).contains(&vector) {
            (&self.shpr[((vector - 4) / 4) as usize], (vector % 4) * 8)
        } else if vector >= 16 && vector < 16 + 240 {
            let irq = vector - 16;
            (&self.ipr[(irq / 4) as usize], (irq % 4) * 8)
        } else {
            return;
        };
        let current = word.load(Ordering::SeqCst) & !(0xFF << byte);
        word.store(current | ((priority as u32) << byte), Ordering::SeqCst);
    }

    pub fn is_enabled(&self, vector: u32) -> bool {
        match irq_slot(vector) {
            Some((idx, bit)) => self.iser[idx].load(Ordering::SeqCst) & bit != 0,
            None => vector < 16,
        }
    }

    pub fn enable(&self, vector: u32) {
        if let Some((idx, bit)) = irq_slot(vector) {
            self.iser[idx].fetch_or(bit, Ordering::SeqCst);
        }
    }

    pub fn is_pending(&self, vector: u32) -> bool {
        irq_slot(vector)
            .map(|(idx, bit)| self.ispr[idx].load(Ordering::SeqCst) & bit != 0)
            .unwrap_or(false)
    }

    pub fn set_pending(&self, vector: u32) {
        if let Some((idx, bit)) = irq_slot(vector) {
            self.ispr[idx].fetch_or(bit, Ordering::SeqCst);
        }
    }

    pub fn clear_pending(&self, vector: u32) {
        if let Some((idx, bit)) = irq_slot(vector) {
            self.ispr[idx].fetch_and(!bit, Ordering::SeqCst);
        }
    }

    /// Mirror an activation change into IABR or the system-exception bitmap.
    pub fn set_active(&self, vector: u32, active: bool) {
        if let Some((idx, bit)) = irq_slot(vector) {
            if active {
                self.iabr[idx].fetch_or(bit, Ordering::SeqCst);
            } else {
                self.iabr[idx].fetch_and(!bit, Ordering::SeqCst);
            }
        } else if vector < 32 {
            if active {
                self.system_active.fetch_or(1 << vector, Ordering::SeqCst);
            } else {
                self.system_active.fetch_and(!(1 << vector), Ordering::SeqCst);
            }
        }
    }

    /// Enabled and pending IRQ vectors, lowest first.
    pub fn enabled_pending(&self) -> Vec<u32> {
        let mut vectors = Vec::new();
        for idx in 0..8 {
            let mask = self.iser[idx].load(Ordering::SeqCst) & self.ispr[idx].load(Ordering::SeqCst);
            for bit in 0..32 {
                if mask & (1 << bit) != 0 {
                    vectors.push(16 + idx as u32 * 32 + bit);
                }
            }
        }
        vectors
    }

    pub fn take_icsr_requests(&self) -> u32 {
        self.icsr_requests.swap(0, Ordering::SeqCst)
    }

    pub fn fault_enabled(&self, vector: u32) -> bool {
        let bit = match vector {
            4 => SHCSR_MEMFAULTENA,
            5 => SHCSR_BUSFAULTENA,
            6 => SHCSR_USGFAULTENA,
            _ => return true,
        };
        self.shcsr.load(Ordering::SeqCst) & bit != 0
    }

    pub fn ccr(&self) -> u32 {
        self.ccr.load(Ordering::SeqCst)
    }
}

/// NVIC register block at 0xE000_E100: ISER, ICER, ISPR, ICPR, IABR, IPR.
#[derive(Debug, Clone)]
pub struct NvicRegisters {
    pub state: Arc<NvicState>,
}

impl NvicRegisters {
    pub fn new(state: Arc<NvicState>) -> Self {
        Self { state }
    }

    fn read_reg(&self, offset: u32) -> u32 {
        let idx = ((offset & 0x7F) / 4) as usize;
        match offset {
            0x000..=0x01F | 0x080..=0x09F => self.state.iser[idx].load(Ordering::SeqCst),
            0x100..=0x11F | 0x180..=0x19F => self.state.ispr[idx].load(Ordering::SeqCst),
            0x200..=0x21F => self.state.iabr[idx].load(Ordering::SeqCst),
            0x300..=0x3EF => self.state.ipr[((offset - 0x300) / 4) as usize].load(Ordering::SeqCst),
            _ => 0,
        }
    }
}

impl Peripheral for NvicRegisters {
    fn read(&self, offset: u32) -> SimResult<u8> {
        let reg_val = self.read_reg(offset & !3);
        Ok(((reg_val >> ((offset % 4) * 8)) & 0xFF) as u8)
    }

    fn write(&mut self, offset: u32, value: u8) -> SimResult<()> {
        let reg_offset = offset & !3;
        let idx = ((reg_offset & 0x7F) / 4) as usize;
        let shift = (offset % 4) * 8;
        let mask = (value as u32) << shift;

        match reg_offset {
            // Writing 1 sets the enable bit
            0x000..=0x01F => {
                self.state.iser[idx].fetch_or(mask, Ordering::SeqCst);
            }
            // Writing 1 clears the enable bit
            0x080..=0x09F => {
                self.state.iser[idx].fetch_and(!mask, Ordering::SeqCst);
            }
            0x100..=0x11F => {
                self.state.ispr[idx].fetch_or(mask, Ordering::SeqCst);
            }
            0x180..=0x19F => {
                self.state.ispr[idx].fetch_and(!mask, Ordering::SeqCst);
            }
            0x300..=0x3EF => {
                let vector = 16 + (offset - 0x300);
                self.state.set_priority(vector, value);
            }
            _ => {}
        }
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        let load = |words: &[AtomicU32]| -> Vec<u32> {
            words.iter().map(|a| a.load(Ordering::Relaxed)).collect()
        };
        serde_json::json!({
            "iser": load(&self.state.iser),
            "ispr": load(&self.state.ispr),
            "iabr": load(&self.state.iabr),
            "ipr": load(&self.state.ipr),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear_enable() {
        let state = Arc::new(NvicState::default());
        let mut regs = NvicRegisters::new(state.clone());

        // ISER0 byte 0, IRQ 3 -> vector 19
        regs.write(0x000, 0x08).unwrap();
        assert!(state.is_enabled(19));
        assert_eq!(regs.read(0x000).unwrap(), 0x08);

        // ICER0 clears it again
        regs.write(0x080, 0x08).unwrap();
        assert!(!state.is_enabled(19));
    }

    #[test]
    fn test_pending_roundtrip_through_registers() {
        let state = Arc::new(NvicState::default());
        let mut regs = NvicRegisters::new(state.clone());

        // ISPR1 bit 0 -> IRQ 32 -> vector 48
        regs.write(0x104, 0x01).unwrap();
        assert!(state.is_pending(48));
        state.enable(48);
        assert_eq!(state.enabled_pending(), vec![48]);

        regs.write(0x184, 0x01).unwrap();
        assert!(!state.is_pending(48));
        assert!(state.enabled_pending().is_empty());
    }

    #[test]
    fn test_ipr_bytes_map_to_irqs() {
        let state = Arc::new(NvicState::default());
        let mut regs = NvicRegisters::new(state.clone());

        regs.write(0x305, 0xA0).unwrap();
        assert_eq!(state.priority(16 + 5), 0xA0);
        assert_eq!(regs.read(0x305).unwrap(), 0xA0);
        assert_eq!(state.priority(16 + 4), 0);
    }

    #[test]
    fn test_system_handler_priorities() {
        let state = NvicState::default();
        state.set_priority(15, 0x40); // SysTick: SHPR3 byte 3
        state.set_priority(11, 0x80); // SVCall: SHPR2 byte 3
        assert_eq!(state.priority(15), 0x40);
        assert_eq!(state.priority(11), 0x80);
        assert_eq!(state.shpr[2].load(Ordering::SeqCst), 0x4000_0000);
        assert_eq!(state.shpr[1].load(Ordering::SeqCst), 0x8000_0000);
    }
}
