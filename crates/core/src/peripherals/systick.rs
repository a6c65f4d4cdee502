// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimResult;
use std::cell::Cell;

pub const SYSTICK_BASE: u32 = 0xE000_E010;
pub const SYSTICK_SIZE: u32 = 0x10;
pub const SYSTICK_VECTOR: u32 = 15;

const CSR_ENABLE: u32 = 1 << 0;
const CSR_TICKINT: u32 = 1 << 1;
const CSR_CLKSOURCE: u32 = 1 << 2;
const CSR_COUNTFLAG: u32 = 1 << 16;

/// SysTick timer, counted in simulated instructions.
/// Standard address: 0xE000_E010
#[derive(Debug, Default, serde::Serialize)]
pub struct Systick {
    /// COUNTFLAG clears on read, hence the cell.
    csr: Cell<u32>,
    rvr: u32,
    cvr: u32,
    calib: u32,
}

impl Systick {
    pub fn new() -> Self {
        Self {
            csr: Cell::new(CSR_CLKSOURCE),
            rvr: 0,
            cvr: 0,
            calib: 0x4000_0000, // No reference clock, no skew
        }
    }

    fn read_reg(&self, offset: u32) -> u32 {
        match offset {
            0x00 => self.csr.get(),
            0x04 => self.rvr,
            0x08 => self.cvr,
            0x0C => self.calib,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        match offset {
            0x00 => {
                let flag = self.csr.get() & CSR_COUNTFLAG;
                self.csr.set(flag | (value & 0x7) | CSR_CLKSOURCE);
            }
            0x04 => {
                self.rvr = value & 0x00FF_FFFF;
            }
            0x08 => {
                self.cvr = 0;
                self.csr.set(self.csr.get() & !CSR_COUNTFLAG);
            }
            _ => {}
        }
    }
}

impl crate::Peripheral for Systick {
    fn read(&self, offset: u32) -> SimResult<u8> {
        let reg_offset = offset & !3;
        let byte_offset = offset % 4;
        let reg_val = self.read_reg(reg_offset);
        if reg_offset == 0x00 && byte_offset == 2 {
            self.csr.set(self.csr.get() & !CSR_COUNTFLAG);
        }
        Ok(((reg_val >> (byte_offset * 8)) & 0xFF) as u8)
    }

    fn write(&mut self, offset: u32, value: u8) -> SimResult<()> {
        let reg_offset = offset & !3;
        let byte_offset = offset % 4;
        let mut reg_val = self.read_reg(reg_offset);

        // Modify byte
        let mask = 0xFF << (byte_offset * 8);
        reg_val &= !mask;
        reg_val |= (value as u32) << (byte_offset * 8);

        self.write_reg(reg_offset, reg_val);
        Ok(())
    }

    fn tick(&mut self) -> crate::PeripheralTickResult {
        if self.csr.get() & CSR_ENABLE == 0 {
            return crate::PeripheralTickResult::default();
        }

        if self.cvr == 0 {
            self.cvr = self.rvr;
            return crate::PeripheralTickResult {
                irq: false,
                cycles: 1,
            };
        }

        self.cvr -= 1;
        if self.cvr == 0 {
            self.csr.set(self.csr.get() | CSR_COUNTFLAG);
            crate::PeripheralTickResult {
                irq: self.csr.get() & CSR_TICKINT != 0,
                cycles: 1,
            }
        } else {
            crate::PeripheralTickResult {
                irq: false,
                cycles: 1,
            }
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn restore(&mut self, state: serde_json::Value) -> SimResult<()> {
        let field = |name: &str| state.get(name).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        self.csr.set(field("csr"));
        self.rvr = field("rvr");
        self.cvr = field("cvr");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Peripheral;

    fn write_word(st: &mut Systick, offset: u32, value: u32) {
        for i in 0..4 {
            st.write(offset + i, (value >> (i * 8)) as u8).unwrap();
        }
    }

    #[test]
    fn test_fires_every_reload_plus_one_ticks() {
        let mut st = Systick::new();
        write_word(&mut st, 0x04, 3);
        write_word(&mut st, 0x00, CSR_ENABLE | CSR_TICKINT);

        let fired: Vec<bool> = (0..8).map(|_| st.tick().irq).collect();
        // reload, 2, 1, 0 (fire), reload, 2, 1, 0 (fire)
        assert_eq!(
            fired,
            vec![false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn test_countflag_clears_on_read() {
        let mut st = Systick::new();
        write_word(&mut st, 0x04, 1);
        write_word(&mut st, 0x00, CSR_ENABLE);
        st.tick();
        let res = st.tick();
        assert!(!res.irq, "TICKINT disabled");
        assert_eq!(st.read(0x02).unwrap() & 0x01, 0x01);
        assert_eq!(st.read(0x02).unwrap() & 0x01, 0x00);
    }

    #[test]
    fn test_disabled_timer_is_idle() {
        let mut st = Systick::new();
        write_word(&mut st, 0x04, 1);
        assert_eq!(st.tick().cycles, 0);
        assert_eq!(st.read(0x08).unwrap(), 0);
    }
}
