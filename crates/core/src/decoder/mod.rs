// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Two-level Thumb/Thumb-2 dispatch tables.
//!
//! Each table is indexed by a contiguous opcode bit-field. A slot either names
//! the executor directly or holds a sub-decoder that inspects bits outside the
//! index to pick one.

pub mod thumb16;
pub mod thumb32;

use crate::cpu::CortexM;
use crate::{Bus, SimResult};
use std::sync::OnceLock;

/// Terminal executor. 16-bit opcodes arrive in the low halfword; 32-bit
/// opcodes arrive as `first_halfword << 16 | second_halfword`.
pub type Executor = fn(&mut CortexM, &mut dyn Bus, u32) -> SimResult<()>;

/// Chooses an executor from bits the owning table does not index on.
pub type SubDecoder = fn(u32) -> Executor;

#[derive(Clone, Copy)]
pub enum Slot {
    Execute(Executor),
    Decode(SubDecoder),
}

impl Slot {
    pub fn resolve(self, opcode: u32) -> Executor {
        match self {
            Slot::Execute(executor) => executor,
            Slot::Decode(decoder) => decoder(opcode),
        }
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Execute(_) => f.write_str("Execute"),
            Slot::Decode(_) => f.write_str("Decode"),
        }
    }
}

/// Lookup table over `bits` opcode bits starting at `shift`.
#[derive(Debug, Clone)]
pub struct Table {
    slots: Vec<Slot>,
    shift: u32,
    mask: u32,
}

impl Table {
    /// Every slot starts out as the unpredictable executor.
    pub fn new(bits: u32, shift: u32) -> Self {
        Self {
            slots: vec![Slot::Execute(crate::cpu::ops::misc::unpredictable); 1 << bits],
            shift,
            mask: (1 << bits) - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Fill every index matching `pattern`, written most significant bit first
    /// with `0`, `1` and `x` (don't care). Spaces are ignored.
    pub fn set(&mut self, pattern: &str, slot: Slot) {
        let bits: Vec<u8> = pattern.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        debug_assert_eq!(1usize << bits.len(), self.slots.len(), "pattern {pattern}");

        let mut fixed = 0usize;
        let mut care = 0usize;
        for &b in &bits {
            fixed <<= 1;
            care <<= 1;
            match b {
                b'0' => care |= 1,
                b'1' => {
                    care |= 1;
                    fixed |= 1;
                }
                _ => {}
            }
        }

        for (index, entry) in self.slots.iter_mut().enumerate() {
            if index & care == fixed {
                *entry = slot;
            }
        }
    }

    pub fn lookup(&self, opcode: u32) -> Slot {
        self.slots[((opcode >> self.shift) & self.mask) as usize]
    }

    pub fn resolve(&self, opcode: u32) -> Executor {
        self.lookup(opcode).resolve(opcode)
    }
}

/// All dispatch tables, built once per process.
#[derive(Debug)]
pub struct DecodeTables {
    /// bits [15:10]
    pub thumb16: Table,
    /// bits [13:9]
    pub shift_add_sub_mov_cmp: Table,
    /// bits [9:6]
    pub data_processing: Table,
    /// bits [9:6]
    pub special_bx: Table,
    /// bits [15:9]
    pub load_store: Table,
    /// bits [11:5]
    pub misc: Table,
    /// bits [11:8]
    pub cond_branch: Table,
    /// bits [28:20] of the combined word
    pub thumb32: Table,
}

static TABLES: OnceLock<DecodeTables> = OnceLock::new();

pub fn tables() -> &'static DecodeTables {
    TABLES.get_or_init(|| DecodeTables {
        thumb16: thumb16::build_base(),
        shift_add_sub_mov_cmp: thumb16::build_shift_add_sub_mov_cmp(),
        data_processing: thumb16::build_data_processing(),
        special_bx: thumb16::build_special_bx(),
        load_store: thumb16::build_load_store(),
        misc: thumb16::build_misc(),
        cond_branch: thumb16::build_cond_branch(),
        thumb32: thumb32::build(),
    })
}

/// A first halfword whose top five bits are 0b11101, 0b11110 or 0b11111
/// starts a 32-bit encoding.
pub fn is_16bit_code(first_halfword: u32) -> bool {
    !matches!((first_halfword >> 11) & 0x1F, 0b11101..=0b11111)
}

/// Resolved instruction ready to run.
#[derive(Clone, Copy)]
pub struct Instruction {
    pub opcode: u32,
    pub executor: Executor,
    /// 2 or 4 bytes.
    pub length: u32,
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instruction")
            .field("opcode", &format_args!("{:#x}", self.opcode))
            .field("length", &self.length)
            .finish()
    }
}

impl DecodeTables {
    pub fn decode_16(&self, opcode: u32) -> Executor {
        self.thumb16.resolve(opcode & 0xFFFF)
    }

    pub fn decode_32(&self, opcode: u32) -> Executor {
        self.thumb32.resolve(opcode)
    }

    /// `second` is only consulted for 32-bit encodings.
    pub fn decode(&self, first: u16, second: u16) -> Instruction {
        let first = first as u32;
        if is_16bit_code(first) {
            Instruction {
                opcode: first,
                executor: self.decode_16(first),
                length: 2,
            }
        } else {
            let opcode = (first << 16) | second as u32;
            Instruction {
                opcode,
                executor: self.decode_32(opcode),
                length: 4,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_16bit_code() {
        assert!(is_16bit_code(0x4770)); // BX LR
        assert!(is_16bit_code(0xE7FE)); // B .
        assert!(!is_16bit_code(0xE92D)); // PUSH.W
        assert!(!is_16bit_code(0xF000)); // BL prefix
        assert!(!is_16bit_code(0xF8D0)); // LDR.W
    }

    #[test]
    fn test_pattern_fill() {
        let mut table = Table::new(3, 0);
        table.set("1x0", Slot::Decode(|_| crate::cpu::ops::misc::nop as Executor));
        let decoded: Vec<bool> = (0..8)
            .map(|i| matches!(table.lookup(i), Slot::Decode(_)))
            .collect();
        assert_eq!(
            decoded,
            vec![false, false, false, false, true, false, true, false]
        );
    }
}
