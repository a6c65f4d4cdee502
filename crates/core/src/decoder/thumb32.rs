// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! 32-bit Thumb-2 table, indexed by first halfword bits [12:4]. Patterns
//! read as `op1 op2`: op1 is first halfword bits [12:11], op2 bits [10:4].

use super::{Executor, Slot, Table};
use crate::cpu::ops::data::{self, ADC, ADD, AND, BIC, EOR, ORN, ORR, RSB, SBC, SUB};
use crate::cpu::ops::{bit, branch, memory, misc, multiply};

use Slot::{Decode, Execute};

/// Plain-immediate slots with no instruction still hold branches when second
/// halfword bit 15 is set.
fn branch_or_unallocated(op: u32) -> Executor {
    if bit(op, 15) {
        branch::decode_branch_misc(op)
    } else {
        misc::unpredictable
    }
}

pub fn build() -> Table {
    let mut t = Table::new(9, 20);

    // Load/store multiple
    t.set("01 00 01 0 x 0", Execute(memory::stm_w));
    t.set("01 00 01 0 x 1", Decode(memory::decode_ldm));
    t.set("01 00 10 0 x 0", Decode(memory::decode_stmdb));
    t.set("01 00 10 0 x 1", Execute(memory::ldmdb_w));

    // Load/store dual or exclusive, table branch
    t.set("01 00 00 1 00", Execute(memory::strex));
    t.set("01 00 00 1 01", Execute(memory::ldrex));
    t.set("01 00 01 1 0x", Decode(memory::decode_exclusive_table_branch));
    t.set("01 00 0x 1 10", Execute(memory::strd));
    t.set("01 00 0x 1 11", Execute(memory::ldrd));
    t.set("01 00 1x 1 x0", Execute(memory::strd));
    t.set("01 00 1x 1 x1", Execute(memory::ldrd));

    // Data processing (shifted register)
    t.set("01 01 0000 x", Decode(data::decode_dp_reg::<AND>));
    t.set("01 01 0001 x", Decode(data::decode_dp_reg::<BIC>));
    t.set("01 01 0010 x", Decode(data::decode_dp_reg::<ORR>));
    t.set("01 01 0011 x", Decode(data::decode_dp_reg::<ORN>));
    t.set("01 01 0100 x", Decode(data::decode_dp_reg::<EOR>));
    t.set("01 01 1000 x", Decode(data::decode_dp_reg::<ADD>));
    t.set("01 01 1010 x", Decode(data::decode_dp_reg::<ADC>));
    t.set("01 01 1011 x", Decode(data::decode_dp_reg::<SBC>));
    t.set("01 01 1101 x", Decode(data::decode_dp_reg::<SUB>));
    t.set("01 01 1110 x", Decode(data::decode_dp_reg::<RSB>));

    // Data processing (modified immediate), branches and misc control
    t.set("10 xxxxxxx", Decode(branch_or_unallocated));
    t.set("10 x0 0000 x", Decode(data::decode_dp_imm::<AND>));
    t.set("10 x0 0001 x", Decode(data::decode_dp_imm::<BIC>));
    t.set("10 x0 0010 x", Decode(data::decode_dp_imm::<ORR>));
    t.set("10 x0 0011 x", Decode(data::decode_dp_imm::<ORN>));
    t.set("10 x0 0100 x", Decode(data::decode_dp_imm::<EOR>));
    t.set("10 x0 1000 x", Decode(data::decode_dp_imm::<ADD>));
    t.set("10 x0 1010 x", Decode(data::decode_dp_imm::<ADC>));
    t.set("10 x0 1011 x", Decode(data::decode_dp_imm::<SBC>));
    t.set("10 x0 1101 x", Decode(data::decode_dp_imm::<SUB>));
    t.set("10 x0 1110 x", Decode(data::decode_dp_imm::<RSB>));

    // Data processing (plain binary immediate)
    t.set("10 x1 00000", Decode(data::decode_addw));
    t.set("10 x1 00100", Decode(data::decode_movw));
    t.set("10 x1 01010", Decode(data::decode_subw));
    t.set("10 x1 01100", Decode(data::decode_movt));
    t.set("10 x1 100x0", Decode(data::decode_ssat));
    t.set("10 x1 10100", Decode(data::decode_sbfx));
    t.set("10 x1 10110", Decode(data::decode_bfi));
    t.set("10 x1 110x0", Decode(data::decode_usat));
    t.set("10 x1 11100", Decode(data::decode_ubfx));

    // Store single
    t.set("11 000 100 0", Execute(memory::str_imm12::<1>));
    t.set("11 000 101 0", Execute(memory::str_imm12::<2>));
    t.set("11 000 110 0", Execute(memory::str_imm12::<4>));
    t.set("11 000 000 0", Decode(memory::decode_store::<1>));
    t.set("11 000 001 0", Decode(memory::decode_store::<2>));
    t.set("11 000 010 0", Decode(memory::decode_store::<4>));

    // Load byte, halfword, word; memory hints
    t.set("11 00 0x 00 1", Decode(memory::decode_load::<1, false>));
    t.set("11 00 1x 00 1", Decode(memory::decode_load::<1, true>));
    t.set("11 00 0x 01 1", Decode(memory::decode_load::<2, false>));
    t.set("11 00 1x 01 1", Decode(memory::decode_load::<2, true>));
    t.set("11 00 0x 10 1", Decode(memory::decode_load::<4, false>));

    // Register data processing, multiplies and divides
    t.set("11 010 xxxx", Decode(data::decode_dp_register));
    t.set("11 0110 xxx", Decode(multiply::decode_multiply));
    t.set("11 0111 xxx", Decode(multiply::decode_long_multiply));

    t
}
