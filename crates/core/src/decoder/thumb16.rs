// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! 16-bit Thumb tables.

use super::{tables, Executor, Slot, Table};
use crate::cpu::ops::data::{self, ADC, ADD, AND, BIC, EOR, ORR, SBC, SUB};
use crate::cpu::ops::{branch, memory, misc, multiply};

use Slot::{Decode, Execute};

fn shift_add_sub_mov_cmp(op: u32) -> Executor {
    tables().shift_add_sub_mov_cmp.resolve(op)
}

fn data_processing(op: u32) -> Executor {
    tables().data_processing.resolve(op)
}

fn special_bx(op: u32) -> Executor {
    tables().special_bx.resolve(op)
}

fn load_store(op: u32) -> Executor {
    tables().load_store.resolve(op)
}

fn miscellaneous(op: u32) -> Executor {
    tables().misc.resolve(op)
}

fn cond_branch(op: u32) -> Executor {
    tables().cond_branch.resolve(op)
}

/// Top level, bits [15:10].
pub fn build_base() -> Table {
    let mut t = Table::new(6, 10);
    t.set("00 xxxx", Decode(shift_add_sub_mov_cmp));
    t.set("01 0000", Decode(data_processing));
    t.set("01 0001", Decode(special_bx));
    t.set("01 001x", Execute(memory::ldr_literal16));
    t.set("01 01xx", Decode(load_store));
    t.set("01 1xxx", Decode(load_store));
    t.set("10 0xxx", Decode(load_store));
    t.set("10 100x", Execute(data::adr16));
    t.set("10 101x", Execute(data::add_sp_imm8));
    t.set("10 11xx", Decode(miscellaneous));
    t.set("11 000x", Execute(memory::stm16));
    t.set("11 001x", Execute(memory::ldm16));
    t.set("11 01xx", Decode(cond_branch));
    t.set("11 100x", Execute(branch::b16));
    t
}

/// Shift (immediate), add, subtract, move and compare: bits [13:9].
pub fn build_shift_add_sub_mov_cmp() -> Table {
    let mut t = Table::new(5, 9);
    t.set("000xx", Execute(data::shift_imm16::<0>));
    t.set("001xx", Execute(data::shift_imm16::<1>));
    t.set("010xx", Execute(data::shift_imm16::<2>));
    t.set("01100", Execute(data::add_sub_reg16::<ADD>));
    t.set("01101", Execute(data::add_sub_reg16::<SUB>));
    t.set("01110", Execute(data::add_sub_imm3::<ADD>));
    t.set("01111", Execute(data::add_sub_imm3::<SUB>));
    t.set("100xx", Execute(data::mov_imm8));
    t.set("101xx", Execute(data::cmp_imm8));
    t.set("110xx", Execute(data::add_sub_imm8::<ADD>));
    t.set("111xx", Execute(data::add_sub_imm8::<SUB>));
    t
}

/// Register data processing: bits [9:6].
pub fn build_data_processing() -> Table {
    let mut t = Table::new(4, 6);
    t.set("0000", Execute(data::dp16::<AND>));
    t.set("0001", Execute(data::dp16::<EOR>));
    t.set("0010", Execute(data::shift_reg_n::<0>));
    t.set("0011", Execute(data::shift_reg_n::<1>));
    t.set("0100", Execute(data::shift_reg_n::<2>));
    t.set("0101", Execute(data::dp16::<ADC>));
    t.set("0110", Execute(data::dp16::<SBC>));
    t.set("0111", Execute(data::shift_reg_n::<3>));
    t.set("1000", Execute(data::dp16_test::<AND>));
    t.set("1001", Execute(data::rsb_imm16));
    t.set("1010", Execute(data::dp16_test::<SUB>));
    t.set("1011", Execute(data::dp16_test::<ADD>));
    t.set("1100", Execute(data::dp16::<ORR>));
    t.set("1101", Execute(multiply::mul16));
    t.set("1110", Execute(data::dp16::<BIC>));
    t.set("1111", Execute(data::mvn16));
    t
}

/// Special data instructions and branch and exchange: bits [9:6].
pub fn build_special_bx() -> Table {
    let mut t = Table::new(4, 6);
    t.set("00xx", Execute(data::add_hi));
    t.set("0101", Execute(data::cmp_hi));
    t.set("011x", Execute(data::cmp_hi));
    t.set("10xx", Execute(data::mov_hi));
    t.set("110x", Execute(branch::bx));
    t.set("111x", Execute(branch::blx_reg));
    t
}

/// Single data item loads and stores: bits [15:9].
pub fn build_load_store() -> Table {
    let mut t = Table::new(7, 9);
    t.set("0101 000", Execute(memory::str_reg16::<4>));
    t.set("0101 001", Execute(memory::str_reg16::<2>));
    t.set("0101 010", Execute(memory::str_reg16::<1>));
    t.set("0101 011", Execute(memory::ldr_reg16::<1, true>));
    t.set("0101 100", Execute(memory::ldr_reg16::<4, false>));
    t.set("0101 101", Execute(memory::ldr_reg16::<2, false>));
    t.set("0101 110", Execute(memory::ldr_reg16::<1, false>));
    t.set("0101 111", Execute(memory::ldr_reg16::<2, true>));
    t.set("0110 0xx", Execute(memory::str_imm16::<4>));
    t.set("0110 1xx", Execute(memory::ldr_imm16::<4>));
    t.set("0111 0xx", Execute(memory::str_imm16::<1>));
    t.set("0111 1xx", Execute(memory::ldr_imm16::<1>));
    t.set("1000 0xx", Execute(memory::str_imm16::<2>));
    t.set("1000 1xx", Execute(memory::ldr_imm16::<2>));
    t.set("1001 0xx", Execute(memory::str_sp16));
    t.set("1001 1xx", Execute(memory::ldr_sp16));
    t
}

/// Miscellaneous 16-bit instructions: bits [11:5].
pub fn build_misc() -> Table {
    let mut t = Table::new(7, 5);
    t.set("0000 0xx", Execute(data::add_sp_imm7));
    t.set("0000 1xx", Execute(data::sub_sp_imm7));
    t.set("0001 xxx", Execute(branch::cbz_cbnz));
    t.set("0011 xxx", Execute(branch::cbz_cbnz));
    t.set("1001 xxx", Execute(branch::cbz_cbnz));
    t.set("1011 xxx", Execute(branch::cbz_cbnz));
    t.set("0010 00x", Execute(data::sxth_n));
    t.set("0010 01x", Execute(data::sxtb_n));
    t.set("0010 10x", Execute(data::uxth_n));
    t.set("0010 11x", Execute(data::uxtb_n));
    t.set("010x xxx", Execute(memory::push16));
    t.set("110x xxx", Execute(memory::pop16));
    t.set("0110 011", Execute(misc::cps));
    t.set("1010 00x", Execute(data::rev_n));
    t.set("1010 01x", Execute(data::rev16_n));
    t.set("1010 11x", Execute(data::revsh_n));
    t.set("1110 xxx", Execute(misc::bkpt));
    t.set("1111 xxx", Decode(misc::decode_it_hint));
    t
}

/// Conditional branch and supervisor call: bits [11:8].
pub fn build_cond_branch() -> Table {
    let mut t = Table::new(4, 8);
    t.set("xxxx", Execute(branch::b_cond16));
    t.set("1110", Execute(misc::udf16));
    t.set("1111", Execute(misc::svc));
    t
}
