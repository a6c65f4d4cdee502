// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::cpu::registers::Mode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MachineSnapshot {
    pub cpu: CpuSnapshot,
    pub peripherals: HashMap<String, serde_json::Value>,
}

/// Core state. Pending exceptions are not captured; peripherals re-pend
/// their interrupts from their own restored state.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CpuSnapshot {
    /// R0-R12, active SP, LR, PC.
    pub registers: Vec<u32>,
    pub xpsr: u32,
    pub msp: u32,
    pub psp: u32,
    pub primask: bool,
    pub faultmask: bool,
    pub basepri: u8,
    pub control: u32,
    pub mode: Mode,
    /// Active exception numbers, innermost last.
    pub active: Vec<u32>,
    pub vtor: u32,
}

impl MachineSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
