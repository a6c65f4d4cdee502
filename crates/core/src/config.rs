// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Interval in instructions for ticking peripherals (1 = every instruction).
    pub peripheral_tick_interval: u32,
    /// Number of exception vectors, 16 system entries included. Also bounds
    /// the pending-exception store.
    pub vector_count: u32,
    /// Initial AIRCR.PRIGROUP split between group and sub-priority.
    pub prigroup: u32,
    /// Log every executed instruction at DEBUG level.
    pub trace_instructions: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            peripheral_tick_interval: 1,
            vector_count: 16 + 64,
            prigroup: 0,
            trace_instructions: false,
        }
    }
}
