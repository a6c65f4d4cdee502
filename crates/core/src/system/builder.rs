// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bus::SystemBus;
use crate::config::SimulationConfig;
use crate::cpu::CortexM;
use crate::system::cortex_m::configure_cortex_m;
use crate::Machine;
use std::path::Path;
use thumbsim_config::MachineDescriptor;
use tracing::info;

/// Reads a machine descriptor, or falls back to the stock Cortex-M3 map.
pub fn load_descriptor(path: Option<&Path>) -> anyhow::Result<MachineDescriptor> {
    match path {
        Some(path) => {
            info!("Loading machine descriptor: {:?}", path);
            MachineDescriptor::from_file(path)
        }
        None => {
            info!("Using default hardware configuration");
            Ok(MachineDescriptor::default())
        }
    }
}

/// Bus, core and exception controller for `desc`, ready for firmware.
pub fn build_machine(
    desc: &MachineDescriptor,
    trace_instructions: bool,
) -> anyhow::Result<Machine<CortexM>> {
    let mut bus = SystemBus::from_config(desc)?;
    let config = SimulationConfig {
        vector_count: desc.vector_count(),
        prigroup: desc.nvic.prigroup,
        trace_instructions,
        ..Default::default()
    };
    let (cpu, _) = configure_cortex_m(&mut bus, &config);
    info!(
        "Machine '{}': {} vectors, {} peripherals",
        desc.name,
        config.vector_count,
        bus.peripherals.len()
    );
    Ok(Machine::with_config(cpu, bus, config))
}
