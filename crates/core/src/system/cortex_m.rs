// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bus::{PeripheralEntry, SystemBus};
use crate::config::SimulationConfig;
use crate::cpu::CortexM;
use crate::nvic::Nvic;
use crate::peripherals::nvic::{NvicRegisters, NvicState, NVIC_BASE, NVIC_SIZE};
use crate::peripherals::scb::{Scb, SCB_BASE, SCB_SIZE};
use std::sync::Arc;

/// Build a core and map the System Control Space blocks that share its
/// exception state.
pub fn configure_cortex_m(
    bus: &mut SystemBus,
    config: &SimulationConfig,
) -> (CortexM, Arc<NvicState>) {
    let nvic_state = Arc::new(NvicState::default());
    nvic_state.set_prigroup(config.prigroup);

    let mut cpu = CortexM::new(Nvic::new(nvic_state.clone(), config.vector_count));
    cpu.trace_instructions = config.trace_instructions;

    bus.nvic = Some(nvic_state.clone());

    // Ensure SCB exists (VTOR, ICSR, AIRCR, SHPR, STIR)
    bus.install(PeripheralEntry {
        name: "scb".to_string(),
        base: SCB_BASE,
        size: SCB_SIZE,
        irq: None,
        dev: Box::new(Scb::new(nvic_state.clone())),
    });

    // Ensure NVIC exists (shared pending/enabled state)
    bus.install(PeripheralEntry {
        name: "nvic".to_string(),
        base: NVIC_BASE,
        size: NVIC_SIZE,
        irq: None,
        dev: Box::new(NvicRegisters::new(nvic_state.clone())),
    });

    (cpu, nvic_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bus;

    #[test]
    fn test_scs_blocks_share_state_with_core() {
        let mut bus = SystemBus::new();
        let config = SimulationConfig {
            prigroup: 3,
            ..Default::default()
        };
        let (cpu, state) = configure_cortex_m(&mut bus, &config);
        assert_eq!(state.prigroup(), 3);
        assert_eq!(cpu.nvic.vector_count(), config.vector_count);

        // VTOR written through the bus is what the core sees
        bus.write_u32(SCB_BASE + 0x08, 0x2000_0000).unwrap();
        assert_eq!(cpu.nvic.state.vtor(), 0x2000_0000);

        // ISER0 bit 0 enables vector 16
        bus.write_u32(NVIC_BASE, 1).unwrap();
        assert!(state.is_enabled(16));
    }

    #[test]
    fn test_reconfigure_replaces_blocks() {
        let mut bus = SystemBus::new();
        configure_cortex_m(&mut bus, &SimulationConfig::default());
        configure_cortex_m(&mut bus, &SimulationConfig::default());
        let scbs = bus.peripherals.iter().filter(|p| p.name == "scb").count();
        assert_eq!(scbs, 1);
    }
}
