// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::memory::{LinearMemory, Segment};
use crate::peripherals::nvic::NvicState;
use crate::peripherals::systick::Systick;
use crate::peripherals::uart::Uart;
use crate::{Bus, Peripheral, SimResult, SimulationError};
use anyhow::Context;
use std::sync::Arc;
use std::sync::Mutex;
use thumbsim_config::{parse_size, MachineDescriptor, PeripheralType};

/// What an address decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Rom,
    Ram,
    SystemControl,
    Peripheral,
}

/// Start of the System Control Space; peripherals above it report `SystemControl`.
pub const SCS_BASE: u32 = 0xE000_E000;

pub struct PeripheralEntry {
    pub name: String,
    pub base: u32,
    pub size: u32,
    pub irq: Option<u32>,
    pub dev: Box<dyn Peripheral>,
}

impl PeripheralEntry {
    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

pub struct SystemBus {
    pub rom: LinearMemory,
    pub ram: LinearMemory,
    pub peripherals: Vec<PeripheralEntry>,
    pub nvic: Option<Arc<NvicState>>,
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBus {
    /// Stock Cortex-M3 map: 256 KiB ROM at 0, 64 KiB RAM at 0x2000_0000, SysTick.
    pub fn new() -> Self {
        Self {
            rom: LinearMemory::rom(256 * 1024, 0x0),
            ram: LinearMemory::new(64 * 1024, 0x2000_0000),
            peripherals: vec![PeripheralEntry {
                name: "systick".to_string(),
                base: crate::peripherals::systick::SYSTICK_BASE,
                size: crate::peripherals::systick::SYSTICK_SIZE,
                irq: Some(crate::peripherals::systick::SYSTICK_VECTOR),
                dev: Box::new(Systick::new()),
            }],
            nvic: None,
        }
    }

    pub fn from_config(desc: &MachineDescriptor) -> anyhow::Result<Self> {
        let rom_size = desc.rom.size_bytes()?;
        let ram_size = desc.ram.size_bytes()?;

        let mut bus = Self {
            rom: LinearMemory::rom(rom_size as usize, desc.rom.base),
            ram: LinearMemory::new(ram_size as usize, desc.ram.base),
            peripherals: Vec::new(),
            nvic: None,
        };

        for p_cfg in &desc.peripherals {
            let dev: Box<dyn Peripheral> = match p_cfg.r#type {
                PeripheralType::Uart => Box::new(Uart::with_index(p_cfg.index)),
                PeripheralType::Systick => Box::new(Systick::new()),
            };

            let size = match &p_cfg.size {
                Some(size) => u32::try_from(parse_size(size)?)
                    .with_context(|| format!("Peripheral '{}' window too large", p_cfg.id))?,
                None => 0x1000, // Default 4KB page
            };

            let irq = p_cfg.irq.or(match p_cfg.r#type {
                PeripheralType::Systick => Some(crate::peripherals::systick::SYSTICK_VECTOR),
                _ => None,
            });

            bus.peripherals.push(PeripheralEntry {
                name: p_cfg.id.clone(),
                base: p_cfg.base_address,
                size,
                irq,
                dev,
            });
        }

        Ok(bus)
    }

    /// Attach a UART TX capture sink to any UART peripherals on this bus.
    ///
    /// When `echo_stdout` is false, UART writes will no longer be printed to stdout.
    pub fn attach_uart_tx_sink(&mut self, sink: Arc<Mutex<Vec<u8>>>, echo_stdout: bool) {
        for p in &mut self.peripherals {
            let Some(any) = p.dev.as_any_mut() else {
                continue;
            };
            let Some(uart) = any.downcast_mut::<Uart>() else {
                continue;
            };
            uart.set_sink(Some(sink.clone()), echo_stdout);
        }
    }

    /// Register every UART on the bus with a peripheral monitor.
    pub fn attach_monitor(&self, registry: &mut crate::monitor::MonitorRegistry) {
        for p in &self.peripherals {
            if let Some(uart) = p.dev.as_any().and_then(|a| a.downcast_ref::<Uart>()) {
                uart.attach_monitor(registry);
            }
        }
    }

    /// Add or replace the peripheral mapped at `base`.
    pub fn install(&mut self, entry: PeripheralEntry) {
        if let Some(p) = self
            .peripherals
            .iter_mut()
            .find(|p| p.name == entry.name || p.base == entry.base)
        {
            *p = entry;
        } else {
            self.peripherals.push(entry);
        }
    }

    pub fn region_of(&self, addr: u32) -> Option<RegionKind> {
        if self.rom.contains(addr) {
            Some(RegionKind::Rom)
        } else if self.ram.contains(addr) {
            Some(RegionKind::Ram)
        } else if self.peripherals.iter().any(|p| p.contains(addr)) {
            if addr >= SCS_BASE {
                Some(RegionKind::SystemControl)
            } else {
                Some(RegionKind::Peripheral)
            }
        } else {
            None
        }
    }

    /// Image loading path: writes ROM or RAM directly.
    pub fn load_segment(&mut self, segment: &Segment) -> bool {
        self.rom.load_from_segment(segment) || self.ram.load_from_segment(segment)
    }

    /// Debugger write: like `write_u8` but ROM accepts it.
    pub fn poke_u8(&mut self, addr: u32, value: u8) -> SimResult<()> {
        if self.rom.write_u8(addr, value) {
            return Ok(());
        }
        self.write_u8(addr, value)
    }

    pub fn signal_nvic_irq(&self, irq: u32) {
        match &self.nvic {
            Some(nvic) if irq >= 16 => nvic.set_pending(irq),
            Some(_) => tracing::warn!("signal_nvic_irq called for core exception {}", irq),
            None => tracing::warn!("No NVIC attached; IRQ {} dropped", irq),
        }
    }

    pub fn tick_peripherals_fully(&mut self) -> (Vec<u32>, u32) {
        let mut interrupts = Vec::new();
        let mut cycles = 0;

        for p in self.peripherals.iter_mut() {
            let res = p.dev.tick();
            cycles += res.cycles;

            if !res.irq {
                continue;
            }
            let Some(irq) = p.irq else {
                continue;
            };
            if irq >= 16 {
                if let Some(nvic) = &self.nvic {
                    nvic.set_pending(irq);
                } else {
                    // No NVIC, pend legacy style
                    interrupts.push(irq);
                }
            } else {
                // Core exceptions bypass NVIC ISPR/ISER
                interrupts.push(irq);
            }
        }

        (interrupts, cycles)
    }
}

impl crate::Bus for SystemBus {
    fn read_u8(&self, addr: u32) -> SimResult<u8> {
        if let Some(val) = self.ram.read_u8(addr) {
            return Ok(val);
        }
        if let Some(val) = self.rom.read_u8(addr) {
            return Ok(val);
        }

        for p in &self.peripherals {
            if p.contains(addr) {
                return p.dev.read(addr - p.base);
            }
        }

        Err(SimulationError::MemoryViolation(addr))
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> SimResult<()> {
        if self.ram.write_u8(addr, value) {
            return Ok(());
        }
        if self.rom.contains(addr) {
            if self.rom.read_only {
                return Err(SimulationError::ReadOnly(addr));
            }
            self.rom.write_u8(addr, value);
            return Ok(());
        }

        for p in &mut self.peripherals {
            if p.contains(addr) {
                return p.dev.write(addr - p.base, value);
            }
        }

        Err(SimulationError::MemoryViolation(addr))
    }

    fn tick_peripherals(&mut self) -> Vec<u32> {
        self.tick_peripherals_fully().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_bus_from_config() {
        let desc = MachineDescriptor::default();
        let mut bus = SystemBus::from_config(&desc).expect("Failed to create bus from config");

        let uart = bus
            .peripherals
            .iter()
            .find(|p| p.name == "uart0")
            .expect("uart0 not found");
        assert_eq!(uart.base, 0x4000_C000);
        assert_eq!(uart.size, 4096);
        assert_eq!(uart.irq, Some(21));

        bus.write_u32(0x2000_0000, 0x1234_5678).unwrap();
        assert_eq!(bus.read_u32(0x2000_0000).unwrap(), 0x1234_5678);
        assert_eq!(bus.read(0x2000_0001, 2).unwrap(), 0x3456);
    }

    #[test]
    fn test_monitor_reaches_uart_through_bus() {
        use crate::monitor::{MonitorPacket, MonitorRegistry, PeripheralKind, UART_RX};

        let mut bus = SystemBus::from_config(&MachineDescriptor::default()).unwrap();
        let mut registry = MonitorRegistry::new();
        bus.attach_monitor(&mut registry);

        let packet = MonitorPacket::data(PeripheralKind::Uart, 0, UART_RX, b"r".to_vec());
        assert!(registry.dispatch(&packet));
        assert_ne!(bus.read_u8(0x4000_C000).unwrap() & 0x20, 0);
        assert_eq!(bus.read_u8(0x4000_C004).unwrap(), b'r');
        assert_eq!(bus.read_u8(0x4000_C000).unwrap() & 0x20, 0);
    }

    #[test]
    fn test_region_kinds() {
        let bus = SystemBus::new();
        assert_eq!(bus.region_of(0x100), Some(RegionKind::Rom));
        assert_eq!(bus.region_of(0x2000_0010), Some(RegionKind::Ram));
        assert_eq!(bus.region_of(0xE000_E014), Some(RegionKind::SystemControl));
        assert_eq!(bus.region_of(0x6000_0000), None);
    }

    #[test]
    fn test_rom_rejects_cpu_writes() {
        let mut bus = SystemBus::new();
        assert!(matches!(
            bus.write_u8(0x10, 1),
            Err(SimulationError::ReadOnly(0x10))
        ));
        bus.poke_u8(0x10, 1).unwrap();
        assert_eq!(bus.read_u8(0x10).unwrap(), 1);
    }

    #[test]
    fn test_unmapped_access_is_violation() {
        let mut bus = SystemBus::new();
        assert!(matches!(
            bus.read_u32(0x6000_0000),
            Err(SimulationError::MemoryViolation(0x6000_0000))
        ));
        assert!(bus.write(0x6000_0000, 0, 4).is_err());
    }
}
